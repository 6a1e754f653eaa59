//! MySQL backend over sqlx.

use super::{Backend, BoxFuture};
use crate::ddl::Statement;
use crate::error::DbError;
use converge_schema::{LiveColumn, LiveIndexKind, LiveIndexRow};
use converge_sql::Dialect;
use sqlx::Row;
use sqlx::mysql::{MySql, MySqlPool, MySqlPoolOptions};
use sqlx::pool::PoolConnection;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::Instrument;

// information_schema text columns come back as binary on some servers,
// hence the casts.
const COLUMNS_SQL: &str = r#"
SELECT CAST(COLUMN_NAME AS CHAR) AS name,
       CAST(COLUMN_TYPE AS CHAR) AS column_type,
       CAST(IS_NULLABLE AS CHAR) AS is_nullable,
       CAST(COLUMN_DEFAULT AS CHAR) AS column_default,
       CAST(COLUMN_KEY AS CHAR) AS column_key,
       CAST(EXTRA AS CHAR) AS extra
FROM INFORMATION_SCHEMA.COLUMNS
WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
ORDER BY ORDINAL_POSITION
"#;

const INDEX_ROWS_SQL: &str = r#"
SELECT CAST(INDEX_NAME AS CHAR) AS index_name,
       CAST(COLUMN_NAME AS CHAR) AS column_name,
       CAST(SEQ_IN_INDEX AS UNSIGNED) AS seq,
       CASE WHEN INDEX_NAME = 'PRIMARY' THEN 'primary'
            WHEN NON_UNIQUE = 0 THEN 'unique'
            ELSE 'index' END AS kind
FROM INFORMATION_SCHEMA.STATISTICS
WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND COLUMN_NAME IS NOT NULL
UNION ALL
SELECT CAST(CONSTRAINT_NAME AS CHAR),
       CAST(COLUMN_NAME AS CHAR),
       CAST(ORDINAL_POSITION AS UNSIGNED),
       'foreign_key'
FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE
WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND REFERENCED_TABLE_NAME IS NOT NULL
ORDER BY index_name, seq
"#;

/// A MySQL database reached through one pooled connection.
///
/// `GET_LOCK` is session-scoped, so everything runs on the same connection.
pub struct MySqlBackend {
    conn: Mutex<PoolConnection<MySql>>,
    _pool: MySqlPool,
}

impl MySqlBackend {
    pub async fn connect(url: &str) -> Result<Self, crate::Error> {
        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .map_err(|e| crate::Error::Connect(e.to_string()))?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: MySqlPool) -> Result<Self, crate::Error> {
        let conn = pool
            .acquire()
            .await
            .map_err(|e| crate::Error::Connect(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
            _pool: pool,
        })
    }
}

impl Backend for MySqlBackend {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    fn fetch_columns<'a>(
        &'a self,
        table: &'a str,
    ) -> BoxFuture<'a, Result<Vec<LiveColumn>, DbError>> {
        Box::pin(async move {
            let span = tracing::debug_span!("db.query", sql = %COLUMNS_SQL, table = %table);
            let mut conn = self.conn.lock().await;
            let rows = sqlx::query(COLUMNS_SQL)
                .bind(table)
                .fetch_all(&mut **conn)
                .instrument(span)
                .await?;

            rows.iter()
                .map(|row| {
                    Ok(LiveColumn {
                        name: row.try_get("name")?,
                        column_type: row.try_get("column_type")?,
                        is_nullable: row.try_get("is_nullable")?,
                        default: row.try_get("column_default")?,
                        key: row.try_get("column_key")?,
                        extra: row.try_get("extra")?,
                    })
                })
                .collect::<Result<Vec<_>, DbError>>()
        })
    }

    fn fetch_index_rows<'a>(
        &'a self,
        table: &'a str,
    ) -> BoxFuture<'a, Result<Vec<LiveIndexRow>, DbError>> {
        Box::pin(async move {
            let span = tracing::debug_span!("db.query", sql = %INDEX_ROWS_SQL, table = %table);
            let mut conn = self.conn.lock().await;
            let rows = sqlx::query(INDEX_ROWS_SQL)
                .bind(table)
                .bind(table)
                .fetch_all(&mut **conn)
                .instrument(span)
                .await?;

            rows.iter()
                .map(|row| {
                    let kind: String = row.try_get("kind")?;
                    let seq: u64 = row.try_get("seq")?;
                    Ok(LiveIndexRow {
                        index_name: row.try_get("index_name")?,
                        column_name: row.try_get("column_name")?,
                        seq: u32::try_from(seq).unwrap_or(u32::MAX),
                        kind: parse_kind(&kind),
                    })
                })
                .collect::<Result<Vec<_>, DbError>>()
        })
    }

    fn execute<'a>(&'a self, statement: &'a Statement) -> BoxFuture<'a, Result<(), DbError>> {
        Box::pin(async move {
            let span = tracing::debug_span!(
                "db.execute",
                sql = %statement.sql,
                affected = tracing::field::Empty,
            );
            let mut conn = self.conn.lock().await;
            let result = sqlx::query(statement.sql.as_str())
                .execute(&mut **conn)
                .instrument(span.clone())
                .await?;
            span.record("affected", result.rows_affected());
            Ok::<_, DbError>(())
        })
    }

    fn acquire_lock<'a>(
        &'a self,
        name: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<bool, DbError>> {
        Box::pin(async move {
            let mut conn = self.conn.lock().await;
            let got: Option<i64> = sqlx::query_scalar("SELECT GET_LOCK(?, ?)")
                .bind(name)
                .bind(timeout.as_secs() as i64)
                .fetch_one(&mut **conn)
                .instrument(tracing::debug_span!("db.lock", name = %name))
                .await?;
            Ok::<_, DbError>(got == Some(1))
        })
    }

    fn release_lock<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), DbError>> {
        Box::pin(async move {
            let mut conn = self.conn.lock().await;
            let _: Option<i64> = sqlx::query_scalar("SELECT RELEASE_LOCK(?)")
                .bind(name)
                .fetch_one(&mut **conn)
                .await?;
            Ok::<_, DbError>(())
        })
    }
}

fn parse_kind(kind: &str) -> LiveIndexKind {
    match kind {
        "primary" => LiveIndexKind::Primary,
        "unique" => LiveIndexKind::Unique,
        "foreign_key" => LiveIndexKind::ForeignKey,
        _ => LiveIndexKind::Index,
    }
}
