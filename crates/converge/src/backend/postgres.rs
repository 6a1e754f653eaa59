//! Postgres backend over tokio-postgres.

use super::{Backend, BoxFuture};
use crate::ddl::Statement;
use crate::error::DbError;
use crate::traced::{Connection, ConnectionExt};
use converge_schema::{LiveColumn, LiveIndexKind, LiveIndexRow};
use converge_sql::{Dialect, advisory_lock_key};
use std::time::Duration;
use tokio_postgres::NoTls;

/// Columns of a table in the current schema, shaped like
/// `INFORMATION_SCHEMA.COLUMNS` rows.
const COLUMNS_SQL: &str = r#"
SELECT a.attname::text AS name,
       format_type(a.atttypid, a.atttypmod) AS column_type,
       CASE WHEN a.attnotnull THEN 'NO' ELSE 'YES' END AS is_nullable,
       pg_get_expr(d.adbin, d.adrelid) AS column_default,
       CASE WHEN EXISTS (
           SELECT 1 FROM pg_index i
           WHERE i.indrelid = c.oid AND i.indisprimary AND a.attnum = ANY(i.indkey)
       ) THEN 'PRI' ELSE '' END AS column_key,
       CASE WHEN a.attidentity <> '' THEN 'identity' ELSE '' END AS extra
FROM pg_attribute a
JOIN pg_class c ON c.oid = a.attrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
WHERE c.relname = $1
  AND n.nspname = current_schema()
  AND c.relkind IN ('r', 'p')
  AND a.attnum > 0
  AND NOT a.attisdropped
ORDER BY a.attnum
"#;

/// Index columns plus foreign key constraint columns, one row per column.
const INDEX_ROWS_SQL: &str = r#"
SELECT ic.relname::text AS index_name,
       a.attname::text AS column_name,
       k.ord::int4 AS seq,
       CASE WHEN i.indisprimary THEN 'primary'
            WHEN i.indisunique THEN 'unique'
            ELSE 'index' END AS kind
FROM pg_index i
JOIN pg_class t ON t.oid = i.indrelid
JOIN pg_class ic ON ic.oid = i.indexrelid
JOIN pg_namespace n ON n.oid = t.relnamespace
CROSS JOIN LATERAL unnest(i.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
WHERE t.relname = $1 AND n.nspname = current_schema()
UNION ALL
SELECT con.conname::text,
       a.attname::text,
       k.ord::int4,
       'foreign_key'
FROM pg_constraint con
JOIN pg_class t ON t.oid = con.conrelid
JOIN pg_namespace n ON n.oid = t.relnamespace
CROSS JOIN LATERAL unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
WHERE con.contype = 'f' AND t.relname = $1 AND n.nspname = current_schema()
ORDER BY 1, 3
"#;

/// How often a contended advisory lock is retried.
const LOCK_POLL: Duration = Duration::from_millis(250);

/// A Postgres database reached through one connection.
///
/// All work, including the session advisory lock, happens on that single
/// connection.
pub struct PostgresBackend<C: Connection = deadpool_postgres::Object> {
    conn: C,
}

impl<C: Connection> PostgresBackend<C> {
    pub fn new(conn: C) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }
}

impl PostgresBackend<deadpool_postgres::Object> {
    /// Build a single-connection pool for `url` and check a connection out.
    pub async fn connect(url: &str) -> Result<Self, crate::Error> {
        let pg_config: tokio_postgres::Config = url
            .parse()
            .map_err(|e: tokio_postgres::Error| crate::Error::Connect(e.to_string()))?;
        let manager = deadpool_postgres::Manager::from_config(
            pg_config,
            NoTls,
            deadpool_postgres::ManagerConfig {
                recycling_method: deadpool_postgres::RecyclingMethod::Fast,
            },
        );
        let pool = deadpool_postgres::Pool::builder(manager)
            .max_size(1)
            .build()
            .map_err(|e| crate::Error::Connect(e.to_string()))?;
        let conn = pool
            .get()
            .await
            .map_err(|e| crate::Error::Connect(e.to_string()))?;
        Ok(Self::new(conn))
    }
}

impl<C: Connection> Backend for PostgresBackend<C> {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn fetch_columns<'a>(
        &'a self,
        table: &'a str,
    ) -> BoxFuture<'a, Result<Vec<LiveColumn>, DbError>> {
        Box::pin(async move {
            let rows = self.conn.traced().query(COLUMNS_SQL, &[&table]).await?;
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
            let rows = self.conn.traced().query(INDEX_ROWS_SQL, &[&table]).await?;
            rows.iter()
                .map(|row| {
                    let kind: String = row.try_get("kind")?;
                    let seq: i32 = row.try_get("seq")?;
                    Ok(LiveIndexRow {
                        index_name: row.try_get("index_name")?,
                        column_name: row.try_get("column_name")?,
                        seq: seq.max(0) as u32,
                        kind: parse_kind(&kind),
                    })
                })
                .collect::<Result<Vec<_>, DbError>>()
        })
    }

    fn execute<'a>(&'a self, statement: &'a Statement) -> BoxFuture<'a, Result<(), DbError>> {
        Box::pin(async move {
            self.conn.traced().execute(&statement.sql, &[]).await?;
            Ok::<_, DbError>(())
        })
    }

    fn acquire_lock<'a>(
        &'a self,
        name: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<bool, DbError>> {
        Box::pin(async move {
            let key = advisory_lock_key(name);
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                let rows = self
                    .conn
                    .traced()
                    .query("SELECT pg_try_advisory_lock($1)", &[&key])
                    .await?;
                let acquired = match rows.first() {
                    Some(row) => row.try_get::<_, bool>(0)?,
                    None => false,
                };
                if acquired {
                    return Ok::<_, DbError>(true);
                }
                if tokio::time::Instant::now() >= deadline {
                    return Ok(false);
                }
                tokio::time::sleep(LOCK_POLL).await;
            }
        })
    }

    fn release_lock<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), DbError>> {
        Box::pin(async move {
            let key = advisory_lock_key(name);
            self.conn
                .traced()
                .query("SELECT pg_advisory_unlock($1)", &[&key])
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
