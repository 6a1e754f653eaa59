//! Reconciliation of a single table.
//!
//! ```text
//! validate -> introspect -> (create if absent -> re-introspect)
//!          -> diff -> generate -> execute one by one
//! ```
//!
//! Statements run in order, each on its own. A failure of an ignore-failure
//! statement on a missing object is expected and only counted; any other
//! statement failure is logged and recorded in the [`TableReport`], and the
//! pass moves on. Only validation, introspection and table creation errors
//! abort.

use crate::backend::Backend;
use crate::ddl::{self, Statement};
use crate::diff::{self, ChangeSummary};
use crate::error::{DbError, Error, ErrorClass, Result};
use crate::introspect::introspect;
use converge_schema::{LiveTable, SchemaDeclaration};
use converge_sql::Dialect;
use std::fmt;
use std::time::Duration;

/// Knobs for a reconciliation pass.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Compute and log statements without executing them
    pub dry_run: bool,
    /// Hold a session lock for the whole pass
    pub lock: bool,
    /// Lock name; Postgres derives its advisory key from it
    pub lock_name: String,
    /// How long to wait for the lock
    pub lock_timeout: Duration,
    /// How many times a create that lost a race is re-checked
    pub create_retries: u32,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            lock: true,
            lock_name: "converge".to_string(),
            lock_timeout: Duration::from_secs(30),
            create_retries: 1,
        }
    }
}

/// A statement that failed and was not expected to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedStatement {
    pub sql: String,
    pub error: DbError,
}

/// What happened to one table.
#[derive(Debug, Clone, Default)]
pub struct TableReport {
    pub table: String,
    /// The table was absent and created by this pass
    pub created: bool,
    /// Columns and indexes the diff asked for
    pub changes: ChangeSummary,
    /// Statements that succeeded (creation included)
    pub applied: usize,
    /// Ignore-failure statements whose expected failure was swallowed
    pub ignored: usize,
    pub failed: Vec<FailedStatement>,
    /// Statements computed but not run, in dry-run mode
    pub planned: Vec<Statement>,
}

impl TableReport {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            ..Default::default()
        }
    }

    /// Nothing failed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl fmt::Display for TableReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.table)?;
        if self.created {
            write!(f, "created, ")?;
        }
        if !self.planned.is_empty() {
            return write!(f, "{} statement(s) planned", self.planned.len());
        }
        write!(f, "{} applied, {} ignored", self.applied, self.ignored)?;
        if !self.failed.is_empty() {
            write!(f, ", {} failed", self.failed.len())?;
        }
        Ok(())
    }
}

/// Bring one table in line with its declaration.
pub async fn ensure_and_reconcile<B: Backend + ?Sized>(
    backend: &B,
    decl: &SchemaDeclaration,
    options: &ReconcileOptions,
) -> Result<TableReport> {
    decl.validate().map_err(|problems| Error::InvalidDeclaration {
        table: decl.table_name.clone(),
        problems,
    })?;

    let table = decl.table_name.as_str();
    let dialect = backend.dialect();
    let mut report = TableReport::new(table);

    let mut live = read_live(backend, table).await?;
    if live.is_absent() {
        let create = ddl::create_table(decl, dialect);
        if options.dry_run {
            tracing::info!(table, sql = %create.sql, "would create table");
            report.created = true;
            report.planned.push(create);
            // Nothing to introspect: plan against the declaration itself.
            return Ok(plan_after_create(decl, dialect, report));
        }

        tracing::info!(table, "creating table");
        report.created = create_table(backend, table, &create, options.create_retries).await?;
        if report.created {
            report.applied += 1;
        }
        live = read_live(backend, table).await?;
    }

    let unmanaged = diff::undeclared_columns(decl, &live);
    if !unmanaged.is_empty() {
        tracing::debug!(table, columns = ?unmanaged, "leaving undeclared columns in place");
    }

    let changes = diff::diff(decl, &live, dialect);
    log_drift(table, &changes.summary());
    report.changes = changes.summary();

    let statements = ddl::generate(&changes, decl, dialect);
    if options.dry_run {
        for statement in statements {
            tracing::info!(table, sql = %statement.sql, "would execute");
            report.planned.push(statement);
        }
        return Ok(report);
    }

    for statement in &statements {
        match backend.execute(statement).await {
            Ok(()) => {
                tracing::info!(table, sql = %statement.sql, "executed");
                report.applied += 1;
            }
            Err(error) if statement.ignore_failure && error.is_missing_object() => {
                tracing::info!(table, sql = %statement.sql, %error, "ignored expected failure");
                report.ignored += 1;
            }
            Err(error) => {
                tracing::error!(table, sql = %statement.sql, %error, "statement failed");
                report.failed.push(FailedStatement {
                    sql: statement.sql.clone(),
                    error,
                });
            }
        }
    }

    Ok(report)
}

/// Plan what follows the creation of a table that does not exist yet.
///
/// Creation covers everything MySQL needs; on Postgres the indexes that
/// `CREATE TABLE` leaves out still show up as planned statements.
fn plan_after_create(decl: &SchemaDeclaration, dialect: Dialect, mut report: TableReport) -> TableReport {
    let mut changes = diff::diff(decl, &LiveTable::default(), dialect);
    changes.columns_to_add.clear();
    changes
        .indexes_to_add
        .retain(|idx| dialect == Dialect::Postgres && idx.references().is_none());

    report.changes = changes.summary();
    for statement in ddl::generate(&changes, decl, dialect) {
        tracing::info!(table = %decl.table_name, sql = %statement.sql, "would execute");
        report.planned.push(statement);
    }
    report
}

async fn read_live<B: Backend + ?Sized>(backend: &B, table: &str) -> Result<LiveTable> {
    introspect(backend, table)
        .await
        .map_err(|source| Error::Introspection {
            table: table.to_string(),
            source,
        })
}

/// Run the creation statement.
///
/// Returns `false` when another session created the table first.
async fn create_table<B: Backend + ?Sized>(
    backend: &B,
    table: &str,
    create: &Statement,
    retries: u32,
) -> Result<bool> {
    let mut attempts = 0;
    loop {
        let error = match backend.execute(create).await {
            Ok(()) => return Ok(true),
            Err(error) => error,
        };

        let fatal = |source: DbError| Error::CreateTable {
            table: table.to_string(),
            sql: create.sql.clone(),
            source,
        };
        if error.class != ErrorClass::DuplicateTable {
            return Err(fatal(error));
        }
        if !read_live(backend, table).await?.is_absent() {
            tracing::info!(table, %error, "table was created concurrently");
            return Ok(false);
        }
        if attempts >= retries {
            return Err(fatal(error));
        }
        attempts += 1;
        tracing::warn!(table, %error, attempt = attempts, "create raced but table is missing, retrying");
    }
}

fn log_drift(table: &str, summary: &ChangeSummary) {
    if summary.is_empty() {
        tracing::info!(table, "schema is up to date");
        return;
    }
    if !summary.columns_added.is_empty() {
        tracing::info!(
            table,
            "adding {} column(s): {}",
            summary.columns_added.len(),
            summary.columns_added.join(", ")
        );
    }
    if !summary.columns_modified.is_empty() {
        tracing::info!(
            table,
            "modifying {} column(s): {}",
            summary.columns_modified.len(),
            summary.columns_modified.join(", ")
        );
    }
    if !summary.indexes_added.is_empty() {
        tracing::info!(
            table,
            "adding {} index(es): {}",
            summary.indexes_added.len(),
            summary.indexes_added.join(", ")
        );
    }
}
