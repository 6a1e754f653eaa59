//! Running every entity's reconciliation in foreign key order.
//!
//! Declarations are reconciled in the order given, parents first. The order
//! is checked up front: a table whose foreign key points at a table later in
//! the list would fail to get its constraint, so that is refused before any
//! DDL runs.

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::reconcile::{ReconcileOptions, TableReport, ensure_and_reconcile};
use converge_schema::SchemaDeclaration;
use std::collections::HashSet;
use std::fmt;
use tracing::Instrument;

/// The outcome of a full pass.
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    /// One report per declaration, in reconciliation order
    pub tables: Vec<TableReport>,
}

impl ReconcileReport {
    /// No table needed changes and nothing failed.
    pub fn is_converged(&self) -> bool {
        self.tables
            .iter()
            .all(|t| !t.created && t.changes.is_empty() && t.is_clean())
    }

    pub fn created(&self) -> usize {
        self.tables.iter().filter(|t| t.created).count()
    }

    pub fn applied(&self) -> usize {
        self.tables.iter().map(|t| t.applied).sum()
    }

    pub fn ignored(&self) -> usize {
        self.tables.iter().map(|t| t.ignored).sum()
    }

    pub fn failed(&self) -> usize {
        self.tables.iter().map(|t| t.failed.len()).sum()
    }

    pub fn planned(&self) -> usize {
        self.tables.iter().map(|t| t.planned.len()).sum()
    }
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for table in &self.tables {
            writeln!(f, "{table}")?;
        }
        write!(
            f,
            "{} table(s): {} created, {} applied, {} ignored, {} failed",
            self.tables.len(),
            self.created(),
            self.applied(),
            self.ignored(),
            self.failed()
        )
    }
}

/// Check that every in-set foreign key target comes before its referrer.
///
/// Self references are fine. References to tables outside the set are
/// assumed to exist already and only produce a warning.
pub fn check_order(decls: &[SchemaDeclaration]) -> Result<()> {
    let all: HashSet<&str> = decls.iter().map(|d| d.table_name.as_str()).collect();
    let mut seen: HashSet<&str> = HashSet::new();

    for decl in decls {
        let table = decl.table_name.as_str();
        let mut later = Vec::new();
        for target in decl.referenced_tables() {
            if target == table || seen.contains(target) {
                continue;
            }
            if all.contains(target) {
                later.push(target.to_string());
            } else {
                tracing::warn!(table, references = target, "foreign key target is not managed here");
            }
        }
        if !later.is_empty() {
            return Err(Error::DependencyOrder {
                table: table.to_string(),
                references: later,
            });
        }
        seen.insert(table);
    }

    Ok(())
}

/// Order declarations so that foreign key targets come first.
///
/// Stable: among tables whose dependencies are satisfied, the one listed
/// first goes first, so an already valid order is returned unchanged.
pub fn dependency_order(decls: &[SchemaDeclaration]) -> Result<Vec<&SchemaDeclaration>> {
    let all: HashSet<&str> = decls.iter().map(|d| d.table_name.as_str()).collect();
    let deps: Vec<Vec<&str>> = decls
        .iter()
        .map(|d| {
            d.referenced_tables()
                .into_iter()
                .filter(|t| *t != d.table_name && all.contains(t))
                .collect()
        })
        .collect();

    let mut placed: HashSet<&str> = HashSet::new();
    let mut remaining: Vec<usize> = (0..decls.len()).collect();
    let mut ordered = Vec::with_capacity(decls.len());

    while !remaining.is_empty() {
        let ready = remaining
            .iter()
            .position(|&i| deps[i].iter().all(|t| placed.contains(t)));
        let Some(pos) = ready else {
            return Err(Error::DependencyCycle {
                tables: remaining
                    .iter()
                    .map(|&i| decls[i].table_name.clone())
                    .collect(),
            });
        };
        let i = remaining.remove(pos);
        placed.insert(decls[i].table_name.as_str());
        ordered.push(&decls[i]);
    }

    Ok(ordered)
}

/// Reconcile every declaration, in order, under the session lock.
pub async fn reconcile_all<B: Backend + ?Sized>(
    backend: &B,
    decls: &[SchemaDeclaration],
    options: &ReconcileOptions,
) -> Result<ReconcileReport> {
    check_order(decls)?;

    let locked = options.lock && !options.dry_run;
    if locked {
        let acquired = backend
            .acquire_lock(&options.lock_name, options.lock_timeout)
            .await
            .map_err(|e| Error::Lock {
                name: options.lock_name.clone(),
                reason: e.to_string(),
            })?;
        if !acquired {
            return Err(Error::Lock {
                name: options.lock_name.clone(),
                reason: format!("still held elsewhere after {:?}", options.lock_timeout),
            });
        }
        tracing::debug!(lock = %options.lock_name, "acquired schema lock");
    }

    let result = reconcile_each(backend, decls, options).await;

    if locked && let Err(e) = backend.release_lock(&options.lock_name).await {
        tracing::warn!(lock = %options.lock_name, error = %e, "failed to release schema lock");
    }

    let report = result?;
    tracing::info!(
        tables = report.tables.len(),
        applied = report.applied(),
        ignored = report.ignored(),
        failed = report.failed(),
        "reconciliation finished"
    );
    Ok(report)
}

async fn reconcile_each<B: Backend + ?Sized>(
    backend: &B,
    decls: &[SchemaDeclaration],
    options: &ReconcileOptions,
) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();
    for decl in decls {
        let span = tracing::info_span!("reconcile", table = %decl.table_name);
        let table = ensure_and_reconcile(backend, decl, options)
            .instrument(span)
            .await?;
        report.tables.push(table);
    }
    Ok(report)
}
