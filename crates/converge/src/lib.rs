//! Declarative schema reconciliation.
//!
//! Each entity declares the table it wants as a [`SchemaDeclaration`]. At
//! start-up, [`reconcile_all`] walks the declarations in foreign key order
//! and, for each one, reads the live table from the database catalog, works
//! out what is missing or different, and runs the DDL that closes the gap.
//!
//! Reconciliation only ever adds: missing tables, columns and indexes are
//! created and drifted columns are modified, but nothing the declarations
//! leave out is dropped.
//!
//! ```ignore
//! let backend = converge::connect(&database_url).await?;
//! let report = converge::reconcile_all(&backend, &declarations, &ReconcileOptions::default()).await?;
//! println!("{report}");
//! ```
//!
//! # Idempotence
//!
//! A second pass over an unchanged database computes empty change-sets and
//! runs nothing. Indexes are the exception by construction: whenever one is
//! (re)created it is first dropped by name, and that drop is allowed to fail.

mod backend;
mod ddl;
mod diff;
mod error;
mod introspect;
mod orchestrate;
mod reconcile;
mod traced;

pub use backend::{
    Backend, BoxFuture, ExecutedStatement, MemoryBackend, MySqlBackend, PostgresBackend, connect,
    mask_password,
};
pub use ddl::{Operation, Statement, column_definition, create_table, generate};
pub use diff::{ChangeSet, ChangeSummary, ColumnModification, Drift, diff, undeclared_columns};
pub use error::{DbError, Error, ErrorClass, Result};
pub use introspect::{group_index_rows, introspect};
pub use orchestrate::{ReconcileReport, check_order, dependency_order, reconcile_all};
pub use reconcile::{FailedStatement, ReconcileOptions, TableReport, ensure_and_reconcile};
pub use traced::{Connection, ConnectionExt, TracedConn};

pub use converge_schema::{
    ColumnDefault, ColumnSpec, DeclarationProblem, ForeignKeyRef, IndexKind, IndexSpec,
    LiveColumn, LiveIndex, LiveIndexKind, LiveIndexRow, LiveTable, ReferentialAction,
    SchemaDeclaration,
};
pub use converge_sql::{Dialect, normalize_type};
