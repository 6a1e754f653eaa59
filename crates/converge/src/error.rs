use converge_schema::DeclarationProblem;
use std::fmt;
use thiserror::Error;

/// Errors that abort a reconciliation pass.
///
/// Failures of individual ALTER statements never show up here: they are
/// logged and recorded in the table report instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid declaration for table `{table}`: {}", join_problems(.problems))]
    InvalidDeclaration {
        table: String,
        problems: Vec<DeclarationProblem>,
    },

    #[error("failed to introspect table `{table}`: {source}")]
    Introspection {
        table: String,
        #[source]
        source: DbError,
    },

    #[error("failed to create table `{table}`: {source}")]
    CreateTable {
        table: String,
        sql: String,
        #[source]
        source: DbError,
    },

    #[error("could not acquire schema lock `{name}`: {reason}")]
    Lock { name: String, reason: String },

    #[error("table `{table}` references {} which must be reconciled first", .references.join(", "))]
    DependencyOrder {
        table: String,
        references: Vec<String>,
    },

    #[error("dependency cycle between tables: {}", .tables.join(" -> "))]
    DependencyCycle { tables: Vec<String> },

    #[error("connection failed: {0}")]
    Connect(String),
}

fn join_problems(problems: &[DeclarationProblem]) -> String {
    problems
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// How a driver error relates to reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The statement targeted an index, constraint or column that does not exist.
    MissingObject,
    /// The table itself does not exist.
    NoSuchTable,
    /// A table (or its row type) with this name already exists.
    DuplicateTable,
    Other,
}

/// A database error, classified by what reconciliation cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbError {
    pub class: ErrorClass,
    /// Server error code (MySQL error number or Postgres SQLSTATE)
    pub code: Option<String>,
    pub message: String,
}

impl DbError {
    pub fn new(class: ErrorClass, code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            class,
            code,
            message: message.into(),
        }
    }

    /// An unclassified error without a server code.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Other, None, message)
    }

    /// Classify a MySQL error number.
    pub fn mysql(number: u16, message: impl Into<String>) -> Self {
        let class = match number {
            // ER_CANT_DROP_FIELD_OR_KEY, ER_BAD_FIELD_ERROR
            1091 | 1054 => ErrorClass::MissingObject,
            // ER_NO_SUCH_TABLE
            1146 => ErrorClass::NoSuchTable,
            // ER_TABLE_EXISTS_ERROR
            1050 => ErrorClass::DuplicateTable,
            _ => ErrorClass::Other,
        };
        Self::new(class, Some(number.to_string()), message)
    }

    /// Classify a Postgres SQLSTATE.
    pub fn postgres(sqlstate: &str, message: impl Into<String>) -> Self {
        let class = match sqlstate {
            // undefined_object, undefined_column
            "42704" | "42703" => ErrorClass::MissingObject,
            "42P01" => ErrorClass::NoSuchTable,
            "42P07" => ErrorClass::DuplicateTable,
            _ => ErrorClass::Other,
        };
        Self::new(class, Some(sqlstate.to_string()), message)
    }

    /// Classify a Postgres error that names the violated constraint.
    ///
    /// Two sessions creating the same table at once can collide on the row
    /// type before the table itself, which surfaces as a unique violation on
    /// `pg_type`.
    pub fn postgres_constraint(
        sqlstate: &str,
        constraint: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        let mut err = Self::postgres(sqlstate, message);
        if sqlstate == "23505" && constraint == Some(PG_TYPE_NAME_INDEX) {
            err.class = ErrorClass::DuplicateTable;
        }
        err
    }

    pub fn is_missing_object(&self) -> bool {
        self.class == ErrorClass::MissingObject
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for DbError {}

impl From<tokio_postgres::Error> for DbError {
    fn from(err: tokio_postgres::Error) -> Self {
        match (err.code(), err.as_db_error()) {
            (Some(state), Some(db)) => {
                DbError::postgres_constraint(state.code(), db.constraint(), db.message())
            }
            (Some(state), None) => DbError::postgres(state.code(), err.to_string()),
            _ => DbError::other(err.to_string()),
        }
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err
            && let Some(my) = db.try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>()
        {
            return DbError::mysql(my.number(), my.message());
        }
        DbError::other(err.to_string())
    }
}

/// Unique index on `pg_type` (name, namespace).
const PG_TYPE_NAME_INDEX: &str = "pg_type_typname_nsp_index";

pub type Result<T, E = Error> = std::result::Result<T, E>;
