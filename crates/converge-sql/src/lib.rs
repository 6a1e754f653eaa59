//! SQL dialect helpers.
//!
//! Identifier quoting, literal escaping, generated names, and the type
//! normalizer that decides whether a declared column type matches what the
//! catalog reports.

use std::fmt;
use std::str::FromStr;

mod normalize;
pub use normalize::*;

/// The SQL flavour a database speaks.
///
/// Drives quoting, type canonicalization, catalog queries and DDL syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    MySql,
    Postgres,
}

impl Dialect {
    /// Guess the dialect from a connection URL scheme.
    ///
    /// # Examples
    ///
    /// ```
    /// use converge_sql::Dialect;
    /// assert_eq!(Dialect::from_url("mysql://root@localhost/app"), Some(Dialect::MySql));
    /// assert_eq!(Dialect::from_url("postgresql://localhost/app"), Some(Dialect::Postgres));
    /// assert_eq!(Dialect::from_url("sqlite::memory:"), None);
    /// ```
    pub fn from_url(url: &str) -> Option<Self> {
        let (scheme, _) = url.split_once("://")?;
        scheme.parse().ok()
    }

    pub fn name(self) -> &'static str {
        match self {
            Dialect::MySql => "mysql",
            Dialect::Postgres => "postgres",
        }
    }

    /// Wrap a name so that it displays as a quoted identifier for this dialect.
    pub fn ident<T: AsRef<str>>(self, name: T) -> Ident<T> {
        Ident {
            dialect: self,
            name,
        }
    }

    /// Wrap a value so that it displays as a string literal for this dialect.
    pub fn lit<T: AsRef<str>>(self, value: T) -> Lit<T> {
        Lit {
            dialect: self,
            value,
        }
    }

    /// Quote an identifier.
    ///
    /// Always quotes, so reserved words like `user`, `order` or `date` are
    /// safe as table and column names.
    pub fn quote_ident(self, name: &str) -> String {
        self.ident(name).to_string()
    }

    /// Quote and escape a string literal.
    pub fn quote_literal(self, value: &str) -> String {
        self.lit(value).to_string()
    }

    /// Whether `ADD COLUMN ... AFTER other` is understood.
    pub fn supports_column_position(self) -> bool {
        matches!(self, Dialect::MySql)
    }

    /// Longest identifier the server accepts, in bytes.
    pub fn max_identifier_len(self) -> usize {
        match self {
            Dialect::MySql => 64,
            Dialect::Postgres => 63,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown dialect name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownDialect(pub String);

impl fmt::Display for UnknownDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown SQL dialect `{}`", self.0)
    }
}

impl std::error::Error for UnknownDialect {}

impl FromStr for Dialect {
    type Err = UnknownDialect;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            _ => Err(UnknownDialect(s.to_string())),
        }
    }
}

/// An identifier wrapper.
///
/// Display writes the name quoted for its dialect: backticks for MySQL,
/// double quotes for Postgres. Embedded quote characters are doubled.
///
/// # Example
/// ```
/// use converge_sql::Dialect;
/// assert_eq!(Dialect::Postgres.ident("user").to_string(), "\"user\"");
/// assert_eq!(Dialect::MySql.ident("user").to_string(), "`user`");
/// assert_eq!(Dialect::MySql.ident("we`ird").to_string(), "`we``ird`");
/// ```
pub struct Ident<T: AsRef<str>> {
    pub dialect: Dialect,
    pub name: T,
}

impl<T: AsRef<str>> fmt::Display for Ident<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let quote = match self.dialect {
            Dialect::MySql => '`',
            Dialect::Postgres => '"',
        };
        write!(f, "{quote}")?;
        for c in self.name.as_ref().chars() {
            if c == quote {
                write!(f, "{quote}{quote}")?;
            } else {
                write!(f, "{c}")?;
            }
        }
        write!(f, "{quote}")
    }
}

/// A string literal wrapper.
///
/// Display writes the value quoted with single quotes. Single quotes are
/// doubled; MySQL additionally treats backslash as an escape character, so
/// backslashes are doubled there.
///
/// # Example
/// ```
/// use converge_sql::Dialect;
/// assert_eq!(Dialect::Postgres.lit("it's").to_string(), "'it''s'");
/// assert_eq!(Dialect::MySql.lit(r"C:\tmp").to_string(), r"'C:\\tmp'");
/// ```
pub struct Lit<T: AsRef<str>> {
    pub dialect: Dialect,
    pub value: T,
}

impl<T: AsRef<str>> fmt::Display for Lit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'")?;
        for c in self.value.as_ref().chars() {
            match c {
                '\'' => write!(f, "''")?,
                '\\' if self.dialect == Dialect::MySql => write!(f, "\\\\")?,
                c => write!(f, "{c}")?,
            }
        }
        write!(f, "'")
    }
}

/// Generate a standard index name for a table and columns.
///
/// Uses the convention `idx_{table}_{columns}` where columns are joined by underscore.
///
/// # Examples
///
/// ```
/// assert_eq!(converge_sql::index_name("users", &["role"]), "idx_users_role");
/// assert_eq!(
///     converge_sql::index_name("lessons", &["playlist_id", "recommend"]),
///     "idx_lessons_playlist_id_recommend"
/// );
/// ```
pub fn index_name(table: &str, columns: &[impl AsRef<str>]) -> String {
    let cols: Vec<&str> = columns.iter().map(|c| c.as_ref()).collect();
    format!("idx_{}_{}", table, cols.join("_"))
}

/// Generate a standard unique index name for a table and columns.
///
/// ```
/// assert_eq!(converge_sql::unique_index_name("users", &["email"]), "uq_users_email");
/// ```
pub fn unique_index_name(table: &str, columns: &[impl AsRef<str>]) -> String {
    let cols: Vec<&str> = columns.iter().map(|c| c.as_ref()).collect();
    format!("uq_{}_{}", table, cols.join("_"))
}

/// Generate a standard foreign key constraint name for a table and columns.
///
/// ```
/// assert_eq!(
///     converge_sql::foreign_key_name("charity_slides", &["charity_id"]),
///     "fk_charity_slides_charity_id"
/// );
/// ```
pub fn foreign_key_name(table: &str, columns: &[impl AsRef<str>]) -> String {
    let cols: Vec<&str> = columns.iter().map(|c| c.as_ref()).collect();
    format!("fk_{}_{}", table, cols.join("_"))
}

/// Fit a generated name into the dialect's identifier length limit.
///
/// Names that already fit are returned unchanged. Longer names are cut and
/// suffixed with a stable hash of the full name, so two long names that share
/// a prefix still end up distinct.
pub fn bounded_name(dialect: Dialect, name: &str) -> String {
    let max = dialect.max_identifier_len();
    if name.len() <= max {
        return name.to_string();
    }

    let hex = blake3::hash(name.as_bytes()).to_hex().to_string();
    let suffix = &hex[..16];

    // "_" between the kept prefix and the hash
    let mut len = max - suffix.len() - 1;
    while len > 0 && !name.is_char_boundary(len) {
        len -= 1;
    }

    format!("{}_{}", &name[..len], suffix)
}

/// Derive a 64-bit advisory lock key from a lock name.
///
/// Postgres advisory locks are keyed by `bigint`; the key is the first eight
/// bytes of the name's blake3 hash, so every process using the same name
/// contends for the same lock.
pub fn advisory_lock_key(name: &str) -> i64 {
    let hash = blake3::hash(name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    i64::from_be_bytes(bytes)
}
