//! Schema declaration and live structure types for converge.
//!
//! A [`SchemaDeclaration`] is the desired shape of one table, authored as
//! plain data. A [`LiveTable`] is what the database catalog currently reports
//! for the same table. The engine compares the two and emits DDL; the types in
//! this crate carry no behavior beyond construction, lookup and validation.

use converge_sql::{Dialect, is_primary_key_type};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::fmt;

/// A declared default value.
///
/// A column whose `default` is `None` does not care what default the live
/// column has; the differencer only compares defaults that are declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnDefault {
    /// `DEFAULT NULL`
    Null,
    /// A literal or keyword, quoted or left bare depending on the column type
    /// (`'member'`, `0`, `CURRENT_TIMESTAMP`).
    Value(String),
    /// A SQL expression rendered verbatim.
    Expression(String),
}

impl ColumnDefault {
    /// The raw text to compare against the catalog's default, if any.
    pub fn comparable(&self) -> Option<&str> {
        match self {
            ColumnDefault::Null => None,
            ColumnDefault::Value(v) | ColumnDefault::Expression(v) => Some(v),
        }
    }

    /// Render the value for a `DEFAULT` clause on a column of `declared_type`.
    ///
    /// `NULL` and `CURRENT_TIMESTAMP` are always bare; numeric and boolean
    /// columns take bare values; everything else is a quoted literal.
    pub fn to_sql(&self, dialect: Dialect, declared_type: &str) -> String {
        match self {
            ColumnDefault::Null => "NULL".to_string(),
            ColumnDefault::Expression(expr) => expr.clone(),
            ColumnDefault::Value(v) => {
                if v.eq_ignore_ascii_case("null") || v.eq_ignore_ascii_case("current_timestamp") {
                    v.to_uppercase()
                } else if converge_sql::takes_bare_default(declared_type) {
                    v.clone()
                } else {
                    dialect.quote_literal(v)
                }
            }
        }
    }
}

/// The declared shape of one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Column name
    pub name: String,
    /// Type as written in DDL, e.g. `VARCHAR(500)` or `INT AUTO_INCREMENT PRIMARY KEY`
    pub declared_type: String,
    /// Whether the column allows NULL
    pub nullable: bool,
    /// Declared default, `None` when the default is not managed
    pub default: Option<ColumnDefault>,
    /// Extra clause appended verbatim (`ON UPDATE CURRENT_TIMESTAMP`, `COMMENT '...'`)
    pub extra: Option<String>,
    /// Column a newly added column is placed after, where the dialect supports it
    pub after: Option<String>,
}

impl ColumnSpec {
    /// A nullable column with no managed default.
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
            nullable: true,
            default: None,
            extra: None,
            after: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(ColumnDefault::Value(value.into()));
        self
    }

    pub fn default_null(mut self) -> Self {
        self.default = Some(ColumnDefault::Null);
        self
    }

    pub fn default_expr(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(ColumnDefault::Expression(expr.into()));
        self
    }

    pub fn extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = Some(extra.into());
        self
    }

    pub fn after(mut self, column: impl Into<String>) -> Self {
        self.after = Some(column.into());
        self
    }

    /// Whether the declared type carries `PRIMARY KEY`.
    pub fn is_primary_key(&self) -> bool {
        is_primary_key_type(&self.declared_type)
    }

    /// Nullability spelled the way `INFORMATION_SCHEMA.COLUMNS.IS_NULLABLE` spells it.
    pub fn is_nullable(&self) -> &'static str {
        if self.nullable { "YES" } else { "NO" }
    }
}

/// Action taken on referencing rows when the referenced row changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferentialAction {
    Cascade,
    SetNull,
    SetDefault,
    Restrict,
    NoAction,
}

impl ReferentialAction {
    pub fn to_sql(self) -> &'static str {
        match self {
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::NoAction => "NO ACTION",
        }
    }
}

impl fmt::Display for ReferentialAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_sql())
    }
}

/// The target of a foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForeignKeyRef {
    /// Referenced table
    pub table: String,
    /// Referenced column(s), positionally matching the local columns
    pub columns: Vec<String>,
}

/// What kind of index or constraint an [`IndexSpec`] declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexKind {
    Index,
    Unique,
    ForeignKey {
        references: ForeignKeyRef,
        on_delete: Option<ReferentialAction>,
        on_update: Option<ReferentialAction>,
    },
}

/// A declared index, unique index, or foreign key constraint.
///
/// The name is the idempotency key: the generator drops whatever has this
/// name before adding the declared version, so it must be stable across runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Index or constraint name
    pub name: String,
    pub kind: IndexKind,
    /// Local column(s), in index order
    pub columns: Vec<String>,
}

impl IndexSpec {
    pub fn index(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            kind: IndexKind::Index,
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn unique(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            kind: IndexKind::Unique,
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// A single-column foreign key `column -> table(references_column)`.
    pub fn foreign_key(
        name: impl Into<String>,
        column: &str,
        table: impl Into<String>,
        references_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: IndexKind::ForeignKey {
                references: ForeignKeyRef {
                    table: table.into(),
                    columns: vec![references_column.into()],
                },
                on_delete: None,
                on_update: None,
            },
            columns: vec![column.to_string()],
        }
    }

    /// Set `ON DELETE`. No effect on plain indexes.
    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        if let IndexKind::ForeignKey { on_delete, .. } = &mut self.kind {
            *on_delete = Some(action);
        }
        self
    }

    /// Set `ON UPDATE`. No effect on plain indexes.
    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        if let IndexKind::ForeignKey { on_update, .. } = &mut self.kind {
            *on_update = Some(action);
        }
        self
    }

    pub fn is_unique(&self) -> bool {
        matches!(self.kind, IndexKind::Unique)
    }

    /// The referenced table and columns, for foreign keys.
    pub fn references(&self) -> Option<&ForeignKeyRef> {
        match &self.kind {
            IndexKind::ForeignKey { references, .. } => Some(references),
            _ => None,
        }
    }
}

/// A problem found while validating a [`SchemaDeclaration`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeclarationProblem {
    #[error("table name is empty")]
    EmptyTableName,

    #[error("table declares no columns")]
    NoColumns,

    #[error("column `{0}` has an empty type")]
    EmptyColumnType(String),

    #[error("column `{0}` is declared more than once")]
    DuplicateColumn(String),

    #[error("more than one primary key column: {}", .0.join(", "))]
    MultiplePrimaryKeys(Vec<String>),

    #[error("index `{0}` is declared more than once")]
    DuplicateIndex(String),

    #[error("index `{0}` has no columns")]
    EmptyIndex(String),

    #[error("index `{index}` refers to unknown column `{column}`")]
    UnknownIndexColumn { index: String, column: String },

    #[error("foreign key `{index}` has {local} local column(s) but references {referenced}")]
    ForeignKeyArity {
        index: String,
        local: usize,
        referenced: usize,
    },
}

/// The desired shape of one table.
///
/// Produced by a pure function per entity and never mutated at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDeclaration {
    /// Table name
    pub table_name: String,
    /// Columns, in declared order
    pub columns: Vec<ColumnSpec>,
    /// Indexes and constraints, in declared order
    pub indexes: Vec<IndexSpec>,
}

impl SchemaDeclaration {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    /// Look up a declared column by name.
    pub fn find_column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// The column whose declared type carries `PRIMARY KEY`.
    pub fn primary_key(&self) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.is_primary_key())
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = (&IndexSpec, &ForeignKeyRef)> {
        self.indexes
            .iter()
            .filter_map(|idx| idx.references().map(|r| (idx, r)))
    }

    /// Tables this one references, deduplicated, in declaration order.
    pub fn referenced_tables(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.foreign_keys()
            .map(|(_, r)| r.table.as_str())
            .filter(|t| seen.insert(*t))
            .collect()
    }

    /// Check the declaration's internal consistency.
    ///
    /// Returns every problem found rather than stopping at the first.
    pub fn validate(&self) -> Result<(), Vec<DeclarationProblem>> {
        let mut problems = Vec::new();

        if self.table_name.trim().is_empty() {
            problems.push(DeclarationProblem::EmptyTableName);
        }
        if self.columns.is_empty() {
            problems.push(DeclarationProblem::NoColumns);
        }

        let mut column_names = HashSet::new();
        for col in &self.columns {
            if col.declared_type.trim().is_empty() {
                problems.push(DeclarationProblem::EmptyColumnType(col.name.clone()));
            }
            if !column_names.insert(col.name.as_str()) {
                problems.push(DeclarationProblem::DuplicateColumn(col.name.clone()));
            }
        }

        let pks: Vec<String> = self
            .columns
            .iter()
            .filter(|c| c.is_primary_key())
            .map(|c| c.name.clone())
            .collect();
        if pks.len() > 1 {
            problems.push(DeclarationProblem::MultiplePrimaryKeys(pks));
        }

        let mut index_names = HashSet::new();
        for idx in &self.indexes {
            if !index_names.insert(idx.name.as_str()) {
                problems.push(DeclarationProblem::DuplicateIndex(idx.name.clone()));
            }
            if idx.columns.is_empty() {
                problems.push(DeclarationProblem::EmptyIndex(idx.name.clone()));
            }
            for col in &idx.columns {
                if !column_names.contains(col.as_str()) {
                    problems.push(DeclarationProblem::UnknownIndexColumn {
                        index: idx.name.clone(),
                        column: col.clone(),
                    });
                }
            }
            if let Some(r) = idx.references()
                && r.columns.len() != idx.columns.len()
            {
                problems.push(DeclarationProblem::ForeignKeyArity {
                    index: idx.name.clone(),
                    local: idx.columns.len(),
                    referenced: r.columns.len(),
                });
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

/// One column as reported by the catalog.
///
/// Field spellings follow `INFORMATION_SCHEMA.COLUMNS`; the Postgres
/// introspector maps its catalog onto the same shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveColumn {
    /// Column name
    pub name: String,
    /// Full column type, e.g. `varchar(255)` or `character varying(255)`
    pub column_type: String,
    /// `"YES"` or `"NO"`
    pub is_nullable: String,
    /// Default as the catalog reports it
    pub default: Option<String>,
    /// `"PRI"` for primary key columns
    pub key: String,
    /// Extra attributes (`auto_increment`, `on update CURRENT_TIMESTAMP`)
    pub extra: String,
}

impl LiveColumn {
    pub fn nullable(&self) -> bool {
        self.is_nullable.eq_ignore_ascii_case("YES")
    }

    pub fn is_primary_key(&self) -> bool {
        self.key == "PRI"
    }
}

/// What kind of index a live index row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LiveIndexKind {
    Primary,
    Unique,
    Index,
    ForeignKey,
}

/// One (index, column) pair as reported by the catalog.
///
/// A multi-column index appears as several rows sharing `index_name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveIndexRow {
    /// Index or constraint name
    pub index_name: String,
    /// Column at position `seq`
    pub column_name: String,
    /// 1-based position within the index
    pub seq: u32,
    pub kind: LiveIndexKind,
}

/// An index reassembled from its rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveIndex {
    pub name: String,
    pub kind: LiveIndexKind,
    /// Columns in index order
    pub columns: Vec<String>,
}

/// The live structure of one table.
///
/// A table that does not exist has no columns and no indexes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveTable {
    pub columns: Vec<LiveColumn>,
    pub indexes: Vec<LiveIndexRow>,
}

impl LiveTable {
    /// Whether the table is missing from the database.
    pub fn is_absent(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn find_column(&self, name: &str) -> Option<&LiveColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Group index rows by name.
    pub fn grouped_indexes(&self) -> IndexMap<String, LiveIndex> {
        group_index_rows(&self.indexes)
    }
}

/// Group index rows by index name.
///
/// Groups keep the order in which names first appear; columns within a group
/// are ordered by `seq`. When an index and a foreign key share a name (MySQL
/// backs every foreign key with an index of the same name), the group is
/// reported as the foreign key.
pub fn group_index_rows(rows: &[LiveIndexRow]) -> IndexMap<String, LiveIndex> {
    let mut grouped: IndexMap<String, (LiveIndexKind, Vec<(u32, String)>)> = IndexMap::new();

    for row in rows {
        let entry = grouped
            .entry(row.index_name.clone())
            .or_insert_with(|| (row.kind, Vec::new()));
        if row.kind == LiveIndexKind::ForeignKey {
            entry.0 = LiveIndexKind::ForeignKey;
        }
        if !entry.1.iter().any(|(seq, col)| *seq == row.seq && *col == row.column_name) {
            entry.1.push((row.seq, row.column_name.clone()));
        }
    }

    grouped
        .into_iter()
        .map(|(name, (kind, mut cols))| {
            cols.sort_by_key(|(seq, _)| *seq);
            let index = LiveIndex {
                name: name.clone(),
                kind,
                columns: cols.into_iter().map(|(_, c)| c).collect(),
            };
            (name, index)
        })
        .collect()
}
