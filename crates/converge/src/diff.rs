//! Schema differencing - compare a declaration against the live table.
//!
//! The diff only ever grows a table: missing columns are added, drifted
//! columns are modified, missing or mismatched indexes are (re)created.
//! Live columns and indexes that the declaration does not mention are left
//! alone, so `columns_to_drop` and `indexes_to_drop` are always empty.
//!
//! Column types are compared after dialect canonicalization (see
//! [`Dialect::canonical_type`]); defaults are only compared when the
//! declaration states one. Index columns are compared as sets, so
//! `(a, b)` and `(b, a)` are considered equal.

use converge_schema::{ColumnDefault, ColumnSpec, IndexSpec, LiveColumn, LiveTable, SchemaDeclaration};
use converge_sql::Dialect;
use std::collections::BTreeSet;
use std::fmt;

/// The difference between a declaration and the live table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Table name
    pub table: String,
    /// Declared columns missing from the live table, in declared order
    pub columns_to_add: Vec<ColumnSpec>,
    /// Declared columns whose live type, nullability or default drifted
    pub columns_to_modify: Vec<ColumnModification>,
    /// Never populated: columns are not dropped
    pub columns_to_drop: Vec<String>,
    /// Declared indexes that are missing or cover different columns
    pub indexes_to_add: Vec<IndexSpec>,
    /// Never populated: drops are implied by drop-then-add
    pub indexes_to_drop: Vec<String>,
}

/// A declared column together with how the live column differs from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnModification {
    pub column: ColumnSpec,
    pub drift: Vec<Drift>,
}

/// One aspect in which a live column differs from its declaration.
///
/// Values are canonical forms, which is what was compared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drift {
    Type { live: String, declared: String },
    Nullability { live: bool, declared: bool },
    Default {
        live: Option<String>,
        declared: Option<String>,
    },
}

impl ChangeSet {
    /// Whether the live table already matches the declaration.
    pub fn is_converged(&self) -> bool {
        self.columns_to_add.is_empty()
            && self.columns_to_modify.is_empty()
            && self.indexes_to_add.is_empty()
    }

    /// Count total number of changes.
    pub fn change_count(&self) -> usize {
        self.columns_to_add.len() + self.columns_to_modify.len() + self.indexes_to_add.len()
    }

    pub fn summary(&self) -> ChangeSummary {
        ChangeSummary {
            columns_added: self.columns_to_add.iter().map(|c| c.name.clone()).collect(),
            columns_modified: self
                .columns_to_modify
                .iter()
                .map(|m| m.column.name.clone())
                .collect(),
            indexes_added: self.indexes_to_add.iter().map(|i| i.name.clone()).collect(),
        }
    }
}

/// Names of everything a change-set touches, for reports and logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    pub columns_added: Vec<String>,
    pub columns_modified: Vec<String>,
    pub indexes_added: Vec<String>,
}

impl ChangeSummary {
    pub fn is_empty(&self) -> bool {
        self.columns_added.is_empty()
            && self.columns_modified.is_empty()
            && self.indexes_added.is_empty()
    }

    /// Fold another pass's summary into this one.
    pub fn merge(&mut self, other: ChangeSummary) {
        self.columns_added.extend(other.columns_added);
        self.columns_modified.extend(other.columns_modified);
        self.indexes_added.extend(other.indexes_added);
    }
}

/// Compute the change-set that brings `live` to `decl`.
pub fn diff(decl: &SchemaDeclaration, live: &LiveTable, dialect: Dialect) -> ChangeSet {
    let mut changes = ChangeSet {
        table: decl.table_name.clone(),
        ..Default::default()
    };

    for col in &decl.columns {
        match live.find_column(&col.name) {
            None => changes.columns_to_add.push(col.clone()),
            Some(current) => {
                let drift = column_drift(col, current, dialect);
                if !drift.is_empty() {
                    changes.columns_to_modify.push(ColumnModification {
                        column: col.clone(),
                        drift,
                    });
                }
            }
        }
    }

    let grouped = live.grouped_indexes();
    for idx in &decl.indexes {
        let matches = grouped.get(&idx.name).is_some_and(|current| {
            let declared: BTreeSet<&str> = idx.columns.iter().map(|c| c.as_str()).collect();
            let existing: BTreeSet<&str> = current.columns.iter().map(|c| c.as_str()).collect();
            declared == existing
        });
        if !matches {
            changes.indexes_to_add.push(idx.clone());
        }
    }

    changes
}

/// Live columns the declaration does not mention. They are never dropped.
pub fn undeclared_columns<'a>(decl: &SchemaDeclaration, live: &'a LiveTable) -> Vec<&'a str> {
    live.columns
        .iter()
        .filter(|c| decl.find_column(&c.name).is_none())
        .map(|c| c.name.as_str())
        .collect()
}

fn column_drift(col: &ColumnSpec, current: &LiveColumn, dialect: Dialect) -> Vec<Drift> {
    let mut drift = Vec::new();

    let declared_type = dialect.canonical_type(&col.declared_type);
    let live_type = dialect.canonical_type(&current.column_type);
    if declared_type != live_type {
        drift.push(Drift::Type {
            live: live_type,
            declared: declared_type,
        });
    }

    // A primary key is NOT NULL whatever the declaration says.
    let declared_nullable = col.nullable && !col.is_primary_key();
    if declared_nullable != current.nullable() {
        drift.push(Drift::Nullability {
            live: current.nullable(),
            declared: declared_nullable,
        });
    }

    if let Some(default) = &col.default {
        let declared = dialect.canonical_default(default.comparable());
        let live = dialect.canonical_default(current.default.as_deref());
        let same = match (default, &declared, &live) {
            (ColumnDefault::Expression(_), Some(d), Some(l)) => d.eq_ignore_ascii_case(l),
            _ => declared == live,
        };
        if !same {
            drift.push(Drift::Default { live, declared });
        }
    }

    drift
}

impl fmt::Display for Drift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn nullability(nullable: bool) -> &'static str {
            if nullable { "nullable" } else { "not null" }
        }
        match self {
            Drift::Type { live, declared } => write!(f, "type {live} -> {declared}"),
            Drift::Nullability { live, declared } => {
                write!(f, "{} -> {}", nullability(*live), nullability(*declared))
            }
            Drift::Default { live, declared } => write!(
                f,
                "default {} -> {}",
                live.as_deref().unwrap_or("(none)"),
                declared.as_deref().unwrap_or("(none)")
            ),
        }
    }
}

impl fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.table)?;
        for col in &self.columns_to_add {
            let nullable = if col.nullable { " (nullable)" } else { "" };
            writeln!(f, "  + {}: {}{}", col.name, col.declared_type, nullable)?;
        }
        for m in &self.columns_to_modify {
            let drift: Vec<String> = m.drift.iter().map(|d| d.to_string()).collect();
            writeln!(f, "  ~ {}: {}", m.column.name, drift.join(", "))?;
        }
        for idx in &self.indexes_to_add {
            let kind = match idx.references() {
                Some(r) => format!("FOREIGN KEY -> {}({})", r.table, r.columns.join(", ")),
                None if idx.is_unique() => "UNIQUE INDEX".to_string(),
                None => "INDEX".to_string(),
            };
            writeln!(f, "  + {} {} ({})", kind, idx.name, idx.columns.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_schema::{LiveIndexKind, LiveIndexRow};

    fn live_col(name: &str, ty: &str, nullable: bool, default: Option<&str>) -> LiveColumn {
        LiveColumn {
            name: name.into(),
            column_type: ty.into(),
            is_nullable: if nullable { "YES" } else { "NO" }.into(),
            default: default.map(|d| d.to_string()),
            key: String::new(),
            extra: String::new(),
        }
    }

    fn index_row(index: &str, column: &str, seq: u32) -> LiveIndexRow {
        LiveIndexRow {
            index_name: index.into(),
            column_name: column.into(),
            seq,
            kind: LiveIndexKind::Index,
        }
    }

    #[test]
    fn test_absent_table_adds_everything() {
        let decl = SchemaDeclaration::new("tags")
            .column(ColumnSpec::new("label", "VARCHAR(50)").not_null())
            .index(IndexSpec::unique("uq_label", &["label"]));

        let changes = diff(&decl, &LiveTable::default(), Dialect::MySql);
        assert_eq!(changes.columns_to_add.len(), 1);
        assert_eq!(changes.indexes_to_add.len(), 1);
        assert!(changes.columns_to_drop.is_empty());
        assert!(changes.indexes_to_drop.is_empty());
    }

    #[test]
    fn test_matching_table_is_converged() {
        let decl = SchemaDeclaration::new("lessons")
            .column(ColumnSpec::new("recommend", "BOOLEAN").not_null().default_value("false"))
            .column(ColumnSpec::new("size", "VARCHAR(50)").not_null())
            .column(ColumnSpec::new("price", "DECIMAL(15, 2)").not_null().default_value("0"))
            .index(IndexSpec::index("idx_recommend", &["recommend"]));
        let live = LiveTable {
            columns: vec![
                live_col("recommend", "tinyint(1)", false, Some("0")),
                live_col("size", "varchar(50)", false, None),
                live_col("price", "decimal(15,2)", false, Some("0.00")),
            ],
            indexes: vec![index_row("idx_recommend", "recommend", 1)],
        };

        let changes = diff(&decl, &live, Dialect::MySql);
        assert!(changes.is_converged(), "{changes}");
    }

    #[test]
    fn test_type_drift() {
        let decl = SchemaDeclaration::new("users")
            .column(ColumnSpec::new("avatar", "VARCHAR(500)"));
        let live = LiveTable {
            columns: vec![live_col("avatar", "varchar(255)", true, None)],
            indexes: vec![],
        };

        let changes = diff(&decl, &live, Dialect::MySql);
        assert_eq!(
            changes.columns_to_modify[0].drift,
            vec![Drift::Type {
                live: "varchar(255)".into(),
                declared: "varchar(500)".into(),
            }]
        );
    }

    #[test]
    fn test_undeclared_default_is_not_compared() {
        let decl = SchemaDeclaration::new("users")
            .column(ColumnSpec::new("role", "VARCHAR(20)").not_null());
        let live = LiveTable {
            columns: vec![live_col("role", "varchar(20)", false, Some("guest"))],
            indexes: vec![],
        };
        assert!(diff(&decl, &live, Dialect::MySql).is_converged());
    }

    #[test]
    fn test_explicit_null_default_matches_missing_default() {
        let decl = SchemaDeclaration::new("charities")
            .column(ColumnSpec::new("endDate", "TIMESTAMP").default_null());
        let live = LiveTable {
            columns: vec![live_col("endDate", "timestamp", true, None)],
            indexes: vec![],
        };
        assert!(diff(&decl, &live, Dialect::MySql).is_converged());
    }

    #[test]
    fn test_default_drift() {
        let decl = SchemaDeclaration::new("users")
            .column(ColumnSpec::new("role", "VARCHAR(20)").not_null().default_value("member"));
        let live = LiveTable {
            columns: vec![live_col("role", "character varying(20)", false, Some("'guest'::character varying"))],
            indexes: vec![],
        };

        let changes = diff(&decl, &live, Dialect::Postgres);
        assert_eq!(
            changes.columns_to_modify[0].drift,
            vec![Drift::Default {
                live: Some("guest".into()),
                declared: Some("member".into()),
            }]
        );
    }

    #[test]
    fn test_expression_defaults_compare_case_insensitively() {
        let decl = SchemaDeclaration::new("tokens")
            .column(ColumnSpec::new("token", "CHAR(36)").not_null().default_expr("(UUID())"));
        let live = LiveTable {
            columns: vec![live_col("token", "char(36)", false, Some("uuid()"))],
            indexes: vec![],
        };
        assert!(diff(&decl, &live, Dialect::MySql).is_converged());
    }

    #[test]
    fn test_primary_key_nullability_is_implied() {
        let decl = SchemaDeclaration::new("widgets")
            .column(ColumnSpec::new("id", "INT AUTO_INCREMENT PRIMARY KEY"));
        let mut id = live_col("id", "int(11)", false, None);
        id.key = "PRI".into();
        let live = LiveTable {
            columns: vec![id],
            indexes: vec![],
        };
        assert!(diff(&decl, &live, Dialect::MySql).is_converged());
    }

    #[test]
    fn test_undeclared_live_columns_are_kept() {
        let decl = SchemaDeclaration::new("users").column(ColumnSpec::new("email", "TEXT"));
        let live = LiveTable {
            columns: vec![
                live_col("email", "text", true, None),
                live_col("legacy_flag", "tinyint(1)", true, None),
            ],
            indexes: vec![],
        };

        let changes = diff(&decl, &live, Dialect::MySql);
        assert!(changes.is_converged());
        assert!(changes.columns_to_drop.is_empty());
        assert_eq!(undeclared_columns(&decl, &live), vec!["legacy_flag"]);
    }

    #[test]
    fn test_index_columns_compared_as_sets() {
        let decl = SchemaDeclaration::new("t")
            .column(ColumnSpec::new("a", "INT"))
            .column(ColumnSpec::new("b", "INT"))
            .index(IndexSpec::index("idx_ab", &["a", "b"]))
            .index(IndexSpec::index("idx_b", &["b"]));
        let live = LiveTable {
            columns: vec![live_col("a", "int", true, None), live_col("b", "int", true, None)],
            indexes: vec![
                index_row("idx_ab", "b", 1),
                index_row("idx_ab", "a", 2),
                index_row("idx_b", "a", 1),
            ],
        };

        let changes = diff(&decl, &live, Dialect::MySql);
        let names: Vec<&str> = changes.indexes_to_add.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["idx_b"]);
    }

    #[test]
    fn test_foreign_key_found_by_constraint_rows() {
        let decl = SchemaDeclaration::new("lessons")
            .column(ColumnSpec::new("playlist_id", "INT").not_null())
            .index(IndexSpec::foreign_key("fk_lesson_playlist", "playlist_id", "lesson_playlists", "id"));
        let live = LiveTable {
            columns: vec![live_col("playlist_id", "int", false, None)],
            indexes: vec![LiveIndexRow {
                index_name: "fk_lesson_playlist".into(),
                column_name: "playlist_id".into(),
                seq: 1,
                kind: LiveIndexKind::ForeignKey,
            }],
        };
        assert!(diff(&decl, &live, Dialect::MySql).is_converged());
    }

    #[test]
    fn snapshot_change_set_display() {
        let decl = SchemaDeclaration::new("widgets")
            .column(ColumnSpec::new("id", "INT AUTO_INCREMENT PRIMARY KEY"))
            .column(ColumnSpec::new("name", "VARCHAR(255)").not_null())
            .column(ColumnSpec::new("color", "VARCHAR(50)").default_null())
            .index(IndexSpec::index("idx_color", &["color"]))
            .index(IndexSpec::foreign_key("fk_owner", "name", "owners", "name"));
        let mut id = live_col("id", "int(11)", false, None);
        id.key = "PRI".into();
        let live = LiveTable {
            columns: vec![id, live_col("name", "varchar(100)", true, None)],
            indexes: vec![],
        };

        let changes = diff(&decl, &live, Dialect::MySql);
        assert_eq!(changes.change_count(), 4);
        insta::assert_snapshot!(changes.to_string(), @r"
        widgets:
          + color: VARCHAR(50) (nullable)
          ~ name: type varchar(100) -> varchar(255), nullable -> not null
          + INDEX idx_color (color)
          + FOREIGN KEY -> owners(name) fk_owner (name)
        ");
    }
}
