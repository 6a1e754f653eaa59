//! DDL statement generation.
//!
//! Turns a [`ChangeSet`] into an ordered list of [`Statement`]s: column
//! additions first, then column modifications, then every index or constraint
//! as a drop of the same name (allowed to fail) followed by the add.
//!
//! ## Example
//!
//! ```text
//! ALTER TABLE `widgets` ADD COLUMN `color` VARCHAR(50) DEFAULT NULL;
//! ALTER TABLE `widgets` MODIFY COLUMN `name` VARCHAR(255) NOT NULL;
//! ALTER TABLE `widgets` DROP INDEX `idx_color`;            -- may fail
//! ALTER TABLE `widgets` ADD INDEX `idx_color` (`color`);
//! ```

use crate::diff::{ChangeSet, ColumnModification, Drift};
use converge_schema::{ColumnSpec, IndexKind, IndexSpec, SchemaDeclaration};
use converge_sql::Dialect;
use std::fmt;

/// What a statement does, in structured form.
///
/// Backends that do not speak SQL (the in-memory catalog) apply this instead
/// of parsing the statement text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    CreateTable(SchemaDeclaration),
    AddColumn(ColumnSpec),
    ModifyColumn(ColumnModification),
    DropIndex(String),
    DropForeignKey(String),
    AddIndex(IndexSpec),
}

/// One DDL statement, ready to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    /// Table the statement applies to
    pub table: String,
    pub sql: String,
    /// Failure is expected in some states and must not be reported
    pub ignore_failure: bool,
    pub op: Operation,
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};", self.sql)
    }
}

/// Render `CREATE TABLE IF NOT EXISTS` for a declaration.
///
/// MySQL gets every index and foreign key inline. Postgres gets the foreign
/// keys inline; its plain and unique indexes are created by the reconcile pass
/// that follows creation.
pub fn create_table(decl: &SchemaDeclaration, dialect: Dialect) -> Statement {
    let q = |name: &str| dialect.quote_ident(name);
    let indent = match dialect {
        Dialect::MySql => "  ",
        Dialect::Postgres => "    ",
    };

    let mut parts: Vec<String> = decl
        .columns
        .iter()
        .map(|col| format!("{indent}{}", column_definition(col, dialect)))
        .collect();

    for idx in &decl.indexes {
        let cols = quoted_list(dialect, &idx.columns);
        match &idx.kind {
            IndexKind::Index if dialect == Dialect::MySql => {
                parts.push(format!("{indent}INDEX {} ({cols})", q(&idx.name)));
            }
            IndexKind::Unique if dialect == Dialect::MySql => {
                parts.push(format!("{indent}UNIQUE INDEX {} ({cols})", q(&idx.name)));
            }
            IndexKind::Index | IndexKind::Unique => {}
            IndexKind::ForeignKey { .. } => {
                parts.push(format!("{indent}{}", constraint_definition(idx, dialect)));
            }
        }
    }

    let mut sql = format!("CREATE TABLE IF NOT EXISTS {} (\n", q(&decl.table_name));
    sql.push_str(&parts.join(",\n"));
    sql.push_str("\n)");
    if dialect == Dialect::MySql {
        sql.push_str(" ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci");
    }

    Statement {
        table: decl.table_name.clone(),
        sql,
        ignore_failure: false,
        op: Operation::CreateTable(decl.clone()),
    }
}

/// Generate the statements that apply a change-set, in execution order.
pub fn generate(changes: &ChangeSet, decl: &SchemaDeclaration, dialect: Dialect) -> Vec<Statement> {
    let table = decl.table_name.as_str();
    let mut statements = Vec::new();

    for col in &changes.columns_to_add {
        if col.is_primary_key() {
            continue;
        }
        statements.push(add_column(table, col, dialect));
    }

    for modification in &changes.columns_to_modify {
        if is_primary_key_column(&modification.column) {
            continue;
        }
        statements.push(modify_column(table, modification, dialect));
    }

    for idx in &changes.indexes_to_add {
        if is_primary_index(table, &idx.name) {
            continue;
        }
        statements.extend(replace_index(table, idx, dialect));
    }

    statements
}

/// Columns that are never added or modified: the primary key (by type) and
/// any column named `id`.
fn is_primary_key_column(col: &ColumnSpec) -> bool {
    col.is_primary_key() || col.name == "id"
}

fn is_primary_index(table: &str, name: &str) -> bool {
    name.eq_ignore_ascii_case("primary") || name == format!("{table}_pkey")
}

/// `name type [NOT NULL] [DEFAULT x] [extra]`
pub fn column_definition(col: &ColumnSpec, dialect: Dialect) -> String {
    let mut def = format!("{} {}", dialect.quote_ident(&col.name), col.declared_type);
    if !col.nullable {
        def.push_str(" NOT NULL");
    }
    if let Some(default) = &col.default {
        def.push_str(" DEFAULT ");
        def.push_str(&default.to_sql(dialect, &col.declared_type));
    }
    if let Some(extra) = &col.extra {
        def.push(' ');
        def.push_str(extra);
    }
    def
}

fn add_column(table: &str, col: &ColumnSpec, dialect: Dialect) -> Statement {
    let mut sql = format!(
        "ALTER TABLE {} ADD COLUMN {}",
        dialect.quote_ident(table),
        column_definition(col, dialect)
    );
    if let Some(after) = &col.after
        && dialect.supports_column_position()
    {
        sql.push_str(" AFTER ");
        sql.push_str(&dialect.quote_ident(after));
    }

    Statement {
        table: table.to_string(),
        sql,
        ignore_failure: false,
        op: Operation::AddColumn(col.clone()),
    }
}

fn modify_column(table: &str, modification: &ColumnModification, dialect: Dialect) -> Statement {
    let col = &modification.column;
    let sql = match dialect {
        Dialect::MySql => format!(
            "ALTER TABLE {} MODIFY COLUMN {}",
            dialect.quote_ident(table),
            column_definition(col, dialect)
        ),
        Dialect::Postgres => {
            let name = dialect.quote_ident(&col.name);
            let touches = |f: fn(&Drift) -> bool| {
                modification.drift.is_empty() || modification.drift.iter().any(f)
            };

            let mut actions = Vec::new();
            if touches(|d| matches!(d, Drift::Type { .. })) {
                actions.push(format!(
                    "ALTER COLUMN {name} TYPE {ty} USING {name}::{ty}",
                    ty = col.declared_type
                ));
            }
            if touches(|d| matches!(d, Drift::Nullability { .. })) {
                let action = if col.nullable { "DROP NOT NULL" } else { "SET NOT NULL" };
                actions.push(format!("ALTER COLUMN {name} {action}"));
            }
            if touches(|d| matches!(d, Drift::Default { .. })) {
                match &col.default {
                    Some(default) => actions.push(format!(
                        "ALTER COLUMN {name} SET DEFAULT {}",
                        default.to_sql(dialect, &col.declared_type)
                    )),
                    None => actions.push(format!("ALTER COLUMN {name} DROP DEFAULT")),
                }
            }

            format!(
                "ALTER TABLE {} {}",
                dialect.quote_ident(table),
                actions.join(", ")
            )
        }
    };

    Statement {
        table: table.to_string(),
        sql,
        ignore_failure: false,
        op: Operation::ModifyColumn(modification.clone()),
    }
}

/// Drop whatever carries the index's name, then add the declared version.
fn replace_index(table: &str, idx: &IndexSpec, dialect: Dialect) -> Vec<Statement> {
    let t = dialect.quote_ident(table);
    let n = dialect.quote_ident(&idx.name);
    let stmt = |sql: String, ignore_failure: bool, op: Operation| Statement {
        table: table.to_string(),
        sql,
        ignore_failure,
        op,
    };
    let drop_index = |sql: String| stmt(sql, true, Operation::DropIndex(idx.name.clone()));
    let drop_fk = |sql: String| stmt(sql, true, Operation::DropForeignKey(idx.name.clone()));
    let add = |sql: String| stmt(sql, false, Operation::AddIndex(idx.clone()));

    let cols = quoted_list(dialect, &idx.columns);
    match (dialect, &idx.kind) {
        (Dialect::MySql, IndexKind::ForeignKey { .. }) => vec![
            drop_fk(format!("ALTER TABLE {t} DROP FOREIGN KEY {n}")),
            // the backing index MySQL created alongside the constraint
            drop_index(format!("ALTER TABLE {t} DROP INDEX {n}")),
            add(format!("ALTER TABLE {t} ADD {}", constraint_definition(idx, dialect))),
        ],
        (Dialect::MySql, kind) => {
            let unique = if matches!(kind, IndexKind::Unique) { "UNIQUE " } else { "" };
            vec![
                drop_index(format!("ALTER TABLE {t} DROP INDEX {n}")),
                add(format!("ALTER TABLE {t} ADD {unique}INDEX {n} ({cols})")),
            ]
        }
        (Dialect::Postgres, IndexKind::ForeignKey { .. }) => vec![
            drop_fk(format!("ALTER TABLE {t} DROP CONSTRAINT {n}")),
            add(format!("ALTER TABLE {t} ADD {}", constraint_definition(idx, dialect))),
        ],
        (Dialect::Postgres, kind) => {
            let unique = if matches!(kind, IndexKind::Unique) { "UNIQUE " } else { "" };
            vec![
                drop_index(format!("DROP INDEX {n}")),
                add(format!("CREATE {unique}INDEX {n} ON {t} ({cols})")),
            ]
        }
    }
}

/// `CONSTRAINT name FOREIGN KEY (cols) REFERENCES table (cols) [ON DELETE ..] [ON UPDATE ..]`
fn constraint_definition(idx: &IndexSpec, dialect: Dialect) -> String {
    let IndexKind::ForeignKey {
        references,
        on_delete,
        on_update,
    } = &idx.kind
    else {
        return String::new();
    };

    let mut def = format!(
        "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
        dialect.quote_ident(&idx.name),
        quoted_list(dialect, &idx.columns),
        dialect.quote_ident(&references.table),
        quoted_list(dialect, &references.columns),
    );
    if let Some(action) = on_delete {
        def.push_str(&format!(" ON DELETE {action}"));
    }
    if let Some(action) = on_update {
        def.push_str(&format!(" ON UPDATE {action}"));
    }
    def
}

fn quoted_list(dialect: Dialect, names: &[String]) -> String {
    names
        .iter()
        .map(|n| dialect.quote_ident(n))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff;
    use converge_schema::{LiveColumn, LiveTable, ReferentialAction};

    fn widgets() -> SchemaDeclaration {
        SchemaDeclaration::new("widgets")
            .column(ColumnSpec::new("id", "INT AUTO_INCREMENT PRIMARY KEY"))
            .column(ColumnSpec::new("name", "VARCHAR(255)").not_null())
            .column(ColumnSpec::new("color", "VARCHAR(50)").default_null())
            .index(IndexSpec::index("idx_color", &["color"]))
    }

    fn live(name: &str, ty: &str, nullable: &str, key: &str) -> LiveColumn {
        LiveColumn {
            name: name.into(),
            column_type: ty.into(),
            is_nullable: nullable.into(),
            default: None,
            key: key.into(),
            extra: String::new(),
        }
    }

    fn sql(statements: &[Statement]) -> String {
        statements
            .iter()
            .map(|s| {
                let marker = if s.ignore_failure { "  -- may fail" } else { "" };
                format!("{s}{marker}")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn snapshot_widget_reconcile_mysql() {
        let decl = widgets();
        let current = LiveTable {
            columns: vec![
                live("id", "int(11)", "NO", "PRI"),
                live("name", "varchar(100)", "YES", ""),
            ],
            indexes: vec![],
        };

        let changes = diff(&decl, &current, Dialect::MySql);
        let statements = generate(&changes, &decl, Dialect::MySql);
        insta::assert_snapshot!(sql(&statements), @r"
        ALTER TABLE `widgets` ADD COLUMN `color` VARCHAR(50) DEFAULT NULL;
        ALTER TABLE `widgets` MODIFY COLUMN `name` VARCHAR(255) NOT NULL;
        ALTER TABLE `widgets` DROP INDEX `idx_color`;  -- may fail
        ALTER TABLE `widgets` ADD INDEX `idx_color` (`color`);
        ");
    }

    #[test]
    fn snapshot_widget_reconcile_postgres() {
        let decl = SchemaDeclaration::new("widgets")
            .column(ColumnSpec::new("id", "SERIAL PRIMARY KEY"))
            .column(ColumnSpec::new("name", "VARCHAR(255)").not_null())
            .column(ColumnSpec::new("color", "VARCHAR(50)").default_null())
            .index(IndexSpec::index("widgets_idx_color", &["color"]));
        let current = LiveTable {
            columns: vec![
                live("id", "integer", "NO", "PRI"),
                live("name", "character varying(100)", "YES", ""),
            ],
            indexes: vec![],
        };

        let changes = diff(&decl, &current, Dialect::Postgres);
        let statements = generate(&changes, &decl, Dialect::Postgres);
        insta::assert_snapshot!(sql(&statements), @r#"
        ALTER TABLE "widgets" ADD COLUMN "color" VARCHAR(50) DEFAULT NULL;
        ALTER TABLE "widgets" ALTER COLUMN "name" TYPE VARCHAR(255) USING "name"::VARCHAR(255), ALTER COLUMN "name" SET NOT NULL;
        DROP INDEX "widgets_idx_color";  -- may fail
        CREATE INDEX "widgets_idx_color" ON "widgets" ("color");
        "#);
    }

    #[test]
    fn snapshot_create_table_mysql() {
        let decl = SchemaDeclaration::new("charity_slides")
            .column(ColumnSpec::new("id", "INT AUTO_INCREMENT PRIMARY KEY"))
            .column(ColumnSpec::new("charity_id", "INT").not_null())
            .column(ColumnSpec::new("display_order", "INT").not_null().default_value("0"))
            .column(
                ColumnSpec::new("updatedAt", "TIMESTAMP")
                    .not_null()
                    .default_value("CURRENT_TIMESTAMP")
                    .extra("ON UPDATE CURRENT_TIMESTAMP"),
            )
            .index(IndexSpec::index("idx_charity_id", &["charity_id"]))
            .index(
                IndexSpec::foreign_key("fk_charity_slide_charity", "charity_id", "charities", "id")
                    .on_delete(ReferentialAction::Cascade)
                    .on_update(ReferentialAction::Cascade),
            );

        insta::assert_snapshot!(create_table(&decl, Dialect::MySql).to_string(), @r"
        CREATE TABLE IF NOT EXISTS `charity_slides` (
          `id` INT AUTO_INCREMENT PRIMARY KEY,
          `charity_id` INT NOT NULL,
          `display_order` INT NOT NULL DEFAULT 0,
          `updatedAt` TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
          INDEX `idx_charity_id` (`charity_id`),
          CONSTRAINT `fk_charity_slide_charity` FOREIGN KEY (`charity_id`) REFERENCES `charities` (`id`) ON DELETE CASCADE ON UPDATE CASCADE
        ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci;
        ");
    }

    #[test]
    fn snapshot_create_table_postgres_leaves_indexes_out() {
        let decl = SchemaDeclaration::new("users")
            .column(ColumnSpec::new("id", "SERIAL PRIMARY KEY"))
            .column(ColumnSpec::new("email", "VARCHAR(255)").not_null())
            .column(ColumnSpec::new("role", "VARCHAR(20)").not_null().default_value("member"))
            .index(IndexSpec::unique("users_email", &["email"]));

        insta::assert_snapshot!(create_table(&decl, Dialect::Postgres).to_string(), @r#"
        CREATE TABLE IF NOT EXISTS "users" (
            "id" SERIAL PRIMARY KEY,
            "email" VARCHAR(255) NOT NULL,
            "role" VARCHAR(20) NOT NULL DEFAULT 'member'
        );
        "#);
    }

    #[test]
    fn test_foreign_key_replacement_mysql() {
        let idx = IndexSpec::foreign_key("fk_lesson_playlist", "playlist_id", "lesson_playlists", "id")
            .on_delete(ReferentialAction::Cascade);
        let statements = replace_index("lessons", &idx, Dialect::MySql);

        let flags: Vec<bool> = statements.iter().map(|s| s.ignore_failure).collect();
        assert_eq!(flags, vec![true, true, false]);
        assert_eq!(
            statements[2].sql,
            "ALTER TABLE `lessons` ADD CONSTRAINT `fk_lesson_playlist` FOREIGN KEY (`playlist_id`) REFERENCES `lesson_playlists` (`id`) ON DELETE CASCADE"
        );
        assert_eq!(
            statements[0].op,
            Operation::DropForeignKey("fk_lesson_playlist".into())
        );
    }

    #[test]
    fn test_foreign_key_replacement_postgres() {
        let idx = IndexSpec::foreign_key("fk_lesson_playlist", "playlist_id", "lesson_playlists", "id");
        let statements = replace_index("lessons", &idx, Dialect::Postgres);

        assert_eq!(statements.len(), 2);
        assert_eq!(
            statements[0].sql,
            r#"ALTER TABLE "lessons" DROP CONSTRAINT "fk_lesson_playlist""#
        );
        assert!(statements[0].ignore_failure);
        assert!(!statements[1].ignore_failure);
    }

    #[test]
    fn test_unique_index_mysql() {
        let idx = IndexSpec::unique("email", &["email"]);
        let statements = replace_index("users", &idx, Dialect::MySql);
        assert_eq!(
            statements[1].sql,
            "ALTER TABLE `users` ADD UNIQUE INDEX `email` (`email`)"
        );
    }

    #[test]
    fn test_primary_key_never_modified() {
        let decl = widgets();
        let current = LiveTable {
            columns: vec![
                live("id", "bigint", "NO", "PRI"),
                live("name", "varchar(255)", "NO", ""),
                live("color", "varchar(50)", "YES", ""),
            ],
            indexes: vec![],
        };

        let changes = diff(&decl, &current, Dialect::MySql);
        assert_eq!(changes.columns_to_modify.len(), 1);
        assert!(
            generate(&changes, &decl, Dialect::MySql)
                .iter()
                .all(|s| !matches!(s.op, Operation::ModifyColumn(_)))
        );
    }

    #[test]
    fn test_primary_key_column_never_added() {
        let decl = widgets();
        let changes = ChangeSet {
            table: "widgets".into(),
            columns_to_add: decl.columns.clone(),
            ..Default::default()
        };
        let statements = generate(&changes, &decl, Dialect::MySql);
        let added: Vec<&str> = statements
            .iter()
            .filter_map(|s| match &s.op {
                Operation::AddColumn(col) => Some(col.name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(added, vec!["name", "color"]);
    }

    #[test]
    fn test_primary_index_skipped() {
        let decl = widgets();
        let changes = ChangeSet {
            table: "widgets".into(),
            indexes_to_add: vec![
                IndexSpec::unique("PRIMARY", &["id"]),
                IndexSpec::unique("widgets_pkey", &["id"]),
            ],
            ..Default::default()
        };
        assert!(generate(&changes, &decl, Dialect::MySql).is_empty());
    }

    #[test]
    fn test_after_only_on_mysql() {
        let col = ColumnSpec::new("nickname", "VARCHAR(50)").after("name");
        assert_eq!(
            add_column("users", &col, Dialect::MySql).sql,
            "ALTER TABLE `users` ADD COLUMN `nickname` VARCHAR(50) AFTER `name`"
        );
        assert_eq!(
            add_column("users", &col, Dialect::Postgres).sql,
            r#"ALTER TABLE "users" ADD COLUMN "nickname" VARCHAR(50)"#
        );
    }

    #[test]
    fn test_postgres_default_only_drift() {
        let modification = ColumnModification {
            column: ColumnSpec::new("status", "VARCHAR(20)").not_null().default_value("active"),
            drift: vec![Drift::Default {
                live: Some("pending".into()),
                declared: Some("active".into()),
            }],
        };
        assert_eq!(
            modify_column("charities", &modification, Dialect::Postgres).sql,
            r#"ALTER TABLE "charities" ALTER COLUMN "status" SET DEFAULT 'active'"#
        );
    }
}
