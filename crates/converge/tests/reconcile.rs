//! End-to-end reconciliation against the in-memory catalog.

use converge::{
    ColumnSpec, DbError, Dialect, IndexSpec, LiveColumn, LiveIndexKind, LiveIndexRow, LiveTable,
    MemoryBackend, ReconcileOptions, ReferentialAction, SchemaDeclaration, ensure_and_reconcile,
    introspect, reconcile_all,
};

fn options() -> ReconcileOptions {
    ReconcileOptions {
        lock: false,
        ..Default::default()
    }
}

fn live_column(name: &str, ty: &str, nullable: bool) -> LiveColumn {
    LiveColumn {
        name: name.into(),
        column_type: ty.into(),
        is_nullable: if nullable { "YES" } else { "NO" }.into(),
        default: None,
        key: String::new(),
        extra: String::new(),
    }
}

fn mysql_id() -> LiveColumn {
    LiveColumn {
        key: "PRI".into(),
        extra: "auto_increment".into(),
        ..live_column("id", "int(11)", false)
    }
}

fn primary_row() -> LiveIndexRow {
    LiveIndexRow {
        index_name: "PRIMARY".into(),
        column_name: "id".into(),
        seq: 1,
        kind: LiveIndexKind::Primary,
    }
}

fn widget() -> SchemaDeclaration {
    SchemaDeclaration::new("widget")
        .column(ColumnSpec::new("id", "INT AUTO_INCREMENT PRIMARY KEY"))
        .column(ColumnSpec::new("name", "VARCHAR(50)").not_null())
        .column(ColumnSpec::new("qty", "INT").default_value("0"))
        .index(IndexSpec::index("idx_name", &["name"]))
}

/// A small parent/child pair exercising defaults, a unique index and a
/// foreign key, in both dialects.
fn catalog(dialect: Dialect) -> Vec<SchemaDeclaration> {
    let (pk, prefix) = match dialect {
        Dialect::MySql => ("INT AUTO_INCREMENT PRIMARY KEY", ""),
        Dialect::Postgres => ("SERIAL PRIMARY KEY", "lesson_"),
    };
    vec![
        SchemaDeclaration::new("playlist")
            .column(ColumnSpec::new("id", pk))
            .column(ColumnSpec::new("title", "VARCHAR(255)").not_null())
            .column(ColumnSpec::new("is_public", "BOOLEAN").not_null().default_value("true"))
            .column(
                ColumnSpec::new("created_at", "TIMESTAMP")
                    .not_null()
                    .default_value("CURRENT_TIMESTAMP"),
            )
            .index(IndexSpec::unique("uq_playlist_title", &["title"])),
        SchemaDeclaration::new("lesson")
            .column(ColumnSpec::new("id", pk))
            .column(ColumnSpec::new("playlist_id", "INT").not_null())
            .column(ColumnSpec::new("price", "DECIMAL(15, 2)").not_null().default_value("0"))
            .column(ColumnSpec::new("level", "VARCHAR(20)").default_value("beginner"))
            .index(IndexSpec::index(format!("{prefix}idx_playlist"), &["playlist_id"]))
            .index(IndexSpec::index(format!("{prefix}idx_level_price"), &["level", "price"]))
            .index(
                IndexSpec::foreign_key("fk_lesson_playlist", "playlist_id", "playlist", "id")
                    .on_delete(ReferentialAction::Cascade),
            ),
    ]
}

#[tokio::test]
async fn widget_scenario_mysql() {
    let backend = MemoryBackend::new(Dialect::MySql);
    backend.insert_table(
        "widget",
        LiveTable {
            columns: vec![mysql_id(), live_column("name", "varchar(50)", false)],
            indexes: vec![primary_row()],
        },
    );

    let report = ensure_and_reconcile(&backend, &widget(), &options())
        .await
        .unwrap();

    assert_eq!(report.changes.columns_added, vec!["qty"]);
    assert!(report.changes.columns_modified.is_empty());
    assert_eq!(report.changes.indexes_added, vec!["idx_name"]);
    assert_eq!(
        backend.executed_sql(),
        vec![
            "ALTER TABLE `widget` ADD COLUMN `qty` INT DEFAULT 0",
            "ALTER TABLE `widget` DROP INDEX `idx_name`",
            "ALTER TABLE `widget` ADD INDEX `idx_name` (`name`)",
        ]
    );
    assert_eq!(report.applied, 2);
    assert_eq!(report.ignored, 1);
    assert!(report.is_clean());
}

#[tokio::test]
async fn absent_table_is_created_then_converged() {
    let backend = MemoryBackend::new(Dialect::MySql);

    let first = ensure_and_reconcile(&backend, &widget(), &options())
        .await
        .unwrap();
    assert!(first.created);
    let executed = backend.executed_sql();
    assert_eq!(executed.len(), 1);
    assert!(executed[0].starts_with("CREATE TABLE IF NOT EXISTS `widget`"));

    backend.clear_log();
    let second = ensure_and_reconcile(&backend, &widget(), &options())
        .await
        .unwrap();
    assert!(!second.created);
    assert!(second.changes.is_empty());
    assert!(backend.executed().is_empty());
}

#[tokio::test]
async fn second_pass_is_a_no_op() {
    for dialect in [Dialect::MySql, Dialect::Postgres] {
        let backend = MemoryBackend::new(dialect);
        let decls = catalog(dialect);

        let first = reconcile_all(&backend, &decls, &options()).await.unwrap();
        assert_eq!(first.created(), 2, "{dialect}");
        assert_eq!(first.failed(), 0, "{dialect}: {first}");

        backend.clear_log();
        let second = reconcile_all(&backend, &decls, &options()).await.unwrap();
        assert!(second.is_converged(), "{dialect}: {second}");
        assert!(backend.executed().is_empty(), "{dialect}");
    }
}

#[tokio::test]
async fn one_pass_converges_partial_table() {
    let backend = MemoryBackend::new(Dialect::MySql);
    let decls = catalog(Dialect::MySql);
    backend.insert_table(
        "playlist",
        LiveTable {
            columns: vec![mysql_id(), live_column("title", "varchar(100)", true)],
            indexes: vec![primary_row()],
        },
    );
    backend.insert_table(
        "lesson",
        LiveTable {
            columns: vec![mysql_id(), live_column("playlist_id", "int(11)", false)],
            indexes: vec![
                primary_row(),
                // same name, wrong columns
                LiveIndexRow {
                    index_name: "idx_level_price".into(),
                    column_name: "playlist_id".into(),
                    seq: 1,
                    kind: LiveIndexKind::Index,
                },
            ],
        },
    );

    let report = reconcile_all(&backend, &decls, &options()).await.unwrap();
    assert_eq!(report.failed(), 0, "{report}");

    for decl in &decls {
        let live = introspect(&backend, &decl.table_name).await.unwrap();
        let changes = converge::diff(decl, &live, Dialect::MySql);
        assert!(changes.is_converged(), "{changes}");
    }
}

#[tokio::test]
async fn undeclared_columns_survive_repeated_passes() {
    let backend = MemoryBackend::new(Dialect::Postgres);
    backend.insert_table(
        "widget",
        LiveTable {
            columns: vec![
                LiveColumn {
                    key: "PRI".into(),
                    ..live_column("id", "integer", false)
                },
                live_column("name", "character varying(50)", false),
                live_column("legacy_flag", "smallint", true),
            ],
            indexes: vec![],
        },
    );
    let decl = SchemaDeclaration::new("widget")
        .column(ColumnSpec::new("id", "SERIAL PRIMARY KEY"))
        .column(ColumnSpec::new("name", "VARCHAR(50)").not_null())
        .column(ColumnSpec::new("qty", "INT").default_value("0"));

    for _ in 0..3 {
        ensure_and_reconcile(&backend, &decl, &options())
            .await
            .unwrap();
        assert!(backend.table("widget").find_column("legacy_flag").is_some());
    }
    assert!(
        backend
            .executed_sql()
            .iter()
            .all(|sql| !sql.contains("DROP COLUMN"))
    );
}

#[tokio::test]
async fn index_is_dropped_before_it_is_added() {
    let backend = MemoryBackend::new(Dialect::MySql);
    backend.insert_table(
        "widget",
        LiveTable {
            columns: vec![
                mysql_id(),
                live_column("name", "varchar(50)", false),
                LiveColumn {
                    default: Some("0".into()),
                    ..live_column("qty", "int", true)
                },
            ],
            indexes: vec![
                primary_row(),
                LiveIndexRow {
                    index_name: "idx_name".into(),
                    column_name: "qty".into(),
                    seq: 1,
                    kind: LiveIndexKind::Index,
                },
            ],
        },
    );

    let report = ensure_and_reconcile(&backend, &widget(), &options())
        .await
        .unwrap();

    let executed = backend.executed();
    assert_eq!(executed.len(), 2);
    assert_eq!(executed[0].sql, "ALTER TABLE `widget` DROP INDEX `idx_name`");
    assert_eq!(executed[0].result, Ok(()));
    assert_eq!(executed[1].result, Ok(()));
    assert_eq!(report.ignored, 0);
    assert_eq!(
        backend.table("widget").grouped_indexes()["idx_name"].columns,
        vec!["name"]
    );
}

#[tokio::test]
async fn primary_key_is_never_modified() {
    let backend = MemoryBackend::new(Dialect::MySql);
    backend.insert_table(
        "widget",
        LiveTable {
            columns: vec![
                LiveColumn {
                    column_type: "bigint(20) unsigned".into(),
                    ..mysql_id()
                },
                live_column("name", "varchar(50)", false),
                LiveColumn {
                    default: Some("0".into()),
                    ..live_column("qty", "int", true)
                },
            ],
            indexes: vec![primary_row()],
        },
    );

    let decl = widget().column(ColumnSpec::new("note", "TEXT"));
    ensure_and_reconcile(&backend, &decl, &options())
        .await
        .unwrap();
    assert!(
        backend
            .executed_sql()
            .iter()
            .all(|sql| !sql.contains("MODIFY COLUMN"))
    );
}

#[tokio::test]
async fn foreign_key_added_to_existing_table_mysql() {
    let backend = MemoryBackend::new(Dialect::MySql);
    let decls = catalog(Dialect::MySql);
    reconcile_all(&backend, &decls[..1], &options()).await.unwrap();

    // lesson exists from before the foreign key was declared
    backend.insert_table(
        "lesson",
        LiveTable {
            columns: vec![
                mysql_id(),
                live_column("playlist_id", "int(11)", false),
                LiveColumn {
                    default: Some("0.00".into()),
                    ..live_column("price", "decimal(15,2)", false)
                },
                LiveColumn {
                    default: Some("beginner".into()),
                    ..live_column("level", "varchar(20)", true)
                },
            ],
            indexes: vec![primary_row()],
        },
    );
    backend.clear_log();

    let report = reconcile_all(&backend, &decls, &options()).await.unwrap();
    let lesson = &report.tables[1];
    assert!(lesson.is_clean(), "{report}");
    assert_eq!(
        lesson.changes.indexes_added,
        vec!["idx_playlist", "idx_level_price", "fk_lesson_playlist"]
    );
    // every drop misses: two indexes, the constraint and its backing index
    assert_eq!(lesson.ignored, 4);

    backend.clear_log();
    let again = reconcile_all(&backend, &decls, &options()).await.unwrap();
    assert!(again.is_converged(), "{again}");
}

#[tokio::test]
async fn failed_statement_does_not_stop_the_pass() {
    let backend = MemoryBackend::new(Dialect::Postgres);
    let decls = catalog(Dialect::Postgres);
    backend.fail_statements_matching(
        "CREATE UNIQUE INDEX \"uq_playlist_title\"",
        DbError::postgres("53100", "could not extend file"),
    );

    let report = reconcile_all(&backend, &decls, &options()).await.unwrap();
    assert_eq!(report.tables.len(), 2);
    assert_eq!(report.failed(), 1);
    assert!(report.tables[1].created);
    assert!(!report.is_converged());

    let failure = &report.tables[0].failed[0];
    assert_eq!(failure.error.code.as_deref(), Some("53100"));
}

#[tokio::test]
async fn dry_run_plans_without_executing() {
    let backend = MemoryBackend::new(Dialect::MySql);
    backend.insert_table(
        "widget",
        LiveTable {
            columns: vec![mysql_id(), live_column("name", "varchar(50)", false)],
            indexes: vec![primary_row()],
        },
    );
    let dry = ReconcileOptions {
        dry_run: true,
        ..Default::default()
    };

    let report = reconcile_all(&backend, &[widget()], &dry).await.unwrap();
    assert_eq!(report.planned(), 3);
    assert!(backend.executed().is_empty());
    assert!(backend.table("widget").find_column("qty").is_none());
    // dry runs never take the lock
    assert_eq!(backend.lock_holder(), None);
}
