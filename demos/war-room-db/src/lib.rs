//! Schema declarations for the war-room portal.
//!
//! Seven tables: users, the charities with their slides and items, lesson
//! playlists with their lessons, and war-room posts. [`declarations`] returns
//! them parents first, so every foreign key target is created before the
//! table that references it.

use converge::{ColumnSpec, Dialect, IndexSpec, ReferentialAction, SchemaDeclaration};

/// Every table, in foreign-key order.
pub fn declarations(dialect: Dialect) -> Vec<SchemaDeclaration> {
    let d = Flavor::new(dialect);
    vec![
        users(&d),
        charities(&d),
        charity_slides(&d),
        charity_items(&d),
        lesson_playlists(&d),
        lessons(&d),
        warrooms(&d),
    ]
}

/// Per-dialect spelling of the few things MySQL and Postgres disagree on.
struct Flavor {
    dialect: Dialect,
}

impl Flavor {
    fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    fn id(&self) -> ColumnSpec {
        let ty = match self.dialect {
            Dialect::MySql => "INT AUTO_INCREMENT PRIMARY KEY",
            Dialect::Postgres => "SERIAL PRIMARY KEY",
        };
        ColumnSpec::new("id", ty).not_null()
    }

    /// `ENUM(...)` on MySQL, a bounded `VARCHAR` on Postgres.
    fn choice(&self, name: &str, values: &[&str], default: &str) -> ColumnSpec {
        let ty = match self.dialect {
            Dialect::MySql => {
                let quoted: Vec<String> = values.iter().map(|v| format!("'{v}'")).collect();
                format!("ENUM({})", quoted.join(", "))
            }
            Dialect::Postgres => "VARCHAR(20)".to_string(),
        };
        ColumnSpec::new(name, ty).not_null().default_value(default)
    }

    fn timestamps(&self) -> [ColumnSpec; 2] {
        let created = ColumnSpec::new("createdAt", "TIMESTAMP")
            .not_null()
            .default_value("CURRENT_TIMESTAMP");
        let mut updated = ColumnSpec::new("updatedAt", "TIMESTAMP")
            .not_null()
            .default_value("CURRENT_TIMESTAMP");
        if self.dialect == Dialect::MySql {
            updated = updated.extra("ON UPDATE CURRENT_TIMESTAMP");
        }
        [created, updated]
    }

    // Postgres index names share one namespace per schema.
    fn index_name(&self, table: &str, name: &str) -> String {
        match self.dialect {
            Dialect::MySql => name.to_string(),
            Dialect::Postgres => format!("{table}_{name}"),
        }
    }

    fn index(&self, table: &str, name: &str, columns: &[&str]) -> IndexSpec {
        IndexSpec::index(self.index_name(table, name), columns)
    }

    fn unique(&self, table: &str, name: &str, columns: &[&str]) -> IndexSpec {
        IndexSpec::unique(self.index_name(table, name), columns)
    }
}

fn is_active() -> ColumnSpec {
    ColumnSpec::new("isActive", "BOOLEAN")
        .not_null()
        .default_value("true")
}

fn cascade(fk: IndexSpec) -> IndexSpec {
    fk.on_delete(ReferentialAction::Cascade)
        .on_update(ReferentialAction::Cascade)
}

fn with_timestamps(decl: SchemaDeclaration, d: &Flavor) -> SchemaDeclaration {
    let [created, updated] = d.timestamps();
    decl.column(created).column(updated)
}

fn users(d: &Flavor) -> SchemaDeclaration {
    const T: &str = "users";
    let decl = SchemaDeclaration::new(T)
        .column(d.id())
        .column(ColumnSpec::new("username", "VARCHAR(255)").not_null())
        .column(ColumnSpec::new("email", "VARCHAR(255)").not_null())
        .column(ColumnSpec::new("password", "VARCHAR(255)").not_null())
        .column(d.choice("role", &["admin", "member"], "member"))
        .column(ColumnSpec::new("firstName", "VARCHAR(255)").not_null())
        .column(ColumnSpec::new("lastName", "VARCHAR(255)").not_null())
        .column(ColumnSpec::new("avatar", "VARCHAR(500)").default_null())
        .column(is_active());
    with_timestamps(decl, d)
        .index(d.unique(T, "username", &["username"]))
        .index(d.unique(T, "email", &["email"]))
        .index(d.index(T, "idx_role", &["role"]))
}

fn charities(d: &Flavor) -> SchemaDeclaration {
    const T: &str = "charities";
    let decl = SchemaDeclaration::new(T)
        .column(d.id())
        .column(ColumnSpec::new("title", "VARCHAR(500)").not_null())
        .column(ColumnSpec::new("description", "TEXT"))
        .column(
            ColumnSpec::new("expected_fund", "DECIMAL(15, 2)")
                .not_null()
                .default_value("0"),
        )
        .column(
            ColumnSpec::new("current_fund", "DECIMAL(15, 2)")
                .not_null()
                .default_value("0"),
        )
        .column(ColumnSpec::new("img", "VARCHAR(1000)").not_null())
        .column(is_active())
        .column(d.choice("status", &["active", "completed", "paused"], "active"))
        .column(
            ColumnSpec::new("startDate", "TIMESTAMP")
                .not_null()
                .default_value("CURRENT_TIMESTAMP"),
        )
        .column(ColumnSpec::new("endDate", "TIMESTAMP").default_null());
    with_timestamps(decl, d)
        .index(d.index(T, "idx_status", &["status"]))
        .index(d.index(T, "idx_isActive", &["isActive"]))
}

fn charity_slides(d: &Flavor) -> SchemaDeclaration {
    const T: &str = "charity_slides";
    let decl = SchemaDeclaration::new(T)
        .column(d.id())
        .column(ColumnSpec::new("charity_id", "INT").not_null())
        .column(ColumnSpec::new("img", "VARCHAR(1000)").not_null())
        .column(ColumnSpec::new("description", "TEXT"))
        .column(ColumnSpec::new("display_order", "INT").not_null().default_value("0"))
        .column(is_active());
    with_timestamps(decl, d)
        .index(d.index(T, "idx_charity_id", &["charity_id"]))
        .index(d.index(T, "idx_display_order", &["display_order"]))
        .index(cascade(IndexSpec::foreign_key(
            "fk_charity_slide_charity",
            "charity_id",
            "charities",
            "id",
        )))
}

// `charity_id` references `charities.id`, so both ids are INT.
fn charity_items(d: &Flavor) -> SchemaDeclaration {
    const T: &str = "charity_items";
    let decl = SchemaDeclaration::new(T)
        .column(d.id())
        .column(ColumnSpec::new("charity_id", "INT").not_null())
        .column(ColumnSpec::new("name", "VARCHAR(500)").not_null())
        .column(ColumnSpec::new("needed_quantity", "INT").not_null().default_value("0"))
        .column(ColumnSpec::new("current_quantity", "INT").not_null().default_value("0"))
        .column(d.choice("status", &["pending", "in_progress", "completed"], "pending"))
        .column(is_active());
    with_timestamps(decl, d)
        .index(d.index(T, "idx_charity_id", &["charity_id"]))
        .index(d.index(T, "idx_status", &["status"]))
        .index(cascade(IndexSpec::foreign_key(
            "fk_charity_item_charity",
            "charity_id",
            "charities",
            "id",
        )))
}

fn lesson_playlists(d: &Flavor) -> SchemaDeclaration {
    const T: &str = "lesson_playlists";
    let decl = SchemaDeclaration::new(T)
        .column(d.id())
        .column(ColumnSpec::new("playlist_id", "VARCHAR(100)").not_null())
        .column(ColumnSpec::new("title", "VARCHAR(500)").not_null())
        .column(ColumnSpec::new("description", "TEXT"))
        .column(ColumnSpec::new("thumbnail", "VARCHAR(1000)"))
        .column(ColumnSpec::new("authors", "JSON"))
        .column(ColumnSpec::new("size", "VARCHAR(50)"))
        .column(ColumnSpec::new("display_order", "INT").not_null().default_value("0"))
        .column(is_active());
    with_timestamps(decl, d)
        .index(d.unique(T, "playlist_id", &["playlist_id"]))
        .index(d.index(T, "idx_display_order", &["display_order"]))
}

fn lessons(d: &Flavor) -> SchemaDeclaration {
    const T: &str = "lessons";
    let decl = SchemaDeclaration::new(T)
        .column(d.id())
        .column(ColumnSpec::new("img", "VARCHAR(1000)").not_null())
        .column(ColumnSpec::new("title", "VARCHAR(500)").not_null())
        .column(ColumnSpec::new("description", "TEXT"))
        .column(ColumnSpec::new("videoLink", "VARCHAR(1000)").not_null())
        .column(ColumnSpec::new("authors", "JSON").not_null())
        .column(ColumnSpec::new("size", "VARCHAR(50)").not_null())
        .column(ColumnSpec::new("playlist_id", "INT").not_null())
        .column(
            ColumnSpec::new("recommend", "BOOLEAN")
                .not_null()
                .default_value("false"),
        )
        .column(is_active());
    with_timestamps(decl, d)
        .index(d.index(T, "idx_playlist", &["playlist_id"]))
        .index(d.index(T, "idx_recommend", &["recommend"]))
        .index(d.index(T, "idx_isActive", &["isActive"]))
        .index(cascade(IndexSpec::foreign_key(
            "fk_lesson_playlist",
            "playlist_id",
            "lesson_playlists",
            "id",
        )))
}

fn warrooms(d: &Flavor) -> SchemaDeclaration {
    const T: &str = "warrooms";
    let mut status = ColumnSpec::new("status", "INT").not_null().default_value("0");
    if d.dialect == Dialect::MySql {
        status = status.extra("COMMENT '0=upcoming, 1=live, 2=archived, 3=podcast'");
    }
    let decl = SchemaDeclaration::new(T)
        .column(d.id())
        .column(ColumnSpec::new("title", "VARCHAR(500)").not_null())
        .column(ColumnSpec::new("description", "TEXT"))
        .column(ColumnSpec::new("date", "TIMESTAMP").not_null())
        .column(ColumnSpec::new("location", "VARCHAR(500)").not_null())
        .column(ColumnSpec::new("img", "VARCHAR(1000)"))
        .column(ColumnSpec::new("videoLink", "VARCHAR(1000)"))
        .column(status)
        .column(is_active());
    with_timestamps(decl, d)
        .index(d.index(T, "idx_status", &["status"]))
        .index(d.index(T, "idx_date", &["date"]))
        .index(d.index(T, "idx_isActive", &["isActive"]))
}
