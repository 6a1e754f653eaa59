//! In-memory catalog.
//!
//! Applies the structured [`Operation`] of each statement to a catalog kept in
//! memory, following the rules of the chosen dialect closely enough for the
//! engine's behavior to be observable: MySQL keeps a backing index for every
//! foreign key and refuses to drop it while the constraint exists; Postgres
//! index names are unique per schema rather than per table. Used for tests and
//! for planning against an empty database.

use super::{Backend, BoxFuture};
use crate::ddl::{Operation, Statement};
use crate::diff::{ColumnModification, Drift};
use crate::error::{DbError, ErrorClass};
use converge_schema::{
    ColumnSpec, IndexKind, IndexSpec, LiveColumn, LiveIndexKind, LiveIndexRow, LiveTable,
    SchemaDeclaration, group_index_rows,
};
use converge_sql::Dialect;
use indexmap::IndexMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// A statement the memory backend was asked to run, and what happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedStatement {
    pub sql: String,
    pub result: Result<(), DbError>,
}

#[derive(Default)]
struct State {
    tables: IndexMap<String, LiveTable>,
    executed: Vec<ExecutedStatement>,
    scripted_failures: Vec<(String, DbError)>,
    broken_tables: Vec<String>,
    create_races: Vec<String>,
    lock_holder: Option<String>,
    lock_held_elsewhere: bool,
}

/// A database that lives in memory.
pub struct MemoryBackend {
    dialect: Dialect,
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Install a table exactly as given, bypassing DDL.
    pub fn insert_table(&self, name: impl Into<String>, table: LiveTable) {
        self.state().tables.insert(name.into(), table);
    }

    /// The live structure of `name`, empty if absent.
    pub fn table(&self, name: &str) -> LiveTable {
        self.state().tables.get(name).cloned().unwrap_or_default()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.state().tables.keys().cloned().collect()
    }

    /// Every statement executed so far, in order.
    pub fn executed(&self) -> Vec<ExecutedStatement> {
        self.state().executed.clone()
    }

    /// SQL of every statement executed so far.
    pub fn executed_sql(&self) -> Vec<String> {
        self.state().executed.iter().map(|e| e.sql.clone()).collect()
    }

    pub fn clear_log(&self) {
        self.state().executed.clear();
    }

    /// Make any statement whose SQL contains `needle` fail with `error`.
    pub fn fail_statements_matching(&self, needle: impl Into<String>, error: DbError) {
        self.state().scripted_failures.push((needle.into(), error));
    }

    /// Make catalog reads for `table` fail.
    pub fn fail_introspection(&self, table: impl Into<String>) {
        self.state().broken_tables.push(table.into());
    }

    /// Have a peer create `table` just before our own `CREATE TABLE` for it
    /// runs, so ours fails as a duplicate.
    pub fn lose_create_race(&self, table: impl Into<String>) {
        self.state().create_races.push(table.into());
    }

    /// Pretend another session holds every lock.
    pub fn hold_lock_elsewhere(&self) {
        self.state().lock_held_elsewhere = true;
    }

    /// The lock currently held by this session, if any.
    pub fn lock_holder(&self) -> Option<String> {
        self.state().lock_holder.clone()
    }

    fn read<T>(&self, table: &str, f: impl FnOnce(&LiveTable) -> T) -> Result<T, DbError> {
        let state = self.state();
        if state.broken_tables.iter().any(|t| t == table) {
            return Err(DbError::other(format!("catalog read failed for `{table}`")));
        }
        let empty = LiveTable::default();
        Ok(f(state.tables.get(table).unwrap_or(&empty)))
    }

    fn run(&self, statement: &Statement) -> Result<(), DbError> {
        let mut state = self.state();

        let scripted = state
            .scripted_failures
            .iter()
            .find(|(needle, _)| statement.sql.contains(needle.as_str()))
            .map(|(_, err)| err.clone());

        let raced = matches!(statement.op, Operation::CreateTable(_))
            && state.create_races.contains(&statement.table);

        let result = match scripted {
            Some(err) => Err(err),
            None => {
                let applied = Catalog {
                    dialect: self.dialect,
                    tables: &mut state.tables,
                }
                .apply(&statement.table, &statement.op);
                match (applied, raced) {
                    (Ok(()), true) => {
                        state.create_races.retain(|t| t != &statement.table);
                        Err(duplicate_table(&statement.table, self.dialect))
                    }
                    (applied, _) => applied,
                }
            }
        };

        state.executed.push(ExecutedStatement {
            sql: statement.sql.clone(),
            result: result.clone(),
        });
        result
    }
}

impl Backend for MemoryBackend {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn fetch_columns<'a>(
        &'a self,
        table: &'a str,
    ) -> BoxFuture<'a, Result<Vec<LiveColumn>, DbError>> {
        let result = self.read(table, |t| t.columns.clone());
        Box::pin(async move { result })
    }

    fn fetch_index_rows<'a>(
        &'a self,
        table: &'a str,
    ) -> BoxFuture<'a, Result<Vec<LiveIndexRow>, DbError>> {
        let result = self.read(table, |t| t.indexes.clone());
        Box::pin(async move { result })
    }

    fn execute<'a>(&'a self, statement: &'a Statement) -> BoxFuture<'a, Result<(), DbError>> {
        let result = self.run(statement);
        Box::pin(async move { result })
    }

    fn acquire_lock<'a>(
        &'a self,
        name: &'a str,
        _timeout: Duration,
    ) -> BoxFuture<'a, Result<bool, DbError>> {
        let mut state = self.state();
        let acquired = !state.lock_held_elsewhere;
        if acquired {
            state.lock_holder = Some(name.to_string());
        }
        drop(state);
        Box::pin(async move { Ok(acquired) })
    }

    fn release_lock<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), DbError>> {
        let mut state = self.state();
        if state.lock_holder.as_deref() == Some(name) {
            state.lock_holder = None;
        }
        drop(state);
        Box::pin(async move { Ok(()) })
    }
}

/// DDL semantics over the in-memory tables.
struct Catalog<'s> {
    dialect: Dialect,
    tables: &'s mut IndexMap<String, LiveTable>,
}

impl Catalog<'_> {
    fn apply(&mut self, table: &str, op: &Operation) -> Result<(), DbError> {
        match op {
            Operation::CreateTable(decl) => {
                // IF NOT EXISTS
                if !self.tables.contains_key(&decl.table_name) {
                    let created = self.create(decl)?;
                    self.tables.insert(decl.table_name.clone(), created);
                }
                Ok(())
            }
            Operation::AddColumn(col) => self.add_column(table, col),
            Operation::ModifyColumn(m) => self.modify_column(table, m),
            Operation::DropIndex(name) => self.drop_index(table, name),
            Operation::DropForeignKey(name) => self.drop_foreign_key(table, name),
            Operation::AddIndex(idx) => self.add_index(table, idx),
        }
    }

    fn existing(&mut self, table: &str) -> Result<&mut LiveTable, DbError> {
        self.tables.get_mut(table).ok_or_else(|| {
            DbError::new(
                ErrorClass::NoSuchTable,
                None,
                format!("table `{table}` does not exist"),
            )
        })
    }

    fn create(&self, decl: &SchemaDeclaration) -> Result<LiveTable, DbError> {
        let mut table = LiveTable {
            columns: decl.columns.iter().map(|c| self.live_column(c)).collect(),
            indexes: Vec::new(),
        };

        if let Some(pk) = decl.primary_key() {
            let name = match self.dialect {
                Dialect::MySql => "PRIMARY".to_string(),
                Dialect::Postgres => format!("{}_pkey", decl.table_name),
            };
            table.indexes.push(LiveIndexRow {
                index_name: name,
                column_name: pk.name.clone(),
                seq: 1,
                kind: LiveIndexKind::Primary,
            });
        }

        for idx in &decl.indexes {
            match (&idx.kind, self.dialect) {
                (IndexKind::ForeignKey { references, .. }, _) => {
                    if references.table != decl.table_name
                        && !self.tables.contains_key(&references.table)
                    {
                        return Err(missing_reference(&references.table));
                    }
                    add_foreign_key_rows(&mut table, idx, self.dialect);
                }
                (_, Dialect::MySql) => add_index_rows(&mut table, idx),
                // created by the reconcile pass that follows
                (_, Dialect::Postgres) => {}
            }
        }

        Ok(table)
    }

    fn live_column(&self, col: &ColumnSpec) -> LiveColumn {
        let extra = if col.declared_type.to_ascii_lowercase().contains("auto_increment") {
            "auto_increment"
        } else {
            ""
        };
        LiveColumn {
            name: col.name.clone(),
            column_type: self.dialect.canonical_type(&col.declared_type),
            is_nullable: if col.nullable && !col.is_primary_key() {
                "YES".into()
            } else {
                "NO".into()
            },
            default: col
                .default
                .as_ref()
                .and_then(|d| d.comparable())
                .map(|d| d.to_string()),
            key: if col.is_primary_key() {
                "PRI".into()
            } else {
                String::new()
            },
            extra: extra.to_string(),
        }
    }

    fn add_column(&mut self, table: &str, col: &ColumnSpec) -> Result<(), DbError> {
        let dialect = self.dialect;
        let live = self.live_column(col);
        let t = self.existing(table)?;
        if t.find_column(&col.name).is_some() {
            return Err(DbError::other(format!("duplicate column name `{}`", col.name)));
        }

        let position = match (&col.after, dialect.supports_column_position()) {
            (Some(after), true) => t
                .columns
                .iter()
                .position(|c| &c.name == after)
                .map(|i| i + 1)
                .ok_or_else(|| missing_column(after, dialect))?,
            _ => t.columns.len(),
        };
        t.columns.insert(position, live);
        Ok(())
    }

    fn modify_column(&mut self, table: &str, m: &ColumnModification) -> Result<(), DbError> {
        let dialect = self.dialect;
        let live = self.live_column(&m.column);
        let t = self.existing(table)?;
        let current = t
            .columns
            .iter_mut()
            .find(|c| c.name == m.column.name)
            .ok_or_else(|| missing_column(&m.column.name, dialect))?;

        // MODIFY COLUMN restates the whole definition; Postgres alters only
        // what drifted.
        let touches = |f: fn(&Drift) -> bool| {
            dialect == Dialect::MySql || m.drift.is_empty() || m.drift.iter().any(f)
        };
        if touches(|d| matches!(d, Drift::Type { .. })) {
            current.column_type = live.column_type;
        }
        if touches(|d| matches!(d, Drift::Nullability { .. })) {
            current.is_nullable = live.is_nullable;
        }
        if touches(|d| matches!(d, Drift::Default { .. })) {
            current.default = live.default;
        }
        Ok(())
    }

    fn drop_index(&mut self, table: &str, name: &str) -> Result<(), DbError> {
        let dialect = self.dialect;

        // Postgres index names are per schema.
        let owner = match dialect {
            Dialect::MySql => table.to_string(),
            Dialect::Postgres => self
                .tables
                .iter()
                .find(|(_, t)| {
                    t.indexes
                        .iter()
                        .any(|r| r.index_name == name && r.kind != LiveIndexKind::ForeignKey)
                })
                .map(|(n, _)| n.clone())
                .ok_or_else(|| missing_index(name, dialect))?,
        };

        let t = self.existing(&owner)?;
        let has_index = t
            .indexes
            .iter()
            .any(|r| r.index_name == name && r.kind != LiveIndexKind::ForeignKey);
        if !has_index {
            return Err(missing_index(name, dialect));
        }
        if dialect == Dialect::MySql
            && t.indexes
                .iter()
                .any(|r| r.index_name == name && r.kind == LiveIndexKind::ForeignKey)
        {
            return Err(DbError::mysql(
                1553,
                format!("Cannot drop index '{name}': needed in a foreign key constraint"),
            ));
        }

        t.indexes
            .retain(|r| !(r.index_name == name && r.kind != LiveIndexKind::ForeignKey));
        Ok(())
    }

    fn drop_foreign_key(&mut self, table: &str, name: &str) -> Result<(), DbError> {
        let dialect = self.dialect;
        let t = self.existing(table)?;
        let before = t.indexes.len();
        t.indexes
            .retain(|r| !(r.index_name == name && r.kind == LiveIndexKind::ForeignKey));
        if t.indexes.len() == before {
            return Err(missing_index(name, dialect));
        }
        Ok(())
    }

    fn add_index(&mut self, table: &str, idx: &IndexSpec) -> Result<(), DbError> {
        let dialect = self.dialect;

        if let Some(references) = idx.references()
            && references.table != table
            && !self.tables.contains_key(&references.table)
        {
            return Err(missing_reference(&references.table));
        }

        let taken = match (dialect, &idx.kind) {
            (Dialect::Postgres, IndexKind::ForeignKey { .. }) => self
                .existing(table)?
                .indexes
                .iter()
                .any(|r| r.index_name == idx.name && r.kind == LiveIndexKind::ForeignKey),
            (Dialect::Postgres, _) => self
                .tables
                .values()
                .any(|t| t.indexes.iter().any(|r| r.index_name == idx.name)),
            (Dialect::MySql, _) => self
                .existing(table)?
                .indexes
                .iter()
                .any(|r| r.index_name == idx.name),
        };
        if taken {
            return Err(DbError::other(format!("duplicate key name `{}`", idx.name)));
        }

        let t = self.existing(table)?;
        for col in &idx.columns {
            if t.find_column(col).is_none() {
                return Err(missing_column(col, dialect));
            }
        }

        match idx.kind {
            IndexKind::ForeignKey { .. } => add_foreign_key_rows(t, idx, dialect),
            _ => add_index_rows(t, idx),
        }
        Ok(())
    }
}

fn add_index_rows(table: &mut LiveTable, idx: &IndexSpec) {
    let kind = if idx.is_unique() {
        LiveIndexKind::Unique
    } else {
        LiveIndexKind::Index
    };
    for (i, col) in idx.columns.iter().enumerate() {
        table.indexes.push(LiveIndexRow {
            index_name: idx.name.clone(),
            column_name: col.clone(),
            seq: i as u32 + 1,
            kind,
        });
    }
}

/// Record the constraint, plus the backing index MySQL creates when no
/// existing index starts with the foreign key's columns.
fn add_foreign_key_rows(table: &mut LiveTable, idx: &IndexSpec, dialect: Dialect) {
    if dialect == Dialect::MySql {
        let covered = group_index_rows(&table.indexes).values().any(|existing| {
            existing.kind != LiveIndexKind::ForeignKey
                && existing.columns.len() >= idx.columns.len()
                && existing.columns[..idx.columns.len()] == idx.columns[..]
        });
        if !covered {
            for (i, col) in idx.columns.iter().enumerate() {
                table.indexes.push(LiveIndexRow {
                    index_name: idx.name.clone(),
                    column_name: col.clone(),
                    seq: i as u32 + 1,
                    kind: LiveIndexKind::Index,
                });
            }
        }
    }

    for (i, col) in idx.columns.iter().enumerate() {
        table.indexes.push(LiveIndexRow {
            index_name: idx.name.clone(),
            column_name: col.clone(),
            seq: i as u32 + 1,
            kind: LiveIndexKind::ForeignKey,
        });
    }
}

fn missing_index(name: &str, dialect: Dialect) -> DbError {
    match dialect {
        Dialect::MySql => DbError::mysql(
            1091,
            format!("Can't DROP '{name}'; check that column/key exists"),
        ),
        Dialect::Postgres => {
            DbError::postgres("42704", format!("index or constraint \"{name}\" does not exist"))
        }
    }
}

fn missing_column(name: &str, dialect: Dialect) -> DbError {
    match dialect {
        Dialect::MySql => DbError::mysql(1054, format!("Unknown column '{name}'")),
        Dialect::Postgres => {
            DbError::postgres("42703", format!("column \"{name}\" does not exist"))
        }
    }
}

fn duplicate_table(name: &str, dialect: Dialect) -> DbError {
    match dialect {
        Dialect::MySql => DbError::mysql(1050, format!("Table '{name}' already exists")),
        Dialect::Postgres => {
            DbError::postgres("42P07", format!("relation \"{name}\" already exists"))
        }
    }
}

fn missing_reference(table: &str) -> DbError {
    DbError::new(
        ErrorClass::Other,
        None,
        format!("referenced table `{table}` does not exist"),
    )
}
