//! Terminal output.

use converge::{IndexKind, ReconcileReport, SchemaDeclaration, TableReport};
use owo_colors::OwoColorize;
use std::fmt::Write;

pub(crate) fn error(err: &dyn std::error::Error) {
    eprintln!("{} {}", "error:".red().bold(), err);
    let mut source = err.source();
    while let Some(cause) = source {
        eprintln!("  {} {}", "caused by:".dimmed(), cause);
        source = cause.source();
    }
}

pub(crate) fn report(report: &ReconcileReport) {
    for table in &report.tables {
        println!("{}", table_line(table));
        for failed in &table.failed {
            println!("    {} {}", "failed:".red(), failed.sql);
            println!("      {}", failed.error.dimmed());
        }
    }
    println!();
    let summary = format!(
        "{} table(s), {} created, {} applied, {} ignored, {} failed",
        report.tables.len(),
        report.created(),
        report.applied(),
        report.ignored(),
        report.failed()
    );
    if report.failed() == 0 {
        println!("{}", summary.green());
    } else {
        println!("{}", summary.yellow());
    }
}

fn table_line(table: &TableReport) -> String {
    let mut line = format!("  {}", table.table.bold());
    if table.created {
        let _ = write!(line, " {}", "created".green());
    }
    if table.changes.is_empty() && !table.created {
        let _ = write!(line, " {}", "up to date".dimmed());
        return line;
    }
    let changes = &table.changes;
    for (label, names) in [
        ("+col", &changes.columns_added),
        ("~col", &changes.columns_modified),
        ("+idx", &changes.indexes_added),
    ] {
        if !names.is_empty() {
            let _ = write!(line, " {} {}", label.cyan(), names.join(", "));
        }
    }
    line
}

pub(crate) fn plan(report: &ReconcileReport) {
    if report.planned() == 0 {
        println!("{}", "Schema is up to date.".green());
        return;
    }
    for table in &report.tables {
        if table.planned.is_empty() {
            continue;
        }
        println!("-- {}", table.table.bold());
        for statement in &table.planned {
            if statement.ignore_failure {
                println!("{} {}", statement, "-- may fail".dimmed());
            } else {
                println!("{statement}");
            }
        }
        println!();
    }
    println!("{} statement(s) planned", report.planned());
}

/// Summary of each declaration: columns with their attributes, then indexes
/// and foreign keys.
pub(crate) fn schema(decls: &[&SchemaDeclaration]) {
    println!("Schema ({} tables):", decls.len());
    println!();
    for decl in decls {
        for line in describe(decl).lines() {
            println!("  {line}");
        }
        println!();
    }
}

fn describe(decl: &SchemaDeclaration) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} ({} columns)",
        decl.table_name,
        decl.columns.len()
    );

    for col in &decl.columns {
        let mut attrs = Vec::new();
        if col.is_primary_key() {
            attrs.push("PK".to_string());
        }
        if !col.nullable {
            attrs.push("NOT NULL".to_string());
        }
        if let Some(default) = &col.default {
            attrs.push(format!(
                "DEFAULT {}",
                default.comparable().unwrap_or("NULL")
            ));
        }
        if let Some(extra) = &col.extra {
            attrs.push(extra.clone());
        }

        let attrs_str = if attrs.is_empty() {
            String::new()
        } else {
            format!(" [{}]", attrs.join(", "))
        };
        let _ = writeln!(out, "  {}: {}{}", col.name, col.declared_type, attrs_str);
    }

    for idx in &decl.indexes {
        let _ = match &idx.kind {
            IndexKind::Index => writeln!(
                out,
                "  INDEX {} ({})",
                idx.name,
                idx.columns.join(", ")
            ),
            IndexKind::Unique => writeln!(
                out,
                "  UNIQUE {} ({})",
                idx.name,
                idx.columns.join(", ")
            ),
            IndexKind::ForeignKey { references, .. } => writeln!(
                out,
                "  FK: {} -> {}.{}",
                idx.columns.join(", "),
                references.table,
                references.columns.join(", ")
            ),
        };
    }
    out
}
