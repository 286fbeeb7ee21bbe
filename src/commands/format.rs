//! Formatting functions for command output.
//!
//! Pure functions returning strings, kept apart from printing.

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Write;

use sqlbox::{QueryResult, Row, SandboxInstance, SandboxStatus, SweepReport};

fn rule() -> String {
    "━".repeat(50).dimmed().to_string()
}

fn timestamp(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn status(status: SandboxStatus) -> String {
    match status {
        SandboxStatus::Ready => status.to_string().green().bold().to_string(),
        SandboxStatus::Provisioning => status.to_string().yellow().to_string(),
        SandboxStatus::Stopped | SandboxStatus::Removed => status.to_string().red().to_string(),
    }
}

/// Full description of one instance.
pub fn format_instance(instance: &SandboxInstance) -> String {
    let mut out = String::new();

    writeln!(&mut out, "\n{}", rule()).unwrap();
    writeln!(&mut out, "{}", format!("   Sandbox {}", instance.name).yellow().bold()).unwrap();
    writeln!(&mut out, "{}", rule()).unwrap();
    writeln!(&mut out, "  Id:         {}", instance.id.cyan()).unwrap();
    writeln!(
        &mut out,
        "  Owner:      {} ({})",
        instance.owner_name.cyan(),
        instance.owner_id
    )
    .unwrap();
    writeln!(&mut out, "  Database:   {}", instance.database_name.cyan()).unwrap();
    writeln!(&mut out, "  Difficulty: {}", instance.difficulty.to_string().cyan()).unwrap();
    writeln!(
        &mut out,
        "  Status:     {} ({})",
        status(instance.status),
        instance.runtime_state
    )
    .unwrap();
    match &instance.endpoint {
        Some(endpoint) => {
            writeln!(&mut out, "  Endpoint:   {}", endpoint.to_string().cyan()).unwrap();
        }
        None => writeln!(&mut out, "  Endpoint:   {}", "not running".dimmed()).unwrap(),
    }
    writeln!(&mut out, "  Created:    {}", timestamp(&instance.created_at).cyan()).unwrap();
    writeln!(&mut out, "  Expires:    {}", timestamp(&instance.expires_at).cyan()).unwrap();
    writeln!(&mut out, "{}", rule()).unwrap();

    out
}

/// Output for an owner with no live instance.
pub fn format_no_instance(owner_id: &str) -> String {
    format!(
        "\n{} No sandbox for owner {}.\n  Run {} to create one.\n",
        "ℹ".blue(),
        owner_id,
        format!("sqlbox provision --owner {owner_id} --name <name>").green()
    )
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Renders rows as an aligned text table.
pub fn format_rows(rows: &[Row]) -> String {
    let Some(first) = rows.first() else {
        return String::new();
    };
    let columns: Vec<&String> = first.keys().collect();

    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|c| row.get(c.as_str()).map_or_else(String::new, cell))
                .collect()
        })
        .collect();

    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            cells
                .iter()
                .map(|r| r[i].chars().count())
                .chain(std::iter::once(c.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |values: Vec<String>| -> String {
        values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{v:<w$}"))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut out = String::new();
    let header = line(columns.iter().map(|c| (*c).clone()).collect());
    writeln!(&mut out, "{}", header.bold()).unwrap();
    let separator = widths
        .iter()
        .map(|w| "-".repeat(*w))
        .collect::<Vec<_>>()
        .join("-+-");
    writeln!(&mut out, "{}", separator.dimmed()).unwrap();
    for row in cells {
        writeln!(&mut out, "{}", line(row)).unwrap();
    }
    out
}

/// Output of an executed statement.
pub fn format_query_result(result: &QueryResult) -> String {
    let mut out = String::new();

    if result.rows.is_empty() {
        writeln!(
            &mut out,
            "\n{} {} row(s) affected",
            "✓".green(),
            result.affected_rows
        )
        .unwrap();
    } else {
        writeln!(&mut out).unwrap();
        out.push_str(&format_rows(&result.rows));
        writeln!(&mut out, "{}", format!("({} rows)", result.rows.len()).dimmed()).unwrap();
    }
    writeln!(
        &mut out,
        "  {}",
        format!("{} ms", result.execution_time_ms).dimmed()
    )
    .unwrap();

    match result.is_correct {
        Some(true) => writeln!(&mut out, "  {} Correct", "✓".green().bold()).unwrap(),
        Some(false) => writeln!(&mut out, "  {} Not correct", "✗".red().bold()).unwrap(),
        None => {}
    }
    out
}

/// Confirmation for destroyed instances.
pub fn format_destroyed(ids: &[String]) -> String {
    let mut out = String::new();
    if ids.is_empty() {
        writeln!(&mut out, "\n{} No sandboxes to remove.", "ℹ".blue()).unwrap();
    } else {
        writeln!(&mut out, "\n{} Removed sandbox(es):", "✓".green()).unwrap();
        for id in ids {
            writeln!(&mut out, "  {} {}", "✗".red(), id.dimmed()).unwrap();
        }
    }
    out
}

/// Summary of a sweep pass.
pub fn format_sweep(report: &SweepReport) -> String {
    let mut out = String::new();
    writeln!(
        &mut out,
        "\n{} Sweep: {} discovered, {} gone, {} expired and removed",
        "✓".green(),
        report.added.len().to_string().cyan(),
        report.dropped.len().to_string().cyan(),
        report.reaped.len().to_string().cyan()
    )
    .unwrap();
    for id in &report.reaped {
        writeln!(&mut out, "  {} {}", "✗".red(), id.dimmed()).unwrap();
    }
    out
}

/// Result of the environment check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DoctorReport {
    pub image: String,
    pub runtime_error: Option<String>,
    pub image_present: Option<bool>,
    pub seed_tiers: usize,
}

impl DoctorReport {
    pub fn healthy(&self) -> bool {
        self.runtime_error.is_none()
    }
}

pub fn format_doctor(report: &DoctorReport) -> String {
    let mut out = String::new();
    writeln!(&mut out, "\n{}", rule()).unwrap();
    writeln!(&mut out, "{}", "   sqlbox environment".yellow().bold()).unwrap();
    writeln!(&mut out, "{}", rule()).unwrap();

    match &report.runtime_error {
        None => writeln!(&mut out, "  Docker:     {}", "reachable".green()).unwrap(),
        Some(e) => writeln!(&mut out, "  Docker:     {} ({})", "unreachable".red(), e).unwrap(),
    }
    let image = match report.image_present {
        Some(true) => "present".green(),
        Some(false) => "missing (pulled on first provision)".yellow(),
        None => "unknown".dimmed(),
    };
    writeln!(&mut out, "  Image:      {} {}", report.image.cyan(), image).unwrap();
    writeln!(
        &mut out,
        "  Seeds:      {}",
        format!("{} tiers", report.seed_tiers).cyan()
    )
    .unwrap();
    writeln!(&mut out, "{}", rule()).unwrap();
    out
}
