//! Markdown summaries written next to the corpus.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::export::{ExportResult, ModelExport};
use crate::handle::{HandleResult, ModelHandle};

/// Per-model outcome shown in reports and CLI output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Ok,
    Failed,
    /// A transformer failed and the original rows were kept.
    Fallback,
}

impl fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModelStatus::Ok => "ok",
            ModelStatus::Failed => "failed",
            ModelStatus::Fallback => "fallback",
        };
        f.pad(s)
    }
}

/// Human-readable size, binary units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for next in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{:.1} {}", value, unit)
}

fn app_of(label: &str) -> &str {
    label.split_once('.').map(|(app, _)| app).unwrap_or(label)
}

fn group_by_app<'a, T>(items: &'a [T], label: impl Fn(&T) -> &str) -> BTreeMap<String, Vec<&'a T>> {
    let mut groups: BTreeMap<String, Vec<&T>> = BTreeMap::new();
    for item in items {
        groups
            .entry(app_of(label(item)).to_string())
            .or_default()
            .push(item);
    }
    groups
}

/// Render `export_report.md`.
pub fn render_export_report(result: &ExportResult) -> String {
    let mut out = String::from("# Export report\n\n");
    out.push_str(&format!("- Started: {}\n", result.started_at.to_rfc3339()));
    out.push_str(&format!("- Output: {}\n", result.output.display()));
    out.push_str(&format!("- Models: {}\n", result.models.len()));
    out.push_str(&format!("- Rows exported: {}\n", result.rows_exported));
    if !result.failed_models.is_empty() {
        out.push_str(&format!("- Failed: {}\n", result.failed_models.join(", ")));
    }

    for (app, models) in group_by_app(&result.models, |m: &ModelExport| m.model.as_str()) {
        out.push_str(&format!("\n## {}\n\n", app));
        out.push_str("| Model | Rows | Filtered | Duration (s) | Size | Status |\n");
        out.push_str("|---|---:|---:|---:|---:|---|\n");
        for m in models {
            out.push_str(&format!(
                "| {} | {} | {} | {:.2} | {} | {} |\n",
                m.model,
                m.rows,
                m.filtered,
                m.duration_seconds,
                format_bytes(m.bytes),
                m.status
            ));
        }
    }

    let errors: Vec<&ModelExport> = result.models.iter().filter(|m| m.error.is_some()).collect();
    if !errors.is_empty() {
        out.push_str("\n## Errors\n\n");
        for m in errors {
            out.push_str(&format!(
                "- {}: {}\n",
                m.model,
                m.error.as_deref().unwrap_or_default()
            ));
        }
    }
    out
}

/// Render `handle_report.md`.
pub fn render_handle_report(result: &HandleResult) -> String {
    let mut out = String::from("# Handle report\n\n");
    out.push_str(&format!("- Started: {}\n", result.started_at.to_rfc3339()));
    out.push_str(&format!("- Input: {}\n", result.input.display()));
    out.push_str(&format!("- Output: {}\n", result.output.display()));
    out.push_str(&format!("- Split by business: {}\n", result.split_by_biz));
    if result.dry_run {
        out.push_str("- Dry run: nothing was written\n");
    }
    if !result.fallback_models.is_empty() {
        out.push_str(&format!(
            "- Original rows kept: {}\n",
            result.fallback_models.join(", ")
        ));
    }

    for (app, models) in group_by_app(&result.models, |m: &ModelHandle| m.model.as_str()) {
        out.push_str(&format!("\n## {}\n\n", app));
        out.push_str("| Model | Rows in | Rows out | Filtered | Excluded | Buckets | Status |\n");
        out.push_str("|---|---:|---:|---:|---:|---|---|\n");
        for m in models {
            let buckets = m
                .buckets
                .iter()
                .map(|(bucket, rows)| format!("{}: {}", bucket, rows))
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} | {} |\n",
                m.model, m.rows_in, m.rows_out, m.filtered, m.excluded, buckets, m.status
            ));
        }
    }

    let errors: Vec<&ModelHandle> = result.models.iter().filter(|m| m.error.is_some()).collect();
    if !errors.is_empty() {
        out.push_str("\n## Errors\n\n");
        for m in errors {
            out.push_str(&format!(
                "- {}: {}\n",
                m.model,
                m.error.as_deref().unwrap_or_default()
            ));
        }
    }
    out
}
