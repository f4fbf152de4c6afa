//! Markdown Rendering
//!
//! A notification-ready table for a [`ComparisonOutcome`]. Posting it anywhere
//! is the caller's business.

use crate::compare::{ComparedMetric, ComparisonOutcome};
use crate::significance::Significance;
use std::fmt::Write;

fn significance_cell(significance: Option<Significance>) -> &'static str {
    match significance {
        Some(Significance::Alert) => "🔥 alert",
        Some(Significance::Warning) => "⚠️ warning",
        Some(Significance::Awesome) => "✨ awesome",
        None => "",
    }
}

fn value_cell(metric: &ComparedMetric, value: Option<f64>) -> String {
    value
        .map(|v| metric.metric.format.format(v))
        .unwrap_or_else(|| "n/a".to_string())
}

fn diff_cell(metric: &ComparedMetric) -> String {
    match metric.percent_diff {
        Some(pd) => format!("{:+.1}%", pd * 100.0),
        None => "n/a".to_string(),
    }
}

/// Render the comparison as a Markdown section
pub fn render_markdown(outcome: &ComparisonOutcome) -> String {
    let run = &outcome.after.summary.run;
    let mut out = String::new();

    let _ = writeln!(
        out,
        "### {}@{} ({})",
        run.package_name, run.package_version, run.toolchain_version
    );
    out.push('\n');

    match (&outcome.before, outcome.change) {
        (Some(before), Some(change)) => {
            let _ = writeln!(
                out,
                "Compared against toolchain {}: **{}**",
                before.summary.run.toolchain_version, change
            );
        }
        _ => {
            let _ = writeln!(out, "No comparable baseline; single-run results.");
        }
    }
    out.push('\n');

    if outcome.before.is_some() {
        out.push_str("| Metric | Before | After | Diff | |\n");
        out.push_str("|---|---:|---:|---:|---|\n");
        for m in &outcome.metrics {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} |",
                m.metric.name,
                value_cell(m, m.before),
                value_cell(m, m.after),
                diff_cell(m),
                significance_cell(m.significance)
            );
        }
    } else {
        out.push_str("| Metric | Value |\n");
        out.push_str("|---|---:|\n");
        for m in &outcome.metrics {
            let _ = writeln!(out, "| {} | {} |", m.metric.name, value_cell(m, m.after));
        }
    }

    let mut flags = Vec::new();
    if run.language_service_crashed {
        flags.push("the language service crashed on some positions");
    }
    if run.timed_out {
        flags.push("the run hit its time limit before all trials finished");
    }
    if outcome.after.summary.batch.is_none() {
        flags.push("the batch compile did not finish, so type and cache sizes are missing");
    }
    if !flags.is_empty() {
        out.push('\n');
        for flag in flags {
            let _ = writeln!(out, "> Note: {flag}.");
        }
    }

    if let Some(worst) = outcome.after.summary.completions.as_ref().map(|s| &s.worst) {
        let _ = writeln!(
            out,
            "\nSlowest completions position: `{}` at {}:{}:{}",
            worst.identifier_text, worst.file, worst.line, worst.column
        );
    }

    out
}
