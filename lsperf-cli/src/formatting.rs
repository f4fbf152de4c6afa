//! Output Formatting
//!
//! Human-readable terminal output for a run's comparison outcomes:
//! - one block per package/toolchain with a verdict icon
//! - every metric with before/after values and significance
//! - notes for crashes, time limits and noisy measurements

use lsperf_logic::{ComparisonOutcome, OverallChange, Significance};
use lsperf_report::Operation;
use lsperf_stats::NOISY_CV_THRESHOLD;

fn verdict_icon(change: Option<OverallChange>) -> &'static str {
    match change {
        None => "•",
        Some(c) if c == OverallChange::MIXED => "±",
        Some(c) if c.is_worse() => "✗",
        Some(c) if c.is_better() => "✓",
        Some(_) => "=",
    }
}

fn significance_marker(significance: Option<Significance>) -> &'static str {
    match significance {
        Some(Significance::Alert) => "  ALERT",
        Some(Significance::Warning) => "  warning",
        Some(Significance::Awesome) => "  awesome",
        None => "",
    }
}

/// Format comparison outcomes for terminal display
pub fn format_human_output(outcomes: &[ComparisonOutcome], overall: Option<OverallChange>) -> String {
    let mut output = String::new();

    output.push('\n');
    output.push_str("lsperf Results\n");
    output.push_str(&"=".repeat(60));
    output.push_str("\n\n");

    for outcome in outcomes {
        let run = &outcome.after.summary.run;
        output.push_str(&format!(
            "{} {}@{} ({})",
            verdict_icon(outcome.change),
            run.package_name,
            run.package_version,
            run.toolchain_version
        ));
        match (&outcome.before, outcome.change) {
            (Some(before), Some(change)) => output.push_str(&format!(
                "  vs {}: {}\n",
                before.summary.run.toolchain_version, change
            )),
            _ => output.push_str("  (no baseline)\n"),
        }
        output.push_str(&"-".repeat(60));
        output.push('\n');

        let width = outcome
            .metrics
            .iter()
            .map(|m| m.metric.name.len())
            .max()
            .unwrap_or(20);

        for m in &outcome.metrics {
            let after = m
                .after
                .map(|v| m.metric.format.format(v))
                .unwrap_or_else(|| "n/a".to_string());
            match (&outcome.before, m.before) {
                (Some(_), before) => {
                    let before = before
                        .map(|v| m.metric.format.format(v))
                        .unwrap_or_else(|| "n/a".to_string());
                    let diff = m
                        .percent_diff
                        .map(|pd| format!("{:+.1}%", pd * 100.0))
                        .unwrap_or_default();
                    output.push_str(&format!(
                        "  {:<width$}  {:>14} → {:>14}  {:>8}{}\n",
                        m.metric.name,
                        before,
                        after,
                        diff,
                        significance_marker(m.significance),
                        width = width
                    ));
                }
                (None, _) => {
                    output.push_str(&format!(
                        "  {:<width$}  {:>14}\n",
                        m.metric.name,
                        after,
                        width = width
                    ));
                }
            }
        }

        if run.language_service_crashed {
            output.push_str("  note: the language service crashed on some positions\n");
        }
        if run.timed_out {
            output.push_str("  note: time limit reached before all trials finished\n");
        }
        if outcome.after.summary.batch.is_none() {
            output.push_str("  note: batch compile metrics unavailable\n");
        }
        for operation in Operation::ALL {
            if let Some(stat) = outcome.after.summary.operation(operation) {
                if stat.mean_coefficient_of_variation > NOISY_CV_THRESHOLD {
                    output.push_str(&format!(
                        "  note: {} timings are noisy (mean CV {:.0}%)\n",
                        operation.name(),
                        stat.mean_coefficient_of_variation * 100.0
                    ));
                }
            }
        }
        output.push('\n');
    }

    output.push_str(&format!(
        "Overall: {}\n",
        overall.map(|c| c.label()).unwrap_or("no verdict")
    ));
    output
}
