//! CLI output formatting

use crate::core::state::{ChildStatus, Condition, ConditionStatus, PipelineRunStatus};
use chrono::{DateTime, Utc};
use console::Emoji;
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Format a condition status for display
pub fn format_condition_status(status: Option<ConditionStatus>) -> String {
    match status {
        None => style("PENDING").dim().to_string(),
        Some(ConditionStatus::Unknown) => style("RUNNING").yellow().to_string(),
        Some(ConditionStatus::True) => style("SUCCEEDED").green().to_string(),
        Some(ConditionStatus::False) => style("FAILED").red().to_string(),
    }
}

fn icon(condition: Option<&Condition>) -> &'static Emoji<'static, 'static> {
    match condition.map(|c| c.status) {
        Some(ConditionStatus::True) => &CHECK,
        Some(ConditionStatus::False) => &CROSS,
        Some(ConditionStatus::Unknown) => &SPINNER,
        None => &INFO,
    }
}

/// One line for the run condition, with elapsed time when known
pub fn format_run_status(name: &str, status: &PipelineRunStatus) -> String {
    let condition = status.condition.as_ref();
    let mut line = format!(
        "{} {} - {}",
        icon(condition),
        style(name).bold(),
        format_condition_status(condition.map(|c| c.status))
    );
    if let Some(c) = condition {
        line.push_str(&format!(" ({})", style(&c.reason).cyan()));
    }
    if let Some(elapsed) = format_elapsed(status.start_time, status.completion_time.unwrap_or_else(Utc::now)) {
        line.push_str(&format!(" in {}", style(elapsed).dim()));
    }
    if let Some(c) = condition.filter(|c| !c.message.is_empty()) {
        line.push_str(&format!("\n  {}", style(&c.message).dim()));
    }
    line
}

/// One line per task, followed by its results
pub fn format_child_status(child: &ChildStatus) -> String {
    let condition = child.condition.as_ref();
    let finished = child.step_statuses.iter().filter(|s| s.is_terminated()).count();
    let mut out = format!(
        "  {} {} - {} ({}/{} steps)",
        icon(condition),
        style(&child.pipeline_task_name).cyan(),
        format_condition_status(condition.map(|c| c.status)),
        finished,
        child.step_statuses.len()
    );
    for result in &child.task_results {
        out.push_str(&format!(
            "\n      {} = {}",
            style(&result.name).bold(),
            style(result.value.trim_end()).dim()
        ));
    }
    out
}

/// Elapsed time rounded to whole seconds, if the run has started
pub fn format_elapsed(start: Option<DateTime<Utc>>, end: DateTime<Utc>) -> Option<String> {
    let elapsed = (end - start?).to_std().ok()?;
    Some(humantime::format_duration(Duration::from_secs(elapsed.as_secs())).to_string())
}
