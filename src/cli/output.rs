//! CLI output formatting

use crate::{
    core::{ClusterOutcome, HostState},
    execution::{ExecutionEvent, HostReport, RunReport},
    persistence::RunSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Create a progress bar counting finished stages
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Horizontal rule as wide as the terminal
pub fn separator() -> String {
    let width = term_size::dimensions_stdout().map(|(w, _)| w).unwrap_or(80);
    "─".repeat(width.min(120))
}

/// Format a cluster outcome for display
pub fn format_outcome(outcome: ClusterOutcome) -> String {
    match outcome {
        ClusterOutcome::Ready => style("READY").green().to_string(),
        ClusterOutcome::Degraded => style("DEGRADED").yellow().to_string(),
        ClusterOutcome::Failed => style("FAILED").red().to_string(),
    }
}

fn outcome_icon(outcome: ClusterOutcome) -> Emoji<'static, 'static> {
    match outcome {
        ClusterOutcome::Ready => CHECK,
        ClusterOutcome::Degraded => WARN,
        ClusterOutcome::Failed => CROSS,
    }
}

/// Whether an event marks a stage as finished (for progress counting)
pub fn finishes_stage(event: &ExecutionEvent) -> bool {
    matches!(
        event,
        ExecutionEvent::StageReady { .. }
            | ExecutionEvent::StageTimedOut { .. }
            | ExecutionEvent::StageAborted { .. }
    )
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunStarted {
            run_id,
            cluster,
            hosts,
            stages,
        } => format!(
            "{}Provisioning {} ({} hosts, {} stages) ({})",
            ROCKET,
            style(cluster).bold(),
            hosts,
            stages,
            style(&run_id.to_string()[..8]).dim()
        ),
        ExecutionEvent::HostStateChanged { host, to, .. } => {
            let state = match to {
                HostState::Ready => style(to).green(),
                HostState::Failed => style(to).red(),
                _ => style(to).dim(),
            };
            format!("{}{} is {}", INFO, style(host).bold(), state)
        }
        ExecutionEvent::StageStarted { host, stage } => {
            format!("{}{} {}", SPINNER, style(host).dim(), style(stage).cyan())
        }
        ExecutionEvent::AttemptFailed {
            host,
            stage,
            attempt,
            max_attempts,
            error,
        } => format!(
            "{}{} {} (attempt {}/{}): {}",
            WARN,
            style(host).dim(),
            style(stage).yellow(),
            attempt,
            max_attempts,
            style(error).dim()
        ),
        ExecutionEvent::StageReady {
            host,
            stage,
            attempts,
        } => format!(
            "{}{} {} {}",
            CHECK,
            style(host).dim(),
            style(stage).green(),
            style(format!("({} attempt(s))", attempts)).dim()
        ),
        ExecutionEvent::StageTimedOut {
            host,
            stage,
            attempts,
            critical,
        } => {
            if *critical {
                format!(
                    "{}{} {} timed out after {} attempt(s)",
                    CROSS,
                    style(host).dim(),
                    style(stage).red(),
                    attempts
                )
            } else {
                format!(
                    "{}{} {} timed out after {} attempt(s), continuing",
                    WARN,
                    style(host).dim(),
                    style(stage).yellow(),
                    attempts
                )
            }
        }
        ExecutionEvent::StageAborted { host, stage, reason } => format!(
            "{}{} {} aborted: {}",
            CROSS,
            style(host).dim(),
            style(stage).red(),
            style(reason).dim()
        ),
        ExecutionEvent::ArtifactPublished { host, point } => format!(
            "{}{} published {}",
            INFO,
            style(host).dim(),
            style(point).cyan()
        ),
        ExecutionEvent::CleanupRan {
            host,
            stage,
            success,
        } => format!(
            "{}{} {} cleanup {}",
            INFO,
            style(host).dim(),
            style(stage).dim(),
            if *success { "done" } else { "failed" }
        ),
        ExecutionEvent::RunCompleted { run_id, outcome } => format!(
            "{}Run ({}) finished: {}",
            outcome_icon(*outcome),
            style(&run_id.to_string()[..8]).dim(),
            format_outcome(*outcome)
        ),
    }
}

/// Format a host's status line with an icon
pub fn format_host_report(report: &HostReport) -> String {
    let icon = match (report.is_ready(), report.warnings.is_empty()) {
        (true, true) => CHECK,
        (true, false) => WARN,
        (false, _) => CROSS,
    };
    format!("{}{}", icon, report.status_line())
}

/// Format the end-of-run summary
pub fn format_run_report(report: &RunReport) -> String {
    let mut lines = vec![
        separator(),
        format!(
            "{}{} {} in {}",
            outcome_icon(report.outcome),
            style(&report.cluster).bold(),
            format_outcome(report.outcome),
            format_duration(report.elapsed)
        ),
    ];
    lines.extend(report.hosts().map(|host| format!("  {}", format_host_report(host))));
    if let Some(error) = &report.error {
        lines.push(format!("  {}", style(error).red()));
    }
    lines.join("\n")
}

/// Format run summary for history display
pub fn format_run_summary(summary: &RunSummary) -> String {
    format!(
        "{}{} - {} - {} ({}/{} hosts ready) - {}",
        outcome_icon(summary.outcome),
        style(&summary.run_id.to_string()[..8]).dim(),
        style(&summary.cluster_name).bold(),
        format_outcome(summary.outcome),
        summary.hosts_ready,
        summary.hosts_total,
        style(summary.started_at.format("%Y-%m-%d %H:%M:%S")).dim()
    )
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{:.1}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
