//! CLI output formatting

use crate::core::error::PipelineError;
use crate::core::state::{NodeExit, NodeSummary, Outcome, RunReport};
use crate::core::value::Value;
use crate::execution::GraphEvent;
use console::Emoji;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Render one output value as a line of text
pub fn format_value(value: &Value, json: bool) -> String {
    if json {
        serde_json::to_string(value).unwrap_or_else(|_| value.to_text())
    } else {
        value.to_text()
    }
}

/// Format a node exit for display
pub fn format_exit(exit: &NodeExit) -> String {
    match exit {
        NodeExit::Completed => style("COMPLETED").green().to_string(),
        NodeExit::StoppedEarly => style("STOPPED EARLY").green().to_string(),
        NodeExit::Failed(_) => style("FAILED").red().to_string(),
        NodeExit::UpstreamFailed(_) => style("UPSTREAM FAILED").yellow().to_string(),
        NodeExit::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

pub fn format_node_summary(summary: &NodeSummary) -> String {
    format!(
        "  {} {} - {} value(s)",
        style(&summary.node).bold(),
        format_exit(&summary.exit),
        style(summary.sent).cyan()
    )
}

/// Format a run event for display
pub fn format_graph_event(event: &GraphEvent) -> String {
    match event {
        GraphEvent::RunStarted { run_id, nodes } => format!(
            "{} Starting run {} ({})",
            ROCKET,
            style(&run_id.to_string()[..8]).dim(),
            nodes
                .iter()
                .map(|n| n.name.as_str())
                .collect::<Vec<_>>()
                .join(" | ")
        ),
        GraphEvent::NodeOpened { node, .. } => {
            format!("{} {}", SPINNER, style(node).cyan())
        }
        GraphEvent::NodeClosed { node, sent, .. } => format!(
            "{} {} ({} value(s))",
            CHECK,
            style(node).green(),
            style(sent).dim()
        ),
        GraphEvent::NodeFailed { node, error, .. } => {
            format!("{} {}: {}", CROSS, style(node).red(), style(error).dim())
        }
        GraphEvent::RunFinished { run_id, outcome } => format!(
            "{} Run ({}) {}",
            INFO,
            style(&run_id.to_string()[..8]).dim(),
            format_outcome(outcome)
        ),
    }
}

pub fn format_outcome(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Success { emitted } => format!(
            "{} ({} value(s))",
            style("succeeded").green(),
            emitted
        ),
        Outcome::Failure { error, .. } => {
            format!("{}: {}", style("failed").red(), error)
        }
        Outcome::Cancelled { .. } => style("cancelled").yellow().to_string(),
    }
}

/// Multi-line failure report: the primary error, then any secondary errors
pub fn format_failure(error: &PipelineError, secondary: &[PipelineError]) -> String {
    let mut lines = vec![format!("{} {}", CROSS, style(error).red())];
    for other in secondary {
        lines.push(format!("  {} {}", WARN, style(other).dim()));
    }
    lines.join("\n")
}

/// Process exit code for a finished run
pub fn exit_code(report: &RunReport) -> i32 {
    match report.outcome {
        Outcome::Success { .. } => 0,
        Outcome::Failure { .. } => 1,
        Outcome::Cancelled { .. } => 130,
    }
}
