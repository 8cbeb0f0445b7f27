//! Output formatting for CLI commands.
//!
//! This module renders previews, apply outcomes, infeasibility reports and
//! journal history as coloured text tables or as JSON.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::error::{ConvergeError, InfeasibleError};
use crate::journal::{ApplyStatus, ResourceRecord};
use crate::planner::{FieldDiff, OperationPlan, PlanStep};
use crate::reconciler::{ApplyOutcome, Preview};
use crate::schema::OperationName;

use super::commands::OutputFormat;

/// Maximum width of a value cell.
const VALUE_WIDTH: usize = 40;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan step row for table display.
#[derive(Tabled)]
struct StepRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Step")]
    step: String,
    #[tabled(rename = "Fields")]
    fields: String,
}

/// Field diff row for table display.
#[derive(Tabled)]
struct DiffRow {
    #[tabled(rename = "Field")]
    field: String,
    #[tabled(rename = "Current")]
    actual: String,
    #[tabled(rename = "Desired")]
    desired: String,
    #[tabled(rename = "Effect")]
    effect: String,
}

/// Journal entry row for table display.
#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "When")]
    timestamp: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Steps")]
    steps: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "Detail")]
    detail: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a dry-run preview.
    #[must_use]
    pub fn format_preview(&self, preview: &Preview, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(preview).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();
                let target = if preview.initial.is_some() {
                    "existing resource"
                } else {
                    "absent resource"
                };
                let _ = writeln!(output, "\nPlan for {} ({target})\n", preview.desired.kind());
                output.push_str(&Self::format_plan_text(&preview.plan));
                if detailed && !preview.plan.diffs.is_empty() {
                    output.push_str("\nField diffs:\n");
                    output.push_str(&Self::diff_table(&preview.plan.diffs));
                    output.push('\n');
                }
                output
            }
        }
    }

    /// Formats the result of an apply.
    #[must_use]
    pub fn format_outcome(&self, outcome: &ApplyOutcome) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(outcome).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = if outcome.mutated {
                    format!("{} Converged: {}\n", "✓".green(), outcome.plan.summary())
                } else {
                    format!("{} Already up to date\n", "✓".green())
                };
                let _ = writeln!(output, "   Attempts: {}", outcome.attempts);
                let _ = writeln!(output, "   Fingerprint: {}", short(&outcome.state.fingerprint()));
                if !outcome.informational.is_empty() {
                    let _ = write!(
                        output,
                        "\n{} {} informational diff(s):\n",
                        "ℹ".blue(),
                        outcome.informational.len()
                    );
                    output.push_str(&Self::diff_table(&outcome.informational));
                    output.push('\n');
                }
                output
            }
        }
    }

    /// Formats an error, with the offending diffs when there are any.
    #[must_use]
    pub fn format_error(&self, error: &ConvergeError) -> String {
        let diffs: &[FieldDiff] = match error {
            ConvergeError::Infeasible(InfeasibleError { diffs, .. })
            | ConvergeError::DiffAfterApply(crate::error::DiffAfterApplyError { diffs }) => diffs,
            _ => &[],
        };

        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "status": "error",
                    "message": error.to_string(),
                    "diffs": diffs,
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = format!("{} {error}\n", "✗".red());
                if !diffs.is_empty() {
                    output.push('\n');
                    output.push_str(&Self::diff_table(diffs));
                    output.push('\n');
                }
                output
            }
        }
    }

    /// Formats the journal of a resource handle.
    #[must_use]
    pub fn format_history(&self, record: &ResourceRecord, limit: usize) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(record).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = writeln!(output, "\nJournal: {}/{}\n", record.kind, record.handle);
                let _ = writeln!(output, "   Remote name: {}", record.name.as_deref().unwrap_or("-"));
                let _ = writeln!(
                    output,
                    "   Fingerprint: {}",
                    record.fingerprint.as_deref().map_or("-", short)
                );
                let _ = writeln!(output, "   Last updated: {}", record.last_updated);

                if record.history.is_empty() {
                    output.push_str("\n   No applies recorded.\n");
                    return output;
                }

                let rows: Vec<HistoryRow> = record
                    .history
                    .iter()
                    .rev()
                    .take(limit)
                    .map(|entry| HistoryRow {
                        timestamp: entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                        status: Self::format_status(entry.status),
                        steps: if entry.steps.is_empty() {
                            String::from("-")
                        } else {
                            entry.steps.join(", ")
                        },
                        attempts: entry.attempts,
                        detail: entry
                            .error
                            .as_deref()
                            .map_or_else(String::new, |e| truncate(e, VALUE_WIDTH)),
                    })
                    .collect();
                output.push('\n');
                output.push_str(&Table::new(rows).to_string());
                output.push('\n');
                output
            }
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &OperationPlan) -> String {
        if plan.is_empty() {
            return format!(
                "{} No changes required - resource is up to date.\n",
                "✓".green()
            );
        }

        let rows: Vec<StepRow> = plan
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| StepRow {
                index: i + 1,
                step: Self::format_step(step),
                fields: step
                    .field_mask()
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            })
            .collect();

        let mut output = Table::new(rows).to_string();
        output.push('\n');
        let informational = plan.informational().count();
        if informational > 0 {
            let _ = writeln!(
                output,
                "\n{informational} informational diff(s) need no remote call."
            );
        }
        output
    }

    fn diff_table(diffs: &[FieldDiff]) -> String {
        let rows: Vec<DiffRow> = diffs
            .iter()
            .map(|d| DiffRow {
                field: d.field_name.to_string(),
                actual: truncate(&d.actual.to_string(), VALUE_WIDTH),
                desired: truncate(&d.desired.to_string(), VALUE_WIDTH),
                effect: Self::format_effect(d),
            })
            .collect();
        Table::new(rows).to_string()
    }

    /// Formats a plan step with color.
    fn format_step(step: &PlanStep) -> String {
        match step {
            PlanStep::Create => "+create".green().to_string(),
            PlanStep::Recreate { .. } => "-/+recreate".red().to_string(),
            PlanStep::Run { name, .. } => format!("~{name}").yellow().to_string(),
        }
    }

    /// Formats what a diff will cause, with color.
    fn format_effect(diff: &FieldDiff) -> String {
        if diff.requires_recreate {
            "recreate".red().to_string()
        } else if !diff.resulting_operations.is_empty() {
            let names: Vec<&str> = diff.resulting_operations.iter().map(OperationName::as_str).collect();
            names.join(", ").yellow().to_string()
        } else if diff.output_only {
            "output only".dimmed().to_string()
        } else {
            "no operation".dimmed().to_string()
        }
    }

    fn format_status(status: ApplyStatus) -> String {
        match status {
            ApplyStatus::Converged => "converged".green().to_string(),
            ApplyStatus::Unchanged => "unchanged".dimmed().to_string(),
            ApplyStatus::Failed => "failed".red().to_string(),
        }
    }
}

/// First twelve characters of a fingerprint.
fn short(fingerprint: &str) -> &str {
    fingerprint.get(..12).unwrap_or(fingerprint)
}

/// Truncates a string to at most `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InfeasibleReason;
    use crate::planner::{LifecyclePolicy, OperationPlanner};
    use crate::resource::{FieldPath, Resource, Value};

    fn diff(path: &str, operation: Option<&str>, recreate: bool) -> FieldDiff {
        FieldDiff {
            field_name: FieldPath::parse(path),
            desired: Value::from("bar"),
            actual: Value::from("foo"),
            requires_recreate: recreate,
            resulting_operations: operation.into_iter().map(OperationName::new).collect(),
            output_only: false,
        }
    }

    fn preview() -> Preview {
        let plan = OperationPlanner::plan(
            vec![diff("displayName", Some("Update"), false), diff("testingOptions.testingScore", None, false)],
            true,
            &LifecyclePolicy::default(),
        )
        .expect("plan");
        Preview {
            initial: Some(Resource::new("Key").with("displayName", "foo")),
            desired: Resource::new("Key").with("displayName", "bar"),
            plan,
        }
    }

    #[test]
    fn test_preview_text_lists_steps_and_diffs() {
        let text = OutputFormatter::new(OutputFormat::Text).format_preview(&preview(), true);
        assert!(text.contains("Update"));
        assert!(text.contains("displayName"));
        assert!(text.contains("testingOptions.testingScore"));
        assert!(text.contains("1 informational diff(s)"));
    }

    #[test]
    fn test_preview_json() {
        let json = OutputFormatter::new(OutputFormat::Json).format_preview(&preview(), false);
        let value: serde_json::Value = serde_json::from_str(&json).expect("json");
        assert_eq!(value["desired"]["displayName"], "bar");
        assert_eq!(value["plan"]["steps"][0]["step"], "run");
    }

    #[test]
    fn test_infeasible_error_shows_diffs() {
        let error = ConvergeError::from(InfeasibleError::with_diffs(
            InfeasibleReason::RequiresRecreation,
            vec![diff("webSettings", None, true)],
        ));
        let json = OutputFormatter::new(OutputFormat::Json).format_error(&error);
        let value: serde_json::Value = serde_json::from_str(&json).expect("json");
        assert_eq!(value["diffs"][0]["field_name"], "webSettings");

        let text = OutputFormatter::new(OutputFormat::Text).format_error(&error);
        assert!(text.contains("webSettings"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééééééééé", 6), "ééé...");
    }
}
