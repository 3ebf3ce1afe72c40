//! Rendering for plans, run reports and outputs

use crate::executor::{ActionOutcome, ApplyReport};
use crate::manifest::AttrMap;
use crate::outputs::OutputValue;
use crate::plan::{ActionKind, Plan, PlanSummary};
use owo_colors::OwoColorize;
use serde_json::Value;
use std::collections::BTreeMap;
use terminal_size::{terminal_size, Width};

/// Separator rule sized to the terminal, clamped for readability
fn rule() -> String {
    let width = terminal_size()
        .map(|(Width(w), _)| w as usize)
        .unwrap_or(50)
        .clamp(20, 80);
    "─".repeat(width)
}

/// Per-attribute difference between prior and desired maps
#[derive(Debug, Clone, PartialEq)]
pub enum AttrChange {
    Added(String, Value),
    Removed(String, Value),
    Modified(String, Value, Value),
}

/// Compute the attribute-level diff for an update
pub fn attr_changes(prior: &AttrMap, desired: &AttrMap) -> Vec<AttrChange> {
    let mut changes = Vec::new();

    for (key, value) in desired {
        match prior.get(key) {
            None => changes.push(AttrChange::Added(key.clone(), value.clone())),
            Some(old) if old != value => {
                changes.push(AttrChange::Modified(key.clone(), old.clone(), value.clone()));
            }
            Some(_) => {}
        }
    }

    for (key, value) in prior {
        if !desired.contains_key(key) {
            changes.push(AttrChange::Removed(key.clone(), value.clone()));
        }
    }

    changes
}

/// Render a full plan to the terminal
pub fn render_plan(plan: &Plan) {
    for action in &plan.actions {
        if action.kind == ActionKind::NoOp {
            continue;
        }

        let (r, g, b) = action.kind.color();
        println!(
            "\n{} {} ({}) {}",
            action.kind.symbol().truecolor(r, g, b).bold(),
            action.address.to_string().bright_white().bold(),
            action.resource_kind.truecolor(160, 160, 160),
            action.kind.label().truecolor(r, g, b)
        );

        match action.kind {
            ActionKind::Create => {
                if let Some(desired) = &action.desired {
                    for (key, value) in desired {
                        render_change(&AttrChange::Added(key.clone(), value.clone()));
                    }
                }
            }
            ActionKind::Update => {
                let empty = AttrMap::new();
                let prior = action.prior.as_ref().unwrap_or(&empty);
                let desired = action.desired.as_ref().unwrap_or(&empty);
                for change in attr_changes(prior, desired) {
                    render_change(&change);
                }
            }
            ActionKind::Destroy | ActionKind::NoOp => {}
        }
    }

    println!("\n{}", rule().truecolor(160, 160, 160));
    println!("{}", summary_line(&plan.summary).bright_white().bold());
    if plan.summary.unchanged > 0 {
        println!(
            "{}",
            format!("{} unchanged", plan.summary.unchanged).truecolor(160, 160, 160)
        );
    }
}

fn render_change(change: &AttrChange) {
    match change {
        AttrChange::Added(key, value) => {
            // Pastel mint green: RGB(152, 225, 152)
            println!(
                "    {} {} = {}",
                "+".truecolor(152, 225, 152),
                key.bright_white(),
                format_value(value).truecolor(152, 225, 152)
            );
        }
        AttrChange::Removed(key, value) => {
            // Pastel coral/salmon: RGB(255, 160, 160)
            println!(
                "    {} {} = {}",
                "-".truecolor(255, 160, 160),
                key.bright_white(),
                format_value(value).truecolor(255, 160, 160)
            );
        }
        AttrChange::Modified(key, old, new) => {
            // Pastel cream/yellow: RGB(255, 230, 160)
            println!(
                "    {} {} = {} {} {}",
                "~".truecolor(255, 230, 160),
                key.bright_white(),
                format_value(old).truecolor(160, 160, 160),
                "->".truecolor(160, 160, 160),
                format_value(new).truecolor(255, 230, 160)
            );
        }
    }
}

/// One-line plan summary
pub fn summary_line(summary: &PlanSummary) -> String {
    if !summary.has_changes() {
        return "No changes. The stack matches the recorded state.".to_string();
    }
    format!(
        "Plan: {} to add, {} to change, {} to destroy.",
        summary.to_add, summary.to_change, summary.to_destroy
    )
}

/// Render the outcome summary of an apply or destroy run
pub fn render_report(report: &ApplyReport) {
    println!();
    for (address, outcome) in &report.outcomes {
        match outcome {
            ActionOutcome::Succeeded | ActionOutcome::NoOp => {}
            ActionOutcome::Failed(message) => {
                println!(
                    "  {} {}: {}",
                    "✗".truecolor(255, 160, 160),
                    address.to_string().bright_white(),
                    message.truecolor(255, 160, 160)
                );
            }
            ActionOutcome::Blocked { failed_dependency } => {
                println!(
                    "  {} {}: blocked by {}",
                    "⚠".truecolor(255, 230, 160),
                    address.to_string().bright_white(),
                    failed_dependency.to_string().truecolor(255, 230, 160)
                );
            }
            ActionOutcome::Skipped => {
                println!(
                    "  {} {}: skipped",
                    "⚠".truecolor(255, 230, 160),
                    address.to_string().bright_white()
                );
            }
        }
    }

    println!("{}", rule().truecolor(160, 160, 160));
    println!("{}", report_line(report).bright_white().bold());
}

/// One-line run summary
pub fn report_line(report: &ApplyReport) -> String {
    let mut parts = vec![format!("{} applied", report.succeeded())];
    if report.unchanged() > 0 {
        parts.push(format!("{} unchanged", report.unchanged()));
    }
    if report.failed() > 0 {
        parts.push(format!("{} failed", report.failed()));
    }
    if report.blocked() > 0 {
        parts.push(format!("{} blocked", report.blocked()));
    }
    if report.skipped() > 0 {
        parts.push(format!("{} skipped", report.skipped()));
    }

    let prefix = if report.is_partial() {
        "Run incomplete:"
    } else {
        "Run complete:"
    };
    format!("{} {}", prefix, parts.join(", "))
}

/// Render aggregated outputs
pub fn render_outputs(outputs: &BTreeMap<String, OutputValue>) {
    if outputs.is_empty() {
        crate::output::dimmed("No outputs declared.");
        return;
    }

    for (name, output) in outputs {
        let rendered = match &output.value {
            Some(value) => format_value(value),
            None => "(not yet applied)".to_string(),
        };

        if output.stale {
            println!(
                "  {} {} {}",
                format!("{}:", name).truecolor(160, 160, 160),
                rendered.truecolor(120, 180, 195).bold(),
                "(stale)".truecolor(255, 230, 160)
            );
        } else {
            crate::output::key_value_highlight(name, &rendered);
        }

        if let Some(description) = &output.description {
            crate::output::dimmed(&format!("      {}", description));
        }
    }
}

/// Render a value for display: bare strings stay bare, everything else is
/// compact JSON
pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: serde_json::Value) -> AttrMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_rule_width_is_clamped() {
        let width = rule().chars().count();
        assert!((20..=80).contains(&width));
    }

    #[test]
    fn test_attr_changes_classifies_all_three_kinds() {
        let prior = attrs(json!({"keep": 1, "drop": 2, "change": "old"}));
        let desired = attrs(json!({"keep": 1, "change": "new", "add": true}));

        let changes = attr_changes(&prior, &desired);

        assert!(changes.contains(&AttrChange::Added("add".to_string(), json!(true))));
        assert!(changes.contains(&AttrChange::Removed("drop".to_string(), json!(2))));
        assert!(changes.contains(&AttrChange::Modified(
            "change".to_string(),
            json!("old"),
            json!("new")
        )));
        assert_eq!(changes.len(), 3);
    }

    #[test]
    fn test_summary_line_formats() {
        let summary = PlanSummary {
            to_add: 2,
            to_change: 1,
            to_destroy: 0,
            unchanged: 3,
        };
        assert_eq!(
            summary_line(&summary),
            "Plan: 2 to add, 1 to change, 0 to destroy."
        );

        let unchanged = PlanSummary {
            unchanged: 5,
            ..Default::default()
        };
        assert_eq!(
            summary_line(&unchanged),
            "No changes. The stack matches the recorded state."
        );
    }

    #[test]
    fn test_report_line_marks_partial_runs() {
        use crate::executor::ApplyReport;
        use crate::graph::Address;

        let mut report = ApplyReport::default();
        report.record(Address::from("a"), ActionOutcome::Succeeded);
        assert_eq!(report_line(&report), "Run complete: 1 applied");

        report.record(
            Address::from("b"),
            ActionOutcome::Failed("boom".to_string()),
        );
        assert_eq!(report_line(&report), "Run incomplete: 1 applied, 1 failed");
    }
}
