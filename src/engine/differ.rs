//! Plan display

use crate::ui;
use colored::{ColoredString, Colorize};
use converge::{Action, DiffSummary, FieldChange, PlannedChange, group_by_kind};
use similar::{ChangeTag, TextDiff};

const VALUE_WIDTH: usize = 48;

fn action_symbol(action: Action) -> ColoredString {
    match action {
        Action::Create => "+".green(),
        Action::Update => "~".yellow(),
        Action::Delete => "-".red(),
        Action::NoChange => " ".normal(),
    }
}

/// Lines describing one field change. Multi-line values get a line diff.
pub fn field_lines(change: &FieldChange) -> Vec<String> {
    match &change.actual {
        None => vec![format!(
            "{}: {}",
            change.field,
            ui::truncate(&change.expected, VALUE_WIDTH)
        )],
        Some(actual) if actual.contains('\n') || change.expected.contains('\n') => {
            let mut lines = vec![format!("{}:", change.field)];
            let diff = TextDiff::from_lines(actual.as_str(), change.expected.as_str());
            for line in diff.iter_all_changes() {
                let sign = match line.tag() {
                    ChangeTag::Delete => "-",
                    ChangeTag::Insert => "+",
                    ChangeTag::Equal => continue,
                };
                lines.push(format!("  {sign} {}", line.value().trim_end()));
            }
            lines
        }
        Some(actual) => vec![format!(
            "{}: {} → {}",
            change.field,
            ui::truncate(actual, VALUE_WIDTH),
            ui::truncate(&change.expected, VALUE_WIDTH)
        )],
    }
}

/// Display planned changes grouped by task kind
pub fn display_plan(changes: &[PlannedChange]) {
    if changes.is_empty() {
        println!();
        println!("  {} No changes needed", "✓".green());
        return;
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Cluster Plan".bold()
    );
    println!("│");

    for (kind, kind_changes) in group_by_kind(changes) {
        println!("│ {}", kind.bold());
        for change in kind_changes {
            println!(
                "│   {} {:<32} {}",
                action_symbol(change.action),
                change.key.name,
                change.action.to_string().dimmed()
            );
            // creates list every field; only show them when there are few
            if change.action == Action::Update || change.changes.len() <= 3 {
                for field in change.changes.iter() {
                    for line in field_lines(field) {
                        println!("│       {}", line.dimmed());
                    }
                }
            }
        }
        println!("│");
    }

    let summary = DiffSummary::from_changes(changes);
    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Summary: {} to create, {} to update, {} to delete",
        summary.additions.to_string().green(),
        summary.modifications.to_string().yellow(),
        summary.removals.to_string().red()
    );
    println!("└─────────────────────────────────────────────────────┘");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_field_line() {
        let change = FieldChange {
            field: "cidr".to_string(),
            actual: None,
            expected: "10.0.0.0/16".to_string(),
        };
        assert_eq!(field_lines(&change), vec!["cidr: 10.0.0.0/16"]);
    }

    #[test]
    fn test_update_field_line() {
        let change = FieldChange {
            field: "max_size".to_string(),
            actual: Some("4".to_string()),
            expected: "6".to_string(),
        };
        assert_eq!(field_lines(&change), vec!["max_size: 4 → 6"]);
    }

    #[test]
    fn test_multiline_values_are_line_diffed() {
        let change = FieldChange {
            field: "definition".to_string(),
            actual: Some("[Unit]\nRestart=always\n".to_string()),
            expected: "[Unit]\nRestart=on-failure\n".to_string(),
        };
        assert_eq!(
            field_lines(&change),
            vec![
                "definition:",
                "  - Restart=always",
                "  + Restart=on-failure"
            ]
        );
    }
}
