use colored::*;
use framewalk::{ItemStatus, RunReport};

pub fn print_report(report: &RunReport) {
    println!();
    if let Some(title) = &report.title {
        println!("{} {}", "Title:".green(), title.cyan());
    }
    if let Some(error) = &report.enumeration_error {
        println!("{} {}", "Enumeration failed:".red().bold(), error);
        return;
    }

    for item in &report.items {
        let line = match &item.status {
            ItemStatus::Downloaded(path) => {
                format!("{} {}", "downloaded".green(), path.display())
            }
            ItemStatus::Skipped(path) => {
                format!("{} {} (already present)", "skipped".yellow(), path.display())
            }
            ItemStatus::Unresolved { reason, screenshot } => {
                let reason = reason.as_ref().map(ToString::to_string).unwrap_or_default();
                match screenshot {
                    Some(shot) => format!(
                        "{} {} (screenshot: {})",
                        "unresolved".red(),
                        reason,
                        shot.display()
                    ),
                    None => format!("{} {}", "unresolved".red(), reason),
                }
            }
            ItemStatus::TranscodeFailed(error) => format!("{} {}", "ffmpeg failed".red(), error),
        };
        println!("  {:<10} {}", item.label.bold(), line);
    }

    let summary = report.to_string();
    if report.is_failure() || report.cancelled {
        println!("{} {}", "Result:".red().bold(), summary);
    } else {
        println!("{} {}", "Result:".green().bold(), summary);
    }
}
