//! Status command - show ledger entries and the live release

use super::Settings;
use crate::cli::args::{OutputFormat, StatusArgs};
use crate::error::KeelResult;
use crate::ledger::{ClaimStatus, HistoryRecord, Ledger, LedgerEntry};
use crate::release::ReleaseManager;
use crate::store::Store;
use crate::ui::{self, UiContext};
use console::style;
use serde::Serialize;

#[derive(Serialize)]
struct StatusReport<'a> {
    latest: Option<String>,
    entries: &'a [LedgerEntry],
}

/// Execute the status command
pub async fn execute(args: StatusArgs, settings: &Settings) -> KeelResult<()> {
    let ledger = Ledger::new(Store::open(settings.paths.db_path()?)?);

    if let Some(sha) = &args.sha {
        let history = ledger.history(sha)?;
        return match args.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&history)?);
                Ok(())
            }
            OutputFormat::Plain => {
                for record in &history {
                    println!(
                        "{}\t{}\t{}\t{}",
                        record.group, record.event, record.status, record.recorded_at
                    );
                }
                Ok(())
            }
            OutputFormat::Table => {
                print_history(sha, &history);
                Ok(())
            }
        };
    }

    let latest = ReleaseManager::new(settings.paths.builds_path()?).current()?;
    let entries = ledger.list(args.limit)?;

    match args.format {
        OutputFormat::Json => {
            let report = StatusReport {
                latest,
                entries: &entries,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Plain => {
            for entry in &entries {
                println!("{}\t{}\t{}", entry.sha, entry.group, entry.status);
            }
        }
        OutputFormat::Table => print_table(latest.as_deref(), &entries),
    }

    Ok(())
}

fn styled_status(status: ClaimStatus) -> console::StyledObject<&'static str> {
    match status {
        ClaimStatus::Claimed => style("claimed").yellow(),
        ClaimStatus::Succeeded => style("succeeded").green(),
        ClaimStatus::Failed => style("failed").red(),
    }
}

fn print_table(latest: Option<&str>, entries: &[LedgerEntry]) {
    let ctx = UiContext::detect();
    ui::section(&ctx, "Ledger");

    match latest {
        Some(sha) => ui::key_value_status(&ctx, "latest", sha, true),
        None => ui::key_value_status(&ctx, "latest", "none", false),
    }
    println!();

    if entries.is_empty() {
        ui::step_info(&ctx, "No ledger entries");
        return;
    }

    println!(
        "{:<12} {:<8} {:<10} {:<20} {:<12} {:<17}",
        style("SHA").bold(),
        style("GROUP").bold(),
        style("STATUS").bold(),
        style("REF").bold(),
        style("ACTOR").bold(),
        style("FINISHED").bold()
    );
    println!("{}", "-".repeat(82));

    for entry in entries {
        let short = entry.sha.get(..12).unwrap_or(&entry.sha);
        let marker = if latest == Some(entry.sha.as_str()) { "*" } else { "" };
        let finished = entry
            .finished_at
            .map(|ts| ts.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{:<12} {:<8} {:<10} {:<20} {:<12} {:<17}",
            format!("{short}{marker}"),
            entry.group,
            styled_status(entry.status),
            entry.reference,
            entry.actor,
            finished
        );
    }

    println!();
    println!("{} entr{}", entries.len(), if entries.len() == 1 { "y" } else { "ies" });
}

fn print_history(sha: &str, history: &[HistoryRecord]) {
    let ctx = UiContext::detect();
    ui::section(&ctx, &format!("History of {sha}"));

    if history.is_empty() {
        ui::step_info(&ctx, "No recorded transitions");
        return;
    }

    for record in history {
        println!(
            "  {:<26} {:<8} {:<10} {:<10} {}",
            record.recorded_at,
            record.group,
            record.event,
            styled_status(record.status),
            style(&record.actor).dim()
        );
    }
}
