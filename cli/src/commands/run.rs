use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use autojournal_core::entry_points::EntryPoint;
use autojournal_core::models::{SummaryReport, SyncReport, TimeRange};
use autojournal_core::service::{AutojournalService, RunOutcome};

use super::helpers::{print_json, truncate};

pub(crate) fn cmd_run(
    svc: &AutojournalService,
    entry: EntryPoint,
    today: NaiveDate,
    json: bool,
) -> Result<()> {
    let outcome = svc.run(entry, today)?;

    if json {
        return print_json(&outcome);
    }
    match &outcome {
        RunOutcome::Sync(report) => print_sync_report(report),
        RunOutcome::Summary(report) => print_summary_report(report),
        RunOutcome::FoodDb { created: true } => {
            println!("Created the food database table.");
            println!("Add foods with `autojournal food-db add` or `autojournal food-db import`.");
        }
        RunOutcome::FoodDb { created: false } => {
            println!("Food database table already exists; nothing changed.");
        }
    }
    Ok(())
}

/// `summarize-food` with an explicit window.
pub(crate) fn cmd_summarize_window(
    svc: &AutojournalService,
    window: TimeRange,
    today: NaiveDate,
    json: bool,
) -> Result<()> {
    let report = svc.summarize_food(Some(window), today)?;
    if json {
        return print_json(&report);
    }
    print_summary_report(&report);
    Ok(())
}

fn print_sync_report(report: &SyncReport) {
    let window = &report.window;
    println!("Synced {window}\n");
    println!("  Inserted:   {}", report.inserted);
    println!("  Updated:    {}", report.updated);
    println!("  Unchanged:  {}", report.unchanged);
    println!("  Preserved:  {}", report.preserved);
    if report.superseded > 0 {
        println!("  Superseded: {}", report.superseded);
    }
    println!("  Unresolved: {}", report.unresolved);

    for failure in &report.provider_failures {
        eprintln!("Warning: provider {} failed: {}", failure.provider, failure.message);
    }
    for rejected in &report.rejected {
        let id = rejected.native_id.as_deref().unwrap_or("-");
        eprintln!("Warning: rejected {}/{id}: {}", rejected.provider, rejected.reason);
    }
}

fn print_summary_report(report: &SummaryReport) {
    let Some(window) = &report.window else {
        println!("Every food date is already summarized.");
        return;
    };
    println!("Summarized {window}\n");
    println!("  Days written:     {}", report.days_written);
    println!("  Days cleared:     {}", report.days_cleared);
    println!("  Entries resolved: {}", report.entries_resolved);
    println!("  Unresolved:       {}", report.unresolved_count());

    for u in &report.unresolved {
        let food = u.food.as_deref().unwrap_or("?");
        eprintln!("Warning: {} {food}: {}", u.date, u.reason);
    }
}

pub(crate) fn cmd_providers(svc: &AutojournalService, json: bool) -> Result<()> {
    #[derive(Tabled, Serialize)]
    struct ProviderRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Category")]
        category: String,
        #[tabled(rename = "Table")]
        table: String,
        #[tabled(rename = "Earliest")]
        earliest: String,
    }

    let rows: Vec<ProviderRow> = svc
        .providers()
        .iter()
        .map(|p| ProviderRow {
            id: p.id().to_string(),
            category: p.category().to_string(),
            table: p.category().table_name().to_string(),
            earliest: match p.earliest_date() {
                Ok(Some(d)) => d.to_string(),
                Ok(None) => "-".into(),
                Err(e) => truncate(&format!("error: {e}"), 40),
            },
        })
        .collect();

    if json {
        return print_json(&rows);
    }
    if rows.is_empty() {
        eprintln!("No providers configured. Add [[providers]] to the config file.");
        return Ok(());
    }

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}
