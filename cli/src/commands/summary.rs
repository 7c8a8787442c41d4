use std::collections::BTreeSet;

use anyhow::{Result, bail};
use chrono::NaiveDate;
use tabled::{
    Table, Tabled,
    builder::Builder,
    settings::{Alignment, Modify, Style, object::Columns},
};

use autojournal_core::models::TimeRange;
use autojournal_core::service::AutojournalService;

use super::helpers::{format_amount, print_json, truncate};

/// Stored daily food summaries for the last `days` days.
pub(crate) fn cmd_summary(
    svc: &AutojournalService,
    days: u32,
    today: NaiveDate,
    json: bool,
) -> Result<()> {
    if days == 0 {
        bail!("--days must be at least 1");
    }
    let window = TimeRange::trailing(today, days - 1);
    let summaries = svc.daily_summaries(&window)?;

    if json {
        return print_json(&summaries);
    }
    if summaries.is_empty() {
        eprintln!("No food summaries in the last {days} days. Run `autojournal summarize-food`.");
        return Ok(());
    }

    // One column per nutrient seen anywhere in the window.
    let nutrients: BTreeSet<&str> = summaries
        .iter()
        .flat_map(|s| s.nutrients.keys().map(String::as_str))
        .collect();

    let mut builder = Builder::default();
    let mut header = vec!["Date".to_string(), "Entries".to_string()];
    header.extend(nutrients.iter().map(|n| (*n).to_string()));
    header.push("Unresolved".to_string());
    builder.push_record(header);

    for s in &summaries {
        let mut record = vec![s.date.to_string(), s.entry_count.to_string()];
        record.extend(
            nutrients
                .iter()
                .map(|n| s.nutrients.get(*n).map_or("-".into(), |v| format_amount(*v))),
        );
        record.push(s.unresolved_count.to_string());
        builder.push_record(record);
    }

    let table = builder
        .build()
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

/// Recently finished runs, newest first.
pub(crate) fn cmd_history(svc: &AutojournalService, limit: u32, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct RunRow {
        #[tabled(rename = "#")]
        id: i64,
        #[tabled(rename = "Operation")]
        operation: String,
        #[tabled(rename = "Window")]
        window: String,
        #[tabled(rename = "Result")]
        result: String,
        #[tabled(rename = "Finished")]
        finished: String,
    }

    let runs = svc.recent_runs(i64::from(limit))?;

    if json {
        return print_json(&runs);
    }
    if runs.is_empty() {
        eprintln!("No runs recorded yet");
        return Ok(());
    }

    let rows: Vec<RunRow> = runs
        .iter()
        .map(|r| RunRow {
            id: r.id,
            operation: r.operation.clone(),
            window: match (&r.window_start, &r.window_end) {
                (Some(s), Some(e)) if s == e => s.clone(),
                (Some(s), Some(e)) => format!("{s}..={e}"),
                _ => "-".into(),
            },
            result: truncate(&describe_report(&r.report), 60),
            finished: r.finished_at.chars().take(19).collect(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::single(0)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}

/// One-line description of a stored run report.
fn describe_report(report: &serde_json::Value) -> String {
    let count = |key: &str| report.get(key).and_then(serde_json::Value::as_u64);
    if let Some(inserted) = count("inserted") {
        format!(
            "+{inserted} ~{} ={} unresolved {}",
            count("updated").unwrap_or(0),
            count("unchanged").unwrap_or(0),
            count("unresolved").unwrap_or(0)
        )
    } else if let Some(days) = count("days_written") {
        let unresolved = report
            .get("unresolved")
            .and_then(serde_json::Value::as_array)
            .map_or(0, Vec::len);
        format!("{days} days, {unresolved} unresolved")
    } else if let Some(created) = report.get("created").and_then(serde_json::Value::as_bool) {
        if created { "created" } else { "already existed" }.to_string()
    } else {
        report.to_string()
    }
}
