use std::path::Path;

use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use crate::db::{Database, RunRecord};
use crate::engine::UpdateEngine;
use crate::entry_points::{EntryPoint, WindowPolicy};
use crate::error::{StoreError, SyncResult};
use crate::food_db;
use crate::models::{Category, DailyFoodSummary, FoodItem, SummaryReport, SyncReport, TimeRange};
use crate::provider::ProviderRegistry;
use crate::store::TabularStore;
use crate::summarizer::FoodSummarizer;

/// What one entry-point run produced.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    Sync(SyncReport),
    Summary(SummaryReport),
    FoodDb { created: bool },
}

/// Owns the store and the providers, and exposes the named operations.
pub struct AutojournalService {
    db: Database,
    providers: ProviderRegistry,
    policy: WindowPolicy,
}

impl AutojournalService {
    pub fn new(db_path: &Path, providers: ProviderRegistry, policy: WindowPolicy) -> Result<Self> {
        let db = Database::open(db_path)?;
        Ok(Self {
            db,
            providers,
            policy,
        })
    }

    pub fn new_in_memory(providers: ProviderRegistry, policy: WindowPolicy) -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db,
            providers,
            policy,
        })
    }

    #[must_use]
    pub fn db(&self) -> &Database {
        &self.db
    }

    #[must_use]
    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    #[must_use]
    pub fn policy(&self) -> &WindowPolicy {
        &self.policy
    }

    // --- Entry points ---

    pub fn run(&self, entry: EntryPoint, today: NaiveDate) -> SyncResult<RunOutcome> {
        info!(entry = %entry, %today, "running");
        match entry {
            EntryPoint::MakeNewFoodDbSheet => Ok(RunOutcome::FoodDb {
                created: self.make_new_food_db_sheet()?,
            }),
            EntryPoint::SummarizeFood => Ok(RunOutcome::Summary(self.summarize_food(None, today)?)),
            EntryPoint::AddToday => Ok(RunOutcome::Sync(self.add_today(today)?)),
            EntryPoint::AddLastWeek => Ok(RunOutcome::Sync(self.add_last_week(today)?)),
            EntryPoint::RegenerateAll => Ok(RunOutcome::Sync(self.regenerate_all(today)?)),
        }
    }

    pub fn add_today(&self, today: NaiveDate) -> SyncResult<SyncReport> {
        self.synchronize_as(EntryPoint::AddToday, self.policy.today_window(today))
    }

    pub fn add_last_week(&self, today: NaiveDate) -> SyncResult<SyncReport> {
        self.synchronize_as(EntryPoint::AddLastWeek, self.policy.last_week_window(today))
    }

    /// Re-ingest everything from the configured start through `today`.
    /// Nothing is wiped first; unchanged rows are left untouched.
    pub fn regenerate_all(&self, today: NaiveDate) -> SyncResult<SyncReport> {
        let earliest = self.earliest_known_date()?;
        let window = self.policy.regenerate_window(today, earliest)?;
        self.synchronize_as(EntryPoint::RegenerateAll, window)
    }

    /// Summarize `window`, or every unsummarized date through `today` when
    /// no window is given.
    pub fn summarize_food(
        &self,
        window: Option<TimeRange>,
        today: NaiveDate,
    ) -> SyncResult<SummaryReport> {
        let summarizer = FoodSummarizer::new(&self.db);
        let window = match window {
            Some(w) => Some(w),
            None => summarizer.unsummarized_window(today)?,
        };
        let report = match window {
            Some(w) => summarizer.summarize(w)?,
            None => {
                info!("every food date is already summarized");
                SummaryReport::new(None)
            }
        };
        self.db
            .record_run(EntryPoint::SummarizeFood.name(), report.window.as_ref(), &report)?;
        Ok(report)
    }

    pub fn make_new_food_db_sheet(&self) -> SyncResult<bool> {
        let created = food_db::create_food_db_table(&self.db)?;
        if created {
            info!("created food database table");
        } else {
            info!("food database table already exists; left unchanged");
        }
        self.db.record_run(
            EntryPoint::MakeNewFoodDbSheet.name(),
            None,
            &serde_json::json!({ "created": created }),
        )?;
        Ok(created)
    }

    /// Sync an explicit window without recording it as a named run.
    pub fn synchronize(&self, window: TimeRange) -> SyncResult<SyncReport> {
        UpdateEngine::new(&self.db, &self.providers).synchronize(window)
    }

    fn synchronize_as(&self, entry: EntryPoint, window: TimeRange) -> SyncResult<SyncReport> {
        let report = self.synchronize(window)?;
        self.db.record_run(entry.name(), Some(&window), &report)?;
        Ok(report)
    }

    /// Earliest date held in any lifelog table or offered by any provider.
    ///
    /// A provider that cannot say is skipped with a warning.
    pub fn earliest_known_date(&self) -> SyncResult<Option<NaiveDate>> {
        let mut earliest: Option<NaiveDate> = None;
        let mut consider = |date: Option<NaiveDate>| {
            if let Some(d) = date {
                earliest = Some(earliest.map_or(d, |e| e.min(d)));
            }
        };

        for category in Category::ALL {
            let table = category.table_name();
            if self.db.has_table(table)? {
                consider(self.db.earliest_date(table)?);
            }
        }
        for provider in self.providers.iter() {
            match provider.earliest_date() {
                Ok(date) => consider(date),
                Err(err) => warn!(
                    provider = provider.id(),
                    error = %format!("{err:#}"),
                    "could not read earliest date"
                ),
            }
        }
        Ok(earliest)
    }

    // --- Food database maintenance ---

    pub fn add_food_item(&self, item: &FoodItem) -> SyncResult<()> {
        food_db::upsert_food_item(&self.db, item)
    }

    pub fn list_food_items(&self) -> SyncResult<Vec<FoodItem>> {
        food_db::list_food_items(&self.db)
    }

    /// Upsert every item; stops at the first invalid one.
    pub fn import_food_items(&self, items: &[FoodItem]) -> SyncResult<usize> {
        for item in items {
            food_db::upsert_food_item(&self.db, item)?;
        }
        info!(count = items.len(), "imported food items");
        Ok(items.len())
    }

    // --- Reads ---

    pub fn daily_summaries(&self, window: &TimeRange) -> SyncResult<Vec<DailyFoodSummary>> {
        FoodSummarizer::new(&self.db).read_summaries(window)
    }

    pub fn recent_runs(&self, limit: i64) -> Result<Vec<RunRecord>, StoreError> {
        self.db.recent_runs(limit)
    }
}
