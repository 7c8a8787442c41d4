//! Daily nutrient totals computed from food entries and the food database.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::error::SyncError;
use crate::food_db::FoodDatabase;
use crate::identity::content_digest;
use crate::models::{
    Category, DATE_FORMAT, DailyFoodSummary, FoodConsumption, LifelogEntry, SummaryReport, TimeRange,
    UnresolvedFood, UnresolvedReason,
};
use crate::store::{DAILY_FOOD_SUMMARY, Row, TabularStore};

pub struct FoodSummarizer<'a, S: TabularStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: TabularStore + ?Sized> FoodSummarizer<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Recompute the summary row of every date in `window`.
    ///
    /// Each row is replaced wholesale, so the result does not depend on what
    /// was there before. Dates without food entries lose any summary row.
    pub fn summarize(&self, window: TimeRange) -> Result<SummaryReport, SyncError> {
        let foods = FoodDatabase::load(self.store)?;
        let foods_digest = foods.digest();
        self.store.create_table_if_absent(&DAILY_FOOD_SUMMARY)?;

        let food_table = Category::Food.table_name();
        let rows = if self.store.has_table(food_table)? {
            self.store.read_range(food_table, &window)?
        } else {
            Vec::new()
        };

        let mut by_date: BTreeMap<NaiveDate, Vec<LifelogEntry>> = BTreeMap::new();
        for row in &rows {
            let entry = LifelogEntry::from_row(food_table, row)?;
            by_date.entry(entry.date()).or_default().push(entry);
        }

        let mut report = SummaryReport::new(Some(window));
        for date in window.days() {
            let key = date.format(DATE_FORMAT).to_string();
            let Some(entries) = by_date.get(&date) else {
                if self.store.delete(DAILY_FOOD_SUMMARY.name, &key)? {
                    debug!(%date, "cleared stale summary");
                    report.days_cleared += 1;
                }
                continue;
            };

            let mut summary = summarize_day(date, entries, &foods, &mut report);
            summary.sources = sources_digest(&foods_digest, entries);
            self.store
                .upsert(DAILY_FOOD_SUMMARY.name, &key, &summary.to_row())?;
            report.days_written += 1;
        }

        info!(
            %window,
            days_written = report.days_written,
            days_cleared = report.days_cleared,
            unresolved = report.unresolved_count(),
            "food summary finished"
        );
        Ok(report)
    }

    /// Default window for summarization: from the earliest stale date
    /// through `today`. `None` when every summary is current.
    ///
    /// A date is stale when it has food entries but no summary, when its
    /// summary was built from different entries or a different food table,
    /// or when it has a summary but no entries left.
    pub fn unsummarized_window(&self, today: NaiveDate) -> Result<Option<TimeRange>, SyncError> {
        let food_table = Category::Food.table_name();
        let mut by_date: BTreeMap<NaiveDate, Vec<LifelogEntry>> = BTreeMap::new();
        if self.store.has_table(food_table)? {
            for row in self.store.read_all(food_table)? {
                let entry = LifelogEntry::from_row(food_table, &row)?;
                by_date.entry(entry.date()).or_default().push(entry);
            }
        }

        let mut stored: BTreeMap<NaiveDate, String> = BTreeMap::new();
        if self.store.has_table(DAILY_FOOD_SUMMARY.name)? {
            for row in self.store.read_all(DAILY_FOOD_SUMMARY.name)? {
                let summary = DailyFoodSummary::from_row(DAILY_FOOD_SUMMARY.name, &row)?;
                stored.insert(summary.date, summary.sources);
            }
        }

        if by_date.is_empty() && stored.is_empty() {
            return Ok(None);
        }
        let foods_digest = FoodDatabase::load(self.store)?.digest();

        let orphaned = stored.keys().filter(|date| !by_date.contains_key(date));
        let outdated = by_date.iter().filter_map(|(date, entries)| {
            let current = sources_digest(&foods_digest, entries);
            (stored.get(date) != Some(&current)).then_some(date)
        });
        let earliest = orphaned.chain(outdated).min().copied();

        match earliest {
            Some(start) => {
                debug!(%start, "earliest stale food summary");
                Ok(Some(TimeRange::new(start, today.max(start))?))
            }
            None => Ok(None),
        }
    }

    /// Stored summaries inside `window`, oldest first.
    pub fn read_summaries(&self, window: &TimeRange) -> Result<Vec<DailyFoodSummary>, SyncError> {
        if !self.store.has_table(DAILY_FOOD_SUMMARY.name)? {
            return Ok(Vec::new());
        }
        let mut summaries = self
            .store
            .read_range(DAILY_FOOD_SUMMARY.name, window)?
            .iter()
            .map(|row| DailyFoodSummary::from_row(DAILY_FOOD_SUMMARY.name, row))
            .collect::<Result<Vec<_>, _>>()?;
        summaries.sort_by_key(|s| s.date);
        Ok(summaries)
    }
}

/// Digest of one day's entries together with the food table digest.
fn sources_digest(foods_digest: &str, entries: &[LifelogEntry]) -> String {
    let mut rows: Vec<Row> = entries.iter().map(LifelogEntry::to_row).collect();
    rows.sort_by(|a, b| a.key.cmp(&b.key));
    content_digest(&serde_json::Value::Array(vec![
        foods_digest.into(),
        serde_json::Value::Array(rows.iter().map(Row::to_value).collect()),
    ]))
}

fn summarize_day(
    date: NaiveDate,
    entries: &[LifelogEntry],
    foods: &FoodDatabase,
    report: &mut SummaryReport,
) -> DailyFoodSummary {
    let mut summary = DailyFoodSummary::empty(date);
    summary.entry_count = entries.len();

    for entry in entries {
        let resolved = FoodConsumption::from_entry(entry)
            .map_err(|e| (None, UnresolvedReason::InvalidEntry { message: e.to_string() }))
            .and_then(|consumption| {
                foods
                    .nutrients_for(&consumption)
                    .map_err(|reason| (Some(consumption.food.clone()), reason))
            });

        match resolved {
            Ok(nutrients) => {
                for (name, amount) in nutrients {
                    *summary.nutrients.entry(name).or_insert(0.0) += amount;
                }
                report.entries_resolved += 1;
            }
            Err((food, reason)) => {
                debug!(identity = %entry.identity, %reason, "unresolved food entry");
                summary.unresolved_count += 1;
                report.unresolved.push(UnresolvedFood {
                    identity: entry.identity.clone(),
                    date,
                    food,
                    reason,
                });
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::food_db::{create_food_db_table, upsert_food_item};
    use crate::models::{FoodItem, Timestamp};
    use crate::store::lifelog_schema;
    use serde_json::{Map, Value, json};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn add_food(db: &Database, id: &str, day: NaiveDate, food: &str, qty: f64, unit: &str) {
        let Value::Object(payload) = json!({ "food": food, "quantity": qty, "unit": unit }) else {
            unreachable!()
        };
        store_entry(db, id, day, payload);
    }

    fn store_entry(db: &Database, id: &str, day: NaiveDate, payload: Map<String, Value>) {
        db.create_table_if_absent(&lifelog_schema(Category::Food))
            .unwrap();
        let entry = LifelogEntry {
            identity: id.into(),
            timestamp: Timestamp::Date(day),
            category: Category::Food,
            payload,
            source: "test".into(),
        };
        db.upsert("food_log", id, &entry.to_row()).unwrap();
    }

    fn food_db(db: &Database) {
        create_food_db_table(db).unwrap();
        for (id, name, calories) in [("a", "Apple", 100.0), ("b", "Bread", 50.0)] {
            let item = FoodItem {
                identifier: id.into(),
                display_name: name.into(),
                unit: "serving".into(),
                nutrients: [("calories".to_string(), calories)].into_iter().collect(),
            };
            upsert_food_item(db, &item).unwrap();
        }
    }

    #[test]
    fn test_summarize_totals_nutrients() {
        let db = Database::open_in_memory().unwrap();
        food_db(&db);
        let d = date(2024, 5, 1);
        add_food(&db, "e1", d, "a", 2.0, "serving");
        add_food(&db, "e2", d, "b", 1.0, "serving");

        let summarizer = FoodSummarizer::new(&db);
        let report = summarizer.summarize(TimeRange::day(d)).unwrap();
        assert_eq!(report.days_written, 1);
        assert_eq!(report.entries_resolved, 2);
        assert_eq!(report.unresolved_count(), 0);

        let summaries = summarizer.read_summaries(&TimeRange::day(d)).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].nutrients["calories"], 250.0);
        assert_eq!(summaries[0].entry_count, 2);
    }

    #[test]
    fn test_unknown_food_is_counted_not_dropped() {
        let db = Database::open_in_memory().unwrap();
        food_db(&db);
        let d = date(2024, 5, 1);
        add_food(&db, "e1", d, "Apple", 1.0, "serving");
        add_food(&db, "e2", d, "durian", 1.0, "serving");
        add_food(&db, "e3", d, "b", 30.0, "g");

        let summarizer = FoodSummarizer::new(&db);
        let report = summarizer.summarize(TimeRange::day(d)).unwrap();
        assert_eq!(report.entries_resolved, 1);
        assert_eq!(report.unresolved_count(), 2);
        assert_eq!(report.unresolved[0].food.as_deref(), Some("durian"));
        assert_eq!(report.unresolved[0].reason, UnresolvedReason::UnknownFood);
        assert!(matches!(
            report.unresolved[1].reason,
            UnresolvedReason::UnitMismatch { .. }
        ));

        let summary = &summarizer.read_summaries(&TimeRange::day(d)).unwrap()[0];
        assert_eq!(summary.nutrients["calories"], 100.0);
        assert_eq!(summary.entry_count, 3);
        assert_eq!(summary.unresolved_count, 2);
    }

    #[test]
    fn test_malformed_entry_is_unresolved() {
        let db = Database::open_in_memory().unwrap();
        food_db(&db);
        let d = date(2024, 5, 1);
        store_entry(&db, "e1", d, Map::new());

        let report = FoodSummarizer::new(&db).summarize(TimeRange::day(d)).unwrap();
        assert_eq!(report.unresolved_count(), 1);
        assert!(report.unresolved[0].food.is_none());
        assert!(matches!(
            report.unresolved[0].reason,
            UnresolvedReason::InvalidEntry { .. }
        ));
    }

    #[test]
    fn test_resummarize_replaces_previous_totals() {
        let db = Database::open_in_memory().unwrap();
        food_db(&db);
        let d = date(2024, 5, 1);
        add_food(&db, "e1", d, "a", 2.0, "serving");
        let summarizer = FoodSummarizer::new(&db);
        summarizer.summarize(TimeRange::day(d)).unwrap();
        summarizer.summarize(TimeRange::day(d)).unwrap();

        let summary = &summarizer.read_summaries(&TimeRange::day(d)).unwrap()[0];
        assert_eq!(summary.nutrients["calories"], 200.0);

        add_food(&db, "e1", d, "a", 1.0, "serving");
        summarizer.summarize(TimeRange::day(d)).unwrap();
        let summary = &summarizer.read_summaries(&TimeRange::day(d)).unwrap()[0];
        assert_eq!(summary.nutrients["calories"], 100.0);
    }

    #[test]
    fn test_dates_without_entries_lose_stale_summaries() {
        let db = Database::open_in_memory().unwrap();
        food_db(&db);
        let window = TimeRange::new(date(2024, 5, 1), date(2024, 5, 3)).unwrap();
        add_food(&db, "e1", date(2024, 5, 2), "a", 1.0, "serving");
        let summarizer = FoodSummarizer::new(&db);
        summarizer.summarize(window).unwrap();

        db.delete("food_log", "e1").unwrap();
        let report = summarizer.summarize(window).unwrap();
        assert_eq!(report.days_written, 0);
        assert_eq!(report.days_cleared, 1);
        assert!(summarizer.read_summaries(&window).unwrap().is_empty());
    }

    #[test]
    fn test_summarize_requires_food_db() {
        let db = Database::open_in_memory().unwrap();
        let err = FoodSummarizer::new(&db)
            .summarize(TimeRange::day(date(2024, 5, 1)))
            .unwrap_err();
        assert!(matches!(err, SyncError::MissingTable(_)));
    }

    #[test]
    fn test_summarize_without_food_log_is_empty() {
        let db = Database::open_in_memory().unwrap();
        food_db(&db);
        let report = FoodSummarizer::new(&db)
            .summarize(TimeRange::day(date(2024, 5, 1)))
            .unwrap();
        assert_eq!(report.days_written, 0);
        assert_eq!(report.unresolved_count(), 0);
    }

    #[test]
    fn test_unsummarized_window() {
        let db = Database::open_in_memory().unwrap();
        food_db(&db);
        let summarizer = FoodSummarizer::new(&db);
        let today = date(2024, 5, 10);
        assert_eq!(summarizer.unsummarized_window(today).unwrap(), None);

        add_food(&db, "e1", date(2024, 5, 1), "a", 1.0, "serving");
        add_food(&db, "e2", date(2024, 5, 4), "a", 1.0, "serving");
        summarizer.summarize(TimeRange::day(date(2024, 5, 1))).unwrap();

        let window = summarizer.unsummarized_window(today).unwrap().unwrap();
        assert_eq!(window.start(), date(2024, 5, 4));
        assert_eq!(window.end(), today);

        summarizer.summarize(window).unwrap();
        assert_eq!(summarizer.unsummarized_window(today).unwrap(), None);
    }

    #[test]
    fn test_unsummarized_window_finds_changed_days() {
        let db = Database::open_in_memory().unwrap();
        food_db(&db);
        let summarizer = FoodSummarizer::new(&db);
        let today = date(2024, 5, 10);
        add_food(&db, "e1", date(2024, 5, 2), "a", 1.0, "serving");
        add_food(&db, "e2", date(2024, 5, 6), "a", 1.0, "serving");
        summarizer
            .summarize(TimeRange::new(date(2024, 5, 1), today).unwrap())
            .unwrap();
        assert_eq!(summarizer.unsummarized_window(today).unwrap(), None);

        // Corrected quantity, same entry count.
        add_food(&db, "e2", date(2024, 5, 6), "a", 3.0, "serving");
        let window = summarizer.unsummarized_window(today).unwrap().unwrap();
        assert_eq!(window.start(), date(2024, 5, 6));
        summarizer.summarize(window).unwrap();
        let summary = &summarizer.read_summaries(&window).unwrap()[0];
        assert_eq!(summary.nutrients["calories"], 300.0);

        // Entry removed upstream leaves an orphaned summary.
        db.delete("food_log", "e1").unwrap();
        let window = summarizer.unsummarized_window(today).unwrap().unwrap();
        assert_eq!(window.start(), date(2024, 5, 2));
        assert_eq!(summarizer.summarize(window).unwrap().days_cleared, 1);
        assert_eq!(summarizer.unsummarized_window(today).unwrap(), None);
    }

    #[test]
    fn test_food_table_change_makes_summaries_stale() {
        let db = Database::open_in_memory().unwrap();
        food_db(&db);
        let summarizer = FoodSummarizer::new(&db);
        let today = date(2024, 5, 10);
        add_food(&db, "e1", date(2024, 5, 3), "c", 1.0, "serving");
        let report = summarizer.summarize(TimeRange::day(date(2024, 5, 3))).unwrap();
        assert_eq!(report.unresolved_count(), 1);

        let item = FoodItem {
            identifier: "c".into(),
            display_name: "Cheese".into(),
            unit: "serving".into(),
            nutrients: [("calories".to_string(), 110.0)].into_iter().collect(),
        };
        upsert_food_item(&db, &item).unwrap();

        let window = summarizer.unsummarized_window(today).unwrap().unwrap();
        assert_eq!(window.start(), date(2024, 5, 3));
        let report = summarizer.summarize(window).unwrap();
        assert_eq!(report.unresolved_count(), 0);
    }
}
