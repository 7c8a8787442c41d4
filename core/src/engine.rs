//! One synchronization pass: fetch from every provider, reconcile against
//! the rows already stored for the window, and write only what changed.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::identity;
use crate::models::{
    Category, LifelogEntry, RawRecord, SyncReport, TimeRange, parse_food_payload,
};
use crate::provider::{ProviderRegistry, SourceProvider};
use crate::store::{Row, TabularStore, lifelog_schema};

pub struct UpdateEngine<'a, S: TabularStore + ?Sized> {
    store: &'a S,
    providers: &'a ProviderRegistry,
}

impl<'a, S: TabularStore + ?Sized> UpdateEngine<'a, S> {
    pub fn new(store: &'a S, providers: &'a ProviderRegistry) -> Self {
        Self { store, providers }
    }

    /// Merge every provider's records for `window` into the store.
    ///
    /// Running the same window twice without upstream changes writes nothing
    /// the second time. A provider that fails to fetch is reported and its
    /// stored rows are left alone; only store failures abort the pass.
    pub fn synchronize(&self, window: TimeRange) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::new(window);

        for provider in self.providers.iter() {
            let records = match provider.fetch(&window) {
                Ok(records) => records,
                Err(err) => {
                    warn!(
                        provider = provider.id(),
                        %window,
                        error = %format!("{err:#}"),
                        "provider fetch failed; stored rows kept"
                    );
                    report.record_provider_failure(provider.id(), format!("{err:#}"));
                    continue;
                }
            };
            debug!(provider = provider.id(), records = records.len(), "fetched");

            let entries = transform(provider, &window, records, &mut report);
            self.reconcile(provider, &window, entries, &mut report)?;
        }

        info!(
            %window,
            inserted = report.inserted,
            updated = report.updated,
            unchanged = report.unchanged,
            preserved = report.preserved,
            unresolved = report.unresolved,
            "sync finished"
        );
        Ok(report)
    }

    fn reconcile(
        &self,
        provider: &dyn SourceProvider,
        window: &TimeRange,
        entries: Vec<LifelogEntry>,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let schema = lifelog_schema(provider.category());
        let table = schema.name;
        if self.store.create_table_if_absent(&schema)? {
            info!(table, "created lifelog table");
        }

        let existing: HashMap<String, Row> = self
            .store
            .read_range(table, window)?
            .into_iter()
            .map(|row| (row.key.clone(), row))
            .collect();

        let mut seen: HashSet<String> = HashSet::with_capacity(entries.len());
        for entry in entries {
            let row = entry.to_row();

            // A corrected record may have moved out of the window it was
            // first stored under, so fall back to a lookup by key.
            let unchanged = match existing.get(&row.key) {
                Some(stored) => Some(*stored == row),
                None => self.store.get(table, &row.key)?.map(|stored| stored == row),
            };

            match unchanged {
                Some(true) => report.unchanged += 1,
                Some(false) => {
                    self.store.upsert(table, &row.key, &row)?;
                    debug!(table, identity = %row.key, "updated");
                    report.updated += 1;
                }
                None => {
                    self.store.insert(table, &row)?;
                    debug!(table, identity = %row.key, "inserted");
                    report.inserted += 1;
                }
            }
            seen.insert(row.key);
        }

        let source = Value::from(provider.id());
        report.preserved += existing
            .values()
            .filter(|row| !seen.contains(&row.key) && row.cells.get("source") == Some(&source))
            .count();

        Ok(())
    }
}

/// Turn one provider's raw records into entries with deterministic identities.
///
/// Records that cannot become entries are reported, never silently dropped.
fn transform(
    provider: &dyn SourceProvider,
    window: &TimeRange,
    records: Vec<RawRecord>,
    report: &mut SyncReport,
) -> Vec<LifelogEntry> {
    let source = provider.id();
    let category = provider.category();

    let mut entries: Vec<LifelogEntry> = Vec::with_capacity(records.len());
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut occurrences: HashMap<String, usize> = HashMap::new();

    for record in records {
        let native_id = record
            .native_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        if !window.contains(record.timestamp.date()) {
            report.record_rejected(
                source,
                native_id.as_deref(),
                format!("timestamp {} is outside {window}", record.timestamp),
            );
            continue;
        }

        let payload = identity::normalize_payload(record.payload);
        if category == Category::Food {
            if let Err(err) = parse_food_payload(&payload) {
                report.record_rejected(source, native_id.as_deref(), err.to_string());
                continue;
            }
        }

        let identity = match &native_id {
            Some(id) => identity::native_identity(source, id),
            None => {
                let fp = identity::fingerprint(source, category, &record.timestamp, &payload);
                let n = occurrences.entry(fp.clone()).or_insert(0);
                *n += 1;
                identity::derived_identity(&fp, *n)
            }
        };

        let entry = LifelogEntry {
            identity: identity.clone(),
            timestamp: record.timestamp,
            category,
            payload,
            source: source.to_string(),
        };

        if let Some(&pos) = positions.get(&identity) {
            warn!(
                provider = source,
                native_id = native_id.as_deref().unwrap_or(""),
                "record repeated in one fetch; keeping the later one"
            );
            report.superseded += 1;
            entries[pos] = entry;
        } else {
            positions.insert(identity, entries.len());
            entries.push(entry);
        }
    }

    entries
}
