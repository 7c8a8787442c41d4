//! Reference food database: the `food_db` table and lookups against it.

use std::collections::{BTreeMap, HashMap};
use std::io::Read;

use anyhow::{Context, Result, bail};
use tracing::warn;

use crate::error::SyncError;
use crate::identity::content_digest;
use crate::models::{
    FoodConsumption, FoodItem, UnresolvedReason, convert_quantity, normalize_key,
    validate_food_item,
};
use crate::store::{FOOD_DB, Row, TabularStore};

/// In-memory index over the food table, loaded once per summarization.
#[derive(Debug, Default)]
pub struct FoodDatabase {
    items: Vec<FoodItem>,
    by_identifier: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
}

impl FoodDatabase {
    pub fn load<S: TabularStore + ?Sized>(store: &S) -> Result<Self, SyncError> {
        if !store.has_table(FOOD_DB.name)? {
            return Err(SyncError::MissingTable(FOOD_DB.name.to_string()));
        }
        let items = store
            .read_all(FOOD_DB.name)?
            .iter()
            .map(|row| FoodItem::from_row(FOOD_DB.name, row))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_items(items))
    }

    #[must_use]
    pub fn from_items(items: Vec<FoodItem>) -> Self {
        let mut by_identifier = HashMap::with_capacity(items.len());
        let mut by_name = HashMap::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            by_identifier.insert(item.key(), idx);
            let name = normalize_key(&item.display_name);
            if let Some(&first) = by_name.get(&name) {
                let first: &FoodItem = &items[first];
                warn!(
                    name = %item.display_name,
                    kept = %first.identifier,
                    ignored = %item.identifier,
                    "two foods share a display name"
                );
            } else {
                by_name.insert(name, idx);
            }
        }
        Self {
            items,
            by_identifier,
            by_name,
        }
    }

    /// Digest of every item, independent of load order.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut rows: Vec<Row> = self.items.iter().map(FoodItem::to_row).collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        content_digest(&serde_json::Value::Array(
            rows.iter().map(Row::to_value).collect(),
        ))
    }

    /// Find a food by identifier, falling back to display name. Case-insensitive.
    #[must_use]
    pub fn resolve(&self, reference: &str) -> Option<&FoodItem> {
        let key = normalize_key(reference);
        self.by_identifier
            .get(&key)
            .or_else(|| self.by_name.get(&key))
            .map(|&idx| &self.items[idx])
    }

    /// Nutrient amounts contributed by one consumption.
    pub fn nutrients_for(
        &self,
        consumption: &FoodConsumption,
    ) -> Result<BTreeMap<String, f64>, UnresolvedReason> {
        let item = self
            .resolve(&consumption.food)
            .ok_or(UnresolvedReason::UnknownFood)?;
        let quantity = convert_quantity(consumption.quantity, &consumption.unit, &item.unit)
            .ok_or_else(|| UnresolvedReason::UnitMismatch {
                entry_unit: consumption.unit.clone(),
                item_unit: item.unit.clone(),
            })?;
        Ok(item
            .nutrients
            .iter()
            .map(|(name, per_unit)| (name.clone(), per_unit * quantity))
            .collect())
    }

    #[must_use]
    pub fn items(&self) -> &[FoodItem] {
        &self.items
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Create the empty food table. Returns `false` if it already existed; an
/// existing table is never touched.
pub fn create_food_db_table<S: TabularStore + ?Sized>(store: &S) -> Result<bool, SyncError> {
    Ok(store.create_table_if_absent(&FOOD_DB)?)
}

/// Add a food, or replace the one with the same identifier.
pub fn upsert_food_item<S: TabularStore + ?Sized>(
    store: &S,
    item: &FoodItem,
) -> Result<(), SyncError> {
    validate_food_item(item).map_err(|e| SyncError::InvalidFoodItem(e.to_string()))?;
    if !store.has_table(FOOD_DB.name)? {
        return Err(SyncError::MissingTable(FOOD_DB.name.to_string()));
    }
    store.upsert(FOOD_DB.name, &item.key(), &item.to_row())?;
    Ok(())
}

/// Every food, sorted by display name.
pub fn list_food_items<S: TabularStore + ?Sized>(store: &S) -> Result<Vec<FoodItem>, SyncError> {
    let mut items = FoodDatabase::load(store)?.items;
    items.sort_by_key(|item| normalize_key(&item.display_name));
    Ok(items)
}

/// Parse a food table from CSV.
///
/// Expected header: `identifier,name,unit` followed by one column per
/// nutrient. Blank nutrient cells are left out of the item.
pub fn parse_food_db_csv<R: Read>(reader: R) -> Result<Vec<FoodItem>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers().context("Failed to read CSV headers")?.clone();
    let col = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));

    let idx_id = col("identifier").context("Missing required column: identifier")?;
    let idx_name = col("name").context("Missing required column: name")?;
    let idx_unit = col("unit").context("Missing required column: unit")?;

    let nutrient_cols: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(idx, h)| ![idx_id, idx_name, idx_unit].contains(idx) && !h.is_empty())
        .map(|(idx, h)| (idx, h.to_lowercase()))
        .collect();

    let mut items = Vec::new();
    for (line_num, result) in rdr.records().enumerate() {
        let line = line_num + 2;
        let record = result.with_context(|| format!("Failed to parse CSV row {line}"))?;
        let field = |idx: usize| record.get(idx).unwrap_or("").trim();

        let identifier = field(idx_id);
        if identifier.is_empty() && field(idx_name).is_empty() {
            continue;
        }

        let mut nutrients = BTreeMap::new();
        for (idx, name) in &nutrient_cols {
            let raw = field(*idx);
            if raw.is_empty() {
                continue;
            }
            let Ok(amount) = raw.parse::<f64>() else {
                bail!("CSV row {line}: {name} is not a number: '{raw}'");
            };
            nutrients.insert(name.clone(), amount);
        }

        let item = FoodItem {
            identifier: identifier.to_string(),
            display_name: field(idx_name).to_string(),
            unit: field(idx_unit).to_string(),
            nutrients,
        };
        validate_food_item(&item).with_context(|| format!("CSV row {line}"))?;
        items.push(item);
    }

    Ok(items)
}
