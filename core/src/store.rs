use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::models::{Category, TimeRange};

/// Name and columns of a logical table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: &'static [&'static str],
}

pub const LIFELOG_COLUMNS: &[&str] = &["timestamp", "category", "source", "payload"];

pub const FOOD_DB: TableSchema = TableSchema {
    name: "food_db",
    columns: &["identifier", "display_name", "unit", "nutrients"],
};

pub const DAILY_FOOD_SUMMARY: TableSchema = TableSchema {
    name: "daily_food_summary",
    columns: &["date", "nutrients", "entry_count", "unresolved_count", "sources"],
};

#[must_use]
pub fn lifelog_schema(category: Category) -> TableSchema {
    TableSchema {
        name: category.table_name(),
        columns: LIFELOG_COLUMNS,
    }
}

/// One keyed row of a table. `date` is what range reads filter on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub key: String,
    pub date: Option<NaiveDate>,
    pub cells: BTreeMap<String, Value>,
}

impl Row {
    #[must_use]
    pub fn new(key: &str, date: Option<NaiveDate>) -> Self {
        Self {
            key: key.to_string(),
            date,
            cells: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.cells.insert(column.to_string(), value.into());
        self
    }

    /// The whole row as one JSON object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("key".into(), self.key.clone().into());
        map.insert(
            "date".into(),
            self.date.map_or(Value::Null, |d| d.to_string().into()),
        );
        map.insert(
            "cells".into(),
            Value::Object(self.cells.clone().into_iter().collect()),
        );
        Value::Object(map)
    }

    fn malformed(&self, table: &str, reason: String) -> StoreError {
        StoreError::MalformedRow {
            table: table.to_string(),
            key: self.key.clone(),
            reason,
        }
    }

    pub fn text(&self, table: &str, column: &str) -> Result<&str, StoreError> {
        match self.cells.get(column) {
            Some(Value::String(s)) => Ok(s),
            Some(other) => Err(self.malformed(table, format!("{column} is not text: {other}"))),
            None => Err(self.malformed(table, format!("missing column {column}"))),
        }
    }

    pub fn count(&self, table: &str, column: &str) -> Result<usize, StoreError> {
        self.cells
            .get(column)
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .ok_or_else(|| self.malformed(table, format!("{column} is not a count")))
    }

    pub fn number_map(&self, table: &str, column: &str) -> Result<BTreeMap<String, f64>, StoreError> {
        let Some(Value::Object(map)) = self.cells.get(column) else {
            return Err(self.malformed(table, format!("{column} is not an object")));
        };
        map.iter()
            .map(|(k, v)| {
                v.as_f64()
                    .map(|n| (k.clone(), n))
                    .ok_or_else(|| self.malformed(table, format!("{column}.{k} is not a number")))
            })
            .collect()
    }
}

/// Durable keyed tables with date-range reads.
///
/// Keys are unique within a table. Each write is atomic on its own, so a run
/// that stops halfway leaves every row either old or new, never torn.
pub trait TabularStore {
    /// Returns `true` when the table was created, `false` when it already existed.
    fn create_table_if_absent(&self, schema: &TableSchema) -> Result<bool, StoreError>;

    fn has_table(&self, table: &str) -> Result<bool, StoreError>;

    /// Rows whose date falls inside `window`, in row-position order.
    fn read_range(&self, table: &str, window: &TimeRange) -> Result<Vec<Row>, StoreError>;

    fn read_all(&self, table: &str) -> Result<Vec<Row>, StoreError>;

    fn get(&self, table: &str, key: &str) -> Result<Option<Row>, StoreError>;

    /// Add a new row; fails with `DuplicateKey` if the key is taken.
    fn insert(&self, table: &str, row: &Row) -> Result<(), StoreError>;

    /// Overwrite the row under `key` in place, or add it if missing.
    fn upsert(&self, table: &str, key: &str, row: &Row) -> Result<(), StoreError>;

    fn delete(&self, table: &str, key: &str) -> Result<bool, StoreError>;

    fn earliest_date(&self, table: &str) -> Result<Option<NaiveDate>, StoreError>;
}
