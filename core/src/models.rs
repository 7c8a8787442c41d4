use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use chrono::{Days, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{StoreError, SyncError};
use crate::store::Row;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

// --- Windows ---

/// Inclusive range of calendar dates driving both fetch and summary scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TimeRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl TimeRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, SyncError> {
        if start > end {
            return Err(SyncError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    #[must_use]
    pub fn day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    /// Parse a window from two `YYYY-MM-DD` strings.
    pub fn parse(start: &str, end: &str) -> Result<Self, SyncError> {
        let parse = |s: &str| {
            NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
                .map_err(|_| SyncError::MalformedWindow(format!("'{s}' is not a YYYY-MM-DD date")))
        };
        Self::new(parse(start)?, parse(end)?)
    }

    #[must_use]
    pub fn start(&self) -> NaiveDate {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> NaiveDate {
        self.end
    }

    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    #[must_use]
    pub fn num_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Every date in the window, in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }

    /// Window ending on `end` that reaches back `days` days.
    #[must_use]
    pub fn trailing(end: NaiveDate, days: u32) -> Self {
        let start = end
            .checked_sub_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MIN);
        Self { start, end }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..={}",
            self.start.format(DATE_FORMAT),
            self.end.format(DATE_FORMAT)
        )
    }
}

// --- Timestamps ---

/// When a lifelog event happened: a whole day, or a local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timestamp {
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl Timestamp {
    #[must_use]
    pub fn date(&self) -> NaiveDate {
        match self {
            Self::Date(d) => *d,
            Self::DateTime(dt) => dt.date(),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            Self::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
        }
    }
}

impl FromStr for Timestamp {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        for fmt in [
            DATETIME_FORMAT,
            "%Y-%m-%dT%H:%M",
            "%Y-%m-%d %H:%M:%S",
            "%Y-%m-%d %H:%M",
        ] {
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
                return Ok(Self::DateTime(dt));
            }
        }
        if let Ok(d) = NaiveDate::parse_from_str(s, DATE_FORMAT) {
            return Ok(Self::Date(d));
        }
        bail!("Cannot parse timestamp: '{s}'")
    }
}

impl From<NaiveDate> for Timestamp {
    fn from(d: NaiveDate) -> Self {
        Self::Date(d)
    }
}

impl From<NaiveDateTime> for Timestamp {
    fn from(dt: NaiveDateTime) -> Self {
        Self::DateTime(dt)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// --- Categories ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Food,
    Exercise,
    Sleep,
    Weight,
    Mood,
    Other,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Self::Food,
        Self::Exercise,
        Self::Sleep,
        Self::Weight,
        Self::Mood,
        Self::Other,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Food => "food",
            Self::Exercise => "exercise",
            Self::Sleep => "sleep",
            Self::Weight => "weight",
            Self::Mood => "mood",
            Self::Other => "other",
        }
    }

    /// Name of the lifelog table holding this category's entries.
    #[must_use]
    pub fn table_name(self) -> &'static str {
        match self {
            Self::Food => "food_log",
            Self::Exercise => "exercise_log",
            Self::Sleep => "sleep_log",
            Self::Weight => "weight_log",
            Self::Mood => "mood_log",
            Self::Other => "other_log",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == lower)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Invalid category '{s}'. Valid: food, exercise, sleep, weight, mood, other"
                )
            })
    }
}

// --- Records ---

/// A record as handed over by a source provider, before identity assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_id: Option<String>,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifelogEntry {
    pub identity: String,
    pub timestamp: Timestamp,
    pub category: Category,
    pub payload: Map<String, Value>,
    /// Id of the provider that produced this entry.
    pub source: String,
}

impl LifelogEntry {
    #[must_use]
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }

    #[must_use]
    pub fn to_row(&self) -> Row {
        Row::new(&self.identity, Some(self.date()))
            .with("timestamp", self.timestamp.to_string())
            .with("category", self.category.as_str())
            .with("source", self.source.as_str())
            .with("payload", Value::Object(self.payload.clone()))
    }

    pub fn from_row(table: &str, row: &Row) -> Result<Self, StoreError> {
        let malformed = |reason: String| StoreError::MalformedRow {
            table: table.to_string(),
            key: row.key.clone(),
            reason,
        };
        let timestamp = row
            .text(table, "timestamp")?
            .parse::<Timestamp>()
            .map_err(|e| malformed(e.to_string()))?;
        let category = row
            .text(table, "category")?
            .parse::<Category>()
            .map_err(|e| malformed(e.to_string()))?;
        let source = row.text(table, "source")?.to_string();
        let payload = match row.cells.get("payload") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(other) => return Err(malformed(format!("payload is not an object: {other}"))),
        };
        Ok(Self {
            identity: row.key.clone(),
            timestamp,
            category,
            payload,
            source,
        })
    }
}

/// The food-specific view of a food-category lifelog entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoodConsumption {
    pub identity: String,
    pub date: NaiveDate,
    pub food: String,
    pub quantity: f64,
    pub unit: String,
}

impl FoodConsumption {
    pub fn from_entry(entry: &LifelogEntry) -> Result<Self> {
        if entry.category != Category::Food {
            bail!("entry {} is not a food entry", entry.identity);
        }
        let (food, quantity, unit) = parse_food_payload(&entry.payload)?;
        Ok(Self {
            identity: entry.identity.clone(),
            date: entry.date(),
            food,
            quantity,
            unit,
        })
    }
}

/// Extract `(food, quantity, unit)` from a food payload.
pub fn parse_food_payload(payload: &Map<String, Value>) -> Result<(String, f64, String)> {
    let food = match payload.get("food") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::String(_)) => bail!("food reference is empty"),
        Some(other) => bail!("food reference must be text, got {other}"),
        None => bail!("missing 'food' field"),
    };
    let quantity = match payload.get("quantity") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(other) => bail!("quantity must be a number, got {other}"),
        None => bail!("missing 'quantity' field"),
    };
    if !quantity.is_finite() || quantity <= 0.0 {
        bail!("quantity must be greater than 0 (got {quantity})");
    }
    let unit = match payload.get("unit") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(_) => bail!("unit must be non-empty text"),
        None => bail!("missing 'unit' field"),
    };
    Ok((food, quantity, unit))
}

// --- Food database ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodItem {
    pub identifier: String,
    pub display_name: String,
    /// Basis unit for `nutrients`: amounts are per one of this unit.
    pub unit: String,
    pub nutrients: BTreeMap<String, f64>,
}

impl FoodItem {
    /// Store key: identifiers are unique case-insensitively.
    #[must_use]
    pub fn key(&self) -> String {
        normalize_key(&self.identifier)
    }

    #[must_use]
    pub fn to_row(&self) -> Row {
        let nutrients: Map<String, Value> = self
            .nutrients
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(*v)))
            .collect();
        Row::new(&self.key(), None)
            .with("identifier", self.identifier.as_str())
            .with("display_name", self.display_name.as_str())
            .with("unit", self.unit.as_str())
            .with("nutrients", Value::Object(nutrients))
    }

    pub fn from_row(table: &str, row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            identifier: row.text(table, "identifier")?.to_string(),
            display_name: row.text(table, "display_name")?.to_string(),
            unit: row.text(table, "unit")?.to_string(),
            nutrients: row.number_map(table, "nutrients")?,
        })
    }
}

pub fn validate_food_item(item: &FoodItem) -> Result<()> {
    if item.identifier.trim().is_empty() {
        bail!("Food identifier must not be empty");
    }
    if item.display_name.trim().is_empty() {
        bail!("Food name must not be empty");
    }
    if item.unit.trim().is_empty() {
        bail!("Food unit must not be empty");
    }
    for (name, amount) in &item.nutrients {
        if name.trim().is_empty() {
            bail!("Nutrient names must not be empty");
        }
        if !amount.is_finite() || *amount < 0.0 {
            bail!("Nutrient '{name}' must be a non-negative number (got {amount})");
        }
    }
    Ok(())
}

#[must_use]
pub fn normalize_key(s: &str) -> String {
    s.trim().to_lowercase()
}

// --- Summaries ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyFoodSummary {
    pub date: NaiveDate,
    pub nutrients: BTreeMap<String, f64>,
    pub entry_count: usize,
    pub unresolved_count: usize,
    /// Digest of the entries and food table this summary was computed from.
    #[serde(default)]
    pub sources: String,
}

impl DailyFoodSummary {
    #[must_use]
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            nutrients: BTreeMap::new(),
            entry_count: 0,
            unresolved_count: 0,
            sources: String::new(),
        }
    }

    #[must_use]
    pub fn key(&self) -> String {
        self.date.format(DATE_FORMAT).to_string()
    }

    #[must_use]
    pub fn to_row(&self) -> Row {
        let nutrients: Map<String, Value> = self
            .nutrients
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(*v)))
            .collect();
        Row::new(&self.key(), Some(self.date))
            .with("date", self.key())
            .with("nutrients", Value::Object(nutrients))
            .with("entry_count", self.entry_count)
            .with("unresolved_count", self.unresolved_count)
            .with("sources", self.sources.as_str())
    }

    pub fn from_row(table: &str, row: &Row) -> Result<Self, StoreError> {
        let date = NaiveDate::parse_from_str(row.text(table, "date")?, DATE_FORMAT).map_err(
            |e| StoreError::MalformedRow {
                table: table.to_string(),
                key: row.key.clone(),
                reason: e.to_string(),
            },
        )?;
        Ok(Self {
            date,
            nutrients: row.number_map(table, "nutrients")?,
            entry_count: row.count(table, "entry_count")?,
            unresolved_count: row.count(table, "unresolved_count")?,
            sources: row
                .cells
                .get("sources")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }
}

// --- Reports ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFailure {
    pub provider: String,
    pub message: String,
}

/// A provider record that could not become a lifelog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRecord {
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native_id: Option<String>,
    pub reason: String,
}

/// Outcome of one synchronization pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub window: TimeRange,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Stored rows in the window that this fetch did not return; kept as-is.
    pub preserved: usize,
    /// Earlier records in the same fetch replaced by a later one with the same native id.
    pub superseded: usize,
    /// Failed providers plus rejected records.
    pub unresolved: usize,
    pub provider_failures: Vec<ProviderFailure>,
    pub rejected: Vec<RejectedRecord>,
}

impl SyncReport {
    #[must_use]
    pub fn new(window: TimeRange) -> Self {
        Self {
            window,
            inserted: 0,
            updated: 0,
            unchanged: 0,
            preserved: 0,
            superseded: 0,
            unresolved: 0,
            provider_failures: Vec::new(),
            rejected: Vec::new(),
        }
    }

    /// Rows written to the store during the pass.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.inserted + self.updated
    }

    pub fn record_provider_failure(&mut self, provider: &str, message: String) {
        self.unresolved += 1;
        self.provider_failures.push(ProviderFailure {
            provider: provider.to_string(),
            message,
        });
    }

    pub fn record_rejected(&mut self, provider: &str, native_id: Option<&str>, reason: String) {
        self.unresolved += 1;
        self.rejected.push(RejectedRecord {
            provider: provider.to_string(),
            native_id: native_id.map(str::to_string),
            reason,
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnresolvedReason {
    UnknownFood,
    UnitMismatch { entry_unit: String, item_unit: String },
    InvalidEntry { message: String },
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownFood => f.write_str("no matching food in the food database"),
            Self::UnitMismatch {
                entry_unit,
                item_unit,
            } => write!(f, "unit '{entry_unit}' cannot be converted to '{item_unit}'"),
            Self::InvalidEntry { message } => write!(f, "invalid food entry: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedFood {
    pub identity: String,
    pub date: NaiveDate,
    pub food: Option<String>,
    pub reason: UnresolvedReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryReport {
    pub window: Option<TimeRange>,
    pub days_written: usize,
    pub days_cleared: usize,
    pub entries_resolved: usize,
    pub unresolved: Vec<UnresolvedFood>,
}

impl SummaryReport {
    #[must_use]
    pub fn new(window: Option<TimeRange>) -> Self {
        Self {
            window,
            days_written: 0,
            days_cleared: 0,
            entries_resolved: 0,
            unresolved: Vec::new(),
        }
    }

    #[must_use]
    pub fn unresolved_count(&self) -> usize {
        self.unresolved.len()
    }
}

// --- Units ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dimension {
    Mass,
    Volume,
}

/// Canonical spelling of a unit, so "grams" and "g" compare equal.
#[must_use]
pub fn normalize_unit(unit: &str) -> String {
    let lower = unit.trim().to_lowercase();
    let canonical = match lower.as_str() {
        "g" | "gram" | "grams" => "g",
        "mg" | "milligram" | "milligrams" => "mg",
        "kg" | "kilogram" | "kilograms" => "kg",
        "lb" | "lbs" | "pound" | "pounds" => "lb",
        "oz" | "ounce" | "ounces" => "oz",
        "ml" | "milliliter" | "milliliters" | "millilitre" | "millilitres" => "ml",
        "l" | "liter" | "liters" | "litre" | "litres" => "l",
        "tsp" | "teaspoon" | "teaspoons" => "tsp",
        "tbsp" | "tablespoon" | "tablespoons" => "tbsp",
        "cup" | "cups" => "cup",
        "fl oz" | "floz" | "fluid ounce" | "fluid ounces" => "fl oz",
        "serving" | "servings" => "serving",
        "piece" | "pieces" | "pc" | "pcs" => "piece",
        "each" | "ea" | "x" => "each",
        _ => return lower,
    };
    canonical.to_string()
}

fn unit_basis(canonical: &str) -> Option<(Dimension, f64)> {
    match canonical {
        "g" => Some((Dimension::Mass, 1.0)),
        "mg" => Some((Dimension::Mass, 0.001)),
        "kg" => Some((Dimension::Mass, 1000.0)),
        "lb" => Some((Dimension::Mass, 454.0)),
        "oz" => Some((Dimension::Mass, 28.35)),
        "ml" => Some((Dimension::Volume, 1.0)),
        "l" => Some((Dimension::Volume, 1000.0)),
        "tsp" => Some((Dimension::Volume, 5.0)),
        "tbsp" => Some((Dimension::Volume, 15.0)),
        "cup" => Some((Dimension::Volume, 240.0)),
        "fl oz" => Some((Dimension::Volume, 30.0)),
        _ => None,
    }
}

/// Convert `quantity` from one unit into another.
///
/// Identical units (after normalisation) always convert. Mass converts to
/// mass and volume to volume; anything else, including mass to volume, is
/// `None`. No density is ever assumed.
#[must_use]
pub fn convert_quantity(quantity: f64, from: &str, to: &str) -> Option<f64> {
    let from = normalize_unit(from);
    let to = normalize_unit(to);
    if from == to {
        return Some(quantity);
    }
    let (from_dim, from_factor) = unit_basis(&from)?;
    let (to_dim, to_factor) = unit_basis(&to)?;
    if from_dim != to_dim {
        return None;
    }
    Some(quantity * from_factor / to_factor)
}
