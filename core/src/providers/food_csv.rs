use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, NaiveTime};
use serde_json::{Map, Value};

use super::parse_export_date;
use crate::models::{Category, RawRecord, TimeRange, Timestamp};
use crate::provider::SourceProvider;

/// A single serving parsed from a food-log CSV export.
#[derive(Debug, Clone, PartialEq)]
pub struct FoodLogRow {
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
    pub id: Option<String>,
    pub meal: Option<String>,
    pub food_name: String,
    /// Left as text when it is not a number, so the sync report can say why.
    pub amount: Value,
    pub unit: String,
}

impl FoodLogRow {
    #[must_use]
    pub fn into_record(self) -> RawRecord {
        let timestamp = match self.time {
            Some(t) => Timestamp::DateTime(self.date.and_time(t)),
            None => Timestamp::Date(self.date),
        };
        let mut payload = Map::new();
        payload.insert("food".into(), Value::String(self.food_name));
        payload.insert("quantity".into(), self.amount);
        payload.insert("unit".into(), Value::String(self.unit));
        if let Some(meal) = self.meal {
            payload.insert("meal".into(), Value::String(meal));
        }
        RawRecord {
            native_id: self.id,
            timestamp,
            payload,
        }
    }
}

/// Parse a food-log CSV export from any reader.
///
/// Expected header (case-insensitive):
/// `Date,Food Name,Amount,Unit` plus optional `Time`, `Id`, `Meal`.
pub fn parse_food_log_csv<R: Read>(reader: R) -> Result<Vec<FoodLogRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers().context("Failed to read CSV headers")?.clone();

    let required = ["Date", "Food Name", "Amount", "Unit"];
    for name in &required {
        if !headers.iter().any(|h| h.eq_ignore_ascii_case(name)) {
            bail!("Missing required column: {name}");
        }
    }

    let col =
        |name: &str| -> Option<usize> { headers.iter().position(|h| h.eq_ignore_ascii_case(name)) };

    let idx_date = col("Date").context("Missing 'Date' column")?;
    let idx_food = col("Food Name").context("Missing 'Food Name' column")?;
    let idx_amount = col("Amount").context("Missing 'Amount' column")?;
    let idx_unit = col("Unit").context("Missing 'Unit' column")?;
    let idx_time = col("Time");
    let idx_id = col("Id");
    let idx_meal = col("Meal");

    let mut rows = Vec::new();

    for (line_num, result) in rdr.records().enumerate() {
        let line = line_num + 2;
        let record = result.with_context(|| format!("Failed to parse CSV row {line}"))?;

        let field = |idx: usize| record.get(idx).unwrap_or("").trim();
        let optional = |idx: Option<usize>| {
            idx.map(field)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let date = field(idx_date);
        let food_name = field(idx_food);
        if date.is_empty() || food_name.is_empty() {
            continue; // skip blank rows
        }

        let date = parse_export_date(date).with_context(|| format!("CSV row {line}"))?;
        let time = optional(idx_time)
            .map(|t| {
                NaiveTime::parse_from_str(&t, "%H:%M:%S")
                    .or_else(|_| NaiveTime::parse_from_str(&t, "%H:%M"))
                    .with_context(|| format!("CSV row {line}: cannot parse time '{t}'"))
            })
            .transpose()?;

        let raw_amount = field(idx_amount);
        let amount = raw_amount
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map_or_else(|| Value::String(raw_amount.to_string()), Value::Number);

        rows.push(FoodLogRow {
            date,
            time,
            id: optional(idx_id),
            meal: optional(idx_meal),
            food_name: food_name.to_string(),
            amount,
            unit: field(idx_unit).to_string(),
        });
    }

    Ok(rows)
}

/// Reads servings from a food-log CSV export on disk.
pub struct FoodCsvProvider {
    id: String,
    path: PathBuf,
}

impl FoodCsvProvider {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }

    fn load(&self) -> Result<Vec<FoodLogRow>> {
        let file = std::fs::File::open(&self.path)
            .with_context(|| format!("Failed to open file: {}", self.path.display()))?;
        parse_food_log_csv(file).with_context(|| format!("Failed to read {}", self.path.display()))
    }
}

impl SourceProvider for FoodCsvProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn category(&self) -> Category {
        Category::Food
    }

    fn fetch(&self, window: &TimeRange) -> Result<Vec<RawRecord>> {
        Ok(self
            .load()?
            .into_iter()
            .filter(|row| window.contains(row.date))
            .map(FoodLogRow::into_record)
            .collect())
    }

    fn earliest_date(&self) -> Result<Option<NaiveDate>> {
        Ok(self.load()?.iter().map(|row| row.date).min())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE_CSV: &str = "\
Date,Time,Id,Meal,Food Name,Amount,Unit
2024-01-15,07:30,e1,Breakfast,Oatmeal,40,g
2024-01-15,12:10,e2,Lunch,Chicken Breast,150,g
2024-01-16,,,Dinner,Salmon Fillet,1,serving
2024-01-17,08:00,e4,Breakfast,Greek Yogurt,a bit,g
";

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_food_log_csv_basic() {
        let rows = parse_food_log_csv(SAMPLE_CSV.as_bytes()).unwrap();
        assert_eq!(rows.len(), 4);

        assert_eq!(rows[0].date, date(2024, 1, 15));
        assert_eq!(rows[0].time, NaiveTime::from_hms_opt(7, 30, 0));
        assert_eq!(rows[0].id.as_deref(), Some("e1"));
        assert_eq!(rows[0].meal.as_deref(), Some("Breakfast"));
        assert_eq!(rows[0].food_name, "Oatmeal");
        assert_eq!(rows[0].amount, serde_json::json!(40.0));
        assert_eq!(rows[0].unit, "g");

        assert!(rows[2].time.is_none());
        assert!(rows[2].id.is_none());
        assert_eq!(rows[3].amount, Value::String("a bit".into()));
    }

    #[test]
    fn test_parse_food_log_csv_missing_required_column() {
        let bad_csv = "Date,Food Name,Amount\n2024-01-15,Oats,40\n";
        let result = parse_food_log_csv(bad_csv.as_bytes());
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Unit"));
    }

    #[test]
    fn test_parse_food_log_csv_skips_blank_rows() {
        let csv = "\
Date,Food Name,Amount,Unit
2024-01-15,Chicken,150,g
,,,
2024-01-15,Rice,200,g
";
        let rows = parse_food_log_csv(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_parse_food_log_csv_bad_date_fails() {
        let csv = "Date,Food Name,Amount,Unit\nsometime,Rice,200,g\n";
        let err = parse_food_log_csv(csv.as_bytes()).unwrap_err();
        assert!(format!("{err:#}").contains("row 2"));
    }

    #[test]
    fn test_into_record_payload() {
        let rows = parse_food_log_csv(SAMPLE_CSV.as_bytes()).unwrap();
        let record = rows[0].clone().into_record();
        assert_eq!(record.native_id.as_deref(), Some("e1"));
        assert_eq!(record.timestamp.to_string(), "2024-01-15T07:30:00");
        assert_eq!(record.payload["food"], "Oatmeal");
        assert_eq!(record.payload["meal"], "Breakfast");

        let record = rows[2].clone().into_record();
        assert_eq!(record.timestamp, Timestamp::Date(date(2024, 1, 16)));
        assert_eq!(record.payload["meal"], "Dinner");
    }

    #[test]
    fn test_provider_fetch_filters_window() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE_CSV.as_bytes()).unwrap();
        let provider = FoodCsvProvider::new("cronometer", file.path());

        let window = TimeRange::day(date(2024, 1, 15));
        let records = provider.fetch(&window).unwrap();
        assert_eq!(records.len(), 2);

        let again = provider.fetch(&window).unwrap();
        assert_eq!(records, again);

        assert_eq!(provider.earliest_date().unwrap(), Some(date(2024, 1, 15)));
        assert_eq!(provider.category(), Category::Food);
    }

    #[test]
    fn test_provider_missing_file_errors() {
        let provider = FoodCsvProvider::new("cronometer", "/nonexistent/servings.csv");
        let window = TimeRange::day(date(2024, 1, 15));
        assert!(provider.fetch(&window).is_err());
    }
}
