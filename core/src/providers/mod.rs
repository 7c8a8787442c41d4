//! File-backed source providers.

pub mod food_csv;
pub mod jsonl;

pub use food_csv::FoodCsvProvider;
pub use jsonl::JsonlProvider;

use anyhow::{Result, bail};
use chrono::NaiveDate;

/// Normalize an exported date to a `NaiveDate`.
///
/// Exports use `YYYY-MM-DD`, and sometimes `M/D/YYYY` or `D/M/YYYY`.
pub(crate) fn parse_export_date(raw: &str) -> Result<NaiveDate> {
    let raw = raw.trim();
    for fmt in ["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return Ok(d);
        }
    }
    bail!("Cannot parse date: '{raw}'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_export_date_iso() {
        assert_eq!(
            parse_export_date("2024-01-15").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
        );
    }

    #[test]
    fn test_parse_export_date_us_format() {
        assert_eq!(
            parse_export_date("1/15/2024").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
        );
    }

    #[test]
    fn test_parse_export_date_invalid() {
        assert!(parse_export_date("not-a-date").is_err());
    }
}
