use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use serde::Serialize;

use autojournal_core::models::TimeRange;

/// Parse a date argument relative to `today`.
pub(crate) fn parse_date(date_str: &str, today: NaiveDate) -> Result<NaiveDate> {
    match date_str.trim() {
        "today" => Ok(today),
        "yesterday" => Ok(today - chrono::Duration::days(1)),
        s => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday")),
    }
}

/// Build an explicit window from optional bounds. `None` when neither is given.
pub(crate) fn parse_window(
    from: Option<&str>,
    to: Option<&str>,
    today: NaiveDate,
) -> Result<Option<TimeRange>> {
    let (from, to) = match (from, to) {
        (None, None) => return Ok(None),
        (Some(f), None) => (parse_date(f, today)?, today),
        (None, Some(_)) => bail!("--to needs --from"),
        (Some(f), Some(t)) => (parse_date(f, today)?, parse_date(t, today)?),
    };
    Ok(Some(TimeRange::new(from, to)?))
}

/// Parse `name=amount` nutrient arguments.
pub(crate) fn parse_nutrients(pairs: &[String]) -> Result<BTreeMap<String, f64>> {
    let mut nutrients = BTreeMap::new();
    for pair in pairs {
        let (name, amount) = pair
            .split_once('=')
            .with_context(|| format!("Invalid nutrient '{pair}'. Use name=amount"))?;
        let amount: f64 = amount
            .trim()
            .parse()
            .with_context(|| format!("Invalid amount in '{pair}'"))?;
        nutrients.insert(name.trim().to_lowercase(), amount);
    }
    Ok(nutrients)
}

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) fn format_amount(v: f64) -> String {
    let v = no_neg_zero(v);
    if v.fract() == 0.0 {
        format!("{v:.0}")
    } else {
        format!("{v:.1}")
    }
}

pub(crate) fn no_neg_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_date_keywords() {
        let today = date(2024, 3, 1);
        assert_eq!(parse_date("today", today).unwrap(), today);
        assert_eq!(parse_date("yesterday", today).unwrap(), date(2024, 2, 29));
        assert_eq!(parse_date("2024-01-15", today).unwrap(), date(2024, 1, 15));
        assert!(parse_date("nope", today).is_err());
    }

    #[test]
    fn test_parse_window() {
        let today = date(2024, 3, 10);
        assert!(parse_window(None, None, today).unwrap().is_none());

        let w = parse_window(Some("2024-03-01"), None, today).unwrap().unwrap();
        assert_eq!(w.start(), date(2024, 3, 1));
        assert_eq!(w.end(), today);

        assert!(parse_window(None, Some("2024-03-01"), today).is_err());
        assert!(parse_window(Some("2024-03-05"), Some("2024-03-01"), today).is_err());
    }

    #[test]
    fn test_parse_nutrients() {
        let n = parse_nutrients(&["Calories=3.8".into(), "protein = 0.13".into()]).unwrap();
        assert_eq!(n["calories"], 3.8);
        assert_eq!(n["protein"], 0.13);
        assert!(parse_nutrients(&["calories".into()]).is_err());
        assert!(parse_nutrients(&["calories=lots".into()]).is_err());
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(250.0), "250");
        assert_eq!(format_amount(5.26), "5.3");
        assert_eq!(format_amount(-0.0), "0");
    }

    #[test]
    fn test_truncate_utf8() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("Crème fraîche", 10), "Crème f...");
    }
}
