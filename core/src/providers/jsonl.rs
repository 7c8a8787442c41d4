use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use serde_json::Value;

use crate::models::{Category, RawRecord, TimeRange, Timestamp};
use crate::provider::SourceProvider;

/// Parse a JSON-lines tracker export.
///
/// Each non-blank line is an object with a `timestamp` (or `date`) field and
/// an optional `id`; every other field becomes the record payload.
pub fn parse_jsonl<R: Read>(reader: R) -> Result<Vec<RawRecord>> {
    let mut records = Vec::new();
    for (line_num, line) in BufReader::new(reader).lines().enumerate() {
        let line_no = line_num + 1;
        let line = line.with_context(|| format!("Failed to read line {line_no}"))?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line)
            .with_context(|| format!("Line {line_no} is not valid JSON"))?;
        let Value::Object(mut payload) = value else {
            bail!("Line {line_no} is not a JSON object");
        };

        let raw_ts = payload
            .remove("timestamp")
            .or_else(|| payload.remove("date"))
            .with_context(|| format!("Line {line_no} has no 'timestamp' or 'date'"))?;
        let Value::String(raw_ts) = raw_ts else {
            bail!("Line {line_no}: timestamp must be a string");
        };
        let timestamp: Timestamp = raw_ts
            .parse()
            .with_context(|| format!("Line {line_no}"))?;

        let native_id = match payload.remove("id") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::String(s)) => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(other) => bail!("Line {line_no}: id must be a string or number, got {other}"),
        };

        records.push(RawRecord {
            native_id,
            timestamp,
            payload,
        });
    }
    Ok(records)
}

/// Reads records of one category from a JSON-lines file on disk.
pub struct JsonlProvider {
    id: String,
    category: Category,
    path: PathBuf,
}

impl JsonlProvider {
    pub fn new(id: impl Into<String>, category: Category, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            category,
            path: path.into(),
        }
    }

    fn load(&self) -> Result<Vec<RawRecord>> {
        let file = std::fs::File::open(&self.path)
            .with_context(|| format!("Failed to open file: {}", self.path.display()))?;
        parse_jsonl(file).with_context(|| format!("Failed to read {}", self.path.display()))
    }
}

impl SourceProvider for JsonlProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn category(&self) -> Category {
        self.category
    }

    fn fetch(&self, window: &TimeRange) -> Result<Vec<RawRecord>> {
        Ok(self
            .load()?
            .into_iter()
            .filter(|r| window.contains(r.timestamp.date()))
            .collect())
    }

    fn earliest_date(&self) -> Result<Option<NaiveDate>> {
        Ok(self.load()?.iter().map(|r| r.timestamp.date()).min())
    }
}
