use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use crate::error::StoreError;
use crate::models::{DATE_FORMAT, TimeRange};
use crate::store::{DAILY_FOOD_SUMMARY, Row, TableSchema, TabularStore};

/// SQLite-backed tabular store.
///
/// Logical tables live in one `rows` table keyed by `(table_name, row_key)`;
/// the `tables` registry records each table's columns.
pub struct Database {
    conn: Connection,
}

/// One finished run, as recorded in `sync_runs`.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub id: i64,
    pub operation: String,
    pub window_start: Option<String>,
    pub window_end: Option<String>,
    pub report: serde_json::Value,
    pub finished_at: String,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS tables (
                    name TEXT PRIMARY KEY,
                    columns TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS rows (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    table_name TEXT NOT NULL REFERENCES tables(name),
                    row_key TEXT NOT NULL,
                    row_date TEXT,
                    cells TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    UNIQUE (table_name, row_key)
                );

                CREATE INDEX IF NOT EXISTS idx_rows_table_date ON rows(table_name, row_date);

                PRAGMA user_version = 1;",
            )?;
        }

        if version < 2 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS sync_runs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    operation TEXT NOT NULL,
                    window_start TEXT,
                    window_end TEXT,
                    report TEXT NOT NULL,
                    finished_at TEXT NOT NULL
                );

                PRAGMA user_version = 2;",
            )?;
        }

        if version < 3 {
            // Summaries now carry a digest of the entries they were built from.
            self.conn.execute(
                "UPDATE tables SET columns = ?1 WHERE name = ?2",
                params![
                    serde_json::to_string(DAILY_FOOD_SUMMARY.columns)?,
                    DAILY_FOOD_SUMMARY.name
                ],
            )?;
            self.conn.execute_batch("PRAGMA user_version = 3;")?;
        }

        Ok(())
    }

    fn columns_of(&self, table: &str) -> Result<Vec<String>, StoreError> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT columns FROM tables WHERE name = ?1",
                params![table],
                |row| row.get(0),
            )
            .optional()?;
        let raw = raw.ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn check_row(&self, table: &str, row: &Row) -> Result<(), StoreError> {
        let columns = self.columns_of(table)?;
        if let Some(column) = row.cells.keys().find(|c| !columns.contains(c)) {
            return Err(StoreError::UnknownColumn {
                table: table.to_string(),
                column: column.clone(),
            });
        }
        Ok(())
    }

    fn query_rows(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Row>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let raw = stmt
            .query_map(params, |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter()
            .map(|(key, date, cells)| row_from_parts(key, date.as_deref(), &cells))
            .collect()
    }

    fn ensure_table(&self, table: &str) -> Result<(), StoreError> {
        if self.has_table(table)? {
            Ok(())
        } else {
            Err(StoreError::UnknownTable(table.to_string()))
        }
    }

    // --- Run history ---

    pub fn record_run<T: Serialize>(
        &self,
        operation: &str,
        window: Option<&TimeRange>,
        report: &T,
    ) -> Result<(), StoreError> {
        let now = Local::now().to_rfc3339();
        let report = serde_json::to_string(report)?;
        self.conn.execute(
            "INSERT INTO sync_runs (operation, window_start, window_end, report, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                operation,
                window.map(|w| w.start().format(DATE_FORMAT).to_string()),
                window.map(|w| w.end().format(DATE_FORMAT).to_string()),
                report,
                now,
            ],
        )?;
        Ok(())
    }

    pub fn recent_runs(&self, limit: i64) -> Result<Vec<RunRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, operation, window_start, window_end, report, finished_at
             FROM sync_runs ORDER BY id DESC LIMIT ?1",
        )?;
        let raw = stmt
            .query_map(params![limit], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter()
            .map(
                |(id, operation, window_start, window_end, report, finished_at)| -> Result<RunRecord, StoreError> {
                    Ok(RunRecord {
                        id,
                        operation,
                        window_start,
                        window_end,
                        report: serde_json::from_str(&report)?,
                        finished_at,
                    })
                },
            )
            .collect()
    }
}

fn row_from_parts(key: String, date: Option<&str>, cells: &str) -> Result<Row, StoreError> {
    let date = date
        .map(|d| NaiveDate::parse_from_str(d, DATE_FORMAT))
        .transpose()
        .map_err(|e| StoreError::MalformedRow {
            table: "rows".to_string(),
            key: key.clone(),
            reason: format!("bad row_date: {e}"),
        })?;
    Ok(Row {
        key,
        date,
        cells: serde_json::from_str(cells)?,
    })
}

fn date_text(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format(DATE_FORMAT).to_string())
}

impl TabularStore for Database {
    fn create_table_if_absent(&self, schema: &TableSchema) -> Result<bool, StoreError> {
        let now = Local::now().to_rfc3339();
        let columns = serde_json::to_string(schema.columns)?;
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO tables (name, columns, created_at) VALUES (?1, ?2, ?3)",
            params![schema.name, columns, now],
        )?;
        Ok(inserted > 0)
    }

    fn has_table(&self, table: &str) -> Result<bool, StoreError> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM tables WHERE name = ?1)",
            params![table],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn read_range(&self, table: &str, window: &TimeRange) -> Result<Vec<Row>, StoreError> {
        self.ensure_table(table)?;
        let start = window.start().format(DATE_FORMAT).to_string();
        let end = window.end().format(DATE_FORMAT).to_string();
        self.query_rows(
            "SELECT row_key, row_date, cells FROM rows
             WHERE table_name = ?1 AND row_date BETWEEN ?2 AND ?3
             ORDER BY id",
            &[&table, &start, &end],
        )
    }

    fn read_all(&self, table: &str) -> Result<Vec<Row>, StoreError> {
        self.ensure_table(table)?;
        self.query_rows(
            "SELECT row_key, row_date, cells FROM rows WHERE table_name = ?1 ORDER BY id",
            &[&table],
        )
    }

    fn get(&self, table: &str, key: &str) -> Result<Option<Row>, StoreError> {
        self.ensure_table(table)?;
        let mut rows = self.query_rows(
            "SELECT row_key, row_date, cells FROM rows WHERE table_name = ?1 AND row_key = ?2",
            &[&table, &key],
        )?;
        Ok(rows.pop())
    }

    fn insert(&self, table: &str, row: &Row) -> Result<(), StoreError> {
        self.check_row(table, row)?;
        if self.get(table, &row.key)?.is_some() {
            return Err(StoreError::DuplicateKey {
                table: table.to_string(),
                key: row.key.clone(),
            });
        }
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO rows (table_name, row_key, row_date, cells, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                table,
                row.key,
                date_text(row.date),
                serde_json::to_string(&row.cells)?,
                now,
                now,
            ],
        )?;
        Ok(())
    }

    fn upsert(&self, table: &str, key: &str, row: &Row) -> Result<(), StoreError> {
        if row.key != key {
            return Err(StoreError::MalformedRow {
                table: table.to_string(),
                key: key.to_string(),
                reason: format!("row carries key {}", row.key),
            });
        }
        self.check_row(table, row)?;
        let now = Local::now().to_rfc3339();
        // ON CONFLICT keeps the existing rowid, so the row keeps its position.
        self.conn.execute(
            "INSERT INTO rows (table_name, row_key, row_date, cells, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(table_name, row_key) DO UPDATE SET
                row_date = excluded.row_date,
                cells = excluded.cells,
                updated_at = excluded.updated_at",
            params![
                table,
                key,
                date_text(row.date),
                serde_json::to_string(&row.cells)?,
                now,
                now,
            ],
        )?;
        Ok(())
    }

    fn delete(&self, table: &str, key: &str) -> Result<bool, StoreError> {
        self.ensure_table(table)?;
        let rows = self.conn.execute(
            "DELETE FROM rows WHERE table_name = ?1 AND row_key = ?2",
            params![table, key],
        )?;
        Ok(rows > 0)
    }

    fn earliest_date(&self, table: &str) -> Result<Option<NaiveDate>, StoreError> {
        self.ensure_table(table)?;
        let min: Option<String> = self.conn.query_row(
            "SELECT MIN(row_date) FROM rows WHERE table_name = ?1",
            params![table],
            |row| row.get(0),
        )?;
        min.map(|d| {
            NaiveDate::parse_from_str(&d, DATE_FORMAT).map_err(|e| StoreError::MalformedRow {
                table: table.to_string(),
                key: String::new(),
                reason: format!("bad row_date: {e}"),
            })
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FOOD_DB;

    const NOTES: TableSchema = TableSchema {
        name: "notes",
        columns: &["text"],
    };

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn note(key: &str, day: u32, text: &str) -> Row {
        Row::new(key, Some(date(2024, 3, day))).with("text", text)
    }

    #[test]
    fn test_create_table_if_absent_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        assert!(!db.has_table("notes").unwrap());
        assert!(db.create_table_if_absent(&NOTES).unwrap());
        assert!(!db.create_table_if_absent(&NOTES).unwrap());
        assert!(db.has_table("notes").unwrap());
    }

    #[test]
    fn test_insert_and_get() {
        let db = Database::open_in_memory().unwrap();
        db.create_table_if_absent(&NOTES).unwrap();
        let row = note("a", 1, "hello");
        db.insert("notes", &row).unwrap();

        assert_eq!(db.get("notes", "a").unwrap(), Some(row));
        assert_eq!(db.get("notes", "b").unwrap(), None);
    }

    #[test]
    fn test_insert_duplicate_key_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.create_table_if_absent(&NOTES).unwrap();
        db.insert("notes", &note("a", 1, "hello")).unwrap();
        let err = db.insert("notes", &note("a", 2, "again")).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
    }

    #[test]
    fn test_insert_unknown_column_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.create_table_if_absent(&NOTES).unwrap();
        let row = note("a", 1, "hello").with("mood", "good");
        let err = db.insert("notes", &row).unwrap_err();
        assert!(matches!(err, StoreError::UnknownColumn { .. }));
    }

    #[test]
    fn test_unknown_table() {
        let db = Database::open_in_memory().unwrap();
        let err = db.read_all("nope").unwrap_err();
        assert!(matches!(err, StoreError::UnknownTable(_)));
        assert!(db.insert("nope", &note("a", 1, "x")).is_err());
    }

    #[test]
    fn test_read_range_inclusive_and_ordered() {
        let db = Database::open_in_memory().unwrap();
        db.create_table_if_absent(&NOTES).unwrap();
        db.insert("notes", &note("c", 3, "third")).unwrap();
        db.insert("notes", &note("a", 1, "first")).unwrap();
        db.insert("notes", &note("b", 2, "second")).unwrap();
        db.insert("notes", &note("d", 4, "fourth")).unwrap();

        let window = TimeRange::new(date(2024, 3, 1), date(2024, 3, 3)).unwrap();
        let keys: Vec<String> = db
            .read_range("notes", &window)
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_upsert_overwrites_in_place() {
        let db = Database::open_in_memory().unwrap();
        db.create_table_if_absent(&NOTES).unwrap();
        db.insert("notes", &note("a", 1, "first")).unwrap();
        db.insert("notes", &note("b", 1, "second")).unwrap();

        db.upsert("notes", "a", &note("a", 1, "edited")).unwrap();

        let rows = db.read_all("notes").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, "a");
        assert_eq!(rows[0].text("notes", "text").unwrap(), "edited");
    }

    #[test]
    fn test_upsert_inserts_missing_row() {
        let db = Database::open_in_memory().unwrap();
        db.create_table_if_absent(&NOTES).unwrap();
        db.upsert("notes", "a", &note("a", 1, "new")).unwrap();
        assert_eq!(db.read_all("notes").unwrap().len(), 1);
    }

    #[test]
    fn test_upsert_key_mismatch_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.create_table_if_absent(&NOTES).unwrap();
        let err = db.upsert("notes", "b", &note("a", 1, "x")).unwrap_err();
        assert!(matches!(err, StoreError::MalformedRow { .. }));
    }

    #[test]
    fn test_delete_and_earliest_date() {
        let db = Database::open_in_memory().unwrap();
        db.create_table_if_absent(&NOTES).unwrap();
        assert_eq!(db.earliest_date("notes").unwrap(), None);

        db.insert("notes", &note("a", 5, "x")).unwrap();
        db.insert("notes", &note("b", 2, "y")).unwrap();
        assert_eq!(db.earliest_date("notes").unwrap(), Some(date(2024, 3, 2)));

        assert!(db.delete("notes", "b").unwrap());
        assert!(!db.delete("notes", "b").unwrap());
        assert_eq!(db.earliest_date("notes").unwrap(), Some(date(2024, 3, 5)));
    }

    #[test]
    fn test_tables_are_isolated() {
        let db = Database::open_in_memory().unwrap();
        db.create_table_if_absent(&NOTES).unwrap();
        db.create_table_if_absent(&FOOD_DB).unwrap();
        db.insert("notes", &note("oats", 1, "x")).unwrap();
        assert!(db.read_all("food_db").unwrap().is_empty());
        assert!(db.get("food_db", "oats").unwrap().is_none());
    }

    #[test]
    fn test_migration_sets_user_version() {
        let db = Database::open_in_memory().unwrap();
        let version: i64 = db
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, 3);
    }

    #[test]
    fn test_migration_widens_existing_summary_table() {
        let db = Database::open_in_memory().unwrap();
        db.conn
            .execute_batch(
                "INSERT INTO tables (name, columns, created_at) VALUES
                    ('daily_food_summary', '[\"date\",\"nutrients\",\"entry_count\",\"unresolved_count\"]', 'then');
                 PRAGMA user_version = 2;",
            )
            .unwrap();
        db.migrate().unwrap();

        let columns = db.columns_of("daily_food_summary").unwrap();
        assert!(columns.iter().any(|c| c == "sources"));
    }

    #[test]
    fn test_record_and_list_runs() {
        let db = Database::open_in_memory().unwrap();
        let window = TimeRange::day(date(2024, 3, 1));
        db.record_run("add_today", Some(&window), &serde_json::json!({ "inserted": 2 }))
            .unwrap();
        db.record_run("make_new_food_db_sheet", None, &serde_json::json!({ "created": true }))
            .unwrap();

        let runs = db.recent_runs(10).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].operation, "make_new_food_db_sheet");
        assert_eq!(runs[1].window_start.as_deref(), Some("2024-03-01"));
        assert_eq!(runs[1].report["inserted"], 2);
    }

    #[test]
    fn test_open_file_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.db");
        {
            let db = Database::open(&path).unwrap();
            db.create_table_if_absent(&NOTES).unwrap();
            db.insert("notes", &note("a", 1, "kept")).unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.read_all("notes").unwrap().len(), 1);
    }
}
