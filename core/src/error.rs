use chrono::NaiveDate;
use thiserror::Error;

/// Failures raised by a [`crate::store::TabularStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("malformed JSON in stored row: {0}")]
    Json(#[from] serde_json::Error),

    #[error("table does not exist: {0}")]
    UnknownTable(String),

    #[error("table {table} already has a row with key {key}")]
    DuplicateKey { table: String, key: String },

    #[error("table {table} has no column named {column}")]
    UnknownColumn { table: String, column: String },

    #[error("row {key} in {table} is malformed: {reason}")]
    MalformedRow {
        table: String,
        key: String,
        reason: String,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Fatal errors that stop a sync or summarization run.
///
/// Recoverable problems (a provider that failed to fetch, a food reference
/// that does not resolve) never show up here; they are collected into the
/// run's report instead.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid window: start {start} is after end {end}")]
    InvalidWindow { start: NaiveDate, end: NaiveDate },

    #[error("invalid window: {0}")]
    MalformedWindow(String),

    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),

    #[error("table {0} is missing; run `autojournal make-new-food-db` first")]
    MissingTable(String),

    #[error("invalid food item: {0}")]
    InvalidFoodItem(String),
}

pub type SyncResult<T> = Result<T, SyncError>;
