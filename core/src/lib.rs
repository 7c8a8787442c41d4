//! Core library for autojournal.
//!
//! Ingests time-stamped lifelog records from source providers into a tabular
//! store without duplicating or losing rows, and derives daily food summaries
//! from the stored food log.

pub mod db;
pub mod engine;
pub mod entry_points;
pub mod error;
pub mod food_db;
pub mod identity;
pub mod models;
pub mod provider;
pub mod providers;
pub mod service;
pub mod store;
pub mod summarizer;

pub use error::{StoreError, SyncError, SyncResult};
