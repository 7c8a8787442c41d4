//! Source provider seam and the in-process registry of providers.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::NaiveDate;
use thiserror::Error;

use crate::models::{Category, RawRecord, TimeRange};

/// Supplies raw records for a requested window.
///
/// `fetch` must be safe to call repeatedly with the same window: it may not
/// change anything on the provider side.
pub trait SourceProvider: Send + Sync {
    /// Stable id; becomes the `source` of every entry this provider yields.
    fn id(&self) -> &str;

    fn category(&self) -> Category;

    fn fetch(&self, window: &TimeRange) -> Result<Vec<RawRecord>>;

    /// Earliest date this provider has data for, when it can tell cheaply.
    fn earliest_date(&self) -> Result<Option<NaiveDate>> {
        Ok(None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderRegistryError {
    #[error("provider id is invalid: {0}")]
    InvalidProviderId(String),
    #[error("provider id already registered: {0}")]
    DuplicateProviderId(String),
}

/// Registered providers, iterated in id order.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Box<dyn SourceProvider>>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        provider: Box<dyn SourceProvider>,
    ) -> Result<(), ProviderRegistryError> {
        let provider_id = provider.id().trim().to_string();
        if !is_valid_provider_id(&provider_id) {
            return Err(ProviderRegistryError::InvalidProviderId(provider_id));
        }
        if self.providers.contains_key(provider_id.as_str()) {
            return Err(ProviderRegistryError::DuplicateProviderId(provider_id));
        }
        self.providers.insert(provider_id, provider);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    #[must_use]
    pub fn provider_ids(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    #[must_use]
    pub fn get(&self, provider_id: &str) -> Option<&dyn SourceProvider> {
        self.providers.get(provider_id.trim()).map(|p| &**p)
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn SourceProvider> {
        self.providers.values().map(|p| &**p)
    }
}

fn is_valid_provider_id(value: &str) -> bool {
    if value.is_empty() || value.len() > 64 {
        return false;
    }
    value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}
