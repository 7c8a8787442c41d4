//! The five named operations and how each one picks its window.

use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::models::TimeRange;

/// How `add_last_week` reads "last week".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LastWeekMode {
    /// `[today - lookback_days, today]`.
    #[default]
    Rolling,
    /// Monday of the previous ISO week through today.
    Calendar,
}

/// Where `regenerate_all` starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegenerateFrom {
    #[default]
    Epoch,
    /// Earliest date found in the store or reported by a provider.
    Earliest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowPolicy {
    pub last_week: LastWeekMode,
    pub lookback_days: u32,
    pub regenerate_from: RegenerateFrom,
    pub epoch: NaiveDate,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            last_week: LastWeekMode::default(),
            lookback_days: 7,
            regenerate_from: RegenerateFrom::default(),
            // 1970-01-01
            epoch: NaiveDate::default(),
        }
    }
}

impl WindowPolicy {
    #[must_use]
    pub fn today_window(&self, today: NaiveDate) -> TimeRange {
        TimeRange::day(today)
    }

    #[must_use]
    pub fn last_week_window(&self, today: NaiveDate) -> TimeRange {
        match self.last_week {
            LastWeekMode::Rolling => TimeRange::trailing(today, self.lookback_days),
            LastWeekMode::Calendar => {
                TimeRange::trailing(today, today.weekday().num_days_from_monday() + 7)
            }
        }
    }

    /// Window for `regenerate_all`. `earliest` is only consulted in
    /// [`RegenerateFrom::Earliest`] mode; with no known data the window
    /// collapses to `today`.
    pub fn regenerate_window(
        &self,
        today: NaiveDate,
        earliest: Option<NaiveDate>,
    ) -> Result<TimeRange, SyncError> {
        let start = match self.regenerate_from {
            RegenerateFrom::Epoch => self.epoch,
            RegenerateFrom::Earliest => earliest.unwrap_or(today).min(today),
        };
        TimeRange::new(start, today)
    }
}

/// Which component an entry point drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    UpdateEngine,
    FoodSummarizer,
    FoodDatabase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPoint {
    MakeNewFoodDbSheet,
    SummarizeFood,
    AddToday,
    AddLastWeek,
    RegenerateAll,
}

impl EntryPoint {
    pub const ALL: [EntryPoint; 5] = [
        EntryPoint::MakeNewFoodDbSheet,
        EntryPoint::SummarizeFood,
        EntryPoint::AddToday,
        EntryPoint::AddLastWeek,
        EntryPoint::RegenerateAll,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            EntryPoint::MakeNewFoodDbSheet => "make_new_food_db_sheet",
            EntryPoint::SummarizeFood => "summarize_food",
            EntryPoint::AddToday => "add_today",
            EntryPoint::AddLastWeek => "add_last_week",
            EntryPoint::RegenerateAll => "regenerate_all",
        }
    }

    /// Accepts the snake_case name or its kebab-case CLI spelling.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().replace('-', "_");
        Self::ALL.into_iter().find(|e| e.name() == name)
    }

    #[must_use]
    pub fn subsystem(self) -> Subsystem {
        match self {
            EntryPoint::MakeNewFoodDbSheet => Subsystem::FoodDatabase,
            EntryPoint::SummarizeFood => Subsystem::FoodSummarizer,
            EntryPoint::AddToday | EntryPoint::AddLastWeek | EntryPoint::RegenerateAll => {
                Subsystem::UpdateEngine
            }
        }
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
