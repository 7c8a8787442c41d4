mod food;
mod helpers;
mod run;
mod summary;

pub(crate) use food::{cmd_food_add, cmd_food_import, cmd_food_list};
pub(crate) use helpers::{parse_date, parse_window};
pub(crate) use run::{cmd_providers, cmd_run, cmd_summarize_window};
pub(crate) use summary::{cmd_history, cmd_summary};
