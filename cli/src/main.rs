mod commands;
mod config;
mod lock;

use anyhow::Result;
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    cmd_food_add, cmd_food_import, cmd_food_list, cmd_history, cmd_providers, cmd_run,
    cmd_summarize_window, cmd_summary, parse_date, parse_window,
};
use crate::config::Config;
use crate::lock::RunLock;
use autojournal_core::entry_points::EntryPoint;
use autojournal_core::service::AutojournalService;

#[derive(Parser)]
#[command(
    name = "autojournal",
    version,
    about = "Collects lifelog data into one journal and summarizes what you ate"
)]
struct Cli {
    /// Treat this date as today (YYYY-MM-DD)
    #[arg(long, global = true, value_name = "DATE")]
    today: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync today's records from every provider
    AddToday {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sync the last week of records from every provider
    AddLastWeek {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sync the whole history; existing rows are kept and updated in place
    RegenerateAll {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compute daily nutrient totals (default: every unsummarized date)
    SummarizeFood {
        /// First date to summarize (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,
        /// Last date to summarize (default: today)
        #[arg(long)]
        to: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create the empty food database table
    MakeNewFoodDb {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Maintain the food database
    FoodDb {
        #[command(subcommand)]
        command: FoodDbCommands,
    },
    /// Show stored daily food summaries
    Summary {
        /// Number of days to show
        #[arg(short, long, default_value = "7")]
        days: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List configured providers
    Providers {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show recent runs
    History {
        /// Number of runs to show
        #[arg(short, long, default_value = "20")]
        limit: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum FoodDbCommands {
    /// Add a food, or replace the one with the same identifier
    Add {
        /// Identifier food entries refer to
        identifier: String,
        /// Display name
        name: String,
        /// Unit the nutrient amounts are given per (g, ml, serving, ...)
        #[arg(short, long)]
        unit: String,
        /// Nutrient amount per unit, as name=amount (repeatable)
        #[arg(short, long = "nutrient", value_name = "NAME=AMOUNT")]
        nutrients: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List foods
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Import foods from CSV (identifier,name,unit,<nutrient columns>...)
    Import {
        /// Path to the CSV file
        file: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let now = Local::now().date_naive();
    let today = match cli.today.as_deref() {
        Some(s) => parse_date(s, now)?,
        None => now,
    };

    // Anything that writes takes the run lock first.
    let _lock = if writes(&cli.command) {
        Some(RunLock::acquire(&config.data_dir.join("autojournal.lock"))?)
    } else {
        None
    };

    let registry = config.provider_registry()?;
    let svc = AutojournalService::new(&config.db_path, registry, config.window.clone())?;
    tracing::debug!(db = %config.db_path.display(), config = %config.config_path.display(), "opened");

    match cli.command {
        Commands::AddToday { json } => cmd_run(&svc, EntryPoint::AddToday, today, json),
        Commands::AddLastWeek { json } => cmd_run(&svc, EntryPoint::AddLastWeek, today, json),
        Commands::RegenerateAll { json } => cmd_run(&svc, EntryPoint::RegenerateAll, today, json),
        Commands::SummarizeFood { from, to, json } => {
            match parse_window(from.as_deref(), to.as_deref(), today)? {
                Some(window) => cmd_summarize_window(&svc, window, today, json),
                None => cmd_run(&svc, EntryPoint::SummarizeFood, today, json),
            }
        }
        Commands::MakeNewFoodDb { json } => {
            cmd_run(&svc, EntryPoint::MakeNewFoodDbSheet, today, json)
        }
        Commands::FoodDb { command } => match command {
            FoodDbCommands::Add {
                identifier,
                name,
                unit,
                nutrients,
                json,
            } => cmd_food_add(&svc, &identifier, &name, &unit, &nutrients, json),
            FoodDbCommands::List { json } => cmd_food_list(&svc, json),
            FoodDbCommands::Import { file, json } => cmd_food_import(&svc, &file, json),
        },
        Commands::Summary { days, json } => cmd_summary(&svc, days, today, json),
        Commands::Providers { json } => cmd_providers(&svc, json),
        Commands::History { limit, json } => cmd_history(&svc, limit, json),
    }
}

fn writes(command: &Commands) -> bool {
    match command {
        Commands::AddToday { .. }
        | Commands::AddLastWeek { .. }
        | Commands::RegenerateAll { .. }
        | Commands::SummarizeFood { .. }
        | Commands::MakeNewFoodDb { .. } => true,
        Commands::FoodDb { command } => !matches!(command, FoodDbCommands::List { .. }),
        Commands::Summary { .. } | Commands::Providers { .. } | Commands::History { .. } => false,
    }
}
