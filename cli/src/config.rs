use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use serde::Deserialize;

use autojournal_core::entry_points::WindowPolicy;
use autojournal_core::models::Category;
use autojournal_core::provider::{ProviderRegistry, SourceProvider};
use autojournal_core::providers::{FoodCsvProvider, JsonlProvider};

/// Overrides the config file location.
pub const CONFIG_ENV: &str = "AUTOJOURNAL_CONFIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    FoodCsv,
    Jsonl,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderSpec {
    pub id: String,
    pub kind: ProviderKind,
    pub path: PathBuf,
    /// Required for `jsonl`; `food_csv` is always food.
    #[serde(default)]
    pub category: Option<Category>,
}

/// Contents of `config.toml`. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub database: Option<PathBuf>,
    pub window: WindowPolicy,
    pub providers: Vec<ProviderSpec>,
}

impl FileConfig {
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => toml::from_str(&raw)
                .with_context(|| format!("Failed to parse config: {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("Failed to read config: {}", path.display())),
        }
    }
}

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
    pub config_path: PathBuf,
    pub window: WindowPolicy,
    pub providers: Vec<ProviderSpec>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let proj_dirs = ProjectDirs::from("", "", "autojournal")
            .context("Could not determine home directory")?;

        let data_dir = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let config_path = std::env::var_os(CONFIG_ENV)
            .map_or_else(|| proj_dirs.config_dir().join("config.toml"), PathBuf::from);

        Self::resolve(data_dir, config_path)
    }

    fn resolve(data_dir: PathBuf, config_path: PathBuf) -> Result<Self> {
        let file = FileConfig::load_from(&config_path)?;
        let base = config_path.parent().unwrap_or(Path::new("."));

        let db_path = file
            .database
            .map_or_else(|| data_dir.join("autojournal.db"), |p| base.join(p));
        let providers = file
            .providers
            .into_iter()
            .map(|mut spec| {
                spec.path = base.join(&spec.path);
                spec
            })
            .collect();

        Ok(Config {
            db_path,
            data_dir,
            config_path,
            window: file.window,
            providers,
        })
    }

    /// Build the provider registry described by the config.
    pub fn provider_registry(&self) -> Result<ProviderRegistry> {
        let mut registry = ProviderRegistry::new();
        for spec in &self.providers {
            let provider: Box<dyn SourceProvider> = match spec.kind {
                ProviderKind::FoodCsv => {
                    if spec.category.is_some_and(|c| c != Category::Food) {
                        bail!("Provider '{}': food_csv providers are always food", spec.id);
                    }
                    Box::new(FoodCsvProvider::new(&spec.id, &spec.path))
                }
                ProviderKind::Jsonl => {
                    let category = spec.category.with_context(|| {
                        format!("Provider '{}': jsonl providers need a category", spec.id)
                    })?;
                    Box::new(JsonlProvider::new(&spec.id, category, &spec.path))
                }
            };
            registry
                .register(provider)
                .with_context(|| format!("Invalid provider '{}'", spec.id))?;
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::resolve(dir.path().into(), dir.path().join("config.toml")).unwrap();
        assert_eq!(config.db_path, dir.path().join("autojournal.db"));
        assert_eq!(config.window, WindowPolicy::default());
        assert!(config.provider_registry().unwrap().is_empty());
    }

    #[test]
    fn test_config_with_providers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
database = "journal.db"

[window]
last_week = "calendar"
regenerate_from = "earliest"

[[providers]]
id = "cronometer"
kind = "food_csv"
path = "exports/servings.csv"

[[providers]]
id = "sleep"
kind = "jsonl"
category = "sleep"
path = "/var/lib/sleep.jsonl"
"#,
        )
        .unwrap();

        let config = Config::resolve(dir.path().join("data"), path).unwrap();
        assert_eq!(config.db_path, dir.path().join("journal.db"));
        assert_eq!(
            config.window.last_week,
            autojournal_core::entry_points::LastWeekMode::Calendar
        );
        assert_eq!(config.window.lookback_days, 7);
        assert_eq!(
            config.providers[0].path,
            dir.path().join("exports/servings.csv")
        );
        assert_eq!(config.providers[1].path, PathBuf::from("/var/lib/sleep.jsonl"));

        let registry = config.provider_registry().unwrap();
        assert_eq!(registry.provider_ids(), vec!["cronometer", "sleep"]);
        assert_eq!(registry.get("sleep").unwrap().category(), Category::Sleep);
    }

    #[test]
    fn test_jsonl_without_category_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[[providers]]\nid = \"mood\"\nkind = \"jsonl\"\npath = \"mood.jsonl\"\n",
        )
        .unwrap();
        let config = Config::resolve(dir.path().into(), path).unwrap();
        let err = config.provider_registry().err().unwrap();
        assert!(err.to_string().contains("category"));
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "providers = 3\n").unwrap();
        assert!(Config::resolve(dir.path().into(), path).is_err());
    }
}
