use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;

use crate::matches::{MatchField, PatternSource};
use crate::ratios::ZeroDurationPolicy;

/// Application configuration loaded from TOML config file.
/// All fields have sensible defaults — the config file is optional.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Largest `sum_diffs` a pair may have and still be reported.
    pub max_sum_diffs: f64,
    /// Match columns copied into the pair table, in order.
    pub output_fields: Vec<String>,
    /// Which interval column defines a pattern group.
    pub group_by: PatternSource,
    /// What to do with rows containing a zero duration.
    pub zero_durations: ZeroDurationPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_sum_diffs: 1.0,
            output_fields: MatchField::defaults()
                .iter()
                .map(|f| f.name().to_string())
                .collect(),
            group_by: PatternSource::default(),
            zero_durations: ZeroDurationPolicy::default(),
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/soggetti/config.toml`.
    /// Returns default config if file doesn't exist.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Load config from an explicit path.
    /// Logs a warning and falls back to defaults if the file can't be read or parsed.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!(
                        "Failed to parse {}: {}. Using defaults.",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!(
                    "Failed to read {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Configured output fields as typed columns.
    pub fn fields(&self) -> Vec<MatchField> {
        self.output_fields
            .iter()
            .map(|name| MatchField::from(name.as_str()))
            .collect()
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}
