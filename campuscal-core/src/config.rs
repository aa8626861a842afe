//! Global campuscal configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Weekday;
use chrono_tz::Tz;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{CampusCalError, CampusCalResult};
use crate::sync::DEFAULT_FETCH_TIMEOUT;

static DEFAULT_CALENDAR_DIR: &str = "~/calendars";

fn default_calendar_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CALENDAR_DIR)
}

fn default_week_start() -> Weekday {
    Weekday::Mon
}

fn default_poll_interval() -> String {
    "30s".to_string()
}

fn default_fetch_timeout() -> String {
    humantime::format_duration(DEFAULT_FETCH_TIMEOUT).to_string()
}

fn default_log_level() -> String {
    "warn".to_string()
}

/// Configuration at ~/.config/campuscal/config.toml
///
/// Every key can be overridden with a `CAMPUSCAL_<KEY>` environment variable.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CampusCalConfig {
    /// Where calendar directories live.
    #[serde(default = "default_calendar_dir")]
    pub calendar_dir: PathBuf,

    /// Calendars shown when none are selected on the command line.
    #[serde(default)]
    pub default_calendars: Vec<String>,

    #[serde(default = "default_week_start")]
    pub week_start: Weekday,

    /// Display zone; the system zone when unset.
    #[serde(default)]
    pub time_zone: Option<Tz>,

    /// How often calendar directories are checked for changes (e.g. "30s").
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for CampusCalConfig {
    fn default() -> Self {
        CampusCalConfig {
            calendar_dir: default_calendar_dir(),
            default_calendars: Vec::new(),
            week_start: default_week_start(),
            time_zone: None,
            poll_interval: default_poll_interval(),
            fetch_timeout: default_fetch_timeout(),
            log_level: default_log_level(),
        }
    }
}

impl CampusCalConfig {
    pub fn config_path() -> CampusCalResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CampusCalError::Config("Could not determine config directory".into()))?
            .join("campuscal");

        Ok(config_dir.join("config.toml"))
    }

    /// Load the config, creating a commented default file on first run.
    pub fn load() -> CampusCalResult<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> CampusCalResult<Self> {
        Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(Environment::with_prefix("CAMPUSCAL"))
            .build()
            .map_err(|e| CampusCalError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| CampusCalError::Config(e.to_string()))
    }

    /// `calendar_dir` with `~` expanded.
    pub fn data_path(&self) -> PathBuf {
        let full_path_str = shellexpand::tilde(&self.calendar_dir.to_string_lossy()).into_owned();

        PathBuf::from(full_path_str)
    }

    pub fn poll_interval(&self) -> CampusCalResult<Duration> {
        parse_duration("poll_interval", &self.poll_interval)
    }

    pub fn fetch_timeout(&self) -> CampusCalResult<Duration> {
        parse_duration("fetch_timeout", &self.fetch_timeout)
    }

    /// Create a default config file with all options commented out.
    pub fn create_default_config(path: &Path) -> CampusCalResult<()> {
        let contents = format!(
            "\
# campuscal configuration

# Where your calendars live:
# calendar_dir = \"{}\"

# Calendars to show when none are given with --calendar:
# default_calendars = [\"school-events\", \"grade-7b\"]

# First day of the week in month and week views:
# week_start = \"monday\"

# Display time zone (defaults to the system zone):
# time_zone = \"Europe/Oslo\"

# How often `campuscal watch` checks calendars for changes:
# poll_interval = \"30s\"

# Give up on a calendar fetch after:
# fetch_timeout = \"10s\"

# Log filter (also read from RUST_LOG):
# log_level = \"warn\"
",
            DEFAULT_CALENDAR_DIR
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CampusCalError::Config(format!("Could not create config directory: {e}")))?;
        }

        std::fs::write(path, contents)
            .map_err(|e| CampusCalError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }
}

fn parse_duration(key: &str, value: &str) -> CampusCalResult<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| CampusCalError::Config(format!("Invalid {key} '{value}': {e}")))
}
