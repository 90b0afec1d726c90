//! Settings loaded from `config.toml` and overridden by command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{FixedOffset, Local, Offset};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TaskError};

/// User configuration. Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Account the tasks belong to.
    pub owner: String,
    /// Fixed civil offset for recurrence and display, e.g. "+02:00". Empty means host offset.
    pub utc_offset: String,
    /// Seconds between reminder polls while watching.
    pub poll_interval_secs: u64,
    /// Directory holding `tasks.json` and `permissions.json`.
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            owner: std::env::var("USER").unwrap_or_else(|_| "local".to_string()),
            utc_offset: String::new(),
            poll_interval_secs: 60,
            data_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file; a missing file yields defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| TaskError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| TaskError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// `$XDG_CONFIG_HOME/taskbell/config.toml`, else `~/.config/taskbell/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("taskbell").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home).join(".config").join("taskbell").join("config.toml")
        } else {
            PathBuf::from(".taskbell").join("config.toml")
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".taskbell")
    }

    pub fn timezone(&self) -> Result<FixedOffset> {
        if self.utc_offset.trim().is_empty() {
            return Ok(Local::now().offset().fix());
        }
        parse_utc_offset(&self.utc_offset)
    }

    pub fn poll_interval(&self) -> Result<Duration> {
        if self.poll_interval_secs == 0 {
            return Err(TaskError::Config("poll_interval_secs must be at least 1".into()));
        }
        Ok(Duration::from_secs(self.poll_interval_secs))
    }

    pub fn validate(&self) -> Result<()> {
        if self.owner.trim().is_empty() {
            return Err(TaskError::Config("owner cannot be empty".into()));
        }
        self.timezone()?;
        self.poll_interval()?;
        Ok(())
    }
}

/// Parse "Z", "UTC", "+02:00", "-0530", or "+2" into a fixed offset.
pub fn parse_utc_offset(s: &str) -> Result<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(|| TaskError::Config("bad offset".into()));
    }
    let invalid = || TaskError::Config(format!("invalid utc_offset {s:?}, expected e.g. +02:00"));
    if !s.is_ascii() {
        return Err(invalid());
    }
    let (sign, rest) = match s.as_bytes().first() {
        Some(b'+') => (1, &s[1..]),
        Some(b'-') => (-1, &s[1..]),
        _ => return Err(invalid()),
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 => rest.split_at(2),
        None => (rest, "0"),
    };
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if !(0..=23).contains(&hours) || !(0..=59).contains(&minutes) {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}
