use std::path::{Path, PathBuf};

use chrono::Duration;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::history::DEFAULT_HISTORY_CAPACITY;

const CONFIG_FILE_PATH: &str = "ride.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse TOML config {path}: {source}")]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to parse JSON config {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("unknown time zone: {0}")]
    InvalidTimezone(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RideConfig {
    pub timezone: String,
    pub history_capacity: usize,
    pub suggestion_threshold: f64,
    pub max_suggestions: usize,
    pub overlap_tolerance_minutes: i64,
    pub min_match_score: f64,
    pub routine_window_minutes: i64,
    pub specific_time_window_minutes: i64,
    pub fallback_window_minutes: i64,
    pub request_expiry_grace_minutes: i64,
    /// When off, `always` drivers are prompted like `ask` drivers.
    pub auto_approval_enabled: bool,
    pub state_table_path: Option<PathBuf>,
    pub settlements_path: Option<PathBuf>,
    pub store_path: Option<PathBuf>,
}

impl Default for RideConfig {
    fn default() -> Self {
        Self {
            timezone: "Asia/Jerusalem".to_string(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            suggestion_threshold: 0.6,
            max_suggestions: 3,
            overlap_tolerance_minutes: 60,
            min_match_score: 3.0,
            routine_window_minutes: 30,
            specific_time_window_minutes: 60,
            fallback_window_minutes: 30,
            request_expiry_grace_minutes: 60,
            auto_approval_enabled: true,
            state_table_path: None,
            settlements_path: None,
            store_path: None,
        }
    }
}

fn parse_bool_env(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

impl RideConfig {
    /// Load from `path`, or from `ride.toml` in the working directory when it
    /// exists, then apply `RIDE_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(CONFIG_FILE_PATH).exists() => {
                Self::from_file(Path::new(CONFIG_FILE_PATH))?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            serde_json::from_str(&content).map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            })
        } else {
            toml::from_str(&content).map_err(|source| ConfigError::Toml {
                path: path.to_path_buf(),
                source,
            })
        }
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(tz) = lookup("RIDE_TIMEZONE") {
            self.timezone = tz;
        }
        if let Some(path) = lookup("RIDE_STATE_TABLE") {
            self.state_table_path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("RIDE_SETTLEMENTS") {
            self.settlements_path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("RIDE_STORE_PATH") {
            self.store_path = Some(PathBuf::from(path));
        }
        if let Some(capacity) = lookup("RIDE_HISTORY_CAPACITY").and_then(|v| v.parse().ok()) {
            self.history_capacity = capacity;
        }
        if let Some(enabled) = lookup("RIDE_AUTO_APPROVAL") {
            self.auto_approval_enabled = parse_bool_env(&enabled);
        }
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::InvalidTimezone(self.timezone.clone()))
    }

    pub fn overlap_tolerance(&self) -> Duration {
        Duration::minutes(self.overlap_tolerance_minutes)
    }

    pub fn routine_radius(&self) -> Duration {
        Duration::minutes(self.routine_window_minutes)
    }

    pub fn specific_span(&self) -> Duration {
        Duration::minutes(self.specific_time_window_minutes)
    }

    pub fn fallback_span(&self) -> Duration {
        Duration::minutes(self.fallback_window_minutes)
    }

    pub fn expiry_grace(&self) -> Duration {
        Duration::minutes(self.request_expiry_grace_minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn parse_bool_env_true_values() {
        for value in ["1", "true", "TRUE", " yes ", "Y", "on"] {
            assert!(parse_bool_env(value), "value {value:?} should be true");
        }
    }

    #[test]
    fn parse_bool_env_false_values() {
        for value in ["0", "false", "no", "off", "", "  "] {
            assert!(!parse_bool_env(value), "value {value:?} should be false");
        }
    }

    #[test]
    fn env_overrides_take_precedence() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("RIDE_TIMEZONE", "Europe/London"),
            ("RIDE_HISTORY_CAPACITY", "4"),
            ("RIDE_AUTO_APPROVAL", "off"),
            ("RIDE_STORE_PATH", "/tmp/rides.json"),
        ]);
        let mut config = RideConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.timezone, "Europe/London");
        assert_eq!(config.history_capacity, 4);
        assert!(!config.auto_approval_enabled);
        assert_eq!(config.store_path, Some(PathBuf::from("/tmp/rides.json")));
    }

    #[test]
    fn partial_toml_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ride.toml");
        std::fs::write(&path, "min_match_score = 2.5\nmax_suggestions = 5\n").unwrap();

        let config = RideConfig::from_file(&path).unwrap();
        assert_eq!(config.min_match_score, 2.5);
        assert_eq!(config.max_suggestions, 5);
        assert_eq!(config.history_capacity, DEFAULT_HISTORY_CAPACITY);
        assert!(config.timezone().is_ok());
    }

    #[test]
    fn invalid_timezone_is_reported() {
        let config = RideConfig {
            timezone: "Mars/Olympus".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.timezone(),
            Err(ConfigError::InvalidTimezone(_))
        ));
    }
}
