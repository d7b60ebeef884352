use chrono_tz::Tz;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::menza::{Language, SubsystemId};
use crate::validity::DEFAULT_TIME_ZONE;

pub const DEFAULT_API_URL: &str = "https://agata.suz.cvut.cz/jidelnicky/api/v1/";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub language: Language,
  /// Cafeterias to sync; empty syncs all open ones
  pub subsystems: Vec<SubsystemId>,
  /// Window in which today's dishes are not re-checked at all
  pub recent_window_secs: u64,
  /// IANA zone used for "today" and "this week"
  pub time_zone: String,
  /// Where the database and logs live (defaults to the platform data dir)
  pub data_dir: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      api: ApiConfig::default(),
      language: Language::default(),
      subsystems: Vec::new(),
      recent_window_secs: 60,
      time_zone: DEFAULT_TIME_ZONE.name().to_string(),
      data_dir: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub url: String,
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: DEFAULT_API_URL.to_string(),
      timeout_secs: 15,
    }
  }
}

impl ApiConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

impl Config {
  /// Load configuration.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./menza-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/menza-sync/config.yaml
  ///
  /// Without a file the defaults are used. `MENZA_SYNC_API_URL` overrides the
  /// API URL either way.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    if let Ok(url) = std::env::var("MENZA_SYNC_API_URL") {
      config.api.url = url;
    }

    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("menza-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("menza-sync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn validate(&self) -> Result<()> {
    self.parsed_time_zone()?;
    url::Url::parse(&self.api.url).map_err(|e| eyre!("Invalid API URL {}: {}", self.api.url, e))?;
    if self.api.timeout_secs == 0 {
      return Err(eyre!("API timeout must be positive"));
    }
    Ok(())
  }

  pub fn parsed_time_zone(&self) -> Result<Tz> {
    self
      .time_zone
      .parse::<Tz>()
      .map_err(|e| eyre!("Unknown time zone {}: {}", self.time_zone, e))
  }

  pub fn recent_window(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.recent_window_secs as i64)
  }

  /// Data directory, falling back to the platform default.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("menza-sync"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_partial_file_keeps_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
      file,
      "language: en\nsubsystems: [1, 3]\napi:\n  timeout_secs: 5\ntime_zone: Europe/Vienna"
    )
    .unwrap();

    let config = Config::load_from_path(file.path()).unwrap();
    assert_eq!(config.language, Language::En);
    assert_eq!(config.subsystems, vec![SubsystemId(1), SubsystemId(3)]);
    assert_eq!(config.api.url, DEFAULT_API_URL);
    assert_eq!(config.api.timeout(), Duration::from_secs(5));
    assert_eq!(config.recent_window(), chrono::Duration::seconds(60));
    assert_eq!(config.parsed_time_zone().unwrap(), chrono_tz::Europe::Vienna);
  }

  #[test]
  fn test_missing_explicit_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Config::load(Some(&dir.path().join("nope.yaml"))).is_err());
  }

  #[test]
  fn test_rejects_unknown_time_zone() {
    let config = Config {
      time_zone: "Mars/Olympus".into(),
      ..Config::default()
    };
    assert!(config.validate().is_err());
    assert!(Config::default().validate().is_ok());
  }
}
