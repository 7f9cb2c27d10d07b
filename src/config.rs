use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub server: ServerConfig,
  #[serde(default)]
  pub database: DatabaseConfig,
  #[serde(default)]
  pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  /// Base URL of the Learning Manager backend (e.g. "https://lm.example.com")
  pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
  /// Override for the local store path (default: $XDG_DATA_HOME/lmsync/local.db)
  pub path: Option<PathBuf>,
  /// Override for the interceptor's response cache path
  /// (default: $XDG_DATA_HOME/lmsync/http_cache.db)
  pub cache_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Seconds between connectivity probes in `run` mode
  #[serde(default = "default_probe_interval")]
  pub probe_interval_secs: u64,
  /// Attempts before a failing operation is dropped from the queue
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      probe_interval_secs: default_probe_interval(),
      max_retries: default_max_retries(),
    }
  }
}

fn default_probe_interval() -> u64 {
  30
}

fn default_max_retries() -> u32 {
  3
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./lmsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/lmsync/config.yaml
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

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/lmsync/config.yaml\n\
                 with at least a server.url entry."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("lmsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("lmsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }
}
