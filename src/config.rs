use color_eyre::{eyre::eyre, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub server: ServerConfig,
  pub wallet: WalletConfig,
  pub connectivity: ConnectivityConfig,
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  /// Base URL of the wallet backend, e.g. "https://api.example.com"
  pub base_url: String,
  pub health_timeout_secs: u64,
  pub submit_timeout_secs: u64,
  pub balance_timeout_secs: u64,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:5000".to_string(),
      health_timeout_secs: 3,
      submit_timeout_secs: 5,
      balance_timeout_secs: 3,
    }
  }
}

impl ServerConfig {
  pub fn health_timeout(&self) -> Duration {
    Duration::from_secs(self.health_timeout_secs)
  }

  pub fn submit_timeout(&self) -> Duration {
    Duration::from_secs(self.submit_timeout_secs)
  }

  pub fn balance_timeout(&self) -> Duration {
    Duration::from_secs(self.balance_timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
  /// Balance assumed the first time the wallet is used on this device
  #[serde(with = "rust_decimal::serde::str")]
  pub seed_balance: Decimal,
  /// Rejected submissions allowed before a transaction is marked failed
  pub max_attempts: u32,
  pub backoff_base_secs: u64,
  pub backoff_max_secs: u64,
  /// TTL for cached server snapshots
  pub cache_ttl_minutes: i64,
}

impl Default for WalletConfig {
  fn default() -> Self {
    Self {
      seed_balance: Decimal::new(1_000_000, 4),
      max_attempts: 5,
      backoff_base_secs: 30,
      backoff_max_secs: 3600,
      cache_ttl_minutes: 60,
    }
  }
}

impl WalletConfig {
  pub fn backoff_base(&self) -> Result<chrono::Duration> {
    seconds("wallet.backoff_base_secs", self.backoff_base_secs)
  }

  pub fn backoff_max(&self) -> Result<chrono::Duration> {
    seconds("wallet.backoff_max_secs", self.backoff_max_secs)
  }

  pub fn cache_ttl(&self) -> Result<chrono::Duration> {
    if self.cache_ttl_minutes < 0 {
      return Err(eyre!(
        "wallet.cache_ttl_minutes must not be negative, got {}",
        self.cache_ttl_minutes
      ));
    }
    chrono::Duration::try_minutes(self.cache_ttl_minutes)
      .ok_or_else(|| eyre!("wallet.cache_ttl_minutes out of range: {}", self.cache_ttl_minutes))
  }
}

fn seconds(field: &str, value: u64) -> Result<chrono::Duration> {
  i64::try_from(value)
    .ok()
    .and_then(chrono::Duration::try_seconds)
    .ok_or_else(|| eyre!("{} out of range: {}", field, value))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
  /// URL fetched to decide whether the internet is reachable
  pub check_url: String,
  pub timeout_secs: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      check_url: "https://clients3.google.com/generate_204".to_string(),
      timeout_secs: 3,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// SQLite database path (default: $XDG_DATA_HOME/fare-wallet/wallet.db)
  pub path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./fare-wallet.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/fare-wallet/config.yaml
  ///
  /// Falls back to defaults when no file is found.
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
      None => {
        tracing::debug!("no config file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("fare-wallet.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("fare-wallet").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config = Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;
    config
      .validate()
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Check values that only fail once converted to durations.
  pub fn validate(&self) -> Result<()> {
    self.wallet.backoff_base()?;
    self.wallet.backoff_max()?;
    self.wallet.cache_ttl()?;
    Ok(())
  }

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Get an API token from the environment, if one is set.
  ///
  /// Checks FARE_WALLET_TOKEN.
  pub fn env_token() -> Option<String> {
    std::env::var("FARE_WALLET_TOKEN")
      .ok()
      .filter(|t| !t.trim().is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_file_uses_defaults() {
    let config = Config::parse("{}").unwrap();
    assert_eq!(config.server.base_url, "http://localhost:5000");
    assert_eq!(config.server.submit_timeout(), Duration::from_secs(5));
    assert_eq!(config.wallet.seed_balance.to_string(), "100.0000");
    assert_eq!(config.wallet.max_attempts, 5);
    assert!(config.storage.path.is_none());
  }

  #[test]
  fn test_partial_sections() {
    let config = Config::parse(
      r#"
server:
  base_url: https://wallet.example.com
  health_timeout_secs: 1
wallet:
  seed_balance: "25.5"
  max_attempts: 2
storage:
  path: /tmp/w.db
"#,
    )
    .unwrap();

    assert_eq!(config.server.base_url, "https://wallet.example.com");
    assert_eq!(config.server.health_timeout(), Duration::from_secs(1));
    assert_eq!(config.server.balance_timeout(), Duration::from_secs(3));
    assert_eq!(config.wallet.seed_balance, Decimal::new(255, 1));
    assert_eq!(config.wallet.max_attempts, 2);
    assert_eq!(config.wallet.backoff_base_secs, 30);
    assert_eq!(config.storage.path, Some(PathBuf::from("/tmp/w.db")));
  }

  #[test]
  fn test_out_of_range_durations_are_rejected() {
    let config = Config::parse("wallet:\n  backoff_base_secs: 18446744073709551615\n").unwrap();
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("backoff_base_secs"));

    let config = Config::parse("wallet:\n  cache_ttl_minutes: -5\n").unwrap();
    assert!(config.validate().is_err());

    let config = Config::parse("wallet:\n  cache_ttl_minutes: 9223372036854775807\n").unwrap();
    assert!(config.validate().is_err());

    assert!(Config::default().validate().is_ok());
  }

  #[test]
  fn test_invalid_file_fails_to_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fare-wallet.yaml");
    std::fs::write(&path, "wallet:\n  backoff_max_secs: 18446744073709551615\n").unwrap();

    let err = Config::load(Some(&path)).unwrap_err();
    assert!(err.to_string().contains("Invalid config file"));
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
