//! Environment-driven configuration.
//!
//! Values come from the process environment, which `main` first seeds from a
//! `.env` file when one is present.

use std::env;
use std::path::PathBuf;

pub const DEFAULT_DB_PATH: &str = "coach.db";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8002;
pub const DEFAULT_TEST_PORT: u16 = 8003;
pub const DEFAULT_MAX_ROWS: usize = 1000;
pub const DEFAULT_MAX_ROWS_ABSOLUTE: usize = 10_000;
pub use crate::sync::coordinator::DEFAULT_FULL_SYNC_DAYS;
pub const DEFAULT_CLIENT_STORE: &str = "coach-client.db";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
  #[error("{name} is not valid: {value:?} ({reason})")]
  Invalid {
    name: &'static str,
    value: String,
    reason: String,
  },

  #[error("Missing configuration: {0}")]
  Missing(&'static str),

  #[error("Database not found at {0}")]
  DatabaseMissing(String),
}

fn var(name: &str) -> Option<String> {
  env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
  T: std::str::FromStr,
  T::Err: std::fmt::Display,
{
  match var(name) {
    Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
      name,
      value: raw.clone(),
      reason: e.to_string(),
    }),
    None => Ok(default),
  }
}

/// ---------------------------------------------------------------------------
/// Server
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
  pub db_path: PathBuf,
  pub host: String,
  pub port: u16,
  pub max_rows: usize,
  pub max_rows_absolute: usize,
  pub full_sync_days: i64,
}

impl ServerConfig {
  /// Read `COACH_*` variables. `test_mode` only changes the default port.
  pub fn from_env(test_mode: bool) -> Result<Self, ConfigError> {
    let default_port = if test_mode { DEFAULT_TEST_PORT } else { DEFAULT_PORT };
    let full_sync_days = parsed("COACH_FULL_SYNC_DAYS", DEFAULT_FULL_SYNC_DAYS)?;
    if full_sync_days < 0 {
      return Err(ConfigError::Invalid {
        name: "COACH_FULL_SYNC_DAYS",
        value: full_sync_days.to_string(),
        reason: "must not be negative".into(),
      });
    }
    Ok(Self {
      db_path: PathBuf::from(var("COACH_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.into())),
      host: var("COACH_HOST").unwrap_or_else(|| DEFAULT_HOST.into()),
      port: parsed("COACH_PORT", default_port)?,
      max_rows: parsed("COACH_MAX_ROWS", DEFAULT_MAX_ROWS)?,
      max_rows_absolute: parsed("COACH_MAX_ROWS_ABSOLUTE", DEFAULT_MAX_ROWS_ABSOLUTE)?,
      full_sync_days,
    })
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.max_rows < 1 {
      return Err(ConfigError::Invalid {
        name: "COACH_MAX_ROWS",
        value: self.max_rows.to_string(),
        reason: "must be at least 1".into(),
      });
    }
    if self.max_rows > self.max_rows_absolute {
      return Err(ConfigError::Invalid {
        name: "COACH_MAX_ROWS",
        value: self.max_rows.to_string(),
        reason: format!("cannot exceed {}", self.max_rows_absolute),
      });
    }
    Ok(())
  }

  /// The tool server edits an existing database; it never creates one
  pub fn validate_for_tools(&self) -> Result<(), ConfigError> {
    self.validate()?;
    if !self.db_path.exists() {
      return Err(ConfigError::DatabaseMissing(
        self.db_path.display().to_string(),
      ));
    }
    Ok(())
  }

  pub fn bind_addr(&self) -> String {
    format!("{}:{}", self.host, self.port)
  }
}

/// ---------------------------------------------------------------------------
/// Client
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
  pub base_url: String,
  pub client_name: Option<String>,
  pub store_path: PathBuf,
}

impl ClientConfig {
  pub fn from_env() -> Result<Self, ConfigError> {
    Ok(Self {
      base_url: var("COACH_SERVER_URL").ok_or(ConfigError::Missing("COACH_SERVER_URL"))?,
      client_name: var("COACH_CLIENT_NAME"),
      store_path: PathBuf::from(
        var("COACH_CLIENT_STORE").unwrap_or_else(|| DEFAULT_CLIENT_STORE.into()),
      ),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;

  const VARS: [&str; 6] = [
    "COACH_DB_PATH",
    "COACH_HOST",
    "COACH_PORT",
    "COACH_MAX_ROWS",
    "COACH_MAX_ROWS_ABSOLUTE",
    "COACH_FULL_SYNC_DAYS",
  ];

  fn cleared() -> Vec<(&'static str, Option<&'static str>)> {
    VARS.iter().map(|name| (*name, None)).collect()
  }

  #[test]
  #[serial]
  fn test_defaults() {
    temp_env::with_vars(cleared(), || {
      let config = ServerConfig::from_env(false).unwrap();
      assert_eq!(config.db_path, PathBuf::from("coach.db"));
      assert_eq!(config.bind_addr(), "0.0.0.0:8002");
      assert_eq!(config.max_rows, 1000);
      assert_eq!(config.full_sync_days, 30);
      assert!(config.validate().is_ok());

      assert_eq!(ServerConfig::from_env(true).unwrap().port, 8003);
    });
  }

  #[test]
  #[serial]
  fn test_overrides() {
    temp_env::with_vars(
      [
        ("COACH_DB_PATH", Some("/tmp/other.db")),
        ("COACH_HOST", Some("127.0.0.1")),
        ("COACH_PORT", Some("9100")),
        ("COACH_MAX_ROWS", Some("50")),
        ("COACH_MAX_ROWS_ABSOLUTE", None),
        ("COACH_FULL_SYNC_DAYS", Some("7")),
      ],
      || {
        let config = ServerConfig::from_env(true).unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:9100");
        assert_eq!(config.max_rows, 50);
        assert_eq!(config.full_sync_days, 7);
        assert_eq!(config.db_path, PathBuf::from("/tmp/other.db"));
      },
    );
  }

  #[test]
  #[serial]
  fn test_bad_number_names_variable() {
    temp_env::with_vars([("COACH_PORT", Some("eighty"))], || {
      match ServerConfig::from_env(false) {
        Err(ConfigError::Invalid { name, value, .. }) => {
          assert_eq!(name, "COACH_PORT");
          assert_eq!(value, "eighty");
        }
        other => panic!("expected invalid port, got {:?}", other),
      }
    });
  }

  #[test]
  #[serial]
  fn test_row_cap_bounds() {
    temp_env::with_vars(
      [("COACH_MAX_ROWS", Some("0")), ("COACH_MAX_ROWS_ABSOLUTE", None)],
      || {
        let config = ServerConfig::from_env(false).unwrap();
        assert!(config.validate().is_err());
      },
    );
    temp_env::with_vars(
      [("COACH_MAX_ROWS", Some("20000")), ("COACH_MAX_ROWS_ABSOLUTE", None)],
      || {
        let config = ServerConfig::from_env(false).unwrap();
        assert!(config.validate().is_err());
      },
    );
  }

  #[test]
  #[serial]
  fn test_tool_server_needs_existing_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("coach.db");
    let path_str = path.to_str().unwrap().to_string();

    temp_env::with_vars(
      [("COACH_DB_PATH", Some(path_str.as_str())), ("COACH_MAX_ROWS", None)],
      || {
        let config = ServerConfig::from_env(false).unwrap();
        assert!(matches!(
          config.validate_for_tools(),
          Err(ConfigError::DatabaseMissing(_))
        ));
        std::fs::write(&path, b"").unwrap();
        assert!(config.validate_for_tools().is_ok());
      },
    );
  }

  #[test]
  #[serial]
  fn test_client_requires_server_url() {
    temp_env::with_vars(
      [
        ("COACH_SERVER_URL", None::<&str>),
        ("COACH_CLIENT_NAME", None),
        ("COACH_CLIENT_STORE", None),
      ],
      || {
        assert_eq!(
          ClientConfig::from_env(),
          Err(ConfigError::Missing("COACH_SERVER_URL"))
        );
      },
    );
    temp_env::with_vars(
      [
        ("COACH_SERVER_URL", Some("http://localhost:8002")),
        ("COACH_CLIENT_NAME", Some("Phone")),
        ("COACH_CLIENT_STORE", None),
      ],
      || {
        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.client_name.as_deref(), Some("Phone"));
        assert_eq!(config.store_path, PathBuf::from(DEFAULT_CLIENT_STORE));
      },
    );
  }
}
