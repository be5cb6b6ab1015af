//! Remote-API configuration.
//!
//! Resolution order for the listen address: the host binary's CLI flags win,
//! then the `HARMONIUM_API_HOST`/`HARMONIUM_API_PORT` environment variables,
//! then the config file, then the defaults (all interfaces, port 5672).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5672;
/// Protocol version advertised in the initial burst; build metadata.
pub const DEFAULT_API_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const HOST_ENV_VAR: &str = "HARMONIUM_API_HOST";
pub const PORT_ENV_VAR: &str = "HARMONIUM_API_PORT";

const DEFAULT_COMPANION_RECONNECT_MS: u64 = 5_000;

/// Everything the server needs to come up.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Listen host. Defaults to all interfaces.
    pub host: String,
    /// Listen port. `0` asks the OS for an ephemeral port.
    pub port: u16,
    /// Version string pushed as the first burst notification.
    pub api_version: String,
    /// Pins the authorization challenge to a constant (test/development
    /// mode). Must be exactly four ASCII digits.
    pub fixed_auth_code: Option<String>,
    /// WebSocket URL of the companion integration; `None` disables the sink.
    pub companion_url: Option<String>,
    /// Delay between companion reconnect attempts.
    pub companion_reconnect_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            api_version: DEFAULT_API_VERSION.to_owned(),
            fixed_auth_code: None,
            companion_url: None,
            companion_reconnect_ms: DEFAULT_COMPANION_RECONNECT_MS,
        }
    }
}

impl RemoteConfig {
    /// Load the effective configuration: file (when given), then environment
    /// overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Apply `HARMONIUM_API_HOST`/`HARMONIUM_API_PORT` when set.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(host) = std::env::var(HOST_ENV_VAR) {
            if !host.is_empty() {
                self.host = host;
            }
        }
        if let Ok(port) = std::env::var(PORT_ENV_VAR) {
            if !port.is_empty() {
                self.port = port.parse().map_err(|_| ConfigError::InvalidPort {
                    source_var: PORT_ENV_VAR.to_owned(),
                    value: port,
                })?;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if let Some(code) = &self.fixed_auth_code {
            if code.len() != 4 || !code.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ConfigError::InvalidAuthCode(code.clone()));
            }
        }
        if let Some(url) = &self.companion_url {
            if !url.starts_with("ws://") && !url.starts_with("wss://") {
                return Err(ConfigError::InvalidCompanionUrl(url.clone()));
            }
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn companion_reconnect(&self) -> Duration {
        Duration::from_millis(self.companion_reconnect_ms)
    }
}
