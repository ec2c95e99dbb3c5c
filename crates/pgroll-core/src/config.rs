//! pgroll.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable that overrides `[api].token`.
pub const TOKEN_ENV: &str = "PGROLL_API_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PgrollConfig {
    pub api: ApiConfig,
    pub restart: RestartConfig,
    pub tunnel: TunnelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the fleet API, e.g. `http://127.0.0.1:4280`.
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:4280".to_string(),
            token: None,
            timeout_secs: 30,
        }
    }
}

/// Order in which members are restarted within a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartOrder {
    /// Keep the order the inventory returned.
    #[default]
    AsListed,
    /// Replicas first, the reported leader last.
    LeaderLast,
}

impl std::str::FromStr for RestartOrder {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "as-listed" => Ok(RestartOrder::AsListed),
            "leader-last" => Ok(RestartOrder::LeaderLast),
            other => Err(ConfigError::Invalid {
                key: "restart.order",
                reason: format!("unknown order {other:?} (expected as-listed or leader-last)"),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartConfig {
    pub min_version: String,
    pub lease_ttl_secs: u64,
    /// Renew a lease before restarting when less than this remains.
    pub lease_renew_margin_secs: u64,
    pub order: RestartOrder,
    pub release_leases: bool,
    /// Whole-run deadline. Unset means no deadline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline_secs: Option<u64>,
    pub node_timeout_secs: u64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            min_version: "0.0.20".to_string(),
            lease_ttl_secs: 40,
            lease_renew_margin_secs: 10,
            order: RestartOrder::AsListed,
            release_leases: true,
            deadline_secs: None,
            node_timeout_secs: 60,
        }
    }
}

impl RestartConfig {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn lease_renew_margin(&self) -> Duration {
        Duration::from_secs(self.lease_renew_margin_secs)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_secs(self.node_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Port of the admin endpoint on every database node.
    pub control_port: u16,
    pub connect_timeout_secs: u64,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            control_port: 5500,
            connect_timeout_secs: 10,
        }
    }
}

impl TunnelConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl PgrollConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: PgrollConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else the default location if it exists, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        match default_path() {
            Some(p) if p.exists() => Self::from_file(&p),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.restart.lease_ttl_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "restart.lease_ttl_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.restart.lease_renew_margin_secs >= self.restart.lease_ttl_secs {
            return Err(ConfigError::Invalid {
                key: "restart.lease_renew_margin_secs",
                reason: "must be smaller than lease_ttl_secs".to_string(),
            });
        }
        if !self.api.base_url.starts_with("http://") {
            return Err(ConfigError::Invalid {
                key: "api.base_url",
                reason: format!("{:?} must be an http:// URL", self.api.base_url),
            });
        }
        Ok(())
    }

    /// API token, with the environment taking precedence over the file.
    pub fn api_token(&self) -> Option<String> {
        std::env::var(TOKEN_ENV)
            .ok()
            .filter(|t| !t.is_empty())
            .or_else(|| self.api.token.clone())
    }
}

/// `$HOME/.config/pgroll/pgroll.toml`.
pub fn default_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| {
        PathBuf::from(home)
            .join(".config")
            .join("pgroll")
            .join("pgroll.toml")
    })
}
