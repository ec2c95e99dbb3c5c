pub mod config;
pub mod types;
pub mod version;

pub use config::{ApiConfig, ConfigError, PgrollConfig, RestartConfig, RestartOrder, TunnelConfig};
pub use types::*;
pub use version::{MinimumVersionGate, VersionError, VersionGate};
