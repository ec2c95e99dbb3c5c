//! Minimum-version gate for database images.
//!
//! A restart is only allowed when the participating nodes run an image at
//! or above a minimum supported version. Versions are semver; a leading
//! `v` is tolerated.

use semver::Version;
use thiserror::Error;
use tracing::debug;

use crate::types::Node;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("node {node_id} runs {found}, but {required} or newer is required")]
    TooOld {
        node_id: String,
        found: String,
        required: String,
    },

    #[error("node {node_id} does not report an image version")]
    Missing { node_id: String },

    #[error("invalid version {0:?}: {1}")]
    Invalid(String, String),
}

/// Decides whether one node is allowed to take part in a restart.
pub trait VersionGate: Send + Sync {
    fn check(&self, node: &Node) -> Result<(), VersionError>;
}

/// Gate that compares each node's image version against a fixed minimum.
#[derive(Debug, Clone)]
pub struct MinimumVersionGate {
    min: Version,
}

impl MinimumVersionGate {
    pub fn new(min: &str) -> Result<Self, VersionError> {
        Ok(Self {
            min: parse_version(min)?,
        })
    }

    pub fn minimum(&self) -> &Version {
        &self.min
    }
}

impl VersionGate for MinimumVersionGate {
    fn check(&self, node: &Node) -> Result<(), VersionError> {
        let raw = node.version.as_deref().ok_or_else(|| VersionError::Missing {
            node_id: node.id.clone(),
        })?;
        let found = parse_version(raw)?;
        debug!(node_id = %node.id, %found, min = %self.min, "checking image version");

        if found < self.min {
            return Err(VersionError::TooOld {
                node_id: node.id.clone(),
                found: found.to_string(),
                required: self.min.to_string(),
            });
        }
        Ok(())
    }
}

fn parse_version(raw: &str) -> Result<Version, VersionError> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    Version::parse(trimmed).map_err(|e| VersionError::Invalid(raw.to_string(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeState;

    fn node(version: Option<&str>) -> Node {
        Node {
            id: "n1".into(),
            private_ip: "fdaa::1".into(),
            state: NodeState::Started,
            version: version.map(str::to_string),
            role: None,
        }
    }

    #[test]
    fn accepts_equal_and_newer() {
        let gate = MinimumVersionGate::new("0.0.20").unwrap();
        assert!(gate.check(&node(Some("0.0.20"))).is_ok());
        assert!(gate.check(&node(Some("v0.0.32"))).is_ok());
        assert!(gate.check(&node(Some("1.0.0"))).is_ok());
    }

    #[test]
    fn rejects_older() {
        let gate = MinimumVersionGate::new("0.0.20").unwrap();
        let err = gate.check(&node(Some("0.0.19"))).unwrap_err();
        assert!(matches!(err, VersionError::TooOld { .. }));
        assert!(err.to_string().contains("0.0.19"));
    }

    #[test]
    fn rejects_missing_or_garbage() {
        let gate = MinimumVersionGate::new("0.0.20").unwrap();
        assert_eq!(
            gate.check(&node(None)),
            Err(VersionError::Missing { node_id: "n1".into() })
        );
        assert!(matches!(
            gate.check(&node(Some("latest"))),
            Err(VersionError::Invalid(..))
        ));
    }

    #[test]
    fn invalid_minimum() {
        assert!(MinimumVersionGate::new("not-a-version").is_err());
    }
}
