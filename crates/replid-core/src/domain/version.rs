//! Protocol and build version information
//!
//! Served unversioned on `GET /version` so a node can check compatibility
//! before identifying. Endpoint paths carry the protocol major version
//! (`/v1/...`); two sides are compatible when their majors match.

use serde::{Deserialize, Serialize};

/// Protocol version spoken by this build. Bump the major on any breaking
/// wire change.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Version information exchanged on `/version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// The daemon build version (crate version).
    pub daemon: String,
    /// The protocol version, `major.minor`.
    pub protocol: String,
    /// Build identifier, e.g. a git commit hash. "unknown" when not set.
    pub commit: String,
}

impl VersionInfo {
    /// Version info for the running build.
    pub fn current() -> Self {
        Self {
            daemon: env!("CARGO_PKG_VERSION").to_string(),
            protocol: PROTOCOL_VERSION.to_string(),
            commit: option_env!("REPLID_COMMIT").unwrap_or("unknown").to_string(),
        }
    }

    /// The major component of the protocol version.
    pub fn protocol_major(&self) -> &str {
        self.protocol.split('.').next().unwrap_or(&self.protocol)
    }

    /// Whether `other` speaks a compatible protocol (same major).
    pub fn compatible_with(&self, other: &VersionInfo) -> bool {
        self.protocol_major() == other.protocol_major()
    }
}

/// The major component of [`PROTOCOL_VERSION`], used to build endpoint
/// paths like `/v1/index`.
pub fn protocol_major() -> &'static str {
    PROTOCOL_VERSION
        .split('.')
        .next()
        .unwrap_or(PROTOCOL_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_carries_protocol() {
        let info = VersionInfo::current();
        assert_eq!(info.protocol, PROTOCOL_VERSION);
        assert!(!info.daemon.is_empty());
    }

    #[test]
    fn test_protocol_major() {
        let info = VersionInfo {
            daemon: "0.1.0".into(),
            protocol: "2.7".into(),
            commit: "unknown".into(),
        };
        assert_eq!(info.protocol_major(), "2");
    }

    #[test]
    fn test_compatibility_same_major() {
        let a = VersionInfo {
            daemon: "0.1.0".into(),
            protocol: "1.0".into(),
            commit: "unknown".into(),
        };
        let b = VersionInfo {
            daemon: "0.2.3".into(),
            protocol: "1.4".into(),
            commit: "deadbeef".into(),
        };
        assert!(a.compatible_with(&b));
    }

    #[test]
    fn test_compatibility_different_major() {
        let a = VersionInfo {
            daemon: "0.1.0".into(),
            protocol: "1.0".into(),
            commit: "unknown".into(),
        };
        let b = VersionInfo {
            daemon: "0.1.0".into(),
            protocol: "2.0".into(),
            commit: "unknown".into(),
        };
        assert!(!a.compatible_with(&b));
    }
}
