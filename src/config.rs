// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! Configuration for the CDAP runtime
//!
//! Values can be filled in programmatically or loaded from a TOML file;
//! every field has a default so partial files work.

use crate::error::CdapError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Tunables of the CDAP session layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdapConfig {
    /// Maximum time to wait for a connect or release response before the
    /// session is torn down (milliseconds)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Upper bound on the size of one encoded CDAP message (bytes)
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// RIB/object-set version offered on outgoing `M_CONNECT` messages
    #[serde(default = "default_version")]
    pub version: i64,
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_max_message_size() -> usize {
    65_536
}

fn default_version() -> i64 {
    1
}

impl Default for CdapConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            max_message_size: default_max_message_size(),
            version: default_version(),
        }
    }
}

impl CdapConfig {
    /// Loads the configuration from a TOML file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, CdapError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| CdapError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::load_from_str(&contents)
    }

    /// Parses the configuration from a TOML string.
    pub fn load_from_str(contents: &str) -> Result<Self, CdapError> {
        toml::from_str(contents).map_err(|e| CdapError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CdapConfig::default();
        assert_eq!(config.connect_timeout_ms, 10_000);
        assert_eq!(config.max_message_size, 65_536);
        assert_eq!(config.version, 1);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = CdapConfig::load_from_str("connect_timeout_ms = 500").unwrap();
        assert_eq!(config.connect_timeout_ms, 500);
        assert_eq!(config.max_message_size, 65_536);
    }

    #[test]
    fn test_full_toml() {
        let config = CdapConfig::load_from_str(
            r#"
            connect_timeout_ms = 2000
            max_message_size = 1024
            version = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.connect_timeout_ms, 2000);
        assert_eq!(config.max_message_size, 1024);
        assert_eq!(config.version, 3);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let result = CdapConfig::load_from_str("connect_timeout_ms = \"soon\"");
        assert!(matches!(result, Err(CdapError::Config(_))));
    }
}
