//! # Configuration Utilities
//!
//! Shared configuration structures and parsing utilities used by both
//! client and server components. Every field has a default so a partial
//! (or empty) TOML file is enough.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// TCP port the server accepts operator and manager connections on.
pub const DEFAULT_SERVER_PORT: u16 = 12345;

/// UDP port discovery requests are broadcast to.
pub const DEFAULT_DISCOVERY_PORT: u16 = 12346;

/// Load a TOML configuration file and deserialize it into the specified type.
///
/// # Example
/// ```ignore
/// let config: ServerConfig = load_config("config/server.toml")?;
/// ```
pub fn load_config<T>(path: impl AsRef<Path>) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: T =
        toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))?;
    Ok(config)
}

/// UDP discovery settings, shared by the responder and the requester.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Whether the server answers discovery broadcasts
    pub enabled: bool,
    /// UDP port for `DISCOVER_SERVER_REQUEST` datagrams
    pub port: u16,
    /// Where the requester sends its broadcast
    pub broadcast_address: String,
    /// How long the requester collects replies (seconds)
    pub timeout_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: DEFAULT_DISCOVERY_PORT,
            broadcast_address: "255.255.255.255".to_string(),
            timeout_secs: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = 40000").unwrap();

        let config: DiscoveryConfig = load_config(file.path()).unwrap();
        assert_eq!(config.port, 40000);
        assert!(config.enabled);
        assert_eq!(config.timeout_secs, 5);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result: Result<DiscoveryConfig> = load_config(dir.path().join("absent.toml"));
        assert!(result.is_err());
    }
}
