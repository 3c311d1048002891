use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Server configuration, usually read from a toml file.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DavConfig {
    pub bind_addr: SocketAddr,

    /// Public prefix the tree is served under; always normalized to end
    /// with `/`.
    #[serde(default = "default_base_uri")]
    pub base_uri: String,

    /// Where PUT bodies are staged before they reach the backend.
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: PathBuf,

    pub tls: Option<TlsConfig>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TlsConfig {
    pub certs: PathBuf,
    pub key: PathBuf,
}

fn default_base_uri() -> String {
    "/".to_string()
}

fn default_tmp_dir() -> PathBuf {
    std::env::temp_dir()
}

impl DavConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config = toml::from_str(&raw)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses() {
        let config: DavConfig = toml::from_str(r#"bind_addr = "[::1]:8008""#).unwrap();
        assert_eq!(config.base_uri, "/");
        assert!(config.tls.is_none());
    }

    #[test]
    fn full_config_parses() {
        let raw = r#"
bind_addr = "127.0.0.1:4918"
base_uri = "/dav/"
tmp_dir = "/var/spool/davenport"

[tls]
certs = "/etc/davenport/cert.pem"
key = "/etc/davenport/key.pem"
"#;
        let config: DavConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.base_uri, "/dav/");
        assert!(config.tls.is_some());
    }
}
