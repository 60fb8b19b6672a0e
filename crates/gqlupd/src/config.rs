//! gqlupd.toml configuration parser.

use std::net::SocketAddr;
use std::path::Path;

use anyhow::Context;
use gqlup_multipart::UploadOptions;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BIND: &str = "127.0.0.1:4000";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ListenConfig,
    pub uploads: UploadOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    pub bind: SocketAddr,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 4000)),
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load `path` if given, otherwise use defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parse_full_config() {
        let config = ServerConfig::from_toml(
            r#"
[server]
bind = "0.0.0.0:8080"

[uploads]
max_field_size = 4096
max_file_size = 10485760
max_files = 3
"#,
        )
        .unwrap();

        assert_eq!(config.server.bind, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.uploads.max_field_size, 4096);
        assert_eq!(config.uploads.max_file_size, Some(10_485_760));
        assert_eq!(config.uploads.max_files, Some(3));
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = ServerConfig::from_toml("").unwrap();
        assert_eq!(config.server.bind, DEFAULT_BIND.parse().unwrap());
        assert_eq!(config.uploads, UploadOptions::default());
    }

    #[test]
    fn partial_uploads_table() {
        let config = ServerConfig::from_toml("[uploads]\nmax_files = 1\n").unwrap();
        assert_eq!(config.uploads.max_files, Some(1));
        assert_eq!(config.uploads.max_file_size, None);
        assert_eq!(config.uploads.max_field_size, gqlup_multipart::DEFAULT_MAX_FIELD_SIZE);
    }

    #[test]
    fn invalid_bind_is_rejected() {
        let err = ServerConfig::from_toml("[server]\nbind = \"not an address\"\n");
        assert!(err.is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[uploads]\nmax_file_size = 512").unwrap();

        let config = ServerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.uploads.max_file_size, Some(512));
    }

    #[test]
    fn missing_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        let err = ServerConfig::from_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("absent.toml"));
    }
}
