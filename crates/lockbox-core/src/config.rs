use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::bridge::DEFAULT_CHUNK_SIZE;
use crate::LockboxResult;

/// Top-level daemon configuration (loaded from lockbox.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LockboxConfig {
    pub daemon: DaemonConfig,
    pub storage: StorageConfig,
    pub token: TokenConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// TCP listen address for gRPC (default: 127.0.0.1:8080)
    pub listen: String,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root data directory holding the master-key marker and one directory per user
    pub data_dir: PathBuf,
    /// Size of the binary chunks streamed over gRPC, in bytes
    pub chunk_size: usize,
}

/// Session token settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// HMAC secret for signing tokens. When unset a random secret is
    /// generated at startup and tokens do not survive a restart.
    pub secret: Option<String>,
    /// Token validity in seconds (default: 3600)
    pub ttl_secs: u64,
}

impl LockboxConfig {
    /// Load from a TOML file. A missing file is not an error: the defaults
    /// are used and a warning is logged.
    pub async fn load(path: &Path) -> LockboxResult<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "config file not found (using defaults)");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".into(),
            log_level: "info".into(),
            log_format: "text".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/lockbox"),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: None,
            ttl_secs: 3600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[daemon]
listen = "0.0.0.0:9443"
log_level = "debug"
log_format = "json"

[storage]
data_dir = "/srv/lockbox"
chunk_size = 4096

[token]
secret = "hunter2hunter2hunter2"
ttl_secs = 600
"#;
        let config: LockboxConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.daemon.listen, "0.0.0.0:9443");
        assert_eq!(config.daemon.log_level, "debug");
        assert_eq!(config.daemon.log_format, "json");
        assert_eq!(config.storage.data_dir, PathBuf::from("/srv/lockbox"));
        assert_eq!(config.storage.chunk_size, 4096);
        assert_eq!(config.token.secret.as_deref(), Some("hunter2hunter2hunter2"));
        assert_eq!(config.token.ttl_secs, 600);
    }

    #[test]
    fn test_parse_defaults() {
        let config: LockboxConfig = toml::from_str("").unwrap();

        assert_eq!(config.daemon.listen, "127.0.0.1:8080");
        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(config.daemon.log_format, "text");
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/lockbox"));
        assert_eq!(config.storage.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(config.token.secret.is_none());
        assert_eq!(config.token.ttl_secs, 3600);
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[storage]
data_dir = "/tmp/lockbox-data"
"#;
        let config: LockboxConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/lockbox-data"));
        // Defaults
        assert_eq!(config.storage.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.daemon.listen, "127.0.0.1:8080");
    }

    #[tokio::test]
    async fn test_load_missing_file_uses_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = LockboxConfig::load(&tmp.path().join("absent.toml"))
            .await
            .unwrap();
        assert_eq!(config.daemon.listen, "127.0.0.1:8080");
    }

    #[tokio::test]
    async fn test_load_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[token]\nttl_secs = 5\n").unwrap();

        let config = LockboxConfig::load(&path).await.unwrap();
        assert_eq!(config.token.ttl_secs, 5);
    }

    #[tokio::test]
    async fn test_load_invalid_toml_is_config_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[storage\nchunk_size = \"big\"").unwrap();

        let result = LockboxConfig::load(&path).await;
        assert!(matches!(result, Err(crate::LockboxError::Config(_))));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = LockboxConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: LockboxConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.daemon.listen, parsed.daemon.listen);
        assert_eq!(config.storage.data_dir, parsed.storage.data_dir);
        assert_eq!(config.token.ttl_secs, parsed.token.ttl_secs);
    }
}
