//! Configuration management for pivot mirrors

mod mirror;
mod security;
pub mod serde_utils;

pub use mirror::{BackoffConfig, MirrorConfig, SocketConfig};
pub use security::{key_fingerprint, SecurityConfig, DEFAULT_SHARED_KEY};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pivot")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("mirror.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_path_ends_with_mirror_toml() {
        let path = default_config_path();
        assert!(path.ends_with("pivot/mirror.toml"));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(
            load_config::<MirrorConfig>(&path),
            Err(ConfigError::NotFound(p)) if p == path
        ));
    }

    #[test]
    fn test_load_mirror_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
name = "edge"
endpoint_a = "9000"
endpoint_b = "10.0.0.5:22"
client = true
rendezvous_timeout = 5

[socket]
keepalive = 10
recv_buffer = 65536

[command_link]
max_attempts = 3
"#
        )
        .unwrap();

        let config: MirrorConfig = load_config(file.path()).unwrap();
        assert_eq!(config.name, "edge");
        assert!(config.client);
        assert_eq!(config.rendezvous_timeout.as_secs(), 5);
        assert_eq!(config.socket.keepalive, Some(std::time::Duration::from_secs(10)));
        assert_eq!(config.socket.recv_buffer, Some(65536));
        assert_eq!(config.command_link.max_attempts, Some(3));
        // Untouched fields keep their defaults
        assert!(config.socket.nodelay);
        assert_eq!(config.queue_capacity, MirrorConfig::default().queue_capacity);
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name = [unterminated").unwrap();
        assert!(matches!(
            load_config::<MirrorConfig>(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }
}
