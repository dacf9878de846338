//! Configuration loader

use std::path::Path;

use wsmux_utils::{config_file, Result, WsmuxError};

use super::AppConfig;

/// Smallest accepted replay buffer
const MIN_BUFFER_LIMIT: usize = 1024;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from default location
    pub fn load() -> Result<AppConfig> {
        let path = config_file();
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            Ok(AppConfig::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<AppConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| WsmuxError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&content, path)
    }

    /// Parse configuration from string
    pub fn parse(content: &str, path: &Path) -> Result<AppConfig> {
        toml::from_str(content).map_err(|e| WsmuxError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Validate configuration
    pub fn validate(config: &AppConfig) -> Result<()> {
        if config.server.listen_addr().is_none() {
            return Err(WsmuxError::config(format!(
                "listen must be a socket address, got '{}'",
                config.server.listen
            )));
        }

        let sessions = &config.sessions;
        if sessions.idle_timeout_secs == 0 {
            return Err(WsmuxError::config("idle_timeout_secs must be at least 1"));
        }

        if sessions.buffer_limit < MIN_BUFFER_LIMIT {
            return Err(WsmuxError::config(format!(
                "buffer_limit must be at least {} bytes",
                MIN_BUFFER_LIMIT
            )));
        }

        // Room for the session id and the replay ahead of live output
        if sessions.client_queue_capacity < 2 {
            return Err(WsmuxError::config("client_queue_capacity must be at least 2"));
        }

        if sessions.default_cols == 0 || sessions.default_rows == 0 {
            return Err(WsmuxError::config("default_cols and default_rows must be positive"));
        }

        if sessions.shell.is_empty() {
            return Err(WsmuxError::config("shell must not be empty"));
        }

        Ok(())
    }

    /// Load from `path` if given, else the default location, then validate
    pub fn load_and_validate(path: Option<&Path>) -> Result<AppConfig> {
        let config = match path {
            Some(path) => Self::load_from_path(path)?,
            None => Self::load()?,
        };
        Self::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_missing_file() {
        let config = ConfigLoader::load();
        assert!(config.is_ok());
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        std::fs::write(
            &path,
            r#"
            [server]
            listen = "0.0.0.0:9000"

            [projects]
            root = "/srv/projects"
            create_missing = false
            "#,
        )
        .unwrap();

        let config = ConfigLoader::load_and_validate(Some(&path)).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:9000");
        assert_eq!(config.projects.root, Path::new("/srv/projects"));
        assert!(!config.projects.create_missing);
    }

    #[test]
    fn test_load_from_missing_path_fails() {
        let dir = tempdir().unwrap();
        let err = ConfigLoader::load_from_path(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, WsmuxError::FileRead { .. }));
    }

    #[test]
    fn test_parse_invalid_toml() {
        let err = ConfigLoader::parse("invalid { toml", Path::new("test.toml")).unwrap_err();
        assert!(matches!(err, WsmuxError::ConfigInvalid { .. }));
    }

    #[test]
    fn test_validate_defaults() {
        assert!(ConfigLoader::validate(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.sessions.idle_timeout_secs = 0;
        assert!(ConfigLoader::validate(&config).is_err());

        let mut config = AppConfig::default();
        config.sessions.buffer_limit = 10;
        assert!(ConfigLoader::validate(&config).is_err());

        let mut config = AppConfig::default();
        config.sessions.client_queue_capacity = 1;
        assert!(ConfigLoader::validate(&config).is_err());

        let mut config = AppConfig::default();
        config.sessions.default_rows = 0;
        assert!(ConfigLoader::validate(&config).is_err());

        let mut config = AppConfig::default();
        config.server.listen = "localhost".into();
        assert!(ConfigLoader::validate(&config).is_err());
    }
}
