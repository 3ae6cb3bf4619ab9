use super::error::{Error, Result};
use crate::storage::index::Metric;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Comma-separated list of directories to index, overriding the settings file.
pub const DIRECTORIES_ENV: &str = "SEMFIND_DIRECTORIES";
/// Location of the metadata store, overriding the default under `database_dir`.
pub const STORE_PATH_ENV: &str = "SEMFIND_STORE_PATH";

/// User-editable settings, persisted as `settings.json` in the base directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root directories to index and watch
    pub directories: Vec<PathBuf>,
    /// Seconds between background freshness scans; 0 disables them
    pub rescan_interval_secs: u64,
    /// Debounce window for file-system events
    pub debounce_millis: u64,
    /// Distance metric used by the vector index
    pub metric: Metric,
    /// Number of files returned when a query does not ask for a count
    pub default_top_n: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            directories: Vec::new(),
            rescan_interval_secs: 300,
            debounce_millis: 2000,
            metric: Metric::L2,
            default_top_n: Some(10),
        }
    }
}

/// Configuration for semfind
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory for semfind data
    pub base_dir: PathBuf,
    /// Directory holding the metadata store
    pub database_dir: PathBuf,
    /// Directory for cached models
    pub models_dir: PathBuf,
    /// Path to the metadata store file
    pub store_path: PathBuf,
    /// Path to the persisted settings
    pub settings_path: PathBuf,
    pub settings: Settings,
}

impl Config {
    /// Get the default configuration directory
    pub fn default_base_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))
            .map(|home| home.join(".semfind"))
    }

    /// Create a new configuration with default settings
    pub fn new(base_dir: Option<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.unwrap_or_else(|| {
            Self::default_base_dir().unwrap_or_else(|_| PathBuf::from(".semfind"))
        });
        let database_dir = base_dir.join("database");

        Ok(Self {
            store_path: database_dir.join("metadata.redb"),
            models_dir: base_dir.join("models"),
            settings_path: base_dir.join("settings.json"),
            database_dir,
            base_dir,
            settings: Settings::default(),
        })
    }

    /// Create a configuration and load persisted settings plus environment overrides
    pub fn load(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Self::new(base_dir)?;

        if config.settings_path.exists() {
            let raw = std::fs::read_to_string(&config.settings_path)?;
            config.settings = serde_json::from_str(&raw).map_err(|e| {
                Error::Config(format!(
                    "Failed to parse {}: {}",
                    config.settings_path.display(),
                    e
                ))
            })?;
        }

        config.apply_env_overrides(
            std::env::var(DIRECTORIES_ENV).ok().as_deref(),
            std::env::var(STORE_PATH_ENV).ok().as_deref(),
        );
        Ok(config)
    }

    fn apply_env_overrides(&mut self, directories: Option<&str>, store_path: Option<&str>) {
        if let Some(dirs) = directories {
            let parsed: Vec<PathBuf> = dirs
                .split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(PathBuf::from)
                .collect();
            if !parsed.is_empty() {
                self.settings.directories = parsed;
            }
        }
        if let Some(path) = store_path.filter(|p| !p.trim().is_empty()) {
            self.store_path = PathBuf::from(path);
        }
    }

    /// Persist the current settings
    pub fn save(&self) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        let json = serde_json::to_string_pretty(&self.settings)
            .map_err(|e| Error::Config(format!("Failed to serialize settings: {}", e)))?;
        std::fs::write(&self.settings_path, json)?;
        Ok(())
    }

    /// Initialize the configuration directories
    pub fn init(&self) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(&self.database_dir)?;
        std::fs::create_dir_all(&self.models_dir)?;
        if let Some(parent) = self.store_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Check if the configuration is already initialized
    pub fn is_initialized(&self) -> bool {
        self.base_dir.exists() && self.database_dir.exists()
    }

    /// Fail when there is nothing to index
    pub fn validate(&self) -> Result<()> {
        if self.settings.directories.is_empty() {
            return Err(Error::Config(format!(
                "No directories configured. Run 'semfind init --dir <PATH>' or set {}.",
                DIRECTORIES_ENV
            )));
        }
        Ok(())
    }

    /// Interval for background freshness scans, if enabled
    pub fn rescan_interval(&self) -> Option<Duration> {
        match self.settings.rescan_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.settings.debounce_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_layout() {
        let temp_dir = TempDir::new().unwrap();
        let base_dir = temp_dir.path().join("semfind");
        let config = Config::new(Some(base_dir.clone())).unwrap();

        assert_eq!(config.database_dir, base_dir.join("database"));
        assert_eq!(config.store_path, base_dir.join("database").join("metadata.redb"));
        assert!(!config.is_initialized());

        config.init().unwrap();
        assert!(config.is_initialized());
        assert!(config.models_dir.exists());
    }

    #[test]
    fn test_settings_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let base_dir = temp_dir.path().join("semfind");
        let mut config = Config::new(Some(base_dir.clone())).unwrap();
        config.settings.directories = vec![PathBuf::from("/notes")];
        config.settings.metric = Metric::Cosine;
        config.settings.rescan_interval_secs = 0;
        config.save().unwrap();

        let raw = std::fs::read_to_string(&config.settings_path).unwrap();
        let loaded: Settings = serde_json::from_str(&raw).unwrap();
        assert_eq!(loaded, config.settings);
    }

    #[test]
    fn test_partial_settings_use_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"directories": ["/a"]}"#).unwrap();
        assert_eq!(settings.directories, vec![PathBuf::from("/a")]);
        assert_eq!(settings.debounce_millis, 2000);
        assert_eq!(settings.metric, Metric::L2);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::new(Some(PathBuf::from("/tmp/semfind"))).unwrap();
        config.apply_env_overrides(Some("/a, /b,,"), Some("/tmp/other.redb"));
        assert_eq!(
            config.settings.directories,
            vec![PathBuf::from("/a"), PathBuf::from("/b")]
        );
        assert_eq!(config.store_path, PathBuf::from("/tmp/other.redb"));

        // Empty values leave the settings alone
        config.apply_env_overrides(Some(" , "), Some(""));
        assert_eq!(config.settings.directories.len(), 2);
        assert_eq!(config.store_path, PathBuf::from("/tmp/other.redb"));
    }

    #[test]
    fn test_validate_and_interval() {
        let mut config = Config::new(Some(PathBuf::from("/tmp/semfind"))).unwrap();
        assert!(config.validate().is_err());
        config.settings.directories.push(PathBuf::from("/notes"));
        assert!(config.validate().is_ok());

        assert_eq!(config.rescan_interval(), Some(Duration::from_secs(300)));
        config.settings.rescan_interval_secs = 0;
        assert_eq!(config.rescan_interval(), None);
    }
}
