use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use stratum_core::{Result, StratumError};

use crate::schema::{FileEntry, StratumConfig};

/// Loads and reloads the engine settings.
pub struct ConfigLoader {
    config: Arc<RwLock<StratumConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the settings path: explicit path > STRATUM_CONFIG env > ~/.stratum/stratum.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("STRATUM_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".stratum")
            .join("stratum.toml")
    }

    /// Load the settings from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading settings");
            Self::read(&config_path)?
        } else {
            warn!(?config_path, "settings file not found, using defaults");
            StratumConfig::default()
        };

        let config = Self::apply_env_overrides(config);
        Self::check(&config)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    fn read(path: &Path) -> Result<StratumConfig> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str::<StratumConfig>(&raw).map_err(|e| {
            StratumError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Log warnings, fail on errors.
    fn check(config: &StratumConfig) -> Result<()> {
        let warnings = config.validate().map_err(StratumError::Config)?;
        for w in &warnings {
            warn!("{}", w);
        }
        Ok(())
    }

    /// Get a read snapshot of the current settings.
    pub fn get(&self) -> StratumConfig {
        self.config.read().clone()
    }

    pub fn shared(&self) -> Arc<RwLock<StratumConfig>> {
        Arc::clone(&self.config)
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// `[[sources.files]]` entries with relative paths anchored at the
    /// directory holding the settings file.
    pub fn file_entries(&self) -> Vec<FileEntry> {
        let base = self.config_path.parent().unwrap_or(Path::new("."));
        self.config
            .read()
            .sources
            .files
            .iter()
            .map(|entry| {
                let mut entry = entry.clone();
                if entry.path.is_relative() {
                    entry.path = base.join(&entry.path);
                }
                entry
            })
            .collect()
    }

    /// Apply env var overrides (STRATUM_LOG_LEVEL, STRATUM_LOG_FORMAT, STRATUM_QUEUE_CAPACITY).
    pub fn apply_env_overrides(config: StratumConfig) -> StratumConfig {
        Self::apply_overrides_from(config, |name| std::env::var(name).ok())
    }

    /// Same as [`ConfigLoader::apply_env_overrides`] with an explicit lookup.
    pub fn apply_overrides_from<F>(mut config: StratumConfig, lookup: F) -> StratumConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("STRATUM_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Some(v) = lookup("STRATUM_LOG_FORMAT") {
            config.logging.format = v;
        }
        if let Some(v) = lookup("STRATUM_QUEUE_CAPACITY") {
            match v.parse::<usize>() {
                Ok(capacity) => config.engine.queue_capacity = capacity,
                Err(e) => warn!(value = %v, error = %e, "ignoring invalid STRATUM_QUEUE_CAPACITY"),
            }
        }
        config
    }

    /// Reload the settings from disk. Invalid settings leave the current ones in place.
    pub fn reload(&self) -> Result<()> {
        if !self.config_path.exists() {
            return Err(StratumError::Config(format!(
                "settings file not found: {}",
                self.config_path.display()
            )));
        }
        let new_config = Self::apply_env_overrides(Self::read(&self.config_path)?);
        Self::check(&new_config)?;
        *self.config.write() = new_config;
        info!("settings reloaded");
        Ok(())
    }
}
