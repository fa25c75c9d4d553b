use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::DeskError;

/// Persisted settings: the paired desk and the named height presets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Bluetooth address of the desk, as saved by `idasen scan`.
    pub mac_address: Option<String>,

    /// Named target heights in millimeters.
    #[serde(default = "default_presets")]
    pub presets: BTreeMap<String, f64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mac_address: None,
            presets: default_presets(),
        }
    }
}

fn default_presets() -> BTreeMap<String, f64> {
    BTreeMap::from([("sit".to_string(), 700.0), ("stand".to_string(), 1000.0)])
}

impl Config {
    /// Resolve a move target: a preset name first, then a literal height
    /// in millimeters.
    pub fn resolve_target(&self, token: &str) -> Result<f64, DeskError> {
        if let Some(height) = self.presets.get(token) {
            return Ok(*height);
        }
        token.parse::<f64>().map_err(|_| DeskError::UnknownPreset {
            token: token.to_string(),
            known: self.presets.keys().cloned().collect(),
        })
    }
}

/// Reads and writes the config file at a fixed location.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The default config file path (~/.config/idasen/config.json on Linux).
    pub fn default_location() -> Result<PathBuf> {
        let base = dirs::config_dir().context("could not determine config directory")?;
        Ok(base.join("idasen").join("config.json"))
    }

    /// Load the config file, falling back to defaults if it does not exist.
    pub fn load(&self) -> Result<Config> {
        if !self.path.exists() {
            log::info!("no config file at {:?}, using defaults", self.path);
            return Ok(Config::default());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read config file {:?}", self.path))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config file {:?}", self.path))?;
        Ok(config)
    }

    /// Save the config, creating parent directories as needed.
    pub fn save(&self, config: &Config) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config directory {parent:?}"))?;
        }
        let content = serde_json::to_string_pretty(config).context("failed to serialize config")?;
        fs::write(&self.path, content)
            .with_context(|| format!("failed to write config file {:?}", self.path))?;
        log::info!("configuration saved to {:?}", self.path);
        Ok(())
    }
}
