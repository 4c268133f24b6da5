//! Persisted effect settings
//!
//! The effect configuration is stored as a flat key/value JSON record:
//! read once at startup, rewritten on every field change. A missing or
//! unreadable file falls back to defaults so a damaged settings file can
//! never block startup.

use std::fs;
use std::path::{Path, PathBuf};

use crate::{CoreResult, EffectConfig};

/// Settings file name inside the config directory
pub const SETTINGS_FILE: &str = "warpshift-settings.json";

/// Durable store for the effect configuration
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Store rooted in a config directory, using the standard file name
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self::new(dir.as_ref().join(SETTINGS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted configuration.
    ///
    /// Missing or corrupt files yield `EffectConfig::default()`; loaded
    /// values are clamped into range since the file may have been edited
    /// by hand.
    pub fn load(&self) -> EffectConfig {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) => {
                log::debug!("No settings at {}: {}", self.path.display(), e);
                return EffectConfig::default();
            }
        };

        match serde_json::from_str::<EffectConfig>(&data) {
            Ok(config) => config.clamped(),
            Err(e) => {
                log::warn!(
                    "Corrupt settings file {}, using defaults: {}",
                    self.path.display(),
                    e
                );
                EffectConfig::default()
            }
        }
    }

    /// Write the configuration, atomically replacing the previous file
    pub fn save(&self, config: &EffectConfig) -> CoreResult<()> {
        let json = serde_json::to_string_pretty(config)?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;

        log::debug!("Settings written to {}", self.path.display());
        Ok(())
    }
}
