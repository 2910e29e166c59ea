// SPDX-License-Identifier: MIT OR Apache-2.0
//! Application settings, persisted as RON next to the project.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Settings file errors.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Filesystem failure
    #[error("settings io error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed settings file
    #[error("settings parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),
    /// Serialization failure
    #[error("settings serialize error: {0}")]
    Serialize(#[from] ron::Error),
}

/// Persistent application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Output resolution for the root graph
    pub output_size: [u32; 2],
    /// Directory watched for shader changes
    pub shader_dir: PathBuf,
    /// Target frames per second for the headless loop
    pub target_fps: u32,
    /// Debounce window for the shader watcher, in milliseconds
    pub watch_debounce_ms: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            output_size: [1280, 720],
            shader_dir: PathBuf::from("shaders"),
            target_fps: 60,
            watch_debounce_ms: 250,
        }
    }
}

impl AppSettings {
    /// Load settings, falling back to defaults when the file is absent.
    /// A malformed file is an error; silently discarding user edits would
    /// be worse than refusing to start.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            info!("no settings file at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let settings = ron::from_str(&text)?;
        info!("settings loaded from {:?}", path);
        Ok(settings)
    }

    /// Write settings back to disk.
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let text = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        if let Err(err) = std::fs::write(path, &text) {
            warn!(error = %err, "failed to save settings");
            return Err(err.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_missing() {
        let settings = AppSettings::load(Path::new("/nonexistent/lumo-settings.ron")).unwrap();
        assert_eq!(settings.output_size, [1280, 720]);
        assert_eq!(settings.target_fps, 60);
    }

    #[test]
    fn test_round_trip() {
        let dir = std::env::temp_dir().join("lumo-settings-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.ron");

        let mut settings = AppSettings::default();
        settings.output_size = [640, 480];
        settings.save(&path).unwrap();

        let loaded = AppSettings::load(&path).unwrap();
        assert_eq!(loaded.output_size, [640, 480]);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let settings: AppSettings = ron::from_str("(target_fps: 30)").unwrap();
        assert_eq!(settings.target_fps, 30);
        assert_eq!(settings.output_size, [1280, 720]);
    }
}
