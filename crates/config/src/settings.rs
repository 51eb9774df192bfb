// User settings
// Loaded from ~/.config/jwlmerge/settings.toml

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory the merged archive is written to.
    pub output_dir: PathBuf,

    /// `deviceName` stamped into the merged manifest.
    pub device_name: String,

    /// Rules file used when `--rules` is not given. None = built-in rules.
    pub rules: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("merged"),
            device_name: "jwlmerge".to_string(),
            rules: None,
        }
    }
}

impl Settings {
    /// Get the settings file path
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("jwlmerge");
        config_dir.join("settings.toml")
    }

    /// Load settings from the default location
    pub fn load() -> Result<Self, String> {
        Self::load_from(&Self::config_path())
    }

    /// Load settings from `path`. A missing file yields the defaults; a file
    /// that exists but does not parse is an error.
    pub fn load_from(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| format!("{}: {}", path.display(), e))?;
        let mut settings: Settings = toml::from_str(&contents)
            .map_err(|e| format!("{}: {}", path.display(), e))?;

        // Relative rules paths are relative to the settings file
        if let (Some(rules), Some(dir)) = (settings.rules.as_mut(), path.parent()) {
            if rules.is_relative() {
                *rules = dir.join(&*rules);
            }
        }
        Ok(settings)
    }

    /// Get the config file path for display
    pub fn config_path_display() -> String {
        Self::config_path().to_string_lossy().to_string()
    }
}
