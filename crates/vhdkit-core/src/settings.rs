//! Persistent user settings for vhdkit
//!
//! Settings are stored in a TOML configuration file at:
//! - Linux/macOS: `~/.config/vhdkit/vhdkit_config.toml`
//! - Windows: `%APPDATA%\vhdkit\vhdkit_config.toml`
//!
//! # Example Configuration
//!
//! ```toml
//! [create]
//! image_type = "sparse"
//! block_size = "2M"
//!
//! [convert]
//! chunk_size = "1M"
//! verify = false
//!
//! [behavior]
//! quiet = false
//! overwrite = false
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Configuration file name
const CONFIG_FILE_NAME: &str = "vhdkit_config.toml";

/// Application name for config directory
const APP_NAME: &str = "vhdkit";

/// User settings loaded from configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Image creation settings
    pub create: CreateSettings,

    /// Conversion settings
    pub convert: ConvertSettings,

    /// Behavior settings
    pub behavior: BehaviorSettings,
}

/// Kind of image created when none is named
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    /// Preallocated image
    Fixed,
    /// Dynamic image that grows as blocks are written
    #[default]
    Sparse,
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageKind::Fixed => write!(f, "fixed"),
            ImageKind::Sparse => write!(f, "sparse"),
        }
    }
}

/// Settings for image creation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CreateSettings {
    /// Default image kind
    pub image_type: ImageKind,

    /// Default data block size of dynamic images (e.g., "2M", "512K")
    pub block_size: String,
}

/// Settings for conversions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConvertSettings {
    /// Bytes moved per step (e.g., "1M", "4M")
    pub chunk_size: String,

    /// Whether to compare the result with the source after converting
    pub verify: bool,
}

/// General behavior settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BehaviorSettings {
    /// Whether to suppress non-error output
    pub quiet: bool,

    /// Whether to replace existing output files without asking
    pub overwrite: bool,
}

impl Default for CreateSettings {
    fn default() -> Self {
        Self {
            image_type: ImageKind::default(),
            block_size: "2M".to_string(),
        }
    }
}

impl Default for ConvertSettings {
    fn default() -> Self {
        Self {
            chunk_size: "1M".to_string(),
            verify: false,
        }
    }
}

impl Settings {
    /// Load settings from the configuration file
    ///
    /// Returns default settings if the file doesn't exist or can't be parsed
    pub fn load() -> Self {
        Self::load_from_path(Self::config_path())
    }

    /// Load settings from a specific path
    pub fn load_from_path(path: Option<PathBuf>) -> Self {
        let Some(path) = path else {
            tracing::debug!("No config path available, using defaults");
            return Self::default();
        };

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(settings) => {
                    tracing::debug!("Loaded settings from {:?}", path);
                    settings
                }
                Err(e) => {
                    tracing::warn!("Failed to parse config file {:?}: {}", path, e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config file {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Save settings to the configuration file
    pub fn save(&self) -> Result<PathBuf, SettingsError> {
        self.save_to_path(Self::config_path())
    }

    /// Save settings to a specific path
    pub fn save_to_path(&self, path: Option<PathBuf>) -> Result<PathBuf, SettingsError> {
        let path = path.ok_or(SettingsError::NoConfigDir)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SettingsError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let contents = toml::to_string_pretty(self).map_err(SettingsError::Serialize)?;

        std::fs::write(&path, contents).map_err(|e| SettingsError::Io {
            path: path.clone(),
            source: e,
        })?;

        tracing::info!("Saved settings to {:?}", path);
        Ok(path)
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join(CONFIG_FILE_NAME))
    }

    /// Get the path to the configuration directory
    pub fn config_dir() -> Option<PathBuf> {
        dirs_next::config_dir().map(|p| p.join(APP_NAME))
    }

    /// Check if a configuration file exists
    pub fn config_exists() -> bool {
        Self::config_path().is_some_and(|p| p.exists())
    }

    /// Generate a default configuration file content as a string
    pub fn default_config_string() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate default config"))
    }
}

/// Errors that can occur when working with settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// No configuration directory available
    #[error("Could not determine configuration directory")]
    NoConfigDir,

    /// Failed to read or write config file
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path that caused the error
        path: PathBuf,
        /// The underlying error
        source: std::io::Error,
    },

    /// Failed to serialize settings
    #[error("Failed to serialize settings: {0}")]
    Serialize(toml::ser::Error),

    /// Failed to deserialize settings
    #[error("Failed to parse settings: {0}")]
    Deserialize(toml::de::Error),
}
