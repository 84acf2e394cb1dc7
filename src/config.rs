//! Configuration for the wlo overlay
//!
//! Loads configuration from TOML file at `~/.config/wlo/config.toml`
//! Auto-generates default config file on first run if missing.

use crate::damage::ScrollMetrics;
use crate::surface::ConfigurePolicy;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub surface: SurfaceConfig,
    pub font: FontConfig,
    pub text: TextConfig,
    pub present: PresentConfig,
}

impl Config {
    /// Load configuration from `path`, or the default location when `None`.
    ///
    /// A missing file at the default location is created with defaults; an
    /// explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::read(path)?,
            None => {
                let config_path = Self::config_path()?;
                if !config_path.exists() {
                    info!("Config file not found at {:?}, using defaults", config_path);
                    // Auto-generate default config file
                    if let Err(e) = Self::save_default(&config_path) {
                        warn!("Failed to create default config file: {}", e);
                    }
                    Self::default()
                } else {
                    Self::read(&config_path)?
                }
            }
        };

        config.validate()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;

        info!("Configuration loaded from {:?}", path);
        debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Get the path to the config file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("wlo");

        Ok(config_dir.join("config.toml"))
    }

    /// Save default configuration to file
    fn save_default(path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let toml_string = toml::to_string_pretty(&Self::default())
            .context("Failed to serialize default config")?;

        fs::write(path, toml_string).context("Failed to write default config file")?;

        info!("Created default config file at {:?}", path);
        Ok(())
    }

    /// Reject settings the renderer cannot work with
    pub fn validate(&self) -> Result<()> {
        let SurfaceConfig { width, height, .. } = self.surface;
        if width == 0 || height == 0 {
            bail!("surface size {}x{} has no pixels", width, height);
        }
        if self.text.line_height == 0 {
            bail!("text.line_height must be positive");
        }
        if self.text.advance == 0 {
            bail!("text.advance must be positive");
        }
        if self.text.top_margin + 2 * self.text.line_height > height {
            bail!(
                "surface height {} cannot fit a line of {}px below a {}px margin",
                height,
                self.text.line_height,
                self.text.top_margin
            );
        }
        Ok(())
    }
}

/// Which screen corner the overlay sticks to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    #[default]
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

/// Overlay surface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    /// Requested width in pixels
    pub width: u32,
    /// Requested height in pixels
    pub height: u32,
    pub anchor: Anchor,
    /// Layer-shell namespace
    pub namespace: String,
    /// Reaction to a configure with a different size
    pub configure_policy: ConfigurePolicy,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            width: 200,
            height: 200,
            anchor: Anchor::TopLeft,
            namespace: "overlay".to_string(),
            configure_policy: ConfigurePolicy::Accept,
        }
    }
}

/// Font configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FontConfig {
    /// Font file (TTF, OTF or a TTC collection)
    pub path: PathBuf,
    /// Face index inside a collection
    pub face_index: u32,
    /// Em size in pixels
    pub pixel_size: u32,
}

impl Default for FontConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/usr/share/fonts/sarasa-gothic/Sarasa-Regular.ttc"),
            face_index: 20,
            pixel_size: 16,
        }
    }
}

/// Text layout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextConfig {
    /// Fixed horizontal step per character in pixels
    pub advance: u32,
    /// Vertical step per line in pixels
    pub line_height: u32,
    /// Baseline the cursor wraps back to
    pub top_margin: u32,
    /// Coverage multiplier (0-255); low values give a faint ghost text
    pub alpha: u8,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            advance: 10,
            line_height: 16,
            top_margin: 20,
            alpha: 0x10,
        }
    }
}

impl TextConfig {
    pub fn scroll_metrics(&self) -> ScrollMetrics {
        ScrollMetrics {
            line_height: self.line_height as i32,
            top_margin: self.top_margin as i32,
        }
    }
}

/// Frame submission configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresentConfig {
    /// Wait for `wl_buffer.release` before reusing a slot
    pub track_release: bool,
}

impl Default for PresentConfig {
    fn default() -> Self {
        Self {
            track_release: true,
        }
    }
}
