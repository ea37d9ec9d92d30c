// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section is optional. A missing file means defaults; a broken file
// means defaults and a warning through `Config::load`, or an error through
// `Config::load_from_path`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub resources: ResourcesConfig,
}

/// Window settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Hundred Kilometers".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GraphicsConfig {
    /// RGBA in 0..1, fixed for the lifetime of the renderer
    pub clear_color: [f32; 4],
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DebugConfig {
    /// Only honoured in debug builds
    pub validation_layers: bool,
    /// env_logger filter string, e.g. "info,hundred_km=debug". RUST_LOG wins.
    pub log_filter: Option<String>,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_filter: None,
        }
    }
}

/// Where compiled shaders are read from
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ResourcesConfig {
    pub shader_dir: PathBuf,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            shader_dir: PathBuf::from("resources/shader"),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Validation is never enabled in release builds.
    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.debug.validation_layers
    }
}
