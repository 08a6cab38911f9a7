use crate::engine::EngineOptions;
use crate::types::LngLat;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub map: MapConfig,
    pub server: ServerConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MapConfig {
    pub style_url: String,
    pub center: [f64; 2], // [lng, lat]
    pub zoom: f64,
    pub preview_zoom: f64,
    pub width: u32,
    pub height: u32,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            style_url: "mapbox://styles/mapbox/satellite-streets-v12".to_string(),
            center: [77.6245, 12.9352],
            zoom: 13.0,
            preview_zoom: 12.0,
            width: 1024,
            height: 768,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080, static_dir: PathBuf::from("public") }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub snapshot: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { snapshot: PathBuf::from("output/map.png") }
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse TOML configuration")?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {:?}", path))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.map.width == 0 || self.map.height == 0 {
            bail!("map size must be non-zero, got {}x{}", self.map.width, self.map.height);
        }
        Ok(())
    }

    /// Loads the file if it exists, otherwise falls back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::info!(path = ?path, "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn engine_options(&self, zoom: f64, access_token: &str) -> EngineOptions {
        EngineOptions {
            style_url: self.map.style_url.clone(),
            center: LngLat { lng: self.map.center[0], lat: self.map.center[1] },
            zoom,
            access_token: access_token.to_string(),
            width: self.map.width,
            height: self.map.height,
        }
    }
}
