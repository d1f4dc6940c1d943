//! Engine Configuration
//!
//! Every field has a default, so an empty JSON object is a valid config.

use std::fs;
use std::path::Path;
use std::time::Duration;

use image::Rgba;
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;
use crate::slots::LocatorSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Default slot detection, overridable per template manifest.
    #[serde(default)]
    pub locator: LocatorSettings,
    /// Colour that unfilled or translucent areas are flattened onto.
    #[serde(default = "default_white")]
    pub background: [u8; 3],
    /// Colour of the gaps between sheet copies.
    #[serde(default = "default_white")]
    pub sheet_fill: [u8; 3],
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Worker threads for photo fitting; 0 lets rayon decide.
    #[serde(default)]
    pub fit_threads: usize,
    #[serde(default = "default_dpi")]
    pub dpi: u16,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_white() -> [u8; 3] {
    [255, 255, 255]
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_dpi() -> u16 {
    300
}

fn default_jpeg_quality() -> u8 {
    92
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            locator: LocatorSettings::default(),
            background: default_white(),
            sheet_fill: default_white(),
            timeout_ms: default_timeout_ms(),
            fit_threads: 0,
            dpi: default_dpi(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, CollaboratorError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn background_rgba(&self) -> Rgba<u8> {
        let [r, g, b] = self.background;
        Rgba([r, g, b, 255])
    }

    pub fn sheet_fill_rgba(&self) -> Rgba<u8> {
        let [r, g, b] = self.sheet_fill;
        Rgba([r, g, b, 255])
    }
}
