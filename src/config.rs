use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::backend::GlVersion;
use crate::error::Result;

/// Driver settings, read from a JSON file. Missing keys take defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub gl_version: GlVersion,
    /// Device scale factor reported by the window
    pub scale_factor: u32,
    pub window_width: u32,
    pub window_height: u32,
    pub guest_width: u32,
    pub guest_height: u32,
    /// Frames to present before exiting, 0 runs until interrupted
    pub frames: u64,
    pub refresh_interval_ms: u64,
    pub render_node: PathBuf,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            gl_version: GlVersion::default(),
            scale_factor: 1,
            window_width: 1024,
            window_height: 768,
            guest_width: 640,
            guest_height: 480,
            frames: 0,
            refresh_interval_ms: 16,
            render_node: PathBuf::from("/dev/dri/renderD128"),
        }
    }
}

impl DisplayConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
