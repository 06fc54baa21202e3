//! Runtime settings, read from a JSON file.
//!
//! Every field has a default, so an empty object (or no file at all) is a
//! valid configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::color::Color;
use crate::timing::TimingMode;
use crate::Result;

/// Environment variable holding the path of the config file.
pub const CONFIG_ENV: &str = "TREELENS_CONFIG";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub flame: FlameStyle,
    /// Duration read for each bar of the flame graph
    pub timing_mode: TimingMode,
    pub log: LogConfig,
}

/// Flame graph appearance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlameStyle {
    pub bar_height: f32,
    /// Gap between a bar's left edge and its caption
    pub label_padding: f32,
    pub label_color: Color,
    pub font_size: f32,
    pub background: Color,
}

impl Default for FlameStyle {
    fn default() -> Self {
        Self {
            bar_height: 10.0,
            label_padding: 2.0,
            label_color: Color::BLACK,
            font_size: 10.0,
            background: Color::from_rgb(30, 41, 59),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directives; `RUST_LOG` takes precedence.
    pub filter: String,
    pub file: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            file: None,
        }
    }
}

impl Config {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    /// Load the file named by `TREELENS_CONFIG`, or the defaults when the
    /// variable is unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
