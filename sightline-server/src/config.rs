//! Server configuration
//!
//! Defaults, then an optional TOML/JSON file, then environment variables,
//! then command-line flags.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sightline_eye::PipelineConfig;
use std::path::{Path, PathBuf};

/// Log line encoding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory holding `<name>_descriptors.json` files
    pub descriptor_dir: PathBuf,
    /// YOLOv8 ONNX model. Required at startup.
    pub detector_model: Option<PathBuf>,
    /// Depth-Anything ONNX model. Depth is reported as null without it.
    pub depth_model: Option<PathBuf>,
    /// Minimum detector class score
    pub detector_confidence: f32,
    /// IoU above which overlapping same-class boxes are suppressed
    pub detector_iou: f32,
    pub translation_endpoint: String,
    pub translation_timeout_secs: u64,
    pub log_level: String,
    pub log_format: LogFormat,
    pub pipeline: PipelineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            descriptor_dir: PathBuf::from("descriptors"),
            detector_model: None,
            depth_model: None,
            detector_confidence: 0.25,
            detector_iou: 0.45,
            translation_endpoint: "https://translate.googleapis.com".to_string(),
            translation_timeout_secs: 5,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load from a file. `.json` files are parsed as JSON; anything else is
    /// tried as TOML first, then JSON.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            return serde_json::from_str(&content)
                .with_context(|| format!("Invalid JSON config {:?}", path));
        }
        Self::from_str(&content).with_context(|| format!("Invalid config file {:?}", path))
    }

    pub fn from_str(content: &str) -> Result<Self> {
        match toml::from_str::<ServerConfig>(content) {
            Ok(config) => Ok(config),
            Err(toml_err) => serde_json::from_str::<ServerConfig>(content)
                .map_err(|_| anyhow::anyhow!("neither TOML nor JSON: {}", toml_err)),
        }
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("SIGHTLINE_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("SIGHTLINE_PORT").and_then(|p| p.parse::<u16>().ok()) {
            self.port = port;
        }
        if let Some(dir) = lookup("SIGHTLINE_DESCRIPTOR_DIR") {
            self.descriptor_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("YOLO_MODEL_PATH") {
            self.detector_model = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("DEPTH_MODEL_PATH") {
            self.depth_model = Some(PathBuf::from(path));
        }
        if let Some(lang) = lookup("SIGHTLINE_DEFAULT_LANG") {
            self.pipeline.default_language = lang;
        }
        if let Some(level) = lookup("SIGHTLINE_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(format) = lookup("SIGHTLINE_LOG_FORMAT").and_then(|f| f.parse().ok()) {
            self.log_format = format;
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("host cannot be empty".to_string());
        }
        if self.port == 0 {
            return Err("port cannot be 0".to_string());
        }
        if self.descriptor_dir.as_os_str().is_empty() {
            return Err("descriptor_dir cannot be empty".to_string());
        }
        for (name, value) in [
            ("detector_confidence", self.detector_confidence),
            ("detector_iou", self.detector_iou),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(format!("{} must be in (0, 1], got {}", name, value));
            }
        }
        if self.translation_timeout_secs == 0 {
            return Err("translation_timeout_secs must be > 0".to_string());
        }
        if !matches!(
            self.log_level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(format!("unknown log_level '{}'", self.log_level));
        }
        self.pipeline.validate()
    }
}
