//! Detector configuration, loaded from TOML with defaults for every field.

use crate::error::{DetectorError, Result};
use crate::services::classifier::preprocess::MAX_INPUT_SIZE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "ai-detector";
pub const DEFAULT_REMOTE_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// When the remote classifier is consulted after local inference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum EscalationPolicy {
    /// Every image goes to the remote classifier; local inference is only logged.
    Always,
    /// Only images whose local AI probability reaches `suspicion_threshold`
    /// (or whose local verdict is uncertain) are escalated.
    Suspicious,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub threshold: f32,
    pub input_size: u32,
    pub ai_class_index: usize,
    pub escalation: EscalationPolicy,
    pub suspicion_threshold: f32,
    pub boundary_timeout_secs: Option<u64>,
    pub credentials_path: Option<PathBuf>,
    pub model: ModelConfig,
    pub remote: RemoteConfig,
    pub fetch: FetchConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub path: PathBuf,
    pub input_name: Option<String>,
    pub output_name: String,
    pub use_gpu: bool,
    pub intra_threads: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub max_error_body: usize,
    pub user_agent: String,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            input_size: 224,
            ai_class_index: 0,
            escalation: EscalationPolicy::Always,
            suspicion_threshold: 0.5,
            boundary_timeout_secs: None,
            credentials_path: None,
            model: ModelConfig::default(),
            remote: RemoteConfig::default(),
            fetch: FetchConfig::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("onnx_model.onnx"),
            input_name: None,
            output_name: "logits".to_string(),
            use_gpu: false,
            intra_threads: 4,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_REMOTE_ENDPOINT.to_string(),
            model: "gpt-4o".to_string(),
            max_tokens: 10,
            temperature: 0.0,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_error_body: 500,
            user_agent: format!("ai-detector/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl DetectorConfig {
    /// `<config_dir>/ai-detector/config.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
    }

    /// Loads the file at `path`, or the default location when `path` is None.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(p) => p,
            None => return Ok(Self::default()),
        };

        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|e| {
            DetectorError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: DetectorConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.threshold > 0.5 && self.threshold <= 1.0) {
            return Err(DetectorError::config(format!(
                "threshold must be in (0.5, 1], got {}",
                self.threshold
            )));
        }
        if self.input_size == 0 || self.input_size > MAX_INPUT_SIZE {
            return Err(DetectorError::config(format!(
                "input_size must be in 1..={}, got {}",
                MAX_INPUT_SIZE, self.input_size
            )));
        }
        if self.ai_class_index >= 2 {
            return Err(DetectorError::config(format!(
                "ai_class_index must be 0 or 1, got {}",
                self.ai_class_index
            )));
        }
        if !(0.0..=1.0).contains(&self.suspicion_threshold) {
            return Err(DetectorError::config(format!(
                "suspicion_threshold must be in [0, 1], got {}",
                self.suspicion_threshold
            )));
        }
        Ok(())
    }

    pub fn boundary_timeout(&self) -> Option<Duration> {
        self.boundary_timeout_secs.map(Duration::from_secs)
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.credentials_path.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR)
                .join("credentials.json")
        })
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| DetectorError::config(e.to_string()))
    }
}
