use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DetectorError>;

/// Failure taxonomy shared by every pipeline stage.
///
/// Errors are serializable so a failure raised inside one context can be sent
/// back across the message boundary and re-raised unchanged by the caller.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectorError {
    /// Image bytes could not be converted, decoded or drawn.
    #[error("decode error: {message}")]
    Decode { message: String },

    /// The privileged fetch failed. `status` is absent for transport failures.
    #[error("fetch error{}: {detail}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Fetch { status: Option<u16>, detail: String },

    #[error("inference engine unavailable: {message}")]
    EngineUnavailable { message: String },

    #[error("inference error: {message}")]
    Inference { message: String },

    /// No usable credential is configured for the remote classifier.
    #[error("auth error: {message}")]
    Auth { message: String },

    /// Non-success reply from the remote endpoint, or no reply at all.
    #[error("remote classifier HTTP error{}: {detail}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    RemoteHttp { status: Option<u16>, detail: String },

    #[error("remote classifier protocol error: {message}")]
    RemoteProtocol { message: String },

    #[error("boundary channel closed: {message}")]
    ChannelClosed { message: String },

    #[error("no reply within {seconds}s for {channel}")]
    BoundaryTimeout { channel: String, seconds: u64 },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("credential store error: {message}")]
    Credential { message: String },

    #[error("io error: {message}")]
    Io { message: String },
}

impl DetectorError {
    pub fn decode(message: impl Into<String>) -> Self {
        DetectorError::Decode {
            message: message.into(),
        }
    }

    pub fn inference(message: impl Into<String>) -> Self {
        DetectorError::Inference {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        DetectorError::RemoteProtocol {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        DetectorError::Config {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for DetectorError {
    fn from(err: std::io::Error) -> Self {
        DetectorError::Io {
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for DetectorError {
    fn from(err: toml::de::Error) -> Self {
        DetectorError::Config {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for DetectorError {
    fn from(err: serde_json::Error) -> Self {
        DetectorError::RemoteProtocol {
            message: format!("Invalid JSON: {}", err),
        }
    }
}

impl From<image::ImageError> for DetectorError {
    fn from(err: image::ImageError) -> Self {
        DetectorError::Decode {
            message: err.to_string(),
        }
    }
}

impl From<ort::Error> for DetectorError {
    fn from(err: ort::Error) -> Self {
        DetectorError::Inference {
            message: err.to_string(),
        }
    }
}
