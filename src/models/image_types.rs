use crate::error::{DetectorError, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Self-contained image produced by the fetch gateway: a base64 data URI plus
/// its MIME type. Safe to move across a context boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedImage {
    pub data_url: String,
    pub mime_type: String,
}

impl EncodedImage {
    pub fn from_bytes(bytes: &[u8], mime_type: &str) -> Result<Self> {
        if bytes.is_empty() {
            return Err(DetectorError::decode("Response body is empty"));
        }
        let payload = base64::engine::general_purpose::STANDARD.encode(bytes);
        Ok(Self {
            data_url: format!("data:{};base64,{}", mime_type, payload),
            mime_type: mime_type.to_string(),
        })
    }

    /// Parses `data:<mime>[;params];base64,<payload>`, keeping only the bare MIME type.
    pub fn parse(data_url: &str) -> Result<Self> {
        let (header, _) = split_data_url(data_url)?;
        let mime_type = header
            .split(';')
            .next()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| DetectorError::decode("Could not extract MIME type from data URL header"))?;
        Ok(Self {
            data_url: data_url.to_string(),
            mime_type: mime_type.to_string(),
        })
    }

    pub fn decode_bytes(&self) -> Result<Vec<u8>> {
        let (_, payload) = split_data_url(&self.data_url)?;
        base64::engine::general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| DetectorError::decode(format!("Failed to decode base64 payload: {}", e)))
    }

    pub fn len(&self) -> usize {
        self.data_url.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data_url.is_empty()
    }
}

fn split_data_url(data_url: &str) -> Result<(&str, &str)> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or_else(|| DetectorError::decode("Not a data URL"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| DetectorError::decode("Data URL has no payload"))?;
    let header = header
        .strip_suffix(";base64")
        .ok_or_else(|| DetectorError::decode("Data URL is not base64 encoded"))?;
    Ok((header, payload))
}

/// Planar tensor data as it travels to the page context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TensorPayload {
    pub data: Vec<f32>,
    pub width: u32,
}
