use crate::config::FetchConfig;
use crate::error::{DetectorError, Result};
use crate::models::image_types::EncodedImage;
use reqwest::header::CONTENT_TYPE;

const FALLBACK_MIME: &str = "application/octet-stream";

/// Fetches image bytes on behalf of contexts without network privileges and
/// hands back a self-contained data URI. The response body never leaves here.
#[derive(Clone)]
pub struct FetchGateway {
    client: reqwest::Client,
    max_error_body: usize,
}

impl FetchGateway {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| DetectorError::config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            max_error_body: config.max_error_body,
        })
    }

    pub async fn fetch_encoded(&self, url: &str) -> Result<EncodedImage> {
        let response = self.client.get(url).send().await.map_err(|e| DetectorError::Fetch {
            status: None,
            detail: format!("Request for {} failed: {}", url, e),
        })?;

        let status = response.status();
        if !status.is_success() {
            let summary = format!(
                "HTTP error {} ({}) while fetching {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown"),
                url
            );
            // Body is diagnostic only; failing to read it keeps the summary.
            let detail = match read_bounded(response, self.max_error_body).await {
                Ok(body) => format!("{}. Body: {}...", summary, body),
                Err(_) => summary,
            };
            tracing::warn!(url, status = status.as_u16(), "image fetch rejected");
            return Err(DetectorError::Fetch {
                status: Some(status.as_u16()),
                detail,
            });
        }

        let declared = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(bare_mime);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| DetectorError::decode(format!("Failed to read body of {}: {}", url, e)))?;

        let mime_type = match declared {
            Some(mime) if mime.starts_with("image/") => mime,
            _ => sniff_mime(&bytes),
        };

        let encoded = EncodedImage::from_bytes(&bytes, &mime_type)?;
        tracing::debug!(url, mime = %mime_type, size = bytes.len(), "image fetched");
        Ok(encoded)
    }
}

/// Reads at most `max_chars` characters of a body, chunk by chunk.
async fn read_bounded(mut response: reqwest::Response, max_chars: usize) -> reqwest::Result<String> {
    // A char is at most four bytes in UTF-8.
    let byte_limit = max_chars.saturating_mul(4);
    let mut buf = Vec::new();
    while buf.len() < byte_limit {
        match response.chunk().await? {
            Some(chunk) => buf.extend_from_slice(&chunk),
            None => break,
        }
    }
    buf.truncate(byte_limit);
    Ok(String::from_utf8_lossy(&buf).chars().take(max_chars).collect())
}

/// `type/subtype` from a Content-Type header, or `None` when what is left
/// after dropping parameters is not a single clean token pair.
fn bare_mime(content_type: &str) -> Option<String> {
    let essence = content_type.split(';').next()?.trim();
    let (kind, subtype) = essence.split_once('/')?;
    let is_token = |part: &str| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "!#$&^_.+-".contains(c))
    };
    if is_token(kind) && is_token(subtype) {
        Some(essence.to_ascii_lowercase())
    } else {
        None
    }
}

fn sniff_mime(bytes: &[u8]) -> String {
    image::guess_format(bytes)
        .map(|format| format.to_mime_type().to_string())
        .unwrap_or_else(|_| FALLBACK_MIME.to_string())
}
