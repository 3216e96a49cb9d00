use crate::config::RemoteConfig;
use crate::error::{DetectorError, Result};
use crate::models::classify_types::{RemoteClassification, RemoteLabel};
use crate::models::image_types::EncodedImage;
use crate::services::credentials::CredentialStore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You are an AI forensic assistant. Given an image, respond with exactly one word: \"AI\" or \"Human\". Do not include any other text, explanation, or punctuation.";
const USER_PROMPT: &str = "Please classify this image.";

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: serde_json::Value,
}

/// Asks a remote vision model for a one-word AI/Human verdict.
#[derive(Clone)]
pub struct RemoteClassifier {
    client: reqwest::Client,
    config: RemoteConfig,
    credentials: Arc<dyn CredentialStore>,
}

impl RemoteClassifier {
    pub fn new(config: RemoteConfig, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            credentials,
        }
    }

    pub async fn classify_remote(&self, image: &EncodedImage) -> Result<RemoteClassification> {
        let key = self
            .credentials
            .get_credential()
            .map_err(|e| DetectorError::Auth {
                message: format!("Could not read API key: {}", e),
            })?
            .filter(|k| k.is_usable())
            .ok_or_else(|| DetectorError::Auth {
                message: "API key not set or is a placeholder".to_string(),
            })?;

        if image.is_empty() || image.mime_type.is_empty() {
            return Err(DetectorError::decode("Missing image data or MIME type"));
        }

        let body = ChatRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            messages: json!([
                { "role": "system", "content": SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": USER_PROMPT },
                        { "type": "image_url", "image_url": { "url": image.data_url } }
                    ]
                }
            ]),
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| DetectorError::RemoteHttp {
                status: None,
                detail: format!("Request failed: {}", e.without_url()),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = error_detail(status, &text);
            tracing::warn!(status = status.as_u16(), %detail, "remote classifier rejected request");
            return Err(DetectorError::RemoteHttp {
                status: Some(status.as_u16()),
                detail,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| DetectorError::protocol(format!("Failed to read response: {}", e)))?;
        let parsed: ChatResponse = serde_json::from_str(&text)?;
        let raw_text = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| DetectorError::protocol("Response contained no choices"))?
            .message
            .content
            .unwrap_or_default();

        let label = normalize_label(&raw_text);
        tracing::debug!(answer = %raw_text.trim(), ?label, "remote classifier answered");
        Ok(RemoteClassification {
            label,
            raw_text: raw_text.trim().to_string(),
        })
    }
}

/// `ai` only for an exact (cleaned) "ai" answer; anything else counts as human.
pub fn normalize_label(text: &str) -> RemoteLabel {
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| !matches!(c, '.' | ',' | '!' | '"' | '\'' | '`'))
        .collect::<String>()
        .to_lowercase();
    if cleaned == "ai" {
        RemoteLabel::Ai
    } else {
        RemoteLabel::Human
    }
}

fn error_detail(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(json) => match json.pointer("/error/message").and_then(|m| m.as_str()) {
            Some(message) => format!("{} {}", status.as_u16(), message),
            None => format!("{} {}", status.as_u16(), json),
        },
        Err(_) => format!(
            "{} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown")
        ),
    }
}
