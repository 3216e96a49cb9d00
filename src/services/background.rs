//! The privileged context: network access and the API key live here.

use crate::error::{DetectorError, Result};
use crate::models::classify_types::RemoteClassification;
use crate::models::image_types::EncodedImage;
use crate::models::message_types::{FetchImage, RemoteClassify};
use crate::services::bridge::{self, Channel};
use crate::services::fetch_gateway::FetchGateway;
use crate::services::remote_classifier::RemoteClassifier;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct BackgroundContext {
    fetch: Channel<FetchImage, EncodedImage>,
    classify: Channel<RemoteClassify, RemoteClassification>,
    servers: Vec<JoinHandle<()>>,
}

impl BackgroundContext {
    pub fn spawn(gateway: FetchGateway, classifier: RemoteClassifier, timeout: Option<Duration>) -> Self {
        let (fetch, fetch_server) = bridge::open("FETCH_IMAGE", timeout, move |req: FetchImage| {
            let gateway = gateway.clone();
            async move {
                tracing::debug!(url = %req.url, "FETCH_IMAGE received");
                gateway.fetch_encoded(&req.url).await
            }
        });

        let (classify, classify_server) = bridge::open("REMOTE_CLASSIFY", timeout, move |req: RemoteClassify| {
            let classifier = classifier.clone();
            async move {
                if req.encoded_image.is_empty() || req.mime_type.is_empty() {
                    return Err(DetectorError::decode(
                        "Missing encoded image or MIME type in REMOTE_CLASSIFY message",
                    ));
                }
                let image = EncodedImage {
                    data_url: req.encoded_image,
                    mime_type: req.mime_type,
                };
                tracing::debug!(mime = %image.mime_type, size = image.len(), "REMOTE_CLASSIFY received");
                classifier.classify_remote(&image).await
            }
        });

        Self {
            fetch,
            classify,
            servers: vec![fetch_server, classify_server],
        }
    }

    pub async fn fetch_image(&self, url: &str) -> Result<EncodedImage> {
        self.fetch
            .call(FetchImage {
                url: url.to_string(),
            })
            .await
    }

    pub async fn classify(&self, image: &EncodedImage) -> Result<RemoteClassification> {
        self.classify
            .call(RemoteClassify {
                encoded_image: image.data_url.clone(),
                mime_type: image.mime_type.clone(),
            })
            .await
    }

    pub fn in_flight(&self) -> usize {
        self.fetch.in_flight() + self.classify.in_flight()
    }

    pub fn retire_all(&self) {
        self.fetch.retire_all();
        self.classify.retire_all();
    }
}

impl Drop for BackgroundContext {
    fn drop(&mut self) {
        for server in &self.servers {
            server.abort();
        }
    }
}
