//! Binds one hover-triggered analysis to its element across every stage:
//! fetch, preprocess, local inference and remote escalation.

use crate::config::DetectorConfig;
use crate::error::{DetectorError, Result};
use crate::models::classify_types::{LocalClassification, LocalLabel, Verdict};
use crate::models::element_types::{Badge, ElementState, Stage, VisualElement};
use crate::models::image_types::EncodedImage;
use crate::services::background::BackgroundContext;
use crate::services::badges::BadgeRenderer;
use crate::services::classifier::inference::{ai_probability, classify_probability, should_escalate};
use crate::services::classifier::model_manager::InferenceEngine;
use crate::services::classifier::preprocess::{decode_raster, preprocess, to_payload};
use crate::services::credentials::CredentialStore;
use crate::services::fetch_gateway::FetchGateway;
use crate::services::page_context::PageContext;
use crate::services::remote_classifier::RemoteClassifier;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// One in-flight analysis. Lives in the tracker from trigger to terminal state.
struct AnalysisRequest {
    element: VisualElement,
    indicator: Badge,
    encoded: Option<EncodedImage>,
}

type StageResult<T> = std::result::Result<T, (Stage, DetectorError)>;

pub struct Orchestrator {
    config: DetectorConfig,
    elements: Mutex<HashMap<String, ElementState>>,
    tracker: Mutex<HashMap<Uuid, AnalysisRequest>>,
    background: BackgroundContext,
    page: PageContext,
    badges: Arc<dyn BadgeRenderer>,
}

impl Orchestrator {
    pub fn new(
        config: DetectorConfig,
        background: BackgroundContext,
        page: PageContext,
        badges: Arc<dyn BadgeRenderer>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            elements: Mutex::new(HashMap::new()),
            tracker: Mutex::new(HashMap::new()),
            background,
            page,
            badges,
        })
    }

    /// Spawns the background and page contexts with the ONNX engine from
    /// `config.model` and wires them to a new orchestrator.
    pub fn start(
        config: DetectorConfig,
        credentials: Arc<dyn CredentialStore>,
        badges: Arc<dyn BadgeRenderer>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let page = PageContext::spawn_onnx(config.model.clone(), config.boundary_timeout());
        Self::start_with_page(config, credentials, badges, page)
    }

    /// Same as [`Orchestrator::start`] with a caller-supplied engine loader.
    pub fn start_with_engine<F>(
        config: DetectorConfig,
        credentials: Arc<dyn CredentialStore>,
        badges: Arc<dyn BadgeRenderer>,
        loader: F,
    ) -> Result<Arc<Self>>
    where
        F: FnOnce() -> Result<Box<dyn InferenceEngine>> + Send + 'static,
    {
        config.validate()?;
        let page = PageContext::spawn(loader, config.boundary_timeout());
        Self::start_with_page(config, credentials, badges, page)
    }

    fn start_with_page(
        config: DetectorConfig,
        credentials: Arc<dyn CredentialStore>,
        badges: Arc<dyn BadgeRenderer>,
        page: PageContext,
    ) -> Result<Arc<Self>> {
        let gateway = FetchGateway::new(&config.fetch)?;
        let classifier = RemoteClassifier::new(config.remote.clone(), credentials);
        let background = BackgroundContext::spawn(gateway, classifier, config.boundary_timeout());
        Ok(Self::new(config, background, page, badges))
    }

    /// Handles a hover on `element`. Returns the running analysis, or `None`
    /// when the element has already been (or is being) analyzed.
    pub fn on_hover(self: &Arc<Self>, element: VisualElement) -> Option<JoinHandle<ElementState>> {
        let id = self.begin(&element)?;
        let this = self.clone();
        Some(tokio::spawn(async move { this.run(id, element).await }))
    }

    pub fn element_state(&self, url: &str) -> ElementState {
        self.elements_lock()
            .get(url)
            .copied()
            .unwrap_or(ElementState::Unchecked)
    }

    pub fn pending_requests(&self) -> usize {
        self.tracker_lock().len()
    }

    pub fn page(&self) -> &PageContext {
        &self.page
    }

    /// Page teardown: retires every tracked request and outstanding call.
    /// Chains still running finish as `Failed` without touching badges.
    pub fn unload(&self) {
        let retired = {
            let mut tracker = self.tracker_lock();
            let n = tracker.len();
            tracker.clear();
            n
        };
        self.background.retire_all();
        self.page.retire_all();
        tracing::info!(retired, "pipeline unloaded");
    }

    fn begin(&self, element: &VisualElement) -> Option<Uuid> {
        let url = element.source_url().to_string();
        {
            let mut elements = self.elements_lock();
            let current = elements.get(&url).copied().unwrap_or(ElementState::Unchecked);
            match current.transition(ElementState::Pending(Stage::Fetch)) {
                Ok(next) => {
                    elements.insert(url.clone(), next);
                }
                Err(_) => {
                    tracing::trace!(url, state = ?current, "trigger ignored");
                    return None;
                }
            }
        }

        let id = Uuid::new_v4();
        let indicator = Badge::in_progress();
        self.badges.show(element, indicator.clone());
        self.tracker_lock().insert(
            id,
            AnalysisRequest {
                element: element.clone(),
                indicator,
                encoded: None,
            },
        );
        tracing::debug!(url, request_id = %id, "analysis started");
        Some(id)
    }

    async fn run(&self, id: Uuid, element: VisualElement) -> ElementState {
        let url = element.source_url().to_string();
        let outcome = self.run_stages(id, &url).await;

        // Whatever happened, the request is retired and the element settles.
        let retired = self.tracker_lock().remove(&id);
        let Some(request) = retired else {
            tracing::debug!(url, request_id = %id, "request retired elsewhere, discarding result");
            return self.settle_stale(&url);
        };

        match outcome {
            Ok(verdict) => {
                tracing::info!(url, request_id = %id, ?verdict, "analysis complete");
                self.badges.show(&request.element, Badge::verdict(verdict));
                self.settle(&url, ElementState::Done(verdict))
            }
            Err((stage, error)) => {
                tracing::warn!(url, request_id = %id, %stage, %error, "analysis failed");
                self.badges.show(&request.element, Badge::failure(stage));
                self.settle(&url, ElementState::Failed(stage))
            }
        }
    }

    async fn run_stages(&self, id: Uuid, url: &str) -> StageResult<Verdict> {
        let encoded = self
            .background
            .fetch_image(url)
            .await
            .map_err(|e| (Stage::Fetch, e))?;

        self.advance(url, Stage::Preprocess);
        let size = self.config.input_size;
        let (encoded, tensor) = tokio::task::spawn_blocking(move || {
            let tensor = decode_raster(&encoded).and_then(|raster| preprocess(&raster, size));
            (encoded, tensor)
        })
        .await
        .map_err(|e| (Stage::Preprocess, DetectorError::decode(format!("Preprocessing task failed: {}", e))))?;
        let tensor = tensor.map_err(|e| (Stage::Preprocess, e))?;

        if !self.attach_payload(id, encoded) {
            return Err((Stage::Preprocess, retired(id)));
        }

        self.advance(url, Stage::Inference);
        let logits = self
            .page
            .analyze(id, to_payload(&tensor))
            .await
            .map_err(|e| (Stage::Inference, e))?;

        // Correlate the reply with its tracked request; the payload is reused,
        // never re-fetched.
        let encoded = self
            .take_payload(id)
            .ok_or_else(|| (Stage::Inference, retired(id)))?;

        let p_ai = ai_probability(&logits, self.config.ai_class_index).map_err(|e| (Stage::Inference, e))?;
        let local = classify_probability(p_ai, self.config.threshold);
        tracing::info!(url, request_id = %id, label = ?local.label, confidence = p_ai, "local inference");

        if !should_escalate(self.config.escalation, &local, self.config.suspicion_threshold) {
            if let Some(verdict) = local_verdict(&local) {
                return Ok(verdict);
            }
        }

        self.advance(url, Stage::Remote);
        let remote = self
            .background
            .classify(&encoded)
            .await
            .map_err(|e| (Stage::Remote, e))?;
        tracing::debug!(url, request_id = %id, answer = %remote.raw_text, "remote verdict");
        Ok(remote.label.into())
    }

    fn advance(&self, url: &str, stage: Stage) {
        let mut elements = self.elements_lock();
        let current = elements.get(url).copied().unwrap_or(ElementState::Unchecked);
        match current.transition(ElementState::Pending(stage)) {
            Ok(next) => {
                elements.insert(url.to_string(), next);
            }
            Err(e) => tracing::warn!(url, error = %e, "unexpected stage order"),
        }
    }

    fn settle(&self, url: &str, next: ElementState) -> ElementState {
        let mut elements = self.elements_lock();
        let current = elements.get(url).copied().unwrap_or(ElementState::Unchecked);
        match current.transition(next) {
            Ok(state) => {
                elements.insert(url.to_string(), state);
                state
            }
            Err(e) => {
                tracing::warn!(url, error = %e, "element already settled");
                current
            }
        }
    }

    /// A retired chain must not leave its element pending.
    fn settle_stale(&self, url: &str) -> ElementState {
        let current = self.element_state(url);
        match current {
            ElementState::Pending(stage) => self.settle(url, ElementState::Failed(stage)),
            other => other,
        }
    }

    fn attach_payload(&self, id: Uuid, encoded: EncodedImage) -> bool {
        match self.tracker_lock().get_mut(&id) {
            Some(request) => {
                request.encoded = Some(encoded);
                true
            }
            None => false,
        }
    }

    fn take_payload(&self, id: Uuid) -> Option<EncodedImage> {
        let mut tracker = self.tracker_lock();
        let request = tracker.get_mut(&id)?;
        tracing::trace!(request_id = %id, badge = %request.indicator.text, "inference reply matched");
        request.encoded.take()
    }

    fn elements_lock(&self) -> MutexGuard<'_, HashMap<String, ElementState>> {
        self.elements.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn tracker_lock(&self) -> MutexGuard<'_, HashMap<Uuid, AnalysisRequest>> {
        self.tracker.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn local_verdict(local: &LocalClassification) -> Option<Verdict> {
    match local.label {
        LocalLabel::Ai => Some(Verdict::Ai),
        LocalLabel::Human => Some(Verdict::Human),
        LocalLabel::Uncertain => None,
    }
}

fn retired(id: Uuid) -> DetectorError {
    DetectorError::ChannelClosed {
        message: format!("request {} was retired", id),
    }
}
