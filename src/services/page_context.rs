//! The page context: owns the inference engine and answers `ANALYZE`.

use crate::config::ModelConfig;
use crate::error::{DetectorError, Result};
use crate::models::classify_types::Logits;
use crate::models::image_types::TensorPayload;
use crate::models::message_types::Analyze;
use crate::services::bridge::{self, Channel};
use crate::services::classifier::model_manager::{EngineState, InferenceEngine, ModelManager, OnnxEngine};
use crate::services::classifier::preprocess::from_payload;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub struct PageContext {
    analyze: Channel<Analyze, Logits>,
    engine_state: watch::Receiver<EngineState>,
    tasks: Vec<JoinHandle<()>>,
}

impl PageContext {
    /// Starts the context and begins loading the engine in the background.
    /// Requests that arrive while loading wait for it to finish.
    pub fn spawn<F>(loader: F, timeout: Option<Duration>) -> Self
    where
        F: FnOnce() -> Result<Box<dyn InferenceEngine>> + Send + 'static,
    {
        let models = ModelManager::new();
        let engine_state = models.subscribe();
        models.begin_load();

        let loading = models.clone();
        let load_task = tokio::spawn(async move {
            // Outcome is published through the engine state.
            let _ = loading.load_with(loader).await;
        });

        let (analyze, server) = bridge::open("ANALYZE", timeout, move |req: Analyze| {
            let models = models.clone();
            async move {
                let tensor = from_payload(req.tensor_payload)?;
                let logits = models.infer(tensor).await?;
                if logits.iter().any(|v| !v.is_finite()) {
                    return Err(DetectorError::inference(format!("Model produced non-finite logits: {:?}", logits)));
                }
                Ok::<_, DetectorError>(Logits { logits })
            }
        });

        Self {
            analyze,
            engine_state,
            tasks: vec![load_task, server],
        }
    }

    pub fn spawn_onnx(config: ModelConfig, timeout: Option<Duration>) -> Self {
        Self::spawn(
            move || {
                tracing::info!(model = %config.path.display(), "loading ONNX model");
                let engine = OnnxEngine::load(&config)?;
                Ok(Box::new(engine) as Box<dyn InferenceEngine>)
            },
            timeout,
        )
    }

    /// Posts `ANALYZE` under the analysis request's own id.
    pub async fn analyze(&self, id: Uuid, tensor_payload: TensorPayload) -> Result<Vec<f32>> {
        let reply = self.analyze.call_with_id(id, Analyze { tensor_payload }).await?;
        Ok(reply.logits)
    }

    pub fn engine_state(&self) -> EngineState {
        self.engine_state.borrow().clone()
    }

    /// Resolves once the engine is ready or has failed.
    pub async fn wait_ready(&self) -> EngineState {
        let mut rx = self.engine_state.clone();
        let settled = rx.wait_for(|s| s.is_settled()).await.map(|s| s.clone());
        settled.unwrap_or_else(|_| self.engine_state())
    }

    pub fn in_flight(&self) -> usize {
        self.analyze.in_flight()
    }

    pub fn retire_all(&self) {
        self.analyze.retire_all();
    }
}

impl Drop for PageContext {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
