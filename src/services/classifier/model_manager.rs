use crate::config::ModelConfig;
use crate::error::{DetectorError, Result};
use ndarray::Array4;
use ort::session::Session;
use ort::value::Value;
use std::sync::Arc;
use tokio::sync::watch;

/// Opaque `run(tensor) -> logits` service.
pub trait InferenceEngine: Send {
    fn run(&mut self, input: Array4<f32>) -> Result<Vec<f32>>;
}

pub struct OnnxEngine {
    session: Session,
    input_name: String,
    output_index: usize,
}

impl OnnxEngine {
    /// Builds an ONNX Runtime session. Blocking; call from a blocking thread.
    pub fn load(config: &ModelConfig) -> Result<Self> {
        let _ = ort::init().with_name("ai-detector").commit();

        let mut builder = Session::builder()
            .map_err(|e| DetectorError::inference(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
            .map_err(|e| DetectorError::inference(format!("Failed to set optimization level: {}", e)))?
            .with_intra_threads(config.intra_threads)
            .map_err(|e| DetectorError::inference(format!("Failed to set intra threads: {}", e)))?;

        if config.use_gpu {
            builder = builder
                .with_execution_providers([
                    ort::execution_providers::DirectMLExecutionProvider::default().build(),
                    ort::execution_providers::CoreMLExecutionProvider::default().build(),
                    ort::execution_providers::CUDAExecutionProvider::default().build(),
                    ort::execution_providers::CPUExecutionProvider::default().build(),
                ])
                .map_err(|e| DetectorError::inference(format!("Failed to register GPU execution providers: {}", e)))?;
        } else {
            builder = builder
                .with_execution_providers([ort::execution_providers::CPUExecutionProvider::default().build()])
                .map_err(|e| DetectorError::inference(format!("Failed to register CPU execution provider: {}", e)))?;
        }

        let session = builder.commit_from_file(&config.path).map_err(|e| {
            DetectorError::inference(format!(
                "Failed to load ONNX model {}: {}",
                config.path.display(),
                e
            ))
        })?;

        let input_name = match &config.input_name {
            Some(name) => name.clone(),
            None => session
                .inputs()
                .first()
                .map(|input| input.name().to_string())
                .ok_or_else(|| DetectorError::inference("Model declares no inputs"))?,
        };

        // Prefer the named output; single-output models may call it anything.
        let output_index = session
            .outputs()
            .iter()
            .position(|output| output.name() == config.output_name)
            .unwrap_or(0);

        Ok(Self {
            session,
            input_name,
            output_index,
        })
    }
}

impl InferenceEngine for OnnxEngine {
    fn run(&mut self, input: Array4<f32>) -> Result<Vec<f32>> {
        let input_tensor = Value::from_array(input)
            .map_err(|e| DetectorError::inference(format!("Failed to create tensor value: {}", e)))?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input_tensor])
            .map_err(|e| DetectorError::inference(format!("Inference failed: {}", e)))?;

        let output_value = outputs
            .values()
            .nth(self.output_index)
            .ok_or_else(|| DetectorError::inference("Model produced no outputs"))?;

        let (_, data) = output_value
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::inference(format!("Failed to extract output tensor: {}", e)))?;

        Ok(data.to_vec())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineState {
    NotLoaded,
    Loading,
    Ready,
    Failed(String),
}

impl EngineState {
    pub fn is_settled(&self) -> bool {
        matches!(self, EngineState::Ready | EngineState::Failed(_))
    }
}

pub type EngineSlot = Arc<std::sync::Mutex<Option<Box<dyn InferenceEngine>>>>;

/// Owns the single engine instance of a page context and its load state.
#[derive(Clone)]
pub struct ModelManager {
    engine: EngineSlot,
    state: Arc<watch::Sender<EngineState>>,
}

impl Default for ModelManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelManager {
    pub fn new() -> Self {
        let (state, _) = watch::channel(EngineState::NotLoaded);
        Self {
            engine: Arc::new(std::sync::Mutex::new(None)),
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == EngineState::Ready
    }

    /// Subscribes to state changes, e.g. to announce readiness.
    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    /// Marks the manager as loading. Returns false if a load already started;
    /// the engine is only ever loaded once.
    pub fn begin_load(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == EngineState::NotLoaded {
                *state = EngineState::Loading;
                true
            } else {
                false
            }
        })
    }

    /// Runs `loader` on a blocking thread and records the outcome.
    pub async fn load_with<F>(&self, loader: F) -> Result<()>
    where
        F: FnOnce() -> Result<Box<dyn InferenceEngine>> + Send + 'static,
    {
        if !self.begin_load() && self.state() != EngineState::Loading {
            return Err(DetectorError::inference("Model was already loaded"));
        }

        let result = tokio::task::spawn_blocking(loader)
            .await
            .map_err(|e| DetectorError::inference(format!("Failed to spawn model loading task: {}", e)))
            .and_then(|r| r);

        match result {
            Ok(engine) => {
                *self.lock_engine() = Some(engine);
                self.state.send_replace(EngineState::Ready);
                tracing::info!("inference engine ready");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "inference engine failed to initialize");
                self.state.send_replace(EngineState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    pub async fn load_onnx(&self, config: ModelConfig) -> Result<()> {
        self.load_with(move || {
            let engine = OnnxEngine::load(&config)?;
            Ok(Box::new(engine) as Box<dyn InferenceEngine>)
        })
        .await
    }

    /// Waits until loading has finished one way or the other.
    pub async fn wait_settled(&self) -> EngineState {
        let mut rx = self.state.subscribe();
        let settled = rx
            .wait_for(|s| s.is_settled() || *s == EngineState::NotLoaded)
            .await
            .map(|s| s.clone());
        settled.unwrap_or_else(|_| self.state())
    }

    /// Runs one tensor through the engine. Never retried.
    pub async fn infer(&self, input: Array4<f32>) -> Result<Vec<f32>> {
        match self.wait_settled().await {
            EngineState::Ready => {}
            EngineState::Failed(message) => return Err(DetectorError::EngineUnavailable { message }),
            _ => {
                return Err(DetectorError::EngineUnavailable {
                    message: "model was never loaded".to_string(),
                })
            }
        }

        let slot = self.engine.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = slot.lock().unwrap_or_else(|e| e.into_inner());
            match guard.as_mut() {
                Some(engine) => engine.run(input),
                None => Err(DetectorError::EngineUnavailable {
                    message: "model unloaded".to_string(),
                }),
            }
        })
        .await
        .map_err(|e| DetectorError::inference(format!("Inference task failed: {}", e)))?
    }

    fn lock_engine(&self) -> std::sync::MutexGuard<'_, Option<Box<dyn InferenceEngine>>> {
        self.engine.lock().unwrap_or_else(|e| e.into_inner())
    }
}
