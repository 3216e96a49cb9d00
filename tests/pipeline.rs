use ai_detector_lib::config::{DetectorConfig, EscalationPolicy, RemoteConfig};
use ai_detector_lib::error::{DetectorError, Result};
use ai_detector_lib::models::classify_types::Verdict;
use ai_detector_lib::models::element_types::{Badge, BadgeColor, ElementState, Stage, VisualElement};
use ai_detector_lib::services::badges::BadgeBoard;
use ai_detector_lib::services::classifier::model_manager::InferenceEngine;
use ai_detector_lib::services::credentials::{CredentialStore, MemoryCredentialStore};
use ai_detector_lib::services::orchestrator::Orchestrator;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use mockito::{Matcher, Mock, Server, ServerGuard};
use ndarray::Array4;
use serde_json::json;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const REMOTE_PATH: &str = "/v1/chat/completions";

#[derive(Clone, Default)]
struct EngineTally {
    calls: Arc<AtomicUsize>,
    shapes: Arc<Mutex<Vec<Vec<usize>>>>,
}

impl EngineTally {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

struct ScriptedEngine {
    logits: Vec<f32>,
    delay: Duration,
    tally: EngineTally,
}

impl InferenceEngine for ScriptedEngine {
    fn run(&mut self, input: Array4<f32>) -> Result<Vec<f32>> {
        self.tally.calls.fetch_add(1, Ordering::SeqCst);
        self.tally.shapes.lock().unwrap().push(input.shape().to_vec());
        std::thread::sleep(self.delay);
        Ok(self.logits.clone())
    }
}

struct Harness {
    server: ServerGuard,
    board: Arc<BadgeBoard>,
    tally: EngineTally,
    orchestrator: Arc<Orchestrator>,
}

impl Harness {
    async fn new(logits: Vec<f32>, key: Option<&str>) -> Self {
        Self::build(logits, key, DetectorConfig::default(), Duration::ZERO, true).await
    }

    async fn build(
        logits: Vec<f32>,
        key: Option<&str>,
        mut config: DetectorConfig,
        delay: Duration,
        engine_loads: bool,
    ) -> Self {
        let server = Server::new_async().await;
        config.remote = RemoteConfig {
            endpoint: format!("{}{}", server.url(), REMOTE_PATH),
            ..RemoteConfig::default()
        };

        let board = Arc::new(BadgeBoard::new());
        let tally = EngineTally::default();
        let credentials: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new(key));
        let engine_tally = tally.clone();
        let orchestrator = Orchestrator::start_with_engine(config, credentials, board.clone(), move || {
            if !engine_loads {
                return Err(DetectorError::inference("onnx_model.onnx not found"));
            }
            Ok(Box::new(ScriptedEngine {
                logits,
                delay,
                tally: engine_tally,
            }) as Box<dyn InferenceEngine>)
        })
        .unwrap();

        Self {
            server,
            board,
            tally,
            orchestrator,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.server.url(), path)
    }

    async fn serve_png(&mut self, path: &str) -> Mock {
        self.server
            .mock("GET", path)
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body(png_bytes())
            .expect(1)
            .create_async()
            .await
    }

    async fn remote_answers(&mut self, content: &str) -> Mock {
        self.server
            .mock("POST", REMOTE_PATH)
            .match_body(Matcher::Regex("data:image/png;base64,".to_string()))
            .with_status(200)
            .with_body(json!({ "choices": [ { "message": { "content": content } } ] }).to_string())
            .create_async()
            .await
    }

    async fn remote_never_called(&mut self) -> Mock {
        self.server
            .mock("POST", REMOTE_PATH)
            .expect(0)
            .create_async()
            .await
    }

    async fn hover(&self, path: &str) -> ElementState {
        self.orchestrator
            .on_hover(VisualElement::new(self.url(path)))
            .expect("hover should start an analysis")
            .await
            .unwrap()
    }
}

fn png_bytes() -> Vec<u8> {
    let img = RgbImage::from_fn(64, 48, |x, y| Rgb([(x * 4) as u8, (y * 5) as u8, 128]));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

#[tokio::test]
async fn hover_on_png_ends_with_remote_ai_badge() {
    let mut h = Harness::new(vec![2.0, 0.5], Some("sk-test")).await;
    let image = h.serve_png("/photo.png").await;
    let remote = h.remote_answers("AI").await;

    let state = h.hover("/photo.png").await;

    assert_eq!(state, ElementState::Done(Verdict::Ai));
    let badge = h.board.badge(&h.url("/photo.png")).unwrap();
    assert_eq!(badge.text, "AI");
    assert_eq!(badge.color, BadgeColor::Warning);
    assert_eq!(h.tally.calls(), 1);
    assert_eq!(h.tally.shapes.lock().unwrap()[0], vec![1, 3, 224, 224]);
    assert_eq!(h.orchestrator.pending_requests(), 0);
    image.assert_async().await;
    remote.assert_async().await;
}

#[tokio::test]
async fn remote_answer_overrides_local_verdict() {
    let mut h = Harness::new(vec![2.0, 0.5], Some("sk-test")).await;
    h.serve_png("/photo.png").await;
    h.remote_answers("I think it's human").await;

    let state = h.hover("/photo.png").await;

    assert_eq!(state, ElementState::Done(Verdict::Human));
    assert_eq!(
        h.board.badge(&h.url("/photo.png")),
        Some(Badge::verdict(Verdict::Human))
    );
}

#[tokio::test]
async fn repeated_hover_while_pending_is_ignored() {
    let config = DetectorConfig {
        escalation: EscalationPolicy::Always,
        ..DetectorConfig::default()
    };
    let mut h = Harness::build(vec![2.0, 0.5], Some("sk-test"), config, Duration::from_millis(100), true).await;
    let image = h.serve_png("/photo.png").await;
    h.remote_answers("AI").await;

    let url = h.url("/photo.png");
    let first = h.orchestrator.on_hover(VisualElement::new(url.clone())).unwrap();
    assert!(h.orchestrator.element_state(&url).is_pending());

    for _ in 0..5 {
        assert!(h.orchestrator.on_hover(VisualElement::new(url.clone())).is_none());
    }
    assert_eq!(h.orchestrator.pending_requests(), 1);

    assert_eq!(first.await.unwrap(), ElementState::Done(Verdict::Ai));
    assert_eq!(h.tally.calls(), 1);
    image.assert_async().await;

    // Settled elements are not analyzed again either.
    assert!(h.orchestrator.on_hover(VisualElement::new(url)).is_none());
}

#[tokio::test]
async fn fetch_404_fails_before_any_inference() {
    let mut h = Harness::new(vec![2.0, 0.5], Some("sk-test")).await;
    h.server
        .mock("GET", "/gone.png")
        .with_status(404)
        .with_body("not here")
        .create_async()
        .await;
    let remote = h.remote_never_called().await;

    let state = h.hover("/gone.png").await;

    assert_eq!(state, ElementState::Failed(Stage::Fetch));
    assert_eq!(h.board.badge(&h.url("/gone.png")), Some(Badge::failure(Stage::Fetch)));
    assert_eq!(h.tally.calls(), 0);
    assert_eq!(h.orchestrator.pending_requests(), 0);
    remote.assert_async().await;
}

#[tokio::test]
async fn undecodable_image_fails_in_preprocessing() {
    let mut h = Harness::new(vec![2.0, 0.5], Some("sk-test")).await;
    h.server
        .mock("GET", "/broken.png")
        .with_status(200)
        .with_header("content-type", "image/png")
        .with_body("this is not a png")
        .create_async()
        .await;
    h.remote_never_called().await;

    let state = h.hover("/broken.png").await;

    assert_eq!(state, ElementState::Failed(Stage::Preprocess));
    assert_eq!(h.board.badge(&h.url("/broken.png")).unwrap().text, "N/A");
    assert_eq!(h.tally.calls(), 0);
}

#[tokio::test]
async fn missing_credential_fails_remote_stage_without_request() {
    let mut h = Harness::new(vec![2.0, 0.5], None).await;
    h.serve_png("/photo.png").await;
    let remote = h.remote_never_called().await;

    let state = h.hover("/photo.png").await;

    assert_eq!(state, ElementState::Failed(Stage::Remote));
    assert_eq!(h.board.badge(&h.url("/photo.png")), Some(Badge::failure(Stage::Remote)));
    assert_eq!(h.tally.calls(), 1);
    remote.assert_async().await;
}

#[tokio::test]
async fn remote_http_error_shows_remote_error_badge() {
    let mut h = Harness::new(vec![2.0, 0.5], Some("sk-test")).await;
    h.serve_png("/photo.png").await;
    h.server
        .mock("POST", REMOTE_PATH)
        .with_status(429)
        .with_body(json!({ "error": { "message": "Rate limit reached" } }).to_string())
        .create_async()
        .await;

    let state = h.hover("/photo.png").await;

    assert_eq!(state, ElementState::Failed(Stage::Remote));
    assert_eq!(h.board.badge(&h.url("/photo.png")).unwrap().text, "AI Err");
    assert_eq!(h.orchestrator.pending_requests(), 0);
}

#[tokio::test]
async fn engine_that_failed_to_load_reports_model_error() {
    let mut h = Harness::build(vec![], Some("sk-test"), DetectorConfig::default(), Duration::ZERO, false).await;
    h.serve_png("/photo.png").await;
    let remote = h.remote_never_called().await;

    let state = h.hover("/photo.png").await;

    assert_eq!(state, ElementState::Failed(Stage::Inference));
    assert_eq!(h.board.badge(&h.url("/photo.png")).unwrap().text, "Model Err");
    remote.assert_async().await;
}

#[tokio::test]
async fn suspicious_policy_keeps_confident_human_local() {
    let mut config = DetectorConfig::default();
    config.escalation = EscalationPolicy::Suspicious;
    let mut h = Harness::build(vec![-1.0, 2.0], Some("sk-test"), config, Duration::ZERO, true).await;
    h.serve_png("/photo.png").await;
    let remote = h.remote_never_called().await;

    let state = h.hover("/photo.png").await;

    assert_eq!(state, ElementState::Done(Verdict::Human));
    assert_eq!(
        h.board.badge(&h.url("/photo.png")),
        Some(Badge::verdict(Verdict::Human))
    );
    remote.assert_async().await;
}

#[tokio::test]
async fn suspicious_policy_escalates_uncertain_images() {
    let mut config = DetectorConfig::default();
    config.escalation = EscalationPolicy::Suspicious;
    let mut h = Harness::build(vec![0.1, 0.0], Some("sk-test"), config, Duration::ZERO, true).await;
    h.serve_png("/photo.png").await;
    let remote = h.remote_answers("Human").await;

    assert_eq!(h.hover("/photo.png").await, ElementState::Done(Verdict::Human));
    remote.assert_async().await;
}

#[tokio::test]
async fn failures_do_not_leak_into_other_elements() {
    let mut h = Harness::new(vec![2.0, 0.5], Some("sk-test")).await;
    h.serve_png("/good.png").await;
    h.server
        .mock("GET", "/bad.png")
        .with_status(500)
        .create_async()
        .await;
    h.remote_answers("AI").await;

    let good = h.orchestrator.on_hover(VisualElement::new(h.url("/good.png"))).unwrap();
    let bad = h.orchestrator.on_hover(VisualElement::new(h.url("/bad.png"))).unwrap();

    assert_eq!(bad.await.unwrap(), ElementState::Failed(Stage::Fetch));
    assert_eq!(good.await.unwrap(), ElementState::Done(Verdict::Ai));
    assert_eq!(h.orchestrator.pending_requests(), 0);
}

#[tokio::test]
async fn unload_never_leaves_an_element_pending() {
    let mut h = Harness::build(
        vec![2.0, 0.5],
        Some("sk-test"),
        DetectorConfig::default(),
        Duration::from_millis(300),
        true,
    )
    .await;
    h.serve_png("/photo.png").await;
    let remote = h.remote_never_called().await;

    let url = h.url("/photo.png");
    let chain = h.orchestrator.on_hover(VisualElement::new(url.clone())).unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.orchestrator.element_state(&url) != ElementState::Pending(Stage::Inference) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("analysis should reach inference");

    h.orchestrator.unload();
    assert_eq!(h.orchestrator.pending_requests(), 0);

    assert_eq!(chain.await.unwrap(), ElementState::Failed(Stage::Inference));
    // The stale chain never repaints the element.
    assert_eq!(h.board.badge(&url), Some(Badge::in_progress()));
    remote.assert_async().await;
}

#[tokio::test]
async fn non_finite_logits_fail_inference_instead_of_hanging() {
    let mut h = Harness::new(vec![f32::NAN, 1.0], Some("sk-test")).await;
    h.serve_png("/photo.png").await;
    let remote = h.remote_never_called().await;

    let state = tokio::time::timeout(Duration::from_secs(5), h.hover("/photo.png"))
        .await
        .expect("analysis should settle");

    assert_eq!(state, ElementState::Failed(Stage::Inference));
    assert_eq!(h.board.badge(&h.url("/photo.png")), Some(Badge::failure(Stage::Inference)));
    assert_eq!(h.orchestrator.pending_requests(), 0);
    remote.assert_async().await;
}
