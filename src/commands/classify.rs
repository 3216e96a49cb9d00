use crate::config::DetectorConfig;
use crate::error::Result;
use crate::models::element_types::{Badge, ElementState, VisualElement};
use crate::services::badges::BadgeBoard;
use crate::services::classifier::model_manager::EngineState;
use crate::services::credentials::CredentialStore;
use crate::services::orchestrator::Orchestrator;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct ElementReport {
    pub url: String,
    pub state: ElementState,
    pub badge: Option<Badge>,
}

/// Simulates a hover on each URL, in order, and waits for every analysis to
/// settle. Repeated URLs are hovers on an element already being analyzed.
pub async fn classify_urls(
    config: DetectorConfig,
    credentials: Arc<dyn CredentialStore>,
    urls: Vec<String>,
) -> Result<Vec<ElementReport>> {
    let board = Arc::new(BadgeBoard::new());
    let orchestrator = Orchestrator::start(config, credentials, board.clone())?;

    if let EngineState::Failed(message) = orchestrator.page().wait_ready().await {
        tracing::warn!(%message, "local model unavailable; analyses will report a model error");
    }

    let handles: Vec<_> = urls
        .iter()
        .filter_map(|url| orchestrator.on_hover(VisualElement::new(url.clone())))
        .collect();
    for outcome in futures::future::join_all(handles).await {
        if let Err(e) = outcome {
            tracing::error!(error = %e, "analysis task panicked");
        }
    }

    let mut seen = std::collections::HashSet::new();
    let reports = urls
        .into_iter()
        .filter(|url| seen.insert(url.clone()))
        .map(|url| ElementReport {
            state: orchestrator.element_state(&url),
            badge: board.badge(&url),
            url,
        })
        .collect();

    orchestrator.unload();
    Ok(reports)
}

pub fn print_reports(reports: &[ElementReport]) {
    for report in reports {
        let (text, color) = match &report.badge {
            Some(badge) => (badge.text.as_str(), badge.color.css()),
            None => ("-", "-"),
        };
        println!("{:<8} {:<6} {:?}  {}", text, color, report.state, report.url);
    }
}
