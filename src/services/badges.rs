use crate::models::element_types::{Badge, VisualElement};
use std::collections::HashMap;
use std::sync::Mutex;

/// Draws badges on elements. Each call replaces whatever badge the element had.
pub trait BadgeRenderer: Send + Sync {
    fn show(&self, element: &VisualElement, badge: Badge);
}

/// In-memory renderer holding the current badge of every element.
#[derive(Default)]
pub struct BadgeBoard {
    badges: Mutex<HashMap<String, Badge>>,
}

impl BadgeBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn badge(&self, url: &str) -> Option<Badge> {
        self.lock().get(url).cloned()
    }

    /// Current badges sorted by element URL.
    pub fn snapshot(&self) -> Vec<(String, Badge)> {
        let mut all: Vec<_> = self
            .lock()
            .iter()
            .map(|(url, badge)| (url.clone(), badge.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Badge>> {
        self.badges.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl BadgeRenderer for BadgeBoard {
    fn show(&self, element: &VisualElement, badge: Badge) {
        tracing::debug!(url = element.source_url(), text = %badge.text, color = badge.color.css(), "badge");
        self.lock().insert(element.source_url().to_string(), badge);
    }
}
