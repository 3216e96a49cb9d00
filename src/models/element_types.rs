use crate::models::classify_types::Verdict;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An image element on the page, identified by the URL it renders.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VisualElement {
    pub src: String,
    pub current_src: Option<String>,
}

impl VisualElement {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            current_src: None,
        }
    }

    pub fn with_current_src(mut self, current_src: impl Into<String>) -> Self {
        self.current_src = Some(current_src.into());
        self
    }

    /// The URL actually rendered: the current source when the element has one.
    pub fn source_url(&self) -> &str {
        self.current_src
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.src)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Preprocess,
    Inference,
    Remote,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetch => "fetch",
            Stage::Preprocess => "preprocess",
            Stage::Inference => "inference",
            Stage::Remote => "remote",
        };
        f.write_str(name)
    }
}

/// Annotation state of one element. Acts as the element's mutex: only
/// `Unchecked` accepts a new analysis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementState {
    Unchecked,
    Pending(Stage),
    Done(Verdict),
    Failed(Stage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: ElementState,
    pub to: ElementState,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid element transition {:?} -> {:?}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

impl ElementState {
    pub fn is_pending(&self) -> bool {
        matches!(self, ElementState::Pending(_))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ElementState::Done(_) | ElementState::Failed(_))
    }

    pub fn transition(self, next: ElementState) -> Result<ElementState, InvalidTransition> {
        use ElementState::*;
        let allowed = match (self, next) {
            (Unchecked, Pending(Stage::Fetch)) => true,
            (Pending(Stage::Fetch), Pending(Stage::Preprocess)) => true,
            (Pending(Stage::Preprocess), Pending(Stage::Inference)) => true,
            (Pending(Stage::Inference), Pending(Stage::Remote)) => true,
            (Pending(Stage::Inference), Done(_)) => true,
            (Pending(Stage::Remote), Done(_)) => true,
            (Pending(_), Failed(_)) => true,
            _ => false,
        };
        if allowed {
            Ok(next)
        } else {
            Err(InvalidTransition { from: self, to: next })
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeColor {
    Neutral,
    Warning,
    Positive,
    Muted,
}

impl BadgeColor {
    pub fn css(&self) -> &'static str {
        match self {
            BadgeColor::Neutral => "#444",
            BadgeColor::Warning => "red",
            BadgeColor::Positive => "green",
            BadgeColor::Muted => "gray",
        }
    }
}

/// Transient annotation on an element. Replaced wholesale on every change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Badge {
    pub text: String,
    pub color: BadgeColor,
}

impl Badge {
    fn new(text: &str, color: BadgeColor) -> Self {
        Self {
            text: text.to_string(),
            color,
        }
    }

    pub fn in_progress() -> Self {
        Self::new("…", BadgeColor::Neutral)
    }

    pub fn verdict(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Ai => Self::new("AI", BadgeColor::Warning),
            Verdict::Human => Self::new("Human", BadgeColor::Positive),
        }
    }

    /// Error badge for the stage that failed. Each stage family is distinct.
    pub fn failure(stage: Stage) -> Self {
        match stage {
            Stage::Fetch | Stage::Preprocess => Self::new("N/A", BadgeColor::Muted),
            Stage::Inference => Self::new("Model Err", BadgeColor::Muted),
            Stage::Remote => Self::new("AI Err", BadgeColor::Muted),
        }
    }
}
