use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalLabel {
    Ai,
    Human,
    Uncertain,
}

/// Local model verdict. `confidence` is the softmax probability of the AI class.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalClassification {
    pub label: LocalLabel,
    pub confidence: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteLabel {
    Ai,
    Human,
}

/// Remote classifier verdict together with the answer text it was derived from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteClassification {
    pub label: RemoteLabel,
    pub raw_text: String,
}

/// Label shown on the final badge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Ai,
    Human,
}

impl From<RemoteLabel> for Verdict {
    fn from(label: RemoteLabel) -> Self {
        match label {
            RemoteLabel::Ai => Verdict::Ai,
            RemoteLabel::Human => Verdict::Human,
        }
    }
}

/// Raw per-class scores returned by the page context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Logits {
    pub logits: Vec<f32>,
}
