use crate::config::EscalationPolicy;
use crate::error::{DetectorError, Result};
use crate::models::classify_types::{LocalClassification, LocalLabel};

/// Numerically stable softmax over raw logits.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max_logit = logits.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let exp: Vec<f32> = logits.iter().map(|&x| (x - max_logit).exp()).collect();
    let exp_sum: f32 = exp.iter().sum();
    exp.into_iter().map(|x| x / exp_sum).collect()
}

/// Probability of the AI class. The model is a two-class head.
pub fn ai_probability(logits: &[f32], ai_class_index: usize) -> Result<f32> {
    if logits.len() < 2 {
        return Err(DetectorError::inference(format!(
            "Expected at least 2 class scores, got {}",
            logits.len()
        )));
    }
    if logits.iter().any(|v| !v.is_finite()) {
        return Err(DetectorError::inference("Model produced non-finite logits"));
    }
    softmax(logits)
        .get(ai_class_index)
        .copied()
        .ok_or_else(|| DetectorError::inference(format!("No score for class {}", ai_class_index)))
}

/// `ai` at or above the threshold, `human` when the complement is, else `uncertain`.
pub fn classify_probability(p_ai: f32, threshold: f32) -> LocalClassification {
    let label = if p_ai >= threshold {
        LocalLabel::Ai
    } else if 1.0 - p_ai >= threshold {
        LocalLabel::Human
    } else {
        LocalLabel::Uncertain
    };
    LocalClassification {
        label,
        confidence: p_ai,
    }
}

/// Whether the remote classifier should be consulted for this local result.
pub fn should_escalate(
    policy: EscalationPolicy,
    local: &LocalClassification,
    suspicion_threshold: f32,
) -> bool {
    match policy {
        EscalationPolicy::Always => true,
        EscalationPolicy::Suspicious => {
            local.label == LocalLabel::Uncertain || local.confidence >= suspicion_threshold
        }
    }
}
