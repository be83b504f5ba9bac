//! Logit calibration, arg-max labelling, and the low-confidence policy.

use crate::inference::ClassLabels;
use crate::matcher::same_label;
use crate::preprocess::Encoding;
use crate::types::{ClassificationResult, LabelProbability, LeafdocError, LeafdocResult};

/// Confidence below which a non-healthy result is flagged.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.6;

/// Label of the healthy class.
pub const DEFAULT_HEALTHY_LABEL: &str = "normal";

/// How far from 1.0 a non-negative output may sum and still count as probabilities.
const DISTRIBUTION_TOLERANCE: f32 = 0.1;

/// Settings for turning logits into a [`ClassificationResult`].
#[derive(Debug, Clone)]
pub struct CalibrationPolicy {
    pub confidence_threshold: f32,
    pub healthy_label: String,
}

impl Default for CalibrationPolicy {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            healthy_label: DEFAULT_HEALTHY_LABEL.to_string(),
        }
    }
}

impl CalibrationPolicy {
    /// Whether `label` names the healthy class, under the same normalization the matcher uses.
    pub fn is_healthy(&self, label: &str) -> bool {
        same_label(label, &self.healthy_label)
    }
}

/// Whether `values` already form a probability distribution.
pub fn looks_like_distribution(values: &[f32]) -> bool {
    if values.is_empty() || values.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return false;
    }
    let sum: f32 = values.iter().sum();
    (sum - 1.0).abs() <= DISTRIBUTION_TOLERANCE
}

/// Numerically stable softmax.
///
/// Positive infinities share all of the mass between them.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let infinite = logits.iter().filter(|v| **v == f32::INFINITY).count();
    if infinite > 0 {
        let share = 1.0 / infinite as f32;
        return logits
            .iter()
            .map(|&v| if v == f32::INFINITY { share } else { 0.0 })
            .collect();
    }

    let max = logits
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f64> = logits
        .iter()
        .map(|&v| {
            if v.is_nan() {
                0.0
            } else {
                ((v - max) as f64).exp()
            }
        })
        .collect();
    let sum: f64 = exps.iter().sum();
    if sum == 0.0 || !sum.is_finite() {
        let uniform = 1.0 / logits.len().max(1) as f32;
        return vec![uniform; logits.len()];
    }
    exps.iter().map(|e| (e / sum) as f32).collect()
}

/// Convert raw model output into probabilities summing to 1.
pub fn to_probabilities(logits: &[f32]) -> Vec<f32> {
    if looks_like_distribution(logits) {
        let sum: f32 = logits.iter().sum();
        logits.iter().map(|v| v / sum).collect()
    } else {
        softmax(logits)
    }
}

/// Index of the largest value; ties resolve to the lowest index.
fn arg_max(values: &[f32]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, v) in values.iter().enumerate() {
        match best {
            Some(b) if values[b] >= *v => {}
            _ => best = Some(i),
        }
    }
    best
}

/// Calibrate one encoding's logits into a classification result.
pub fn classify(
    logits: &[f32],
    labels: &ClassLabels,
    encoding: Encoding,
    policy: &CalibrationPolicy,
) -> LeafdocResult<ClassificationResult> {
    if logits.len() != labels.len() {
        return Err(LeafdocError::Inference(format!(
            "Model produced {} outputs for {} classes",
            logits.len(),
            labels.len()
        )));
    }

    let probs = to_probabilities(logits);
    let best = arg_max(&probs)
        .ok_or_else(|| LeafdocError::Inference("Model produced no outputs".to_string()))?;
    let label = labels
        .get(best)
        .ok_or_else(|| LeafdocError::Inference(format!("No class label at index {best}")))?
        .to_string();
    let confidence = probs[best];

    let mut probabilities: Vec<LabelProbability> = labels
        .iter()
        .zip(probs.iter())
        .map(|(l, &p)| LabelProbability {
            label: l.to_string(),
            probability: p,
        })
        .collect();
    // Stable sort keeps label order among equal probabilities.
    probabilities.sort_by(|a, b| {
        b.probability
            .partial_cmp(&a.probability)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let low_confidence = !policy.is_healthy(&label) && confidence < policy.confidence_threshold;

    Ok(ClassificationResult {
        label,
        confidence,
        probabilities,
        encoding,
        low_confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> ClassLabels {
        ClassLabels::new(vec!["blast".into(), "brown_spot".into(), "normal".into()]).unwrap()
    }

    fn assert_distribution(probs: &[f32]) {
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-3, "sum was {sum}");
        assert!(probs.iter().all(|&p| p >= 0.0));
    }

    #[test]
    fn test_softmax_on_raw_logits() {
        let probs = to_probabilities(&[2.0, -1.0, 0.5]);
        assert_distribution(&probs);
        assert!(probs[0] > probs[2] && probs[2] > probs[1]);
    }

    #[test]
    fn test_softmax_is_stable_for_large_logits() {
        let probs = to_probabilities(&[1000.0, 999.0, -1000.0]);
        assert_distribution(&probs);
        assert!(probs.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_existing_distribution_is_kept() {
        let probs = to_probabilities(&[0.7, 0.2, 0.15]);
        assert_distribution(&probs);
        // Renormalized, not softmaxed: ordering and ratios survive.
        assert!((probs[0] / probs[1] - 3.5).abs() < 1e-4);
    }

    #[test]
    fn test_negative_values_force_softmax() {
        assert!(!looks_like_distribution(&[1.2, -0.2, 0.0]));
        assert!(!looks_like_distribution(&[0.5, 0.3, 0.0]));
        assert!(looks_like_distribution(&[0.5, 0.3, 0.25]));
    }

    #[test]
    fn test_degenerate_logits() {
        assert_distribution(&to_probabilities(&[f32::NAN, 1.0, 2.0]));
        assert_distribution(&to_probabilities(&[f32::NEG_INFINITY; 3]));
        assert_distribution(&to_probabilities(&[0.0, 0.0, 0.0]));
    }

    #[test]
    fn test_classify_confidence_matches_label() {
        let result = classify(
            &[0.1, 3.0, 0.2],
            &labels(),
            Encoding::SignedUnit,
            &CalibrationPolicy::default(),
        )
        .unwrap();
        assert_eq!(result.label, "brown_spot");
        assert_eq!(result.probabilities[0].label, "brown_spot");
        assert_eq!(result.confidence, result.probabilities[0].probability);
        assert!(!result.low_confidence);
        assert_eq!(result.encoding, Encoding::SignedUnit);
        let probs: Vec<f32> = result.probabilities.iter().map(|p| p.probability).collect();
        assert_distribution(&probs);
        assert!(probs.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_low_confidence_flag() {
        let policy = CalibrationPolicy::default();
        let result = classify(&[0.5, 0.3, 0.2], &labels(), Encoding::RawByteValue, &policy).unwrap();
        assert_eq!(result.label, "blast");
        assert!(result.low_confidence);
    }

    #[test]
    fn test_healthy_never_flagged() {
        let policy = CalibrationPolicy::default();
        let result = classify(&[0.3, 0.3, 0.4], &labels(), Encoding::RawByteValue, &policy).unwrap();
        assert_eq!(result.label, "normal");
        assert!(result.confidence < 0.6);
        assert!(!result.low_confidence);
    }

    #[test]
    fn test_ties_resolve_to_first_label() {
        let result = classify(
            &[1.0, 1.0, 1.0],
            &labels(),
            Encoding::RawByteValue,
            &CalibrationPolicy::default(),
        )
        .unwrap();
        assert_eq!(result.label, "blast");
    }

    #[test]
    fn test_length_mismatch_is_inference_error() {
        let err = classify(
            &[1.0, 2.0],
            &labels(),
            Encoding::RawByteValue,
            &CalibrationPolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, LeafdocError::Inference(_)));
    }

    #[test]
    fn test_healthy_label_matching() {
        let policy = CalibrationPolicy::default();
        assert!(policy.is_healthy("  NORMAL "));
        assert!(!policy.is_healthy("abnormal"));
    }

    #[test]
    fn test_configured_healthy_label_agrees_with_matcher() {
        let policy = CalibrationPolicy {
            confidence_threshold: 0.6,
            healthy_label: "healthy_leaf".to_string(),
        };
        let labels =
            ClassLabels::new(vec!["blast".into(), "Healthy Leaf".into(), "tungro".into()]).unwrap();
        let result = classify(&[0.3, 0.4, 0.3], &labels, Encoding::RawByteValue, &policy).unwrap();
        assert_eq!(result.label, "Healthy Leaf");
        assert!(!result.low_confidence);

        let matcher = crate::matcher::RetrievalMatcher::new(std::sync::Arc::new(
            crate::knowledge::KnowledgeBase::from_json_str("[]").unwrap(),
        ))
        .with_healthy_label("healthy_leaf");
        assert!(matcher.match_label(&result.label).is_healthy());
    }

    #[test]
    fn test_positive_infinity_logit() {
        let result = classify(
            &[0.0, f32::INFINITY, 0.0],
            &labels(),
            Encoding::RawByteValue,
            &CalibrationPolicy::default(),
        )
        .unwrap();
        assert_eq!(result.label, "brown_spot");
        assert!((result.confidence - 1.0).abs() < 1e-6);
        assert!(!result.low_confidence);

        let shared = softmax(&[f32::INFINITY, 1.0, f32::INFINITY]);
        assert_eq!(shared, vec![0.5, 0.0, 0.5]);
    }
}
