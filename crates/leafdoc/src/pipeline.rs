//! Multi-encoding classification: every candidate encoding is run through the
//! model and the most confident attempt wins.

use std::sync::Arc;

use image::DynamicImage;

use crate::inference::{ClassLabels, InferenceAdapter};
use crate::postprocess::{classify, CalibrationPolicy};
use crate::preprocess::{encode, Encoding, DEFAULT_INPUT_SIZE};
use crate::types::{ClassificationResult, LeafdocError, LeafdocResult};

/// Outcome of running one encoding end to end.
#[derive(Debug)]
pub struct EncodingAttempt {
    pub encoding: Encoding,
    pub result: LeafdocResult<ClassificationResult>,
}

/// Runs preprocessing, inference, and calibration for a photo.
pub struct ClassificationPipeline {
    adapter: Arc<dyn InferenceAdapter>,
    labels: ClassLabels,
    policy: CalibrationPolicy,
    input_size: u32,
    encodings: Vec<Encoding>,
}

impl ClassificationPipeline {
    pub fn new(adapter: Arc<dyn InferenceAdapter>, labels: ClassLabels) -> Self {
        Self {
            adapter,
            labels,
            policy: CalibrationPolicy::default(),
            input_size: DEFAULT_INPUT_SIZE,
            encodings: Encoding::ALL.to_vec(),
        }
    }

    pub fn with_policy(mut self, policy: CalibrationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_input_size(mut self, input_size: u32) -> Self {
        self.input_size = input_size;
        self
    }

    /// Restrict the attempted encodings. An empty list keeps the current set.
    pub fn with_encodings(mut self, encodings: Vec<Encoding>) -> Self {
        if !encodings.is_empty() {
            self.encodings = encodings;
        }
        self
    }

    pub fn labels(&self) -> &ClassLabels {
        &self.labels
    }

    pub fn policy(&self) -> &CalibrationPolicy {
        &self.policy
    }

    pub fn encodings(&self) -> &[Encoding] {
        &self.encodings
    }

    /// Initialize the underlying model. Idempotent.
    pub fn initialize(&self) -> LeafdocResult<()> {
        self.adapter.initialize()
    }

    /// Run a single encoding end to end.
    pub fn attempt(&self, img: &DynamicImage, encoding: Encoding) -> LeafdocResult<ClassificationResult> {
        let tensor = encode(img, encoding, self.input_size)?;
        let logits = self.adapter.predict(&tensor)?;
        classify(&logits, &self.labels, encoding, &self.policy)
    }

    /// Run every configured encoding, in order, without short-circuiting on failure.
    pub fn run_attempts(&self, img: &DynamicImage) -> LeafdocResult<Vec<EncodingAttempt>> {
        self.initialize()?;
        Ok(self
            .encodings
            .iter()
            .map(|&encoding| EncodingAttempt {
                encoding,
                result: self.attempt(img, encoding),
            })
            .collect())
    }

    /// Classify a photo, keeping the most confident encoding.
    pub fn classify_image(&self, img: &DynamicImage) -> LeafdocResult<ClassificationResult> {
        let attempts = self.run_attempts(img)?;
        let best = select_best(attempts)?;
        tracing::debug!(
            label = %best.label,
            confidence = best.confidence,
            encoding = %best.encoding,
            "Selected classification"
        );
        Ok(best)
    }
}

/// Pick the highest-confidence successful attempt. Earlier attempts win ties.
///
/// Fails only if every attempt failed, returning the last failure.
pub fn select_best(attempts: Vec<EncodingAttempt>) -> LeafdocResult<ClassificationResult> {
    let mut best: Option<ClassificationResult> = None;
    let mut last_err: Option<LeafdocError> = None;

    for attempt in attempts {
        match attempt.result {
            Ok(result) => {
                tracing::debug!(
                    encoding = %attempt.encoding,
                    label = %result.label,
                    confidence = result.confidence,
                    "Encoding attempt succeeded"
                );
                let better = best
                    .as_ref()
                    .map_or(true, |b| result.confidence > b.confidence);
                if better {
                    best = Some(result);
                }
            }
            Err(e) => {
                tracing::warn!(encoding = %attempt.encoding, "Encoding attempt failed: {e}");
                last_err = Some(e);
            }
        }
    }

    match (best, last_err) {
        (Some(result), _) => Ok(result),
        (None, Some(e)) => Err(e),
        (None, None) => Err(LeafdocError::InvalidInput(
            "No encodings were attempted".to_string(),
        )),
    }
}
