//! Core data types for classification results, taxonomy entries, and diagnoses.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::preprocess::Encoding;

/// One class and its calibrated probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelProbability {
    pub label: String,
    pub probability: f32,
}

/// Calibrated output of a single classification attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub label: String,
    pub confidence: f32,
    /// Every class, sorted by descending probability.
    pub probabilities: Vec<LabelProbability>,
    pub encoding: Encoding,
    /// Advisory only. The healthy class is never flagged.
    pub low_confidence: bool,
}

/// Severity of a disease as recorded in the knowledge base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
}

impl Severity {
    /// Parse a knowledge-base severity string. Returns `None` for unknown values.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "none" => Some(Severity::None),
            "low" => Some(Severity::Low),
            "medium" | "moderate" => Some(Severity::Medium),
            "high" | "severe" => Some(Severity::High),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single numbered treatment step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionStep {
    pub step: u32,
    pub title: String,
    pub description: String,
}

/// An immutable taxonomy record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiseaseEntry {
    pub canonical_key: Option<String>,
    pub name: String,
    pub aliases: Vec<String>,
    pub description: String,
    pub severity: Severity,
    /// Sorted by `step`.
    pub solutions: Vec<SolutionStep>,
    pub prevention: Vec<String>,
    pub images: Vec<String>,
}

/// Display name of the synthetic entry returned for the healthy class.
pub const HEALTHY_ENTRY_NAME: &str = "Healthy Crop";

impl DiseaseEntry {
    /// The synthetic entry for a healthy plant. Never read from the knowledge base.
    pub fn healthy() -> Self {
        Self {
            canonical_key: None,
            name: HEALTHY_ENTRY_NAME.to_string(),
            aliases: Vec::new(),
            description: "No disease detected. The plant appears healthy.".to_string(),
            severity: Severity::None,
            solutions: Vec::new(),
            prevention: Vec::new(),
            images: Vec::new(),
        }
    }
}

/// Result of looking a classification label up in the knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisOutcome {
    pub found: bool,
    pub entry: Option<DiseaseEntry>,
    /// The label exactly as it was handed to the matcher.
    pub label: String,
    pub classification: Option<ClassificationResult>,
    /// Set only for the synthetic healthy outcome.
    #[serde(default)]
    pub healthy: bool,
}

impl DiagnosisOutcome {
    pub fn matched(label: &str, entry: DiseaseEntry) -> Self {
        Self {
            found: true,
            entry: Some(entry),
            label: label.to_string(),
            classification: None,
            healthy: false,
        }
    }

    /// The outcome for the healthy class, carrying [`DiseaseEntry::healthy`].
    pub fn healthy(label: &str) -> Self {
        Self {
            found: true,
            entry: Some(DiseaseEntry::healthy()),
            label: label.to_string(),
            classification: None,
            healthy: true,
        }
    }

    pub fn not_found(label: &str) -> Self {
        Self {
            found: false,
            entry: None,
            label: label.to_string(),
            classification: None,
            healthy: false,
        }
    }

    /// Attach the classification that produced this outcome's label.
    pub fn with_classification(mut self, classification: ClassificationResult) -> Self {
        self.classification = Some(classification);
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }
}

/// Who authored a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// One turn in a follow-up conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// Errors that can occur in the diagnosis engine.
#[derive(thiserror::Error, Debug)]
pub enum LeafdocError {
    #[error("Image decode error: {0}")]
    ImageDecode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Model not initialized")]
    ModelNotInitialized,

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Knowledge base error: {0}")]
    KnowledgeBase(String),

    #[error("Augmentation not configured: {0}")]
    AugmentationNotConfigured(String),

    #[error("Augmentation call failed: {0}")]
    AugmentationCallFailed(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl From<image::ImageError> for LeafdocError {
    fn from(e: image::ImageError) -> Self {
        LeafdocError::ImageDecode(e.to_string())
    }
}

impl LeafdocError {
    /// Whether the caller may retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LeafdocError::AugmentationCallFailed(_) | LeafdocError::Timeout(_)
        )
    }
}

/// Convenience result type.
pub type LeafdocResult<T> = Result<T, LeafdocError>;
