//! Engine configuration and path resolution.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::augment::DEFAULT_AUGMENTATION_MODEL;
use crate::conversation::DEFAULT_MAX_HISTORY;
use crate::postprocess::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_HEALTHY_LABEL};
use crate::preprocess::{Encoding, DEFAULT_INPUT_SIZE};
use crate::types::{LeafdocError, LeafdocResult};

/// Default model directory, relative to `$HOME`.
const MODEL_DIR: &str = ".leafdoc/models";

/// Default model filename.
const MODEL_FILENAME: &str = "leafdoc-classifier.onnx";

/// Settings for building a [`crate::DiagnosisEngine`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub model_path: Option<String>,
    /// Newline-separated class names; the built-in list is used when unset.
    pub labels_path: Option<String>,
    /// Taxonomy JSON; the built-in taxonomy is used when unset.
    pub knowledge_path: Option<String>,
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub healthy_label: String,
    /// Pin a single encoding instead of trying all of them.
    pub encoding: Option<Encoding>,
    pub api_key: Option<String>,
    pub augmentation_model: String,
    pub augmentation_timeout_secs: u64,
    pub max_history: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            labels_path: None,
            knowledge_path: None,
            input_size: DEFAULT_INPUT_SIZE,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            healthy_label: DEFAULT_HEALTHY_LABEL.to_string(),
            encoding: None,
            api_key: None,
            augmentation_model: DEFAULT_AUGMENTATION_MODEL.to_string(),
            augmentation_timeout_secs: 30,
            max_history: DEFAULT_MAX_HISTORY,
        }
    }
}

impl EngineConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> LeafdocResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| LeafdocError::Config(format!("Failed to read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| LeafdocError::Config(format!("Invalid config {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Fill unset paths from `LEAFDOC_MODEL`, `LEAFDOC_LABELS`, and `LEAFDOC_KNOWLEDGE`.
    pub fn with_env(mut self) -> Self {
        self.model_path = self.model_path.or_else(|| env("LEAFDOC_MODEL"));
        self.labels_path = self.labels_path.or_else(|| env("LEAFDOC_LABELS"));
        self.knowledge_path = self.knowledge_path.or_else(|| env("LEAFDOC_KNOWLEDGE"));
        self
    }

    pub fn validate(&self) -> LeafdocResult<()> {
        if self.input_size == 0 {
            return Err(LeafdocError::Config("input_size must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(LeafdocError::Config(format!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if self.healthy_label.trim().is_empty() {
            return Err(LeafdocError::Config("healthy_label must not be blank".to_string()));
        }
        if self.augmentation_timeout_secs == 0 {
            return Err(LeafdocError::Config(
                "augmentation_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn augmentation_timeout(&self) -> Duration {
        Duration::from_secs(self.augmentation_timeout_secs)
    }

    /// The model path to use, falling back to the default location.
    pub fn resolved_model_path(&self) -> PathBuf {
        resolve_model_path(self.model_path.as_deref())
    }
}

/// A set, non-blank environment variable.
fn env(var: &str) -> Option<String> {
    non_blank(std::env::var(var).ok())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Resolve the classifier model path.
pub fn resolve_model_path(explicit: Option<&str>) -> PathBuf {
    resolve_model_path_with(explicit, env("LEAFDOC_MODEL"))
}

fn resolve_model_path_with(explicit: Option<&str>, env_model: Option<String>) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }

    if let Some(env_path) = non_blank(env_model) {
        return PathBuf::from(env_path);
    }

    let cwd_model = PathBuf::from(".leafdoc").join(MODEL_FILENAME);
    if cwd_model.exists() {
        return cwd_model;
    }

    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(MODEL_DIR).join(MODEL_FILENAME)
}
