//! Classification model adapter and the ONNX Runtime implementation.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ndarray::Array4;
use ort::session::Session;
use ort::value::Tensor as OrtTensor;

use crate::preprocess::Tensor;
use crate::types::{LeafdocError, LeafdocResult};

/// Class names in the order the trained model emits them.
pub const DEFAULT_CLASS_LABELS: [&str; 10] = [
    "bacterial_leaf_blight",
    "bacterial_leaf_streak",
    "bacterial_panicle_blight",
    "blast",
    "brown_spot",
    "dead_heart",
    "downy_mildew",
    "hispa",
    "normal",
    "tungro",
];

/// Ordered class names. Position `i` names the model's output `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLabels {
    labels: Vec<String>,
}

impl ClassLabels {
    /// Build from an ordered list. Labels must be non-empty and unique.
    pub fn new(labels: Vec<String>) -> LeafdocResult<Self> {
        if labels.is_empty() {
            return Err(LeafdocError::Config("Class label list is empty".to_string()));
        }
        for (i, label) in labels.iter().enumerate() {
            if label.trim().is_empty() {
                return Err(LeafdocError::Config(format!("Class label {i} is blank")));
            }
            if labels[..i].contains(label) {
                return Err(LeafdocError::Config(format!(
                    "Duplicate class label: {label}"
                )));
            }
        }
        Ok(Self { labels })
    }

    /// Parse a newline-separated label file. Blank lines and `#` comments are skipped.
    pub fn parse(text: &str) -> LeafdocResult<Self> {
        let labels = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect();
        Self::new(labels)
    }

    pub fn from_file(path: &Path) -> LeafdocResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

impl Default for ClassLabels {
    fn default() -> Self {
        Self {
            labels: DEFAULT_CLASS_LABELS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// A classification model that turns an input tensor into raw logits.
///
/// `initialize` must be idempotent and safe to call from several threads;
/// `predict` before a successful `initialize` fails with
/// [`LeafdocError::ModelNotInitialized`].
pub trait InferenceAdapter: Send + Sync {
    fn initialize(&self) -> LeafdocResult<()>;

    fn predict(&self, tensor: &Tensor) -> LeafdocResult<Vec<f32>>;
}

/// ONNX Runtime classifier taking NHWC `[1, side, side, 3]` input.
pub struct OnnxClassifier {
    model_path: PathBuf,
    // The lock is also the initialization latch: a caller arriving while
    // another thread is loading the model blocks here until it finishes.
    session: Mutex<Option<Session>>,
}

impl OnnxClassifier {
    /// Create an uninitialized classifier for the model at `model_path`.
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            session: Mutex::new(None),
        }
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Whether the model session has been loaded.
    pub fn is_initialized(&self) -> bool {
        self.session.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    fn load_session(&self) -> LeafdocResult<Session> {
        if !self.model_path.exists() {
            return Err(LeafdocError::Inference(format!(
                "Model not found at {}",
                self.model_path.display()
            )));
        }

        tracing::info!("Loading classification model from {}", self.model_path.display());

        Session::builder()
            .and_then(|b| b.with_intra_threads(1))
            .and_then(|b| b.commit_from_file(&self.model_path))
            .map_err(|e| LeafdocError::Inference(format!("Failed to load ONNX model: {e}")))
    }
}

impl InferenceAdapter for OnnxClassifier {
    fn initialize(&self) -> LeafdocResult<()> {
        let mut guard = self
            .session
            .lock()
            .map_err(|_| LeafdocError::Inference("Model session lock poisoned".to_string()))?;
        if guard.is_some() {
            return Ok(());
        }
        *guard = Some(self.load_session()?);
        tracing::info!("Classification model loaded successfully");
        Ok(())
    }

    fn predict(&self, tensor: &Tensor) -> LeafdocResult<Vec<f32>> {
        let mut guard = self
            .session
            .lock()
            .map_err(|_| LeafdocError::Inference("Model session lock poisoned".to_string()))?;
        let session = guard.as_mut().ok_or(LeafdocError::ModelNotInitialized)?;

        let side = tensor.side as usize;
        let input = Array4::<f32>::from_shape_vec((1, side, side, 3), tensor.data.clone())
            .map_err(|e| LeafdocError::Inference(format!("Bad input tensor shape: {e}")))?;

        let input_tensor = OrtTensor::from_array(input)
            .map_err(|e| LeafdocError::Inference(format!("Failed to create input tensor: {e}")))?;

        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| LeafdocError::Inference(format!("ONNX inference failed: {e}")))?;

        let (_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| LeafdocError::Inference(format!("Failed to extract output: {e}")))?;

        Ok(data.to_vec())
    }
}
