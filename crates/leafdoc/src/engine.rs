//! The diagnosis service object: built once at startup and shared by handle.

use std::path::Path;
use std::sync::Arc;

use image::{DynamicImage, GenericImageView};

use crate::augment::{resolve_api_key, AugmentationAdapter, GeminiAdapter};
use crate::capture::{load_from_base64, load_from_file, ImageSource};
use crate::config::EngineConfig;
use crate::conversation::{self, ConversationContext};
use crate::inference::{ClassLabels, InferenceAdapter, OnnxClassifier};
use crate::knowledge::KnowledgeBase;
use crate::matcher::RetrievalMatcher;
use crate::pipeline::ClassificationPipeline;
use crate::postprocess::CalibrationPolicy;
use crate::types::{ClassificationResult, DiagnosisOutcome, LeafdocResult};

/// Owns the taxonomy, matcher, and classification pipeline.
pub struct DiagnosisEngine {
    config: EngineConfig,
    knowledge: Arc<KnowledgeBase>,
    matcher: RetrievalMatcher,
    pipeline: ClassificationPipeline,
}

impl DiagnosisEngine {
    /// Assemble an engine from already-loaded parts.
    pub fn new(
        config: EngineConfig,
        adapter: Arc<dyn InferenceAdapter>,
        labels: ClassLabels,
        knowledge: Arc<KnowledgeBase>,
    ) -> LeafdocResult<Self> {
        config.validate()?;

        let policy = CalibrationPolicy {
            confidence_threshold: config.confidence_threshold,
            healthy_label: config.healthy_label.clone(),
        };
        let pipeline = ClassificationPipeline::new(adapter, labels)
            .with_policy(policy)
            .with_input_size(config.input_size)
            .with_encodings(config.encoding.into_iter().collect());
        let matcher =
            RetrievalMatcher::new(knowledge.clone()).with_healthy_label(&config.healthy_label);

        let unmatched: Vec<&str> = pipeline
            .labels()
            .iter()
            .filter(|l| !matcher.match_label(l).found)
            .collect();
        if !unmatched.is_empty() {
            tracing::warn!(
                "Class labels without a taxonomy entry: {}",
                unmatched.join(", ")
            );
        }

        Ok(Self {
            config,
            knowledge,
            matcher,
            pipeline,
        })
    }

    /// Load labels, taxonomy, and the ONNX classifier as the config describes.
    ///
    /// The model itself is loaded lazily by [`DiagnosisEngine::initialize`] or
    /// the first diagnosis.
    pub fn from_config(config: EngineConfig) -> LeafdocResult<Self> {
        let labels = match &config.labels_path {
            Some(path) => ClassLabels::from_file(Path::new(path))?,
            None => ClassLabels::default(),
        };
        let knowledge = match &config.knowledge_path {
            Some(path) => KnowledgeBase::from_file(Path::new(path))?,
            None => KnowledgeBase::builtin()?,
        };
        let classifier = OnnxClassifier::new(config.resolved_model_path());

        tracing::info!(
            "Engine ready: {} classes, {} taxonomy entries, model {}",
            labels.len(),
            knowledge.len(),
            classifier.model_path().display()
        );

        Self::new(config, Arc::new(classifier), labels, Arc::new(knowledge))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn knowledge_base(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    pub fn labels(&self) -> &ClassLabels {
        self.pipeline.labels()
    }

    pub fn pipeline(&self) -> &ClassificationPipeline {
        &self.pipeline
    }

    /// Load the model eagerly.
    pub fn initialize(&self) -> LeafdocResult<()> {
        self.pipeline.initialize()
    }

    pub fn classify(&self, img: &DynamicImage) -> LeafdocResult<ClassificationResult> {
        self.pipeline.classify_image(img)
    }

    /// Look a bare label up in the taxonomy.
    pub fn lookup(&self, label: &str) -> DiagnosisOutcome {
        self.matcher.match_label(label)
    }

    /// Classify a photo and match the result against the taxonomy.
    pub fn diagnose_image(&self, img: &DynamicImage) -> LeafdocResult<DiagnosisOutcome> {
        let classification = self.classify(img)?;
        let outcome = self.matcher.match_label(&classification.label);
        tracing::info!(
            label = %classification.label,
            confidence = classification.confidence,
            found = outcome.found,
            low_confidence = classification.low_confidence,
            "Diagnosis complete"
        );
        Ok(outcome.with_classification(classification))
    }

    pub fn diagnose_file(&self, path: &str) -> LeafdocResult<DiagnosisOutcome> {
        let (img, source) = load_from_file(path)?;
        self.diagnose_loaded(&img, &source)
    }

    pub fn diagnose_base64(&self, data: &str, mime: &str) -> LeafdocResult<DiagnosisOutcome> {
        let (img, source) = load_from_base64(data, mime)?;
        self.diagnose_loaded(&img, &source)
    }

    fn diagnose_loaded(
        &self,
        img: &DynamicImage,
        source: &ImageSource,
    ) -> LeafdocResult<DiagnosisOutcome> {
        let (w, h) = img.dimensions();
        tracing::debug!(%source, width = w, height = h, "Diagnosing photo");
        self.diagnose_image(img)
    }

    pub fn start_conversation(&self, outcome: DiagnosisOutcome) -> ConversationContext {
        ConversationContext::with_max_history(outcome, self.config.max_history)
    }

    /// The Gemini adapter described by the config and environment.
    pub fn augmentation_adapter(&self) -> GeminiAdapter {
        GeminiAdapter::new(
            resolve_api_key(self.config.api_key.as_deref()),
            &self.config.augmentation_model,
        )
    }

    /// Ask a follow-up question with the configured timeout.
    pub async fn ask<A>(
        &self,
        adapter: &A,
        conversation: &mut ConversationContext,
        question: &str,
    ) -> LeafdocResult<String>
    where
        A: AugmentationAdapter + ?Sized,
    {
        conversation::ask(
            adapter,
            conversation,
            question,
            self.config.augmentation_timeout(),
        )
        .await
    }
}
