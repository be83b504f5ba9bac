//! End-to-end diagnosis tests with scripted inference and augmentation adapters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::DynamicImage;

use leafdoc::context::NO_MATCH_DISCLAIMER;
use leafdoc::conversation::ask;
use leafdoc::*;

// ─────────────────────── helpers ───────────────────────

/// Returns fixed logits per encoding; encodings without a script fail.
struct ScriptedModel {
    logits: HashMap<Encoding, Vec<f32>>,
    inits: AtomicUsize,
}

impl ScriptedModel {
    fn new(logits: &[(Encoding, Vec<f32>)]) -> Arc<Self> {
        Arc::new(Self {
            logits: logits.iter().cloned().collect(),
            inits: AtomicUsize::new(0),
        })
    }

    /// Same logits for every encoding.
    fn uniform(logits: Vec<f32>) -> Arc<Self> {
        Self::new(
            &Encoding::ALL
                .iter()
                .map(|&e| (e, logits.clone()))
                .collect::<Vec<_>>(),
        )
    }
}

impl InferenceAdapter for ScriptedModel {
    fn initialize(&self) -> LeafdocResult<()> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn predict(&self, tensor: &Tensor) -> LeafdocResult<Vec<f32>> {
        self.logits
            .get(&tensor.encoding)
            .cloned()
            .ok_or_else(|| LeafdocError::Inference(format!("no script for {}", tensor.encoding)))
    }
}

/// Logits with a single hot class among the default labels.
fn one_hot(label: &str) -> Vec<f32> {
    ClassLabels::default()
        .iter()
        .map(|l| if l == label { 8.0 } else { 0.0 })
        .collect()
}

fn engine_with(model: Arc<dyn InferenceAdapter>, labels: ClassLabels) -> DiagnosisEngine {
    let config = EngineConfig {
        input_size: 16,
        ..EngineConfig::default()
    };
    DiagnosisEngine::new(
        config,
        model,
        labels,
        Arc::new(KnowledgeBase::builtin().unwrap()),
    )
    .unwrap()
}

fn leaf() -> DynamicImage {
    DynamicImage::new_rgb8(48, 32)
}

enum Reply {
    Answer(&'static str),
    NotConfigured,
    CallFailed,
    Hang,
}

struct ScriptedAugmenter {
    reply: Reply,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedAugmenter {
    fn new(reply: Reply) -> Self {
        Self {
            reply,
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AugmentationAdapter for ScriptedAugmenter {
    async fn generate_response(&self, _question: &str, context: &str) -> LeafdocResult<String> {
        self.prompts.lock().unwrap().push(context.to_string());
        match self.reply {
            Reply::Answer(text) => Ok(text.to_string()),
            Reply::NotConfigured => Err(LeafdocError::AugmentationNotConfigured("no key".into())),
            Reply::CallFailed => Err(LeafdocError::AugmentationCallFailed("HTTP 503".into())),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok("too late".to_string())
            }
        }
    }
}

// ─────────────────────── classification ───────────────────────

#[test]
fn brown_spot_end_to_end() {
    let engine = engine_with(ScriptedModel::uniform(one_hot("brown_spot")), ClassLabels::default());
    let outcome = engine.diagnose_image(&leaf()).unwrap();

    assert!(outcome.found);
    assert_eq!(outcome.label, "brown_spot");
    let entry = outcome.entry.as_ref().unwrap();
    assert_eq!(entry.name, "Brown Spot");

    let expected = engine
        .knowledge_base()
        .entries()
        .iter()
        .find(|e| e.name == "Brown Spot")
        .unwrap();
    assert_eq!(entry.solutions, expected.solutions);
    let steps: Vec<u32> = entry.solutions.iter().map(|s| s.step).collect();
    assert_eq!(steps, vec![1, 2, 3]);

    let classification = outcome.classification.unwrap();
    assert_eq!(classification.label, "brown_spot");
    assert!(!classification.low_confidence);
}

#[test]
fn most_confident_encoding_wins() {
    let labels = ClassLabels::new(vec![
        "blast".into(),
        "brown_spot".into(),
        "tungro".into(),
        "hispa".into(),
    ])
    .unwrap();
    let model = ScriptedModel::new(&[
        (Encoding::SignedUnit, vec![0.4, 0.2, 0.2, 0.2]),
        (Encoding::MeanSubtractedChannelSwapped, vec![0.02, 0.9, 0.05, 0.03]),
        (Encoding::RawByteValue, vec![0.25, 0.2, 0.3, 0.25]),
    ]);
    let engine = engine_with(model.clone(), labels);

    let mean_only = engine
        .pipeline()
        .attempt(&leaf(), Encoding::MeanSubtractedChannelSwapped)
        .unwrap();
    let best = engine.classify(&leaf()).unwrap();

    assert_eq!(best, mean_only);
    assert_eq!(best.label, "brown_spot");
    assert!((best.confidence - 0.9).abs() < 1e-6);
    assert_eq!(best.encoding, Encoding::MeanSubtractedChannelSwapped);
    assert_eq!(model.inits.load(Ordering::SeqCst), 1);
}

#[test]
fn probability_invariants_hold() {
    let labels = ClassLabels::default();
    let logits: Vec<f32> = (0..labels.len()).map(|i| (i as f32 * 1.7).sin() * 4.0).collect();
    let engine = engine_with(ScriptedModel::uniform(logits), labels);
    let result = engine.classify(&leaf()).unwrap();

    let sum: f32 = result.probabilities.iter().map(|p| p.probability).sum();
    assert!((sum - 1.0).abs() < 1e-3);
    assert!(result.probabilities.iter().all(|p| p.probability >= 0.0));
    let at_label = result
        .probabilities
        .iter()
        .find(|p| p.label == result.label)
        .unwrap();
    assert_eq!(at_label.probability, result.confidence);
    assert_eq!(result.probabilities[0].probability, result.confidence);
}

#[test]
fn one_failed_encoding_does_not_abort() {
    let model = ScriptedModel::new(&[(Encoding::RawByteValue, one_hot("tungro"))]);
    let engine = engine_with(model, ClassLabels::default());
    let outcome = engine.diagnose_image(&leaf()).unwrap();
    assert_eq!(outcome.entry.unwrap().name, "Tungro");
}

#[test]
fn all_encodings_failing_surfaces_error() {
    let engine = engine_with(ScriptedModel::new(&[]), ClassLabels::default());
    let err = engine.diagnose_image(&leaf()).unwrap_err();
    match err {
        LeafdocError::Inference(msg) => assert!(msg.contains("raw_byte_value")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn missing_model_is_inference_error() {
    let config = EngineConfig {
        model_path: Some("/nonexistent/leafdoc.onnx".into()),
        ..EngineConfig::default()
    };
    let engine = DiagnosisEngine::from_config(config).unwrap();
    assert!(matches!(
        engine.diagnose_image(&leaf()),
        Err(LeafdocError::Inference(_))
    ));
}

#[test]
fn corrupt_upload_is_decode_error() {
    use base64::Engine as _;
    let engine = engine_with(ScriptedModel::uniform(one_hot("blast")), ClassLabels::default());
    let data = base64::engine::general_purpose::STANDARD.encode(b"\x89PNG broken");
    assert!(matches!(
        engine.diagnose_base64(&data, "image/png"),
        Err(LeafdocError::ImageDecode(_))
    ));
}

#[test]
fn diagnose_file_checks_extension() {
    let engine = engine_with(ScriptedModel::uniform(one_hot("blast")), ClassLabels::default());
    let dir = tempfile::tempdir().unwrap();

    let png = dir.path().join("leaf.png");
    leaf().save(&png).unwrap();
    let outcome = engine.diagnose_file(png.to_str().unwrap()).unwrap();
    assert_eq!(outcome.label, "blast");

    let txt = dir.path().join("leaf.txt");
    std::fs::copy(&png, &txt).unwrap();
    assert!(matches!(
        engine.diagnose_file(txt.to_str().unwrap()),
        Err(LeafdocError::ImageDecode(_))
    ));
}

// ─────────────────────── matching ───────────────────────

#[test]
fn healthy_label_ignores_taxonomy() {
    let kb = KnowledgeBase::from_json_str(
        r#"[{ "canonicalKey": "normal", "name": "Normal", "severity": "high",
              "solutions": [{ "step": 1, "title": "x", "description": "y" }] }]"#,
    )
    .unwrap();
    let engine = DiagnosisEngine::new(
        EngineConfig {
            input_size: 8,
            ..EngineConfig::default()
        },
        ScriptedModel::uniform(vec![0.45, 0.55]),
        ClassLabels::new(vec!["blast".into(), "Normal".into()]).unwrap(),
        Arc::new(kb),
    )
    .unwrap();

    let outcome = engine.diagnose_image(&leaf()).unwrap();
    assert!(outcome.found);
    assert!(outcome.is_healthy());
    let entry = outcome.entry.as_ref().unwrap();
    assert_eq!(entry.name, HEALTHY_ENTRY_NAME);
    assert!(entry.solutions.is_empty());
    assert!(entry.prevention.is_empty());
    assert!(!outcome.classification.unwrap().low_confidence);
}

#[test]
fn unknown_label_preserved_verbatim() {
    let labels = ClassLabels::new(vec!["xyz_unknown".into(), "blast".into()]).unwrap();
    let engine = engine_with(ScriptedModel::uniform(vec![3.0, 0.0]), labels);
    let outcome = engine.diagnose_image(&leaf()).unwrap();
    assert!(!outcome.found);
    assert!(outcome.entry.is_none());
    assert_eq!(outcome.label, "xyz_unknown");
    assert_eq!(engine.lookup("xyz_unknown").label, "xyz_unknown");
}

// ─────────────────────── context & conversation ───────────────────────

#[test]
fn disclaimer_never_leaks_previous_disease() {
    let engine = engine_with(ScriptedModel::uniform(one_hot("blast")), ClassLabels::default());
    let first = engine.diagnose_image(&leaf()).unwrap();
    let first_block = build_context(&first);
    assert!(first_block.text.contains("Rice Blast"));

    let second = engine.lookup("xyz_unknown");
    let block = build_context(&second);
    assert_eq!(block.text, NO_MATCH_DISCLAIMER);
    for term in ["Rice Blast", "tricyclazole", "Magnaporthe", "blast"] {
        assert!(!block.text.contains(term), "leaked {term}");
    }
}

#[tokio::test]
async fn successful_ask_appends_history() {
    let engine = engine_with(ScriptedModel::uniform(one_hot("blast")), ClassLabels::default());
    let outcome = engine.diagnose_image(&leaf()).unwrap();
    let mut conv = engine.start_conversation(outcome);
    let augmenter = ScriptedAugmenter::new(Reply::Answer("Keep the field flooded."));

    let answer = engine.ask(&augmenter, &mut conv, "How do I treat it?").await.unwrap();
    assert_eq!(answer, "Keep the field flooded.");
    assert_eq!(conv.history.len(), 2);
    assert_eq!(conv.history[0].role, ChatRole::User);
    assert_eq!(conv.history[1].role, ChatRole::Assistant);

    let prompts = augmenter.prompts.lock().unwrap();
    assert!(prompts[0].contains("Disease: Rice Blast"));
}

#[tokio::test]
async fn failed_ask_leaves_history_unchanged() {
    let mut conv = ConversationContext::new(DiagnosisOutcome::not_found("xyz_unknown"));
    let ok = ScriptedAugmenter::new(Reply::Answer("General advice."));
    ask(&ok, &mut conv, "Is this serious?", Duration::from_secs(1))
        .await
        .unwrap();
    let before = conv.history.clone();

    let not_configured = ScriptedAugmenter::new(Reply::NotConfigured);
    let err = ask(&not_configured, &mut conv, "Again?", Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, LeafdocError::AugmentationNotConfigured(_)));
    assert!(!err.is_retryable());
    assert_eq!(conv.history, before);

    let failing = ScriptedAugmenter::new(Reply::CallFailed);
    let err = ask(&failing, &mut conv, "Again?", Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, LeafdocError::AugmentationCallFailed(_)));
    assert!(err.is_retryable());
    assert_eq!(conv.history, before);
}

#[tokio::test]
async fn slow_augmentation_times_out() {
    let mut conv = ConversationContext::new(DiagnosisOutcome::not_found("xyz_unknown"));
    let hanging = ScriptedAugmenter::new(Reply::Hang);
    let timeout = Duration::from_millis(50);
    let err = ask(&hanging, &mut conv, "Hello?", timeout).await.unwrap_err();
    match err {
        LeafdocError::Timeout(d) => assert_eq!(d, timeout),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(conv.history.is_empty());
}
