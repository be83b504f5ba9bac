//! leafdoc: plant disease classification, treatment lookup, and grounded follow-up context.

pub mod augment;
pub mod capture;
pub mod config;
pub mod context;
pub mod conversation;
pub mod engine;
pub mod inference;
pub mod knowledge;
pub mod matcher;
pub mod pipeline;
pub mod postprocess;
pub mod preprocess;
pub mod types;

pub use augment::{AugmentationAdapter, GeminiAdapter};
pub use capture::{load_from_base64, load_from_file};
pub use config::EngineConfig;
pub use context::{build_context, ContextBlock};
pub use conversation::{ask, ConversationContext};
pub use engine::DiagnosisEngine;
pub use inference::{ClassLabels, InferenceAdapter, OnnxClassifier};
pub use knowledge::KnowledgeBase;
pub use matcher::{MatchStrategy, RetrievalMatcher};
pub use pipeline::ClassificationPipeline;
pub use preprocess::{encode, Encoding, Tensor};
pub use types::*;
