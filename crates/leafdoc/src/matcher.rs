//! Label-to-taxonomy matching via an ordered cascade of strategies.

use std::sync::Arc;

use crate::knowledge::KnowledgeBase;
use crate::postprocess::DEFAULT_HEALTHY_LABEL;
use crate::types::{DiagnosisOutcome, DiseaseEntry};

/// Lowercase, treat `_` as a space, and collapse runs of whitespace.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether two labels name the same class once normalized.
pub fn same_label(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

/// One step of the match cascade.
pub trait MatchStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Return the first entry, in taxonomy order, that this strategy accepts.
    fn attempt<'a>(&self, label: &str, kb: &'a KnowledgeBase) -> Option<&'a DiseaseEntry>;
}

/// Exact, case-insensitive match on the canonical key.
pub struct CanonicalKeyMatch;

impl MatchStrategy for CanonicalKeyMatch {
    fn name(&self) -> &'static str {
        "canonical_key"
    }

    fn attempt<'a>(&self, label: &str, kb: &'a KnowledgeBase) -> Option<&'a DiseaseEntry> {
        let label = label.trim();
        if label.is_empty() {
            return None;
        }
        kb.entries().iter().find(|e| {
            e.canonical_key
                .as_deref()
                .is_some_and(|k| k.eq_ignore_ascii_case(label))
        })
    }
}

/// Exact match on the display name, `_` and space interchangeable.
pub struct DisplayNameMatch;

impl MatchStrategy for DisplayNameMatch {
    fn name(&self) -> &'static str {
        "display_name"
    }

    fn attempt<'a>(&self, label: &str, kb: &'a KnowledgeBase) -> Option<&'a DiseaseEntry> {
        let label = normalize(label);
        if label.is_empty() {
            return None;
        }
        kb.entries().iter().find(|e| normalize(&e.name) == label)
    }
}

/// Equality or substring containment, either direction, on name or any alias.
pub struct FuzzyMatch;

impl FuzzyMatch {
    fn overlaps(candidate: &str, label: &str) -> bool {
        let candidate = normalize(candidate);
        !candidate.is_empty()
            && (candidate == label || candidate.contains(label) || label.contains(&candidate))
    }
}

impl MatchStrategy for FuzzyMatch {
    fn name(&self) -> &'static str {
        "fuzzy"
    }

    fn attempt<'a>(&self, label: &str, kb: &'a KnowledgeBase) -> Option<&'a DiseaseEntry> {
        let label = normalize(label);
        if label.is_empty() {
            return None;
        }
        kb.entries().iter().find(|e| {
            std::iter::once(&e.name)
                .chain(e.aliases.iter())
                .any(|c| Self::overlaps(c, &label))
        })
    }
}

/// The default cascade, in priority order.
pub fn default_strategies() -> Vec<Box<dyn MatchStrategy>> {
    vec![
        Box::new(CanonicalKeyMatch),
        Box::new(DisplayNameMatch),
        Box::new(FuzzyMatch),
    ]
}

/// Maps classification labels to taxonomy entries.
pub struct RetrievalMatcher {
    kb: Arc<KnowledgeBase>,
    strategies: Vec<Box<dyn MatchStrategy>>,
    healthy_label: String,
}

impl RetrievalMatcher {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self {
            kb,
            strategies: default_strategies(),
            healthy_label: DEFAULT_HEALTHY_LABEL.to_string(),
        }
    }

    pub fn with_healthy_label(mut self, healthy_label: &str) -> Self {
        self.healthy_label = healthy_label.to_string();
        self
    }

    /// Replace the cascade. Strategies run in the order given.
    pub fn with_strategies(mut self, strategies: Vec<Box<dyn MatchStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn knowledge_base(&self) -> &KnowledgeBase {
        &self.kb
    }

    pub fn is_healthy(&self, label: &str) -> bool {
        same_label(label, &self.healthy_label)
    }

    /// Look a label up. A miss is a `found = false` outcome, never an error.
    pub fn match_label(&self, label: &str) -> DiagnosisOutcome {
        if self.is_healthy(label) {
            return DiagnosisOutcome::healthy(label);
        }

        for strategy in &self.strategies {
            if let Some(entry) = strategy.attempt(label, &self.kb) {
                tracing::debug!(
                    label,
                    strategy = strategy.name(),
                    entry = %entry.name,
                    "Matched taxonomy entry"
                );
                return DiagnosisOutcome::matched(label, entry.clone());
            }
        }

        tracing::debug!(label, "No taxonomy entry matched");
        DiagnosisOutcome::not_found(label)
    }
}
