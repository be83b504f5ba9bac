//! Plain-text context blocks for grounding follow-up questions.

use serde::{Deserialize, Serialize};

use crate::types::DiagnosisOutcome;

/// Upper bound on context size in characters.
pub const MAX_CONTEXT_CHARS: usize = 4000;

const TRUNCATION_MARKER: &str = "\n[context truncated]";

/// Used whenever no taxonomy entry matched.
pub const NO_MATCH_DISCLAIMER: &str = "No matching disease was found in the reference library for this photo. \
Do not name or describe any specific disease. Offer only general plant-care guidance, \
suggest retaking the photo in good light with the affected leaf filling the frame, \
and recommend consulting a local agricultural extension officer.";

/// A bounded context block and whether it carries taxonomy content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBlock {
    pub text: String,
    pub grounded: bool,
}

/// Build the context block for an outcome.
pub fn build_context(outcome: &DiagnosisOutcome) -> ContextBlock {
    let entry = match (&outcome.entry, outcome.found) {
        (Some(entry), true) => entry,
        _ => {
            return ContextBlock {
                text: NO_MATCH_DISCLAIMER.to_string(),
                grounded: false,
            }
        }
    };

    let mut text = String::new();
    text.push_str(&format!("Disease: {}\n", entry.name));
    text.push_str(&format!("Severity: {}\n", entry.severity));
    if !entry.description.is_empty() {
        text.push_str(&format!("Description: {}\n", entry.description));
    }

    if let Some(c) = &outcome.classification {
        text.push_str(&format!(
            "Classifier confidence: {:.0}%\n",
            c.confidence * 100.0
        ));
        if c.low_confidence {
            text.push_str("Note: the classifier is not confident in this result.\n");
        }
    }

    if !entry.solutions.is_empty() {
        text.push_str("\nTreatment steps:\n");
        for s in &entry.solutions {
            text.push_str(&format!("{}. {}: {}\n", s.step, s.title, s.description));
        }
    }

    if !entry.prevention.is_empty() {
        text.push_str("\nPrevention:\n");
        for tip in &entry.prevention {
            text.push_str(&format!("- {tip}\n"));
        }
    }

    ContextBlock {
        text: truncate_chars(text.trim_end(), MAX_CONTEXT_CHARS),
        grounded: true,
    }
}

/// Truncate to at most `max` characters, ending with a marker when cut.
fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(TRUNCATION_MARKER.chars().count());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}
