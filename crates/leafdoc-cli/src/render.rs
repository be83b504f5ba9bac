//! Terminal rendering of diagnosis outcomes.

use leafdoc::{ClassificationResult, DiagnosisOutcome};

/// How many runner-up classes to list.
const TOP_CLASSES: usize = 3;

/// Render an outcome for a terminal.
pub fn render_outcome(outcome: &DiagnosisOutcome) -> String {
    let mut out = String::new();

    if let Some(c) = &outcome.classification {
        out.push_str(&format!(
            "  Prediction: {} ({:.1}%, {})\n",
            c.label,
            c.confidence * 100.0,
            c.encoding
        ));
        if c.low_confidence {
            out.push_str("  \x1b[33mLow confidence\x1b[0m: retake the photo in good light, leaf filling the frame.\n");
        }
        out.push_str(&render_probabilities(c, TOP_CLASSES));
    }

    match (&outcome.entry, outcome.found) {
        (Some(entry), true) if outcome.is_healthy() => {
            out.push_str(&format!("\n  \x1b[32m{}\x1b[0m\n", entry.name));
            out.push_str(&format!("  {}\n", entry.description));
        }
        (Some(entry), true) => {
            out.push_str(&format!("\n  \x1b[1m{}\x1b[0m  (severity: {})\n", entry.name, entry.severity));
            if !entry.description.is_empty() {
                out.push_str(&format!("  {}\n", entry.description));
            }
            if !entry.solutions.is_empty() {
                out.push_str("\n  Treatment:\n");
                for s in &entry.solutions {
                    out.push_str(&format!("    {}. {}: {}\n", s.step, s.title, s.description));
                }
            }
            if !entry.prevention.is_empty() {
                out.push_str("\n  Prevention:\n");
                for tip in &entry.prevention {
                    out.push_str(&format!("    - {tip}\n"));
                }
            }
        }
        _ => {
            out.push_str(&format!(
                "\n  No reference entry for '{}'. Consult a local extension officer.\n",
                outcome.label
            ));
        }
    }

    out
}

/// Render the top `n` classes as a short table.
pub fn render_probabilities(result: &ClassificationResult, n: usize) -> String {
    let mut out = String::new();
    for p in result.probabilities.iter().take(n) {
        out.push_str(&format!("    {:<28} {:>6.2}%\n", p.label, p.probability * 100.0));
    }
    out
}
