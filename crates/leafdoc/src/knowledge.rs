//! The static disease taxonomy.
//!
//! Loaded once from an ordered JSON array and never mutated afterwards. Entry
//! order is preserved so overlapping match candidates resolve identically
//! across runs.

use std::path::Path;

use serde::Deserialize;

use crate::types::{DiseaseEntry, LeafdocError, LeafdocResult, Severity, SolutionStep};

/// Taxonomy shipped with the crate.
const BUILTIN_TAXONOMY: &str = include_str!("../data/diseases.json");

/// On-disk shape of one taxonomy record.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiseaseRecord {
    #[serde(default)]
    canonical_key: Option<String>,
    name: String,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    solutions: Vec<SolutionStep>,
    #[serde(default)]
    prevention: Vec<String>,
    #[serde(default)]
    images: Vec<String>,
}

impl DiseaseRecord {
    fn into_entry(self, index: usize) -> LeafdocResult<DiseaseEntry> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(LeafdocError::KnowledgeBase(format!(
                "Record {index} has an empty name"
            )));
        }

        let severity = match self.severity.as_deref() {
            None => Severity::Medium,
            Some(raw) => Severity::parse(raw).unwrap_or_else(|| {
                tracing::warn!("Unknown severity '{raw}' for '{name}', using medium");
                Severity::Medium
            }),
        };

        let mut solutions = self.solutions;
        solutions.sort_by_key(|s| s.step);

        Ok(DiseaseEntry {
            canonical_key: self
                .canonical_key
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
            name,
            aliases: self
                .aliases
                .into_iter()
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect(),
            description: self.description,
            severity,
            solutions,
            prevention: self.prevention,
            images: self.images,
        })
    }
}

/// Read-only, ordered collection of disease entries.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    entries: Vec<DiseaseEntry>,
}

impl KnowledgeBase {
    /// Parse a JSON array of taxonomy records.
    pub fn from_json_str(json: &str) -> LeafdocResult<Self> {
        let records: Vec<DiseaseRecord> = serde_json::from_str(json)
            .map_err(|e| LeafdocError::KnowledgeBase(format!("Invalid taxonomy JSON: {e}")))?;

        let entries = records
            .into_iter()
            .enumerate()
            .map(|(i, r)| r.into_entry(i))
            .collect::<LeafdocResult<Vec<_>>>()?;

        Ok(Self { entries })
    }

    /// Load a taxonomy file.
    pub fn from_file(path: &Path) -> LeafdocResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            LeafdocError::KnowledgeBase(format!("Failed to read {}: {e}", path.display()))
        })?;
        let kb = Self::from_json_str(&json)?;
        tracing::info!("Loaded {} taxonomy entries from {}", kb.len(), path.display());
        Ok(kb)
    }

    /// The taxonomy embedded in the crate.
    pub fn builtin() -> LeafdocResult<Self> {
        Self::from_json_str(BUILTIN_TAXONOMY)
    }

    /// Entries in load order.
    pub fn entries(&self) -> &[DiseaseEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Labels from `labels` that have no canonical key in the taxonomy.
    pub fn unkeyed_labels<'a>(&self, labels: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
        labels
            .into_iter()
            .filter(|label| {
                !self.entries.iter().any(|e| {
                    e.canonical_key
                        .as_deref()
                        .is_some_and(|k| k.eq_ignore_ascii_case(label))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_taxonomy_loads() {
        let kb = KnowledgeBase::builtin().unwrap();
        assert_eq!(kb.len(), 9);
        let brown = kb.entries().iter().find(|e| e.name == "Brown Spot").unwrap();
        assert!(brown.canonical_key.is_none());
        let steps: Vec<u32> = brown.solutions.iter().map(|s| s.step).collect();
        assert_eq!(steps, vec![1, 2, 3]);
    }

    #[test]
    fn test_minimal_record_defaults() {
        let kb = KnowledgeBase::from_json_str(r#"[{ "name": "Leaf Scald" }]"#).unwrap();
        let entry = &kb.entries()[0];
        assert_eq!(entry.severity, Severity::Medium);
        assert!(entry.canonical_key.is_none());
        assert!(entry.aliases.is_empty());
        assert!(entry.solutions.is_empty());
    }

    #[test]
    fn test_unknown_severity_falls_back() {
        let kb =
            KnowledgeBase::from_json_str(r#"[{ "name": "Sheath Rot", "severity": "apocalyptic" }]"#)
                .unwrap();
        assert_eq!(kb.entries()[0].severity, Severity::Medium);
    }

    #[test]
    fn test_empty_name_rejected() {
        let err = KnowledgeBase::from_json_str(r#"[{ "name": "  " }]"#).unwrap_err();
        assert!(matches!(err, LeafdocError::KnowledgeBase(_)));
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(KnowledgeBase::from_json_str("{ not json").is_err());
    }

    #[test]
    fn test_order_preserved() {
        let kb = KnowledgeBase::from_json_str(
            r#"[{ "name": "Zeta" }, { "name": "Alpha" }, { "name": "Mid" }]"#,
        )
        .unwrap();
        let names: Vec<&str> = kb.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Zeta", "Alpha", "Mid"]);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kb.json");
        std::fs::write(&path, r#"[{ "canonicalKey": "blast", "name": "Rice Blast" }]"#).unwrap();
        let kb = KnowledgeBase::from_file(&path).unwrap();
        assert_eq!(kb.entries()[0].canonical_key.as_deref(), Some("blast"));

        assert!(KnowledgeBase::from_file(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_unkeyed_labels() {
        let kb = KnowledgeBase::builtin().unwrap();
        let missing = kb.unkeyed_labels(["blast", "brown_spot", "normal"]);
        assert_eq!(missing, vec!["brown_spot", "normal"]);
    }
}
