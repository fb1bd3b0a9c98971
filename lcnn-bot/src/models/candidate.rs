//! Identifiers extracted from an authority record

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateKind {
    /// Direct knowledge-base entity id (QID)
    PrimaryTarget,
    /// Third-party authority id resolvable to an entity (VIAF)
    CrossReference,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateIdentifier {
    pub kind: CandidateKind,
    pub value: String,
}

impl CandidateIdentifier {
    pub fn primary(value: &str) -> Self {
        Self {
            kind: CandidateKind::PrimaryTarget,
            value: value.to_string(),
        }
    }

    pub fn cross_reference(value: &str) -> Self {
        Self {
            kind: CandidateKind::CrossReference,
            value: value.to_string(),
        }
    }
}

/// Output of the identifier extractor.
///
/// Lists keep every match in field order, duplicates included.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedIdentifiers {
    pub primary: Vec<CandidateIdentifier>,
    pub cross_references: Vec<CandidateIdentifier>,
}

impl ExtractedIdentifiers {
    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.cross_references.is_empty()
    }

    /// Distinct primary values, first occurrence order, compared case-insensitively
    pub fn distinct_primary(&self) -> Vec<String> {
        distinct_values(&self.primary)
    }

    pub fn distinct_cross_references(&self) -> Vec<String> {
        distinct_values(&self.cross_references)
    }
}

fn distinct_values(candidates: &[CandidateIdentifier]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for candidate in candidates {
        let value = candidate.value.trim();
        if !seen.iter().any(|s| s.eq_ignore_ascii_case(value)) {
            seen.push(value.to_string());
        }
    }
    seen
}
