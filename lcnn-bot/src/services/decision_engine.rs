//! Reconciliation decision engine
//!
//! Pure functions from (record, candidates, snapshot) to a [`Decision`].
//! Nothing here performs I/O: the pipeline fetches snapshots and resolves
//! cross references, then hands the results in.
//!
//! Case analysis on the number `n` of distinct primary candidates:
//! - `n = 0`: fall back to cross references
//! - `n = 1`: compare the target's claims with the record's own id
//! - `n > 1`: refuse to guess

use crate::models::{AmbiguityKind, ClaimSnapshot, Decision, ExtractedIdentifiers, ReviewReason, SourceRecord};

/// How the pipeline should proceed for a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// No primary candidate; try these cross references (possibly none)
    CrossReferences(Vec<String>),
    /// Exactly one primary candidate
    SingleTarget(String),
    /// Several distinct primary candidates
    Ambiguous(Vec<String>),
}

/// Pick the case from the extracted identifiers
pub fn plan(extracted: &ExtractedIdentifiers) -> Plan {
    let mut primary = extracted.distinct_primary();
    match primary.len() {
        0 => Plan::CrossReferences(extracted.distinct_cross_references()),
        1 => Plan::SingleTarget(primary.remove(0)),
        _ => Plan::Ambiguous(primary),
    }
}

/// Case `n > 1`
pub fn decide_ambiguous(candidate_values: Vec<String>) -> Decision {
    Decision::FlagAmbiguousTarget {
        candidate_values,
        ambiguity: AmbiguityKind::MultipleCandidates,
    }
}

/// Case `n = 1`: the record names `target`, whose current claims are `snapshot`.
///
/// The claim searched for is the record's own id, not the target id.
/// `named_as_property` is the qualifier carrying the authorized heading.
pub fn decide_for_target(
    record: &SourceRecord,
    target: &str,
    snapshot: &ClaimSnapshot,
    named_as_property: &str,
) -> Decision {
    if snapshot.is_empty() {
        return Decision::AddClaim {
            target: target.to_string(),
            value: record.record_id.clone(),
            named_as: record.preferred_label.clone(),
        };
    }

    let Some(claim) = snapshot.find_claim(&record.record_id) else {
        return Decision::review(Some(target), ReviewReason::ClaimMismatch);
    };

    let label = record.preferred_label.trim();
    let mut named_as = claim.qualifiers_for(named_as_property).peekable();

    if named_as.peek().is_none() {
        return Decision::AddQualifier {
            target: target.to_string(),
            claim_id: claim.claim_id.clone(),
            claim_value: claim.value.clone(),
            qualifier_value: record.preferred_label.clone(),
        };
    }

    // Only the first differing entry is replaced; any others stay as they are
    match named_as.find(|q| q.value.trim() != label) {
        Some(stale) => Decision::UpdateQualifier {
            target: target.to_string(),
            claim_id: claim.claim_id.clone(),
            claim_value: claim.value.clone(),
            old_qualifier_value: stale.value.clone(),
            old_qualifier_hash: stale.hash.clone(),
            new_qualifier_value: record.preferred_label.clone(),
        },
        None => Decision::NoOp,
    }
}

/// Outcome of resolving a record's cross references
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrossReferenceResolution {
    /// Nothing resolved
    Unresolved,
    /// All resolved cross references point at one entity
    Single { cross_ref_value: String, target: String },
    /// Resolved cross references disagree
    Multiple(Vec<String>),
}

/// Fold per-cross-reference lookups (`(value, resolved target)`) into one outcome
pub fn classify_cross_references(resolved: &[(String, Option<String>)]) -> CrossReferenceResolution {
    let mut targets: Vec<(&str, &str)> = Vec::new();
    for (cross_ref, target) in resolved {
        if let Some(target) = target {
            if !targets.iter().any(|(_, t)| t.eq_ignore_ascii_case(target)) {
                targets.push((cross_ref.as_str(), target.as_str()));
            }
        }
    }

    match targets.as_slice() {
        [] => CrossReferenceResolution::Unresolved,
        [(cross_ref, target)] => CrossReferenceResolution::Single {
            cross_ref_value: cross_ref.to_string(),
            target: target.to_string(),
        },
        many => CrossReferenceResolution::Multiple(many.iter().map(|(_, t)| t.to_string()).collect()),
    }
}

/// Case `n = 0` once the resolution is known.
///
/// `snapshot` is the resolved entity's claims, required for `Single`.
pub fn decide_cross_reference(
    resolution: &CrossReferenceResolution,
    snapshot: Option<&ClaimSnapshot>,
) -> Decision {
    match resolution {
        CrossReferenceResolution::Unresolved => Decision::NoOp,
        CrossReferenceResolution::Multiple(targets) => Decision::FlagAmbiguousTarget {
            candidate_values: targets.clone(),
            ambiguity: AmbiguityKind::MultipleCrossReferenceTargets,
        },
        CrossReferenceResolution::Single { cross_ref_value, target } => match snapshot {
            Some(snapshot) if snapshot.is_empty() => Decision::SuggestCrossReference {
                cross_ref_value: cross_ref_value.clone(),
                target: target.clone(),
            },
            _ => Decision::NoOp,
        },
    }
}

/// Post-write consistency: one decision, keyed by record id, per id held by
/// more than one entity
pub fn decide_duplicates(holders_by_id: &[(String, Vec<String>)]) -> Vec<(String, Decision)> {
    holders_by_id
        .iter()
        .filter(|(_, holders)| holders.len() > 1)
        .map(|(record_id, holders)| {
            (
                record_id.clone(),
                Decision::FlagAmbiguousTarget {
                    candidate_values: holders.clone(),
                    ambiguity: AmbiguityKind::MultiLccnInWiki,
                },
            )
        })
        .collect()
}
