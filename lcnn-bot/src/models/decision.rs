//! Reconciliation decisions
//!
//! A `Decision` is the engine's only output. It is produced once, consumed
//! once by the mutation applier and archived by the run reporter, so each
//! variant carries everything both need without re-deriving context.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    NoOp,
    /// Create the identifier claim with a named-as qualifier
    AddClaim {
        target: String,
        value: String,
        named_as: String,
    },
    /// Attach a named-as qualifier to an existing claim
    AddQualifier {
        target: String,
        claim_id: Option<String>,
        claim_value: String,
        qualifier_value: String,
    },
    /// Replace one named-as qualifier on an existing claim
    UpdateQualifier {
        target: String,
        claim_id: Option<String>,
        claim_value: String,
        old_qualifier_value: String,
        old_qualifier_hash: Option<String>,
        new_qualifier_value: String,
    },
    FlagForReview {
        target: Option<String>,
        reason: ReviewReason,
    },
    /// A cross-referenced entity carries no identifier claim yet
    SuggestCrossReference {
        cross_ref_value: String,
        target: String,
    },
    FlagAmbiguousTarget {
        candidate_values: Vec<String>,
        ambiguity: AmbiguityKind,
    },
}

/// Why a record needs a human
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReviewReason {
    /// Target already has claims for the property, none with this record's id
    ClaimMismatch,
    /// The language model rejected every candidate
    AiNoMatch,
    /// Reads kept failing after retries
    TransientFailure,
    /// The knowledge base refused a write
    ApplyRejected,
    /// The record payload could not be parsed
    MalformedInput,
    /// Ledger lookup failed, record not processed
    LedgerUnavailable,
}

impl ReviewReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewReason::ClaimMismatch => "claim-mismatch",
            ReviewReason::AiNoMatch => "ai-no-match",
            ReviewReason::TransientFailure => "transient-failure",
            ReviewReason::ApplyRejected => "apply-rejected",
            ReviewReason::MalformedInput => "malformed-input",
            ReviewReason::LedgerUnavailable => "ledger-unavailable",
        }
    }

    /// Reasons whose record should be marked seen (retrying will not help)
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            ReviewReason::ClaimMismatch | ReviewReason::AiNoMatch | ReviewReason::MalformedInput
        )
    }
}

impl fmt::Display for ReviewReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityKind {
    /// The record cites more than one target entity
    MultipleCandidates,
    /// Cross references resolve to more than one entity
    MultipleCrossReferenceTargets,
    /// More than one entity carries this record's id after writing
    MultiLccnInWiki,
}

/// Payload-free discriminant, used for counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    NoOp,
    AddClaim,
    AddQualifier,
    UpdateQualifier,
    FlagForReview,
    SuggestCrossReference,
    FlagAmbiguousTarget,
}

impl DecisionKind {
    pub const ALL: [DecisionKind; 7] = [
        DecisionKind::NoOp,
        DecisionKind::AddClaim,
        DecisionKind::AddQualifier,
        DecisionKind::UpdateQualifier,
        DecisionKind::FlagForReview,
        DecisionKind::SuggestCrossReference,
        DecisionKind::FlagAmbiguousTarget,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::NoOp => "no_op",
            DecisionKind::AddClaim => "add_claim",
            DecisionKind::AddQualifier => "add_qualifier",
            DecisionKind::UpdateQualifier => "update_qualifier",
            DecisionKind::FlagForReview => "flag_for_review",
            DecisionKind::SuggestCrossReference => "suggest_cross_reference",
            DecisionKind::FlagAmbiguousTarget => "flag_ambiguous_target",
        }
    }
}

impl Decision {
    pub fn kind(&self) -> DecisionKind {
        match self {
            Decision::NoOp => DecisionKind::NoOp,
            Decision::AddClaim { .. } => DecisionKind::AddClaim,
            Decision::AddQualifier { .. } => DecisionKind::AddQualifier,
            Decision::UpdateQualifier { .. } => DecisionKind::UpdateQualifier,
            Decision::FlagForReview { .. } => DecisionKind::FlagForReview,
            Decision::SuggestCrossReference { .. } => DecisionKind::SuggestCrossReference,
            Decision::FlagAmbiguousTarget { .. } => DecisionKind::FlagAmbiguousTarget,
        }
    }

    /// True for decisions the applier writes to the knowledge base
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Decision::AddClaim { .. } | Decision::AddQualifier { .. } | Decision::UpdateQualifier { .. }
        )
    }

    /// Entity the decision is about, when there is exactly one
    pub fn target(&self) -> Option<&str> {
        match self {
            Decision::AddClaim { target, .. }
            | Decision::AddQualifier { target, .. }
            | Decision::UpdateQualifier { target, .. }
            | Decision::SuggestCrossReference { target, .. } => Some(target),
            Decision::FlagForReview { target, .. } => target.as_deref(),
            Decision::NoOp | Decision::FlagAmbiguousTarget { .. } => None,
        }
    }

    pub fn review(target: Option<&str>, reason: ReviewReason) -> Self {
        Decision::FlagForReview {
            target: target.map(str::to_string),
            reason,
        }
    }

    /// Whether reaching this decision lets the ledger mark the record version as seen
    pub fn is_terminal_for_ledger(&self) -> bool {
        match self {
            Decision::FlagForReview { reason, .. } => reason.is_final(),
            _ => true,
        }
    }
}
