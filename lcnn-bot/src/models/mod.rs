//! Data models for lcnn-bot
//!
//! - Source records and their fields as read from the change feed
//! - Claim snapshots of target entities
//! - Decisions and the per-record pipeline stage

pub mod candidate;
pub mod claims;
pub mod decision;
pub mod record_stage;
pub mod source_record;

pub use candidate::{CandidateIdentifier, CandidateKind, ExtractedIdentifiers};
pub use claims::{Claim, ClaimSnapshot, Qualifier};
pub use decision::{AmbiguityKind, Decision, DecisionKind, ReviewReason};
pub use record_stage::{RecordProgress, RecordStage, StageTransition};
pub use source_record::{ledger_key, RawField, SourceRecord, SourceRecordRef, Subfield};
