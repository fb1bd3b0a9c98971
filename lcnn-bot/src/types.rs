//! Collaborator traits for the reconciliation pipeline
//!
//! Every external system the pipeline talks to sits behind one of these
//! traits. The HTTP clients in `services` implement them for production;
//! tests substitute in-memory fakes.

use serde::{Deserialize, Serialize};

use crate::error::ReconcileResult;
use crate::models::{ClaimSnapshot, Decision, SourceRecord, SourceRecordRef};

/// Identifier returned by the knowledge base for a completed write
/// (statement GUID for claims, snak hash for qualifiers)
pub type AppliedId = String;

/// One page of the change feed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedPage {
    pub records: Vec<SourceRecordRef>,
    /// Items that could not be turned into a reference
    pub rejected: Vec<RejectedItem>,
    pub has_more: bool,
}

/// A feed item with a missing id or unparsable timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedItem {
    /// Record id if it could be read, otherwise the raw object id
    pub record_id: String,
    pub reason: String,
}

/// Paged, ordered source of changed authority records
#[async_trait::async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Fetch page `page` (1-based)
    async fn page(&self, page: u32) -> ReconcileResult<FeedPage>;
}

/// Turns a feed reference into a parsed record
#[async_trait::async_trait]
pub trait RecordFetcher: Send + Sync {
    async fn fetch(&self, reference: &SourceRecordRef) -> ReconcileResult<SourceRecord>;
}

/// Maps a cross-reference id (VIAF) onto a target entity
#[async_trait::async_trait]
pub trait CrossReferenceResolver: Send + Sync {
    /// `None` when no entity, or more than one, carries the cross reference
    async fn resolve(&self, cross_ref: &str) -> ReconcileResult<Option<String>>;
}

/// Current claims of an entity for the tracked property
#[async_trait::async_trait]
pub trait SnapshotFetcher: Send + Sync {
    async fn snapshot(&self, entity_id: &str) -> ReconcileResult<ClaimSnapshot>;
}

/// Executes mutating decisions against the knowledge base
#[async_trait::async_trait]
pub trait MutationApplier: Send + Sync {
    /// Write the decision. Non-mutating decisions are rejected with `Apply`.
    async fn apply(&self, decision: &Decision) -> ReconcileResult<AppliedId>;
}

/// Reverse lookup of the tracked property
#[async_trait::async_trait]
pub trait ClaimIndex: Send + Sync {
    /// Entities whose tracked-property claims include `value`
    async fn holders(&self, value: &str) -> ReconcileResult<Vec<String>>;
}

/// Renders an entity as `label: value` lines for the matcher
#[async_trait::async_trait]
pub trait EntityDescriber: Send + Sync {
    async fn describe(&self, entity_id: &str) -> ReconcileResult<Vec<String>>;
}

/// Shape of the `match` field the model must return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictShape {
    /// `match` is a boolean (one-to-one comparison)
    Boolean,
    /// `match` is a candidate id or `"None"` (one-to-many selection)
    Selection,
}

/// Schema-constrained model request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRequest {
    pub prompt: String,
    pub shape: VerdictShape,
}

/// Language model with JSON-constrained output
#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    /// Returns the raw JSON text of the response; parsing is the caller's job
    async fn generate(&self, request: &ModelRequest) -> ReconcileResult<String>;
}
