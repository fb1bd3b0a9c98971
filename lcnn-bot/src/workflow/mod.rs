//! Run orchestration
//!
//! The pipeline walks the change feed, reconciles each fresh record version
//! and hands every outcome to the reporter:
//!
//! feed page → ledger dedup → fetch → extract → snapshot → decide (± matcher)
//! → apply → ledger write → report

pub mod entity_locks;
pub mod pipeline;
pub mod reporter;

pub use entity_locks::EntityLocks;
pub use pipeline::{Collaborators, Reconciler, ReconcilerSettings};
pub use reporter::{LogAction, LogEntry, RunReporter};

use serde::Serialize;

use crate::models::Decision;
use crate::types::AppliedId;

/// One-to-one matcher verdict attached to a review item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AutoEval {
    pub same_entity: bool,
    pub reason: String,
}

/// Everything the reporter needs about one processed record version
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordOutcome {
    pub record_id: String,
    pub decision: Decision,
    /// Id returned by the applier for a written mutation
    pub applied_id: Option<AppliedId>,
    /// Error text behind an error flag
    pub error: Option<String>,
    pub auto_eval: Option<AutoEval>,
    /// The ledger now holds this record version
    pub marked_seen: bool,
    /// Ledger write failed after the decision; the version comes round again
    pub ledger_error: Option<String>,
}

impl RecordOutcome {
    pub fn new(record_id: &str, decision: Decision) -> Self {
        Self {
            record_id: record_id.to_string(),
            decision,
            applied_id: None,
            error: None,
            auto_eval: None,
            marked_seen: false,
            ledger_error: None,
        }
    }

    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }
}
