//! Per-record pipeline state machine
//!
//! Pending → Snapshotted → Decided → Applied. The ledger may only be written
//! once a record reaches a terminal stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Decision;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordStage {
    /// Record fetched, nothing read from the knowledge base yet
    Pending,
    /// Target claims fetched
    Snapshotted,
    /// Decision computed, not yet written
    Decided,
    /// Mutation written (or nothing to write)
    Applied,
    /// Processing stopped with a flag that must be retried next run
    Abandoned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTransition {
    pub record_id: String,
    pub old_stage: RecordStage,
    pub new_stage: RecordStage,
    pub transitioned_at: DateTime<Utc>,
}

/// Tracks one record version through the pipeline
#[derive(Debug, Clone)]
pub struct RecordProgress {
    pub record_id: String,
    pub stage: RecordStage,
    pub decision: Option<Decision>,
    transitions: Vec<StageTransition>,
}

impl RecordProgress {
    pub fn new(record_id: &str) -> Self {
        Self {
            record_id: record_id.to_string(),
            stage: RecordStage::Pending,
            decision: None,
            transitions: Vec::new(),
        }
    }

    pub fn transition_to(&mut self, new_stage: RecordStage) -> StageTransition {
        let transition = StageTransition {
            record_id: self.record_id.clone(),
            old_stage: self.stage,
            new_stage,
            transitioned_at: Utc::now(),
        };
        self.stage = new_stage;
        self.transitions.push(transition.clone());

        tracing::trace!(
            lccn = %self.record_id,
            from = ?transition.old_stage,
            to = ?new_stage,
            "Record stage transition"
        );

        transition
    }

    /// Store the decision and move to `Decided`
    pub fn decided(&mut self, decision: Decision) {
        self.decision = Some(decision);
        self.transition_to(RecordStage::Decided);
    }

    /// Final stage for the held decision: non-mutations that need no retry
    /// count as applied, retryable flags are abandoned.
    pub fn finish_without_write(&mut self) {
        let terminal = self
            .decision
            .as_ref()
            .map(Decision::is_terminal_for_ledger)
            .unwrap_or(false);
        if terminal {
            self.transition_to(RecordStage::Applied);
        } else {
            self.transition_to(RecordStage::Abandoned);
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.stage, RecordStage::Applied | RecordStage::Abandoned)
    }

    /// The ledger write gate
    pub fn may_mark_seen(&self) -> bool {
        self.stage == RecordStage::Applied
    }

    pub fn transitions(&self) -> &[StageTransition] {
        &self.transitions
    }
}
