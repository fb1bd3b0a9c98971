//! Applier that writes nothing
//!
//! Used for `--dry-run`: every mutation is logged and acknowledged with a
//! synthetic id, so the pipeline and report behave as in a real run.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{ReconcileError, ReconcileResult};
use crate::models::Decision;
use crate::types::{AppliedId, MutationApplier};

#[derive(Debug, Default)]
pub struct DryRunApplier {
    applied: AtomicU64,
}

impl DryRunApplier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutations acknowledged so far
    pub fn applied_count(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl MutationApplier for DryRunApplier {
    async fn apply(&self, decision: &Decision) -> ReconcileResult<AppliedId> {
        if !decision.is_mutation() {
            return Err(ReconcileError::Apply(format!("{} is not a write", decision.kind().as_str())));
        }

        let n = self.applied.fetch_add(1, Ordering::Relaxed) + 1;
        let target = decision.target().unwrap_or_default();
        tracing::info!(qid = %target, kind = decision.kind().as_str(), decision = ?decision, "[dry run] would write");
        Ok(format!("dry-run-{}-{}", target, n))
    }
}
