//! Reconciliation pipeline
//!
//! Walks the change feed page by page. Record versions already in the
//! ledger are skipped; the rest run concurrently through
//! fetch → extract → snapshot → decide → apply with a bounded worker pool.
//!
//! # Error handling
//! - Per-record isolation: a failing record becomes a flagged outcome, the
//!   run continues
//! - Reads are retried with backoff inside the HTTP clients, once; the
//!   pipeline never retries on top of them, and writes are never retried
//! - The ledger is written only for records whose progress reached
//!   `Applied`, so retryable failures are picked up by the next run

use chrono::Utc;
use futures::stream::{self, StreamExt};
use lcnn_common::config::TomlConfig;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{AutoEval, EntityLocks, RecordOutcome, RunReporter};
use crate::db::Ledger;
use crate::error::ReconcileError;
use crate::models::{Decision, RecordProgress, RecordStage, ReviewReason, SourceRecord, SourceRecordRef};
use crate::services::decision_engine::{self, CrossReferenceResolution, Plan};
use crate::services::identifier_extractor;
use crate::services::{AiMatcher, Verdict};
use crate::types::{ChangeFeed, ClaimIndex, CrossReferenceResolver, MutationApplier, RecordFetcher, SnapshotFetcher};

/// External systems the pipeline talks to
#[derive(Clone)]
pub struct Collaborators {
    pub feed: Arc<dyn ChangeFeed>,
    pub fetcher: Arc<dyn RecordFetcher>,
    pub resolver: Arc<dyn CrossReferenceResolver>,
    pub snapshots: Arc<dyn SnapshotFetcher>,
    pub applier: Arc<dyn MutationApplier>,
    pub claim_index: Arc<dyn ClaimIndex>,
    /// `None` when the language model is disabled
    pub matcher: Option<AiMatcher>,
}

/// Pipeline tuning
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub workers: usize,
    pub max_pages: u32,
    /// Qualifier carrying the authorized heading
    pub named_as_property: String,
    /// Pause before the duplicate-claim query
    pub consistency_delay: Duration,
    /// Annotate single-target review items with a one-to-one verdict
    pub auto_eval: bool,
    /// Write processed versions to the ledger; off for dry runs so a later
    /// real run still sees them
    pub mark_seen: bool,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self::from_config(&TomlConfig::default())
    }
}

impl ReconcilerSettings {
    pub fn from_config(config: &TomlConfig) -> Self {
        Self {
            workers: config.pipeline.workers.max(1),
            max_pages: config.feed.max_pages,
            named_as_property: config.wikibase.named_as_qualifier.clone(),
            consistency_delay: Duration::from_secs(config.pipeline.consistency_delay_secs),
            auto_eval: config.ai.enabled,
            mark_seen: true,
        }
    }
}

/// Result of reconciling one record, before the ledger write
struct Reconciled {
    progress: RecordProgress,
    decision: Decision,
    applied_id: Option<String>,
    error: Option<String>,
    auto_eval: Option<AutoEval>,
}

impl Reconciled {
    /// Decision reached without any write
    fn without_write(mut progress: RecordProgress, decision: Decision, error: Option<String>) -> Self {
        progress.decided(decision.clone());
        progress.finish_without_write();
        Self {
            progress,
            decision,
            applied_id: None,
            error,
            auto_eval: None,
        }
    }
}

/// Flag for a failed read or write against `target`
fn failure_decision(target: Option<&str>, err: &ReconcileError) -> Decision {
    let reason = match err {
        ReconcileError::MalformedInput(_) => ReviewReason::MalformedInput,
        ReconcileError::Apply(_) => ReviewReason::ApplyRejected,
        ReconcileError::Ledger(_) => ReviewReason::LedgerUnavailable,
        _ => ReviewReason::TransientFailure,
    };
    Decision::review(target, reason)
}

pub struct Reconciler {
    collaborators: Collaborators,
    ledger: Ledger,
    locks: EntityLocks,
    settings: ReconcilerSettings,
}

impl Reconciler {
    pub fn new(collaborators: Collaborators, ledger: Ledger, settings: ReconcilerSettings) -> Self {
        Self {
            collaborators,
            ledger,
            locks: EntityLocks::new(),
            settings,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Decide (and apply) for one fetched record. No ledger access.
    pub async fn process_record(&self, record: &SourceRecord) -> Decision {
        self.reconcile(record).await.decision
    }

    /// Walk the feed until it runs out, `max_pages` is reached or `cancel` fires
    pub async fn run(&self, cancel: &CancellationToken, reporter: &mut RunReporter) {
        let mut recently_added: Vec<String> = Vec::new();

        for page_number in 1..=self.settings.max_pages {
            if cancel.is_cancelled() {
                info!(page = page_number, "Run cancelled, not fetching further pages");
                break;
            }

            let page = match self.collaborators.feed.page(page_number).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(page = page_number, error = %e, "Feed page unavailable, ending run early");
                    break;
                }
            };

            info!(
                page = page_number,
                records = page.records.len(),
                rejected = page.rejected.len(),
                "Feed page"
            );

            for rejected in &page.rejected {
                reporter.record(
                    RecordOutcome::new(&rejected.record_id, Decision::review(None, ReviewReason::MalformedInput))
                        .with_error(&rejected.reason),
                );
            }

            let fresh = self.fresh_references(page.records, reporter).await;
            let outcomes: Vec<Option<RecordOutcome>> = stream::iter(fresh)
                .map(|reference| self.process_reference(reference, cancel))
                .buffer_unordered(self.settings.workers)
                .collect()
                .await;

            for outcome in outcomes {
                match outcome {
                    Some(outcome) => {
                        if outcome.applied_id.is_some() && matches!(outcome.decision, Decision::AddClaim { .. }) {
                            recently_added.push(outcome.record_id.clone());
                        }
                        reporter.record(outcome);
                    }
                    None => reporter.record_cancelled(),
                }
            }

            if !page.has_more {
                debug!(page = page_number, "Feed has no more pages");
                break;
            }
        }

        if !recently_added.is_empty() {
            for (record_id, decision) in self.check_for_duplicate_claims(&recently_added).await {
                reporter.record(RecordOutcome::new(&record_id, decision));
            }
        }
    }

    /// Drop references already in the ledger (or repeated on the page)
    async fn fresh_references(&self, references: Vec<SourceRecordRef>, reporter: &mut RunReporter) -> Vec<SourceRecordRef> {
        let mut keys = HashSet::new();
        let mut fresh = Vec::with_capacity(references.len());

        for reference in references {
            let key = reference.ledger_key();
            if !keys.insert(key.clone()) {
                continue;
            }
            match self.ledger.seen(&key).await {
                Ok(true) => {
                    debug!(lccn = %reference.record_id, "Already processed, skipping");
                    reporter.record_already_seen();
                }
                Ok(false) => fresh.push(reference),
                Err(e) => {
                    warn!(lccn = %reference.record_id, error = %e, "Ledger lookup failed");
                    reporter.record(
                        RecordOutcome::new(&reference.record_id, Decision::review(None, ReviewReason::LedgerUnavailable))
                            .with_error(e),
                    );
                }
            }
        }
        fresh
    }

    /// Fetch, reconcile and (when terminal) mark one record version seen.
    /// `None` when cancelled before starting.
    async fn process_reference(&self, reference: SourceRecordRef, cancel: &CancellationToken) -> Option<RecordOutcome> {
        if cancel.is_cancelled() {
            return None;
        }

        let fetched = self.collaborators.fetcher.fetch(&reference).await;

        let reconciled = match fetched {
            Ok(record) => self.reconcile(&record).await,
            Err(e) => {
                warn!(lccn = %reference.record_id, error = %e, "Record fetch failed");
                Reconciled::without_write(
                    RecordProgress::new(&reference.record_id),
                    failure_decision(None, &e),
                    Some(e.to_string()),
                )
            }
        };

        let mut outcome = RecordOutcome {
            record_id: reference.record_id.clone(),
            decision: reconciled.decision,
            applied_id: reconciled.applied_id,
            error: reconciled.error,
            auto_eval: reconciled.auto_eval,
            marked_seen: false,
            ledger_error: None,
        };

        if self.settings.mark_seen && reconciled.progress.may_mark_seen() {
            match self.ledger.record(&reference.ledger_key(), &reference.record_id, Utc::now()).await {
                Ok(()) => outcome.marked_seen = true,
                Err(e) => {
                    // The write stands; only the ledger entry is missing
                    warn!(lccn = %reference.record_id, error = %e, "Ledger write failed, version will be seen again");
                    outcome.ledger_error = Some(e.to_string());
                }
            }
        }

        Some(outcome)
    }

    async fn reconcile(&self, record: &SourceRecord) -> Reconciled {
        let progress = RecordProgress::new(&record.record_id);
        let extracted = identifier_extractor::extract(&record.raw_fields);

        if identifier_extractor::mentions_knowledge_base(&record.raw_fields, &extracted) {
            warn!(lccn = %record.record_id, "Record mentions the knowledge base but no identifier matched");
        }

        match decision_engine::plan(&extracted) {
            Plan::SingleTarget(target) => self.decide_and_apply(record, &target, progress).await,
            Plan::Ambiguous(candidates) => {
                debug!(lccn = %record.record_id, candidates = ?candidates, "Record cites several entities");
                let flag = decision_engine::decide_ambiguous(candidates.clone());
                self.resolve_with_matcher(record, &candidates, flag, progress).await
            }
            Plan::CrossReferences(cross_refs) => self.reconcile_cross_references(record, &cross_refs, progress).await,
        }
    }

    /// Case 1: no primary candidate
    async fn reconcile_cross_references(
        &self,
        record: &SourceRecord,
        cross_refs: &[String],
        progress: RecordProgress,
    ) -> Reconciled {
        if cross_refs.is_empty() {
            return Reconciled::without_write(progress, Decision::NoOp, None);
        }

        let mut resolved = Vec::with_capacity(cross_refs.len());
        for cross_ref in cross_refs {
            match self.collaborators.resolver.resolve(cross_ref).await {
                Ok(target) => resolved.push((cross_ref.clone(), target)),
                Err(e) => {
                    warn!(lccn = %record.record_id, viaf = %cross_ref, error = %e, "Cross reference lookup failed");
                    return Reconciled::without_write(progress, failure_decision(None, &e), Some(e.to_string()));
                }
            }
        }

        let resolution = decision_engine::classify_cross_references(&resolved);
        match &resolution {
            CrossReferenceResolution::Unresolved => Reconciled::without_write(progress, Decision::NoOp, None),
            CrossReferenceResolution::Multiple(targets) => {
                let flag = decision_engine::decide_cross_reference(&resolution, None);
                let targets = targets.clone();
                self.resolve_with_matcher(record, &targets, flag, progress).await
            }
            CrossReferenceResolution::Single { target, .. } => {
                let mut progress = progress;
                let snapshot = match self.fetch_snapshot(target).await {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        let decision = failure_decision(Some(target), &e);
                        return Reconciled::without_write(progress, decision, Some(e.to_string()));
                    }
                };
                progress.transition_to(RecordStage::Snapshotted);

                let decision = decision_engine::decide_cross_reference(&resolution, Some(&snapshot));
                let mut reconciled = Reconciled::without_write(progress, decision, None);
                if matches!(reconciled.decision, Decision::SuggestCrossReference { .. }) {
                    reconciled.auto_eval = self.auto_evaluate(record, target).await;
                }
                reconciled
            }
        }
    }

    /// Ask the matcher to pick among `candidates`; keep `flag` when it cannot
    async fn resolve_with_matcher(
        &self,
        record: &SourceRecord,
        candidates: &[String],
        flag: Decision,
        progress: RecordProgress,
    ) -> Reconciled {
        let Some(matcher) = &self.collaborators.matcher else {
            return Reconciled::without_write(progress, flag, None);
        };

        match matcher.select(record, candidates).await {
            Ok(outcome) => match outcome.verdict {
                Verdict::Selected(target) => {
                    info!(lccn = %record.record_id, qid = %target, reason = %outcome.reason, "Matcher selected a candidate");
                    self.decide_and_apply(record, &target, progress).await
                }
                Verdict::NoneSelected | Verdict::SameEntity(false) => {
                    info!(lccn = %record.record_id, reason = %outcome.reason, "Matcher rejected every candidate");
                    let decision = Decision::review(None, ReviewReason::AiNoMatch);
                    let mut reconciled = Reconciled::without_write(progress, decision, None);
                    reconciled.error = Some(outcome.reason);
                    reconciled
                }
                Verdict::SameEntity(true) => Reconciled::without_write(progress, flag, None),
            },
            Err(e) => {
                warn!(lccn = %record.record_id, error = %e, "Matcher failed, keeping the ambiguity flag");
                Reconciled::without_write(progress, flag, None)
            }
        }
    }

    /// Case 2: exactly one target. Holds the entity lock from snapshot to apply.
    async fn decide_and_apply(&self, record: &SourceRecord, target: &str, mut progress: RecordProgress) -> Reconciled {
        let _guard = self.locks.lock(target).await;

        let snapshot = match self.fetch_snapshot(target).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(lccn = %record.record_id, qid = %target, error = %e, "Snapshot fetch failed");
                return Reconciled::without_write(progress, failure_decision(Some(target), &e), Some(e.to_string()));
            }
        };
        progress.transition_to(RecordStage::Snapshotted);

        let decision = decision_engine::decide_for_target(record, target, &snapshot, &self.settings.named_as_property);
        debug!(lccn = %record.record_id, qid = %target, kind = decision.kind().as_str(), "Decided");

        if !decision.is_mutation() {
            let mut reconciled = Reconciled::without_write(progress, decision, None);
            if matches!(
                reconciled.decision,
                Decision::FlagForReview {
                    reason: ReviewReason::ClaimMismatch,
                    ..
                }
            ) {
                reconciled.auto_eval = self.auto_evaluate(record, target).await;
            }
            return reconciled;
        }

        progress.decided(decision.clone());
        match self.collaborators.applier.apply(&decision).await {
            Ok(applied_id) => {
                progress.transition_to(RecordStage::Applied);
                Reconciled {
                    progress,
                    decision,
                    applied_id: Some(applied_id),
                    error: None,
                    auto_eval: None,
                }
            }
            Err(e) => {
                warn!(lccn = %record.record_id, qid = %target, error = %e, "Write rejected");
                let flagged = failure_decision(Some(target), &e);
                progress.decision = Some(flagged.clone());
                progress.transition_to(RecordStage::Abandoned);
                Reconciled {
                    progress,
                    decision: flagged,
                    applied_id: None,
                    error: Some(e.to_string()),
                    auto_eval: None,
                }
            }
        }
    }

    async fn fetch_snapshot(&self, target: &str) -> Result<crate::models::ClaimSnapshot, ReconcileError> {
        self.collaborators.snapshots.snapshot(target).await
    }

    async fn auto_evaluate(&self, record: &SourceRecord, target: &str) -> Option<AutoEval> {
        if !self.settings.auto_eval {
            return None;
        }
        let matcher = self.collaborators.matcher.as_ref()?;

        match matcher.match_one(record, target).await {
            Ok(outcome) => match outcome.verdict {
                Verdict::SameEntity(same_entity) => Some(AutoEval {
                    same_entity,
                    reason: outcome.reason,
                }),
                _ => None,
            },
            Err(e) => {
                debug!(lccn = %record.record_id, qid = %target, error = %e, "Auto-evaluation skipped");
                None
            }
        }
    }

    /// Post-write consistency check: after a pause, flag every id now held
    /// by more than one entity
    pub async fn check_for_duplicate_claims(&self, recently_added_ids: &[String]) -> Vec<(String, Decision)> {
        tokio::time::sleep(self.settings.consistency_delay).await;

        let mut holders_by_id = Vec::with_capacity(recently_added_ids.len());
        for record_id in recently_added_ids {
            match self.collaborators.claim_index.holders(record_id).await {
                Ok(holders) => holders_by_id.push((record_id.clone(), holders)),
                Err(e) => warn!(lccn = %record_id, error = %e, "Duplicate check failed"),
            }
        }

        let flagged = decision_engine::decide_duplicates(&holders_by_id);
        for (record_id, decision) in &flagged {
            warn!(lccn = %record_id, decision = ?decision, "Identifier held by several entities");
        }
        flagged
    }
}
