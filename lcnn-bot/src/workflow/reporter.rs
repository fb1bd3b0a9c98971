//! Run reporter
//!
//! Collects every outcome of a run, counts decisions per kind and writes
//! the audit log in the `info:lc/lds-id/log` XML format:
//!
//! ```xml
//! <log:log xmlns:log="info:lc/lds-id/log" date="2026-10-19">
//!   <log:logDetail lccn="n79021164" qid="Q7245" action="NAMED_AS_CHANGE" old="Twain, M." new="Twain, Mark"/>
//! </log:log>
//! ```

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::Writer;
use std::collections::BTreeMap;
use std::path::Path;

use super::RecordOutcome;
use crate::error::{ReconcileError, ReconcileResult};
use crate::models::{AmbiguityKind, Decision, DecisionKind, ReviewReason};

const LOG_NAMESPACE: &str = "info:lc/lds-id/log";

/// `action` attribute values of the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogAction {
    AddP244,
    NamedAsAdded,
    NamedAsChange,
    NeedReview,
    SuggestCrossref,
    MultiQidInLccn,
    MultiLccnInWiki,
    Error,
}

impl LogAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogAction::AddP244 => "ADD_P244",
            LogAction::NamedAsAdded => "NAMED_AS_ADDED",
            LogAction::NamedAsChange => "NAMED_AS_CHANGE",
            LogAction::NeedReview => "NEED_REVIEW",
            LogAction::SuggestCrossref => "SUGGEST_CROSSREF",
            LogAction::MultiQidInLccn => "MULTI_QID_IN_LCCN",
            LogAction::MultiLccnInWiki => "MULTI_LCCN_IN_WIKI",
            LogAction::Error => "ERROR",
        }
    }
}

/// One `log:logDetail` element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub lccn: String,
    pub qid: String,
    pub action: LogAction,
    pub old: String,
    pub new: String,
    pub auto_eval: Option<bool>,
    pub auto_eval_reason: Option<String>,
}

impl LogEntry {
    /// Audit-log line for an outcome; `None` for no-ops
    pub fn from_outcome(outcome: &RecordOutcome) -> Option<Self> {
        let error_text = || outcome.error.clone().unwrap_or_default();

        let (qid, action, old, new) = match &outcome.decision {
            Decision::NoOp => return None,
            Decision::AddClaim { target, named_as, .. } => {
                (target.clone(), LogAction::AddP244, String::new(), named_as.clone())
            }
            Decision::AddQualifier {
                target, qualifier_value, ..
            } => (target.clone(), LogAction::NamedAsAdded, String::new(), qualifier_value.clone()),
            Decision::UpdateQualifier {
                target,
                old_qualifier_value,
                new_qualifier_value,
                ..
            } => (
                target.clone(),
                LogAction::NamedAsChange,
                old_qualifier_value.clone(),
                new_qualifier_value.clone(),
            ),
            Decision::FlagForReview { target, reason } => {
                let qid = target.clone().unwrap_or_default();
                match reason {
                    ReviewReason::ClaimMismatch => (
                        qid,
                        LogAction::NeedReview,
                        String::new(),
                        "LCCN already exist but not the one we are trying to add.".to_string(),
                    ),
                    ReviewReason::AiNoMatch => {
                        let mut new = "No candidate matched the record".to_string();
                        if let Some(reason) = &outcome.error {
                            new = format!("{}: {}", new, reason);
                        }
                        (qid, LogAction::NeedReview, String::new(), new)
                    }
                    other => (qid, LogAction::Error, other.as_str().to_string(), error_text()),
                }
            }
            Decision::SuggestCrossReference { cross_ref_value, target } => {
                (target.clone(), LogAction::SuggestCrossref, String::new(), cross_ref_value.clone())
            }
            Decision::FlagAmbiguousTarget {
                candidate_values,
                ambiguity,
            } => {
                let action = match ambiguity {
                    AmbiguityKind::MultiLccnInWiki => LogAction::MultiLccnInWiki,
                    AmbiguityKind::MultipleCandidates | AmbiguityKind::MultipleCrossReferenceTargets => {
                        LogAction::MultiQidInLccn
                    }
                };
                (candidate_values.join(","), action, String::new(), String::new())
            }
        };

        Some(Self {
            lccn: outcome.record_id.clone(),
            qid,
            action,
            old,
            new,
            auto_eval: outcome.auto_eval.as_ref().map(|a| a.same_entity),
            auto_eval_reason: outcome.auto_eval.as_ref().map(|a| a.reason.clone()),
        })
    }

    /// Extra `ERROR` line for an outcome whose ledger write failed
    pub fn ledger_failure(outcome: &RecordOutcome) -> Option<Self> {
        let error = outcome.ledger_error.as_ref()?;
        Some(Self {
            lccn: outcome.record_id.clone(),
            qid: outcome.decision.target().unwrap_or_default().to_string(),
            action: LogAction::Error,
            old: ReviewReason::LedgerUnavailable.as_str().to_string(),
            new: error.clone(),
            auto_eval: None,
            auto_eval_reason: None,
        })
    }
}

fn xml_error(err: impl std::fmt::Display) -> ReconcileError {
    ReconcileError::Common(lcnn_common::Error::Internal(format!("report XML: {}", err)))
}

/// Accumulates the outcomes of one run
#[derive(Debug, Default)]
pub struct RunReporter {
    counts: BTreeMap<DecisionKind, usize>,
    items: Vec<RecordOutcome>,
    already_seen: usize,
    cancelled: usize,
}

impl RunReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: RecordOutcome) {
        *self.counts.entry(outcome.decision.kind()).or_insert(0) += 1;
        self.items.push(outcome);
    }

    pub fn record_already_seen(&mut self) {
        self.already_seen += 1;
    }

    pub fn record_cancelled(&mut self) {
        self.cancelled += 1;
    }

    pub fn count(&self, kind: DecisionKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn items(&self) -> &[RecordOutcome] {
        &self.items
    }

    pub fn already_seen(&self) -> usize {
        self.already_seen
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled
    }

    /// Records accounted for: decided, already seen, or skipped by cancellation
    pub fn total(&self) -> usize {
        self.items.len() + self.already_seen + self.cancelled
    }

    /// Outcomes decided but not written to the ledger
    pub fn ledger_failures(&self) -> usize {
        self.items.iter().filter(|o| o.ledger_error.is_some()).count()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.items
            .iter()
            .flat_map(|o| LogEntry::from_outcome(o).into_iter().chain(LogEntry::ledger_failure(o)))
            .collect()
    }

    /// Serialise the audit log
    pub fn to_xml(&self, day: chrono::NaiveDate) -> ReconcileResult<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(xml_error)?;

        let date = day.format("%Y-%m-%d").to_string();
        let mut root = BytesStart::new("log:log");
        root.push_attribute(("xmlns:log", LOG_NAMESPACE));
        root.push_attribute(("date", date.as_str()));
        writer.write_event(Event::Start(root)).map_err(xml_error)?;

        for entry in self.entries() {
            let mut detail = BytesStart::new("log:logDetail");
            detail.push_attribute(("lccn", entry.lccn.as_str()));
            detail.push_attribute(("qid", entry.qid.as_str()));
            detail.push_attribute(("action", entry.action.as_str()));
            detail.push_attribute(("old", entry.old.as_str()));
            detail.push_attribute(("new", entry.new.as_str()));
            if let Some(same_entity) = entry.auto_eval {
                detail.push_attribute(("auto-eval", if same_entity { "true" } else { "false" }));
            }
            if let Some(reason) = &entry.auto_eval_reason {
                detail.push_attribute(("auto-eval-reason", reason.as_str()));
            }
            writer.write_event(Event::Empty(detail)).map_err(xml_error)?;
        }

        writer
            .write_event(Event::End(BytesEnd::new("log:log")))
            .map_err(xml_error)?;

        String::from_utf8(writer.into_inner()).map_err(xml_error)
    }

    /// Write the audit log to `path`, creating parent folders
    pub fn write_to(&self, path: &Path, day: chrono::NaiveDate) -> ReconcileResult<()> {
        let xml = self.to_xml(day)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(lcnn_common::Error::from)?;
        }
        std::fs::write(path, xml).map_err(lcnn_common::Error::from)?;
        tracing::info!(path = %path.display(), entries = self.entries().len(), "Wrote run report");
        Ok(())
    }

    pub fn log_summary(&self) {
        let counts: Vec<String> = DecisionKind::ALL
            .iter()
            .map(|kind| format!("{}={}", kind.as_str(), self.count(*kind)))
            .collect();

        tracing::info!(
            total = self.total(),
            decided = self.items.len(),
            already_seen = self.already_seen,
            cancelled = self.cancelled,
            ledger_failures = self.ledger_failures(),
            counts = %counts.join(" "),
            "Run summary"
        );

        for entry in self.entries() {
            tracing::info!(
                lccn = %entry.lccn,
                qid = %entry.qid,
                action = entry.action.as_str(),
                old = %entry.old,
                new = %entry.new,
                "Report item"
            );
        }
    }
}
