//! Test helpers: in-memory collaborators and record builders
//!
//! The fakes keep their state behind std mutexes so tests can inspect what
//! the pipeline did after a run.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use lcnn_bot::db::{init_memory_pool, Ledger};
use lcnn_bot::error::{ReconcileError, ReconcileResult};
use lcnn_bot::models::{Claim, ClaimSnapshot, Decision, RawField, SourceRecord, SourceRecordRef};
use lcnn_bot::services::AiMatcher;
use lcnn_bot::types::{
    AppliedId, ChangeFeed, ClaimIndex, CrossReferenceResolver, EntityDescriber, FeedPage, LanguageModel,
    ModelRequest, MutationApplier, RecordFetcher, SnapshotFetcher,
};
use lcnn_bot::workflow::{Collaborators, Reconciler, ReconcilerSettings};

pub const IDENTIFIER: &str = "P244";
pub const NAMED_AS: &str = "P1810";

pub fn published() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn reference(lccn: &str) -> SourceRecordRef {
    SourceRecordRef {
        record_id: lccn.to_string(),
        uri: format!("https://id.loc.gov/authorities/names/{}", lccn),
        published_at: published(),
        updated_at: published(),
    }
}

pub fn record(lccn: &str, label: &str, fields: Vec<RawField>) -> SourceRecord {
    SourceRecord::from_ref(&reference(lccn), label.to_string(), fields)
}

/// `670 $u` citing a knowledge-base item
pub fn citation(qid: &str) -> RawField {
    RawField::data(
        "670",
        &[('a', "Wikidata, viewed 2024"), ('u', &format!("https://www.wikidata.org/wiki/{}", qid))],
    )
}

/// `024` carrying a VIAF URI
pub fn viaf(id: &str) -> RawField {
    RawField::data("024", &[('a', &format!("http://viaf.org/viaf/{}", id)), ('2', "uri")])
}

/// Enough descriptive fields for the matcher's minimum
pub fn biography() -> Vec<RawField> {
    vec![
        RawField::data("046", &[('f', "1835-11-30"), ('g', "1910-04-21")]),
        RawField::data("370", &[('a', "Florida, Mo.")]),
        RawField::data("374", &[('a', "Novelists")]),
    ]
}

pub fn settings() -> ReconcilerSettings {
    ReconcilerSettings {
        workers: 4,
        max_pages: 5,
        named_as_property: NAMED_AS.to_string(),
        consistency_delay: Duration::ZERO,
        auto_eval: false,
        mark_seen: true,
    }
}

pub async fn memory_ledger() -> Ledger {
    Ledger::new(init_memory_pool().await.unwrap())
}

// ----------------------------------------------------------------------------
// Change feed and record fetcher
// ----------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeFeed {
    pages: Vec<FeedPage>,
    pub requests: AtomicUsize,
}

impl FakeFeed {
    pub fn with_pages(pages: Vec<Vec<SourceRecordRef>>) -> Self {
        let count = pages.len();
        let pages = pages
            .into_iter()
            .enumerate()
            .map(|(i, records)| FeedPage {
                records,
                rejected: Vec::new(),
                has_more: i + 1 < count,
            })
            .collect();
        Self {
            pages,
            requests: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl ChangeFeed for FakeFeed {
    async fn page(&self, page: u32) -> ReconcileResult<FeedPage> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(self.pages.get(page as usize - 1).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub struct FakeFetcher {
    records: HashMap<String, SourceRecord>,
    unreachable: HashSet<String>,
    pub fetches: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn with_records(records: Vec<SourceRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.record_id.clone(), r)).collect(),
            ..Self::default()
        }
    }

    /// Every fetch of `lccn` fails transiently
    pub fn unreachable(mut self, lccn: &str) -> Self {
        self.unreachable.insert(lccn.to_string());
        self
    }

    pub fn fetch_count(&self, lccn: &str) -> usize {
        self.fetches.lock().unwrap().iter().filter(|id| id.as_str() == lccn).count()
    }
}

#[async_trait::async_trait]
impl RecordFetcher for FakeFetcher {
    async fn fetch(&self, reference: &SourceRecordRef) -> ReconcileResult<SourceRecord> {
        self.fetches.lock().unwrap().push(reference.record_id.clone());
        if self.unreachable.contains(&reference.record_id) {
            return Err(ReconcileError::TransientFetch("HTTP 503".to_string()));
        }
        self.records
            .get(&reference.record_id)
            .cloned()
            .ok_or_else(|| ReconcileError::MalformedInput(format!("HTTP 404: {}", reference.record_id)))
    }
}

// ----------------------------------------------------------------------------
// Knowledge base
// ----------------------------------------------------------------------------

/// Entities and their identifier claims, mutated by applied decisions
#[derive(Default)]
pub struct FakeKnowledgeBase {
    entities: Mutex<HashMap<String, Vec<Claim>>>,
    cross_references: HashMap<String, String>,
    reject_writes: bool,
    write_delay: Duration,
    pub writes: Mutex<Vec<Decision>>,
    pub snapshots_taken: AtomicUsize,
}

impl FakeKnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(self, qid: &str, claims: Vec<Claim>) -> Self {
        self.entities.lock().unwrap().insert(qid.to_string(), claims);
        self
    }

    pub fn with_cross_reference(mut self, viaf: &str, qid: &str) -> Self {
        self.cross_references.insert(viaf.to_string(), qid.to_string());
        self
    }

    pub fn rejecting_writes(mut self) -> Self {
        self.reject_writes = true;
        self
    }

    /// Pause inside every write, widening any read-modify-write window
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    pub fn claims(&self, qid: &str) -> Vec<Claim> {
        self.entities.lock().unwrap().get(qid).cloned().unwrap_or_default()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl SnapshotFetcher for FakeKnowledgeBase {
    async fn snapshot(&self, entity_id: &str) -> ReconcileResult<ClaimSnapshot> {
        self.snapshots_taken.fetch_add(1, Ordering::SeqCst);
        Ok(ClaimSnapshot::with_claims(entity_id, IDENTIFIER, self.claims(entity_id)))
    }
}

#[async_trait::async_trait]
impl MutationApplier for FakeKnowledgeBase {
    async fn apply(&self, decision: &Decision) -> ReconcileResult<AppliedId> {
        if !decision.is_mutation() {
            return Err(ReconcileError::Apply(format!("{} is not a write", decision.kind().as_str())));
        }
        tokio::time::sleep(self.write_delay).await;
        if self.reject_writes {
            return Err(ReconcileError::Apply("protectedpage: This page has been protected".to_string()));
        }

        let mut entities = self.entities.lock().unwrap();
        let applied = match decision {
            Decision::AddClaim { target, value, named_as } => {
                let claims = entities.entry(target.clone()).or_default();
                let id = format!("{}$claim-{}", target, claims.len() + 1);
                let mut claim = Claim::new(value).with_qualifier(NAMED_AS, named_as);
                claim.claim_id = Some(id.clone());
                claims.push(claim);
                id
            }
            Decision::AddQualifier {
                target,
                claim_value,
                qualifier_value,
                ..
            } => {
                let claim = find_claim(&mut entities, target, claim_value)?;
                *claim = claim.clone().with_qualifier(NAMED_AS, qualifier_value);
                format!("hash-{}", qualifier_value)
            }
            Decision::UpdateQualifier {
                target,
                claim_value,
                old_qualifier_value,
                new_qualifier_value,
                ..
            } => {
                let claim = find_claim(&mut entities, target, claim_value)?;
                for qualifier in claim.qualifiers.iter_mut() {
                    if qualifier.property == NAMED_AS && &qualifier.value == old_qualifier_value {
                        qualifier.value = new_qualifier_value.clone();
                        break;
                    }
                }
                format!("hash-{}", new_qualifier_value)
            }
            _ => unreachable!("non-mutations rejected above"),
        };
        drop(entities);

        self.writes.lock().unwrap().push(decision.clone());
        Ok(applied)
    }
}

fn find_claim<'a>(
    entities: &'a mut HashMap<String, Vec<Claim>>,
    target: &str,
    value: &str,
) -> ReconcileResult<&'a mut Claim> {
    entities
        .get_mut(target)
        .and_then(|claims| claims.iter_mut().find(|c| c.value == value))
        .ok_or_else(|| ReconcileError::Apply(format!("no-such-claim: {} on {}", value, target)))
}

#[async_trait::async_trait]
impl ClaimIndex for FakeKnowledgeBase {
    async fn holders(&self, value: &str) -> ReconcileResult<Vec<String>> {
        let entities = self.entities.lock().unwrap();
        let mut holders: Vec<String> = entities
            .iter()
            .filter(|(_, claims)| claims.iter().any(|c| c.value == value))
            .map(|(qid, _)| qid.clone())
            .collect();
        holders.sort();
        Ok(holders)
    }
}

#[async_trait::async_trait]
impl CrossReferenceResolver for FakeKnowledgeBase {
    async fn resolve(&self, cross_ref: &str) -> ReconcileResult<Option<String>> {
        Ok(self.cross_references.get(cross_ref).cloned())
    }
}

// ----------------------------------------------------------------------------
// Language model
// ----------------------------------------------------------------------------

/// Replays canned responses in order and counts calls
#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
    pub calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn replying(responses: &[&str]) -> Self {
        Self {
            responses: Mutex::new(responses.iter().map(|r| r.to_string()).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, _request: &ModelRequest) -> ReconcileResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ReconcileError::TransientFetch("no scripted response left".to_string()))
    }
}

/// Fixed attribute lines per entity
#[derive(Default)]
pub struct FixedDescriber {
    lines: HashMap<String, Vec<String>>,
}

impl FixedDescriber {
    pub fn with(mut self, qid: &str, lines: &[&str]) -> Self {
        self.lines
            .insert(qid.to_string(), lines.iter().map(|l| l.to_string()).collect());
        self
    }
}

#[async_trait::async_trait]
impl EntityDescriber for FixedDescriber {
    async fn describe(&self, entity_id: &str) -> ReconcileResult<Vec<String>> {
        Ok(self.lines.get(entity_id).cloned().unwrap_or_default())
    }
}

// ----------------------------------------------------------------------------
// Wiring
// ----------------------------------------------------------------------------

pub fn collaborators(
    feed: Arc<FakeFeed>,
    fetcher: Arc<FakeFetcher>,
    kb: Arc<FakeKnowledgeBase>,
    matcher: Option<AiMatcher>,
) -> Collaborators {
    Collaborators {
        feed,
        fetcher,
        resolver: kb.clone(),
        snapshots: kb.clone(),
        applier: kb.clone(),
        claim_index: kb,
        matcher,
    }
}

/// Reconciler over a fresh in-memory ledger
pub async fn reconciler(
    feed: Arc<FakeFeed>,
    fetcher: Arc<FakeFetcher>,
    kb: Arc<FakeKnowledgeBase>,
    matcher: Option<AiMatcher>,
) -> Reconciler {
    Reconciler::new(collaborators(feed, fetcher, kb, matcher), memory_ledger().await, settings())
}

/// Make every ledger insert fail, leaving lookups intact
pub async fn reject_ledger_writes(ledger: &Ledger) {
    sqlx::query(
        r#"
        CREATE TRIGGER reject_ids BEFORE INSERT ON ids
        BEGIN
            SELECT RAISE(ABORT, 'ledger is read-only');
        END
        "#,
    )
    .execute(ledger.pool())
    .await
    .unwrap();
}

/// Make every ledger lookup fail
pub async fn break_ledger(ledger: &Ledger) {
    sqlx::query("DROP TABLE ids").execute(ledger.pool()).await.unwrap();
}
