//! Reconciliation services
//!
//! Pure logic (`identifier_extractor`, `decision_engine`, `ai_matcher`) and
//! the HTTP clients that implement the collaborator traits in `types`.

pub mod ai_matcher;
pub mod decision_engine;
pub mod dry_run_applier;
pub mod gemini_client;
pub mod identifier_extractor;
pub mod loc_client;
pub mod sparql_client;
pub mod wikibase_client;

pub use ai_matcher::{AiMatcher, MatchError, MatchOutcome, Verdict};
pub use decision_engine::{CrossReferenceResolution, Plan};
pub use dry_run_applier::DryRunApplier;
pub use gemini_client::GeminiClient;
pub use loc_client::LocClient;
pub use sparql_client::SparqlClient;
pub use wikibase_client::WikibaseClient;
