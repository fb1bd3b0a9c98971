//! lcnn-bot library interface
//!
//! Reconciles Library of Congress name-authority records against Wikidata
//! items: the change feed is read page by page, each fresh record version is
//! matched to its item, and the identifier claim plus its "subject named as"
//! qualifier are created or corrected. Exposed as a library for integration
//! testing.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod types;
pub mod utils;
pub mod workflow;

pub use crate::error::{ReconcileError, ReconcileResult};

/// Build identification captured by `build.rs`
pub fn build_info() -> String {
    format!(
        "{} ({}, {}, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_PROFILE"),
        env!("BUILD_TIMESTAMP")
    )
}
