//! # LCNN Common Library
//!
//! Shared code for the LCNN reconciliation bot:
//! - Error types
//! - TOML configuration and credential resolution
//! - Root folder resolution
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod time;

pub use error::{Error, Result};
