//! Utility modules for lcnn-bot

pub mod retry;

pub use retry::{retry_on_lock, retry_transient, RetryPolicy};
