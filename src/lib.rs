//! newshound: adaptive news discovery
//!
//! Per-site scheduled discovery of article URLs from listing pages,
//! exactly-once URL tracking, and LLM-assisted selector inference checked
//! against live pages before it is trusted.

pub mod commands;
pub mod config;
pub mod discovery;
pub mod error;
pub mod fetch;
pub mod infer;
pub mod meta;
pub mod onboard;
pub mod progress;
pub mod reduce;
pub mod scheduler;
pub mod validate;

#[cfg(test)]
mod test_support;
