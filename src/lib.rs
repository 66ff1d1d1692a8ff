//! setkontext — engineering decision memory for AI coding agents.
//!
//! Extracts decisions and learnings from a repository's ADRs, merged PRs,
//! documentation, and agent sessions; stores them in SQLite with full-text
//! search; and serves them back through a CLI and an MCP stdio server.

pub mod activity;
pub mod adr;
pub mod config;
pub mod db;
pub mod docs;
pub mod error;
pub mod extract;
pub mod generate;
pub mod github;
pub mod init_cmd;
pub mod llm;
pub mod mcp;
pub mod merge;
pub mod models;
pub mod pr;
pub mod query;
pub mod session;
pub mod stats;
pub mod store;
pub mod validate;

#[cfg(test)]
pub(crate) mod testutil;
