//! Activity logging for MCP tool calls.
//!
//! Every tool invocation is appended to a JSONL file so humans can see what
//! context their AI agent received. Logging never fails the tool call.

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const RESULT_PREVIEW_LIMIT: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub tool_name: String,
    pub arguments: Value,
    pub result_preview: String,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Append a tool-call entry to the log. Swallows all I/O errors so a broken
/// log file can never take down the MCP server.
pub fn log_tool_call(
    log_path: &Path,
    tool_name: &str,
    arguments: Value,
    result_text: &str,
    error: Option<String>,
    duration_ms: u64,
) {
    let entry = ActivityEntry {
        timestamp: Utc::now(),
        tool_name: tool_name.to_string(),
        arguments,
        result_preview: result_text.chars().take(RESULT_PREVIEW_LIMIT).collect(),
        error,
        duration_ms,
    };
    let Ok(line) = serde_json::to_string(&entry) else {
        return;
    };
    let Ok(mut file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
    else {
        return;
    };
    let _ = writeln!(file, "{line}");
}

/// Read recent entries, most recent first, optionally filtered by tool name.
/// Malformed lines are skipped; a missing file is an empty log.
pub fn read_activity_log(
    log_path: &Path,
    limit: usize,
    tool_name: Option<&str>,
) -> Vec<ActivityEntry> {
    let Ok(content) = std::fs::read_to_string(log_path) else {
        return Vec::new();
    };

    let mut entries: Vec<ActivityEntry> = content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .filter(|e: &ActivityEntry| tool_name.is_none_or(|t| e.tool_name == t))
        .collect();

    entries.reverse();
    entries.truncate(limit);
    entries
}
