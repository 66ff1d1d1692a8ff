//! Agent session fetching and extraction.
//!
//! Entire.io stores agent session transcripts on a `entire/checkpoints/v1`
//! git branch, sharded into `XX/YYYYYYYYYY/N/` directories each holding
//! `metadata.json`, `full.jsonl`, and `prompt.txt`. We read files straight
//! from the ref with `git show` so the branch is never checked out.
//!
//! Sessions feed two extraction passes: decisions (a technical choice made
//! mid-session) and learnings (bugs fixed, gotchas hit, features built).

use std::path::PathBuf;
use std::process::Command;

use chrono::Utc;
use serde_json::Value;

use crate::error::Result;
use crate::llm::{self, AnthropicClient};
use crate::models::{Decision, Learning, Source, SourceType};

const CHECKPOINT_BRANCH: &str = "entire/checkpoints/v1";
const TRANSCRIPT_CHAR_LIMIT: usize = 15_000;
const ASSISTANT_MSG_LIMIT: usize = 500;

/// Raw session data ready for extraction.
#[derive(Debug, Clone)]
pub struct SessionData {
    pub session_id: String,
    pub checkpoint_id: String,
    pub agent: String,
    pub branch: String,
    pub prompt: String,
    pub transcript: Vec<Value>,
    pub files_touched: Vec<String>,
    pub summary: String,
}

/// Reads session checkpoints from a local git repository.
pub struct SessionFetcher {
    repo_dir: PathBuf,
}

impl SessionFetcher {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }

    pub fn has_checkpoint_branch(&self) -> bool {
        self.resolve_ref().is_some()
    }

    /// Fetch up to `limit` session checkpoints from the branch. Returns an
    /// empty list when the branch does not exist.
    pub fn fetch_sessions(&self, limit: usize) -> Vec<SessionData> {
        let Some(git_ref) = self.resolve_ref() else {
            return Vec::new();
        };

        let Some(tree) = self.git(&["ls-tree", "-r", "--name-only", &git_ref]) else {
            return Vec::new();
        };

        let mut dirs: Vec<String> = Vec::new();
        for line in tree.lines() {
            if let Some(dir) = line.strip_suffix("/metadata.json") {
                if !dirs.iter().any(|d| d == dir) {
                    dirs.push(dir.to_string());
                }
            }
        }
        dirs.truncate(limit);

        dirs.iter()
            .filter_map(|dir| self.read_session(&git_ref, dir))
            .collect()
    }

    fn resolve_ref(&self) -> Option<String> {
        if self
            .git(&["rev-parse", "--verify", CHECKPOINT_BRANCH])
            .is_some()
        {
            return Some(CHECKPOINT_BRANCH.to_string());
        }
        let remote = format!("origin/{CHECKPOINT_BRANCH}");
        if self.git(&["rev-parse", "--verify", &remote]).is_some() {
            return Some(remote);
        }
        None
    }

    fn read_session(&self, git_ref: &str, dir: &str) -> Option<SessionData> {
        let metadata_raw = self.git_show(git_ref, &format!("{dir}/metadata.json"))?;
        let metadata: Value = serde_json::from_str(&metadata_raw).ok()?;

        let transcript = self
            .git_show(git_ref, &format!("{dir}/full.jsonl"))
            .map(|raw| {
                raw.lines()
                    .filter(|l| !l.trim().is_empty())
                    .filter_map(|l| serde_json::from_str(l).ok())
                    .collect::<Vec<Value>>()
            })
            .unwrap_or_default();

        let prompt = self
            .git_show(git_ref, &format!("{dir}/prompt.txt"))
            .unwrap_or_default()
            .trim()
            .to_string();

        if transcript.is_empty() && prompt.is_empty() {
            return None;
        }

        // metadata keys appear in both PascalCase and snake_case
        let get_str = |pascal: &str, snake: &str| -> String {
            metadata
                .get(pascal)
                .or_else(|| metadata.get(snake))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let files_touched = metadata
            .get("FilesTouched")
            .or_else(|| metadata.get("files_touched"))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Some(SessionData {
            session_id: get_str("SessionID", "session_id"),
            checkpoint_id: checkpoint_id_from_dir(dir),
            agent: {
                let a = get_str("Agent", "agent");
                if a.is_empty() { "unknown".to_string() } else { a }
            },
            branch: get_str("Branch", "branch"),
            prompt,
            transcript,
            files_touched,
            summary: get_str("Summary", "summary"),
        })
    }

    fn git_show(&self, git_ref: &str, path: &str) -> Option<String> {
        self.git(&["show", &format!("{git_ref}:{path}")])
    }

    fn git(&self, args: &[&str]) -> Option<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .output()
            .ok()?;
        if output.status.success() {
            Some(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            None
        }
    }
}

/// Path format is `XX/YYYYYYYYYY/N` where `XXYYYYYYYYYY` is the checkpoint id.
fn checkpoint_id_from_dir(dir: &str) -> String {
    let parts: Vec<&str> = dir.split('/').collect();
    if parts.len() >= 2 {
        format!("{}{}", parts[0], parts[1])
    } else {
        dir.to_string()
    }
}

const DECISION_PROMPT_HEADER: &str = "\
You are an engineering decision extractor. Analyze the following AI agent session \
transcript and extract any significant engineering decisions that were made.

This is a transcript from an AI coding agent (like Claude Code or Cursor) working \
on a codebase. The agent and user discussed and implemented changes. Your job is to \
find moments where a technical choice was made that affects the system's architecture, \
technology stack, patterns, or approach.

Look for decisions like:
- Choosing a library, framework, or tool
- Adopting an architectural pattern or design approach
- Making a tradeoff (performance vs. simplicity, etc.)
- Choosing a data model or API design
- Deciding on a testing strategy or deployment approach
- Choosing between build vs. buy

Ignore routine implementation details - focus on choices that a future developer or AI \
agent would need to know about to understand WHY the system is built the way it is.";

const DECISION_PROMPT_INSTRUCTIONS: &str = "\
## Instructions

Respond with a JSON object:
{\"decisions\": [
  {
    \"summary\": \"One sentence describing what was decided\",
    \"reasoning\": \"Why this choice was made, including tradeoffs discussed\",
    \"alternatives\": [\"Alternative that was considered or rejected\"],
    \"entities\": [
      {\"name\": \"technology or concept name\", \"entity_type\": \"technology|pattern|service|library\"}
    ],
    \"confidence\": \"high|medium|low\"
  }
]}

If the session contains no engineering decisions (e.g., just a bug fix following \
existing patterns), return {\"decisions\": []}.

Confidence levels:
- high: Decision was explicitly discussed and agreed upon
- medium: Decision was made implicitly by the agent's implementation choice
- low: Decision might be inferred but wasn't directly addressed

Respond ONLY with valid JSON, no other text.";

const LEARNING_PROMPT_HEADER: &str = "\
You are a session knowledge extractor. Analyze the following AI coding session \
transcript and extract practical learnings: bugs that were fixed, gotchas that \
were discovered, and features that were implemented.

This is a transcript from an AI coding agent (like Claude Code or Cursor) working \
on a codebase. Your job is to find actionable knowledge that would help a future \
developer or AI agent working in the same codebase.

Extract three categories of learnings:

**bug_fix** - A bug that was identified and fixed:
- What were the symptoms?
- What was the root cause?
- How was it fixed?
- Which files/components were involved?

**gotcha** - A non-obvious pitfall or surprising behavior discovered:
- What was surprising or unexpected?
- Why does it happen?
- What's the workaround or correct approach?

**implementation** - A feature or system that was built and is working:
- What was implemented?
- Key design choices made during implementation
- How does it work at a high level?
- Which components are involved?

Ignore routine, trivial changes (typo fixes, comment updates, formatting). \
Focus on knowledge that would save time if someone encounters the same area again.";

const LEARNING_PROMPT_INSTRUCTIONS: &str = "\
## Instructions

Respond with a JSON object:
{\"learnings\": [
  {
    \"category\": \"bug_fix|gotcha|implementation\",
    \"summary\": \"One sentence describing what was learned\",
    \"detail\": \"Full context: root cause, fix, key details a future developer needs\",
    \"components\": [\"path/to/file.rs\", \"module_name\"],
    \"entities\": [
      {\"name\": \"technology or concept\", \"entity_type\": \"technology|pattern|service|library\"}
    ]
  }
]}

If the session contains no meaningful learnings (e.g., just exploration or \
reading code), return {\"learnings\": []}.

Respond ONLY with valid JSON, no other text.";

/// Build the source record for a session checkpoint.
pub fn session_source(session: &SessionData, repo: &str) -> Source {
    Source {
        id: format!("session:{}", session.checkpoint_id),
        source_type: SourceType::Session,
        repo: repo.to_string(),
        // sessions have no web URL
        url: String::new(),
        title: build_title(session),
        raw_content: build_raw_content(session),
        fetched_at: Utc::now(),
    }
}

/// Extract decisions from one session transcript.
pub async fn extract_session_decisions(
    session: &SessionData,
    source: &Source,
    client: &AnthropicClient,
) -> Result<Vec<Decision>> {
    let condensed = condense_transcript(&session.transcript);
    let prompt = format!(
        "{DECISION_PROMPT_HEADER}\n\n## Session Info\n\n{}\n\n## Transcript (condensed)\n\n{condensed}\n\n{DECISION_PROMPT_INSTRUCTIONS}",
        session_info(session),
    );
    let response = client.complete(&prompt, 2048).await?;
    llm::parse_decisions(&response, &source.id, "")
}

/// Extract operational learnings from the same session.
pub async fn extract_session_learnings(
    session: &SessionData,
    source: &Source,
    client: &AnthropicClient,
) -> Result<Vec<Learning>> {
    let condensed = condense_transcript(&session.transcript);
    let prompt = format!(
        "{LEARNING_PROMPT_HEADER}\n\n## Session Info\n\n{}\n\n## Transcript\n\n{condensed}\n\n{LEARNING_PROMPT_INSTRUCTIONS}",
        session_info(session),
    );
    let response = client.complete(&prompt, 2048).await?;
    let session_date = Utc::now().format("%Y-%m-%d").to_string();
    llm::parse_learnings(&response, &source.id, &session_date)
}

fn session_info(session: &SessionData) -> String {
    let prompt = if session.prompt.is_empty() {
        "(no prompt recorded)"
    } else {
        &session.prompt
    };
    let files = if session.files_touched.is_empty() {
        "(none)".to_string()
    } else {
        session
            .files_touched
            .iter()
            .take(20)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    };
    let summary = if session.summary.is_empty() {
        "(no summary)"
    } else {
        &session.summary
    };
    format!(
        "**Agent:** {}\n**Branch:** {}\n**Initial Prompt:** {prompt}\n\
         **Files Touched:** {files}\n**Session Summary:** {summary}",
        session.agent, session.branch,
    )
}

fn build_title(session: &SessionData) -> String {
    let label = if !session.prompt.is_empty() {
        truncate_line(session.prompt.lines().next().unwrap_or(""), 80)
    } else if !session.summary.is_empty() {
        truncate_line(&session.summary, 80)
    } else {
        let short: String = session.checkpoint_id.chars().take(8).collect();
        format!("Session {short}")
    };
    format!("[{}] {label}", session.agent)
}

fn truncate_line(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.trim().to_string();
    }
    let head: String = text.chars().take(max - 3).collect();
    format!("{}...", head.trim_end())
}

/// Stored representation: metadata plus the condensed transcript, never the
/// full one (it can run to thousands of lines).
fn build_raw_content(session: &SessionData) -> String {
    let mut parts = vec![
        format!("Agent: {}", session.agent),
        format!("Branch: {}", session.branch),
    ];
    if !session.prompt.is_empty() {
        parts.push(format!("\n## Prompt\n{}", session.prompt));
    }
    if !session.summary.is_empty() {
        parts.push(format!("\n## Summary\n{}", session.summary));
    }
    if !session.files_touched.is_empty() {
        let files = session
            .files_touched
            .iter()
            .map(|f| format!("- {f}"))
            .collect::<Vec<_>>()
            .join("\n");
        parts.push(format!("\n## Files Touched\n{files}"));
    }
    parts.push(format!(
        "\n## Transcript (condensed)\n{}",
        condense_transcript(&session.transcript)
    ));
    parts.join("\n")
}

/// Condense a JSONL transcript for prompting: user messages verbatim,
/// assistant text truncated, tool-call payloads dropped entirely.
pub fn condense_transcript(transcript: &[Value]) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut total_chars = 0;

    for entry in transcript {
        if total_chars >= TRANSCRIPT_CHAR_LIMIT {
            parts.push(format!(
                "\n... ({} more messages, truncated)",
                transcript.len() - parts.len()
            ));
            break;
        }

        let msg_type = entry.get("type").and_then(Value::as_str).unwrap_or("");
        let message = entry.get("message").cloned().unwrap_or(Value::Null);

        match msg_type {
            "user" => {
                let content = extract_text_content(&message);
                if !content.is_empty() {
                    let text = format!("**User:** {content}");
                    total_chars += text.len();
                    parts.push(text);
                }
            }
            "assistant" => {
                let mut content = extract_text_content(&message);
                if !content.is_empty() {
                    if content.chars().count() > ASSISTANT_MSG_LIMIT {
                        content = content.chars().take(ASSISTANT_MSG_LIMIT).collect::<String>() + "...";
                    }
                    let text = format!("**Assistant:** {content}");
                    total_chars += text.len();
                    parts.push(text);
                }
            }
            _ => {}
        }
    }

    if parts.is_empty() {
        return "(empty transcript)".to_string();
    }
    parts.join("\n\n")
}

/// Pull the text out of a message in either plain-string or content-block form.
fn extract_text_content(message: &Value) -> String {
    match message.get("content") {
        Some(Value::String(s)) => return s.clone(),
        Some(Value::Array(blocks)) => {
            let texts: Vec<&str> = blocks
                .iter()
                .filter_map(|block| match block {
                    Value::String(s) => Some(s.as_str()),
                    Value::Object(_) if block.get("type").and_then(Value::as_str) == Some("text") => {
                        block.get("text").and_then(Value::as_str)
                    }
                    _ => None,
                })
                .collect();
            return texts.join("\n");
        }
        _ => {}
    }
    for key in ["text", "content", "body"] {
        if let Some(Value::String(s)) = message.get(key) {
            return s.clone();
        }
    }
    String::new()
}
