//! Decision extraction from merged pull requests.
//!
//! Most PRs are routine and yield nothing; the prompt instructs the model to
//! be selective. PRs are analyzed one at a time, not batched into a single
//! prompt, because batching degrades extraction quality.

use chrono::Utc;

use crate::error::Result;
use crate::github::PrData;
use crate::llm::{self, AnthropicClient};
use crate::models::{Decision, Source, SourceType};

const MAX_COMMENT_CHARS: usize = 3000;

const PROMPT_HEADER: &str = "\
You are an engineering decision extractor. Analyze the following GitHub Pull Request \
and determine if it contains any significant engineering decisions.

A \"decision\" is a deliberate technical choice that affects the system's architecture, \
technology stack, design patterns, or approach. Examples:
- Choosing a database, framework, or library
- Adopting or rejecting an architectural pattern (microservices, event-driven, etc.)
- Making a tradeoff between competing concerns (performance vs. simplicity, etc.)
- Deciding on a data model or API design approach
- Choosing to take on or pay off technical debt

Most PRs do NOT contain decisions. Routine bug fixes, feature implementations that follow \
existing patterns, dependency updates, and documentation changes are NOT decisions. \
Be selective - only extract decisions that a future developer or AI agent would need \
to know about to understand why the system is built the way it is.";

const PROMPT_INSTRUCTIONS: &str = "\
## Instructions

Respond with a JSON object. If there are no significant decisions, return:
{\"decisions\": []}

If there ARE decisions, return:
{\"decisions\": [
  {
    \"summary\": \"One sentence describing what was decided\",
    \"reasoning\": \"Why this decision was made, including tradeoffs considered\",
    \"alternatives\": [\"Alternative 1 that was considered or rejected\", \"Alternative 2\"],
    \"entities\": [
      {\"name\": \"technology or concept name\", \"entity_type\": \"technology|pattern|service|library\"}
    ],
    \"confidence\": \"high|medium|low\"
  }
]}

Confidence levels:
- high: Decision is explicitly stated and discussed
- medium: Decision is implied by the changes and discussion
- low: Decision might be inferred but isn't clearly stated

Respond ONLY with valid JSON, no other text.";

/// Analyze one merged PR for engineering decisions.
///
/// The source is always returned so the run can record what was looked at;
/// the decision list is usually empty.
pub async fn extract_pr_decisions(
    pr: &PrData,
    repo: &str,
    client: &AnthropicClient,
) -> Result<(Source, Vec<Decision>)> {
    let source = Source {
        id: format!("pr:{}", pr.number),
        source_type: SourceType::Pr,
        repo: repo.to_string(),
        url: pr.url.clone(),
        title: pr.title.clone(),
        raw_content: build_pr_text(pr),
        fetched_at: Utc::now(),
    };

    let prompt = build_prompt(pr);
    let response = client.complete(&prompt, 1024).await?;
    let decision_date = pr.merged_at.chars().take(10).collect::<String>();
    let decisions = llm::parse_decisions(&response, &source.id, &decision_date)?;
    Ok((source, decisions))
}

fn build_prompt(pr: &PrData) -> String {
    let body = if pr.body.is_empty() {
        "(no description)"
    } else {
        &pr.body
    };
    format!(
        "{PROMPT_HEADER}\n\n## PR Content\n\n**Title:** {}\n**PR Number:** #{}\n\n\
         **Description:**\n{body}\n\n**Review Comments:**\n{}\n\n**Commit Messages:**\n{}\n\n\
         {PROMPT_INSTRUCTIONS}",
        pr.title,
        pr.number,
        format_comments(&pr.review_comments),
        format_commits(&pr.commit_messages),
    )
}

/// Stored representation of the PR for later inspection.
fn build_pr_text(pr: &PrData) -> String {
    let mut parts = vec![format!("# {}\n", pr.title)];
    if !pr.body.is_empty() {
        parts.push(pr.body.clone());
    }
    if !pr.review_comments.is_empty() {
        parts.push("\n## Review Comments\n".to_string());
        parts.extend(pr.review_comments.iter().take(10).map(|c| format!("- {c}")));
    }
    parts.join("\n")
}

fn format_comments(comments: &[String]) -> String {
    if comments.is_empty() {
        return "(no review comments)".to_string();
    }
    let mut formatted: Vec<String> = Vec::new();
    let mut total_chars = 0;
    for comment in comments {
        if total_chars > MAX_COMMENT_CHARS {
            formatted.push(format!("... ({} more comments)", comments.len() - formatted.len()));
            break;
        }
        formatted.push(format!("- {comment}"));
        total_chars += comment.len();
    }
    formatted.join("\n")
}

fn format_commits(messages: &[String]) -> String {
    if messages.is_empty() {
        return "(no commit messages)".to_string();
    }
    messages
        .iter()
        .take(10)
        .map(|m| format!("- {m}"))
        .collect::<Vec<_>>()
        .join("\n")
}
