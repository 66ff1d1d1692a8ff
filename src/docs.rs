//! Decision extraction from general documentation files.
//!
//! For markdown that is not a formal ADR (ARCHITECTURE.md, strategy docs).
//! Unlike the PR path, a single document may yield many decisions.

use chrono::Utc;

use crate::error::Result;
use crate::github::DocFile;
use crate::llm::{self, AnthropicClient};
use crate::models::{Decision, Source, SourceType};

/// Docs are truncated to this many characters before prompting.
const MAX_DOC_CHARS: usize = 12_000;

const PROMPT_HEADER: &str = "\
You are an engineering decision extractor. Analyze the following documentation file \
from a software project and extract any significant engineering or product decisions.

A \"decision\" is a deliberate choice that affects the system's architecture, \
technology stack, design patterns, strategy, or approach. Examples:
- Choosing a specific technology (database, framework, language, cloud provider)
- Adopting an architectural pattern (monolith, microservices, event-driven)
- Defining a product strategy or phased approach
- Making a tradeoff between competing concerns
- Defining data models or API design approaches
- Choosing between build vs. buy

Extract EACH distinct decision separately. A single document may contain many decisions.";

const PROMPT_INSTRUCTIONS: &str = "\
## Instructions

Respond with a JSON object:
{\"decisions\": [
  {
    \"summary\": \"One sentence describing what was decided\",
    \"reasoning\": \"Why this decision was made, including tradeoffs\",
    \"alternatives\": [\"Alternative that was considered or rejected\"],
    \"entities\": [
      {\"name\": \"technology or concept name\", \"entity_type\": \"technology|pattern|service|library\"}
    ],
    \"confidence\": \"high|medium|low\"
  }
]}

If the document contains no engineering decisions, return {\"decisions\": []}.

Be thorough - a strategy document or architecture doc may contain 5-10+ distinct decisions.
Respond ONLY with valid JSON, no other text.";

/// Analyze a documentation file for engineering decisions.
pub async fn extract_doc_decisions(
    doc: &DocFile,
    repo: &str,
    client: &AnthropicClient,
) -> Result<(Source, Vec<Decision>)> {
    let source = Source {
        id: format!("doc:{}", doc.path),
        source_type: SourceType::Doc,
        repo: repo.to_string(),
        url: doc.url.clone(),
        title: extract_title(&doc.content, &doc.path),
        raw_content: doc.content.clone(),
        fetched_at: Utc::now(),
    };

    let prompt = build_prompt(&doc.path, &doc.content);
    let response = client.complete(&prompt, 2048).await?;
    let decisions = llm::parse_decisions(&response, &source.id, "")?;
    Ok((source, decisions))
}

/// LLM extraction for an arbitrary markdown body tied to an existing source.
/// Used as the fallback when a file in an ADR directory does not parse as a
/// structured ADR.
pub async fn extract_decisions_from_text(
    path: &str,
    content: &str,
    source_id: &str,
    client: &AnthropicClient,
) -> Result<Vec<Decision>> {
    let prompt = build_prompt(path, content);
    let response = client.complete(&prompt, 2048).await?;
    llm::parse_decisions(&response, source_id, "")
}

fn build_prompt(path: &str, content: &str) -> String {
    let truncated = truncate(content, MAX_DOC_CHARS);
    format!(
        "{PROMPT_HEADER}\n\n## Document\n\n**File:** {path}\n\n**Content:**\n{truncated}\n\n{PROMPT_INSTRUCTIONS}"
    )
}

pub fn truncate(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let head: String = content.chars().take(max_chars).collect();
    format!("{head}\n\n[... truncated ...]")
}

/// H1 title, falling back to a title-cased filename.
fn extract_title(content: &str, path: &str) -> String {
    for line in content.lines() {
        let trimmed = line.trim();
        if let Some(title) = trimmed.strip_prefix("# ") {
            return title.trim().to_string();
        }
    }
    let name = path.rsplit('/').next().unwrap_or(path);
    let name = name.trim_end_matches(".md");
    name.split('-')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_from_h1_or_filename() {
        assert_eq!(extract_title("# System Overview\n\ntext", "x.md"), "System Overview");
        assert_eq!(extract_title("no heading", "docs/tech-stack.md"), "Tech Stack");
        assert_eq!(extract_title("", "architecture.md"), "Architecture");
    }

    #[test]
    fn long_docs_are_truncated_with_marker() {
        let content = "y".repeat(13_000);
        let prompt = build_prompt("docs/big.md", &content);
        assert!(prompt.contains("[... truncated ...]"));
        let short = build_prompt("docs/small.md", "short content");
        assert!(!short.contains("[... truncated ...]"));
    }

    #[test]
    fn prompt_names_the_file() {
        let prompt = build_prompt("docs/design.md", "content");
        assert!(prompt.contains("**File:** docs/design.md"));
        assert!(prompt.contains("Extract EACH distinct decision separately."));
    }
}
