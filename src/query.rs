//! Query engine: question to relevant decisions to synthesized answer.
//!
//! Retrieval runs two strategies over the store (FTS on a stopword-filtered
//! OR query, plus known-entity matching against the question text). When
//! neither strategy finds anything the engine returns [`Error::NoMatch`]
//! rather than synthesizing an answer from nothing.

use serde::Serialize;

use crate::error::{Error, Result};
use crate::llm::AnthropicClient;
use crate::models::DecisionWithSource;
use crate::store::Store;

/// Cap on retrieved decisions so the synthesis prompt stays manageable.
const MAX_CANDIDATES: usize = 15;

const STOP_WORDS: &[&str] = &[
    "why", "did", "we", "the", "a", "an", "is", "are", "was", "were", "do", "does", "how",
    "what", "when", "where", "which", "who", "our", "their", "this", "that", "for", "with",
    "from", "about", "use", "using", "used", "choose", "chose", "chosen", "pick", "picked",
    "decide", "decided", "should", "would", "could", "have", "has", "had", "not", "and", "or",
    "but", "in", "on", "to", "of", "it", "its", "be", "been", "being",
];

const SYNTHESIS_PROMPT_HEADER: &str = "\
You are a senior engineering advisor for a software team. You have access to the team's \
documented engineering decisions extracted from their codebase, PRs, ADRs, and documentation.

Your job is to answer questions in a way that helps the person (or AI agent) make the \
RIGHT implementation choice - one that's consistent with the team's existing decisions.";

const SYNTHESIS_PROMPT_INSTRUCTIONS: &str = "\
## Instructions

Determine the type of question and respond accordingly:

**If it's a \"why\" question** (why did we choose X?):
- Explain the decision, reasoning, and what alternatives were rejected
- Reference specific sources

**If it's a \"how should I\" question** (how should I add caching / build a new endpoint / etc.):
- Frame existing decisions as CONSTRAINTS and GUIDELINES for the implementation
- Be specific: \"Use FastAPI for the endpoint, PostgreSQL for storage, and follow the dependency injection pattern for auth\" - not vague generalities
- Warn about approaches that would CONTRADICT existing decisions
- If the team rejected an alternative, explain why so the person doesn't re-propose it

**If it's a \"what\" question** (what database do we use? what's the architecture?):
- Provide a clear, factual summary from the decisions

**For all responses:**
- Be direct and actionable - this output may be consumed by an AI coding agent
- Reference source links so decisions can be verified
- If decisions don't cover the topic, say so clearly - don't make up guidance
- If decisions contradict each other, note the conflict and which is more recent";

#[derive(Debug, Serialize)]
pub struct QueryResult {
    pub question: String,
    pub answer: String,
    pub decisions: Vec<DecisionWithSource>,
    pub sources_searched: usize,
}

impl QueryResult {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_text(&self) -> String {
        let mut lines = vec![self.answer.clone(), String::new()];
        if !self.decisions.is_empty() {
            lines.push("Sources:".to_string());
            for d in &self.decisions {
                lines.push(format!(
                    "  - [{}] {}",
                    d.decision.confidence, d.decision.summary
                ));
                if !d.source_url.is_empty() {
                    lines.push(format!("    {}", d.source_url));
                }
            }
        }
        lines.join("\n")
    }
}

/// Answer a natural-language question from the stored decisions.
pub async fn query(
    store: &Store,
    client: &AnthropicClient,
    question: &str,
) -> Result<QueryResult> {
    let decisions = find_relevant_decisions(store, question).await?;
    if decisions.is_empty() {
        return Err(Error::NoMatch);
    }

    let prompt = format!(
        "{SYNTHESIS_PROMPT_HEADER}\n\n## Question\n{question}\n\n\
         ## Team's Engineering Decisions\n{}\n\n{SYNTHESIS_PROMPT_INSTRUCTIONS}",
        format_decisions_for_prompt(&decisions),
    );
    let answer = client.complete(&prompt, 1024).await?.trim().to_string();

    Ok(QueryResult {
        question: question.to_string(),
        answer,
        sources_searched: decisions.len(),
        decisions,
    })
}

/// FTS plus entity matching, deduplicated by decision id.
pub async fn find_relevant_decisions(
    store: &Store,
    question: &str,
) -> Result<Vec<DecisionWithSource>> {
    let mut results: Vec<DecisionWithSource> = Vec::new();

    let fts_query = build_fts_query(question, STOP_WORDS);
    if !fts_query.is_empty() {
        for d in store.search_decisions(&fts_query, 10).await? {
            if !results.iter().any(|r| r.decision.id == d.decision.id) {
                results.push(d);
            }
        }
    }

    for entity in matching_entities(store, question).await? {
        for d in store.get_decisions_by_entity(&entity).await? {
            if !results.iter().any(|r| r.decision.id == d.decision.id) {
                results.push(d);
            }
        }
    }

    results.truncate(MAX_CANDIDATES);
    Ok(results)
}

/// Known entity names that appear verbatim in the text.
pub async fn matching_entities(store: &Store, text: &str) -> Result<Vec<String>> {
    let lower = text.to_lowercase();
    Ok(store
        .get_entities()
        .await?
        .into_iter()
        .map(|(e, _)| e.name)
        .filter(|name| lower.contains(&name.to_lowercase()))
        .collect())
}

/// Convert free text into an FTS5 OR query over its meaningful words.
pub fn build_fts_query(text: &str, stop_words: &[&str]) -> String {
    let mut words: Vec<String> = Vec::new();
    for word in text.to_lowercase().split_whitespace() {
        let cleaned: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
        if cleaned.len() > 2 && !stop_words.contains(&cleaned.as_str()) && !words.contains(&cleaned)
        {
            words.push(cleaned);
        }
    }
    words.join(" OR ")
}

pub fn format_decisions_for_prompt(decisions: &[DecisionWithSource]) -> String {
    let mut parts: Vec<String> = Vec::new();
    for (i, d) in decisions.iter().enumerate() {
        parts.push(format!("### Decision {} (from {})", i + 1, d.source_type));
        parts.push(format!("**Summary:** {}", d.decision.summary));
        if !d.decision.reasoning.is_empty() {
            parts.push(format!("**Reasoning:** {}", d.decision.reasoning));
        }
        if !d.decision.alternatives.is_empty() {
            parts.push(format!(
                "**Alternatives considered:** {}",
                d.decision.alternatives.join(", ")
            ));
        }
        parts.push(format!("**Confidence:** {}", d.decision.confidence));
        parts.push(format!("**Source:** {}", d.source_url));
        parts.push(String::new());
    }
    parts.join("\n")
}
