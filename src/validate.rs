//! Approach validation: proposed plan to structured conflict verdict.
//!
//! Unlike the query engine, retrieval here deliberately casts a wide net;
//! when few decisions match it broadens to the whole store, because a missed
//! conflict is worse than a longer prompt.

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::llm::{strip_fences, AnthropicClient};
use crate::models::DecisionWithSource;
use crate::query::{build_fts_query, matching_entities};
use crate::store::Store;

const MAX_CANDIDATES: usize = 20;
const BROADEN_BELOW: usize = 3;

const STOP_WORDS: &[&str] = &[
    "i", "plan", "to", "will", "am", "going", "want", "need", "the", "a", "an", "is", "are",
    "was", "were", "be", "been", "do", "does", "did", "have", "has", "had", "this", "that",
    "for", "with", "from", "about", "use", "using", "add", "new", "create", "build",
    "implement", "make", "and", "or", "but", "in", "on", "of", "it", "its", "we", "our", "not",
];

const VALIDATION_PROMPT_HEADER: &str = "\
You are a strict engineering decision validator. Your job is to check whether a \
proposed implementation approach CONFLICTS with the team's existing engineering decisions.

Err on the side of flagging potential conflicts - it's better to warn about a possible \
issue than to let a contradiction slip through.";

const VALIDATION_PROMPT_INSTRUCTIONS: &str = "\
## Instructions

Analyze the proposed approach against EVERY decision listed above. For each decision, \
determine if the proposal:
- **CONFLICTS** with it (directly contradicts an explicit choice)
- **ALIGNS** with it (consistent with or supported by the decision)
- Is **IRRELEVANT** (decision is about a different topic)

Then produce your overall verdict.

Respond with ONLY valid JSON in this exact format:
{
  \"verdict\": \"CONFLICTS\" | \"ALIGNS\" | \"NO_COVERAGE\",
  \"conflicts\": [
    {
      \"decision_summary\": \"The specific decision that is violated\",
      \"source_url\": \"URL of the source (from the decisions above)\",
      \"explanation\": \"Why the proposed approach conflicts with this decision\",
      \"severity\": \"hard\" | \"soft\"
    }
  ],
  \"alignments\": [
    \"Brief description of each decision that supports the approach\"
  ],
  \"warnings\": [
    \"Soft concerns even if no hard conflict (e.g., team pattern not formally decided but consistently used)\"
  ],
  \"recommendation\": \"One clear, actionable sentence telling the agent what to do\"
}

Verdict rules:
- **CONFLICTS**: At least one hard conflict exists (explicit decision contradicted)
- **ALIGNS**: No conflicts, and at least one decision actively supports the approach
- **NO_COVERAGE**: No relevant decisions exist for this topic - the team hasn't decided on this yet

Severity rules:
- **hard**: The team explicitly decided on an alternative (e.g., \"chose PostgreSQL\" but agent proposes MongoDB)
- **soft**: No explicit decision, but the team has a consistent pattern (e.g., REST everywhere, agent proposes GraphQL)

The recommendation must be specific and actionable:
- GOOD: \"Use PostgreSQL instead - the team chose it over MongoDB for X reasons (see PR #42)\"
- BAD: \"There might be a conflict, please review\"

If verdict is NO_COVERAGE, the recommendation should note that this is a new decision area \
and suggest documenting whatever choice is made.";

#[derive(Debug, Clone, Serialize)]
pub struct ConflictDetail {
    pub decision_summary: String,
    pub source_url: String,
    pub explanation: String,
    /// "hard" or "soft".
    pub severity: String,
}

#[derive(Debug, Serialize)]
pub struct ValidationResult {
    pub proposed_approach: String,
    /// "CONFLICTS", "ALIGNS", or "NO_COVERAGE".
    pub verdict: String,
    pub conflicts: Vec<ConflictDetail>,
    pub alignments: Vec<String>,
    pub warnings: Vec<String>,
    pub recommendation: String,
    pub decisions_checked: usize,
}

impl ValidationResult {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Check a proposed approach against stored decisions.
pub async fn validate(
    store: &Store,
    client: &AnthropicClient,
    proposed_approach: &str,
    context: &str,
) -> Result<ValidationResult> {
    let decisions = find_candidates(store, proposed_approach).await?;

    if decisions.is_empty() {
        return Ok(ValidationResult {
            proposed_approach: proposed_approach.to_string(),
            verdict: "NO_COVERAGE".to_string(),
            conflicts: Vec::new(),
            alignments: Vec::new(),
            warnings: Vec::new(),
            recommendation: "No engineering decisions exist for this area. Proceed with your \
                             best judgment, but consider documenting this choice as a new \
                             decision for the team."
                .to_string(),
            decisions_checked: 0,
        });
    }

    let context_section = if context.is_empty() {
        String::new()
    } else {
        format!("## Context\n{context}\n\n")
    };
    let prompt = format!(
        "{VALIDATION_PROMPT_HEADER}\n\n## Proposed Approach\n{proposed_approach}\n\n\
         {context_section}## Team's Engineering Decisions\n{}\n\n{VALIDATION_PROMPT_INSTRUCTIONS}",
        format_decisions(&decisions),
    );
    let response = client.complete(&prompt, 1024).await?;

    Ok(parse_response(
        &response,
        proposed_approach,
        decisions.len(),
    ))
}

async fn find_candidates(store: &Store, text: &str) -> Result<Vec<DecisionWithSource>> {
    let mut results: Vec<DecisionWithSource> = Vec::new();

    let fts_query = build_fts_query(text, STOP_WORDS);
    if !fts_query.is_empty() {
        for d in store.search_decisions(&fts_query, 15).await? {
            if !results.iter().any(|r| r.decision.id == d.decision.id) {
                results.push(d);
            }
        }
    }

    for entity in matching_entities(store, text).await? {
        for d in store.get_decisions_by_entity(&entity).await? {
            if !results.iter().any(|r| r.decision.id == d.decision.id) {
                results.push(d);
            }
        }
    }

    // few hits: broaden to everything so potential conflicts are not missed
    if results.len() < BROADEN_BELOW {
        for d in store.get_all_decisions(15).await? {
            if !results.iter().any(|r| r.decision.id == d.decision.id) {
                results.push(d);
            }
        }
    }

    results.truncate(MAX_CANDIDATES);
    Ok(results)
}

/// Malformed model output degrades to a cautious NO_COVERAGE result instead
/// of failing the call.
fn parse_response(text: &str, proposed_approach: &str, decisions_checked: usize) -> ValidationResult {
    let cleaned = strip_fences(text);
    let Ok(data) = serde_json::from_str::<Value>(cleaned) else {
        return ValidationResult {
            proposed_approach: proposed_approach.to_string(),
            verdict: "NO_COVERAGE".to_string(),
            conflicts: Vec::new(),
            alignments: Vec::new(),
            warnings: Vec::new(),
            recommendation: "Validation response was not parseable. Proceed with caution."
                .to_string(),
            decisions_checked,
        };
    };

    let conflicts = data
        .get("conflicts")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|c| ConflictDetail {
                    decision_summary: str_field(c, "decision_summary"),
                    source_url: str_field(c, "source_url"),
                    explanation: str_field(c, "explanation"),
                    severity: {
                        let s = str_field(c, "severity");
                        if s.is_empty() { "soft".to_string() } else { s }
                    },
                })
                .collect()
        })
        .unwrap_or_default();

    ValidationResult {
        proposed_approach: proposed_approach.to_string(),
        verdict: {
            let v = str_field(&data, "verdict");
            if v.is_empty() { "NO_COVERAGE".to_string() } else { v }
        },
        conflicts,
        alignments: str_array(&data, "alignments"),
        warnings: str_array(&data, "warnings"),
        recommendation: str_field(&data, "recommendation"),
        decisions_checked,
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn str_array(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn format_decisions(decisions: &[DecisionWithSource]) -> String {
    let mut parts: Vec<String> = Vec::new();
    for (i, d) in decisions.iter().enumerate() {
        parts.push(format!(
            "### Decision {} (from {}, confidence: {})",
            i + 1,
            d.source_type,
            d.decision.confidence
        ));
        parts.push(format!("**Summary:** {}", d.decision.summary));
        if !d.decision.reasoning.is_empty() {
            parts.push(format!("**Reasoning:** {}", d.decision.reasoning));
        }
        if !d.decision.alternatives.is_empty() {
            parts.push(format!(
                "**Rejected alternatives:** {}",
                d.decision.alternatives.join(", ")
            ));
        }
        parts.push(format!("**Source:** {}", d.source_url));
        parts.push(String::new());
    }
    parts.join("\n")
}
