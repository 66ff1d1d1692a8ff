//! Anthropic Messages API client and response parsing.
//!
//! All LLM extraction paths share the same contract: the model is asked to
//! respond with bare JSON, code fences are stripped if it wraps the JSON
//! anyway, and output that still fails to parse surfaces as
//! [`Error::ExtractionMalformed`] so the caller can skip that document and
//! continue the batch.

use std::time::Duration;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{Confidence, Decision, Entity, Learning, LearningCategory};

const DEFAULT_API_BASE: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_RETRIES: u32 = 3;
const RETRY_BASE_DELAY_SECS: u64 = 2;

pub struct AnthropicClient {
    http: reqwest::Client,
    base: String,
    api_key: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(api_key: &str, model: &str) -> Result<Self> {
        Self::with_base(api_key, model, DEFAULT_API_BASE)
    }

    /// Point the client at a different API base. Used by tests.
    pub fn with_base(api_key: &str, model: &str, base: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    /// Send a single user message and return the first text block of the
    /// response. Retries with exponential backoff on 429/5xx/network errors;
    /// other API errors fail immediately.
    pub async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "messages": [{"role": "user", "content": prompt}],
        });

        let mut attempt = 0u32;
        loop {
            if attempt > 0 {
                let delay = RETRY_BASE_DELAY_SECS * (1 << (attempt - 1).min(5));
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }

            let response = self
                .http
                .post(format!("{}/v1/messages", self.base))
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let value: Value = resp.json().await?;
                        let text = value
                            .pointer("/content/0/text")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        return Ok(text.to_string());
                    }
                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    if !retryable || attempt >= MAX_RETRIES {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(Error::Api(format!(
                            "{status}: {}",
                            body.chars().take(300).collect::<String>()
                        )));
                    }
                }
                Err(e) => {
                    if attempt >= MAX_RETRIES {
                        return Err(Error::Api(format!(
                            "request failed after {MAX_RETRIES} retries: {e}"
                        )));
                    }
                }
            }
            attempt += 1;
        }
    }
}

/// Strip a wrapping markdown code fence (with or without a language tag)
/// from model output.
pub fn strip_fences(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // drop the fence line itself, language tag included
    let rest = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Parse a `{"decisions": [...]}` response into decision records tied to
/// `source_id`.
pub fn parse_decisions(
    text: &str,
    source_id: &str,
    decision_date: &str,
) -> Result<Vec<Decision>> {
    let cleaned = strip_fences(text);
    let value: Value =
        serde_json::from_str(cleaned).map_err(|e| Error::ExtractionMalformed {
            source_id: source_id.to_string(),
            detail: format!("invalid JSON: {e}"),
        })?;

    let items = value
        .get("decisions")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::ExtractionMalformed {
            source_id: source_id.to_string(),
            detail: "missing 'decisions' array".to_string(),
        })?;

    let mut decisions = Vec::new();
    for item in items {
        let summary = item
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if summary.is_empty() {
            return Err(Error::ExtractionMalformed {
                source_id: source_id.to_string(),
                detail: "decision without a summary".to_string(),
            });
        }
        let mut decision = Decision::new(source_id, summary);
        decision.reasoning = item
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        decision.alternatives = string_array(item.get("alternatives"));
        decision.entities = parse_entities(item.get("entities"));
        decision.confidence = item
            .get("confidence")
            .and_then(Value::as_str)
            .and_then(Confidence::parse)
            .unwrap_or(Confidence::Medium);
        decision.decision_date = decision_date.to_string();
        decisions.push(decision);
    }
    Ok(decisions)
}

/// Parse a `{"learnings": [...]}` response. Items with an unknown category
/// make the whole response malformed rather than being silently coerced.
pub fn parse_learnings(text: &str, source_id: &str, session_date: &str) -> Result<Vec<Learning>> {
    let cleaned = strip_fences(text);
    let value: Value =
        serde_json::from_str(cleaned).map_err(|e| Error::ExtractionMalformed {
            source_id: source_id.to_string(),
            detail: format!("invalid JSON: {e}"),
        })?;

    let items = value
        .get("learnings")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::ExtractionMalformed {
            source_id: source_id.to_string(),
            detail: "missing 'learnings' array".to_string(),
        })?;

    let mut learnings = Vec::new();
    for item in items {
        let summary = item
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if summary.is_empty() {
            return Err(Error::ExtractionMalformed {
                source_id: source_id.to_string(),
                detail: "learning without a summary".to_string(),
            });
        }
        let category_raw = item
            .get("category")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let category =
            LearningCategory::parse(category_raw).ok_or_else(|| Error::ExtractionMalformed {
                source_id: source_id.to_string(),
                detail: format!("unknown learning category '{category_raw}'"),
            })?;

        let mut learning = Learning::new(source_id, category, summary);
        learning.detail = item
            .get("detail")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        learning.components = string_array(item.get("components"));
        learning.entities = parse_entities(item.get("entities"));
        learning.session_date = session_date.to_string();
        learnings.push(learning);
    }
    Ok(learnings)
}

fn string_array(value: Option<&Value>) -> Vec<String> {
    value
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

fn parse_entities(value: Option<&Value>) -> Vec<Entity> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|e| {
                    let name = e.get("name").and_then(Value::as_str)?;
                    let entity_type = e
                        .get("entity_type")
                        .and_then(Value::as_str)
                        .unwrap_or("technology");
                    Some(Entity::new(name, entity_type))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_plain_and_tagged_fences() {
        assert_eq!(strip_fences("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(strip_fences("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_fences("  ```json\n{}\n```  "), "{}");
    }

    #[test]
    fn parses_decisions_with_defaults() {
        let text = r#"{"decisions": [{
            "summary": "Use Kafka for event transport",
            "reasoning": "Existing ops experience",
            "alternatives": ["RabbitMQ"],
            "entities": [{"name": "kafka", "entity_type": "technology"}, {"name": "events"}],
            "confidence": "high"
        }]}"#;
        let decisions = parse_decisions(text, "pr:9", "2025-05-01").unwrap();
        assert_eq!(decisions.len(), 1);
        let d = &decisions[0];
        assert_eq!(d.summary, "Use Kafka for event transport");
        assert_eq!(d.confidence, Confidence::High);
        assert_eq!(d.decision_date, "2025-05-01");
        assert_eq!(d.entities[1].entity_type, "technology");
    }

    #[test]
    fn empty_decisions_array_is_valid() {
        let decisions = parse_decisions(r#"{"decisions": []}"#, "pr:1", "").unwrap();
        assert!(decisions.is_empty());
    }

    #[test]
    fn invalid_json_is_malformed() {
        let err = parse_decisions("not json at all", "pr:2", "").unwrap_err();
        match err {
            Error::ExtractionMalformed { source_id, .. } => assert_eq!(source_id, "pr:2"),
            other => panic!("expected ExtractionMalformed, got {other:?}"),
        }
    }

    #[test]
    fn missing_decisions_key_is_malformed() {
        assert!(parse_decisions(r#"{"results": []}"#, "pr:3", "").is_err());
    }

    #[test]
    fn unknown_confidence_falls_back_to_medium() {
        let text = r#"{"decisions": [{"summary": "x", "confidence": "certain"}]}"#;
        let decisions = parse_decisions(text, "pr:4", "").unwrap();
        assert_eq!(decisions[0].confidence, Confidence::Medium);
    }

    #[test]
    fn parses_learnings_and_rejects_bad_category() {
        let text = r#"{"learnings": [{
            "category": "gotcha",
            "summary": "SQLite FTS MATCH cannot be parameterized through a view",
            "detail": "Join on the id column instead",
            "components": ["store"]
        }]}"#;
        let learnings = parse_learnings(text, "session:abc", "2025-06-01").unwrap();
        assert_eq!(learnings[0].category, LearningCategory::Gotcha);
        assert_eq!(learnings[0].session_date, "2025-06-01");

        let bad = r#"{"learnings": [{"category": "insight", "summary": "x"}]}"#;
        assert!(parse_learnings(bad, "session:abc", "").is_err());
    }
}
