//! Deterministic parsing of Architecture Decision Records.
//!
//! Handles the two common markdown layouts (Nygard: Status / Context /
//! Decision / Consequences, and MADR: Context and Problem Statement /
//! Considered Options / Decision Outcome). Files with neither a decision nor
//! a context section yield no decision here and fall through to LLM
//! extraction in the pipeline.
//!
//! Entity extraction is a keyword table with word-boundary matching. That is
//! intentionally simple: structured ADRs give enough signal, and the PR path
//! uses the LLM for richer extraction.

use chrono::Utc;

use crate::models::{Confidence, Decision, Entity, Source, SourceType};

const TECH_KEYWORDS: &[&str] = &[
    "postgresql",
    "postgres",
    "mysql",
    "mongodb",
    "sqlite",
    "redis",
    "elasticsearch",
    "dynamodb",
    "cassandra",
    "react",
    "vue",
    "angular",
    "svelte",
    "next.js",
    "nextjs",
    "django",
    "flask",
    "fastapi",
    "express",
    "spring",
    "rails",
    "docker",
    "kubernetes",
    "k8s",
    "terraform",
    "aws",
    "gcp",
    "azure",
    "graphql",
    "grpc",
    "rest",
    "kafka",
    "rabbitmq",
    "typescript",
    "python",
    "java",
    "go",
    "rust",
    "node.js",
    "nodejs",
];

const PATTERN_KEYWORDS: &[&str] = &[
    "microservice",
    "monolith",
    "serverless",
    "event-driven",
    "cqrs",
    "event sourcing",
    "saga",
    "circuit breaker",
    "api gateway",
    "pub/sub",
    "message queue",
];

#[derive(Debug, Default)]
struct Sections {
    context: Option<String>,
    decision: Option<String>,
    alternatives: Option<String>,
}

/// Parse an ADR file into a source plus zero or one decisions.
///
/// An empty decision list means the file did not look like a structured ADR;
/// the caller decides whether to route it through LLM extraction instead.
pub fn extract_adr(path: &str, url: &str, content: &str, repo: &str) -> (Source, Vec<Decision>) {
    let title = extract_title(content);
    let source = Source {
        id: format!("adr:{path}"),
        source_type: SourceType::Adr,
        repo: repo.to_string(),
        url: url.to_string(),
        title: title.clone(),
        raw_content: content.to_string(),
        fetched_at: Utc::now(),
    };

    let sections = parse_sections(content);
    if sections.decision.is_none() && sections.context.is_none() {
        return (source, Vec::new());
    }

    let summary = build_summary(&sections, &title);
    let reasoning = sections.context.clone().unwrap_or_default();
    let alternatives = extract_alternatives(sections.alternatives.as_deref().unwrap_or(""));
    let entity_text = format!(
        "{summary} {reasoning} {}",
        sections.alternatives.as_deref().unwrap_or("")
    );

    let mut decision = Decision::new(source.id.clone(), summary);
    decision.reasoning = reasoning;
    decision.alternatives = alternatives;
    decision.entities = extract_entities(&entity_text);
    decision.confidence = assess_confidence(&sections);
    decision.decision_date = extract_date(content);

    (source, vec![decision])
}

/// H1 title, with numbering prefixes like `ADR-001:` or `3.` stripped.
pub fn extract_title(content: &str) -> String {
    for line in content.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("# ") {
            return strip_numbering(rest.trim()).to_string();
        }
    }
    for line in content.lines() {
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    "Untitled ADR".to_string()
}

fn strip_numbering(title: &str) -> &str {
    // "ADR-001: Title" / "ADR 1 Title"
    let lower = title.to_lowercase();
    if lower.starts_with("adr") {
        let rest = &title[3..];
        let rest = rest.trim_start_matches(['-', ' ']);
        let after_digits = rest.trim_start_matches(|c: char| c.is_ascii_digit());
        if after_digits.len() < rest.len() {
            return after_digits.trim_start_matches([':', ' ']);
        }
        return title;
    }
    // "1. Title"
    let after_digits = title.trim_start_matches(|c: char| c.is_ascii_digit());
    if after_digits.len() < title.len() {
        if let Some(rest) = after_digits.strip_prefix('.') {
            return rest.trim_start();
        }
    }
    title
}

fn classify_heading(line: &str) -> Option<&'static str> {
    let rest = line.trim().strip_prefix("##")?;
    if rest.starts_with('#') {
        return None;
    }
    let name = rest.trim().to_lowercase();
    let normalized: String = name.split_whitespace().collect::<Vec<_>>().join(" ");
    match normalized.as_str() {
        "status" => Some("status"),
        "context" | "context and problem statement" => Some("context"),
        "decision" | "decision outcome" | "chosen option" => Some("decision"),
        "consequences" => Some("consequences"),
        "option" | "options" | "considered option" | "considered options" | "alternatives"
        | "alternatives considered" => Some("alternatives"),
        _ => None,
    }
}

fn parse_sections(content: &str) -> Sections {
    let mut sections = Sections::default();
    let mut current: Option<&'static str> = None;
    let mut buffer: Vec<&str> = Vec::new();

    let mut commit = |name: Option<&'static str>, buffer: &mut Vec<&str>, out: &mut Sections| {
        if let Some(name) = name {
            let text = buffer.join("\n").trim().to_string();
            let slot = match name {
                "context" => Some(&mut out.context),
                "decision" => Some(&mut out.decision),
                "alternatives" => Some(&mut out.alternatives),
                _ => None,
            };
            // first occurrence of a section wins
            if let Some(slot) = slot {
                if slot.is_none() {
                    *slot = Some(text);
                }
            }
        }
        buffer.clear();
    };

    for line in content.lines() {
        if let Some(name) = classify_heading(line) {
            commit(current, &mut buffer, &mut sections);
            current = Some(name);
        } else if current.is_some() {
            buffer.push(line);
        }
    }
    commit(current, &mut buffer, &mut sections);

    sections
}

fn build_summary(sections: &Sections, title: &str) -> String {
    if let Some(decision_text) = &sections.decision {
        if !decision_text.is_empty() {
            let first_para = decision_text
                .split("\n\n")
                .next()
                .unwrap_or(decision_text)
                .trim();
            if first_para.chars().count() <= 300 {
                return first_para.to_string();
            }
            let truncated: String = first_para.chars().take(297).collect();
            return format!("{truncated}...");
        }
    }
    title.to_string()
}

fn extract_alternatives(text: &str) -> Vec<String> {
    let mut alternatives = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        let item = if let Some(rest) = trimmed.strip_prefix("- ") {
            Some(rest)
        } else if let Some(rest) = trimmed.strip_prefix("* ") {
            Some(rest)
        } else {
            numbered_item(trimmed)
        };
        if let Some(item) = item {
            let item = item.trim();
            if !item.is_empty() {
                alternatives.push(item.to_string());
            }
        }
    }
    alternatives
}

fn numbered_item(line: &str) -> Option<&str> {
    let after_digits = line.trim_start_matches(|c: char| c.is_ascii_digit());
    if after_digits.len() < line.len() {
        if let Some(rest) = after_digits.strip_prefix(". ") {
            return Some(rest);
        }
    }
    None
}

/// Keyword-table entity extraction with word-boundary matching, so `go` does
/// not match inside `mongodb`.
pub fn extract_entities(text: &str) -> Vec<Entity> {
    let lower = text.to_lowercase();
    let mut entities = Vec::new();
    for keyword in TECH_KEYWORDS {
        if contains_word(&lower, keyword) {
            entities.push(Entity::new(*keyword, "technology"));
        }
    }
    for keyword in PATTERN_KEYWORDS {
        if contains_word(&lower, keyword) {
            entities.push(Entity::new(*keyword, "pattern"));
        }
    }
    entities
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    for (idx, _) in haystack.match_indices(needle) {
        let before_ok = haystack[..idx]
            .chars()
            .next_back()
            .map(|c| !c.is_alphanumeric())
            .unwrap_or(true);
        let after_ok = haystack[idx + needle.len()..]
            .chars()
            .next()
            .map(|c| !c.is_alphanumeric())
            .unwrap_or(true);
        if before_ok && after_ok {
            return true;
        }
    }
    false
}

fn assess_confidence(sections: &Sections) -> Confidence {
    let has_decision = sections.decision.as_deref().is_some_and(|s| !s.is_empty());
    let has_context = sections.context.as_deref().is_some_and(|s| !s.is_empty());
    if has_decision && has_context {
        Confidence::High
    } else if has_decision || has_context {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

/// First `YYYY-MM-DD` token in the document, empty string when none.
pub fn extract_date(content: &str) -> String {
    let bytes = content.as_bytes();
    let mut i = 0;
    while i + 10 <= bytes.len() {
        if is_iso_date(&bytes[i..i + 10])
            && (i == 0 || !bytes[i - 1].is_ascii_alphanumeric())
            && (i + 10 == bytes.len() || !bytes[i + 10].is_ascii_alphanumeric())
        {
            return content[i..i + 10].to_string();
        }
        i += 1;
    }
    String::new()
}

fn is_iso_date(b: &[u8]) -> bool {
    b.len() == 10
        && b[..4].iter().all(u8::is_ascii_digit)
        && b[4] == b'-'
        && b[5].is_ascii_digit()
        && b[6].is_ascii_digit()
        && b[7] == b'-'
        && b[8].is_ascii_digit()
        && b[9].is_ascii_digit()
}

#[cfg(test)]
mod tests {
    use super::*;

    const NYGARD: &str = "\
# ADR-001: Use SQLite for storage

Date: 2024-01-15

## Status

Accepted

## Context

We need a storage layer with zero operational burden for a single-node tool.

## Decision

We will use SQLite as the storage engine, with WAL mode enabled.

It ships as a single file and needs no server.

## Consequences

Backups are a file copy.
";

    const MADR: &str = "\
# 7. Frontend framework

## Context and Problem Statement

The dashboard needs a component framework.

## Considered Options

- React
- Vue
- Svelte

## Decision Outcome

Chosen option: React, because the team already knows it.
";

    #[test]
    fn parses_nygard_format() {
        let (source, decisions) =
            extract_adr("docs/adr/001.md", "https://x/001.md", NYGARD, "acme/widgets");
        assert_eq!(source.id, "adr:docs/adr/001.md");
        assert_eq!(source.title, "Use SQLite for storage");
        assert_eq!(decisions.len(), 1);

        let d = &decisions[0];
        assert_eq!(
            d.summary,
            "We will use SQLite as the storage engine, with WAL mode enabled."
        );
        assert!(d.reasoning.contains("zero operational burden"));
        assert_eq!(d.confidence, Confidence::High);
        assert_eq!(d.decision_date, "2024-01-15");
        assert!(d.entities.iter().any(|e| e.name == "sqlite"));
    }

    #[test]
    fn parses_madr_format_with_alternatives() {
        let (source, decisions) =
            extract_adr("docs/decisions/007.md", "https://x/007.md", MADR, "acme/widgets");
        assert_eq!(source.title, "Frontend framework");
        let d = &decisions[0];
        assert_eq!(
            d.summary,
            "Chosen option: React, because the team already knows it."
        );
        assert_eq!(d.alternatives, vec!["React", "Vue", "Svelte"]);
        assert!(d.entities.iter().any(|e| e.name == "react"));
        assert!(d.entities.iter().any(|e| e.name == "vue"));
    }

    #[test]
    fn repeat_parse_is_deterministic() {
        let (_, first) = extract_adr("a.md", "u", NYGARD, "r");
        let (_, second) = extract_adr("a.md", "u", NYGARD, "r");
        assert_eq!(first[0].summary, second[0].summary);
        assert_eq!(first[0].reasoning, second[0].reasoning);
        assert_eq!(first[0].alternatives, second[0].alternatives);
        assert_eq!(first[0].entities, second[0].entities);
        assert_eq!(first[0].confidence, second[0].confidence);
        assert_eq!(first[0].decision_date, second[0].decision_date);
    }

    #[test]
    fn unstructured_file_yields_no_decision() {
        let content = "# Meeting notes\n\nWe talked about various things.\n";
        let (source, decisions) = extract_adr("notes.md", "u", content, "r");
        assert_eq!(source.title, "Meeting notes");
        assert!(decisions.is_empty());
    }

    #[test]
    fn title_strips_numbering_prefixes() {
        assert_eq!(extract_title("# ADR-012: Pick a queue"), "Pick a queue");
        assert_eq!(extract_title("# ADR 12: Pick a queue"), "Pick a queue");
        assert_eq!(extract_title("# 12. Pick a queue"), "Pick a queue");
        assert_eq!(extract_title("# Pick a queue"), "Pick a queue");
        assert_eq!(extract_title("no heading here"), "no heading here");
    }

    #[test]
    fn long_decision_section_truncates_summary() {
        let long = format!(
            "# T\n\n## Context\n\nc\n\n## Decision\n\n{}\n",
            "x".repeat(400)
        );
        let (_, decisions) = extract_adr("a.md", "u", &long, "r");
        assert_eq!(decisions[0].summary.chars().count(), 300);
        assert!(decisions[0].summary.ends_with("..."));
    }

    #[test]
    fn word_boundaries_prevent_false_entity_matches() {
        let entities = extract_entities("We store data in MongoDB and never mention that language");
        assert!(entities.iter().any(|e| e.name == "mongodb"));
        assert!(!entities.iter().any(|e| e.name == "go"));
    }

    #[test]
    fn entity_extraction_tags_patterns() {
        let entities = extract_entities("Moving from a monolith to event-driven services");
        assert!(entities
            .iter()
            .any(|e| e.name == "monolith" && e.entity_type == "pattern"));
        assert!(entities.iter().any(|e| e.name == "event-driven"));
    }

    #[test]
    fn date_requires_word_boundaries() {
        assert_eq!(extract_date("Date: 2024-01-15 was chosen"), "2024-01-15");
        assert_eq!(extract_date("id x2024-01-155 is not a date"), "");
        assert_eq!(extract_date("no date here"), "");
    }
}
