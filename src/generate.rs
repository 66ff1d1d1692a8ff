//! Static context file generation.
//!
//! Renders the stored decisions and learnings into a markdown file AI coding
//! agents load as ambient context (CLAUDE.md for Claude Code, .cursorrules
//! for Cursor, or a generic document). Complements the MCP server for tools
//! that cannot run one.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::models::{DecisionWithSource, Entity, LearningWithSource};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextFormat {
    Claude,
    Cursor,
    Generic,
}

impl ContextFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "claude" => Some(ContextFormat::Claude),
            "cursor" => Some(ContextFormat::Cursor),
            "generic" => Some(ContextFormat::Generic),
            _ => None,
        }
    }

    pub fn default_output(&self) -> &'static str {
        match self {
            ContextFormat::Claude => "CLAUDE.md",
            ContextFormat::Cursor => ".cursorrules",
            ContextFormat::Generic => "DECISIONS.md",
        }
    }
}

/// Render the context document and write it to `output`.
pub async fn generate_context_file(
    store: &Store,
    output: &Path,
    format: ContextFormat,
) -> Result<PathBuf> {
    let content = generate_context(store, format).await?;
    std::fs::write(output, content)?;
    Ok(output.to_path_buf())
}

/// Render the full context document as a string.
pub async fn generate_context(store: &Store, format: ContextFormat) -> Result<String> {
    let decisions = store.get_all_decisions(100).await?;
    let entities = store.get_entities().await?;
    let learnings = store.get_recent_learnings(None, 30).await?;
    Ok(render(&decisions, &entities, &learnings, format))
}

fn render(
    decisions: &[DecisionWithSource],
    entities: &[(Entity, i64)],
    learnings: &[LearningWithSource],
    format: ContextFormat,
) -> String {
    let mut out = String::new();

    match format {
        ContextFormat::Claude => {
            out.push_str("# Engineering Decisions\n\n");
            out.push_str(
                "Generated by setkontext from this repository's ADRs, PRs, and docs. \
                 Treat these decisions as constraints when implementing changes; if an \
                 approach would contradict one, flag it instead of proceeding.\n\n",
            );
        }
        ContextFormat::Cursor => {
            out.push_str("# Engineering decision rules (generated by setkontext)\n");
            out.push_str("# Follow these documented team decisions when writing code.\n\n");
        }
        ContextFormat::Generic => {
            out.push_str("# Engineering Decisions\n\n");
        }
    }

    if !entities.is_empty() {
        out.push_str("## Tech Stack and Key Concepts\n\n");
        for (entity, count) in entities.iter().take(20) {
            out.push_str(&format!(
                "- {} ({}): {} decision(s)\n",
                entity.name, entity.entity_type, count
            ));
        }
        out.push('\n');
    }

    out.push_str("## Decisions\n\n");
    if decisions.is_empty() {
        out.push_str("(no decisions extracted yet - run `setkontext extract`)\n\n");
    }
    for d in decisions {
        out.push_str(&format!("### {}\n\n", d.decision.summary));
        if !d.decision.reasoning.is_empty() {
            out.push_str(&format!("- Why: {}\n", d.decision.reasoning));
        }
        if !d.decision.alternatives.is_empty() {
            out.push_str(&format!(
                "- Rejected: {}\n",
                d.decision.alternatives.join(", ")
            ));
        }
        out.push_str(&format!(
            "- Confidence: {} (from {})\n",
            d.decision.confidence, d.source_type
        ));
        if !d.source_url.is_empty() {
            out.push_str(&format!("- Source: {}\n", d.source_url));
        }
        out.push('\n');
    }

    if !learnings.is_empty() {
        out.push_str("## Operational Learnings\n\n");
        for l in learnings {
            out.push_str(&format!(
                "- [{}] {}\n",
                l.learning.category, l.learning.summary
            ));
            if !l.learning.detail.is_empty() {
                out.push_str(&format!("  {}\n", l.learning.detail));
            }
        }
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Confidence, Decision, Learning, LearningCategory, SourceType,
    };

    fn sample() -> (
        Vec<DecisionWithSource>,
        Vec<(Entity, i64)>,
        Vec<LearningWithSource>,
    ) {
        let mut d = Decision::new("adr:docs/adr/001.md", "Use PostgreSQL as primary store");
        d.reasoning = "Mature tooling".to_string();
        d.alternatives = vec!["MongoDB".to_string()];
        d.confidence = Confidence::High;
        let decisions = vec![DecisionWithSource {
            decision: d,
            source_url: "https://x/001".to_string(),
            source_title: "t".to_string(),
            source_type: SourceType::Adr,
        }];
        let entities = vec![(Entity::new("postgresql", "technology"), 3i64)];
        let mut l = Learning::new("manual:x", LearningCategory::Gotcha, "FTS queries need quoting");
        l.detail = "Bind the MATCH expression, never interpolate".to_string();
        let learnings = vec![LearningWithSource {
            learning: l,
            source_url: String::new(),
            source_title: String::new(),
            source_type: SourceType::Manual,
        }];
        (decisions, entities, learnings)
    }

    #[test]
    fn claude_format_includes_all_sections() {
        let (d, e, l) = sample();
        let out = render(&d, &e, &l, ContextFormat::Claude);
        assert!(out.starts_with("# Engineering Decisions"));
        assert!(out.contains("## Tech Stack and Key Concepts"));
        assert!(out.contains("- postgresql (technology): 3 decision(s)"));
        assert!(out.contains("### Use PostgreSQL as primary store"));
        assert!(out.contains("- Why: Mature tooling"));
        assert!(out.contains("- Rejected: MongoDB"));
        assert!(out.contains("- Source: https://x/001"));
        assert!(out.contains("## Operational Learnings"));
        assert!(out.contains("- [gotcha] FTS queries need quoting"));
    }

    #[test]
    fn cursor_format_has_rules_header() {
        let (d, e, l) = sample();
        let out = render(&d, &e, &l, ContextFormat::Cursor);
        assert!(out.starts_with("# Engineering decision rules"));
    }

    #[test]
    fn empty_store_renders_placeholder() {
        let out = render(&[], &[], &[], ContextFormat::Generic);
        assert!(out.contains("no decisions extracted yet"));
    }

    #[test]
    fn format_parsing_and_defaults() {
        assert_eq!(ContextFormat::parse("claude"), Some(ContextFormat::Claude));
        assert_eq!(ContextFormat::parse("cursor").unwrap().default_output(), ".cursorrules");
        assert_eq!(ContextFormat::parse("yaml"), None);
    }
}
