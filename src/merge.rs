//! Duplicate-decision detection and merging.
//!
//! The same decision often surfaces in several places (an ADR plus the PR
//! that implemented it). Before inserting a newly extracted decision the
//! pipeline scores it against stored decisions and merges instead of
//! inserting when the score crosses the configured threshold.

use std::collections::HashSet;

use crate::models::{Decision, DecisionWithSource, SourceType};

const SUMMARY_WEIGHT: f64 = 0.7;
const ENTITY_WEIGHT: f64 = 0.3;

/// Similarity in `[0, 1]` between two decisions: a weighted Jaccard over
/// summary tokens and entity names. When neither side carries entities the
/// summary term gets full weight.
pub fn similarity(a: &Decision, b: &Decision) -> f64 {
    let summary = jaccard(&tokenize(&a.summary), &tokenize(&b.summary));

    let ents_a: HashSet<String> = a.entities.iter().map(|e| e.name.to_lowercase()).collect();
    let ents_b: HashSet<String> = b.entities.iter().map(|e| e.name.to_lowercase()).collect();

    if ents_a.is_empty() && ents_b.is_empty() {
        summary
    } else {
        SUMMARY_WEIGHT * summary + ENTITY_WEIGHT * jaccard(&ents_a, &ents_b)
    }
}

/// Find the stored decision most similar to `candidate`, if any scores at or
/// above `threshold`.
pub fn best_match<'a>(
    candidate: &Decision,
    existing: &'a [DecisionWithSource],
    threshold: f64,
) -> Option<&'a DecisionWithSource> {
    existing
        .iter()
        .map(|d| (similarity(candidate, &d.decision), d))
        .filter(|(score, _)| *score >= threshold)
        .max_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(_, d)| d)
}

/// Merge `incoming` into a copy of `kept`.
///
/// The summary and reasoning come from whichever side has the more specific
/// source (ties go to the newer extraction); alternatives and entities are
/// unioned; confidence takes the higher of the two; the decision date keeps
/// the earliest non-empty value.
pub fn merge(
    kept: &DecisionWithSource,
    incoming: &Decision,
    incoming_type: SourceType,
) -> Decision {
    let mut merged = kept.decision.clone();

    let incoming_wins = match incoming_type
        .specificity()
        .cmp(&kept.source_type.specificity())
    {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => incoming.extracted_at > kept.decision.extracted_at,
    };

    if incoming_wins {
        merged.summary = incoming.summary.clone();
        if !incoming.reasoning.is_empty() {
            merged.reasoning = incoming.reasoning.clone();
        }
        merged.source_id = incoming.source_id.clone();
    } else if merged.reasoning.is_empty() {
        merged.reasoning = incoming.reasoning.clone();
    }

    for alt in &incoming.alternatives {
        if !merged
            .alternatives
            .iter()
            .any(|a| a.eq_ignore_ascii_case(alt))
        {
            merged.alternatives.push(alt.clone());
        }
    }
    for entity in &incoming.entities {
        if !merged
            .entities
            .iter()
            .any(|e| e.name.eq_ignore_ascii_case(&entity.name))
        {
            merged.entities.push(entity.clone());
        }
    }

    if confidence_rank(incoming.confidence) > confidence_rank(merged.confidence) {
        merged.confidence = incoming.confidence;
    }

    if merged.decision_date.is_empty()
        || (!incoming.decision_date.is_empty() && incoming.decision_date < merged.decision_date)
    {
        if !incoming.decision_date.is_empty() {
            merged.decision_date = incoming.decision_date.clone();
        }
    }

    merged.extracted_at = merged.extracted_at.max(incoming.extracted_at);
    merged
}

fn confidence_rank(c: crate::models::Confidence) -> u8 {
    match c {
        crate::models::Confidence::High => 2,
        crate::models::Confidence::Medium => 1,
        crate::models::Confidence::Low => 0,
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(str::to_string)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Confidence, Entity};

    fn decision(summary: &str, entities: &[&str]) -> Decision {
        let mut d = Decision::new("pr:1", summary);
        d.entities = entities
            .iter()
            .map(|n| Entity::new(*n, "technology"))
            .collect();
        d
    }

    fn with_source(d: Decision, source_type: SourceType) -> DecisionWithSource {
        DecisionWithSource {
            decision: d,
            source_url: String::new(),
            source_title: String::new(),
            source_type,
        }
    }

    #[test]
    fn similarity_is_symmetric_and_bounded() {
        let a = decision("Use PostgreSQL for the primary store", &["postgresql"]);
        let b = decision("Use PostgreSQL as the primary data store", &["postgresql"]);
        let ab = similarity(&a, &b);
        let ba = similarity(&b, &a);
        assert!((ab - ba).abs() < f64::EPSILON);
        assert!((0.0..=1.0).contains(&ab));
        assert!(ab > 0.5);
    }

    #[test]
    fn unrelated_decisions_score_low() {
        let a = decision("Use PostgreSQL for the primary store", &["postgresql"]);
        let b = decision("Adopt trunk-based development", &[]);
        assert!(similarity(&a, &b) < 0.2);
    }

    #[test]
    fn identical_decisions_score_one() {
        let a = decision("Cache sessions in Redis", &["redis"]);
        let b = decision("Cache sessions in Redis", &["redis"]);
        assert!((similarity(&a, &b) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn best_match_respects_threshold() {
        let candidate = decision("Use PostgreSQL for the primary store", &["postgresql"]);
        let stored = vec![with_source(
            decision("Adopt trunk-based development", &[]),
            SourceType::Doc,
        )];
        assert!(best_match(&candidate, &stored, 0.55).is_none());

        let stored = vec![with_source(
            decision("Use PostgreSQL as the primary store", &["postgresql"]),
            SourceType::Adr,
        )];
        assert!(best_match(&candidate, &stored, 0.55).is_some());
    }

    #[test]
    fn merge_prefers_more_specific_source_and_unions_fields() {
        let mut stored = decision("Use Postgres", &["postgres"]);
        stored.confidence = Confidence::Low;
        stored.alternatives = vec!["MySQL".to_string()];
        let stored = with_source(stored, SourceType::Session);

        let mut incoming = decision(
            "Use PostgreSQL as the primary relational store",
            &["postgresql"],
        );
        incoming.reasoning = "Team expertise and mature tooling".to_string();
        incoming.confidence = Confidence::High;
        incoming.alternatives = vec!["mysql".to_string(), "MongoDB".to_string()];
        incoming.decision_date = "2025-03-01".to_string();
        incoming.source_id = "adr:docs/adr/002.md".to_string();

        let merged = merge(&stored, &incoming, SourceType::Adr);
        assert_eq!(
            merged.summary,
            "Use PostgreSQL as the primary relational store"
        );
        assert_eq!(merged.source_id, "adr:docs/adr/002.md");
        assert_eq!(merged.confidence, Confidence::High);
        // "mysql" dedups case-insensitively, MongoDB is new
        assert_eq!(merged.alternatives, vec!["MySQL", "MongoDB"]);
        assert_eq!(merged.entities.len(), 2);
        assert_eq!(merged.decision_date, "2025-03-01");
        // identity of the stored row is preserved
        assert_eq!(merged.id, stored.decision.id);
    }

    #[test]
    fn merge_keeps_more_specific_stored_summary() {
        let stored = with_source(
            decision("Use PostgreSQL as the primary relational store", &[]),
            SourceType::Adr,
        );
        let incoming = decision("We went with postgres", &[]);
        let merged = merge(&stored, &incoming, SourceType::Session);
        assert_eq!(
            merged.summary,
            "Use PostgreSQL as the primary relational store"
        );
    }
}
