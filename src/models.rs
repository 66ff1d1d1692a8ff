//! Core data models shared across extraction, storage, and query.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named technology, pattern, service, or library referenced by a decision
/// or learning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub entity_type: String,
}

impl Entity {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
        }
    }
}

/// Where extracted knowledge comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Adr,
    Pr,
    Doc,
    Session,
    Manual,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Adr => "adr",
            SourceType::Pr => "pr",
            SourceType::Doc => "doc",
            SourceType::Session => "session",
            SourceType::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "adr" => Some(SourceType::Adr),
            "pr" => Some(SourceType::Pr),
            "doc" => Some(SourceType::Doc),
            "session" => Some(SourceType::Session),
            "manual" => Some(SourceType::Manual),
            _ => None,
        }
    }

    /// Specificity rank used when merging duplicate decisions. ADRs state
    /// decisions explicitly; manual notes are the least structured.
    pub fn specificity(&self) -> u8 {
        match self {
            SourceType::Adr => 4,
            SourceType::Pr => 3,
            SourceType::Doc => 2,
            SourceType::Session => 1,
            SourceType::Manual => 0,
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fetched document that decisions or learnings were extracted from.
///
/// The id is deterministic per source (`adr:docs/adr/001.md`, `pr:123`,
/// `session:<checkpoint>`) so re-running extraction replaces rather than
/// duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub source_type: SourceType,
    pub repo: String,
    pub url: String,
    pub title: String,
    pub raw_content: String,
    pub fetched_at: DateTime<Utc>,
}

/// How sure we are that a decision record reflects what was actually decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high" => Some(Confidence::High),
            "medium" => Some(Confidence::Medium),
            "low" => Some(Confidence::Low),
            _ => None,
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An engineering decision: what was chosen, why, and what was rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub source_id: String,
    pub summary: String,
    pub reasoning: String,
    #[serde(default)]
    pub alternatives: Vec<String>,
    #[serde(default)]
    pub entities: Vec<Entity>,
    pub confidence: Confidence,
    /// ISO date (YYYY-MM-DD) from the ADR header or PR merge, empty if unknown.
    #[serde(default)]
    pub decision_date: String,
    pub extracted_at: DateTime<Utc>,
}

impl Decision {
    pub fn new(source_id: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_id: source_id.into(),
            summary: summary.into(),
            reasoning: String::new(),
            alternatives: Vec::new(),
            entities: Vec::new(),
            confidence: Confidence::Medium,
            decision_date: String::new(),
            extracted_at: Utc::now(),
        }
    }
}

/// Category of an operational learning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningCategory {
    BugFix,
    Gotcha,
    Implementation,
}

impl LearningCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LearningCategory::BugFix => "bug_fix",
            LearningCategory::Gotcha => "gotcha",
            LearningCategory::Implementation => "implementation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bug_fix" => Some(LearningCategory::BugFix),
            "gotcha" => Some(LearningCategory::Gotcha),
            "implementation" => Some(LearningCategory::Implementation),
            _ => None,
        }
    }
}

impl std::fmt::Display for LearningCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An operational learning: a bug fix, a gotcha, or an implementation note
/// captured from a work session or recorded manually.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Learning {
    pub id: String,
    pub source_id: String,
    pub category: LearningCategory,
    pub summary: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub entities: Vec<Entity>,
    /// ISO date of the session the learning came from, empty if unknown.
    #[serde(default)]
    pub session_date: String,
    pub extracted_at: DateTime<Utc>,
}

impl Learning {
    pub fn new(
        source_id: impl Into<String>,
        category: LearningCategory,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_id: source_id.into(),
            category,
            summary: summary.into(),
            detail: String::new(),
            components: Vec::new(),
            entities: Vec::new(),
            session_date: String::new(),
            extracted_at: Utc::now(),
        }
    }
}

/// A decision joined with its source row, as returned by store queries.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionWithSource {
    #[serde(flatten)]
    pub decision: Decision,
    pub source_url: String,
    pub source_title: String,
    pub source_type: SourceType,
}

/// A learning joined with its source row.
#[derive(Debug, Clone, Serialize)]
pub struct LearningWithSource {
    #[serde(flatten)]
    pub learning: Learning,
    pub source_url: String,
    pub source_title: String,
    pub source_type: SourceType,
}
