//! Configuration loading.
//!
//! Sources, in priority order: process environment, then a `.env` file in the
//! current directory. CLI flags that override a value (like `--db-path`) are
//! applied by the caller after [`Config::load`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const DEFAULT_DB_PATH: &str = "setkontext.db";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_MERGE_THRESHOLD: f64 = 0.55;

/// Candidate directories scanned for architecture decision records.
pub const ADR_PATHS: &[&str] = &[
    "docs/adr",
    "docs/decisions",
    "docs/architectural-decisions",
    "adr",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub github_token: String,
    /// Target repository as `owner/repo`.
    pub repo: String,
    pub anthropic_api_key: String,
    pub db_path: PathBuf,
    pub model: String,
    /// Similarity score above which two decisions are treated as duplicates.
    pub merge_threshold: f64,
    /// Path of the JSONL activity log. Defaults to a sibling of the DB file.
    pub log_path: PathBuf,
}

impl Config {
    /// Load configuration from the environment, falling back to `.env` in the
    /// current directory for any variable the environment does not set.
    pub fn load() -> Self {
        let dotenv = read_dotenv(Path::new(".env"));
        let get = |key: &str| -> String {
            std::env::var(key)
                .ok()
                .filter(|v| !v.is_empty())
                .or_else(|| dotenv.get(key).cloned())
                .unwrap_or_default()
        };

        let db_path = {
            let raw = get("SETKONTEXT_DB_PATH");
            if raw.is_empty() {
                PathBuf::from(DEFAULT_DB_PATH)
            } else {
                PathBuf::from(raw)
            }
        };

        let log_path = {
            let raw = get("SETKONTEXT_LOG_PATH");
            if raw.is_empty() {
                default_log_path(&db_path)
            } else {
                PathBuf::from(raw)
            }
        };

        let model = {
            let raw = get("SETKONTEXT_MODEL");
            if raw.is_empty() {
                DEFAULT_MODEL.to_string()
            } else {
                raw
            }
        };

        let merge_threshold = get("SETKONTEXT_MERGE_THRESHOLD")
            .parse::<f64>()
            .ok()
            .filter(|t| (0.0..=1.0).contains(t))
            .unwrap_or(DEFAULT_MERGE_THRESHOLD);

        Self {
            github_token: get("SETKONTEXT_GITHUB_TOKEN"),
            repo: get("SETKONTEXT_REPO"),
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            db_path,
            model,
            merge_threshold,
            log_path,
        }
    }

    /// Return the list of missing settings, each phrased as an actionable
    /// message naming the variable to set.
    pub fn missing(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.github_token.is_empty() {
            issues.push("GitHub token not set (SETKONTEXT_GITHUB_TOKEN)".to_string());
        }
        if self.repo.is_empty() {
            issues.push("Repository not set (SETKONTEXT_REPO)".to_string());
        }
        if self.anthropic_api_key.is_empty() {
            issues.push("Anthropic API key not set (ANTHROPIC_API_KEY)".to_string());
        }
        issues
    }

    /// Fail unless everything extraction needs is configured.
    pub fn require_extraction(&self) -> Result<()> {
        let issues = self.missing();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "missing configuration:\n  {}\nRun 'setkontext init <owner/repo> --token <token>' to set up",
                issues.join("\n  ")
            )))
        }
    }

    /// Fail unless the Anthropic key needed for query synthesis is set.
    pub fn require_anthropic(&self) -> Result<()> {
        if self.anthropic_api_key.is_empty() {
            Err(Error::Config(
                "Anthropic API key not set (ANTHROPIC_API_KEY)".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

pub fn default_log_path(db_path: &Path) -> PathBuf {
    let dir = db_path.parent().unwrap_or_else(|| Path::new("."));
    dir.join("setkontext-activity.jsonl")
}

/// Minimal KEY=VALUE parser for the `.env` file this tool itself generates.
/// Comments and blank lines are skipped; surrounding quotes are stripped.
fn read_dotenv(path: &Path) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    let Ok(content) = std::fs::read_to_string(path) else {
        return vars;
    };
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            vars.insert(key.trim().to_string(), value.to_string());
        }
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn dotenv_parses_values_and_skips_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "# setkontext").unwrap();
        writeln!(f, "SETKONTEXT_REPO=acme/widgets").unwrap();
        writeln!(f, "SETKONTEXT_GITHUB_TOKEN=\"ghp_abc\"").unwrap();
        writeln!(f).unwrap();
        writeln!(f, "OTHER=1").unwrap();

        let vars = read_dotenv(&path);
        assert_eq!(vars.get("SETKONTEXT_REPO").unwrap(), "acme/widgets");
        assert_eq!(vars.get("SETKONTEXT_GITHUB_TOKEN").unwrap(), "ghp_abc");
        assert_eq!(vars.get("OTHER").unwrap(), "1");
        assert!(!vars.contains_key("# setkontext"));
    }

    #[test]
    fn dotenv_missing_file_is_empty() {
        let vars = read_dotenv(Path::new("/nonexistent/.env"));
        assert!(vars.is_empty());
    }

    #[test]
    fn default_log_path_is_sibling_of_db() {
        let p = default_log_path(Path::new("/tmp/data/setkontext.db"));
        assert_eq!(p, PathBuf::from("/tmp/data/setkontext-activity.jsonl"));
    }

    #[test]
    fn missing_lists_each_unset_variable() {
        let config = Config {
            github_token: String::new(),
            repo: "acme/widgets".to_string(),
            anthropic_api_key: String::new(),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            model: DEFAULT_MODEL.to_string(),
            merge_threshold: DEFAULT_MERGE_THRESHOLD,
            log_path: PathBuf::from("setkontext-activity.jsonl"),
        };
        let issues = config.missing();
        assert_eq!(issues.len(), 2);
        assert!(issues[0].contains("SETKONTEXT_GITHUB_TOKEN"));
        assert!(issues[1].contains("ANTHROPIC_API_KEY"));
    }
}
