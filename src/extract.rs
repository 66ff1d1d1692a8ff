//! Extraction run orchestration.
//!
//! One run walks every configured source kind (ADRs, docs, merged PRs, and
//! optionally agent sessions), routes each document through the right
//! extractor, merges duplicates against the store, and reports what
//! happened. Per-document failures are collected and reported at the end;
//! only unreachable-source and store errors abort the run.

use std::collections::HashSet;

use crate::config::Config;
use crate::docs;
use crate::error::{Error, Result};
use crate::github::GitHubClient;
use crate::llm::AnthropicClient;
use crate::merge;
use crate::models::{Decision, Source, SourceType};
use crate::query;
use crate::session::{self, SessionFetcher};
use crate::models::DecisionWithSource;
use crate::store::Store;
use crate::{adr, pr};

const MERGE_CANDIDATE_LIMIT: i64 = 50;
const MERGE_SCAN_LIMIT: i64 = 500;
const SESSION_LIMIT: usize = 50;

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub pr_limit: usize,
    pub skip_prs: bool,
    pub include_sessions: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            pr_limit: 50,
            skip_prs: false,
            include_sessions: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct ExtractReport {
    pub sources_processed: usize,
    pub decisions_added: usize,
    pub decisions_merged: usize,
    pub learnings_added: usize,
    pub failures: Vec<String>,
}

/// Run a full extraction against the configured repository.
pub async fn run_extract(config: &Config, options: &ExtractOptions) -> Result<()> {
    config.require_extraction()?;

    if config.db_path.exists() {
        println!("Database already exists. New decisions will be merged with existing ones.");
    }
    let store = Store::open(&config.db_path).await?;
    let github = GitHubClient::new(&config.github_token, &config.repo)?;
    let anthropic = AnthropicClient::new(&config.anthropic_api_key, &config.model)?;

    store.acquire_lock("extract").await?;
    let result = run_locked(config, options, &store, &github, &anthropic).await;
    // release even when the run failed partway
    let _ = store.release_lock("extract").await;
    let report = result?;

    let stats = store.get_stats().await?;
    println!("\nExtraction complete:");
    println!("  Sources processed: {}", report.sources_processed);
    println!(
        "  Decisions: {} new, {} merged into existing",
        report.decisions_added, report.decisions_merged
    );
    if report.learnings_added > 0 {
        println!("  Learnings: {}", report.learnings_added);
    }
    println!("  Total decisions in store: {}", stats.total_decisions);
    println!("  Unique entities: {}", stats.unique_entities);

    if !report.failures.is_empty() {
        println!("\n{} source(s) failed and were skipped:", report.failures.len());
        for failure in &report.failures {
            println!("  - {failure}");
        }
    }

    if stats.total_decisions == 0 {
        println!("\nNo decisions were extracted.");
        println!("This can happen if the repository has no PRs, ADRs, or architecture docs.");
        println!("Try increasing --pr-limit or check that the repository documents decisions.");
    } else {
        println!("\nTry it out:");
        println!("  setkontext query \"Why did we choose this tech stack?\"");
        println!("  setkontext stats");
    }
    Ok(())
}

async fn run_locked(
    config: &Config,
    options: &ExtractOptions,
    store: &Store,
    github: &GitHubClient,
    anthropic: &AnthropicClient,
) -> Result<ExtractReport> {
    let mut report = ExtractReport::default();

    // ADRs: deterministic parse, LLM fallback for unstructured files
    println!("Fetching ADR files...");
    let adr_batch = github.fetch_adrs().await?;
    println!("Found {} ADR files", adr_batch.files.len());
    report.failures.extend(adr_batch.failures);
    let adr_paths: HashSet<String> = adr_batch.files.iter().map(|a| a.path.clone()).collect();

    for file in &adr_batch.files {
        let (source, mut decisions) =
            adr::extract_adr(&file.path, &file.url, &file.content, &config.repo);
        if decisions.is_empty() && !file.content.trim().is_empty() {
            match docs::extract_decisions_from_text(&file.path, &file.content, &source.id, anthropic)
                .await
            {
                Ok(extracted) => decisions = extracted,
                Err(e) if is_document_failure(&e) => {
                    report.failures.push(format!("{}: {e}", source.id));
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        ingest(store, config, &source, decisions, &mut report).await?;
    }

    // general docs, excluding paths already handled as ADRs
    println!("Fetching documentation files...");
    let doc_batch = github.fetch_docs(&adr_paths).await?;
    println!("Found {} documentation files", doc_batch.files.len());
    report.failures.extend(doc_batch.failures);
    for file in &doc_batch.files {
        println!("  Analyzing {}...", file.path);
        match docs::extract_doc_decisions(file, &config.repo, anthropic).await {
            Ok((source, decisions)) => {
                println!("    {} decision(s)", decisions.len());
                ingest(store, config, &source, decisions, &mut report).await?;
            }
            Err(e) if is_document_failure(&e) => {
                report.failures.push(format!("doc:{}: {e}", file.path));
            }
            Err(e) => return Err(e),
        }
    }

    if !options.skip_prs {
        println!("Fetching up to {} merged PRs...", options.pr_limit);
        let pr_batch = github.fetch_merged_prs(options.pr_limit).await?;
        println!("Found {} merged PRs", pr_batch.prs.len());
        report.failures.extend(pr_batch.failures);
        for pull in &pr_batch.prs {
            match pr::extract_pr_decisions(pull, &config.repo, anthropic).await {
                Ok((source, decisions)) => {
                    if !decisions.is_empty() {
                        println!("  PR #{}: {} decision(s)", pull.number, decisions.len());
                    }
                    ingest(store, config, &source, decisions, &mut report).await?;
                }
                Err(e) if is_document_failure(&e) => {
                    report.failures.push(format!("pr:{}: {e}", pull.number));
                }
                Err(e) => return Err(e),
            }
        }
    }

    if options.include_sessions {
        extract_sessions(config, store, anthropic, &mut report).await?;
    }

    Ok(report)
}

async fn extract_sessions(
    config: &Config,
    store: &Store,
    anthropic: &AnthropicClient,
    report: &mut ExtractReport,
) -> Result<()> {
    let fetcher = SessionFetcher::new(".");
    if !fetcher.has_checkpoint_branch() {
        println!("No session checkpoint branch found, skipping sessions");
        return Ok(());
    }
    let sessions = fetcher.fetch_sessions(SESSION_LIMIT);
    println!("Found {} session checkpoints", sessions.len());

    for sess in &sessions {
        let source = session::session_source(sess, &config.repo);
        let decisions = match session::extract_session_decisions(sess, &source, anthropic).await {
            Ok(d) => d,
            Err(e) if is_document_failure(&e) => {
                report.failures.push(format!("{}: {e}", source.id));
                continue;
            }
            Err(e) => return Err(e),
        };
        ingest(store, config, &source, decisions, report).await?;

        match session::extract_session_learnings(sess, &source, anthropic).await {
            Ok(learnings) => {
                for learning in &learnings {
                    store.save_learning(learning).await?;
                    report.learnings_added += 1;
                }
            }
            Err(e) if is_document_failure(&e) => {
                report.failures.push(format!("{} (learnings): {e}", source.id));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Save a source and its decisions, replacing anything previously extracted
/// from the same source and merging near-duplicates already in the store.
async fn ingest(
    store: &Store,
    config: &Config,
    source: &Source,
    decisions: Vec<Decision>,
    report: &mut ExtractReport,
) -> Result<()> {
    store.save_source(source).await?;
    store.clear_source_records(&source.id).await?;
    report.sources_processed += 1;

    for decision in decisions {
        save_with_merge(store, config, source.source_type, decision, report).await?;
    }
    Ok(())
}

async fn save_with_merge(
    store: &Store,
    config: &Config,
    source_type: SourceType,
    decision: Decision,
    report: &mut ExtractReport,
) -> Result<()> {
    let existing = merge_candidates(store, &decision).await?;
    match merge::best_match(&decision, &existing, config.merge_threshold) {
        Some(kept) => {
            let merged = merge::merge(kept, &decision, source_type);
            store.save_decision(&merged).await?;
            report.decisions_merged += 1;
        }
        None => {
            store.save_decision(&decision).await?;
            report.decisions_added += 1;
        }
    }
    Ok(())
}

/// Stored decisions worth similarity-checking against a new one: full-text
/// matches on the summary words plus decisions sharing an entity. Scales
/// with the store instead of rescanning every row; a summary with no
/// indexable words falls back to a bounded scan.
async fn merge_candidates(store: &Store, decision: &Decision) -> Result<Vec<DecisionWithSource>> {
    let fts = query::build_fts_query(&decision.summary, &[]);
    if fts.is_empty() {
        return store.get_all_decisions(MERGE_SCAN_LIMIT).await;
    }
    let mut candidates = store.search_decisions(&fts, MERGE_CANDIDATE_LIMIT).await?;
    for entity in &decision.entities {
        for found in store.get_decisions_by_entity(&entity.name).await? {
            if !candidates.iter().any(|c| c.decision.id == found.decision.id) {
                candidates.push(found);
            }
        }
    }
    Ok(candidates)
}

/// Failures that skip one document rather than aborting the run.
fn is_document_failure(e: &Error) -> bool {
    matches!(
        e,
        Error::ExtractionMalformed { .. } | Error::Api(_) | Error::SourceUnavailable(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_MERGE_THRESHOLD, DEFAULT_MODEL};
    use crate::models::Entity;
    use chrono::Utc;
    use std::path::PathBuf;

    fn test_config(db_path: PathBuf) -> Config {
        Config {
            github_token: "t".to_string(),
            repo: "acme/widgets".to_string(),
            anthropic_api_key: "k".to_string(),
            log_path: db_path.with_file_name("activity.jsonl"),
            db_path,
            model: DEFAULT_MODEL.to_string(),
            merge_threshold: DEFAULT_MERGE_THRESHOLD,
        }
    }

    fn adr_source(id: &str) -> Source {
        Source {
            id: id.to_string(),
            source_type: SourceType::Adr,
            repo: "acme/widgets".to_string(),
            url: format!("https://x/{id}"),
            title: id.to_string(),
            raw_content: String::new(),
            fetched_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn reingesting_same_source_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path().join("e.db"));
        let store = Store::open(&config.db_path).await.unwrap();
        let source = adr_source("adr:docs/adr/001.md");

        let mut report = ExtractReport::default();
        let mut d = Decision::new(&source.id, "Use SQLite for storage");
        d.entities = vec![Entity::new("sqlite", "technology")];
        ingest(&store, &config, &source, vec![d], &mut report)
            .await
            .unwrap();
        assert_eq!(report.decisions_added, 1);

        // same source again with the same decision text: replaced, then the
        // fresh copy has nothing left to merge with
        let d2 = Decision::new(&source.id, "Use SQLite for storage");
        ingest(&store, &config, &source, vec![d2], &mut report)
            .await
            .unwrap();

        let all = store.get_all_decisions(50).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn similar_decision_from_second_source_merges() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path().join("e.db"));
        let store = Store::open(&config.db_path).await.unwrap();

        let adr = adr_source("adr:docs/adr/002.md");
        let mut report = ExtractReport::default();
        let mut d = Decision::new(&adr.id, "Use PostgreSQL as the primary store");
        d.entities = vec![Entity::new("postgresql", "technology")];
        ingest(&store, &config, &adr, vec![d], &mut report)
            .await
            .unwrap();

        let mut pr_source = adr_source("pr:12");
        pr_source.source_type = SourceType::Pr;
        let mut d2 = Decision::new("pr:12", "Use PostgreSQL as the primary data store");
        d2.entities = vec![Entity::new("postgresql", "technology")];
        d2.alternatives = vec!["MySQL".to_string()];
        ingest(&store, &config, &pr_source, vec![d2], &mut report)
            .await
            .unwrap();

        assert_eq!(report.decisions_added, 1);
        assert_eq!(report.decisions_merged, 1);
        let all = store.get_all_decisions(50).await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].decision.alternatives.contains(&"MySQL".to_string()));
    }

    #[tokio::test]
    async fn unrelated_decisions_do_not_merge() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path().join("e.db"));
        let store = Store::open(&config.db_path).await.unwrap();
        let mut report = ExtractReport::default();

        let s1 = adr_source("adr:docs/adr/003.md");
        ingest(
            &store,
            &config,
            &s1,
            vec![Decision::new(&s1.id, "Use PostgreSQL as the primary store")],
            &mut report,
        )
        .await
        .unwrap();

        let s2 = adr_source("adr:docs/adr/004.md");
        ingest(
            &store,
            &config,
            &s2,
            vec![Decision::new(&s2.id, "Adopt trunk-based development")],
            &mut report,
        )
        .await
        .unwrap();

        assert_eq!(report.decisions_added, 2);
        assert_eq!(report.decisions_merged, 0);
    }

    #[test]
    fn document_failures_are_recoverable() {
        assert!(is_document_failure(&Error::ExtractionMalformed {
            source_id: "pr:1".to_string(),
            detail: "bad json".to_string(),
        }));
        assert!(is_document_failure(&Error::Api("500".to_string())));
        assert!(!is_document_failure(&Error::NoMatch));
    }

    #[tokio::test]
    async fn merge_candidates_found_by_text_and_entity_search() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path().join("e.db"));
        let store = Store::open(&config.db_path).await.unwrap();
        let source = adr_source("adr:docs/adr/005.md");

        let mut report = ExtractReport::default();
        let mut stored = Decision::new(&source.id, "Use PostgreSQL as the primary store");
        stored.entities = vec![Entity::new("postgresql", "technology")];
        ingest(&store, &config, &source, vec![stored], &mut report)
            .await
            .unwrap();

        let similar = Decision::new("pr:90", "Use PostgreSQL as the primary data store");
        let candidates = merge_candidates(&store, &similar).await.unwrap();
        assert_eq!(candidates.len(), 1);

        // no shared summary words, but a shared entity still surfaces it
        let mut entity_only = Decision::new("pr:91", "Relational engine selection");
        entity_only.entities = vec![Entity::new("postgresql", "technology")];
        let candidates = merge_candidates(&store, &entity_only).await.unwrap();
        assert_eq!(candidates.len(), 1);

        let unrelated = Decision::new("pr:92", "Adopt trunk-based development");
        let candidates = merge_candidates(&store, &unrelated).await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn malformed_extraction_for_one_doc_keeps_the_rest() {
        use base64::Engine;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let alpha = base64::engine::general_purpose::STANDARD
            .encode("# Caching\n\nNotes on the caching layer.");
        let beta = base64::engine::general_purpose::STANDARD
            .encode("# Storage\n\nNotes on the storage layer.");
        let llm_calls = Arc::new(AtomicUsize::new(0));
        let calls = Arc::clone(&llm_calls);

        let base = crate::testutil::spawn_http(move |method, path| {
            if method == "POST" && path == "/v1/messages" {
                // first document gets garbage, the rest get a clean response
                let text = if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    "this is not json".to_string()
                } else {
                    serde_json::json!({"decisions": [{
                        "summary": "Use Redis for caching",
                        "confidence": "high"
                    }]})
                    .to_string()
                };
                let body = serde_json::json!({"content": [{"type": "text", "text": text}]});
                (200, body.to_string())
            } else if path == "/repos/acme/widgets/contents/docs" {
                let listing = serde_json::json!([
                    {"name": "caching.md", "path": "docs/caching.md", "type": "file",
                     "html_url": "https://x/caching"},
                    {"name": "storage.md", "path": "docs/storage.md", "type": "file",
                     "html_url": "https://x/storage"}
                ]);
                (200, listing.to_string())
            } else if path == "/repos/acme/widgets/contents/docs/caching.md" {
                let file = serde_json::json!({
                    "name": "caching.md", "path": "docs/caching.md", "type": "file",
                    "html_url": "https://x/caching", "content": alpha
                });
                (200, file.to_string())
            } else if path == "/repos/acme/widgets/contents/docs/storage.md" {
                let file = serde_json::json!({
                    "name": "storage.md", "path": "docs/storage.md", "type": "file",
                    "html_url": "https://x/storage", "content": beta
                });
                (200, file.to_string())
            } else {
                (404, "{}".to_string())
            }
        })
        .await;

        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path().join("e.db"));
        let store = Store::open(&config.db_path).await.unwrap();
        let github = GitHubClient::with_base("t", "acme/widgets", &base).unwrap();
        let anthropic = AnthropicClient::with_base("k", "test-model", &base).unwrap();
        let options = ExtractOptions {
            pr_limit: 0,
            skip_prs: true,
            include_sessions: false,
        };

        let report = run_locked(&config, &options, &store, &github, &anthropic)
            .await
            .unwrap();

        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].contains("doc:docs/caching.md"));
        assert_eq!(report.decisions_added, 1);
        assert_eq!(report.sources_processed, 1);

        let stored = store.get_all_decisions(10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].decision.summary, "Use Redis for caching");
    }
}
