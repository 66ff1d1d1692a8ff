//! GitHub REST API fetcher for ADR files, documentation, and merged PRs.
//!
//! Fetchers return batches that carry per-item failures alongside the items
//! that did come back, so one bad file or PR never sinks a whole extraction
//! run and nothing is dropped silently. Directory-listing failures and a
//! failed first PR page (bad credentials, unreachable host) still surface
//! as [`Error::SourceUnavailable`].

use std::collections::HashSet;
use std::time::Duration;

use base64::Engine;
use serde::Deserialize;
use serde_json::Value;

use crate::config::ADR_PATHS;
use crate::error::{Error, Result};

const DEFAULT_API_BASE: &str = "https://api.github.com";
const MAX_RETRIES: u32 = 3;

/// Directories that may hold decision-rich documentation.
const DOC_PATHS: &[&str] = &["docs", "doc", "documentation"];

/// Root-level files that often contain architectural decisions.
const ROOT_DOC_NAMES: &[&str] = &[
    "architecture.md",
    "design.md",
    "decisions.md",
    "technical-design.md",
    "tech-stack.md",
];

const MAX_REVIEW_COMMENTS: usize = 20;
const MAX_TOTAL_COMMENTS: usize = 30;
const MAX_COMMITS: usize = 20;

/// A markdown file fetched from the repository.
#[derive(Debug, Clone)]
pub struct DocFile {
    pub path: String,
    pub content: String,
    pub url: String,
}

/// Files fetched from one document scan, plus the listed files that could
/// not be fetched or decoded.
#[derive(Debug, Default)]
pub struct DocBatch {
    pub files: Vec<DocFile>,
    pub failures: Vec<String>,
}

/// Merged PRs fetched so far, plus listing pages and per-PR detail requests
/// that failed along the way.
#[derive(Debug, Default)]
pub struct PrBatch {
    pub prs: Vec<PrData>,
    pub failures: Vec<String>,
}

/// Raw merged-PR data ready for decision extraction.
#[derive(Debug, Clone)]
pub struct PrData {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub url: String,
    /// ISO timestamp, empty if GitHub reported none.
    pub merged_at: String,
    pub review_comments: Vec<String>,
    pub commit_messages: Vec<String>,
}

#[derive(Deserialize)]
struct ContentItem {
    name: String,
    path: String,
    #[serde(rename = "type")]
    item_type: String,
    html_url: Option<String>,
    content: Option<String>,
}

#[derive(Deserialize)]
struct PullItem {
    number: u64,
    title: Option<String>,
    body: Option<String>,
    html_url: String,
    merged_at: Option<String>,
}

/// Authenticated GitHub client scoped to a single `owner/repo`.
pub struct GitHubClient {
    http: reqwest::Client,
    base: String,
    repo: String,
    token: String,
}

impl GitHubClient {
    pub fn new(token: &str, repo: &str) -> Result<Self> {
        Self::with_base(token, repo, DEFAULT_API_BASE)
    }

    /// Point the client at a different API base. Used by tests.
    pub fn with_base(token: &str, repo: &str, base: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            repo: repo.to_string(),
            token: token.to_string(),
        })
    }

    /// Fetch markdown files from the conventional ADR directories, plus any
    /// root-level file with "adr" in its name. Files that were listed but
    /// could not be fetched land in the batch's failures.
    pub async fn fetch_adrs(&self) -> Result<DocBatch> {
        let mut batch = DocBatch::default();
        let mut seen: HashSet<String> = HashSet::new();

        for dir in ADR_PATHS {
            for item in self.list_dir(dir).await? {
                if is_markdown(&item) && seen.insert(item.path.clone()) {
                    self.collect_file(&item.path, &mut batch).await;
                }
            }
        }

        for item in self.list_dir("").await? {
            if is_markdown(&item)
                && item.name.to_lowercase().contains("adr")
                && seen.insert(item.path.clone())
            {
                self.collect_file(&item.path, &mut batch).await;
            }
        }

        Ok(batch)
    }

    /// Fetch general documentation markdown: everything in the doc
    /// directories plus known root-level architecture files, excluding paths
    /// in `exclude` (typically the ADRs already fetched).
    pub async fn fetch_docs(&self, exclude: &HashSet<String>) -> Result<DocBatch> {
        let mut batch = DocBatch::default();
        let mut seen: HashSet<String> = exclude.clone();

        for dir in DOC_PATHS {
            for item in self.list_dir(dir).await? {
                if is_markdown(&item) && seen.insert(item.path.clone()) {
                    self.collect_file(&item.path, &mut batch).await;
                }
            }
        }

        for item in self.list_dir("").await? {
            if is_markdown(&item)
                && ROOT_DOC_NAMES.contains(&item.name.to_lowercase().as_str())
                && seen.insert(item.path.clone())
            {
                self.collect_file(&item.path, &mut batch).await;
            }
        }

        Ok(batch)
    }

    async fn collect_file(&self, path: &str, batch: &mut DocBatch) {
        match self.fetch_file(path).await {
            Ok(Some(doc)) => batch.files.push(doc),
            Ok(None) => batch
                .failures
                .push(format!("{path}: listed but could not be fetched or decoded")),
            Err(e) => batch.failures.push(format!("{path}: {e}")),
        }
    }

    /// Fetch the most recently updated merged PRs, up to `limit`, each with
    /// capped review comments, discussion comments, and commit messages.
    ///
    /// A listing failure after the first page keeps the PRs fetched so far
    /// and records the failure; a failed comment or commit fetch keeps the
    /// PR with what it has and records the failure. Only a first-page
    /// listing failure errors out, since that usually means bad credentials.
    pub async fn fetch_merged_prs(&self, limit: usize) -> Result<PrBatch> {
        let mut batch = PrBatch::default();
        let mut page = 1u32;

        while batch.prs.len() < limit {
            let url = format!(
                "{}/repos/{}/pulls?state=closed&sort=updated&direction=desc&per_page=100&page={page}",
                self.base, self.repo
            );
            let pulls: Vec<PullItem> = match self.get_json(&url).await {
                Ok(Some(v)) => serde_json::from_value(v)?,
                Ok(None) => break,
                Err(e) if page == 1 => return Err(e),
                Err(e) => {
                    batch.failures.push(format!("PR listing page {page}: {e}"));
                    break;
                }
            };
            if pulls.is_empty() {
                break;
            }

            for pull in pulls {
                if batch.prs.len() >= limit {
                    break;
                }
                // closed but unmerged PRs carry no merged_at
                let Some(merged_at) = pull.merged_at.clone() else {
                    continue;
                };
                let comments = match self.fetch_pr_comments(pull.number).await {
                    Ok(c) => c,
                    Err(e) => {
                        batch
                            .failures
                            .push(format!("pr:{} comments: {e}", pull.number));
                        Vec::new()
                    }
                };
                let commits = match self.fetch_pr_commits(pull.number).await {
                    Ok(c) => c,
                    Err(e) => {
                        batch
                            .failures
                            .push(format!("pr:{} commits: {e}", pull.number));
                        Vec::new()
                    }
                };
                batch.prs.push(PrData {
                    number: pull.number,
                    title: pull.title.unwrap_or_default(),
                    body: pull.body.unwrap_or_default(),
                    url: pull.html_url,
                    merged_at,
                    review_comments: comments,
                    commit_messages: commits,
                });
            }
            page += 1;
        }

        Ok(batch)
    }

    async fn fetch_pr_comments(&self, number: u64) -> Result<Vec<String>> {
        let mut comments = Vec::new();

        let url = format!("{}/repos/{}/pulls/{number}/comments", self.base, self.repo);
        if let Some(Value::Array(items)) = self.get_json(&url).await? {
            for item in items {
                if comments.len() >= MAX_REVIEW_COMMENTS {
                    break;
                }
                if let Some(body) = item.get("body").and_then(Value::as_str) {
                    if !body.is_empty() {
                        comments.push(body.to_string());
                    }
                }
            }
        }

        // top-level PR discussion lives on the issues endpoint
        let url = format!("{}/repos/{}/issues/{number}/comments", self.base, self.repo);
        if let Some(Value::Array(items)) = self.get_json(&url).await? {
            for item in items {
                if comments.len() >= MAX_TOTAL_COMMENTS {
                    break;
                }
                if let Some(body) = item.get("body").and_then(Value::as_str) {
                    if !body.is_empty() {
                        comments.push(body.to_string());
                    }
                }
            }
        }

        Ok(comments)
    }

    async fn fetch_pr_commits(&self, number: u64) -> Result<Vec<String>> {
        let mut messages = Vec::new();
        let url = format!("{}/repos/{}/pulls/{number}/commits", self.base, self.repo);
        if let Some(Value::Array(items)) = self.get_json(&url).await? {
            for item in items {
                if messages.len() >= MAX_COMMITS {
                    break;
                }
                if let Some(msg) = item
                    .pointer("/commit/message")
                    .and_then(Value::as_str)
                {
                    if !msg.is_empty() {
                        messages.push(msg.to_string());
                    }
                }
            }
        }
        Ok(messages)
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<ContentItem>> {
        let url = format!("{}/repos/{}/contents/{path}", self.base, self.repo);
        match self.get_json(&url).await? {
            Some(Value::Array(items)) => Ok(items
                .into_iter()
                .filter_map(|v| serde_json::from_value(v).ok())
                .collect()),
            // a single file object, or the directory does not exist
            _ => Ok(Vec::new()),
        }
    }

    async fn fetch_file(&self, path: &str) -> Result<Option<DocFile>> {
        let url = format!("{}/repos/{}/contents/{path}", self.base, self.repo);
        let Some(value) = self.get_json(&url).await? else {
            return Ok(None);
        };
        let Ok(item) = serde_json::from_value::<ContentItem>(value) else {
            return Ok(None);
        };
        let Some(encoded) = item.content else {
            return Ok(None);
        };
        // the contents API base64-encodes file bodies with embedded newlines
        let cleaned: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(cleaned) else {
            return Ok(None);
        };
        let Ok(content) = String::from_utf8(bytes) else {
            return Ok(None);
        };
        Ok(Some(DocFile {
            path: item.path,
            content,
            url: item.html_url.unwrap_or_default(),
        }))
    }

    /// GET with auth headers and retry on 429/5xx/network errors. Returns
    /// `Ok(None)` on 404 so callers can treat missing paths as empty.
    async fn get_json(&self, url: &str) -> Result<Option<Value>> {
        let mut attempt = 0u32;
        loop {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let response = self
                .http
                .get(url)
                .header("Authorization", format!("Bearer {}", self.token))
                .header("Accept", "application/vnd.github+json")
                .header("User-Agent", "setkontext")
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(Some(resp.json().await?));
                    }
                    if status == reqwest::StatusCode::NOT_FOUND {
                        return Ok(None);
                    }
                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    if !retryable || attempt >= MAX_RETRIES {
                        let body = resp.text().await.unwrap_or_default();
                        return Err(Error::SourceUnavailable(format!(
                            "GitHub API returned {status} for {url}: {}",
                            body.chars().take(200).collect::<String>()
                        )));
                    }
                }
                Err(e) => {
                    if attempt >= MAX_RETRIES {
                        return Err(Error::SourceUnavailable(format!(
                            "GitHub request failed after {MAX_RETRIES} retries: {e}"
                        )));
                    }
                }
            }
            attempt += 1;
        }
    }
}

fn is_markdown(item: &ContentItem) -> bool {
    if item.item_type != "file" {
        return false;
    }
    let name = item.name.to_lowercase();
    name.ends_with(".md") || name.ends_with(".markdown")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, item_type: &str) -> ContentItem {
        ContentItem {
            name: name.to_string(),
            path: format!("docs/{name}"),
            item_type: item_type.to_string(),
            html_url: None,
            content: None,
        }
    }

    #[test]
    fn markdown_detection() {
        assert!(is_markdown(&item("001-use-sqlite.md", "file")));
        assert!(is_markdown(&item("README.MARKDOWN", "file")));
        assert!(!is_markdown(&item("notes.txt", "file")));
        assert!(!is_markdown(&item("adr", "dir")));
    }

    #[test]
    fn root_doc_names_cover_common_architecture_files() {
        assert!(ROOT_DOC_NAMES.contains(&"architecture.md"));
        assert!(ROOT_DOC_NAMES.contains(&"tech-stack.md"));
    }

    #[tokio::test]
    async fn pagination_failure_keeps_prs_already_fetched() {
        let base = crate::testutil::spawn_http(|_method, path| {
            if path.contains("/pulls?") && path.ends_with("page=1") {
                let pulls = serde_json::json!([{
                    "number": 1,
                    "title": "Switch to Redis",
                    "body": "",
                    "html_url": "https://x/pull/1",
                    "merged_at": "2025-01-01T00:00:00Z"
                }]);
                (200, pulls.to_string())
            } else if path.contains("/pulls?") {
                (403, r#"{"message": "forbidden"}"#.to_string())
            } else if path.contains("/comments") || path.contains("/commits") {
                (200, "[]".to_string())
            } else {
                (404, "{}".to_string())
            }
        })
        .await;

        let client = GitHubClient::with_base("t", "acme/widgets", &base).unwrap();
        let batch = client.fetch_merged_prs(5).await.unwrap();

        assert_eq!(batch.prs.len(), 1);
        assert_eq!(batch.prs[0].number, 1);
        assert_eq!(batch.failures.len(), 1);
        assert!(batch.failures[0].contains("page 2"));
    }

    #[tokio::test]
    async fn failed_comment_fetch_keeps_the_pr_and_records_it() {
        let base = crate::testutil::spawn_http(|_method, path| {
            if path.contains("/pulls?") && path.ends_with("page=1") {
                let pulls = serde_json::json!([{
                    "number": 7,
                    "title": "Adopt event sourcing",
                    "body": "",
                    "html_url": "https://x/pull/7",
                    "merged_at": "2025-02-01T00:00:00Z"
                }]);
                (200, pulls.to_string())
            } else if path.contains("/pulls?") {
                (200, "[]".to_string())
            } else if path.ends_with("/pulls/7/comments") {
                (403, r#"{"message": "forbidden"}"#.to_string())
            } else if path.contains("/comments") || path.contains("/commits") {
                (200, "[]".to_string())
            } else {
                (404, "{}".to_string())
            }
        })
        .await;

        let client = GitHubClient::with_base("t", "acme/widgets", &base).unwrap();
        let batch = client.fetch_merged_prs(5).await.unwrap();

        assert_eq!(batch.prs.len(), 1);
        assert!(batch.prs[0].review_comments.is_empty());
        assert_eq!(batch.failures.len(), 1);
        assert!(batch.failures[0].contains("pr:7 comments"));
    }

    #[tokio::test]
    async fn listed_doc_that_fails_to_fetch_is_recorded() {
        let good = base64::engine::general_purpose::STANDARD.encode("# Design\n\nNotes.");
        let base = crate::testutil::spawn_http(move |_method, path| {
            if path.ends_with("/contents/docs") {
                let listing = serde_json::json!([
                    {"name": "design.md", "path": "docs/design.md", "type": "file",
                     "html_url": "https://x/design"},
                    {"name": "broken.md", "path": "docs/broken.md", "type": "file",
                     "html_url": "https://x/broken"}
                ]);
                (200, listing.to_string())
            } else if path.ends_with("/contents/docs/design.md") {
                let file = serde_json::json!({
                    "name": "design.md", "path": "docs/design.md", "type": "file",
                    "html_url": "https://x/design", "content": good
                });
                (200, file.to_string())
            } else if path.ends_with("/contents/docs/broken.md") {
                (403, r#"{"message": "forbidden"}"#.to_string())
            } else {
                (404, "{}".to_string())
            }
        })
        .await;

        let client = GitHubClient::with_base("t", "acme/widgets", &base).unwrap();
        let batch = client.fetch_docs(&HashSet::new()).await.unwrap();

        assert_eq!(batch.files.len(), 1);
        assert_eq!(batch.files[0].path, "docs/design.md");
        assert_eq!(batch.failures.len(), 1);
        assert!(batch.failures[0].starts_with("docs/broken.md"));
    }
}
