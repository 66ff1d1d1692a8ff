//! MCP stdio server exposing the decision store to AI coding agents.
//!
//! All tools are read-only against the store. Every call is appended to the
//! activity log so humans can audit what context their agent received. Tools
//! that need LLM synthesis degrade to raw decision JSON when no Anthropic
//! key is configured, so retrieval keeps working without one.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Instant;

use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler, ServiceExt};
use serde_json::{json, Value};

use crate::config::Config;
use crate::llm::AnthropicClient;
use crate::models::LearningCategory;
use crate::store::Store;
use crate::{activity, generate, query, validate};

const MAX_ENTITY_SUGGESTIONS: usize = 5;

/// Run the stdio MCP server until the client disconnects.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let handler = ContextServer::new(config);
    let service = handler.serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;
    Ok(())
}

#[derive(Clone)]
pub struct ContextServer {
    config: Arc<Config>,
}

impl ContextServer {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    fn tool_descriptors() -> Vec<Tool> {
        vec![
            descriptor(
                "query_decisions",
                "Answer a natural-language question about the team's documented engineering \
                 decisions (tech choices, architecture, rejected alternatives). Use this BEFORE \
                 proposing an implementation approach.",
                json!({
                    "type": "object",
                    "properties": {
                        "question": {
                            "type": "string",
                            "description": "The question to answer, e.g. 'Why did we choose PostgreSQL?'"
                        }
                    },
                    "required": ["question"]
                }),
            ),
            descriptor(
                "validate_approach",
                "Check whether a proposed implementation approach conflicts with the team's \
                 documented decisions. Returns a structured verdict with conflicts, alignments, \
                 and a recommendation.",
                json!({
                    "type": "object",
                    "properties": {
                        "approach": {
                            "type": "string",
                            "description": "The approach you intend to take, in one or two sentences"
                        },
                        "context": {
                            "type": "string",
                            "description": "Optional surrounding context (what you are building, constraints)"
                        }
                    },
                    "required": ["approach"]
                }),
            ),
            descriptor(
                "get_decisions_by_entity",
                "List every documented decision that involves a specific technology, pattern, \
                 or service (e.g. 'postgresql', 'redis', 'microservices').",
                json!({
                    "type": "object",
                    "properties": {
                        "entity": {
                            "type": "string",
                            "description": "Entity name to look up"
                        }
                    },
                    "required": ["entity"]
                }),
            ),
            descriptor(
                "list_entities",
                "List all technologies, patterns, and services that appear in documented \
                 decisions, with how many decisions reference each.",
                json!({ "type": "object", "properties": {} }),
            ),
            descriptor(
                "get_decision_context",
                "Get the full rendered summary of all documented decisions and learnings as \
                 markdown. Useful at the start of a task to load team context.",
                json!({ "type": "object", "properties": {} }),
            ),
            descriptor(
                "recall_learnings",
                "Search operational learnings (bug fixes, gotchas, implementation notes) \
                 recorded from past work sessions.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "What to search for, e.g. 'retry backoff'"
                        },
                        "category": {
                            "type": "string",
                            "enum": ["bug_fix", "gotcha", "implementation"],
                            "description": "Optional category filter"
                        },
                        "limit": {
                            "type": "integer",
                            "description": "Maximum results (default 10)"
                        }
                    },
                    "required": ["query"]
                }),
            ),
        ]
    }

    /// Open the store, or explain what setup is missing.
    async fn open_store(&self) -> Result<Store, String> {
        if !self.config.db_path.exists() {
            return Err(format!(
                "Setup required: no decision database found at {}. \
                 Run 'setkontext extract' to build it.",
                self.config.db_path.display()
            ));
        }
        Store::open(&self.config.db_path)
            .await
            .map_err(|e| e.to_string())
    }

    fn anthropic_client(&self) -> Option<AnthropicClient> {
        if self.config.anthropic_api_key.is_empty() {
            return None;
        }
        AnthropicClient::new(&self.config.anthropic_api_key, &self.config.model).ok()
    }

    async fn dispatch(&self, name: &str, args: &Value) -> Result<String, String> {
        match name {
            "query_decisions" => self.query_decisions(str_arg(args, "question")?).await,
            "validate_approach" => {
                let approach = str_arg(args, "approach")?;
                let context = args.get("context").and_then(Value::as_str).unwrap_or("");
                self.validate_approach(approach, context).await
            }
            "get_decisions_by_entity" => {
                self.decisions_by_entity(str_arg(args, "entity")?).await
            }
            "list_entities" => self.list_entities().await,
            "get_decision_context" => self.decision_context().await,
            "recall_learnings" => {
                let q = str_arg(args, "query")?;
                let category = args
                    .get("category")
                    .and_then(Value::as_str)
                    .and_then(LearningCategory::parse);
                let limit = args
                    .get("limit")
                    .and_then(Value::as_i64)
                    .filter(|n| *n > 0)
                    .unwrap_or(10);
                self.recall_learnings(q, category, limit).await
            }
            _ => Err(format!("unknown tool: {name}")),
        }
    }

    async fn query_decisions(&self, question: &str) -> Result<String, String> {
        let store = self.open_store().await?;

        let Some(client) = self.anthropic_client() else {
            // no key: return raw retrieval results instead of a synthesized answer
            let decisions = query::find_relevant_decisions(&store, question)
                .await
                .map_err(|e| e.to_string())?;
            let payload = json!({
                "note": "ANTHROPIC_API_KEY not set; returning raw matching decisions without a synthesized answer.",
                "decisions": decisions,
            });
            return serde_json::to_string_pretty(&payload).map_err(|e| e.to_string());
        };

        match query::query(&store, &client, question).await {
            Ok(result) => Ok(result.to_text()),
            Err(crate::error::Error::NoMatch) => Ok(
                "No relevant engineering decisions found for this question. The store may \
                 not cover this topic yet; consider running 'setkontext extract' or treating \
                 this as an undocumented area."
                    .to_string(),
            ),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn validate_approach(&self, approach: &str, context: &str) -> Result<String, String> {
        let store = self.open_store().await?;
        let Some(client) = self.anthropic_client() else {
            let decisions = query::find_relevant_decisions(&store, approach)
                .await
                .map_err(|e| e.to_string())?;
            let payload = json!({
                "note": "ANTHROPIC_API_KEY not set; returning potentially relevant decisions for manual review.",
                "decisions": decisions,
            });
            return serde_json::to_string_pretty(&payload).map_err(|e| e.to_string());
        };

        let result = validate::validate(&store, &client, approach, context)
            .await
            .map_err(|e| e.to_string())?;
        result.to_json().map_err(|e| e.to_string())
    }

    async fn decisions_by_entity(&self, entity: &str) -> Result<String, String> {
        let store = self.open_store().await?;
        let decisions = store
            .get_decisions_by_entity(entity)
            .await
            .map_err(|e| e.to_string())?;

        if decisions.is_empty() {
            let known = store.get_entities().await.map_err(|e| e.to_string())?;
            let suggestions = suggest_entities(entity, &known);
            let mut msg = format!("No decisions found for '{entity}'.");
            if !suggestions.is_empty() {
                msg.push_str(&format!(" Did you mean: {}?", suggestions.join(", ")));
            }
            return Ok(msg);
        }
        serde_json::to_string_pretty(&decisions).map_err(|e| e.to_string())
    }

    async fn list_entities(&self) -> Result<String, String> {
        let store = self.open_store().await?;
        let entities = store.get_entities().await.map_err(|e| e.to_string())?;
        let payload: Vec<Value> = entities
            .iter()
            .map(|(e, count)| {
                json!({
                    "name": e.name,
                    "entity_type": e.entity_type,
                    "decision_count": count,
                })
            })
            .collect();
        serde_json::to_string_pretty(&payload).map_err(|e| e.to_string())
    }

    async fn decision_context(&self) -> Result<String, String> {
        let store = self.open_store().await?;
        generate::generate_context(&store, generate::ContextFormat::Generic)
            .await
            .map_err(|e| e.to_string())
    }

    async fn recall_learnings(
        &self,
        q: &str,
        category: Option<LearningCategory>,
        limit: i64,
    ) -> Result<String, String> {
        let store = self.open_store().await?;
        let fts = query::build_fts_query(q, &[]);
        let learnings = if fts.is_empty() {
            store.get_recent_learnings(category, limit).await
        } else {
            store.search_learnings(&fts, category, limit).await
        }
        .map_err(|e| e.to_string())?;

        if learnings.is_empty() {
            return Ok(format!("No learnings found matching '{q}'."));
        }
        serde_json::to_string_pretty(&learnings).map_err(|e| e.to_string())
    }
}

impl ServerHandler for ContextServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "setkontext".to_string(),
                title: Some("setkontext".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "setkontext - the team's documented engineering decisions. Query decisions \
                 before proposing an approach, and validate your plan against them with \
                 validate_approach before implementing."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult::with_all_items(
            Self::tool_descriptors(),
        )))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        Self::tool_descriptors()
            .into_iter()
            .find(|t| t.name == name)
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        if self.get_tool(&request.name).is_none() {
            return Err(McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("no tool registered with name: {}", request.name),
                None,
            ));
        }

        let args = request
            .arguments
            .map(Value::Object)
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

        let started = Instant::now();
        let outcome = self.dispatch(&request.name, &args).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(text) => {
                activity::log_tool_call(
                    &self.config.log_path,
                    &request.name,
                    args,
                    &text,
                    None,
                    duration_ms,
                );
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(e) => {
                activity::log_tool_call(
                    &self.config.log_path,
                    &request.name,
                    args,
                    "",
                    Some(e.clone()),
                    duration_ms,
                );
                Ok(CallToolResult::error(vec![Content::text(e)]))
            }
        }
    }
}

fn descriptor(name: &'static str, description: &'static str, schema: Value) -> Tool {
    let input_schema: Arc<serde_json::Map<String, Value>> = match schema {
        Value::Object(map) => Arc::new(map),
        _ => Arc::new(serde_json::Map::new()),
    };
    Tool {
        name: Cow::Borrowed(name),
        title: None,
        description: Some(Cow::Borrowed(description)),
        input_schema,
        output_schema: None,
        annotations: Some(ToolAnnotations::new().read_only(true)),
        execution: None,
        icons: None,
        meta: None,
    }
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| format!("missing required argument: {key}"))
}

/// Known entity names close to a miss, by substring overlap.
fn suggest_entities(miss: &str, known: &[(crate::models::Entity, i64)]) -> Vec<String> {
    let lower = miss.to_lowercase();
    let mut suggestions: Vec<String> = known
        .iter()
        .map(|(e, _)| e.name.clone())
        .filter(|name| {
            let n = name.to_lowercase();
            n.contains(&lower) || lower.contains(&n)
        })
        .collect();
    if suggestions.is_empty() {
        // fall back to the most-referenced entities so the agent sees what exists
        suggestions = known
            .iter()
            .take(MAX_ENTITY_SUGGESTIONS)
            .map(|(e, _)| e.name.clone())
            .collect();
    }
    suggestions.truncate(MAX_ENTITY_SUGGESTIONS);
    suggestions
}
