//! # setkontext CLI
//!
//! The `setkontext` binary turns a repository's history (ADRs, merged PRs,
//! architecture docs, and optionally agent work sessions) into a queryable
//! store of engineering decisions, and serves that store to AI coding agents
//! over MCP.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `setkontext init <owner/repo>` | Write `.env`, `.mcp.json`, and `.gitignore` entries |
//! | `setkontext extract` | Fetch sources from GitHub and extract decisions |
//! | `setkontext query "<question>"` | Ask a question about documented decisions |
//! | `setkontext remember` | Record a learning manually |
//! | `setkontext recall "<query>"` | Search recorded learnings |
//! | `setkontext activity` | Show recent MCP tool calls |
//! | `setkontext stats` | Show store counts |
//! | `setkontext generate` | Render decisions into CLAUDE.md / .cursorrules |
//! | `setkontext serve` | Start the MCP stdio server |
//!
//! ## Examples
//!
//! ```bash
//! setkontext init acme/widgets --token ghp_xxx --anthropic-key sk-ant-xxx
//! setkontext extract --pr-limit 100
//! setkontext query "Why did we choose PostgreSQL?"
//! setkontext generate -f cursor
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use setkontext::activity::read_activity_log;
use setkontext::config::{default_log_path, Config};
use setkontext::error::Error;
use setkontext::extract::{run_extract, ExtractOptions};
use setkontext::generate::{generate_context_file, ContextFormat};
use setkontext::llm::AnthropicClient;
use setkontext::models::{Learning, LearningCategory, Source, SourceType};
use setkontext::store::Store;
use setkontext::{adr, init_cmd, mcp, query, stats};

/// Engineering decision memory for AI coding agents.
#[derive(Parser)]
#[command(
    name = "setkontext",
    about = "Extract, store, and serve a repository's engineering decisions",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set up setkontext for a repository.
    ///
    /// Writes credentials to `.env`, registers the MCP server in `.mcp.json`,
    /// and adds the database and `.env` to `.gitignore`.
    Init {
        /// Target repository as `owner/repo`.
        repo: String,

        /// GitHub token with read access to the repository.
        #[arg(long)]
        token: String,

        /// Anthropic API key for extraction and query synthesis.
        #[arg(long)]
        anthropic_key: Option<String>,
    },

    /// Fetch sources from GitHub and extract decisions into the store.
    ///
    /// Re-running is safe: each source's previous records are replaced, and
    /// similar decisions from different sources are merged.
    Extract {
        /// Maximum number of merged PRs to analyze.
        #[arg(long, default_value_t = 50)]
        pr_limit: usize,

        /// Skip PR analysis entirely.
        #[arg(long)]
        skip_prs: bool,

        /// Also extract decisions and learnings from agent session checkpoints.
        #[arg(long)]
        include_sessions: bool,

        /// Override the database path.
        #[arg(long)]
        db_path: Option<PathBuf>,
    },

    /// Answer a natural-language question from the stored decisions.
    Query {
        /// The question, e.g. "Why did we choose PostgreSQL?".
        question: String,

        /// Output format: `text` or `json`.
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Override the database path.
        #[arg(long)]
        db_path: Option<PathBuf>,
    },

    /// Record a learning manually.
    Remember {
        /// Category: `bug_fix`, `gotcha`, or `implementation`.
        #[arg(short, long)]
        category: String,

        /// One-sentence summary of the learning.
        #[arg(short, long)]
        summary: String,

        /// Optional longer detail.
        #[arg(short, long)]
        detail: Option<String>,

        /// Override the database path.
        #[arg(long)]
        db_path: Option<PathBuf>,
    },

    /// Search recorded learnings.
    Recall {
        /// What to search for.
        query: String,

        /// Filter by category: `bug_fix`, `gotcha`, or `implementation`.
        #[arg(long)]
        category: Option<String>,

        /// Maximum number of results.
        #[arg(long, default_value_t = 10)]
        limit: i64,

        /// Override the database path.
        #[arg(long)]
        db_path: Option<PathBuf>,
    },

    /// Show recent MCP tool calls from the activity log.
    Activity {
        /// Filter by tool name.
        #[arg(long)]
        tool: Option<String>,

        /// Maximum number of entries.
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Emit raw JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Show store counts and top entities.
    Stats {
        /// Override the database path.
        #[arg(long)]
        db_path: Option<PathBuf>,
    },

    /// Render the stored decisions into a static context file.
    Generate {
        /// Output path. Defaults per format: CLAUDE.md, .cursorrules, DECISIONS.md.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Target format: `claude`, `cursor`, or `generic`.
        #[arg(short, long, default_value = "claude")]
        format: String,

        /// Override the database path.
        #[arg(long)]
        db_path: Option<PathBuf>,
    },

    /// Start the MCP stdio server.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Init {
        repo,
        token,
        anthropic_key,
    } = &cli.command
    {
        init_cmd::run_init(
            std::path::Path::new("."),
            repo,
            token,
            anthropic_key.as_deref(),
        )?;
        return Ok(());
    }

    let mut config = Config::load();

    match cli.command {
        Commands::Init { .. } => unreachable!(),

        Commands::Extract {
            pr_limit,
            skip_prs,
            include_sessions,
            db_path,
        } => {
            apply_db_path(&mut config, db_path);
            let options = ExtractOptions {
                pr_limit,
                skip_prs,
                include_sessions,
            };
            run_extract(&config, &options).await?;
        }

        Commands::Query {
            question,
            format,
            db_path,
        } => {
            apply_db_path(&mut config, db_path);
            config.require_anthropic()?;
            let store = Store::open_existing(&config.db_path).await?;
            let client = AnthropicClient::new(&config.anthropic_api_key, &config.model)?;
            match query::query(&store, &client, &question).await {
                Ok(result) => match format.as_str() {
                    "json" => println!("{}", result.to_json()?),
                    _ => println!("{}", result.to_text()),
                },
                Err(Error::NoMatch) => {
                    println!("No relevant engineering decisions found for: {question}");
                    println!(
                        "The store may not cover this topic. Run 'setkontext extract' to \
                         refresh it, or treat this as an undocumented area."
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Commands::Remember {
            category,
            summary,
            detail,
            db_path,
        } => {
            apply_db_path(&mut config, db_path);
            let category = parse_category(&category)?;
            let store = Store::open(&config.db_path).await?;

            let short_id: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
            let source = Source {
                id: format!("manual:{short_id}"),
                source_type: SourceType::Manual,
                repo: config.repo.clone(),
                url: String::new(),
                title: "Manually recorded learning".to_string(),
                raw_content: String::new(),
                fetched_at: chrono::Utc::now(),
            };
            store.save_source(&source).await?;

            let mut learning = Learning::new(&source.id, category, &summary);
            learning.detail = detail.unwrap_or_default();
            let text = format!("{} {}", learning.summary, learning.detail);
            learning.entities = adr::extract_entities(&text);
            learning.session_date = chrono::Utc::now().format("%Y-%m-%d").to_string();
            store.save_learning(&learning).await?;

            println!("Recorded [{}] {}", learning.category, learning.summary);
        }

        Commands::Recall {
            query: q,
            category,
            limit,
            db_path,
        } => {
            apply_db_path(&mut config, db_path);
            let category = category.as_deref().map(parse_category).transpose()?;
            let store = Store::open_existing(&config.db_path).await?;

            let fts = query::build_fts_query(&q, &[]);
            let learnings = if fts.is_empty() {
                store.get_recent_learnings(category, limit).await?
            } else {
                store.search_learnings(&fts, category, limit).await?
            };

            if learnings.is_empty() {
                println!("No learnings found matching '{q}'.");
            }
            for l in &learnings {
                println!("[{}] {}", l.learning.category, l.learning.summary);
                if !l.learning.detail.is_empty() {
                    println!("  {}", l.learning.detail);
                }
                if !l.learning.components.is_empty() {
                    println!("  components: {}", l.learning.components.join(", "));
                }
            }
        }

        Commands::Activity { tool, limit, json } => {
            let entries = read_activity_log(&config.log_path, limit, tool.as_deref());
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("No activity recorded at {}.", config.log_path.display());
            } else {
                for e in &entries {
                    let status = match &e.error {
                        Some(err) => format!("ERROR: {err}"),
                        None => "ok".to_string(),
                    };
                    println!(
                        "{}  {:<24} {:>6}ms  {}",
                        e.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        e.tool_name,
                        e.duration_ms,
                        status
                    );
                }
            }
        }

        Commands::Stats { db_path } => {
            apply_db_path(&mut config, db_path);
            stats::run_stats(&config.db_path).await?;
        }

        Commands::Generate {
            output,
            format,
            db_path,
        } => {
            apply_db_path(&mut config, db_path);
            let format = ContextFormat::parse(&format).ok_or_else(|| {
                Error::Config(format!(
                    "unknown format '{format}' (expected claude, cursor, or generic)"
                ))
            })?;
            let output = output.unwrap_or_else(|| PathBuf::from(format.default_output()));
            let store = Store::open_existing(&config.db_path).await?;
            let written = generate_context_file(&store, &output, format).await?;
            println!("Context written to {}", written.display());
        }

        Commands::Serve => {
            mcp::serve(config).await?;
        }
    }

    Ok(())
}

fn apply_db_path(config: &mut Config, db_path: Option<PathBuf>) {
    if let Some(path) = db_path {
        config.log_path = default_log_path(&path);
        config.db_path = path;
    }
}

fn parse_category(s: &str) -> Result<LearningCategory, Error> {
    LearningCategory::parse(s).ok_or_else(|| {
        Error::Config(format!(
            "unknown category '{s}' (expected bug_fix, gotcha, or implementation)"
        ))
    })
}
