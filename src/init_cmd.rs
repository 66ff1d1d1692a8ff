//! Project setup: credentials, MCP wiring, and .gitignore hygiene.

use std::io::Write;
use std::path::Path;

use crate::error::Result;

const ENV_KEYS: &[&str] = &[
    "SETKONTEXT_GITHUB_TOKEN",
    "SETKONTEXT_REPO",
    "ANTHROPIC_API_KEY",
];

/// Initialize setkontext in `project_dir`: write `.env`, `.mcp.json`, and
/// update `.gitignore`.
pub fn run_init(
    project_dir: &Path,
    repo: &str,
    token: &str,
    anthropic_key: Option<&str>,
) -> Result<()> {
    write_env(project_dir, repo, token, anthropic_key.unwrap_or(""))?;
    write_mcp_config(project_dir)?;
    update_gitignore(project_dir)?;

    println!("\nsetkontext initialized for {repo}");
    println!("\nNext steps:");
    println!("  1. Run 'setkontext extract' to pull decisions from GitHub");
    println!("  2. Restart Claude Code - it picks up the MCP server automatically");
    println!("  3. Your agent now has setkontext tools for querying decisions");
    Ok(())
}

/// Write or update `.env`, replacing our keys but preserving everything else
/// already in the file.
pub fn write_env(project_dir: &Path, repo: &str, token: &str, anthropic_key: &str) -> Result<()> {
    let env_path = project_dir.join(".env");

    let mut lines = vec![
        format!("SETKONTEXT_GITHUB_TOKEN={token}"),
        format!("SETKONTEXT_REPO={repo}"),
    ];
    if !anthropic_key.is_empty() {
        lines.push(format!("ANTHROPIC_API_KEY={anthropic_key}"));
    }

    if env_path.exists() {
        for line in std::fs::read_to_string(&env_path)?.lines() {
            let key = line.split('=').next().unwrap_or("").trim();
            if !key.is_empty() && !ENV_KEYS.contains(&key) {
                lines.push(line.to_string());
            }
        }
    }

    std::fs::write(&env_path, lines.join("\n") + "\n")?;
    println!("Credentials saved to {}", env_path.display());
    Ok(())
}

/// Write `.mcp.json` pointing agents at this binary's `serve` command.
pub fn write_mcp_config(project_dir: &Path) -> Result<()> {
    let mcp_path = project_dir.join(".mcp.json");
    let command = std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "setkontext".to_string());

    let config = serde_json::json!({
        "mcpServers": {
            "setkontext": {
                "type": "stdio",
                "command": command,
                "args": ["serve"],
                "env": {
                    "SETKONTEXT_DB_PATH": project_dir.join("setkontext.db").display().to_string(),
                },
            }
        }
    });

    std::fs::write(&mcp_path, serde_json::to_string_pretty(&config)? + "\n")?;
    println!("MCP config written to {}", mcp_path.display());
    Ok(())
}

/// Ensure the database and credentials never get committed.
pub fn update_gitignore(project_dir: &Path) -> Result<()> {
    let gitignore_path = project_dir.join(".gitignore");
    let entries = ["setkontext.db", ".env"];

    let existing = if gitignore_path.exists() {
        std::fs::read_to_string(&gitignore_path)?
    } else {
        String::new()
    };
    let existing_lines: Vec<&str> = existing.lines().collect();

    let missing: Vec<&str> = entries
        .iter()
        .filter(|e| !existing_lines.contains(*e))
        .copied()
        .collect();
    if missing.is_empty() {
        return Ok(());
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&gitignore_path)?;
    if !existing.is_empty() && !existing.ends_with('\n') {
        writeln!(file)?;
    }
    writeln!(file, "\n# setkontext")?;
    for entry in &missing {
        writeln!(file, "{entry}")?;
    }
    println!("Added {} to .gitignore", missing.join(", "));
    Ok(())
}
