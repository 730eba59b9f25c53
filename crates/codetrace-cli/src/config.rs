use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};

/// Keys that aren't naturally CLI flags (embedding model name, batch size,
/// token budgets) live in a TOML file; everything is also settable by flag
/// or environment variable, following the teacher's `clap(env = "...")`
/// convention so a single binary works the same in a shell or a container.
#[derive(Debug, Parser)]
#[command(name = "codetrace", about = "Index and query a codebase's hybrid-retrieval graph")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Postgres connection string.
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    /// Embedding service API key; omit to run with embedding disabled.
    #[arg(long, env = "EMBEDDING_API_KEY", global = true)]
    pub embedding_api_key: Option<String>,

    /// Embedding model name.
    #[arg(long, env = "EMBEDDING_MODEL", global = true)]
    pub embedding_model: Option<String>,

    /// Max texts per embedding batch.
    #[arg(long, env = "MAX_EMBEDDING_BATCH", global = true)]
    pub max_embedding_batch: Option<usize>,

    /// Max tokens packed into an assembled context bundle.
    #[arg(long, env = "MAX_CONTEXT_TOKENS", global = true)]
    pub max_context_tokens: Option<usize>,

    /// Auto-reindex ceiling on changed-file count; 0 disables the check.
    #[arg(long, env = "MAX_AUTO_REINDEX_FILES", global = true)]
    pub max_auto_reindex_files: Option<usize>,

    /// Reserved: the HTTP surface is out of scope, but the key is parsed
    /// and validated since it is part of the external configuration
    /// contract.
    #[arg(long, env = "SERVER_PORT", global = true)]
    pub server_port: Option<u16>,
}

#[derive(Debug, clap::Subcommand)]
pub enum Commands {
    /// Index a project's sources, or re-index changed files only.
    Index {
        /// Project slug.
        project: String,
        /// Force a full reindex even if the project is already running or
        /// the change set exceeds the auto-reindex ceiling.
        #[arg(long)]
        force: bool,
    },

    /// Hybrid lexical + vector search within a project's workspace.
    Search {
        /// Search query text.
        query: String,
        /// Project slug.
        #[arg(long)]
        project: String,
        /// Maximum results.
        #[arg(long, default_value = "10")]
        limit: usize,
        /// Restrict results to one node kind (function, method, class, ...).
        #[arg(long)]
        kind: Option<String>,
    },

    /// Assemble a token-budgeted context bundle for a query.
    Context {
        /// Query describing what context is needed.
        query: String,
        /// Project slug.
        #[arg(long)]
        project: String,
        /// Maximum token budget; defaults to the configured value.
        #[arg(long)]
        max_tokens: Option<usize>,
    },
}

/// Keys persisted in `~/.config/codetrace/config.toml` that aren't
/// naturally CLI flags. CLI flags and environment variables always
/// override the file.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    pub embedding_model: Option<String>,
    pub max_embedding_batch: Option<usize>,
    pub max_context_tokens: Option<usize>,
    pub max_auto_reindex_files: Option<usize>,
}

impl FileConfig {
    pub fn path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .context("could not determine config directory")?
            .join("codetrace");
        Ok(dir.join("config.toml"))
    }

    pub fn load() -> Result<Self> {
        let path = Self::path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path).context("failed to read config file")?;
        toml::from_str(&content).context("failed to parse config file")
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(&path, &content).context("failed to write config file")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600));
        }
        Ok(())
    }
}

/// Fully resolved configuration: CLI flag / env var, falling back to the
/// TOML file, falling back to the documented default.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub database_url: String,
    pub embedding_api_key: Option<String>,
    pub embedding_model: String,
    pub max_embedding_batch: usize,
    pub max_context_tokens: usize,
    pub max_auto_reindex_files: usize,
    pub server_port: u16,
}

impl ResolvedConfig {
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let file = FileConfig::load().unwrap_or_default();
        Ok(Self {
            database_url: cli
                .database_url
                .clone()
                .context("databaseUrl is required: pass --database-url or set DATABASE_URL")?,
            embedding_api_key: cli.embedding_api_key.clone().filter(|s| !s.is_empty()),
            embedding_model: cli
                .embedding_model
                .clone()
                .or_else(|| file.embedding_model.clone())
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            max_embedding_batch: cli
                .max_embedding_batch
                .or(file.max_embedding_batch)
                .unwrap_or(1000),
            max_context_tokens: cli
                .max_context_tokens
                .or(file.max_context_tokens)
                .unwrap_or(8000),
            max_auto_reindex_files: cli
                .max_auto_reindex_files
                .or(file.max_auto_reindex_files)
                .unwrap_or(100),
            server_port: cli.server_port.unwrap_or(8080),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_fails_without_database_url() {
        let cli = Cli {
            command: Commands::Search { query: "x".into(), project: "p".into(), limit: 10, kind: None },
            database_url: None,
            embedding_api_key: None,
            embedding_model: None,
            max_embedding_batch: None,
            max_context_tokens: None,
            max_auto_reindex_files: None,
            server_port: None,
        };
        assert!(ResolvedConfig::resolve(&cli).is_err());
    }

    #[test]
    fn resolve_applies_documented_defaults() {
        let cli = Cli {
            command: Commands::Search { query: "x".into(), project: "p".into(), limit: 10, kind: None },
            database_url: Some("postgres://localhost/test".into()),
            embedding_api_key: None,
            embedding_model: None,
            max_embedding_batch: None,
            max_context_tokens: None,
            max_auto_reindex_files: None,
            server_port: None,
        };
        let resolved = ResolvedConfig::resolve(&cli).unwrap();
        assert_eq!(resolved.embedding_model, "text-embedding-3-small");
        assert_eq!(resolved.max_embedding_batch, 1000);
        assert_eq!(resolved.max_context_tokens, 8000);
        assert_eq!(resolved.max_auto_reindex_files, 100);
        assert_eq!(resolved.server_port, 8080);
    }
}
