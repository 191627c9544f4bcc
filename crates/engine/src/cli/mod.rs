pub mod ask;
pub mod config;
pub mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// chatcore: multi-tenant chatbot agent engine.
#[derive(Debug, Parser)]
#[command(name = "chatcore", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one exchange for a tenant and print the reply.
    Ask {
        /// Chatbot id to answer as.
        #[arg(long)]
        tenant: String,
        /// JSON file holding prior conversation turns.
        #[arg(long)]
        history: Option<PathBuf>,
        /// Client id recorded with the persisted messages.
        #[arg(long, default_value = "cli")]
        client_id: String,
        /// Print the full reply as JSON instead of plain text.
        #[arg(long)]
        json: bool,
        /// The user message.
        message: String,
    },
    /// Answer JSON-lines requests from stdin until EOF or ctrl-c.
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path in `CB_CONFIG` (or `config.toml`
/// by default). A missing file yields the defaults. Returns the parsed
/// [`Config`](cb_domain::config::Config) and the path that was used.
pub fn load_config() -> anyhow::Result<(cb_domain::config::Config, String)> {
    let config_path = std::env::var("CB_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        cb_domain::config::Config::default()
    };

    Ok((config, config_path))
}
