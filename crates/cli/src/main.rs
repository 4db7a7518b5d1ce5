//! Switchboard CLI: the main entry point.
//!
//! Commands:
//! - `chat`      - Run an agent session (single message or interactive)
//! - `providers` - List configured providers and their capabilities
//! - `config`    - Show, initialize, or validate configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "switchboard",
    about = "Switchboard: one streaming interface over many LLM providers",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Model to use, optionally prefixed with a provider ("anthropic/claude-sonnet-4")
        #[arg(long, env = "SWITCHBOARD_MODEL")]
        model: Option<String>,

        /// Print every agent event as a JSON line instead of plain text
        #[arg(long)]
        json: bool,
    },

    /// List configured providers
    Providers,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (API keys masked)
    Show,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Check the configuration for errors
    Validate,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; stdout is reserved for model output
    let filter = if cli.verbose { "debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    match cli.command {
        Commands::Chat { message, model, json } => commands::chat::run(message, model, json).await?,
        Commands::Providers => commands::providers::run()?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show()?,
            ConfigAction::Init { force } => commands::config_cmd::init(force)?,
            ConfigAction::Validate => commands::config_cmd::validate()?,
            ConfigAction::Path => commands::config_cmd::path(),
        },
    }

    Ok(())
}
