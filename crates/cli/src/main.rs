//! Switchyard CLI.
//!
//! Commands:
//! - `chat`: one message or an interactive session
//! - `supervise`: run the commitment supervisor
//! - `status`: tiers, provider order and pending commitments
//! - `config`: init, show, validate or locate the config file

use clap::{Parser, Subcommand};

mod commands;
mod runtime;

#[derive(Parser)]
#[command(
    name = "switchyard",
    about = "Switchyard: LLM orchestration with failover and commitment tracking",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat through the orchestrator
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Conversation to continue (a new one by default)
        #[arg(short, long)]
        conversation: Option<String>,

        /// Caller identity used for permission checks
        #[arg(long, default_value = "cli")]
        caller: String,

        /// Treat the request as an unattended job
        #[arg(long)]
        background: bool,

        /// Print the reply as it streams
        #[arg(long)]
        stream: bool,
    },

    /// Run the commitment supervisor
    Supervise {
        /// Run a single verification tick and exit
        #[arg(long)]
        once: bool,
    },

    /// Show tiers, provider order and pending commitments
    Status,

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default config file if none exists
    Init,
    /// Print the effective configuration
    Show,
    /// Validate a config file (the default one if no path is given)
    Validate { path: Option<std::path::PathBuf> },
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Chat {
            message,
            conversation,
            caller,
            background,
            stream,
        } => {
            commands::chat::run(commands::chat::ChatOptions {
                message,
                conversation,
                caller,
                background,
                stream,
            })
            .await?
        }
        Commands::Supervise { once } => commands::supervise::run(once).await?,
        Commands::Status => commands::status::run().await?,
        Commands::Config { action } => match action {
            ConfigAction::Init => commands::config_cmd::init()?,
            ConfigAction::Show => commands::config_cmd::show()?,
            ConfigAction::Validate { path } => commands::config_cmd::validate(path.as_deref())?,
            ConfigAction::Path => commands::config_cmd::path(),
        },
    }

    Ok(())
}
