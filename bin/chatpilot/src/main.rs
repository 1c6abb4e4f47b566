mod commands;

use clap::{Parser, Subcommand};
use commands::Context;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "chatpilot")]
#[command(about = "Drive a chat web UI and return single-shot replies", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.chatpilot/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one prompt and print the reply
    Ask {
        /// Prompt text (read from stdin if not provided)
        prompt: Option<String>,

        /// Model selector passed to the chat UI
        #[arg(short, long)]
        model: Option<String>,

        /// Overall timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Interactive loop, one fresh conversation per line
    Chat {
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Poll the backend API for a conversation's finished reply
    Poll {
        conversation_id: String,

        /// Give up after this many seconds
        #[arg(short, long, default_value_t = 300)]
        timeout: u64,

        /// Seconds between fetches (defaults to backend.pollIntervalMs)
        #[arg(short, long)]
        interval: Option<f64>,
    },

    /// Show configuration and environment status
    Status,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing; stdout is reserved for replies.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let ctx = Context::new(cli.config);

    match cli.command {
        Commands::Ask {
            prompt,
            model,
            timeout,
        } => {
            commands::ask::run(&ctx, prompt, model, timeout).await?;
        }
        Commands::Chat { model } => {
            commands::chat::run(&ctx, model).await?;
        }
        Commands::Poll {
            conversation_id,
            timeout,
            interval,
        } => {
            commands::poll::run(&ctx, &conversation_id, timeout, interval).await?;
        }
        Commands::Status => {
            commands::status::run(&ctx).await?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                commands::config_cmd::show(&ctx).await?;
            }
            ConfigCommands::Init { force } => {
                commands::config_cmd::init(&ctx, force).await?;
            }
        },
    }

    Ok(())
}
