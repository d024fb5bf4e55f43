//! hansel CLI
//!
//! Single binary for all hansel operations:
//! - Server (accepts agent connections, distributes tasks)
//! - Client (agent that runs on fleet machines)
//! - Control (operator queries against a running server)

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hansel::commands;

#[derive(Parser)]
#[command(name = "hansel")]
#[command(author, version, about = "Fleet command-and-control plane")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server (accepts agent connections and control queries)
    Serve {
        /// Bind address (overrides config)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Run an agent that connects to a server and executes its tasks
    /// Alias: agent
    #[command(alias = "agent")]
    Client {
        /// Server host (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Server port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
        /// Client name to authenticate as (defaults to hostname)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Query a running server for registered clients
    Control {
        /// Regular expression matched against whole client names
        #[arg(long, value_name = "PATTERN")]
        hosts: String,
        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let settings = commands::load_settings(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { bind } => {
            commands::serve_command(settings.server, bind).await?;
        }

        Commands::Client { host, port, name } => {
            commands::client_command(settings.agent, host, port, name).await?;
        }

        Commands::Control { hosts, json } => {
            commands::control_command(&settings.server.control_socket_path, &hosts, json).await?;
        }
    }

    Ok(())
}
