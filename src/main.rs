// src/main.rs
//! majordomo - CLI Entry Point

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::io;
use std::path::PathBuf;

mod commands;

// =============================================================================
// CLI Definitions
// =============================================================================

#[derive(Parser)]
#[command(name = "majordomo")]
#[command(version)]
#[command(about = "Declarative community management for ejabberd", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reconciliation daemon
    Run {
        /// Path to the configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Run one reconciliation pass and exit
    Sync {
        /// Path to the configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Validate a document file
    Validate {
        /// Document to validate (defaults to the configured primary file)
        file: Option<PathBuf>,

        /// Path to the configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show document, tracking, and lock status
    Status {
        /// Path to the configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Create the database folder and seed the default document
    Init {
        /// Path to the configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run { config }) => commands::cmd_run(config.as_deref()),

        Some(Commands::Sync { config }) => commands::cmd_sync(config.as_deref()),

        Some(Commands::Validate { file, config }) => {
            commands::cmd_validate(file.as_deref(), config.as_deref())
        }

        Some(Commands::Status { config }) => commands::cmd_status(config.as_deref()),

        Some(Commands::Init { config }) => commands::cmd_init(config.as_deref()),

        Some(Commands::Completions { shell }) => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "majordomo", &mut io::stdout());
            Ok(())
        }

        None => {
            println!("majordomo v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'majordomo --help' for usage information");
            Ok(())
        }
    }
}
