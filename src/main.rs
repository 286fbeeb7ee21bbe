use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sqlbox::{Config, Difficulty, SandboxManager};

mod commands;

use commands::Output;

#[derive(Parser)]
#[command(name = "sqlbox")]
#[command(
    author,
    version,
    about = "Disposable per-user MySQL sandboxes for SQL practice"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: ./sqlbox.toml, then the user config dir)
    #[arg(short, long, global = true, env = "SQLBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the owner's current sandbox
    Current {
        /// Owner id
        #[arg(long)]
        owner: String,
    },

    /// Replace the owner's sandbox with a fresh, seeded one
    Provision {
        /// Owner id
        #[arg(long)]
        owner: String,

        /// Owner display name (used for the database name)
        #[arg(long)]
        name: String,

        /// Seed data tier: easy, medium or hard
        #[arg(short, long, default_value = "easy")]
        difficulty: Difficulty,
    },

    /// Show the live state of a sandbox
    Describe {
        /// Sandbox id
        id: String,

        /// Only succeed if this owner holds the sandbox
        #[arg(long)]
        owner: Option<String>,
    },

    /// Re-seed a sandbox in place, restarting it if needed
    Reset {
        /// Sandbox id
        id: String,

        /// Seed data tier (default: the sandbox's current tier)
        #[arg(short, long)]
        difficulty: Option<Difficulty>,

        /// Only succeed if this owner holds the sandbox
        #[arg(long)]
        owner: Option<String>,
    },

    /// Run a SQL statement in a sandbox
    Exec {
        /// Sandbox id
        id: String,

        /// Statement, sent verbatim
        sql: String,

        /// Question id to grade the result against
        #[arg(short, long, requires = "difficulty")]
        question: Option<u32>,

        /// Tier of the question, required with --question
        #[arg(short, long)]
        difficulty: Option<Difficulty>,

        /// Only succeed if this owner holds the sandbox
        #[arg(long)]
        owner: Option<String>,
    },

    /// Stop and remove a sandbox
    Destroy {
        /// Sandbox id
        id: String,

        /// Only succeed if this owner holds the sandbox
        #[arg(long)]
        owner: Option<String>,
    },

    /// Remove every sandbox of an owner
    Purge {
        /// Owner id
        #[arg(long)]
        owner: String,
    },

    /// Reconcile with Docker and remove expired sandboxes
    Sweep {
        /// Keep sweeping on the configured interval until Ctrl+C
        #[arg(short, long)]
        watch: bool,
    },

    /// Check the Docker environment
    Doctor,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => {
            let cwd = std::env::current_dir().context("Failed to get current directory")?;
            Config::load(&cwd)
        }
    }
}

/// Installs the stderr layer and, if configured, a daily-rolling file layer.
fn init_logging(verbose: bool, config: &Config) -> Option<WorkerGuard> {
    let directive = if verbose { "sqlbox=debug" } else { "sqlbox=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let (file_layer, guard) = match &config.logging.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "sqlbox.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    let _guard = init_logging(cli.verbose, &config);

    let manager = Arc::new(SandboxManager::from_config(&config)?);
    let out = Output { json: cli.json };

    match cli.command {
        Commands::Current { owner } => {
            commands::sandbox::current(&manager, &owner, out).await?;
        }
        Commands::Provision {
            owner,
            name,
            difficulty,
        } => {
            commands::sandbox::provision(&manager, &owner, &name, difficulty, out).await?;
        }
        Commands::Describe { id, owner } => {
            commands::sandbox::describe(&manager, &id, owner.as_deref(), out).await?;
        }
        Commands::Reset {
            id,
            difficulty,
            owner,
        } => {
            commands::sandbox::reset(&manager, &id, difficulty, owner.as_deref(), out).await?;
        }
        Commands::Exec {
            id,
            sql,
            question,
            difficulty,
            owner,
        } => {
            commands::exec::run(&manager, &id, &sql, question, difficulty, owner.as_deref(), out)
                .await?;
        }
        Commands::Destroy { id, owner } => {
            commands::sandbox::destroy(&manager, &id, owner.as_deref(), out).await?;
        }
        Commands::Purge { owner } => {
            commands::sandbox::purge(&manager, &owner, out).await?;
        }
        Commands::Sweep { watch } => {
            commands::sweep::run(manager.clone(), watch, config.sweep.interval(), out).await?;
        }
        Commands::Doctor => {
            commands::doctor::run(&manager, &config, out).await?;
        }
    }

    Ok(())
}
