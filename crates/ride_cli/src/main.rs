mod terminal;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use ride_core::{DocumentStore, RideConfig};
use ride_dialogue::{ConversationEngine, EngineBuilder, SettlementCatalog, StateTable};
use ride_storage::{JsonFileStore, MemoryStore};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::terminal::{format_choices, TerminalChannel};

#[derive(Parser)]
#[command(name = "ride-cli")]
#[command(about = "Local driver for the ride-matching conversation service")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(long, env = "RIDE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the service as one or more users
    Chat {
        /// Identity of the first user
        #[arg(long, default_value = "972500000001")]
        user: String,
    },
    /// Validate a state table file
    CheckTable {
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            fmt::layer()
                .with_target(true)
                .with_line_number(true)
                .with_writer(io::stderr),
        )
        .init();

    let cli = Cli::parse();
    let config = RideConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Chat { user } => {
            let engine = build_engine(&config, None).await?;
            run_chat(&engine, user).await
        }
        Commands::CheckTable { path } => check_table(&config, &path).await,
    }
}

/// Wire the engine from configuration. `table` replaces the configured state
/// table when given.
async fn build_engine(
    config: &RideConfig,
    table: Option<StateTable>,
) -> anyhow::Result<ConversationEngine> {
    let table = match (table, &config.state_table_path) {
        (Some(table), _) => table,
        (None, Some(path)) => StateTable::from_file(path)?,
        (None, None) => StateTable::builtin()?,
    };

    let store: Arc<dyn DocumentStore> = match &config.store_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "using file store");
            Arc::new(JsonFileStore::open(path).await?)
        }
        None => Arc::new(MemoryStore::new()),
    };

    let mut builder = EngineBuilder::new(table, store, Arc::new(TerminalChannel), config);
    if let Some(path) = &config.settlements_path {
        let catalog = SettlementCatalog::from_file(path)
            .with_context(|| format!("failed to read settlements from {}", path.display()))?;
        tracing::info!(count = catalog.len(), "settlement catalog loaded");
        builder = builder.catalog(catalog);
    }
    Ok(builder.build()?)
}

async fn check_table(config: &RideConfig, path: &Path) -> anyhow::Result<()> {
    let table = StateTable::from_file(path)?;
    let states = table.len();
    // Building resolves every condition and action name.
    let mut config = config.clone();
    config.store_path = None;
    build_engine(&config, Some(table)).await?;
    println!(
        "{}",
        format!("✅ {}: {states} states, all references resolve", path.display()).green()
    );
    Ok(())
}

async fn run_chat(engine: &ConversationEngine, user: String) -> anyhow::Result<()> {
    let mut current = user;

    println!("{}", "Ride board simulator".cyan().bold());
    println!(
        "{}",
        "Type '/as <id>' to switch user and '/quit' to leave".dimmed()
    );
    println!();

    loop {
        print!("{} ", format!("{current}>").cyan().bold());
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.is_empty() {
            continue;
        }
        if input == "/quit" {
            break;
        }
        if let Some(id) = input.strip_prefix("/as ") {
            let id = id.trim();
            if id.is_empty() {
                println!("{}", "Usage: /as <id>".yellow());
            } else {
                current = id.to_string();
                println!("{}", format!("Now chatting as {current}").dimmed());
            }
            continue;
        }

        let now = engine.clock().now();
        match engine.service().approvals().expire_stale_requests(now).await {
            Ok(0) => {}
            Ok(expired) => tracing::info!(expired, "expired stale requests"),
            Err(err) => tracing::warn!(error = %err, "expiry sweep failed"),
        }

        match engine.process(&current, input).await {
            Ok(reply) => {
                println!("{}", reply.text.green());
                if let Some(choices) = &reply.choices {
                    println!("{}", format_choices(choices).dimmed());
                }
            }
            Err(err) => println!("{}", format!("❌ {err} (message not processed)").red()),
        }
        println!();
    }

    println!("{}", "Goodbye!".cyan());
    Ok(())
}
