use std::sync::Arc;

use clap::{Parser, Subcommand};

use renudge::config::Config;
use renudge::dispatch::{LogDispatcher, NoHistory, NoPersonas};
use renudge::logging;
use renudge::prompt::UniformSelector;
use renudge::runtime::{self, AppState};
use renudge::store::StateStore;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(
    name = "renudge",
    version = VERSION,
    about = "Proactive re-engagement scheduler for conversational agents"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<MainCommand>,
}

#[derive(Debug, Subcommand)]
enum MainCommand {
    /// Start the scheduler loop
    Start,
    /// Print persisted subscriptions and reminders
    Status,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        None | Some(MainCommand::Start) => start().await,
        Some(MainCommand::Status) => status(),
        Some(MainCommand::Version) => {
            println!("renudge {VERSION}");
            Ok(())
        }
    }
}

async fn start() -> anyhow::Result<()> {
    let config_path = Config::resolve_config_path()?;
    let config = Config::load()?;
    if let Err(e) = logging::init_logging(&config.data_dir) {
        logging::init_console_logging();
        tracing::warn!("File logging unavailable ({e}); logging to console");
    }

    // Default wiring: an integrator swaps in a real channel dispatcher,
    // history provider, and persona store via the library API.
    let state = Arc::new(AppState::new(
        config,
        config_path,
        Arc::new(LogDispatcher),
        Arc::new(NoHistory),
        Arc::new(NoPersonas),
        Arc::new(UniformSelector),
    ));
    runtime::run(state).await
}

fn status() -> anyhow::Result<()> {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Note: {e}; showing defaults");
            Config::default()
        }
    };
    let store = StateStore::load(config.data_root_dir());

    let subscribed = store.sessions.values().filter(|s| s.subscribed).count();
    println!(
        "Conversations tracked: {} ({subscribed} subscribed)",
        store.sessions.len()
    );
    for (id, sub) in &store.sessions {
        println!(
            "  {id}: subscribed={} mode={:?} last_user_reply={}",
            sub.subscribed,
            sub.mode,
            sub.last_user_reply_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".into()),
        );
    }
    println!("Reminders: {}", store.reminders.len());
    for reminder in &store.reminders {
        println!("  {}", reminder.describe());
    }
    Ok(())
}
