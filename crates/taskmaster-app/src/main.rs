//! TaskMaster application binary - composition root.
//!
//! 1. Parse CLI arguments and load configuration from TOML
//! 2. Initialize logging and storage (SQLite in the data directory)
//! 3. Wire the coordinator to offline collaborators
//! 4. Run one subcommand and print its result as JSON

mod cli;
mod offline;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;

use taskmaster_action::{
    AccountSettings, CalendarDirectory, Collaborators, Coordinator, CoordinatorError,
    InMemoryAccountDirectory, PendingSweeper, PlanLimitsProvider, Stores,
};
use taskmaster_core::clock::SystemClock;
use taskmaster_core::config::TaskMasterConfig;
use taskmaster_core::logging;
use taskmaster_core::types::AccountId;
use taskmaster_storage::Database;

use cli::{CliArgs, Command};
use offline::{EchoMailbox, JsonFileCalendar};

/// Expand ~ to home directory in a path string.
fn resolve_data_dir(data_dir: &str) -> PathBuf {
    if data_dir.starts_with("~/") || data_dir.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&data_dir[2..])
    } else {
        PathBuf::from(data_dir)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn build_coordinator(
    config: &TaskMasterConfig,
    data_dir: &std::path::Path,
) -> Result<Coordinator, Box<dyn std::error::Error>> {
    let db_path = data_dir.join("taskmaster.db");
    let db = Arc::new(Database::new(&db_path)?);
    tracing::info!(path = %db_path.display(), "SQLite database opened");

    let accounts = Arc::new(InMemoryAccountDirectory::new(AccountSettings::from_config(
        config,
    )?));
    let calendar = Arc::new(JsonFileCalendar::new(data_dir.join("calendar.json")));

    let collaborators = Collaborators {
        accounts: accounts.clone(),
        limits: Arc::new(PlanLimitsProvider::new(accounts)),
        calendars: Arc::new(CalendarDirectory::shared(calendar)),
        actions: Arc::new(EchoMailbox),
        clock: Arc::new(SystemClock),
    };
    Ok(Coordinator::new(config, Stores::sqlite(db), collaborators))
}

async fn run(args: CliArgs, coordinator: Coordinator) -> Result<(), Box<dyn std::error::Error>> {
    match args.command {
        Command::Run { account, words } => {
            let account = AccountId::new(account);
            let text = words.join(" ");
            match coordinator.submit_text(&account, &text).await {
                Ok(outcome) => print_json(&outcome)?,
                Err(CoordinatorError::Parse(e)) => {
                    eprintln!("Could not understand command: {}", e);
                    std::process::exit(2);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::Approve { token } => print_json(&coordinator.approve(&token).await?)?,
        Command::Reject { token } => print_json(&coordinator.reject(&token)?)?,
        Command::Pending { account } => {
            print_json(&coordinator.list_pending(&AccountId::new(account))?)?
        }
        Command::Usage { account } => {
            print_json(&coordinator.get_usage(&AccountId::new(account))?)?
        }
        Command::Audit { account, limit } => {
            let account = account.map(AccountId::new);
            print_json(&coordinator.recent_audit(account.as_ref(), limit)?)?
        }
        Command::Sweep => {
            let sweeper = PendingSweeper::new(coordinator.gate(), std::time::Duration::ZERO);
            let expired = sweeper.sweep();
            print_json(&serde_json::json!({ "expired": expired }))?
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let mut config = TaskMasterConfig::load_or_default(&config_file);
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }

    logging::init(&config.general.log_level);
    tracing::debug!(path = %config_file.display(), "Configuration resolved");

    let data_dir = resolve_data_dir(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }

    let coordinator = build_coordinator(&config, &data_dir)?;
    run(args, coordinator).await
}
