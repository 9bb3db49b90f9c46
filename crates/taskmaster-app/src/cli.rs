//! CLI argument definitions for the TaskMaster binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// TaskMaster: interpret commands, gate them behind approvals, schedule
/// meetings and meter usage.
#[derive(Parser, Debug)]
#[command(name = "taskmaster", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory for the SQLite database and offline calendar.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Interpret and submit a command for an account.
    Run {
        #[arg(short = 'a', long = "account")]
        account: String,
        /// Command words, e.g. `schedule Sync with b@example.com 30min`.
        #[arg(required = true, trailing_var_arg = true)]
        words: Vec<String>,
    },
    /// Approve a pending action and execute it.
    Approve { token: String },
    /// Reject a pending action.
    Reject { token: String },
    /// List outstanding approvals for an account.
    Pending {
        #[arg(short = 'a', long = "account")]
        account: String,
    },
    /// Show usage counters for an account.
    Usage {
        #[arg(short = 'a', long = "account")]
        account: String,
    },
    /// Show recent audit entries, newest first.
    Audit {
        #[arg(short = 'a', long = "account")]
        account: Option<String>,
        #[arg(short = 'n', long = "limit", default_value_t = 20)]
        limit: usize,
    },
    /// Expire overdue pending actions once.
    Sweep,
}

impl CliArgs {
    /// Priority: --config flag > TASKMASTER_CONFIG env var > ~/.taskmaster/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("TASKMASTER_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Returns `None` if not overridden on the command line.
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }
}

fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".taskmaster").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".taskmaster").join("config.toml");
    }
    PathBuf::from("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_collects_trailing_words() {
        let args = CliArgs::parse_from([
            "taskmaster",
            "run",
            "--account",
            "a@example.com",
            "schedule",
            "Sync",
            "with",
            "b@example.com",
            "45min",
        ]);
        assert_eq!(
            args.command,
            Command::Run {
                account: "a@example.com".to_string(),
                words: vec![
                    "schedule".to_string(),
                    "Sync".to_string(),
                    "with".to_string(),
                    "b@example.com".to_string(),
                    "45min".to_string(),
                ],
            }
        );
    }

    #[test]
    fn test_global_config_flag_after_subcommand() {
        let args = CliArgs::parse_from(["taskmaster", "sweep", "--config", "/tmp/tm.toml"]);
        assert_eq!(args.command, Command::Sweep);
        assert_eq!(args.resolve_config_path(), PathBuf::from("/tmp/tm.toml"));
    }

    #[test]
    fn test_audit_defaults() {
        let args = CliArgs::parse_from(["taskmaster", "audit"]);
        assert_eq!(
            args.command,
            Command::Audit {
                account: None,
                limit: 20
            }
        );
        assert!(args.resolve_data_dir().is_none());
        assert!(args.resolve_log_level().is_none());
    }

    #[test]
    fn test_run_requires_account() {
        assert!(CliArgs::try_parse_from(["taskmaster", "run", "status"]).is_err());
    }
}
