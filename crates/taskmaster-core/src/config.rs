use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, TaskMasterError};
use crate::types::{PlanTier, SafetyMode};

/// Top-level configuration for TaskMaster.
///
/// Loaded from `~/.taskmaster/config.toml` by default. Each section
/// corresponds to one component of the coordination engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskMasterConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub collaborators: CollaboratorConfig,
}

impl TaskMasterConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TaskMasterConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| TaskMasterError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the SQLite database and offline calendar.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.taskmaster/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Safety gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Mode for accounts that have no explicit setting.
    pub default_mode: SafetyMode,
    /// Lifetime of a pending action before it expires.
    pub pending_ttl_hours: u32,
    /// How often the sweeper expires stale pending actions.
    pub sweep_interval_secs: u64,
    /// Automation rules applied to accounts in `auto` mode.
    pub automation_rules: Vec<AutomationRuleConfig>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            default_mode: SafetyMode::Confirmation,
            pending_ttl_hours: 24,
            sweep_interval_secs: 300,
            automation_rules: Vec::new(),
        }
    }
}

/// One automation rule, as written in the config file.
///
/// `intent` is an intent kind name such as `"draft_reply"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationRuleConfig {
    pub intent: String,
    /// Every attendee must belong to one of these domains (empty = any).
    pub attendee_domains: Vec<String>,
    /// Upper bound on meeting duration for scheduling intents.
    pub max_duration_minutes: Option<u32>,
}

/// How partially-available slots are used to fill a proposal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillPolicy {
    /// Backfill whenever fewer than `max_proposals` fully free slots exist.
    #[default]
    WhenShort,
    /// Only offer partial slots when no fully free slot exists at all.
    OnlyWhenNoneFree,
}

/// Scheduling engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// First working hour of the day (local to `utc_offset_minutes`).
    pub working_hours_start: u32,
    /// Hour at which the working day ends (exclusive).
    pub working_hours_end: u32,
    /// Working days, 0 = Monday .. 6 = Sunday.
    pub working_days: Vec<u32>,
    /// Offset of the working-hours calendar from UTC.
    pub utc_offset_minutes: i32,
    /// Candidate step; 0 means the step equals the meeting duration.
    pub step_minutes: u32,
    /// Candidate start times are aligned to this grid from local midnight.
    pub alignment_minutes: u32,
    /// Default search horizon when a request gives no upper bound.
    pub search_days: u32,
    /// Default proposal size.
    pub max_proposals: usize,
    pub backfill: BackfillPolicy,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            working_hours_start: 9,
            working_hours_end: 18,
            working_days: vec![0, 1, 2, 3, 4],
            utc_offset_minutes: 0,
            step_minutes: 0,
            alignment_minutes: 30,
            search_days: 7,
            max_proposals: 5,
            backfill: BackfillPolicy::WhenShort,
        }
    }
}

/// How a usage period is anchored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaPeriod {
    /// Resets on the first day of each UTC calendar month.
    #[default]
    CalendarMonth,
    /// Resets every 30 days counted from the first use.
    Rolling30Days,
}

/// Quota tracker configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Plan assumed for accounts the billing collaborator does not know.
    pub default_plan: PlanTier,
    pub period: QuotaPeriod,
}

/// Timeouts and retry policy for external collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorConfig {
    /// Per-call timeout.
    pub timeout_ms: u64,
    /// Extra attempts for idempotent reads (state-changing calls never retry).
    pub read_retries: u32,
    /// Base backoff between read attempts; doubles each attempt.
    pub retry_backoff_ms: u64,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            read_retries: 2,
            retry_backoff_ms: 200,
        }
    }
}
