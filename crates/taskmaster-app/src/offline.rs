//! Offline collaborators for running the engine without network services.
//!
//! `JsonFileCalendar` reads busy time from `calendar.json` in the data
//! directory and appends created events back to it. `EchoMailbox` answers
//! every mail intent with a description of what it would have done.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use taskmaster_action::{
    ActionCollaborator, ActionResult, BusyInterval, CalendarCollaborator, CollaboratorError,
    DispatchMode, Intent,
};
use taskmaster_core::types::AccountId;

/// On-disk shape of `calendar.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarFile {
    /// Busy intervals keyed by lowercase attendee identifier.
    pub busy: HashMap<String, Vec<BusyInterval>>,
    pub events: Vec<CalendarEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub attendees: Vec<String>,
}

pub struct JsonFileCalendar {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileCalendar {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn load(path: &Path) -> Result<CalendarFile, CollaboratorError> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                CollaboratorError::Failed(format!("{} is not valid: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CalendarFile::default()),
            Err(e) => Err(CollaboratorError::Unavailable(format!(
                "Cannot read {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

#[async_trait]
impl CalendarCollaborator for JsonFileCalendar {
    async fn busy_intervals(
        &self,
        attendee: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, CollaboratorError> {
        let file = Self::load(&self.path).await?;
        let key = attendee.to_ascii_lowercase();
        let mut busy: Vec<BusyInterval> = file
            .busy
            .get(&key)
            .into_iter()
            .flatten()
            .copied()
            .filter(|b| b.overlaps(start, end))
            .collect();
        // Events already created count as busy for their attendees.
        busy.extend(
            file.events
                .iter()
                .filter(|e| e.attendees.iter().any(|a| a.eq_ignore_ascii_case(attendee)))
                .map(|e| BusyInterval::new(e.start, e.end))
                .filter(|b| b.overlaps(start, end)),
        );
        debug!(attendee, intervals = busy.len(), "Loaded busy time from file");
        Ok(busy)
    }

    async fn create_event(
        &self,
        title: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        attendees: &[String],
    ) -> Result<String, CollaboratorError> {
        let _guard = self.write_lock.lock().await;
        let mut file = Self::load(&self.path).await?;
        let id = uuid::Uuid::new_v4().to_string();
        file.events.push(CalendarEvent {
            id: id.clone(),
            title: title.to_string(),
            start,
            end,
            attendees: attendees.to_vec(),
        });

        let content = serde_json::to_string_pretty(&file)
            .map_err(|e| CollaboratorError::Failed(e.to_string()))?;
        tokio::fs::write(&self.path, content).await.map_err(|e| {
            CollaboratorError::Unavailable(format!("Cannot write {}: {}", self.path.display(), e))
        })?;
        info!(event_id = %id, title, %start, "Event written to offline calendar");
        Ok(id)
    }
}

/// Mail backend that performs nothing and reports what it was asked.
pub struct EchoMailbox;

#[async_trait]
impl ActionCollaborator for EchoMailbox {
    async fn execute(
        &self,
        account: &AccountId,
        intent: &Intent,
        mode: DispatchMode,
    ) -> Result<ActionResult, CollaboratorError> {
        let message = match intent {
            Intent::SummarizeInbox { max_results } => format!(
                "Offline mailbox for {} has no messages to summarize (max {})",
                account, max_results
            ),
            Intent::DraftReply {
                message_id,
                instructions,
            } => {
                let verb = if mode == DispatchMode::Draft {
                    "Drafted"
                } else {
                    "Sent"
                };
                format!(
                    "{} reply to {}: {}",
                    verb,
                    message_id,
                    instructions.as_deref().unwrap_or("(no text)")
                )
            }
            other => {
                return Err(CollaboratorError::Failed(format!(
                    "Mailbox cannot handle {}",
                    other.kind()
                )))
            }
        };
        Ok(ActionResult {
            message,
            output: Some(serde_json::json!({ "mode": mode, "offline": true })),
        })
    }
}
