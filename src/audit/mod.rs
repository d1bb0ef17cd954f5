//! Append-only event log
//!
//! One JSON object per line. Claim submissions, manager decisions, blocked
//! chat messages and failed agent requests all land here, and `GET /logs`
//! replays the file.

use crate::models::Event;
use crate::Result;
use chrono::Utc;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub mod session;

pub use session::{SessionEntry, SessionLog, SessionRecord, SessionSettings};

pub const EVENT_TRANSACTION: &str = "transaction";
pub const EVENT_SECURITY: &str = "security";
pub const EVENT_ERROR: &str = "error";

enum Sink {
    File(PathBuf),
    Memory(Vec<Event>),
}

pub struct EventLog {
    sink: Mutex<Sink>,
}

impl EventLog {
    /// Log backed by a JSONL file. The file and its directory are created on
    /// first append.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            sink: Mutex::new(Sink::File(path.into())),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            sink: Mutex::new(Sink::Memory(Vec::new())),
        }
    }

    pub async fn append(
        &self,
        event_type: &str,
        actor: &str,
        action: &str,
        details: Value,
    ) -> Result<Event> {
        let event = Event {
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            actor: actor.to_string(),
            action: action.to_string(),
            details,
        };

        let mut sink = self.sink.lock().await;
        match &mut *sink {
            Sink::File(path) => {
                let mut line = serde_json::to_string(&event)?;
                line.push('\n');
                append_line(path, &line).await?;
            }
            Sink::Memory(events) => events.push(event.clone()),
        }

        debug!(event_type, actor, action, "Event appended");
        Ok(event)
    }

    /// Every event in append order. Lines that fail to parse are skipped.
    pub async fn read_all(&self) -> Result<Vec<Event>> {
        let sink = self.sink.lock().await;
        match &*sink {
            Sink::Memory(events) => Ok(events.clone()),
            Sink::File(path) => {
                let raw = match tokio::fs::read_to_string(path).await {
                    Ok(raw) => raw,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                    Err(e) => return Err(e.into()),
                };
                Ok(parse_lines(&raw, path))
            }
        }
    }
}

async fn append_line(path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

fn parse_lines(raw: &str, path: &Path) -> Vec<Event> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(idx, line)| match serde_json::from_str::<Event>(line) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(path = %path.display(), line = idx + 1, error = %e, "Skipping corrupt event line");
                None
            }
        })
        .collect()
}
