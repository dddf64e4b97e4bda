use std::{
    cmp::Ordering,
    fmt,
    path::{Path, PathBuf},
};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

mod error;

pub use error::{Error, Result};

pub const SESSION_DIR: &str = "session";
pub const MESSAGE_DIR: &str = "message";
pub const PART_DIR: &str = "part";

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub project_id: Option<String>,
    pub title: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: String,
    pub model_id: Option<String>,
    pub provider_id: Option<String>,
    pub error: Option<ErrorRecord>,
    pub created_at: DateTime<Utc>,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct Part {
    pub id: String,
    pub message_id: String,
    pub kind: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub name: Option<String>,
    pub message: String,
}

/// A `messages.N.content.M` reference as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Position {
    pub message_index: usize,
    pub content_index: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "messages.{}.content.{}",
            self.message_index, self.content_index
        )
    }
}

#[derive(Deserialize)]
struct SessionRecord {
    id: String,
    title: Option<String>,
    time: Option<SessionTime>,
}

#[derive(Deserialize)]
struct SessionTime {
    created: Option<i64>,
    updated: Option<i64>,
}

#[derive(Deserialize)]
struct MessageRecord {
    id: String,
    #[serde(rename = "sessionID")]
    session_id: String,
    role: String,
    #[serde(rename = "modelID")]
    model_id: Option<String>,
    #[serde(rename = "providerID")]
    provider_id: Option<String>,
    error: Option<ErrorShape>,
    time: MessageTime,
}

#[derive(Deserialize)]
struct MessageTime {
    created: i64,
}

#[derive(Deserialize)]
struct ErrorShape {
    name: Option<String>,
    message: Option<String>,
    data: Option<ErrorData>,
}

#[derive(Deserialize)]
struct ErrorData {
    message: Option<String>,
}

#[derive(Deserialize)]
struct PartRecord {
    id: String,
    #[serde(rename = "type")]
    kind: String,
}

fn millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

impl Session {
    /// Placeholder for a session that has messages but no metadata file.
    pub fn unknown(id: &str) -> Self {
        Self {
            id: id.to_string(),
            project_id: None,
            title: "Unknown".to_string(),
            created_at: None,
            updated_at: None,
        }
    }

    pub fn decode(bytes: &[u8], project_id: Option<&str>, path: &Path) -> Result<Self> {
        let record: SessionRecord =
            serde_json::from_slice(bytes).map_err(|e| Error::malformed(path, e))?;
        let title = record
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "Untitled".to_string());
        let (created_at, updated_at) = match record.time {
            Some(time) => (
                time.created.and_then(millis),
                time.updated.and_then(millis),
            ),
            None => (None, None),
        };
        Ok(Self {
            id: record.id,
            project_id: project_id.map(ToOwned::to_owned),
            title,
            created_at,
            updated_at,
        })
    }
}

impl Message {
    /// Decodes a message file found under `message/{dir_session_id}/`.
    pub fn decode(bytes: &[u8], dir_session_id: &str, path: &Path) -> Result<Self> {
        let record: MessageRecord =
            serde_json::from_slice(bytes).map_err(|e| Error::malformed(path, e))?;
        if record.session_id != dir_session_id {
            return Err(Error::malformed(
                path,
                format!(
                    "sessionID {} does not match directory {}",
                    record.session_id, dir_session_id
                ),
            ));
        }
        let created_at = millis(record.time.created)
            .ok_or_else(|| Error::malformed(path, "time.created is out of range"))?;
        let error = record.error.map(|shape| ErrorRecord {
            name: shape.name,
            message: shape
                .data
                .and_then(|d| d.message)
                .or(shape.message)
                .unwrap_or_default(),
        });
        Ok(Self {
            id: record.id,
            session_id: record.session_id,
            role: record.role,
            model_id: record.model_id,
            provider_id: record.provider_id,
            error,
            created_at,
            path: path.to_path_buf(),
        })
    }

    pub fn error_text(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }

    pub fn is_assistant(&self) -> bool {
        self.role == "assistant"
    }

    pub fn model_label(&self) -> String {
        format!(
            "{}/{}",
            self.provider_id.as_deref().unwrap_or("Unknown"),
            self.model_id.as_deref().unwrap_or("Unknown")
        )
    }

    /// Conversation order: creation time, then ID.
    pub fn conversation_cmp(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl Part {
    pub fn decode(bytes: &[u8], message_id: &str, path: &Path) -> Result<Self> {
        let record: PartRecord =
            serde_json::from_slice(bytes).map_err(|e| Error::malformed(path, e))?;
        Ok(Self {
            id: record.id,
            message_id: message_id.to_string(),
            kind: record.kind,
            path: path.to_path_buf(),
        })
    }

    pub fn is_thinking(&self) -> bool {
        matches!(self.kind.as_str(), "reasoning" | "thinking")
    }
}

/// One distinct source index within a corrupted session.
#[derive(Debug, Clone, Serialize)]
pub struct RepairUnit {
    pub position: Position,
    /// `None` when the position is outside the session's message list.
    pub source: Option<Message>,
    pub offending_part: Option<Part>,
    pub echoes: Vec<Message>,
    /// Why the message at this position cannot be trusted as the source.
    pub problem: Option<String>,
}

impl RepairUnit {
    pub fn is_resolved(&self) -> bool {
        self.source.is_some() && self.problem.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CorruptionGroup {
    pub session: Session,
    /// Messages carrying the signature error, in conversation order.
    pub errored: Vec<Message>,
    pub units: Vec<RepairUnit>,
    /// Errored messages whose position could not be parsed.
    pub unattributed: Vec<Message>,
    pub messages_to_remove: Vec<Message>,
    pub parts_to_remove: Vec<PathBuf>,
}

impl CorruptionGroup {
    /// True when any errored message cannot be tied to a trusted source.
    /// Such a session is left alone as a whole.
    pub fn is_unresolvable(&self) -> bool {
        !self.errored.is_empty()
            && (self.units.is_empty() || self.units.iter().any(|u| !u.is_resolved()))
    }

    pub fn unresolved_reason(&self) -> Option<String> {
        if !self.is_unresolvable() {
            return None;
        }
        if self.units.is_empty() {
            return Some(format!(
                "{} errored message(s) but none names a messages.N.content.M position",
                self.errored.len()
            ));
        }
        let reasons: Vec<String> = self
            .units
            .iter()
            .filter(|u| !u.is_resolved())
            .map(|u| {
                format!(
                    "{}: {}",
                    u.position,
                    u.problem.as_deref().unwrap_or("no source message")
                )
            })
            .collect();
        Some(reasons.join("; "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedFile {
    pub id: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairPlan {
    pub session_id: String,
    pub messages: Vec<PlannedFile>,
    pub parts: Vec<PlannedFile>,
}

impl RepairPlan {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.parts.is_empty()
    }

    pub fn files(&self) -> impl Iterator<Item = &PlannedFile> {
        self.messages.iter().chain(self.parts.iter())
    }

    pub fn message_ids(&self) -> Vec<String> {
        self.messages.iter().map(|m| m.id.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RepairStatus {
    Success,
    NoOpNeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepairResult {
    pub session_id: String,
    pub title: String,
    pub status: RepairStatus,
    pub dry_run: bool,
    pub messages_removed: Vec<String>,
    pub parts_removed: usize,
    pub backup_path: Option<PathBuf>,
    pub error: Option<String>,
}

impl RepairResult {
    pub fn no_op(session: &Session, dry_run: bool) -> Self {
        Self {
            session_id: session.id.clone(),
            title: session.title.clone(),
            status: RepairStatus::NoOpNeeded,
            dry_run,
            messages_removed: Vec::new(),
            parts_removed: 0,
            backup_path: None,
            error: None,
        }
    }

    pub fn failed(session: &Session, dry_run: bool, error: impl ToString) -> Self {
        Self {
            status: RepairStatus::Failed,
            error: Some(error.to_string()),
            ..Self::no_op(session, dry_run)
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == RepairStatus::Failed
    }
}
