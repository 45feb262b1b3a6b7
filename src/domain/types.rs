use serde::{Serialize, Serializer};
use serde_json::Value;
use std::time::SystemTime;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// One decoded transcript line. The transcript schema belongs to the assistant
/// that writes it, so records stay generic JSON rather than a closed enum.
pub type Message = Value;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub name: String,
    pub path: String,
    pub sessions: Vec<Session>,
}

impl Project {
    pub fn last_modified(&self) -> Option<SystemTime> {
        self.sessions.iter().filter_map(|session| session.modified).max()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub project_name: String,
    pub path: String,
    #[serde(rename = "lastModified", serialize_with = "serialize_modified")]
    pub modified: Option<SystemTime>,
    pub message_count: usize,
    pub messages: Vec<Message>,
    pub agents: Vec<SubAgent>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubAgent {
    pub id: String,
    pub path: String,
    #[serde(rename = "lastModified", serialize_with = "serialize_modified")]
    pub modified: Option<SystemTime>,
    pub message_count: usize,
    pub messages: Vec<Message>,
}

fn serialize_modified<S: Serializer>(
    modified: &Option<SystemTime>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let formatted =
        modified.and_then(|modified| OffsetDateTime::from(modified).format(&Rfc3339).ok());
    match formatted {
        Some(text) => serializer.serialize_str(&text),
        None => serializer.serialize_none(),
    }
}

/// A transcript file name, classified by naming convention.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TranscriptFile {
    Session { id: String },
    Agent { id: String },
}

/// Kind of filesystem change reported to browsers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileChangeKind {
    Create,
    Modify,
    Rename,
    Remove,
    Other,
}

impl FileChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Rename => "rename",
            Self::Remove => "remove",
            Self::Other => "other",
        }
    }
}

/// Server-originated event pushed over the streaming endpoint.
///
/// Serializes as `{ "type": "...", "data": { ... } }`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum HubEvent {
    Connected {
        client_id: String,
    },
    Heartbeat {
        timestamp: u64,
    },
    FileChange {
        event_type: String,
        filename: String,
        timestamp: u64,
    },
}

impl HubEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Heartbeat { .. } => "heartbeat",
            Self::FileChange { .. } => "file_change",
        }
    }

    pub fn file_change(kind: FileChangeKind, filename: String) -> Self {
        Self::FileChange {
            event_type: kind.as_str().to_string(),
            filename,
            timestamp: now_ms(),
        }
    }

    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            timestamp: now_ms(),
        }
    }
}

pub fn now_ms() -> u64 {
    use std::time::UNIX_EPOCH;
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => u64::try_from(d.as_millis()).unwrap_or(u64::MAX),
        Err(_) => 0,
    }
}
