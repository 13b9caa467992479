use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a persisted chat message. System messages carry ingestion
/// progress and other pipeline notices into the visible transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            "system" => Some(MessageRole::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: i64,
    pub session_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    /// RFC 3339 with microsecond precision so insertion order survives
    /// lexicographic sorting.
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub sid: Uuid,
    pub user: String,
    pub title: String,
    pub created: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    pub session_id: Uuid,
    pub file_path: String,
    pub file_name: String,
    pub file_type: String,
    pub uploaded_at: String,
    pub processed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserRole {
    Normal,
    Admin,
}

impl UserRole {
    pub fn from_i64(v: i64) -> Self {
        if v == 1 {
            UserRole::Admin
        } else {
            UserRole::Normal
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            UserRole::Normal => 0,
            UserRole::Admin => 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub phone: String,
    pub name: String,
    pub role: UserRole,
}

/// One row in a per-session vector collection.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: String,
    pub source: String,
    pub chunk_index: u32,
    pub text: String,
    pub file_path: String,
    pub file_type: String,
    pub session_id: String,
    pub vector: Vec<f32>,
    pub created_at: i64,
}

/// Entry in the grouped session list shown to a user. Group headers are
/// display-only separators; only `Session` entries are selectable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChoice {
    GroupHeader { label: String, count: usize },
    Session { label: String, sid: Uuid },
}

/// Current time as RFC 3339 with microseconds. Microsecond precision keeps
/// `ORDER BY ts` stable for messages appended back to back.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
