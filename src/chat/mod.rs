//! Session lifecycle: creation with a welcome message, serialized message
//! appends, one-shot auto-rename, and the grouped history list.

pub mod engine;

pub use engine::{ChatEngine, TurnReply};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::llm::{GenerationConfig, LlmProvider};
use crate::storage::database::Database;
use crate::storage::vector_index::{collection_name_for_session, SessionVectorIndex};
use crate::types::{now_timestamp, MessageRecord, MessageRole, SessionChoice, SessionRecord};

/// First message of every new session, authored by the assistant.
pub const WELCOME_MESSAGE: &str =
    "👋 Hello! I'm your course assistant. Ask me anything, or upload course material to get started.";

const TITLE_PROMPT: &str = "\
Summarize this conversation as a short session title of at most six words.
Reply with the title only, no quotes, no punctuation around it.

Conversation:
{transcript}

Title:";

/// Owns session and message persistence plus the per-session locks that
/// keep concurrent appends on one session sequential. The auto-rename
/// check runs under the same lock as the append that triggers it, so it
/// cannot double-fire.
pub struct SessionManager {
    db: Arc<Database>,
    index: Arc<SessionVectorIndex>,
    llm: Arc<dyn LlmProvider>,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl SessionManager {
    pub fn new(
        db: Arc<Database>,
        index: Arc<SessionVectorIndex>,
        llm: Arc<dyn LlmProvider>,
    ) -> Self {
        Self {
            db,
            index,
            llm,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, sid: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(sid)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Create a session with a default numbered title (unless one is given)
    /// and the welcome message. Returns `None` when persistence fails.
    pub async fn create_session(&self, user: &str, title: Option<&str>) -> Option<SessionRecord> {
        let sid = Uuid::new_v4();
        let title = match title {
            Some(t) => t.to_string(),
            None => {
                let count = self.db.session_count_for_user(user).unwrap_or(0);
                format!("Chat {}", count + 1)
            }
        };

        let session = SessionRecord {
            sid,
            user: user.to_string(),
            title,
            created: now_timestamp(),
        };

        if let Err(e) = self.db.insert_session(&session) {
            tracing::error!(user = %user, error = %e, "Failed to create session");
            return None;
        }

        if !self
            .append_message(sid, MessageRole::Assistant, WELCOME_MESSAGE)
            .await
        {
            tracing::warn!(session_id = %sid, "Failed to persist welcome message");
        }

        tracing::info!(session_id = %sid, user = %user, "Created session");
        Some(session)
    }

    /// Append one message with a fresh timestamp. Appends to the same
    /// session are serialized; the first assistant reply of a conversation
    /// triggers the one-shot auto-rename before the lock is released.
    pub async fn append_message(&self, sid: Uuid, role: MessageRole, content: &str) -> bool {
        let lock = self.lock_for(sid);
        let _guard = lock.lock().await;

        let ts = now_timestamp();
        if let Err(e) = self.db.insert_message(sid, role, content, &ts) {
            tracing::error!(session_id = %sid, error = %e, "Failed to persist message");
            return false;
        }

        if role == MessageRole::Assistant {
            // Welcome + first user turn + first reply, system notices
            // excluded. Counting past the welcome makes this the end of
            // the first exchange.
            match self.db.conversational_count(sid) {
                Ok(3) => {
                    self.auto_rename(sid).await;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(session_id = %sid, error = %e, "Count for rename check failed")
                }
            }
        }
        true
    }

    /// Derive a title from the opening exchange. Best effort: any failure
    /// or an implausibly short suggestion keeps the default title, and the
    /// attempt is never repeated.
    pub async fn auto_rename(&self, sid: Uuid) -> bool {
        let messages = match self.db.messages_for_session(sid) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(session_id = %sid, error = %e, "Rename skipped, history unavailable");
                return false;
            }
        };

        let transcript: Vec<String> = messages
            .iter()
            .take(10)
            .map(|m| {
                let content: String = m.content.chars().take(200).collect();
                format!("{}: {}", m.role.as_str(), content)
            })
            .collect();

        let prompt = TITLE_PROMPT.replace("{transcript}", &transcript.join("\n"));
        let title = match self
            .llm
            .complete(&prompt, &GenerationConfig::new(20, 0.3))
            .await
        {
            Ok(raw) => raw.trim().trim_matches(['"', '\'', '“', '”']).trim().to_string(),
            Err(e) => {
                tracing::warn!(session_id = %sid, error = %e, "Title generation failed");
                return false;
            }
        };

        if title.chars().count() < 2 {
            tracing::warn!(session_id = %sid, title = %title, "Rejected generated title");
            return false;
        }

        match self.db.update_session_title(sid, &title) {
            Ok(true) => {
                tracing::info!(session_id = %sid, title = %title, "Session renamed");
                true
            }
            _ => false,
        }
    }

    /// Latest session for the user, creating one if they have none.
    pub async fn ensure_user_has_session(&self, user: &str) -> Option<SessionRecord> {
        match self.db.latest_session_for_user(user) {
            Ok(Some(session)) => Some(session),
            Ok(None) => self.create_session(user, None).await,
            Err(e) => {
                tracing::error!(user = %user, error = %e, "Session lookup failed");
                None
            }
        }
    }

    pub fn session_exists(&self, sid: Uuid) -> bool {
        self.db.session_exists(sid).unwrap_or(false)
    }

    pub fn messages(&self, sid: Uuid) -> Vec<MessageRecord> {
        self.db.messages_for_session(sid).unwrap_or_default()
    }

    /// Drop a session's rows and its vector collection.
    pub async fn delete_session(&self, sid: Uuid) -> bool {
        let deleted = self.db.delete_session(sid).unwrap_or(false);
        if let Err(e) = self
            .index
            .delete_collection(&collection_name_for_session(sid))
            .await
        {
            tracing::warn!(session_id = %sid, error = %e, "Vector collection cleanup failed");
        }
        self.locks.remove(&sid);
        deleted
    }

    /// Session list grouped into calendar buckets for display.
    pub fn sessions_grouped_for_display(&self, user: &str) -> Vec<SessionChoice> {
        self.sessions_grouped_at(user, Utc::now())
    }

    /// Same as [`sessions_grouped_for_display`] with an explicit clock, so
    /// bucket edges are testable. Buckets appear in fixed order, empty ones
    /// are omitted, and sessions stay newest-first within a bucket.
    pub fn sessions_grouped_at(&self, user: &str, now: DateTime<Utc>) -> Vec<SessionChoice> {
        let sessions = self.db.sessions_for_user(user).unwrap_or_default();
        let today = now.date_naive();

        let mut buckets: [(&str, Vec<&SessionRecord>); 4] = [
            ("Today", Vec::new()),
            ("Yesterday", Vec::new()),
            ("Previous 7 days", Vec::new()),
            ("Older", Vec::new()),
        ];

        for session in &sessions {
            let created = DateTime::parse_from_rfc3339(&session.created)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or(now);
            let date = created.date_naive();

            let slot = if date == today {
                0
            } else if date == today - Duration::days(1) {
                1
            } else if date >= today - Duration::days(7) {
                2
            } else {
                3
            };
            buckets[slot].1.push(session);
        }

        let mut out = Vec::new();
        for (label, group) in buckets {
            if group.is_empty() {
                continue;
            }
            out.push(SessionChoice::GroupHeader {
                label: label.to_string(),
                count: group.len(),
            });
            for session in group {
                out.push(SessionChoice::Session {
                    label: session.title.clone(),
                    sid: session.sid,
                });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::testing::HashEmbedder;
    use crate::llm::testing::FakeLlm;

    async fn manager(llm: Arc<FakeLlm>) -> (Arc<SessionManager>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let index = Arc::new(
            SessionVectorIndex::new(
                dir.path().to_str().unwrap(),
                Arc::new(HashEmbedder::new(16)),
            )
            .await
            .unwrap(),
        );
        (Arc::new(SessionManager::new(db, index, llm)), dir)
    }

    #[tokio::test]
    async fn new_session_starts_with_the_welcome_message() {
        let (manager, _dir) = manager(Arc::new(FakeLlm::always("Title"))).await;
        let session = manager.create_session("13800000001", None).await.unwrap();
        assert_eq!(session.title, "Chat 1");

        let messages = manager.messages(session.sid);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, MessageRole::Assistant);
        assert_eq!(messages[0].content, WELCOME_MESSAGE);
    }

    #[tokio::test]
    async fn default_titles_count_up() {
        let (manager, _dir) = manager(Arc::new(FakeLlm::always("T"))).await;
        let a = manager.create_session("u", None).await.unwrap();
        let b = manager.create_session("u", None).await.unwrap();
        assert_eq!(a.title, "Chat 1");
        assert_eq!(b.title, "Chat 2");
    }

    #[tokio::test]
    async fn n_turns_leave_2n_plus_1_messages_in_order() {
        let (manager, _dir) = manager(Arc::new(FakeLlm::always("Sorting homework"))).await;
        let session = manager.create_session("u", None).await.unwrap();
        let sid = session.sid;

        let n = 4;
        for i in 0..n {
            assert!(manager.append_message(sid, MessageRole::User, &format!("q{}", i)).await);
            assert!(manager.append_message(sid, MessageRole::Assistant, &format!("a{}", i)).await);
        }

        let messages = manager.messages(sid);
        assert_eq!(messages.len(), 2 * n + 1);
        assert_eq!(messages[0].content, WELCOME_MESSAGE);
        for pair in messages.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[tokio::test]
    async fn auto_rename_fires_exactly_once_after_the_first_exchange() {
        let llm = Arc::new(FakeLlm::new(vec![
            Ok("\"Dijkstra questions\"".to_string()),
            Ok("Should not be used".to_string()),
        ]));
        let (manager, _dir) = manager(llm.clone()).await;
        let db_session = manager.create_session("u", None).await.unwrap();
        let sid = db_session.sid;

        manager.append_message(sid, MessageRole::User, "how does dijkstra work").await;
        // No rename yet: only the assistant reply closes the exchange.
        assert_eq!(llm.prompts.lock().len(), 0);

        manager.append_message(sid, MessageRole::Assistant, "with a priority queue").await;
        assert_eq!(llm.prompts.lock().len(), 1);

        // Quotes are stripped from the generated title.
        let sessions = manager.db.sessions_for_user("u").unwrap();
        assert_eq!(sessions[0].title, "Dijkstra questions");

        // Further turns never rename again.
        manager.append_message(sid, MessageRole::User, "and bfs?").await;
        manager.append_message(sid, MessageRole::Assistant, "level by level").await;
        assert_eq!(llm.prompts.lock().len(), 1);
        let sessions = manager.db.sessions_for_user("u").unwrap();
        assert_eq!(sessions[0].title, "Dijkstra questions");
    }

    #[tokio::test]
    async fn failed_rename_keeps_the_default_title() {
        let llm = Arc::new(FakeLlm::new(vec![Err("model down".to_string())]));
        let (manager, _dir) = manager(llm).await;
        let session = manager.create_session("u", None).await.unwrap();
        manager.append_message(session.sid, MessageRole::User, "hi").await;
        manager.append_message(session.sid, MessageRole::Assistant, "hello").await;

        let sessions = manager.db.sessions_for_user("u").unwrap();
        assert_eq!(sessions[0].title, "Chat 1");
    }

    #[tokio::test]
    async fn too_short_titles_are_rejected() {
        let llm = Arc::new(FakeLlm::new(vec![Ok("\"\"".to_string())]));
        let (manager, _dir) = manager(llm).await;
        let session = manager.create_session("u", None).await.unwrap();
        manager.append_message(session.sid, MessageRole::User, "hi").await;
        manager.append_message(session.sid, MessageRole::Assistant, "hello").await;

        let sessions = manager.db.sessions_for_user("u").unwrap();
        assert_eq!(sessions[0].title, "Chat 1");
    }

    #[tokio::test]
    async fn ensure_user_has_session_is_idempotent() {
        let (manager, _dir) = manager(Arc::new(FakeLlm::always("T"))).await;
        let first = manager.ensure_user_has_session("u").await.unwrap();
        let second = manager.ensure_user_has_session("u").await.unwrap();
        assert_eq!(first.sid, second.sid);
        assert_eq!(manager.db.session_count_for_user("u").unwrap(), 1);
    }

    #[tokio::test]
    async fn grouping_buckets_by_calendar_day_and_omits_empty_buckets() {
        let (manager, _dir) = manager(Arc::new(FakeLlm::always("T"))).await;
        let now = DateTime::parse_from_rfc3339("2026-08-29T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let mut insert = |title: &str, created: &str| {
            manager
                .db
                .insert_session(&SessionRecord {
                    sid: Uuid::new_v4(),
                    user: "u".into(),
                    title: title.into(),
                    created: created.into(),
                })
                .unwrap();
        };
        insert("today-early", "2026-08-29T01:00:00+00:00");
        insert("today-late", "2026-08-29T11:00:00+00:00");
        insert("last-week", "2026-08-24T10:00:00+00:00");
        insert("ancient", "2026-01-01T10:00:00+00:00");

        let choices = manager.sessions_grouped_at("u", now);

        let labels: Vec<String> = choices
            .iter()
            .map(|c| match c {
                SessionChoice::GroupHeader { label, .. } => format!("# {}", label),
                SessionChoice::Session { label, .. } => label.clone(),
            })
            .collect();

        // No session from yesterday, so that bucket is absent entirely.
        assert_eq!(
            labels,
            vec![
                "# Today",
                "today-late",
                "today-early",
                "# Previous 7 days",
                "last-week",
                "# Older",
                "ancient",
            ]
        );
    }

    #[tokio::test]
    async fn a_session_exactly_seven_days_old_stays_in_the_week_bucket() {
        let (manager, _dir) = manager(Arc::new(FakeLlm::always("T"))).await;
        let now = DateTime::parse_from_rfc3339("2026-08-29T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let mut insert = |title: &str, created: &str| {
            manager
                .db
                .insert_session(&SessionRecord {
                    sid: Uuid::new_v4(),
                    user: "u".into(),
                    title: title.into(),
                    created: created.into(),
                })
                .unwrap();
        };
        // Seven calendar days back is the last day of the week bucket;
        // eight days back is the first day of "Older".
        insert("week-edge", "2026-08-22T10:00:00+00:00");
        insert("older-edge", "2026-08-21T10:00:00+00:00");

        let labels: Vec<String> = manager
            .sessions_grouped_at("u", now)
            .iter()
            .map(|c| match c {
                SessionChoice::GroupHeader { label, .. } => format!("# {}", label),
                SessionChoice::Session { label, .. } => label.clone(),
            })
            .collect();

        assert_eq!(
            labels,
            vec!["# Previous 7 days", "week-edge", "# Older", "older-edge"]
        );
    }

    #[tokio::test]
    async fn delete_session_removes_rows_and_lock() {
        let (manager, _dir) = manager(Arc::new(FakeLlm::always("T"))).await;
        let session = manager.create_session("u", None).await.unwrap();
        assert!(manager.delete_session(session.sid).await);
        assert!(!manager.session_exists(session.sid));
        assert!(manager.messages(session.sid).is_empty());
    }
}
