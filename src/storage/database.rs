use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use uuid::Uuid;

use crate::types::{FileRecord, MessageRecord, MessageRole, SessionRecord, UserRecord, UserRole};

/// SQLite-backed relational store for users, sessions, messages, uploaded
/// files and the admin periphery. Single-statement consistency only; callers
/// needing cross-store atomicity (rows plus vector collections) handle
/// divergence at their own level.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;

             CREATE TABLE IF NOT EXISTS users (
                 phone TEXT PRIMARY KEY,
                 pwd TEXT NOT NULL,
                 name TEXT NOT NULL,
                 role INTEGER NOT NULL DEFAULT 0
             );

             CREATE TABLE IF NOT EXISTS sessions (
                 sid TEXT PRIMARY KEY,
                 phone TEXT NOT NULL,
                 title TEXT NOT NULL,
                 created TEXT NOT NULL
             );

             CREATE TABLE IF NOT EXISTS messages (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 sid TEXT NOT NULL,
                 role TEXT NOT NULL,
                 content TEXT NOT NULL,
                 ts TEXT NOT NULL
             );

             CREATE TABLE IF NOT EXISTS files (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 sid TEXT NOT NULL,
                 file_path TEXT NOT NULL,
                 file_name TEXT NOT NULL,
                 file_type TEXT NOT NULL,
                 uploaded_at TEXT NOT NULL,
                 processed INTEGER NOT NULL DEFAULT 0
             );

             CREATE TABLE IF NOT EXISTS knowledge_entries (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 title TEXT NOT NULL,
                 source_file TEXT NOT NULL,
                 uploaded_by TEXT NOT NULL,
                 status TEXT NOT NULL DEFAULT 'pending',
                 reviewer TEXT,
                 review_comments TEXT,
                 created_at TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             );

             CREATE TABLE IF NOT EXISTS system_alerts (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 level TEXT NOT NULL,
                 message TEXT NOT NULL,
                 created_at TEXT NOT NULL
             );

             CREATE TABLE IF NOT EXISTS system_backups (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 backup_path TEXT NOT NULL,
                 kind TEXT NOT NULL,
                 created_at TEXT NOT NULL
             );

             CREATE INDEX IF NOT EXISTS idx_sessions_phone ON sessions(phone);
             CREATE INDEX IF NOT EXISTS idx_messages_sid ON messages(sid);
             CREATE INDEX IF NOT EXISTS idx_files_sid ON files(sid);
             CREATE INDEX IF NOT EXISTS idx_knowledge_status ON knowledge_entries(status);",
        )
        .context("Failed to run database migrations")?;
        Ok(())
    }

    /// Run arbitrary SQL. Only for tests that need to break the store out
    /// from under the code being exercised.
    #[cfg(test)]
    pub fn execute_raw(&self, sql: &str) -> Result<()> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }

    // ---- users ----

    pub fn create_user(&self, phone: &str, pwd: &str, name: &str, role: UserRole) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (phone, pwd, name, role) VALUES (?1, ?2, ?3, ?4)",
            params![phone, pwd, name, role.as_i64()],
        )
        .context("Failed to insert user")?;
        Ok(())
    }

    pub fn get_user(&self, phone: &str) -> Result<Option<UserRecord>> {
        let conn = self.conn.lock();
        let user = conn
            .query_row(
                "SELECT phone, name, role FROM users WHERE phone = ?1",
                params![phone],
                |row| {
                    Ok(UserRecord {
                        phone: row.get(0)?,
                        name: row.get(1)?,
                        role: UserRole::from_i64(row.get(2)?),
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    pub fn verify_credentials(&self, phone: &str, pwd: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let stored: Option<String> = conn
            .query_row(
                "SELECT pwd FROM users WHERE phone = ?1",
                params![phone],
                |row| row.get(0),
            )
            .optional()?;
        Ok(stored.as_deref() == Some(pwd))
    }

    pub fn set_user_role(&self, phone: &str, role: UserRole) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE users SET role = ?1 WHERE phone = ?2",
            params![role.as_i64(), phone],
        )?;
        Ok(changed > 0)
    }

    pub fn list_users(&self) -> Result<Vec<UserRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT phone, name, role FROM users ORDER BY phone")?;
        let rows = stmt.query_map([], |row| {
            Ok(UserRecord {
                phone: row.get(0)?,
                name: row.get(1)?,
                role: UserRole::from_i64(row.get(2)?),
            })
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// Remove a user and every row hanging off their sessions. Vector
    /// collections for those sessions are the caller's cleanup.
    pub fn delete_user(&self, phone: &str) -> Result<bool> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM messages WHERE sid IN (SELECT sid FROM sessions WHERE phone = ?1)",
            params![phone],
        )?;
        conn.execute(
            "DELETE FROM files WHERE sid IN (SELECT sid FROM sessions WHERE phone = ?1)",
            params![phone],
        )?;
        conn.execute("DELETE FROM sessions WHERE phone = ?1", params![phone])?;
        let changed = conn.execute("DELETE FROM users WHERE phone = ?1", params![phone])?;
        Ok(changed > 0)
    }

    // ---- sessions ----

    pub fn insert_session(&self, session: &SessionRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (sid, phone, title, created) VALUES (?1, ?2, ?3, ?4)",
            params![
                session.sid.to_string(),
                session.user,
                session.title,
                session.created
            ],
        )
        .context("Failed to insert session")?;
        Ok(())
    }

    pub fn session_exists(&self, sid: Uuid) -> Result<bool> {
        let conn = self.conn.lock();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM sessions WHERE sid = ?1",
                params![sid.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn session_count_for_user(&self, phone: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE phone = ?1",
            params![phone],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn sessions_for_user(&self, phone: &str) -> Result<Vec<SessionRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT sid, phone, title, created FROM sessions
             WHERE phone = ?1 ORDER BY created DESC",
        )?;
        let rows = stmt.query_map(params![phone], row_to_session)?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }

    pub fn latest_session_for_user(&self, phone: &str) -> Result<Option<SessionRecord>> {
        let conn = self.conn.lock();
        let session = conn
            .query_row(
                "SELECT sid, phone, title, created FROM sessions
                 WHERE phone = ?1 ORDER BY created DESC LIMIT 1",
                params![phone],
                row_to_session,
            )
            .optional()?;
        Ok(session)
    }

    pub fn update_session_title(&self, sid: Uuid, title: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE sessions SET title = ?1 WHERE sid = ?2",
            params![title, sid.to_string()],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_session(&self, sid: Uuid) -> Result<bool> {
        let conn = self.conn.lock();
        let sid = sid.to_string();
        conn.execute("DELETE FROM messages WHERE sid = ?1", params![sid])?;
        conn.execute("DELETE FROM files WHERE sid = ?1", params![sid])?;
        let changed = conn.execute("DELETE FROM sessions WHERE sid = ?1", params![sid])?;
        Ok(changed > 0)
    }

    // ---- messages ----

    pub fn insert_message(
        &self,
        sid: Uuid,
        role: MessageRole,
        content: &str,
        ts: &str,
    ) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO messages (sid, role, content, ts) VALUES (?1, ?2, ?3, ?4)",
            params![sid.to_string(), role.as_str(), content, ts],
        )
        .context("Failed to insert message")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn messages_for_session(&self, sid: Uuid) -> Result<Vec<MessageRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, sid, role, content, ts FROM messages
             WHERE sid = ?1 ORDER BY ts, id",
        )?;
        let rows = stmt.query_map(params![sid.to_string()], row_to_message)?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn message_count(&self, sid: Uuid) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE sid = ?1",
            params![sid.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Count of user/assistant messages only. System notices (ingestion
    /// progress and the like) do not advance the conversation.
    pub fn conversational_count(&self, sid: Uuid) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE sid = ?1 AND role != 'system'",
            params![sid.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ---- files ----

    pub fn insert_file(
        &self,
        sid: Uuid,
        file_path: &str,
        file_name: &str,
        file_type: &str,
        uploaded_at: &str,
    ) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO files (sid, file_path, file_name, file_type, uploaded_at, processed)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![sid.to_string(), file_path, file_name, file_type, uploaded_at],
        )
        .context("Failed to insert file record")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn unprocessed_files(&self, sid: Uuid) -> Result<Vec<FileRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, sid, file_path, file_name, file_type, uploaded_at, processed
             FROM files WHERE sid = ?1 AND processed = 0 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![sid.to_string()], row_to_file)?;
        let mut files = Vec::new();
        for row in rows {
            files.push(row?);
        }
        Ok(files)
    }

    pub fn mark_file_processed(&self, file_id: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE files SET processed = 1 WHERE id = ?1",
            params![file_id],
        )?;
        Ok(())
    }

    /// (total, processed) counts for a session's uploads.
    pub fn file_status(&self, sid: Uuid) -> Result<(usize, usize)> {
        let conn = self.conn.lock();
        let (total, processed): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(processed), 0) FROM files WHERE sid = ?1",
            params![sid.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((total as usize, processed as usize))
    }

    // ---- knowledge entries ----

    pub fn insert_knowledge_entry(
        &self,
        title: &str,
        source_file: &str,
        uploaded_by: &str,
        ts: &str,
    ) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO knowledge_entries (title, source_file, uploaded_by, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'pending', ?4, ?4)",
            params![title, source_file, uploaded_by, ts],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn set_knowledge_status(
        &self,
        entry_id: i64,
        status: &str,
        reviewer: Option<&str>,
        comments: Option<&str>,
        ts: &str,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE knowledge_entries
             SET status = ?1, reviewer = ?2, review_comments = ?3, updated_at = ?4
             WHERE id = ?5",
            params![status, reviewer, comments, ts, entry_id],
        )?;
        Ok(changed > 0)
    }

    pub fn knowledge_status(&self, entry_id: i64) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let status = conn
            .query_row(
                "SELECT status FROM knowledge_entries WHERE id = ?1",
                params![entry_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status)
    }

    /// Count of entries per status.
    pub fn knowledge_statistics(&self) -> Result<Vec<(String, usize)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM knowledge_entries GROUP BY status ORDER BY status",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    // ---- alerts / backups ----

    pub fn insert_alert(&self, level: &str, message: &str, ts: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO system_alerts (level, message, created_at) VALUES (?1, ?2, ?3)",
            params![level, message, ts],
        )?;
        Ok(())
    }

    pub fn recent_alerts(&self, limit: usize) -> Result<Vec<(String, String, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT level, message, created_at FROM system_alerts
             ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    pub fn insert_backup(&self, backup_path: &str, kind: &str, ts: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO system_backups (backup_path, kind, created_at) VALUES (?1, ?2, ?3)",
            params![backup_path, kind, ts],
        )?;
        Ok(())
    }

    pub fn recent_backups(&self, limit: usize) -> Result<Vec<(String, String, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT backup_path, kind, created_at FROM system_backups
             ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRecord> {
    let sid: String = row.get(0)?;
    Ok(SessionRecord {
        sid: Uuid::parse_str(&sid).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        user: row.get(1)?,
        title: row.get(2)?,
        created: row.get(3)?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    let sid: String = row.get(1)?;
    let role: String = row.get(2)?;
    Ok(MessageRecord {
        id: row.get(0)?,
        session_id: Uuid::parse_str(&sid).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?,
        role: MessageRole::parse(&role).unwrap_or(MessageRole::System),
        content: row.get(3)?,
        timestamp: row.get(4)?,
    })
}

fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
    let sid: String = row.get(1)?;
    let processed: i64 = row.get(6)?;
    Ok(FileRecord {
        id: row.get(0)?,
        session_id: Uuid::parse_str(&sid).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?,
        file_path: row.get(2)?,
        file_name: row.get(3)?,
        file_type: row.get(4)?,
        uploaded_at: row.get(5)?,
        processed: processed != 0,
    })
}
