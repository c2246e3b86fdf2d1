//! Generation session records
//!
//! Session ids come from a per-user sequence starting at 1. Once a session
//! is Completed or Failed the store refuses further updates to it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shorui_core::{GenerationSession, Result, SessionId, ShoruiError, UserId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Storage for generation sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a Requested session with the user's next id
    async fn create(&self, user_id: &str, topic: &str, now: DateTime<Utc>) -> Result<GenerationSession>;

    /// Replace a stored session; rejected once the stored copy is terminal
    async fn update(&self, session: &GenerationSession) -> Result<()>;

    async fn get(&self, user_id: &str, id: SessionId) -> Result<Option<GenerationSession>>;

    /// All sessions for a user, newest first
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<GenerationSession>>;
}

/// In-memory table shared by both store implementations
#[derive(Debug, Default)]
struct SessionTable {
    by_user: HashMap<UserId, Vec<GenerationSession>>,
}

impl SessionTable {
    fn create(&mut self, user_id: &str, topic: &str, now: DateTime<Utc>) -> GenerationSession {
        let sessions = self.by_user.entry(user_id.to_string()).or_default();
        let id = sessions.last().map(|s| s.id + 1).unwrap_or(1);
        let session = GenerationSession::new(id, user_id, topic, now);
        sessions.push(session.clone());
        session
    }

    fn update(&mut self, session: &GenerationSession) -> Result<()> {
        let stored = self
            .by_user
            .get_mut(&session.user_id)
            .and_then(|sessions| sessions.iter_mut().find(|s| s.id == session.id))
            .ok_or_else(|| {
                ShoruiError::NotFound(format!("session {}/{}", session.user_id, session.id))
            })?;

        if stored.status.is_terminal() {
            return Err(ShoruiError::InvalidTransition(format!(
                "session {}/{} is already {}",
                session.user_id, session.id, stored.status
            )));
        }

        *stored = session.clone();
        Ok(())
    }

    /// Replay a snapshot read back from disk; last write wins
    fn apply(&mut self, session: GenerationSession) {
        let sessions = self.by_user.entry(session.user_id.clone()).or_default();
        match sessions.iter_mut().find(|s| s.id == session.id) {
            Some(existing) => *existing = session,
            None => {
                sessions.push(session);
                sessions.sort_by_key(|s| s.id);
            }
        }
    }

    fn get(&self, user_id: &str, id: SessionId) -> Option<GenerationSession> {
        self.by_user
            .get(user_id)
            .and_then(|sessions| sessions.iter().find(|s| s.id == id))
            .cloned()
    }

    fn list(&self, user_id: &str) -> Vec<GenerationSession> {
        self.by_user
            .get(user_id)
            .map(|sessions| sessions.iter().rev().cloned().collect())
            .unwrap_or_default()
    }
}

/// Sessions kept in memory only
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    table: Mutex<SessionTable>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, user_id: &str, topic: &str, now: DateTime<Utc>) -> Result<GenerationSession> {
        Ok(self.table.lock().await.create(user_id, topic, now))
    }

    async fn update(&self, session: &GenerationSession) -> Result<()> {
        self.table.lock().await.update(session)
    }

    async fn get(&self, user_id: &str, id: SessionId) -> Result<Option<GenerationSession>> {
        Ok(self.table.lock().await.get(user_id, id))
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<GenerationSession>> {
        Ok(self.table.lock().await.list(user_id))
    }
}

/// Sessions backed by an append-only JSONL log of snapshots.
///
/// Every create and update appends the full session; opening the store
/// replays the log.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    table: Mutex<SessionTable>,
}

impl FileSessionStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut table = SessionTable::default();
        match fs::read_to_string(&path).await {
            Ok(content) => {
                let mut replayed = 0usize;
                for line in content.lines() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<GenerationSession>(line) {
                        Ok(session) => {
                            table.apply(session);
                            replayed += 1;
                        }
                        Err(e) => warn!("Skipping unreadable session record: {}", e),
                    }
                }
                debug!("Replayed {} session records from {:?}", replayed, path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, session: &GenerationSession) -> Result<()> {
        let mut line = serde_json::to_vec(session)?;
        line.push(b'\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn create(&self, user_id: &str, topic: &str, now: DateTime<Utc>) -> Result<GenerationSession> {
        let mut table = self.table.lock().await;
        let session = table.create(user_id, topic, now);
        if let Err(e) = self.append(&session).await {
            // Undo so the id can be reused and memory matches disk
            if let Some(sessions) = table.by_user.get_mut(user_id) {
                sessions.pop();
            }
            return Err(e);
        }
        Ok(session)
    }

    async fn update(&self, session: &GenerationSession) -> Result<()> {
        let mut table = self.table.lock().await;
        let previous = table.get(&session.user_id, session.id);
        table.update(session)?;
        if let Err(e) = self.append(session).await {
            if let Some(previous) = previous {
                table.apply(previous);
            }
            return Err(e);
        }
        Ok(())
    }

    async fn get(&self, user_id: &str, id: SessionId) -> Result<Option<GenerationSession>> {
        Ok(self.table.lock().await.get(user_id, id))
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<GenerationSession>> {
        Ok(self.table.lock().await.list(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shorui_core::SessionStatus;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[tokio::test]
    async fn test_ids_are_per_user_sequences() {
        let store = MemorySessionStore::new();
        let a1 = store.create("a", "t1", now()).await.unwrap();
        let a2 = store.create("a", "t2", now()).await.unwrap();
        let b1 = store.create("b", "t3", now()).await.unwrap();

        assert_eq!((a1.id, a2.id, b1.id), (1, 2, 1));
        assert_eq!(a1.status, SessionStatus::Requested);
    }

    #[tokio::test]
    async fn test_terminal_sessions_are_immutable() {
        let store = MemorySessionStore::new();
        let mut session = store.create("a", "t", now()).await.unwrap();

        session.status = SessionStatus::Parsing;
        store.update(&session).await.unwrap();
        session.status = SessionStatus::Failed;
        store.update(&session).await.unwrap();

        session.status = SessionStatus::Completed;
        let err = store.update(&session).await.unwrap_err();
        assert!(matches!(err, ShoruiError::InvalidTransition(_)));
        assert_eq!(
            store.get("a", session.id).await.unwrap().unwrap().status,
            SessionStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_update_unknown_session() {
        let store = MemorySessionStore::new();
        let ghost = GenerationSession::new(7, "a", "t", now());
        assert!(matches!(
            store.update(&ghost).await,
            Err(ShoruiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let store = MemorySessionStore::new();
        for topic in ["one", "two", "three"] {
            store.create("a", topic, now()).await.unwrap();
        }
        let topics: Vec<_> = store
            .list_for_user("a")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.topic)
            .collect();
        assert_eq!(topics, vec!["three", "two", "one"]);
        assert!(store.list_for_user("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_replays_latest_snapshot() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data").join("generation_sessions.jsonl");

        {
            let store = FileSessionStore::open(&path).await.unwrap();
            let mut s = store.create("a", "Report", now()).await.unwrap();
            s.status = SessionStatus::Parsing;
            store.update(&s).await.unwrap();
            s.status = SessionStatus::Completed;
            s.generated_file = Some("report.docx".to_string());
            store.update(&s).await.unwrap();
            store.create("a", "Second", now()).await.unwrap();
        }

        let store = FileSessionStore::open(&path).await.unwrap();
        let first = store.get("a", 1).await.unwrap().unwrap();
        assert_eq!(first.status, SessionStatus::Completed);
        assert_eq!(first.generated_file.as_deref(), Some("report.docx"));

        let next = store.create("a", "Third", now()).await.unwrap();
        assert_eq!(next.id, 3);

        let mut reopened_first = first.clone();
        reopened_first.status = SessionStatus::Failed;
        assert!(store.update(&reopened_first).await.is_err());
    }

    #[tokio::test]
    async fn test_file_store_skips_corrupt_lines() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sessions.jsonl");

        let good = serde_json::to_string(&GenerationSession::new(1, "a", "ok", now())).unwrap();
        std::fs::write(&path, format!("{}\nnot json\n\n", good)).unwrap();

        let store = FileSessionStore::open(&path).await.unwrap();
        assert_eq!(store.list_for_user("a").await.unwrap().len(), 1);
    }
}
