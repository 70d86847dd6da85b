use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::db::StoreError;
use crate::models::session::{AgentArtifact, AgentSession, FinalizedSession};

/// Persistence for authoring sessions and their artifacts.
///
/// Session writes are compare-and-swap on `revision`: a write whose expected revision
/// no longer matches the stored one fails with `StoreError::Conflict` and changes nothing.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: &AgentSession) -> Result<(), StoreError>;

    async fn session(&self, session_id: Uuid) -> Result<Option<AgentSession>, StoreError>;

    /// Newest first.
    async fn sessions_for_account(&self, account_id: Uuid)
        -> Result<Vec<AgentSession>, StoreError>;

    async fn update_session(
        &self,
        session: &AgentSession,
        expected_revision: i64,
    ) -> Result<(), StoreError>;

    /// Writes the finalized session and its artifact as one unit.
    async fn finalize_session(
        &self,
        session: &AgentSession,
        expected_revision: i64,
        artifact: &AgentArtifact,
    ) -> Result<(), StoreError>;

    async fn artifact(&self, session_id: Uuid) -> Result<Option<AgentArtifact>, StoreError>;

    /// Sets the v9 rendition only if none is stored yet. Returns the updated artifact, or
    /// `None` when nothing was written.
    async fn store_v9(
        &self,
        session_id: Uuid,
        markdown: &str,
        tokens_used: i64,
    ) -> Result<Option<AgentArtifact>, StoreError>;

    /// Returns `None` if the artifact does not exist.
    async fn set_share_token(
        &self,
        session_id: Uuid,
        token: Option<&str>,
    ) -> Result<Option<AgentArtifact>, StoreError>;

    async fn artifact_by_share_token(&self, token: &str)
        -> Result<Option<AgentArtifact>, StoreError>;

    /// Sessions whose artifact was created at or after `since`.
    async fn finalized_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<FinalizedSession>, StoreError>;
}

#[derive(Default)]
struct SessionState {
    sessions: HashMap<Uuid, AgentSession>,
    artifacts: HashMap<Uuid, AgentArtifact>,
}

impl SessionState {
    fn check_revision(&self, session_id: Uuid, expected: i64) -> Result<(), StoreError> {
        match self.sessions.get(&session_id) {
            Some(stored) if stored.revision == expected => Ok(()),
            Some(stored) => Err(StoreError::Conflict(format!(
                "session {session_id} is at revision {}, expected {expected}",
                stored.revision
            ))),
            None => Err(StoreError::Conflict(format!("session {session_id} does not exist"))),
        }
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    state: Mutex<SessionState>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert_session(&self, session: &AgentSession) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if state.sessions.contains_key(&session.id) {
            return Err(StoreError::Conflict(format!("session {}", session.id)));
        }
        state.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn session(&self, session_id: Uuid) -> Result<Option<AgentSession>, StoreError> {
        Ok(self.state.lock().sessions.get(&session_id).cloned())
    }

    async fn sessions_for_account(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<AgentSession>, StoreError> {
        let mut sessions: Vec<AgentSession> = self
            .state
            .lock()
            .sessions
            .values()
            .filter(|s| s.account_id == account_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn update_session(
        &self,
        session: &AgentSession,
        expected_revision: i64,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.check_revision(session.id, expected_revision)?;
        state.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn finalize_session(
        &self,
        session: &AgentSession,
        expected_revision: i64,
        artifact: &AgentArtifact,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.check_revision(session.id, expected_revision)?;
        if state.artifacts.contains_key(&session.id) {
            return Err(StoreError::Conflict(format!(
                "artifact for session {}",
                session.id
            )));
        }
        state.sessions.insert(session.id, session.clone());
        state.artifacts.insert(session.id, artifact.clone());
        Ok(())
    }

    async fn artifact(&self, session_id: Uuid) -> Result<Option<AgentArtifact>, StoreError> {
        Ok(self.state.lock().artifacts.get(&session_id).cloned())
    }

    async fn store_v9(
        &self,
        session_id: Uuid,
        markdown: &str,
        tokens_used: i64,
    ) -> Result<Option<AgentArtifact>, StoreError> {
        let mut state = self.state.lock();
        let Some(artifact) = state.artifacts.get_mut(&session_id) else {
            return Ok(None);
        };
        if artifact.v9_prompt_markdown.is_some() {
            return Ok(None);
        }
        artifact.v9_prompt_markdown = Some(markdown.to_string());
        artifact.tokens_used_v9 = tokens_used;
        Ok(Some(artifact.clone()))
    }

    async fn set_share_token(
        &self,
        session_id: Uuid,
        token: Option<&str>,
    ) -> Result<Option<AgentArtifact>, StoreError> {
        let mut state = self.state.lock();
        let Some(artifact) = state.artifacts.get_mut(&session_id) else {
            return Ok(None);
        };
        artifact.share_token = token.map(str::to_string);
        Ok(Some(artifact.clone()))
    }

    async fn artifact_by_share_token(
        &self,
        token: &str,
    ) -> Result<Option<AgentArtifact>, StoreError> {
        Ok(self
            .state
            .lock()
            .artifacts
            .values()
            .find(|a| a.share_token.as_deref() == Some(token))
            .cloned())
    }

    async fn finalized_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<FinalizedSession>, StoreError> {
        let state = self.state.lock();
        let mut finalized: Vec<FinalizedSession> = state
            .artifacts
            .values()
            .filter(|a| a.created_at >= since)
            .filter_map(|artifact| {
                state
                    .sessions
                    .get(&artifact.session_id)
                    .map(|session| FinalizedSession {
                        session: session.clone(),
                        artifact: artifact.clone(),
                    })
            })
            .collect();
        finalized.sort_by(|a, b| a.artifact.created_at.cmp(&b.artifact.created_at));
        Ok(finalized)
    }
}
