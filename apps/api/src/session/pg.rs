use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::db::{classify_write_error, StoreError};
use crate::models::session::{AgentArtifact, AgentSession, ConceptCard, FinalizedSession, Stage};
use crate::session::store::SessionStore;

#[derive(Debug, FromRow)]
struct SessionRow {
    id: Uuid,
    account_id: Uuid,
    pinned_master_prompt_version: String,
    template_id: Option<String>,
    stage: String,
    intent_text: String,
    clarifying_questions: Json<Vec<String>>,
    answers: Json<Vec<String>>,
    concepts: Json<Vec<ConceptCard>>,
    tokens_spent_total: i64,
    revision: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for AgentSession {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let stage = Stage::parse(&row.stage)
            .ok_or_else(|| StoreError::Corrupt(format!("session {} stage '{}'", row.id, row.stage)))?;
        Ok(AgentSession {
            id: row.id,
            account_id: row.account_id,
            pinned_master_prompt_version: row.pinned_master_prompt_version,
            template_id: row.template_id,
            stage,
            intent_text: row.intent_text,
            clarifying_questions: row.clarifying_questions.0,
            answers: row.answers.0,
            concepts: row.concepts.0,
            tokens_spent_total: row.tokens_spent_total,
            revision: row.revision,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ArtifactRow {
    session_id: Uuid,
    account_id: Uuid,
    base_prompt_markdown: String,
    summary: String,
    v9_prompt_markdown: Option<String>,
    tokens_used_base: i64,
    tokens_used_v9: i64,
    share_token: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<ArtifactRow> for AgentArtifact {
    fn from(row: ArtifactRow) -> Self {
        AgentArtifact {
            session_id: row.session_id,
            account_id: row.account_id,
            base_prompt_markdown: row.base_prompt_markdown,
            summary: row.summary,
            v9_prompt_markdown: row.v9_prompt_markdown,
            tokens_used_base: row.tokens_used_base,
            tokens_used_v9: row.tokens_used_v9,
            share_token: row.share_token,
            created_at: row.created_at,
        }
    }
}

#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn write_session(
    conn: &mut sqlx::PgConnection,
    session: &AgentSession,
    expected_revision: i64,
) -> Result<(), StoreError> {
    let updated = sqlx::query(
        r#"
        UPDATE agent_sessions
        SET stage = $2, clarifying_questions = $3, answers = $4, concepts = $5,
            tokens_spent_total = $6, revision = $7, updated_at = $8
        WHERE id = $1 AND revision = $9
        "#,
    )
    .bind(session.id)
    .bind(session.stage.as_str())
    .bind(Json(&session.clarifying_questions))
    .bind(Json(&session.answers))
    .bind(Json(&session.concepts))
    .bind(session.tokens_spent_total)
    .bind(session.revision)
    .bind(session.updated_at)
    .bind(expected_revision)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if updated == 0 {
        return Err(StoreError::Conflict(format!(
            "session {} is no longer at revision {expected_revision}",
            session.id
        )));
    }
    Ok(())
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn insert_session(&self, session: &AgentSession) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO agent_sessions
                (id, account_id, pinned_master_prompt_version, template_id, stage, intent_text,
                 clarifying_questions, answers, concepts, tokens_spent_total, revision,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(session.id)
        .bind(session.account_id)
        .bind(&session.pinned_master_prompt_version)
        .bind(&session.template_id)
        .bind(session.stage.as_str())
        .bind(&session.intent_text)
        .bind(Json(&session.clarifying_questions))
        .bind(Json(&session.answers))
        .bind(Json(&session.concepts))
        .bind(session.tokens_spent_total)
        .bind(session.revision)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| classify_write_error(e, &format!("session {}", session.id)))?;
        Ok(())
    }

    async fn session(&self, session_id: Uuid) -> Result<Option<AgentSession>, StoreError> {
        sqlx::query_as::<_, SessionRow>("SELECT * FROM agent_sessions WHERE id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?
            .map(AgentSession::try_from)
            .transpose()
    }

    async fn sessions_for_account(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<AgentSession>, StoreError> {
        sqlx::query_as::<_, SessionRow>(
            "SELECT * FROM agent_sessions WHERE account_id = $1 ORDER BY created_at DESC",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(AgentSession::try_from)
        .collect()
    }

    async fn update_session(
        &self,
        session: &AgentSession,
        expected_revision: i64,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        write_session(&mut conn, session, expected_revision).await
    }

    async fn finalize_session(
        &self,
        session: &AgentSession,
        expected_revision: i64,
        artifact: &AgentArtifact,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        write_session(&mut tx, session, expected_revision).await?;

        sqlx::query(
            r#"
            INSERT INTO agent_artifacts
                (session_id, account_id, base_prompt_markdown, summary, v9_prompt_markdown,
                 tokens_used_base, tokens_used_v9, share_token, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(artifact.session_id)
        .bind(artifact.account_id)
        .bind(&artifact.base_prompt_markdown)
        .bind(&artifact.summary)
        .bind(&artifact.v9_prompt_markdown)
        .bind(artifact.tokens_used_base)
        .bind(artifact.tokens_used_v9)
        .bind(&artifact.share_token)
        .bind(artifact.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| classify_write_error(e, &format!("artifact for session {}", session.id)))?;

        tx.commit().await?;
        Ok(())
    }

    async fn artifact(&self, session_id: Uuid) -> Result<Option<AgentArtifact>, StoreError> {
        Ok(
            sqlx::query_as::<_, ArtifactRow>("SELECT * FROM agent_artifacts WHERE session_id = $1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?
                .map(AgentArtifact::from),
        )
    }

    async fn store_v9(
        &self,
        session_id: Uuid,
        markdown: &str,
        tokens_used: i64,
    ) -> Result<Option<AgentArtifact>, StoreError> {
        Ok(sqlx::query_as::<_, ArtifactRow>(
            r#"
            UPDATE agent_artifacts
            SET v9_prompt_markdown = $2, tokens_used_v9 = $3
            WHERE session_id = $1 AND v9_prompt_markdown IS NULL
            RETURNING *
            "#,
        )
        .bind(session_id)
        .bind(markdown)
        .bind(tokens_used)
        .fetch_optional(&self.pool)
        .await?
        .map(AgentArtifact::from))
    }

    async fn set_share_token(
        &self,
        session_id: Uuid,
        token: Option<&str>,
    ) -> Result<Option<AgentArtifact>, StoreError> {
        Ok(sqlx::query_as::<_, ArtifactRow>(
            "UPDATE agent_artifacts SET share_token = $2 WHERE session_id = $1 RETURNING *",
        )
        .bind(session_id)
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify_write_error(e, "share token"))?
        .map(AgentArtifact::from))
    }

    async fn artifact_by_share_token(
        &self,
        token: &str,
    ) -> Result<Option<AgentArtifact>, StoreError> {
        Ok(
            sqlx::query_as::<_, ArtifactRow>("SELECT * FROM agent_artifacts WHERE share_token = $1")
                .bind(token)
                .fetch_optional(&self.pool)
                .await?
                .map(AgentArtifact::from),
        )
    }

    async fn finalized_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<FinalizedSession>, StoreError> {
        let artifacts: Vec<AgentArtifact> = sqlx::query_as::<_, ArtifactRow>(
            "SELECT * FROM agent_artifacts WHERE created_at >= $1 ORDER BY created_at",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(AgentArtifact::from)
        .collect();
        if artifacts.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = artifacts.iter().map(|a| a.session_id).collect();
        let mut sessions = std::collections::HashMap::new();
        for row in sqlx::query_as::<_, SessionRow>("SELECT * FROM agent_sessions WHERE id = ANY($1)")
            .bind(&ids)
            .fetch_all(&self.pool)
            .await?
        {
            let session = AgentSession::try_from(row)?;
            sessions.insert(session.id, session);
        }

        Ok(artifacts
            .into_iter()
            .filter_map(|artifact| {
                sessions
                    .remove(&artifact.session_id)
                    .map(|session| FinalizedSession { session, artifact })
            })
            .collect())
    }
}
