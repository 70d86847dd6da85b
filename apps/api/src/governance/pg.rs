use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::db::{classify_write_error, StoreError};
use crate::governance::store::{MasterPromptStore, PromoteOutcome, RejectOutcome};
use crate::models::master_prompt::{LearningSummary, MasterPromptVersion, VersionStatus};

const VERSION_COLUMNS: &str =
    "version_id, content, status, created_at, approved_at, approved_by, patterns_learned";

#[derive(Debug, FromRow)]
struct VersionRow {
    version_id: String,
    content: String,
    status: String,
    created_at: DateTime<Utc>,
    approved_at: Option<DateTime<Utc>>,
    approved_by: Option<String>,
    patterns_learned: Vec<String>,
}

impl TryFrom<VersionRow> for MasterPromptVersion {
    type Error = StoreError;

    fn try_from(row: VersionRow) -> Result<Self, Self::Error> {
        let status = VersionStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Corrupt(format!("version {} status '{}'", row.version_id, row.status))
        })?;
        Ok(MasterPromptVersion {
            version_id: row.version_id,
            content: row.content,
            status,
            created_at: row.created_at,
            approved_at: row.approved_at,
            approved_by: row.approved_by,
            patterns_learned: row.patterns_learned,
        })
    }
}

#[derive(Debug, FromRow)]
struct SummaryRow {
    id: Uuid,
    date: NaiveDate,
    summary_text: String,
    patterns_extracted: Vec<String>,
    daily_insight: String,
    tokens_used: i64,
    candidate_version_id: Option<String>,
    approved: bool,
    created_at: DateTime<Utc>,
}

impl From<SummaryRow> for LearningSummary {
    fn from(row: SummaryRow) -> Self {
        LearningSummary {
            id: row.id,
            date: row.date,
            summary_text: row.summary_text,
            patterns_extracted: row.patterns_extracted,
            daily_insight: row.daily_insight,
            tokens_used: row.tokens_used,
            candidate_version_id: row.candidate_version_id,
            approved: row.approved,
            created_at: row.created_at,
        }
    }
}

/// Postgres-backed master prompt ledger. Triage runs under a table lock so concurrent
/// approvals queue behind each other; the partial unique index on `status = 'active'`
/// backs the single-active invariant at the database level.
#[derive(Clone)]
pub struct PgMasterPromptStore {
    pool: PgPool,
}

impl PgMasterPromptStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn lock_for_triage(
    conn: &mut sqlx::PgConnection,
    version_id: &str,
) -> Result<Option<VersionStatus>, StoreError> {
    sqlx::query("LOCK TABLE master_prompt_versions IN SHARE ROW EXCLUSIVE MODE")
        .execute(&mut *conn)
        .await?;

    let status: Option<String> =
        sqlx::query_scalar("SELECT status FROM master_prompt_versions WHERE version_id = $1")
            .bind(version_id)
            .fetch_optional(&mut *conn)
            .await?;
    status
        .map(|s| {
            VersionStatus::parse(&s)
                .ok_or_else(|| StoreError::Corrupt(format!("version {version_id} status '{s}'")))
        })
        .transpose()
}

#[async_trait]
impl MasterPromptStore for PgMasterPromptStore {
    async fn list(&self) -> Result<Vec<MasterPromptVersion>, StoreError> {
        sqlx::query_as::<_, VersionRow>(&format!(
            "SELECT {VERSION_COLUMNS} FROM master_prompt_versions ORDER BY seq"
        ))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(MasterPromptVersion::try_from)
        .collect()
    }

    async fn get(&self, version_id: &str) -> Result<Option<MasterPromptVersion>, StoreError> {
        sqlx::query_as::<_, VersionRow>(&format!(
            "SELECT {VERSION_COLUMNS} FROM master_prompt_versions WHERE version_id = $1"
        ))
        .bind(version_id)
        .fetch_optional(&self.pool)
        .await?
        .map(MasterPromptVersion::try_from)
        .transpose()
    }

    async fn active(&self) -> Result<Vec<MasterPromptVersion>, StoreError> {
        sqlx::query_as::<_, VersionRow>(&format!(
            "SELECT {VERSION_COLUMNS} FROM master_prompt_versions WHERE status = 'active' ORDER BY seq"
        ))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(MasterPromptVersion::try_from)
        .collect()
    }

    async fn insert(&self, version: &MasterPromptVersion) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO master_prompt_versions
                (version_id, content, status, created_at, approved_at, approved_by, patterns_learned)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&version.version_id)
        .bind(&version.content)
        .bind(version.status.as_str())
        .bind(version.created_at)
        .bind(version.approved_at)
        .bind(&version.approved_by)
        .bind(&version.patterns_learned)
        .execute(&self.pool)
        .await
        .map_err(|e| classify_write_error(e, &format!("master prompt version {}", version.version_id)))?;
        Ok(())
    }

    async fn promote(
        &self,
        version_id: &str,
        approver: &str,
        at: DateTime<Utc>,
    ) -> Result<PromoteOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        match lock_for_triage(&mut tx, version_id).await? {
            None => return Ok(PromoteOutcome::Missing),
            Some(VersionStatus::Pending) => {}
            Some(status) => return Ok(PromoteOutcome::NotPending(status)),
        }

        let archived: Option<String> = sqlx::query_scalar(
            "UPDATE master_prompt_versions SET status = 'archived' WHERE status = 'active' RETURNING version_id",
        )
        .fetch_optional(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, VersionRow>(&format!(
            r#"
            UPDATE master_prompt_versions
            SET status = 'active', approved_at = $2, approved_by = $3
            WHERE version_id = $1
            RETURNING {VERSION_COLUMNS}
            "#
        ))
        .bind(version_id)
        .bind(at)
        .bind(approver)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE learning_summaries SET approved = TRUE WHERE candidate_version_id = $1")
            .bind(version_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(PromoteOutcome::Promoted {
            version: row.try_into()?,
            archived,
        })
    }

    async fn reject(
        &self,
        version_id: &str,
        approver: &str,
        at: DateTime<Utc>,
    ) -> Result<RejectOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        match lock_for_triage(&mut tx, version_id).await? {
            None => return Ok(RejectOutcome::Missing),
            Some(VersionStatus::Pending) => {}
            Some(status) => return Ok(RejectOutcome::NotPending(status)),
        }

        let row = sqlx::query_as::<_, VersionRow>(&format!(
            r#"
            UPDATE master_prompt_versions
            SET status = 'rejected', approved_at = $2, approved_by = $3
            WHERE version_id = $1
            RETURNING {VERSION_COLUMNS}
            "#
        ))
        .bind(version_id)
        .bind(at)
        .bind(approver)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(RejectOutcome::Rejected(row.try_into()?))
    }

    async fn insert_summary(&self, summary: &LearningSummary) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO learning_summaries
                (id, date, summary_text, patterns_extracted, daily_insight, tokens_used,
                 candidate_version_id, approved, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(summary.id)
        .bind(summary.date)
        .bind(&summary.summary_text)
        .bind(&summary.patterns_extracted)
        .bind(&summary.daily_insight)
        .bind(summary.tokens_used)
        .bind(&summary.candidate_version_id)
        .bind(summary.approved)
        .bind(summary.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| classify_write_error(e, &format!("learning summary {}", summary.id)))?;
        Ok(())
    }

    async fn summaries(&self) -> Result<Vec<LearningSummary>, StoreError> {
        Ok(sqlx::query_as::<_, SummaryRow>(
            "SELECT * FROM learning_summaries ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(LearningSummary::from)
        .collect())
    }
}
