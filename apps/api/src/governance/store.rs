use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};

use crate::db::StoreError;
use crate::models::master_prompt::{LearningSummary, MasterPromptVersion, VersionStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum PromoteOutcome {
    Promoted {
        version: MasterPromptVersion,
        archived: Option<String>,
    },
    Missing,
    NotPending(VersionStatus),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RejectOutcome {
    Rejected(MasterPromptVersion),
    Missing,
    NotPending(VersionStatus),
}

/// Persistence for the master-prompt ledger and the learning summaries that feed it.
/// Versions are never deleted.
#[async_trait]
pub trait MasterPromptStore: Send + Sync {
    /// Creation order, oldest first.
    async fn list(&self) -> Result<Vec<MasterPromptVersion>, StoreError>;

    async fn get(&self, version_id: &str) -> Result<Option<MasterPromptVersion>, StoreError>;

    /// Every version currently marked active. More than one is an invariant violation
    /// the caller must surface, so the store reports what it has instead of picking one.
    async fn active(&self) -> Result<Vec<MasterPromptVersion>, StoreError>;

    /// Fails with `Conflict` if the version id already exists.
    async fn insert(&self, version: &MasterPromptVersion) -> Result<(), StoreError>;

    /// Atomically archives the current active version, activates `version_id` and flags
    /// the learning summary that proposed it. Either all of it happens or none of it.
    async fn promote(
        &self,
        version_id: &str,
        approver: &str,
        at: DateTime<Utc>,
    ) -> Result<PromoteOutcome, StoreError>;

    async fn reject(
        &self,
        version_id: &str,
        approver: &str,
        at: DateTime<Utc>,
    ) -> Result<RejectOutcome, StoreError>;

    async fn insert_summary(&self, summary: &LearningSummary) -> Result<(), StoreError>;

    /// Newest first.
    async fn summaries(&self) -> Result<Vec<LearningSummary>, StoreError>;
}

#[derive(Default, Clone)]
struct LedgerState {
    versions: Vec<MasterPromptVersion>,
    summaries: Vec<LearningSummary>,
}

/// In-process store. Promotion works on a copy that replaces the live state only once
/// every write has succeeded.
#[derive(Default)]
pub struct MemoryMasterPromptStore {
    state: Mutex<LedgerState>,
    #[cfg(test)]
    fail_after_demote: AtomicBool,
}

impl MemoryMasterPromptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next promotion fail between the demote and promote writes.
    #[cfg(test)]
    pub fn inject_promote_crash(&self) {
        self.fail_after_demote.store(true, Ordering::SeqCst);
    }

    /// Writes a version as-is, bypassing the ledger's checks.
    #[cfg(test)]
    pub fn force_insert(&self, version: MasterPromptVersion) {
        self.state.lock().versions.push(version);
    }

    #[cfg(test)]
    pub fn force_status(&self, version_id: &str, status: VersionStatus) {
        for version in self
            .state
            .lock()
            .versions
            .iter_mut()
            .filter(|v| v.version_id == version_id)
        {
            version.status = status;
        }
    }

    #[cfg(test)]
    fn crash_point(&self) -> Result<(), StoreError> {
        if self.fail_after_demote.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Conflict("simulated crash during promotion".to_string()));
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn crash_point(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl MasterPromptStore for MemoryMasterPromptStore {
    async fn list(&self) -> Result<Vec<MasterPromptVersion>, StoreError> {
        Ok(self.state.lock().versions.clone())
    }

    async fn get(&self, version_id: &str) -> Result<Option<MasterPromptVersion>, StoreError> {
        Ok(self
            .state
            .lock()
            .versions
            .iter()
            .find(|v| v.version_id == version_id)
            .cloned())
    }

    async fn active(&self) -> Result<Vec<MasterPromptVersion>, StoreError> {
        Ok(self
            .state
            .lock()
            .versions
            .iter()
            .filter(|v| v.status == VersionStatus::Active)
            .cloned()
            .collect())
    }

    async fn insert(&self, version: &MasterPromptVersion) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if state
            .versions
            .iter()
            .any(|v| v.version_id == version.version_id)
        {
            return Err(StoreError::Conflict(format!(
                "master prompt version {}",
                version.version_id
            )));
        }
        state.versions.push(version.clone());
        Ok(())
    }

    async fn promote(
        &self,
        version_id: &str,
        approver: &str,
        at: DateTime<Utc>,
    ) -> Result<PromoteOutcome, StoreError> {
        let mut live = self.state.lock();
        let Some(target) = live.versions.iter().position(|v| v.version_id == version_id) else {
            return Ok(PromoteOutcome::Missing);
        };
        let status = live.versions[target].status;
        if status != VersionStatus::Pending {
            return Ok(PromoteOutcome::NotPending(status));
        }

        let mut next = (*live).clone();
        let mut archived = None;
        for version in next
            .versions
            .iter_mut()
            .filter(|v| v.status == VersionStatus::Active)
        {
            version.status = VersionStatus::Archived;
            archived = Some(version.version_id.clone());
        }

        self.crash_point()?;

        let promoted = &mut next.versions[target];
        promoted.status = VersionStatus::Active;
        promoted.approved_at = Some(at);
        promoted.approved_by = Some(approver.to_string());
        let promoted = promoted.clone();

        for summary in next
            .summaries
            .iter_mut()
            .filter(|s| s.candidate_version_id.as_deref() == Some(version_id))
        {
            summary.approved = true;
        }

        *live = next;
        Ok(PromoteOutcome::Promoted {
            version: promoted,
            archived,
        })
    }

    async fn reject(
        &self,
        version_id: &str,
        approver: &str,
        at: DateTime<Utc>,
    ) -> Result<RejectOutcome, StoreError> {
        let mut state = self.state.lock();
        let Some(version) = state
            .versions
            .iter_mut()
            .find(|v| v.version_id == version_id)
        else {
            return Ok(RejectOutcome::Missing);
        };
        if version.status != VersionStatus::Pending {
            return Ok(RejectOutcome::NotPending(version.status));
        }
        version.status = VersionStatus::Rejected;
        version.approved_at = Some(at);
        version.approved_by = Some(approver.to_string());
        Ok(RejectOutcome::Rejected(version.clone()))
    }

    async fn insert_summary(&self, summary: &LearningSummary) -> Result<(), StoreError> {
        self.state.lock().summaries.push(summary.clone());
        Ok(())
    }

    async fn summaries(&self) -> Result<Vec<LearningSummary>, StoreError> {
        Ok(self.state.lock().summaries.iter().rev().cloned().collect())
    }
}
