use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::db::StoreError;
use crate::errors::ErrorKind;
use crate::governance::diff::VersionDiff;
use crate::governance::store::{MasterPromptStore, PromoteOutcome, RejectOutcome};
use crate::models::master_prompt::{LearningSummary, MasterPromptVersion, VersionStatus};

pub const BASELINE_VERSION: &str = "Ω_v1.0";
const VERSION_PREFIX: &str = "Ω";
const SYSTEM_APPROVER: &str = "system";
const PROPOSE_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum GovernanceError {
    #[error("no active master prompt version")]
    NoActiveVersion,

    #[error("master prompt version {0} not found")]
    VersionNotFound(String),

    #[error("version {version_id} is {} and cannot be triaged", .status.as_str())]
    NotPending {
        version_id: String,
        status: VersionStatus,
    },

    #[error("invalid candidate: {0}")]
    InvalidCandidate(String),

    #[error("an operator id is required")]
    MissingOperator,

    #[error("expected exactly one active master prompt version, found {active_count}")]
    InvariantViolation { active_count: usize },

    #[error("approvals are halted until the ledger is reconciled")]
    ApprovalsHalted,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GovernanceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GovernanceError::VersionNotFound(_) => ErrorKind::NotFound,
            GovernanceError::NotPending { .. } => ErrorKind::State,
            GovernanceError::InvalidCandidate(_) | GovernanceError::MissingOperator => {
                ErrorKind::Validation
            }
            GovernanceError::NoActiveVersion
            | GovernanceError::InvariantViolation { .. }
            | GovernanceError::ApprovalsHalted => ErrorKind::Invariant,
            GovernanceError::Store(_) => ErrorKind::Internal,
        }
    }
}

/// Versioned master prompts with exactly one `Active` version.
///
/// Promotion is delegated to the store as a single atomic unit. The ledger re-reads the
/// active set after every triage and, if the invariant is broken, refuses further
/// approvals until an operator reconciles. It never guesses which active version is right.
#[derive(Clone)]
pub struct MasterPromptLedger {
    store: Arc<dyn MasterPromptStore>,
    approvals_halted: Arc<AtomicBool>,
}

impl MasterPromptLedger {
    pub fn new(store: Arc<dyn MasterPromptStore>) -> Self {
        Self {
            store,
            approvals_halted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Seeds the baseline version as active when the ledger is empty. Returns the version
    /// it created, if any.
    pub async fn bootstrap(
        &self,
        content: &str,
    ) -> Result<Option<MasterPromptVersion>, GovernanceError> {
        if !self.store.list().await?.is_empty() {
            return Ok(None);
        }

        let now = Utc::now();
        let baseline = MasterPromptVersion {
            version_id: BASELINE_VERSION.to_string(),
            content: content.to_string(),
            status: VersionStatus::Active,
            created_at: now,
            approved_at: Some(now),
            approved_by: Some(SYSTEM_APPROVER.to_string()),
            patterns_learned: vec!["Initial baseline prompt".to_string()],
        };
        match self.store.insert(&baseline).await {
            Ok(()) => {
                info!("Initialized master prompt {BASELINE_VERSION}");
                Ok(Some(baseline))
            }
            // Another instance seeded it first.
            Err(StoreError::Conflict(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn active(&self) -> Result<MasterPromptVersion, GovernanceError> {
        let mut active = self.store.active().await?;
        match active.len() {
            0 => {
                error!(alert = "invariant_violation", "No active master prompt version");
                Err(GovernanceError::NoActiveVersion)
            }
            1 => Ok(active.remove(0)),
            n => Err(self.halt(n)),
        }
    }

    pub async fn version(&self, version_id: &str) -> Result<MasterPromptVersion, GovernanceError> {
        self.store
            .get(version_id)
            .await?
            .ok_or_else(|| GovernanceError::VersionNotFound(version_id.to_string()))
    }

    /// Creation order, oldest first.
    pub async fn list_versions(&self) -> Result<Vec<MasterPromptVersion>, GovernanceError> {
        Ok(self.store.list().await?)
    }

    /// Stores a machine-proposed candidate as `Pending` and returns its assigned id.
    pub async fn propose_candidate(
        &self,
        content: &str,
        patterns_learned: Vec<String>,
    ) -> Result<String, GovernanceError> {
        if content.trim().is_empty() {
            return Err(GovernanceError::InvalidCandidate(
                "candidate content is empty".to_string(),
            ));
        }

        for _ in 0..PROPOSE_ATTEMPTS {
            let versions = self.store.list().await?;
            let version_id = next_version_id(
                versions.last().map(|v| v.version_id.as_str()),
                versions.len(),
            );
            let candidate = MasterPromptVersion {
                version_id: version_id.clone(),
                content: content.to_string(),
                status: VersionStatus::Pending,
                created_at: Utc::now(),
                approved_at: None,
                approved_by: None,
                patterns_learned: patterns_learned.clone(),
            };
            match self.store.insert(&candidate).await {
                Ok(()) => {
                    info!("Proposed master prompt candidate {version_id}");
                    return Ok(version_id);
                }
                Err(StoreError::Conflict(_)) => {
                    warn!("Version id {version_id} taken concurrently, reassigning");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::Conflict("could not assign a master prompt version id".to_string()).into())
    }

    pub async fn record_summary(&self, summary: &LearningSummary) -> Result<(), GovernanceError> {
        Ok(self.store.insert_summary(summary).await?)
    }

    /// Newest first.
    pub async fn learning_summaries(&self) -> Result<Vec<LearningSummary>, GovernanceError> {
        Ok(self.store.summaries().await?)
    }

    /// Line diff of the current active version against `version_id`. Read-only.
    pub async fn diff(&self, version_id: &str) -> Result<VersionDiff, GovernanceError> {
        let candidate = self.version(version_id).await?;
        let active = self.active().await?;
        Ok(VersionDiff::between(
            &active.version_id,
            &active.content,
            &candidate.version_id,
            &candidate.content,
        ))
    }

    /// Promotes a pending candidate and archives the previous active version atomically.
    pub async fn approve(
        &self,
        version_id: &str,
        approver_id: &str,
    ) -> Result<MasterPromptVersion, GovernanceError> {
        if self.approvals_halted() {
            return Err(GovernanceError::ApprovalsHalted);
        }
        require_operator(approver_id)?;

        // Promote archives whatever is active, so it must not run over a broken ledger.
        self.verify_single_active().await?;

        let version = match self
            .store
            .promote(version_id, approver_id, Utc::now())
            .await?
        {
            PromoteOutcome::Promoted { version, archived } => {
                info!(
                    "Master prompt {version_id} approved by {approver_id}; archived {}",
                    archived.as_deref().unwrap_or("nothing")
                );
                version
            }
            PromoteOutcome::Missing => {
                return Err(GovernanceError::VersionNotFound(version_id.to_string()))
            }
            PromoteOutcome::NotPending(status) => {
                return Err(GovernanceError::NotPending {
                    version_id: version_id.to_string(),
                    status,
                })
            }
        };

        self.verify_single_active().await?;
        Ok(version)
    }

    /// Terminal. Does not touch the active version.
    pub async fn reject(
        &self,
        version_id: &str,
        approver_id: &str,
    ) -> Result<MasterPromptVersion, GovernanceError> {
        require_operator(approver_id)?;

        let version = match self.store.reject(version_id, approver_id, Utc::now()).await? {
            RejectOutcome::Rejected(version) => {
                info!("Master prompt {version_id} rejected by {approver_id}");
                version
            }
            RejectOutcome::Missing => {
                return Err(GovernanceError::VersionNotFound(version_id.to_string()))
            }
            RejectOutcome::NotPending(status) => {
                return Err(GovernanceError::NotPending {
                    version_id: version_id.to_string(),
                    status,
                })
            }
        };

        self.verify_single_active().await?;
        Ok(version)
    }

    /// Re-enables approvals once the store again holds exactly one active version.
    /// The repair itself is manual; this only confirms it.
    pub async fn reconcile(
        &self,
        operator_id: &str,
    ) -> Result<MasterPromptVersion, GovernanceError> {
        require_operator(operator_id)?;

        let mut active = self.store.active().await?;
        if active.len() != 1 {
            let active_count = active.len();
            self.approvals_halted.store(true, Ordering::SeqCst);
            error!(
                alert = "invariant_violation",
                active_count, operator_id, "Reconciliation refused, ledger still inconsistent"
            );
            return Err(GovernanceError::InvariantViolation { active_count });
        }

        if self.approvals_halted.swap(false, Ordering::SeqCst) {
            info!("Approvals re-enabled by {operator_id}");
        }
        Ok(active.remove(0))
    }

    pub fn approvals_halted(&self) -> bool {
        self.approvals_halted.load(Ordering::SeqCst)
    }

    async fn verify_single_active(&self) -> Result<(), GovernanceError> {
        let active_count = self.store.active().await?.len();
        if active_count == 1 {
            return Ok(());
        }
        Err(self.halt(active_count))
    }

    fn halt(&self, active_count: usize) -> GovernanceError {
        self.approvals_halted.store(true, Ordering::SeqCst);
        error!(
            alert = "invariant_violation",
            active_count, "Master prompt ledger inconsistent, approvals halted"
        );
        GovernanceError::InvariantViolation { active_count }
    }
}

fn require_operator(operator_id: &str) -> Result<(), GovernanceError> {
    if operator_id.trim().is_empty() {
        return Err(GovernanceError::MissingOperator);
    }
    Ok(())
}

/// `Ω_v{major}.{minor}` with the minor bumped from the newest version.
pub fn next_version_id(latest: Option<&str>, existing: usize) -> String {
    let Some(latest) = latest else {
        return BASELINE_VERSION.to_string();
    };
    let parsed = latest.rsplit_once("_v").and_then(|(base, number)| {
        let (major, minor) = number.split_once('.')?;
        Some((base, major.parse::<u32>().ok()?, minor.parse::<u32>().ok()?))
    });
    match parsed {
        Some((base, major, minor)) => format!("{base}_v{major}.{}", minor + 1),
        None => format!("{VERSION_PREFIX}_v1.{existing}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::store::MemoryMasterPromptStore;

    async fn seeded() -> (MasterPromptLedger, Arc<MemoryMasterPromptStore>) {
        let store = Arc::new(MemoryMasterPromptStore::new());
        let ledger = MasterPromptLedger::new(store.clone());
        ledger.bootstrap("ROLE: architect\nETHICS: strict").await.unwrap();
        (ledger, store)
    }

    fn active_count(versions: &[MasterPromptVersion]) -> usize {
        versions
            .iter()
            .filter(|v| v.status == VersionStatus::Active)
            .count()
    }

    #[test]
    fn test_next_version_id_bumps_minor() {
        assert_eq!(next_version_id(None, 0), "Ω_v1.0");
        assert_eq!(next_version_id(Some("Ω_v1.0"), 1), "Ω_v1.1");
        assert_eq!(next_version_id(Some("Ω_v2.9"), 14), "Ω_v2.10");
        assert_eq!(next_version_id(Some("legacy"), 4), "Ω_v1.4");
    }

    #[tokio::test]
    async fn test_bootstrap_only_seeds_empty_ledger() {
        let (ledger, _) = seeded().await;

        assert!(ledger.bootstrap("other").await.unwrap().is_none());

        let active = ledger.active().await.unwrap();
        assert_eq!(active.version_id, BASELINE_VERSION);
        assert_eq!(active.approved_by.as_deref(), Some("system"));
        assert_eq!(ledger.list_versions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_candidates_get_monotonic_ids() {
        let (ledger, _) = seeded().await;

        let first = ledger.propose_candidate("a", vec![]).await.unwrap();
        let second = ledger.propose_candidate("b", vec![]).await.unwrap();

        assert_eq!(first, "Ω_v1.1");
        assert_eq!(second, "Ω_v1.2");
        assert_eq!(
            ledger.version(&second).await.unwrap().status,
            VersionStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_empty_candidate_is_refused() {
        let (ledger, _) = seeded().await;
        assert!(matches!(
            ledger.propose_candidate("  \n", vec![]).await,
            Err(GovernanceError::InvalidCandidate(_))
        ));
    }

    #[tokio::test]
    async fn test_approve_archives_previous_active() {
        let (ledger, _) = seeded().await;
        let candidate = ledger
            .propose_candidate("ROLE: architect v2", vec!["p".to_string()])
            .await
            .unwrap();

        let approved = ledger.approve(&candidate, "admin-1").await.unwrap();

        assert_eq!(approved.status, VersionStatus::Active);
        assert_eq!(approved.approved_by.as_deref(), Some("admin-1"));
        assert_eq!(
            ledger.version(BASELINE_VERSION).await.unwrap().status,
            VersionStatus::Archived
        );
        assert_eq!(active_count(&ledger.list_versions().await.unwrap()), 1);
    }

    #[tokio::test]
    async fn test_triage_requires_pending_status() {
        let (ledger, _) = seeded().await;
        let candidate = ledger.propose_candidate("next", vec![]).await.unwrap();
        ledger.approve(&candidate, "admin").await.unwrap();

        let err = ledger.approve(BASELINE_VERSION, "admin").await.unwrap_err();
        assert!(matches!(
            err,
            GovernanceError::NotPending {
                status: VersionStatus::Archived,
                ..
            }
        ));
        assert!(matches!(
            ledger.reject(&candidate, "admin").await,
            Err(GovernanceError::NotPending {
                status: VersionStatus::Active,
                ..
            })
        ));
        assert!(matches!(
            ledger.approve("Ω_v9.9", "admin").await,
            Err(GovernanceError::VersionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_triage_requires_operator() {
        let (ledger, _) = seeded().await;
        let candidate = ledger.propose_candidate("next", vec![]).await.unwrap();
        assert!(matches!(
            ledger.approve(&candidate, " ").await,
            Err(GovernanceError::MissingOperator)
        ));
    }

    #[tokio::test]
    async fn test_reject_is_terminal_and_keeps_active() {
        let (ledger, _) = seeded().await;
        let candidate = ledger.propose_candidate("next", vec![]).await.unwrap();

        let rejected = ledger.reject(&candidate, "admin").await.unwrap();

        assert_eq!(rejected.status, VersionStatus::Rejected);
        assert_eq!(ledger.active().await.unwrap().version_id, BASELINE_VERSION);
        assert!(matches!(
            ledger.approve(&candidate, "admin").await,
            Err(GovernanceError::NotPending { .. })
        ));
    }

    #[tokio::test]
    async fn test_crash_during_promotion_leaves_previous_active() {
        let (ledger, store) = seeded().await;
        let candidate = ledger.propose_candidate("next", vec![]).await.unwrap();
        store.inject_promote_crash();

        assert!(matches!(
            ledger.approve(&candidate, "admin").await,
            Err(GovernanceError::Store(_))
        ));

        let versions = ledger.list_versions().await.unwrap();
        assert_eq!(active_count(&versions), 1);
        assert_eq!(ledger.active().await.unwrap().version_id, BASELINE_VERSION);
        assert_eq!(
            ledger.version(&candidate).await.unwrap().status,
            VersionStatus::Pending
        );

        // The candidate is still approvable once the fault is gone.
        ledger.approve(&candidate, "admin").await.unwrap();
        assert_eq!(ledger.active().await.unwrap().version_id, candidate);
    }

    #[tokio::test]
    async fn test_diff_is_unaffected_by_unrelated_reject() {
        let (ledger, _) = seeded().await;
        let target = ledger
            .propose_candidate("ROLE: architect\nETHICS: strict\nMEMORY: on", vec![])
            .await
            .unwrap();
        let other = ledger.propose_candidate("unrelated", vec![]).await.unwrap();

        let before = ledger.diff(&target).await.unwrap();
        ledger.reject(&other, "admin").await.unwrap();
        let after = ledger.diff(&target).await.unwrap();

        assert_eq!(before, after);
        assert_eq!(before.added, 1);
        assert_eq!(before.from_version, BASELINE_VERSION);
    }

    #[tokio::test]
    async fn test_approval_flags_the_proposing_summary() {
        let (ledger, _) = seeded().await;
        let candidate = ledger.propose_candidate("next", vec![]).await.unwrap();
        let summary = LearningSummary {
            id: uuid::Uuid::new_v4(),
            date: Utc::now().date_naive(),
            summary_text: "s".to_string(),
            patterns_extracted: vec![],
            daily_insight: String::new(),
            tokens_used: 10,
            candidate_version_id: Some(candidate.clone()),
            approved: false,
            created_at: Utc::now(),
        };
        ledger.record_summary(&summary).await.unwrap();

        ledger.approve(&candidate, "admin").await.unwrap();

        assert!(ledger.learning_summaries().await.unwrap()[0].approved);
    }

    #[tokio::test]
    async fn test_two_active_versions_halt_approvals_until_reconciled() {
        let (ledger, store) = seeded().await;
        let pending = ledger.propose_candidate("next", vec![]).await.unwrap();
        let doomed = ledger.propose_candidate("doomed", vec![]).await.unwrap();
        store.force_insert(MasterPromptVersion {
            version_id: "Ω_v1.99".to_string(),
            content: "rogue".to_string(),
            status: VersionStatus::Active,
            created_at: Utc::now(),
            approved_at: None,
            approved_by: None,
            patterns_learned: vec![],
        });

        assert!(matches!(
            ledger.reject(&doomed, "admin").await,
            Err(GovernanceError::InvariantViolation { active_count: 2 })
        ));
        assert!(ledger.approvals_halted());
        assert!(matches!(
            ledger.approve(&pending, "admin").await,
            Err(GovernanceError::ApprovalsHalted)
        ));
        assert!(matches!(
            ledger.reconcile("ops").await,
            Err(GovernanceError::InvariantViolation { active_count: 2 })
        ));

        store.force_status("Ω_v1.99", VersionStatus::Archived);
        let active = ledger.reconcile("ops").await.unwrap();

        assert_eq!(active.version_id, BASELINE_VERSION);
        assert!(!ledger.approvals_halted());
        ledger.approve(&pending, "admin").await.unwrap();
    }

    #[tokio::test]
    async fn test_approve_over_two_active_versions_halts_without_promoting() {
        let (ledger, store) = seeded().await;
        let pending = ledger.propose_candidate("next", vec![]).await.unwrap();
        store.force_insert(MasterPromptVersion {
            version_id: "Ω_v1.99".to_string(),
            content: "rogue".to_string(),
            status: VersionStatus::Active,
            created_at: Utc::now(),
            approved_at: None,
            approved_by: None,
            patterns_learned: vec![],
        });

        assert!(matches!(
            ledger.approve(&pending, "admin").await,
            Err(GovernanceError::InvariantViolation { active_count: 2 })
        ));
        assert!(ledger.approvals_halted());

        let statuses: Vec<_> = ledger
            .list_versions()
            .await
            .unwrap()
            .into_iter()
            .map(|v| (v.version_id, v.status))
            .collect();
        assert!(statuses.contains(&(BASELINE_VERSION.to_string(), VersionStatus::Active)));
        assert!(statuses.contains(&("Ω_v1.99".to_string(), VersionStatus::Active)));
        assert!(statuses.contains(&(pending, VersionStatus::Pending)));
    }
}
