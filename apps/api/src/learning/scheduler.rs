use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};
use tokio::task::JoinHandle;
use tracing::info;

use crate::learning::cycle::{log_outcome, LearningLoop};

/// Time left until the next `run_at` (UTC). A `run_at` equal to `now` is tomorrow's run.
pub fn duration_until(now: DateTime<Utc>, run_at: NaiveTime) -> Duration {
    let mut next = now.date_naive().and_time(run_at).and_utc();
    if next <= now {
        next += chrono::Duration::days(1);
    }
    (next - now).to_std().unwrap_or(Duration::ZERO)
}

/// Runs a learning cycle every day at `run_at` UTC.
pub fn spawn_scheduler(learning: Arc<LearningLoop>, run_at: NaiveTime) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let wait = duration_until(Utc::now(), run_at);
            info!(
                "Next learning cycle at {run_at} UTC (in {}m)",
                wait.as_secs() / 60
            );
            tokio::time::sleep(wait).await;
            log_outcome(learning.run_cycle().await);
        }
    })
}
