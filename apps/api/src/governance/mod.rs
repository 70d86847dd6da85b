// Master prompt governance: a versioned ledger with exactly one active version,
// machine-proposed pending candidates, operator triage and review diffs.

pub mod diff;
pub mod handlers;
pub mod ledger;
pub mod pg;
pub mod prompts;
pub mod store;

pub use ledger::{GovernanceError, MasterPromptLedger};
