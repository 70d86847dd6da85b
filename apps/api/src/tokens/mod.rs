// Token metering: per-account balances with soft overdraft and an append-only
// transaction log. Session debits are never refused; admin removals are guarded.

pub mod handlers;
pub mod ledger;
pub mod pg;
pub mod store;

pub use ledger::{LedgerError, TokenLedger};
