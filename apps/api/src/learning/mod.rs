//! Nightly learning loop.
//!
//! Reads the sessions finalized over the last day, distills them through the completion
//! gateway and files the result as a pending master prompt candidate. It never changes
//! which version is active; that stays an operator decision.

pub mod cycle;
pub mod prompts;
pub mod scheduler;

pub use cycle::{CycleOutcome, LearningError, LearningLoop, SkipReason};
pub use scheduler::spawn_scheduler;
