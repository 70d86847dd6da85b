// User ratings of the authoring flow. Append-only; consumed by the nightly learning cycle.

pub mod book;
pub mod handlers;
pub mod pg;
pub mod store;

pub use book::{FeedbackBook, FeedbackError, NewFeedback};
