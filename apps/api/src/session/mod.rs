// Agent authoring sessions: a forward-only stage machine that pins one master prompt
// version at creation and bills every generation against the account's balance.

pub mod handlers;
pub mod machine;
pub mod pg;
pub mod prompts;
pub mod store;
pub mod templates;

pub use machine::{SessionError, SessionService};
