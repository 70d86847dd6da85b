pub mod account;
pub mod feedback;
pub mod master_prompt;
pub mod session;
