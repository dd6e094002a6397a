// File: afkbot-common/src/models/mod.rs
pub mod account;
pub mod credential;
pub mod log;
pub mod platform;

pub use account::{Account, AccountSummary, NewAccount};
pub use credential::Credential;
pub use log::{LogEntry, LogFrame, LogSnapshot};
pub use platform::Platform;
