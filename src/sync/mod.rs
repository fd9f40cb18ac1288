// ABOUTME: Sync resolution: window admission and the production load stage

pub mod loader;
pub mod resolver;

pub use loader::{CancelToken, LoadStage, LoadStats};
pub use resolver::{admit, Decision, LoadOutcome, SkipReason, SyncResolver};
