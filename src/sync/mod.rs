//! Pull-mode synchronization: poll the agent, normalize, store.

pub mod engine;

use serde::Serialize;
use thiserror::Error;

use crate::storage::StoreError;
use crate::upstream::UpstreamError;

pub use self::engine::SyncLoop;

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncState {
    Idle,
    Authenticating,
    Fetching,
    Storing,
    Sleeping,
    /// Shut down, or gave up because no token could be obtained at startup.
    Stopped,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of one fetch/normalize/store cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub fetched: usize,
    pub inserted: usize,
    pub skipped: usize,
    /// Elements that were not JSON objects.
    pub rejected: usize,
}
