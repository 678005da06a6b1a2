use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::{CycleReport, SyncError, SyncState};
use crate::model::UpsertOutcome;
use crate::normalize::Normalizer;
use crate::storage::{AlertStore, StoreError};
use crate::upstream::AlertSource;

/// Periodic pull of upstream alerts into the store.
///
/// Cycles run back to back on one task and never overlap. Shutdown is checked
/// once a cycle has finished, so an in-flight fetch or write always completes.
pub struct SyncLoop {
    source: Arc<dyn AlertSource>,
    store: AlertStore,
    normalizer: Normalizer,
    interval: Duration,
    state: SyncState,
}

impl SyncLoop {
    pub fn new(
        source: Arc<dyn AlertSource>,
        store: AlertStore,
        normalizer: Normalizer,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            store,
            normalizer,
            interval,
            state: SyncState::Idle,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Authenticate, then cycle until `shutdown` flips to `true` or its sender
    /// is dropped. Returns an error only when the initial login fails.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), SyncError> {
        info!(interval_secs = self.interval.as_secs(), "Sync loop started");

        self.state = SyncState::Authenticating;
        if let Err(e) = self.source.authenticate().await {
            error!(error = %e, "no upstream token at startup, stopping sync loop");
            self.state = SyncState::Stopped;
            return Err(e.into());
        }

        loop {
            match self.run_cycle().await {
                Ok(report) => info!(
                    fetched = report.fetched,
                    inserted = report.inserted,
                    skipped = report.skipped,
                    rejected = report.rejected,
                    "Sync cycle finished"
                ),
                Err(SyncError::Upstream(e)) => warn!(error = %e, "Skipping sync cycle"),
                Err(SyncError::Store(e)) => error!(error = %e, "Store failure, abandoning sync cycle"),
            }

            self.state = SyncState::Sleeping;
            if *shutdown.borrow_and_update() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow_and_update() {
                        break;
                    }
                }
            }
        }

        self.state = SyncState::Stopped;
        info!("Sync loop stopped");
        Ok(())
    }

    /// One fetch -> normalize -> store pass.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, SyncError> {
        self.state = SyncState::Fetching;
        let batch = self.source.pull().await?;

        self.state = SyncState::Storing;
        let store = self.store.clone();
        let normalizer = self.normalizer;
        let report = tokio::task::spawn_blocking(move || store_batch(&store, &normalizer, &batch))
            .await
            .map_err(StoreError::from)??;
        Ok(report)
    }
}

/// Unlike push mode, the first store failure abandons the rest of the batch.
fn store_batch(
    store: &AlertStore,
    normalizer: &Normalizer,
    batch: &[Value],
) -> Result<CycleReport, StoreError> {
    let mut report = CycleReport {
        fetched: batch.len(),
        ..Default::default()
    };

    for (index, raw) in batch.iter().enumerate() {
        let record = match normalizer.normalize(raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(index, error = %e, "skipping malformed upstream alert");
                report.rejected += 1;
                continue;
            }
        };
        match store.upsert(&record)? {
            UpsertOutcome::Inserted => report.inserted += 1,
            UpsertOutcome::Skipped => report.skipped += 1,
        }
    }

    Ok(report)
}
