//! Push-mode ingestion: normalize and store a batch of raw alerts.
//!
//! Each element is processed on its own. A malformed element or a failed write
//! is logged and counted as rejected; its siblings are still processed.

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::model::UpsertOutcome;
use crate::normalize::Normalizer;
use crate::storage::{AlertStore, StoreError};

/// Per-batch counts returned to the pushing agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReceiveSummary {
    /// Elements present in the request body.
    pub submitted: usize,
    /// Elements normalized and handed to the store, duplicates included.
    pub received: usize,
    /// Elements newly persisted.
    pub inserted: usize,
    /// Elements dropped by normalization or storage failures.
    pub rejected: usize,
}

/// Accept a single raw alert object or an array of them.
pub fn receive(store: &AlertStore, normalizer: &Normalizer, body: Value) -> ReceiveSummary {
    let batch = match body {
        Value::Array(items) => items,
        other => vec![other],
    };

    let mut summary = ReceiveSummary {
        submitted: batch.len(),
        ..Default::default()
    };

    for (index, raw) in batch.iter().enumerate() {
        let record = match normalizer.normalize(raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(index, error = %e, "skipping malformed alert");
                summary.rejected += 1;
                continue;
            }
        };

        match store.upsert(&record) {
            Ok(outcome) => {
                summary.received += 1;
                if outcome == UpsertOutcome::Inserted {
                    summary.inserted += 1;
                    info!(id = %record.id, event = %record.event, source_ip = %record.source_ip, "inserted alert");
                } else {
                    info!(id = %record.id, "alert already exists, skipped");
                }
            }
            Err(e) => {
                warn!(index, id = %record.id, error = %e, "failed to store alert");
                summary.rejected += 1;
            }
        }
    }

    summary
}

/// Run [`receive`] on the blocking pool so SQLite work stays off the async
/// workers.
pub async fn receive_async(
    store: AlertStore,
    normalizer: Normalizer,
    body: Value,
) -> Result<ReceiveSummary, StoreError> {
    let summary =
        tokio::task::spawn_blocking(move || receive(&store, &normalizer, body)).await?;
    Ok(summary)
}
