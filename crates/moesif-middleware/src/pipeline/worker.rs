//! Delivery workers.

use super::Counters;
use crate::api::CollectorApi;
use crate::config_cache::ConfigCache;
use crate::event::Event;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

pub(crate) type SharedBatches = Arc<Mutex<mpsc::Receiver<Vec<Event>>>>;

/// Deliver batches until the batch channel is closed and empty.
///
/// A failed delivery is logged and the batch discarded.
pub(crate) async fn run(
    id: usize,
    batches: SharedBatches,
    api: Arc<dyn CollectorApi>,
    cache: Arc<ConfigCache>,
    counters: Arc<Counters>,
    debug: bool,
) {
    loop {
        let next = batches.lock().await.recv().await;
        let Some(batch) = next else {
            break;
        };

        match api.send_events(&batch).await {
            Ok(response) => {
                counters.batches_sent.fetch_add(1, Ordering::Relaxed);
                if debug {
                    tracing::info!(worker = id, size = batch.len(), "Events sent successfully");
                }
                cache.check_and_update(response.config_etag.as_deref());
            }
            Err(err) => {
                counters.send_failures.fetch_add(1, Ordering::Relaxed);
                if err.is_unauthorized() || debug {
                    tracing::warn!(worker = id, size = batch.len(), error = %err, "Failed to send events batch");
                } else {
                    tracing::debug!(worker = id, size = batch.len(), error = %err, "Failed to send events batch");
                }
            }
        }
    }
    tracing::debug!(worker = id, "Delivery worker stopped");
}
