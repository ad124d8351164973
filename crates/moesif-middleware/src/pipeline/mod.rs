//! Event delivery pipeline.
//!
//! ```text
//! request tasks ──try_send──▶ event queue ──▶ batcher ──▶ batch queue ──▶ workers ──▶ collector
//! ```
//!
//! The event queue is bounded and never blocks producers: a full queue drops
//! the event and counts it. The batch queue is bounded too, but only the
//! batcher waits on it. Shutdown flips the shared stop signal, after which
//! the batcher drains the event queue and the workers drain the batch queue.

mod batcher;
mod worker;

use crate::api::CollectorApi;
use crate::config_cache::ConfigCache;
use crate::event::Event;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// Pipeline counters, owned by one middleware instance.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) requests: AtomicU64,
    pub(crate) enqueued: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) batches_sent: AtomicU64,
    pub(crate) send_failures: AtomicU64,
}

/// Point-in-time copy of the pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Requests seen by the middleware.
    pub requests: u64,
    /// Events accepted into the queue.
    pub enqueued: u64,
    /// Events rejected because the queue was full.
    pub dropped: u64,
    /// Batches delivered successfully.
    pub batches_sent: u64,
    /// Batches whose delivery failed.
    pub send_failures: u64,
}

/// Sizing of the pipeline.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PipelineSettings {
    pub batch_size: usize,
    pub worker_count: usize,
    pub queue_size: usize,
    pub batch_timeout: Duration,
    pub debug: bool,
}

struct Tasks {
    batcher: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

/// Bounded queue, batcher and worker pool.
pub(crate) struct EventPipeline {
    events: mpsc::Sender<Event>,
    counters: Arc<Counters>,
    tasks: Mutex<Option<Tasks>>,
    debug: bool,
}

impl EventPipeline {
    /// Spawn the batcher and workers.
    pub(crate) fn start(
        settings: PipelineSettings,
        api: Arc<dyn CollectorApi>,
        cache: Arc<ConfigCache>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        let batch_size = settings.batch_size.max(1);
        let queue_size = settings.queue_size.max(1);
        let batch_capacity = queue_size.div_ceil(batch_size).max(1);

        let (event_tx, event_rx) = mpsc::channel(queue_size);
        let (batch_tx, batch_rx) = mpsc::channel(batch_capacity);
        let counters = Arc::new(Counters::default());

        let batcher = tokio::spawn(batcher::run(
            event_rx,
            batch_tx,
            batch_size,
            settings.batch_timeout,
            stop,
        ));

        let shared: worker::SharedBatches = Arc::new(Mutex::new(batch_rx));
        let workers = (0..settings.worker_count.max(1))
            .map(|id| {
                tokio::spawn(worker::run(
                    id,
                    shared.clone(),
                    api.clone(),
                    cache.clone(),
                    counters.clone(),
                    settings.debug,
                ))
            })
            .collect();

        tracing::debug!(
            batch_size,
            queue_size,
            workers = settings.worker_count.max(1),
            "Event pipeline started"
        );

        Self {
            events: event_tx,
            counters,
            tasks: Mutex::new(Some(Tasks { batcher, workers })),
            debug: settings.debug,
        }
    }

    /// Queue an event without waiting.
    ///
    /// Returns `false` when the queue is full (the event is dropped and
    /// counted) or the pipeline has shut down.
    pub(crate) fn enqueue(&self, event: Event) -> bool {
        match self.events.try_send(event) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if self.debug {
                    tracing::warn!(dropped, "Event queue is full, dropping event");
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Event pipeline is shut down, dropping event");
                false
            }
        }
    }

    pub(crate) fn record_request(&self) {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stats(&self) -> PipelineStats {
        let c = &self.counters;
        PipelineStats {
            requests: c.requests.load(Ordering::Relaxed),
            enqueued: c.enqueued.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            batches_sent: c.batches_sent.load(Ordering::Relaxed),
            send_failures: c.send_failures.load(Ordering::Relaxed),
        }
    }

    /// Wait for the batcher, then every worker, to finish.
    ///
    /// The stop signal must already be set. Later calls return immediately.
    pub(crate) async fn join(&self) {
        let Some(tasks) = self.tasks.lock().await.take() else {
            return;
        };

        if let Err(err) = tasks.batcher.await {
            tracing::error!(error = %err, "Batcher task failed");
        }
        for handle in tasks.workers {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "Delivery worker task failed");
            }
        }
    }
}
