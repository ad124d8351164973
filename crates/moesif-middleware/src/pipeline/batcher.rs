//! Groups queued events into batches.

use crate::event::Event;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};

enum Step {
    Event(Event),
    Timeout,
    Closed,
    Stop,
}

/// Batch events by size and age until stopped, then drain.
///
/// A batch is sent when it reaches `batch_size` events or when `timeout`
/// has passed since its first event. On stop the event queue is closed, so
/// later enqueues fail, and every event already queued is flushed in final
/// batches before the batch channel is dropped.
pub(crate) async fn run(
    mut events: mpsc::Receiver<Event>,
    batches: mpsc::Sender<Vec<Event>>,
    batch_size: usize,
    timeout: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut batch = Vec::with_capacity(batch_size);
    let mut deadline: Option<Instant> = None;

    loop {
        if *stop.borrow() {
            break;
        }

        let step = tokio::select! {
            biased;
            _ = stop.changed() => Step::Stop,
            step = next_event(&mut events, deadline) => step,
        };

        match step {
            Step::Event(event) => {
                if batch.is_empty() {
                    deadline = Some(Instant::now() + timeout);
                }
                batch.push(event);
                if batch.len() >= batch_size {
                    flush(&batches, &mut batch).await;
                    deadline = None;
                }
            }
            Step::Timeout => {
                flush(&batches, &mut batch).await;
                deadline = None;
            }
            Step::Closed | Step::Stop => break,
        }
    }

    events.close();
    while let Some(event) = events.recv().await {
        batch.push(event);
        if batch.len() >= batch_size {
            flush(&batches, &mut batch).await;
        }
    }
    flush(&batches, &mut batch).await;
    tracing::debug!("Batcher drained and stopped");
}

async fn next_event(events: &mut mpsc::Receiver<Event>, deadline: Option<Instant>) -> Step {
    match deadline {
        Some(deadline) => match time::timeout_at(deadline, events.recv()).await {
            Ok(Some(event)) => Step::Event(event),
            Ok(None) => Step::Closed,
            Err(_) => Step::Timeout,
        },
        None => match events.recv().await {
            Some(event) => Step::Event(event),
            None => Step::Closed,
        },
    }
}

async fn flush(batches: &mpsc::Sender<Vec<Event>>, batch: &mut Vec<Event>) {
    if batch.is_empty() {
        return;
    }
    let ready = std::mem::take(batch);
    let size = ready.len();
    if batches.send(ready).await.is_err() {
        tracing::warn!(size, "Delivery workers are gone, dropping batch");
    }
}
