// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker loop and retention janitor.

use std::any::Any;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use super::{Job, Shared, TaskState};
use crate::epoch_ms;

/// One long-lived worker. Exits once the queue is closed and drained.
pub(super) async fn run(
    worker: usize,
    shared: Arc<Shared>,
    queue: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
) {
    loop {
        let job = {
            let mut rx = queue.lock().await;
            rx.recv().await
        };
        let Some(Job { id, work }) = job else {
            break;
        };
        shared.queued.fetch_sub(1, Ordering::SeqCst);

        // A waiter may have given up while the job sat in the queue.
        if shared.is_terminal(id) {
            tracing::debug!(worker, task_id = %id, "skipping task that timed out while queued");
            continue;
        }

        tracing::debug!(worker, task_id = %id, "task started");
        let state = match tokio::task::spawn_blocking(work).await {
            Ok(Ok(result)) => TaskState::Completed { result },
            Ok(Err(e)) => TaskState::Error { error: failure_message(&e) },
            Err(e) => TaskState::Error { error: join_failure_message(e) },
        };
        let status = state.as_str();

        if shared.finish(id, state) {
            tracing::debug!(worker, task_id = %id, status, "task finished");
        } else {
            tracing::debug!(worker, task_id = %id, status, "discarding late task outcome");
        }
    }
    tracing::debug!(worker, "worker stopped");
}

/// Periodically evict terminal records older than `ttl`.
pub(super) fn spawn_janitor(shared: Arc<Shared>, ttl: Duration, cancel: CancellationToken) {
    let period = (ttl / 4).clamp(Duration::from_millis(10), Duration::from_secs(60));
    let ttl_ms = ttl.as_millis() as u64;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let evicted = shared.evict_finished_before(epoch_ms().saturating_sub(ttl_ms));
            if evicted > 0 {
                tracing::debug!(evicted, "evicted expired task records");
            }
        }
    });
}

fn failure_message(err: &anyhow::Error) -> String {
    let message = format!("{err:#}");
    if message.trim().is_empty() {
        "task failed".to_owned()
    } else {
        message
    }
}

fn join_failure_message(err: JoinError) -> String {
    if err.is_panic() {
        format!("task panicked: {}", panic_payload(err.into_panic()))
    } else {
        "task was cancelled".to_owned()
    }
}

fn panic_payload(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
