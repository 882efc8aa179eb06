// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded task engine: a fixed pool of workers draining one FIFO queue.
//!
//! Every submitted unit of work gets a [`TaskId`] and a record that moves
//! from `queued` to exactly one terminal state. Workers record `completed`
//! or `error`; a waiter whose deadline passes records `timeout`. Whichever
//! terminal write lands first wins and later writes are discarded. Timeouts
//! never interrupt running work, so a hung unit keeps its worker busy until
//! it returns.

mod worker;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::epoch_ms;

pub type TaskId = Uuid;

/// A unit of work. Runs once, on a blocking thread owned by one worker.
pub type Work = Box<dyn FnOnce() -> anyhow::Result<Value> + Send + 'static>;

/// Error text recorded when a waiter gives up on a task.
pub const TIMEOUT_MESSAGE: &str = "Processing timeout";

/// Lifecycle state of a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Completed { result: Value },
    Error { error: String },
    Timeout { error: String },
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Queued)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Completed { .. } => "completed",
            Self::Error { .. } => "error",
            Self::Timeout { .. } => "timeout",
        }
    }
}

/// Snapshot of one task as tracked by the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRecord {
    pub id: TaskId,
    #[serde(flatten)]
    pub state: TaskState,
    pub submitted_at_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
}

impl TaskRecord {
    fn queued(id: TaskId) -> Self {
        Self { id, state: TaskState::Queued, submitted_at_ms: epoch_ms(), finished_at_ms: None }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub workers: usize,
    /// Deadline used by [`TaskEngine::submit_and_wait`].
    pub task_timeout: Duration,
    /// Maximum number of jobs waiting for a worker. `None` is unbounded.
    pub queue_capacity: Option<usize>,
    /// How long terminal records are kept. `None` keeps them forever.
    pub result_ttl: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            task_timeout: Duration::from_secs(180),
            queue_capacity: None,
            result_ttl: Some(Duration::from_secs(600)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    UnknownTask(TaskId),
    Backpressure { capacity: usize },
    ShuttingDown,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTask(id) => write!(f, "unknown task {id}"),
            Self::Backpressure { capacity } => {
                write!(f, "task queue is full ({capacity} waiting)")
            }
            Self::ShuttingDown => f.write_str("task engine is shutting down"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Point-in-time counters for the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub workers: usize,
    pub queued: usize,
    pub tracked: usize,
}

struct Job {
    id: TaskId,
    work: Work,
}

/// State shared between the engine handle, its workers, and the janitor.
struct Shared {
    records: RwLock<HashMap<TaskId, watch::Sender<TaskRecord>>>,
    /// Jobs submitted but not yet picked up by a worker.
    queued: AtomicUsize,
}

impl Shared {
    /// Apply a terminal state unless one was already recorded.
    fn finish(&self, id: TaskId, state: TaskState) -> bool {
        let records = self.records.read();
        let Some(tx) = records.get(&id) else {
            return false;
        };
        tx.send_if_modified(move |record| {
            if record.state.is_terminal() {
                return false;
            }
            record.state = state;
            record.finished_at_ms = Some(epoch_ms());
            true
        })
    }

    fn is_terminal(&self, id: TaskId) -> bool {
        self.records.read().get(&id).is_none_or(|tx| tx.borrow().state.is_terminal())
    }

    /// Drop terminal records that finished at or before `cutoff_ms`.
    fn evict_finished_before(&self, cutoff_ms: u64) -> usize {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, tx| {
            let record = tx.borrow();
            !(record.state.is_terminal() && record.finished_at_ms.is_some_and(|t| t <= cutoff_ms))
        });
        before - records.len()
    }
}

/// Fixed-size worker pool with per-task outcome tracking.
pub struct TaskEngine {
    config: EngineConfig,
    shared: Arc<Shared>,
    queue_tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl TaskEngine {
    /// Spawn the workers (and the retention janitor, if configured) on the
    /// current tokio runtime.
    pub fn start(config: EngineConfig) -> Arc<Self> {
        let worker_count = config.workers.max(1);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));
        let shared =
            Arc::new(Shared { records: RwLock::new(HashMap::new()), queued: AtomicUsize::new(0) });
        let cancel = CancellationToken::new();

        let handles = (0..worker_count)
            .map(|n| tokio::spawn(worker::run(n, Arc::clone(&shared), Arc::clone(&queue_rx))))
            .collect();

        if let Some(ttl) = config.result_ttl {
            worker::spawn_janitor(Arc::clone(&shared), ttl, cancel.clone());
        }

        tracing::debug!(workers = worker_count, "task engine started");
        Arc::new(Self {
            config: EngineConfig { workers: worker_count, ..config },
            shared,
            queue_tx: Mutex::new(Some(queue_tx)),
            workers: Mutex::new(handles),
            cancel,
        })
    }

    pub fn default_timeout(&self) -> Duration {
        self.config.task_timeout
    }

    /// Enqueue `work` and return its id. Never waits for a free worker.
    ///
    /// The `queued` record is visible before this returns.
    pub fn submit<F>(&self, work: F) -> Result<TaskId, EngineError>
    where
        F: FnOnce() -> anyhow::Result<Value> + Send + 'static,
    {
        let queue = self.queue_tx.lock();
        let Some(tx) = queue.as_ref() else {
            return Err(EngineError::ShuttingDown);
        };

        match self.config.queue_capacity {
            Some(capacity) => {
                let reserved =
                    self.shared.queued.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                        (n < capacity).then_some(n + 1)
                    });
                if reserved.is_err() {
                    return Err(EngineError::Backpressure { capacity });
                }
            }
            None => {
                self.shared.queued.fetch_add(1, Ordering::SeqCst);
            }
        }

        let id = Uuid::new_v4();
        let (record_tx, _) = watch::channel(TaskRecord::queued(id));
        self.shared.records.write().insert(id, record_tx);

        if tx.send(Job { id, work: Box::new(work) }).is_err() {
            self.shared.records.write().remove(&id);
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(EngineError::ShuttingDown);
        }
        tracing::trace!(task_id = %id, "task queued");
        Ok(id)
    }

    /// Current record for `id`, or `None` if the engine does not know it.
    pub fn poll_result(&self, id: TaskId) -> Option<TaskRecord> {
        self.shared.records.read().get(&id).map(|tx| tx.borrow().clone())
    }

    /// Wait until the task is terminal or `timeout` elapses.
    ///
    /// On deadline the task is marked `timeout` unless the worker recorded
    /// its outcome first; the returned record is whatever won.
    pub async fn await_result(
        &self,
        id: TaskId,
        timeout: Duration,
    ) -> Result<TaskRecord, EngineError> {
        let mut rx = self
            .shared
            .records
            .read()
            .get(&id)
            .map(|tx| tx.subscribe())
            .ok_or(EngineError::UnknownTask(id))?;

        let finished = match tokio::time::timeout(
            timeout,
            rx.wait_for(|record| record.state.is_terminal()),
        )
        .await
        {
            Ok(Ok(record)) => Some(record.clone()),
            _ => None,
        };
        if let Some(record) = finished {
            return Ok(record);
        }

        if self.shared.finish(id, TaskState::Timeout { error: TIMEOUT_MESSAGE.to_owned() }) {
            tracing::debug!(task_id = %id, ?timeout, "task timed out");
        }
        self.poll_result(id).ok_or(EngineError::UnknownTask(id))
    }

    /// Submit and wait with the configured task timeout.
    pub async fn submit_and_wait<F>(&self, work: F) -> Result<TaskRecord, EngineError>
    where
        F: FnOnce() -> anyhow::Result<Value> + Send + 'static,
    {
        let id = self.submit(work)?;
        self.await_result(id, self.config.task_timeout).await
    }

    /// Evict terminal records older than the retention period now.
    pub fn evict_expired(&self) -> usize {
        match self.config.result_ttl {
            Some(ttl) => self
                .shared
                .evict_finished_before(epoch_ms().saturating_sub(ttl.as_millis() as u64)),
            None => 0,
        }
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            workers: self.config.workers,
            queued: self.shared.queued.load(Ordering::SeqCst),
            tracked: self.shared.records.read().len(),
        }
    }

    /// Stop accepting work, let the workers drain the queue, and join them.
    pub async fn shutdown(&self) {
        drop(self.queue_tx.lock().take());
        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(err = %e, "worker exited abnormally");
            }
        }
        self.cancel.cancel();
        tracing::debug!("task engine stopped");
    }
}

impl Drop for TaskEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
