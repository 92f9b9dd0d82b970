//! Scan scheduler: bounded concurrency, bounded backlog, retries.
//!
//! Submissions beyond the backlog capacity are rejected immediately with a
//! queue-full result. Dispatched scans run on their own tokio task; each one
//! goes through [`scan_with_retry`] so transient provider errors are retried
//! with backoff while holding the worker slot.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{Notify, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{QueueConfig, RetryPolicy};
use crate::llm::Scanner;
use crate::llm::retry::scan_with_retry;
use crate::pipeline::types::{QueuedResult, Rejection, ScanRequest};
use crate::pipeline::validator::failure_response;

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub backlog_size: usize,
    pub in_flight: usize,
    pub concurrency_limit: usize,
    pub paused: bool,
}

struct PendingScan {
    request: ScanRequest,
    enqueued_at: Instant,
    reply: oneshot::Sender<QueuedResult>,
}

#[derive(Default)]
struct QueueState {
    backlog: VecDeque<PendingScan>,
    in_flight: usize,
    paused: bool,
}

struct QueueInner {
    scanner: Arc<Scanner>,
    retry: RetryPolicy,
    concurrency: usize,
    capacity: usize,
    state: Mutex<QueueState>,
    idle: Notify,
}

/// Cloneable handle to a shared scan scheduler.
#[derive(Clone)]
pub struct ScanQueue {
    inner: Arc<QueueInner>,
}

impl ScanQueue {
    pub fn new(scanner: Arc<Scanner>, config: QueueConfig, retry: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                scanner,
                retry,
                concurrency: config.concurrency.max(1),
                capacity: config.capacity,
                state: Mutex::new(QueueState::default()),
                idle: Notify::new(),
            }),
        }
    }

    /// Enqueue a scan and wait for its result.
    ///
    /// Returns at once with `rejection: Some(QueueFull)` when the backlog is
    /// at capacity; such requests never reach the provider.
    pub async fn submit(&self, request: ScanRequest) -> QueuedResult {
        let (reply, rx) = oneshot::channel();
        let scan_id = request.scan_id();
        {
            let mut state = self.inner.lock();
            if state.backlog.len() >= self.inner.capacity {
                warn!(
                    %scan_id,
                    backlog = state.backlog.len(),
                    capacity = self.inner.capacity,
                    "Scan queue full, rejecting request"
                );
                return rejected(Rejection::QueueFull, "Scan queue is full");
            }
            state.backlog.push_back(PendingScan {
                request,
                enqueued_at: Instant::now(),
                reply,
            });
        }

        QueueInner::dispatch(&self.inner);

        match rx.await {
            Ok(result) => result,
            Err(_) => rejected(Rejection::Cleared, "Scan dropped before it started"),
        }
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.inner.lock();
        QueueStats {
            backlog_size: state.backlog.len(),
            in_flight: state.in_flight,
            concurrency_limit: self.inner.concurrency,
            paused: state.paused,
        }
    }

    /// Stop dispatching. In-flight scans run to completion.
    pub fn pause(&self) {
        self.inner.lock().paused = true;
        info!("Scan queue paused");
    }

    pub fn resume(&self) {
        self.inner.lock().paused = false;
        info!("Scan queue resumed");
        QueueInner::dispatch(&self.inner);
    }

    /// Drop every backlog entry not yet started. Returns how many were dropped.
    ///
    /// Their submitters receive a failure result with `rejection: Some(Cleared)`.
    pub fn clear(&self) -> usize {
        let dropped = std::mem::take(&mut self.inner.lock().backlog);
        let count = dropped.len();
        for pending in dropped {
            let _ = pending
                .reply
                .send(rejected(Rejection::Cleared, "Scan queue was cleared"));
        }
        info!(dropped = count, "Scan queue cleared");
        self.inner.notify_if_idle();
        count
    }

    /// Wait until the backlog is empty and nothing is in flight.
    pub async fn drain(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.is_idle() {
                break;
            }
            notified.await;
        }
        debug!("Scan queue drained");
    }
}

impl QueueInner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_idle(&self) -> bool {
        let state = self.lock();
        state.backlog.is_empty() && state.in_flight == 0
    }

    fn notify_if_idle(&self) {
        if self.is_idle() {
            self.idle.notify_waiters();
        }
    }

    /// Start as many backlog entries as free slots allow.
    fn dispatch(inner: &Arc<Self>) {
        loop {
            let pending = {
                let mut state = inner.lock();
                if state.paused || state.in_flight >= inner.concurrency {
                    return;
                }
                let Some(pending) = state.backlog.pop_front() else {
                    return;
                };
                state.in_flight += 1;
                pending
            };

            let worker = Arc::clone(inner);
            tokio::spawn(async move {
                worker.run(pending).await;
                worker.lock().in_flight -= 1;
                QueueInner::dispatch(&worker);
                worker.notify_if_idle();
            });
        }
    }

    async fn run(&self, pending: PendingScan) {
        let started = Instant::now();
        let queue_time = started.saturating_duration_since(pending.enqueued_at);
        let scan_id = pending.request.scan_id();

        let outcome = AssertUnwindSafe(scan_with_retry(&self.scanner, &pending.request, &self.retry))
            .catch_unwind()
            .await;
        let process_time = started.elapsed();

        let result = match outcome {
            Ok(outcome) => QueuedResult {
                success: outcome.result.success,
                response: outcome.result.response,
                retried: outcome.result.retried,
                error: outcome.result.error,
                queue_time,
                process_time,
                attempts: outcome.attempts,
                rejection: None,
            },
            Err(_) => {
                warn!(%scan_id, "Scan task panicked");
                QueuedResult {
                    success: false,
                    response: failure_response(),
                    retried: false,
                    error: Some("Scan task panicked".to_string()),
                    queue_time,
                    process_time,
                    attempts: 1,
                    rejection: None,
                }
            }
        };

        debug!(
            %scan_id,
            success = result.success,
            attempts = result.attempts,
            queue_ms = queue_time.as_millis() as u64,
            process_ms = process_time.as_millis() as u64,
            "Scan finished"
        );

        if pending.reply.send(result).is_err() {
            debug!(%scan_id, "Submitter gone before scan finished");
        }
    }
}

fn rejected(rejection: Rejection, reason: &str) -> QueuedResult {
    QueuedResult {
        success: false,
        response: failure_response(),
        retried: false,
        error: Some(reason.to_string()),
        queue_time: Duration::ZERO,
        process_time: Duration::ZERO,
        attempts: 0,
        rejection: Some(rejection),
    }
}
