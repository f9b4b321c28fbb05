/*!
 * Bounded fan-out with first-failure short circuit
 *
 * Every command that runs sibling operations concurrently (parts, files,
 * aborts) goes through [`FanOut`]. Work is admitted through an
 * [`AdmissionGate`]; the first failure that is not a cancellation trips an
 * internal stop token so nothing new is scheduled, while siblings already
 * dispatched keep running on the caller's token until they settle.
 */

use std::future::Future;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::concurrency::{AdmissionGate, GatePermit};
use crate::error::{Result, TransferError};

/// A set of gated sibling tasks reconciled as "all succeed or first failure"
pub struct FanOut<T> {
    tasks: JoinSet<Result<T>>,
    gate: AdmissionGate,
    cancel: CancellationToken,
    stop: CancellationToken,
    results: Vec<T>,
    first_error: Option<TransferError>,
    saw_cancellation: bool,
    preempt: bool,
}

enum Step<T> {
    Stopped,
    Joined(std::result::Result<Result<T>, JoinError>),
    Admitted(Result<GatePermit>),
}

impl<T: Send + 'static> FanOut<T> {
    /// Create a fan-out admitting work through `gate`
    ///
    /// The internal stop token is derived from `cancel`, so caller
    /// cancellation also stops scheduling.
    pub fn new(gate: AdmissionGate, cancel: &CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            gate,
            cancel: cancel.clone(),
            stop: cancel.child_token(),
            results: Vec::new(),
            first_error: None,
            saw_cancellation: false,
            preempt: true,
        }
    }

    /// Let tasks observe caller cancellation themselves
    ///
    /// By default a task is dropped as soon as the caller cancels. Tasks
    /// that must run their own cleanup (a whole multipart upload, say)
    /// opt out of that and are awaited instead.
    pub fn cooperative(mut self) -> Self {
        self.preempt = false;
        self
    }

    /// Token tripped once scheduling has stopped
    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Tasks dispatched but not yet reaped
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for a gate slot and dispatch `task`
    ///
    /// Finished siblings are reaped while waiting, so a failure is noticed
    /// before the next slot is handed out. Returns `false` without running
    /// `task` once scheduling has stopped.
    pub async fn spawn<F>(&mut self, task: F) -> bool
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        loop {
            let step = tokio::select! {
                biased;
                _ = self.stop.cancelled() => Step::Stopped,
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    Step::Joined(joined)
                }
                permit = self.gate.acquire() => Step::Admitted(permit),
            };

            match step {
                Step::Stopped => return false,
                Step::Joined(joined) => self.record(joined),
                Step::Admitted(Err(err)) => {
                    self.fail(err);
                    return false;
                }
                Step::Admitted(Ok(permit)) => {
                    if self.preempt {
                        let cancel = self.cancel.clone();
                        self.tasks.spawn(async move {
                            let _permit = permit;
                            tokio::select! {
                                _ = cancel.cancelled() => Err(TransferError::Cancelled),
                                result = task => result,
                            }
                        });
                    } else {
                        self.tasks.spawn(async move {
                            let _permit = permit;
                            task.await
                        });
                    }
                    return true;
                }
            }
        }
    }

    /// Wait until every task has succeeded or one has failed
    ///
    /// On failure the error is returned immediately and the remaining
    /// tasks are left running; call [`settle`](Self::settle) to drain them.
    /// Successful results are returned in completion order.
    pub async fn join(&mut self) -> Result<Vec<T>> {
        while self.first_error.is_none() {
            match self.tasks.join_next().await {
                Some(joined) => self.record(joined),
                None => break,
            }
        }

        if let Some(err) = self.first_error.take() {
            return Err(err);
        }
        if self.saw_cancellation || self.cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        Ok(std::mem::take(&mut self.results))
    }

    /// [`join`](Self::join), then let stragglers finish before returning a failure
    pub async fn join_settled(&mut self) -> Result<Vec<T>> {
        match self.join().await {
            Ok(results) => Ok(results),
            Err(err) => {
                self.settle(None).await;
                Err(err)
            }
        }
    }

    /// Drain outstanding tasks, optionally bounded by `timeout`
    ///
    /// Returns `false` when the timeout elapsed; remaining tasks are aborted.
    pub async fn settle(&mut self, timeout: Option<Duration>) -> bool {
        let tasks = &mut self.tasks;
        let drain = async {
            let mut late = Vec::new();
            while let Some(joined) = tasks.join_next().await {
                late.push(joined);
            }
            late
        };

        let (late, settled) = match timeout {
            Some(limit) => match tokio::time::timeout(limit, drain).await {
                Ok(late) => (late, true),
                Err(_) => (Vec::new(), false),
            },
            None => (drain.await, true),
        };

        if !settled {
            warn!(
                remaining = self.tasks.len(),
                "In-flight tasks did not settle before timeout, aborting them"
            );
            self.tasks.abort_all();
        }
        for joined in late {
            self.record(joined);
        }
        settled
    }

    fn record(&mut self, joined: std::result::Result<Result<T>, JoinError>) {
        match joined.map_err(TransferError::from).and_then(|result| result) {
            Ok(value) => self.results.push(value),
            Err(err) if err.is_cancelled() => self.saw_cancellation = true,
            Err(err) => self.fail(err),
        }
    }

    fn fail(&mut self, err: TransferError) {
        if self.first_error.is_none() {
            debug!(error = %err, "Sibling failed, stopping further scheduling");
            self.first_error = Some(err);
            self.stop.cancel();
        } else {
            debug!(error = %err, "Additional sibling failure after stop");
        }
    }
}
