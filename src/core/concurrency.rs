/*!
 * Admission control for concurrent service requests
 *
 * An [`AdmissionGate`] is a counting semaphore shared by one family of
 * concurrent operations: the parts of a multipart upload, the files of a
 * directory transfer, or the aborts of a stale-upload sweep. A permit is
 * acquired before dispatch and released when the [`GatePermit`] drops, so
 * success, failure, panic and cancellation all give the slot back.
 */

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Result, TransferError};

/// A counting semaphore bounding in-flight operations
#[derive(Clone)]
pub struct AdmissionGate {
    state: Arc<GateState>,
}

struct GateState {
    semaphore: Arc<Semaphore>,
    max: usize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl AdmissionGate {
    /// Create a gate admitting at most `max_concurrent` operations (minimum 1)
    pub fn new(max_concurrent: usize) -> Self {
        let max = max_concurrent.max(1);
        Self {
            state: Arc::new(GateState {
                semaphore: Arc::new(Semaphore::new(max)),
                max,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        }
    }

    /// Wait for a slot
    pub async fn acquire(&self) -> Result<GatePermit> {
        let permit = self
            .state
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TransferError::Task("admission gate closed".to_string()))?;

        Ok(self.admitted(permit))
    }

    /// Take a slot only if one is free right now
    pub fn try_acquire(&self) -> Option<GatePermit> {
        self.state
            .semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| self.admitted(permit))
    }

    fn admitted(&self, permit: OwnedSemaphorePermit) -> GatePermit {
        let current = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak.fetch_max(current, Ordering::SeqCst);
        GatePermit {
            _permit: permit,
            state: self.state.clone(),
        }
    }

    /// Configured slot count
    pub fn max_concurrent(&self) -> usize {
        self.state.max
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        self.state.semaphore.available_permits()
    }

    /// Operations currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously held slots observed so far
    pub fn peak_in_flight(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("max", &self.state.max)
            .field("in_flight", &self.in_flight())
            .field("peak", &self.peak_in_flight())
            .finish()
    }
}

/// Permission to run one operation; released on drop
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
    state: Arc<GateState>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
