//! Per-session turn gate.
//!
//! Only one turn runs per session at a time. A turn arriving while one is
//! in flight either waits in a FIFO queue of bounded depth or, when the
//! caller marks it non-queuable, is rejected with `ConcurrentTurn`.
//! Waiters are served in arrival order (tokio's semaphore is fair).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use ava_domain::error::{Error, Result};

/// How a turn behaves when its session is busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Queue,
    RejectIfBusy,
}

impl Admission {
    pub fn from_non_queuable(non_queuable: bool) -> Self {
        if non_queuable {
            Self::RejectIfBusy
        } else {
            Self::Queue
        }
    }
}

struct Lane {
    running: Arc<Semaphore>,
    waiting: AtomicUsize,
}

/// Holding this means the turn owns its session. Released on drop.
pub struct TurnPermit {
    _permit: OwnedSemaphorePermit,
}

pub struct SessionGate {
    lanes: Mutex<HashMap<String, Arc<Lane>>>,
    queue_depth: usize,
}

impl SessionGate {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            lanes: Mutex::new(HashMap::new()),
            queue_depth,
        }
    }

    fn lane(&self, session_id: &str) -> Arc<Lane> {
        self.lanes
            .lock()
            .entry(session_id.to_owned())
            .or_insert_with(|| {
                Arc::new(Lane {
                    running: Arc::new(Semaphore::new(1)),
                    waiting: AtomicUsize::new(0),
                })
            })
            .clone()
    }

    /// Acquire the session's turn slot.
    pub async fn acquire(&self, session_id: &str, admission: Admission) -> Result<TurnPermit> {
        let lane = self.lane(session_id);

        // Only take the fast path when nobody is queued, so a newcomer
        // cannot overtake a waiter.
        if lane.waiting.load(Ordering::SeqCst) == 0 {
            if let Ok(permit) = lane.running.clone().try_acquire_owned() {
                return Ok(TurnPermit { _permit: permit });
            }
        }

        if admission == Admission::RejectIfBusy {
            return Err(Error::ConcurrentTurn(session_id.to_owned()));
        }

        let queued = lane.waiting.fetch_add(1, Ordering::SeqCst);
        let _waiter = WaiterGuard(&lane.waiting);
        if queued >= self.queue_depth {
            return Err(Error::ConcurrentTurn(format!(
                "{session_id} (queue of {} turns is full)",
                self.queue_depth
            )));
        }

        let permit = lane
            .running
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::InvariantViolated("session gate closed".into()))?;
        Ok(TurnPermit { _permit: permit })
    }

    /// Whether a turn is currently running for `session_id`.
    pub fn is_busy(&self, session_id: &str) -> bool {
        self.lanes
            .lock()
            .get(session_id)
            .is_some_and(|l| l.running.available_permits() == 0)
    }

    /// Drop lanes that no turn holds or waits on.
    pub fn prune_idle(&self) {
        // A clone outside the map belongs to an acquire that has looked the
        // lane up but not yet taken or queued for the permit.
        self.lanes.lock().retain(|_, lane| {
            Arc::strong_count(lane) > 1
                || lane.running.available_permits() == 0
                || lane.waiting.load(Ordering::SeqCst) > 0
        });
    }

    pub fn session_count(&self) -> usize {
        self.lanes.lock().len()
    }
}

/// Decrements the waiter count when a queued acquire finishes or is
/// cancelled.
struct WaiterGuard<'a>(&'a AtomicUsize);

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
