//! User turns that were accepted but could not be stored.
//!
//! When the store is down the caller gets `StoreUnavailable`, but the
//! utterance is kept here and delivered, in order, before the session's
//! next turn or on the next sweep.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTurn {
    pub text: String,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct PendingTurns {
    inner: Mutex<HashMap<String, VecDeque<PendingTurn>>>,
}

impl PendingTurns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, session_id: &str, text: String) {
        self.inner
            .lock()
            .entry(session_id.to_owned())
            .or_default()
            .push_back(PendingTurn {
                text,
                accepted_at: Utc::now(),
            });
    }

    pub fn front(&self, session_id: &str) -> Option<PendingTurn> {
        self.inner.lock().get(session_id).and_then(|q| q.front().cloned())
    }

    /// Remove the oldest pending turn once it has been stored.
    pub fn pop(&self, session_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(q) = inner.get_mut(session_id) {
            q.pop_front();
            if q.is_empty() {
                inner.remove(session_id);
            }
        }
    }

    pub fn sessions(&self) -> Vec<String> {
        self.inner.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
