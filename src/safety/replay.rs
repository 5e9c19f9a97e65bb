//! Replay state: last accepted timestamp per sender.

use crate::core::{Error, Result};
use std::collections::HashMap;
use std::sync::Mutex;

/// Store of last-accepted timestamps.
///
/// `check_and_advance` is the only mutation and must run as one critical
/// section so two concurrent deliveries of the same envelope cannot both
/// pass.
pub trait ReplayStore: Send + Sync {
    /// Reject `timestamp` if it is not newer than the last accepted one for
    /// `sender` or lies further than `window` seconds from `now`; otherwise
    /// record it.
    fn check_and_advance(&self, sender: &str, timestamp: f64, now: f64, window: f64)
        -> Result<()>;

    /// Last accepted timestamp for `sender`.
    fn last_seen(&self, sender: &str) -> Option<f64>;

    /// Drop entries that can no longer affect a decision.
    ///
    /// Returns the number of evicted senders.
    fn prune(&self, now: f64, window: f64) -> usize;

    /// Number of tracked senders.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process replay store.
#[derive(Debug, Default)]
pub struct InMemoryReplayStore {
    last: Mutex<HashMap<String, f64>>,
    capacity: Option<usize>,
}

impl InMemoryReplayStore {
    /// Unbounded store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that prunes stale entries once `capacity` senders are tracked.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            last: Mutex::new(HashMap::new()),
            capacity: Some(capacity),
        }
    }
}

fn prune_stale(map: &mut HashMap<String, f64>, now: f64, window: f64) -> usize {
    // An entry older than the window guards nothing: any timestamp at or
    // below it is already stale.
    let before = map.len();
    map.retain(|_, last| now - *last <= window);
    before - map.len()
}

impl ReplayStore for InMemoryReplayStore {
    fn check_and_advance(
        &self,
        sender: &str,
        timestamp: f64,
        now: f64,
        window: f64,
    ) -> Result<()> {
        let mut last = self.last.lock()?;
        let replayed = last.get(sender).is_some_and(|seen| timestamp <= *seen);
        let stale = !timestamp.is_finite() || (now - timestamp).abs() > window;
        if replayed || stale {
            return Err(Error::ReplayDetected {
                sender: sender.to_string(),
                timestamp,
            });
        }

        if let Some(capacity) = self.capacity {
            if last.len() >= capacity && !last.contains_key(sender) {
                prune_stale(&mut last, now, window);
            }
        }
        last.insert(sender.to_string(), timestamp);
        Ok(())
    }

    fn last_seen(&self, sender: &str) -> Option<f64> {
        self.last.lock().ok()?.get(sender).copied()
    }

    fn prune(&self, now: f64, window: f64) -> usize {
        match self.last.lock() {
            Ok(mut last) => prune_stale(&mut last, now, window),
            Err(_) => 0,
        }
    }

    fn len(&self) -> usize {
        self.last.lock().map(|last| last.len()).unwrap_or(0)
    }
}
