//! Coordination-service client surface shared by lamina replicas.
//!
//! Models the slice of a ZooKeeper-like namespace the replication machinery
//! needs: persistent and sequential nodes, atomic multi-writes, batched
//! reads, and level-triggered watch events. Production deployments plug a
//! real client in behind [`CoordClient`]; tests and single-process setups
//! use the in-memory implementation from [`memory`].

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

pub mod memory;

/// Error codes surfaced by a coordination service.
///
/// Callers branch on these the way ZooKeeper callers branch on return
/// codes, so they are a typed enum rather than an opaque error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CoordError {
    #[error("no node")]
    NoNode,
    #[error("node already exists")]
    NodeExists,
    #[error("node has children")]
    NotEmpty,
    #[error("version mismatch")]
    BadVersion,
    #[error("connection to coordination service lost")]
    ConnectionLoss,
    #[error("malformed request")]
    BadArguments,
}

pub type CoordResult<T> = Result<T, CoordError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    /// Appends a 10-digit zero-padded sequence number to the requested path.
    PersistentSequential,
    /// Removed when the owning session ends.
    Ephemeral,
}

/// One operation inside an atomic multi-write.
#[derive(Debug, Clone)]
pub enum CoordRequest {
    Create {
        path: String,
        data: Vec<u8>,
        mode: CreateMode,
    },
    Set {
        path: String,
        data: Vec<u8>,
    },
    Remove {
        path: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordResponse {
    /// Carries the final path, including any assigned sequence suffix.
    Created { path: String },
    Set,
    Removed,
}

/// Level-triggered notification handle registered alongside reads.
///
/// A watch fires at most the state transition "something under the watched
/// node changed"; consumers re-read and re-register, they never receive the
/// change itself.
#[derive(Clone, Default)]
pub struct WatchEvent {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl WatchEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the event and wake all waiters.
    pub fn set(&self) {
        let (flag, cv) = &*self.inner;
        *flag.lock().unwrap() = true;
        cv.notify_all();
    }

    /// Consume the signal if present.
    pub fn take(&self) -> bool {
        let (flag, _) = &*self.inner;
        std::mem::take(&mut *flag.lock().unwrap())
    }

    /// Block until the event fires or `timeout` elapses; consumes the signal.
    /// Returns whether the event fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cv) = &*self.inner;
        let mut fired = flag.lock().unwrap();
        let deadline = std::time::Instant::now() + timeout;
        while !*fired {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, res) = cv.wait_timeout(fired, deadline - now).unwrap();
            fired = guard;
            if res.timed_out() && !*fired {
                return false;
            }
        }
        *fired = false;
        true
    }
}

impl std::fmt::Debug for WatchEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchEvent")
            .field("set", &*self.inner.0.lock().unwrap())
            .finish()
    }
}

/// Synchronous client for a coordination-service namespace.
///
/// All paths are absolute, `/`-separated. `get_many` is the batched analog
/// of issuing many async reads and awaiting them together; implementations
/// are free to pipeline.
pub trait CoordClient: Send + Sync {
    fn get(&self, path: &str) -> CoordResult<Vec<u8>>;

    /// `Ok(None)` when the node does not exist; other failures propagate.
    fn try_get(&self, path: &str) -> CoordResult<Option<Vec<u8>>>;

    /// Batched read; missing nodes yield `None` in their slot.
    fn get_many(&self, paths: &[String]) -> CoordResult<Vec<Option<Vec<u8>>>>;

    /// Direct child names (not full paths), in unspecified order.
    fn get_children(&self, path: &str) -> CoordResult<Vec<String>>;

    /// As `get_children`, additionally registering `watch` to fire on the
    /// next change to the node's child list.
    fn get_children_watch(&self, path: &str, watch: &WatchEvent) -> CoordResult<Vec<String>>;

    /// Returns the created path (with sequence suffix for sequential nodes).
    fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> CoordResult<String>;

    fn set(&self, path: &str, data: &[u8]) -> CoordResult<()>;

    /// `Ok(false)` when the node was already gone.
    fn try_remove(&self, path: &str) -> CoordResult<bool>;

    /// Atomic multi-write: either every request applies or none does.
    fn multi(&self, requests: &[CoordRequest]) -> CoordResult<Vec<CoordResponse>>;
}

/// `get_children`, treating a missing node as an empty child list.
pub fn children_or_empty(client: &dyn CoordClient, path: &str) -> CoordResult<Vec<String>> {
    match client.get_children(path) {
        Ok(children) => Ok(children),
        Err(CoordError::NoNode) => Ok(Vec::new()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn watch_event_set_take() {
        let ev = WatchEvent::new();
        assert!(!ev.take());
        ev.set();
        assert!(ev.take());
        assert!(!ev.take());
    }

    #[test]
    fn watch_event_wait_timeout_expires() {
        let ev = WatchEvent::new();
        let start = Instant::now();
        assert!(!ev.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn watch_event_wakes_waiter() {
        let ev = WatchEvent::new();
        let waiter = ev.clone();
        let handle = std::thread::spawn(move || waiter.wait_timeout(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(10));
        ev.set();
        assert!(handle.join().unwrap());
    }
}
