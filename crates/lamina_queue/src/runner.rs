//! Background thread driving the log puller.
//!
//! Wakes on the coordination watch registered by each pull, with a poll
//! interval as fallback, and backs off briefly after a failed pull so a
//! flapping coordination service is not hammered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lamina_coord::{CoordClient, WatchEvent};

use crate::queue::ReplicationQueue;

const PULL_FAILURE_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy)]
pub struct PullerConfig {
    /// Upper bound between pulls when no watch fires.
    pub poll_interval: Duration,
}

impl Default for PullerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
        }
    }
}

pub struct PullerHandle {
    stop: Arc<AtomicBool>,
    watch: WatchEvent,
    thread: Option<thread::JoinHandle<()>>,
}

impl PullerHandle {
    /// Ask the puller to stop and wait for the thread to exit.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.watch.set();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    /// Nudge the puller without waiting for the watch or poll interval.
    pub fn wakeup(&self) {
        self.watch.set();
    }
}

impl Drop for PullerHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.watch.set();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Spawn the queue-pull loop on a dedicated thread.
pub fn spawn_puller(
    queue: Arc<ReplicationQueue>,
    coord: Arc<dyn CoordClient>,
    config: PullerConfig,
) -> anyhow::Result<PullerHandle> {
    let stop = Arc::new(AtomicBool::new(false));
    let watch = WatchEvent::new();

    let thread_stop = stop.clone();
    let thread_watch = watch.clone();
    let handle = thread::Builder::new()
        .name("queue-pull".to_string())
        .spawn(move || {
            // First pull runs immediately; afterwards the loop sleeps until
            // the watch fires or the poll interval elapses.
            loop {
                if thread_stop.load(Ordering::Relaxed) {
                    return;
                }
                match queue.pull_logs_to_queue(coord.as_ref(), Some(&thread_watch)) {
                    Ok(pulled) => {
                        if pulled {
                            tracing::debug!(replica = %queue.replica_path(), "pulled new log entries");
                        }
                    }
                    Err(err) => {
                        tracing::warn!(
                            error = ?err,
                            replica = %queue.replica_path(),
                            "queue pull failed"
                        );
                        thread::sleep(PULL_FAILURE_BACKOFF);
                    }
                }
                thread_watch.wait_timeout(config.poll_interval);
            }
        })
        .map_err(|err| anyhow::anyhow!("spawn queue-pull thread: {err}"))?;

    Ok(PullerHandle {
        stop,
        watch,
        thread: Some(handle),
    })
}
