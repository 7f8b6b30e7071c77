// src/watcher.rs

//! Watches the config folder for out-of-band edits.
//!
//! Operators may edit the primary document directly while the daemon is
//! running. The watcher polls the file at a short interval and invokes a
//! refresh sync when the content actually changed:
//!
//! 1. If the advisory lock is held, ignore - we are the writer.
//! 2. If the current SHA equals the SHA of the engine's last write,
//!    ignore - self-write echo or a no-op edit.
//! 3. Otherwise call `swap_state("filesystem change", identity)`.
//!
//! The SHA comparison is what breaks the feedback loop: the sync's own
//! write would otherwise look like another edit and trigger an endless
//! chain of refresh syncs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::mutator::Mutator;
use crate::store::ConfigStore;

/// What one poll tick decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchTick {
    /// Lock held; a mutation is in flight
    LockHeld,
    /// File content matches the engine's last write
    Unchanged,
    /// Out-of-band edit detected, refresh sync invoked
    Synced,
    /// The file could not be read this tick
    Unreadable,
}

/// Background poll loop over the primary document
pub struct FileWatcher {
    stop: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FileWatcher {
    /// Spawn the watcher thread
    pub fn spawn(store: Arc<ConfigStore>, mutator: Arc<Mutator>, interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let paused = Arc::new(AtomicBool::new(false));

        let thread_stop = stop.clone();
        let thread_paused = paused.clone();
        let handle = thread::Builder::new()
            .name("config-watcher".to_string())
            .spawn(move || {
                info!("config watcher started");
                while !thread_stop.load(Ordering::Relaxed) {
                    if !thread_paused.load(Ordering::Relaxed) {
                        check_once(&store, &mutator);
                    }
                    thread::sleep(interval);
                }
                info!("config watcher stopped");
            })
            .expect("failed to spawn watcher thread");

        Self {
            stop,
            paused,
            handle: Some(handle),
        }
    }

    /// Stop observing without tearing the thread down
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    /// Resume observing
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    /// Stop the thread and wait for it to exit
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One poll tick; extracted so the decision logic is testable without a
/// thread
pub fn check_once(store: &ConfigStore, mutator: &Mutator) -> WatchTick {
    match store.read_lock() {
        Ok(status) if status.locked => {
            debug!("watcher: lock held, skipping");
            return WatchTick::LockHeld;
        }
        Ok(_) => {}
        Err(e) => {
            warn!("watcher: cannot read lock: {}", e);
            return WatchTick::Unreadable;
        }
    }

    let current = match store.current_sha() {
        Ok(sha) => sha,
        Err(e) => {
            warn!("watcher: cannot hash document: {}", e);
            return WatchTick::Unreadable;
        }
    };

    if store.last_written_sha().as_deref() == Some(current.as_str()) {
        return WatchTick::Unchanged;
    }

    info!("out-of-band document edit detected");
    let outcome = mutator.swap_state("filesystem change", |doc| doc);
    if !outcome.is_applied() {
        warn!("refresh sync after filesystem change was not applied");
    }
    WatchTick::Synced
}
