// src/mutator.rs

//! The swap-state transaction.
//!
//! Every mutation source - HTTP handlers, bot commands, the file watcher,
//! startup - funnels through [`Mutator::swap_state`]. The advisory lock
//! file is the only mutual-exclusion primitive; it is taken after
//! validation succeeds and released on every exit path, including panics,
//! via a drop guard. Readers stay lock-free throughout.
//!
//! # Transaction Lifecycle
//!
//! ```text
//! read lock -> read document -> apply f -> validate -> lock -> sync -> write -> clear lock
//! ```

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::document::Document;
use crate::error::Error;
use crate::schema::{self, ValidationErrors};
use crate::store::ConfigStore;
use crate::sync::{ChangeReport, SyncEngine};

/// Result of one swap-state transaction
#[derive(Debug)]
pub enum SwapOutcome {
    /// The sync ran and the effective document was persisted
    Applied {
        state: Document,
        report: ChangeReport,
    },
    /// The mutation was rejected before any side effect
    Rejected {
        errors: Vec<String>,
        /// Structured validation failures, when that is what rejected it
        validation: Option<ValidationErrors>,
    },
    /// Another mutation holds the lock; no side effects
    Locked {
        reason: String,
        expires_at: chrono::DateTime<chrono::Utc>,
    },
}

impl SwapOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            errors: vec![message.into()],
            validation: None,
        }
    }
}

/// Serializes all document mutations through the lock file and the sync
/// engine
pub struct Mutator {
    store: Arc<ConfigStore>,
    engine: SyncEngine,
    /// Lock time-to-live; bounds the damage from a crashed holder
    sync_timeout: Duration,
}

impl Mutator {
    pub fn new(store: Arc<ConfigStore>, engine: SyncEngine, sync_timeout: Duration) -> Self {
        Self {
            store,
            engine,
            sync_timeout,
        }
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// Apply `f` to the current document, sync the result against the
    /// remote, and persist the effective document.
    ///
    /// `f` must be pure; pass the identity function for a refresh sync.
    pub fn swap_state<F>(&self, reason: &str, f: F) -> SwapOutcome
    where
        F: FnOnce(Document) -> Document,
    {
        // 1. Consult the lock before doing anything
        match self.store.read_lock() {
            Ok(status) if status.locked => {
                let lock_reason = status.reason.unwrap_or_else(|| "unknown".to_string());
                let expires_at = status.expires_at.unwrap_or_else(chrono::Utc::now);
                info!(held_for = %lock_reason, "mutation refused, lock held");
                return SwapOutcome::Locked {
                    reason: lock_reason,
                    expires_at,
                };
            }
            Ok(_) => {}
            Err(e) => return SwapOutcome::rejected(e.to_string()),
        }

        // 2. Read the current document
        let current = match self.store.read() {
            Ok(doc) => doc,
            Err(e) => {
                error!("cannot read document: {}", e);
                return SwapOutcome::rejected(e.to_string());
            }
        };

        // 3. Compute the new document
        let new = f(current);

        // 4. Validate before taking the lock
        if let Err(validation) = schema::validate_document(&new) {
            return SwapOutcome::Rejected {
                errors: validation.messages(),
                validation: Some(validation),
            };
        }

        // 5. Acquire the lock for the duration of the sync; another caller
        // may have won the race since step 1
        match self.store.lock(reason, self.sync_timeout) {
            Ok(()) => {}
            Err(Error::LockHeld { reason, expires_at }) => {
                return SwapOutcome::Locked { reason, expires_at };
            }
            Err(e) => return SwapOutcome::rejected(e.to_string()),
        }
        let _guard = LockGuard { store: &self.store };

        // 6. Converge the remote
        let outcome = match self.engine.sync_state(new) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("sync failed: {}", e);
                return SwapOutcome::rejected(e.to_string());
            }
        };

        // 7. Persist the effective document
        let stored = match self.store.write(&outcome.state) {
            Ok(doc) => doc,
            Err(e) => {
                error!("cannot persist effective document: {}", e);
                return SwapOutcome::rejected(e.to_string());
            }
        };

        info!(reason, changes = outcome.report.change_count(), "state swapped");

        // 8. The guard clears the lock on return
        SwapOutcome::Applied {
            state: stored,
            report: outcome.report,
        }
    }

    /// Change a managed user's password on the remote.
    ///
    /// Passwords never live in the document, so this bypasses the sync
    /// engine and the store entirely apart from the managed-id check.
    pub fn update_password(&self, user_id: &str, new_password: &str) -> crate::Result<()> {
        let doc = self.store.read()?;
        if !doc.tracking.managed_members.contains(user_id) {
            return Err(Error::UnmanagedUser(user_id.to_string()));
        }

        self.engine.remote().change_password(
            user_id,
            &self.engine.config().xmpp_domain,
            new_password,
        )
    }
}

/// Clears the lock on every exit path, panics included
struct LockGuard<'a> {
    store: &'a ConfigStore,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.store.clear_lock() {
            warn!("failed to clear lock: {}", e);
        }
    }
}
