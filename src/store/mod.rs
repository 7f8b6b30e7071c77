// src/store/mod.rs

//! On-disk document store.
//!
//! The store owns the db folder layout:
//!
//! - `userdb.json` - primary document
//! - `userdb.swp.json` - swap file used only during atomic writes
//! - `userdb.json.lock` - advisory lock file
//! - `backup/userdb<epochMillis>.json` - one backup per successful write
//!
//! Reads are lock-free: writers land content with an atomic rename, so a
//! concurrent reader sees either the previous or the new file, never a
//! partial one. There is no in-memory authoritative copy - every caller
//! reads from disk.

mod lockfile;

pub use lockfile::LockStatus;

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::document::Document;
use crate::error::{Error, Result};
use crate::schema;

/// Primary document file name
pub const PRIMARY_FILE: &str = "userdb.json";
/// Swap file used during atomic writes
pub const SWAP_FILE: &str = "userdb.swp.json";
/// Advisory lock file
pub const LOCK_FILE: &str = "userdb.json.lock";
/// Backup directory name
pub const BACKUP_DIR: &str = "backup";

/// How many timestamped backups to retain
const BACKUP_KEEP: usize = 50;

/// The persistent document store
pub struct ConfigStore {
    folder: PathBuf,
    /// SHA-256 of the last write this process performed; the watcher uses
    /// it to tell self-write echoes from out-of-band edits.
    last_written_sha: Mutex<Option<String>>,
}

impl ConfigStore {
    /// Open (and if necessary seed) the store at `folder`.
    ///
    /// A missing folder is created; a missing primary file is seeded from
    /// the compiled-in default document.
    pub fn open(folder: impl Into<PathBuf>) -> Result<Self> {
        let folder = folder.into();
        fs::create_dir_all(&folder)?;
        fs::create_dir_all(folder.join(BACKUP_DIR))?;

        let store = Self {
            folder,
            last_written_sha: Mutex::new(None),
        };

        if !store.primary_path().exists() {
            info!("seeding default document at {}", store.primary_path().display());
            let seed = Document::seed();
            let text = render_document(&seed)?;
            fs::write(store.primary_path(), text)?;
        }

        Ok(store)
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn primary_path(&self) -> PathBuf {
        self.folder.join(PRIMARY_FILE)
    }

    fn swap_path(&self) -> PathBuf {
        self.folder.join(SWAP_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.folder.join(LOCK_FILE)
    }

    fn backup_dir(&self) -> PathBuf {
        self.folder.join(BACKUP_DIR)
    }

    /// Read, validate, and return the document with its file SHA attached
    pub fn read(&self) -> Result<Document> {
        let bytes = fs::read(self.primary_path())?;
        let sha = sha256_hex(&bytes);

        let text = String::from_utf8(bytes).map_err(|e| Error::Format(e.to_string()))?;
        let mut doc = schema::parse_and_validate(&text)?;
        doc.file_sha256 = Some(sha);
        Ok(doc)
    }

    /// SHA-256 over the current file bytes
    pub fn current_sha(&self) -> Result<String> {
        let bytes = fs::read(self.primary_path())?;
        Ok(sha256_hex(&bytes))
    }

    /// Validate and persist a document atomically.
    ///
    /// The attached SHA is stripped, the previous primary file is backed
    /// up under a timestamped name, the new content lands in the swap file
    /// and is renamed over the primary. Returns the document with the
    /// freshly computed SHA attached.
    pub fn write(&self, doc: &Document) -> Result<Document> {
        let doc = doc.without_sha();
        schema::validate_document(&doc)?;

        self.backup_primary()?;

        let text = render_document(&doc)?;
        let swap = self.swap_path();
        fs::write(&swap, &text)?;
        move_file_atomic(&swap, &self.primary_path())?;

        let sha = sha256_hex(text.as_bytes());
        *self.last_written_sha.lock().expect("sha mutex poisoned") = Some(sha.clone());
        debug!(sha = %sha, "document persisted");

        if let Err(e) = self.prune_backups(BACKUP_KEEP) {
            warn!("backup pruning failed: {}", e);
        }

        let mut stored = doc;
        stored.file_sha256 = Some(sha);
        Ok(stored)
    }

    /// SHA-256 of the last write performed through this store, if any
    pub fn last_written_sha(&self) -> Option<String> {
        self.last_written_sha
            .lock()
            .expect("sha mutex poisoned")
            .clone()
    }

    /// Acquire the advisory lock for `reason`, expiring after `ttl`.
    /// Refused while another holder's lock is still valid.
    pub fn lock(&self, reason: &str, ttl: Duration) -> Result<()> {
        let status = lockfile::read_lock(&self.lock_path())?;
        if status.locked {
            return Err(Error::LockHeld {
                reason: status.reason.unwrap_or_else(|| "unknown".to_string()),
                expires_at: status.expires_at.unwrap_or_else(chrono::Utc::now),
            });
        }
        lockfile::write_lock(&self.lock_path(), reason, ttl)
    }

    /// Read the advisory lock; expired locks are cleared as a side effect
    pub fn read_lock(&self) -> Result<LockStatus> {
        lockfile::read_lock(&self.lock_path())
    }

    /// Clear the advisory lock
    pub fn clear_lock(&self) -> Result<()> {
        lockfile::clear_lock(&self.lock_path())
    }

    fn backup_primary(&self) -> Result<()> {
        let primary = self.primary_path();
        if !primary.exists() {
            return Ok(());
        }

        let name = format!("userdb{}.json", chrono::Utc::now().timestamp_millis());
        let target = self.backup_dir().join(name);
        fs::copy(&primary, &target)?;
        Ok(())
    }

    /// Delete all but the newest `keep` backups; returns how many were removed
    pub fn prune_backups(&self, keep: usize) -> Result<usize> {
        let mut backups: Vec<PathBuf> = fs::read_dir(self.backup_dir())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("userdb") && n.ends_with(".json"))
                    .unwrap_or(false)
            })
            .collect();

        if backups.len() <= keep {
            return Ok(0);
        }

        // Timestamped names sort chronologically
        backups.sort();
        let excess = backups.len() - keep;
        for path in &backups[..excess] {
            fs::remove_file(path)?;
        }
        Ok(excess)
    }
}

/// Canonical pretty-printed serialization with a trailing newline
fn render_document(doc: &Document) -> Result<String> {
    let mut text =
        serde_json::to_string_pretty(doc).map_err(|e| Error::Format(e.to_string()))?;
    text.push('\n');
    Ok(text)
}

/// Hex-encoded SHA-256
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Move a file atomically, falling back to copy+fsync+delete when source
/// and destination sit on different filesystems (EXDEV). The fallback
/// loses atomicity only under a crash, not under concurrent writers - the
/// advisory lock already serializes those.
fn move_file_atomic(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
            debug!(
                "cross-filesystem move ({} -> {}), using copy fallback",
                src.display(),
                dst.display()
            );

            fs::copy(src, dst)?;

            let file = File::open(dst)?;
            file.sync_all()?;
            drop(file);

            // fsync the parent directory so the entry itself is durable;
            // not all filesystems support this, so errors are ignored.
            if let Some(parent) = dst.parent() {
                if let Ok(dir) = File::open(parent) {
                    let _ = dir.sync_all();
                }
            }

            fs::remove_file(src)?;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Member;
    use crate::groupkey::GroupKey;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, ConfigStore) {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::open(dir.path().join("db")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_open_seeds_default_document() {
        let (_dir, store) = open_store();
        assert!(store.primary_path().exists());

        let doc = store.read().unwrap();
        assert!(doc.groups.contains_key(&GroupKey::owner()));
        assert!(doc.groups.contains_key(&GroupKey::bot()));
        assert!(doc.members.is_empty());
    }

    #[test]
    fn test_read_attaches_sha() {
        let (_dir, store) = open_store();
        let doc = store.read().unwrap();
        let sha = doc.file_sha256.expect("sha attached");
        assert_eq!(sha.len(), 64);
        assert_eq!(sha, store.current_sha().unwrap());
    }

    #[test]
    fn test_write_round_trip() {
        let (_dir, store) = open_store();
        let mut doc = store.read().unwrap();
        doc.members.push(Member {
            name: "Alice".to_string(),
            user_id: "alice".to_string(),
            groups: [GroupKey::owner()].into_iter().collect(),
        });

        let stored = store.write(&doc).unwrap();
        assert!(stored.file_sha256.is_some());

        let back = store.read().unwrap();
        assert_eq!(back.without_sha(), doc.without_sha());
        assert_eq!(back.file_sha256, stored.file_sha256);
    }

    #[test]
    fn test_write_rejects_invalid_document() {
        let (_dir, store) = open_store();
        let mut doc = store.read().unwrap();
        doc.groups.clear();

        assert!(matches!(store.write(&doc), Err(Error::Validation(_))));
        // Primary unchanged
        assert!(store.read().is_ok());
    }

    #[test]
    fn test_write_creates_backup() {
        let (_dir, store) = open_store();
        let doc = store.read().unwrap();
        store.write(&doc).unwrap();

        let backups: Vec<_> = fs::read_dir(store.backup_dir()).unwrap().collect();
        assert_eq!(backups.len(), 1);
    }

    #[test]
    fn test_last_written_sha_tracks_writes() {
        let (_dir, store) = open_store();
        assert!(store.last_written_sha().is_none());

        let doc = store.read().unwrap();
        let stored = store.write(&doc).unwrap();
        assert_eq!(store.last_written_sha(), stored.file_sha256);
        assert_eq!(store.last_written_sha().unwrap(), store.current_sha().unwrap());
    }

    #[test]
    fn test_unparsable_primary_is_format_error() {
        let (_dir, store) = open_store();
        fs::write(store.primary_path(), "{ broken").unwrap();

        assert!(matches!(store.read(), Err(Error::Format(_))));
    }

    #[test]
    fn test_prune_backups() {
        let (_dir, store) = open_store();
        for i in 0..5 {
            let name = format!("userdb{}.json", 1_000 + i);
            fs::write(store.backup_dir().join(name), "{}").unwrap();
        }

        let removed = store.prune_backups(2).unwrap();
        assert_eq!(removed, 3);

        let mut left: Vec<String> = fs::read_dir(store.backup_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left, vec!["userdb1003.json", "userdb1004.json"]);
    }

    #[test]
    fn test_lock_cycle() {
        let (_dir, store) = open_store();
        store.lock("testing", Duration::from_secs(30)).unwrap();

        let status = store.read_lock().unwrap();
        assert!(status.locked);
        assert_eq!(status.reason.as_deref(), Some("testing"));

        store.clear_lock().unwrap();
        assert!(!store.read_lock().unwrap().locked);
    }

    #[test]
    fn test_lock_refused_while_held() {
        let (_dir, store) = open_store();
        store.lock("first", Duration::from_secs(30)).unwrap();

        match store.lock("second", Duration::from_secs(30)) {
            Err(Error::LockHeld { reason, .. }) => assert_eq!(reason, "first"),
            other => panic!("expected LockHeld, got {:?}", other),
        }

        // The original lock survives the refused attempt
        let status = store.read_lock().unwrap();
        assert_eq!(status.reason.as_deref(), Some("first"));
    }
}
