// src/store/lockfile.rs

//! Advisory lock file for document mutations.
//!
//! The lock is a sibling text file with three lines: the reason, the
//! absolute expiry in epoch milliseconds, and a human-readable expiry.
//! It is advisory - callers consult it before mutating and must clear it
//! on every exit path. The absolute expiry bounds the damage from a
//! crashed holder: an expired lock is cleared by the next read.

use chrono::{DateTime, TimeZone, Utc};
use std::fs;
use std::path::Path;

use crate::error::Result;

/// Observed state of the advisory lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockStatus {
    pub locked: bool,
    pub reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl LockStatus {
    fn unlocked() -> Self {
        Self {
            locked: false,
            reason: None,
            expires_at: None,
        }
    }
}

/// Write the lock file with the given reason and time-to-live
pub(crate) fn write_lock(path: &Path, reason: &str, ttl: std::time::Duration) -> Result<()> {
    let expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default();
    let content = format!(
        "{}\n{}\n{}\n",
        reason,
        expires_at.timestamp_millis(),
        expires_at.to_rfc3339()
    );
    fs::write(path, content)?;
    Ok(())
}

/// Read the lock file. A missing file or a past expiry means unlocked;
/// an expired file is removed as a side effect.
pub(crate) fn read_lock(path: &Path) -> Result<LockStatus> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(LockStatus::unlocked());
        }
        Err(e) => return Err(e.into()),
    };

    let mut lines = content.lines();
    let reason = lines.next().unwrap_or("unknown").to_string();
    let expires_at = lines
        .next()
        .and_then(|l| l.trim().parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single());

    match expires_at {
        Some(expiry) if expiry > Utc::now() => Ok(LockStatus {
            locked: true,
            reason: Some(reason),
            expires_at: Some(expiry),
        }),
        _ => {
            // Expired or malformed: clear it so a crashed holder cannot
            // wedge the store forever.
            clear_lock(path)?;
            Ok(LockStatus::unlocked())
        }
    }
}

/// Remove the lock file; a missing file is not an error
pub(crate) fn clear_lock(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_missing_lock_is_unlocked() {
        let dir = TempDir::new().unwrap();
        let status = read_lock(&dir.path().join("userdb.json.lock")).unwrap();
        assert!(!status.locked);
    }

    #[test]
    fn test_lock_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("userdb.json.lock");

        write_lock(&path, "sync", Duration::from_secs(60)).unwrap();
        let status = read_lock(&path).unwrap();
        assert!(status.locked);
        assert_eq!(status.reason.as_deref(), Some("sync"));
        assert!(status.expires_at.unwrap() > Utc::now());

        clear_lock(&path).unwrap();
        assert!(!read_lock(&path).unwrap().locked);
    }

    #[test]
    fn test_expired_lock_cleared_on_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("userdb.json.lock");

        let past = Utc::now() - chrono::Duration::seconds(5);
        fs::write(
            &path,
            format!("stale\n{}\n{}\n", past.timestamp_millis(), past.to_rfc3339()),
        )
        .unwrap();

        let status = read_lock(&path).unwrap();
        assert!(!status.locked);
        assert!(!path.exists());
    }

    #[test]
    fn test_malformed_lock_cleared() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("userdb.json.lock");
        fs::write(&path, "garbage with no expiry").unwrap();

        assert!(!read_lock(&path).unwrap().locked);
        assert!(!path.exists());
    }

    #[test]
    fn test_clear_missing_lock_is_ok() {
        let dir = TempDir::new().unwrap();
        assert!(clear_lock(&dir.path().join("nope.lock")).is_ok());
    }
}
