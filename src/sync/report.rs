// src/sync/report.rs

//! Change reports produced by the sync engine.
//!
//! Every phase appends entries describing what it changed, what it left
//! alone, and which remote calls failed. A converged document produces a
//! report with no `*-registered`, `*-created`, `*-updated` or `*-deleted`
//! entries.

use crate::membership::Affiliation;

/// One observation made during a sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportEntry {
    UserRegistered {
        user_id: String,
    },
    /// Phase 5 found the account already present on the remote
    UserAlreadyExists {
        user_id: String,
    },
    UserDeleted {
        user_id: String,
    },
    RoomCreated {
        room_id: String,
    },
    RoomDeleted {
        room_id: String,
    },
    RosterUpdated {
        owner: String,
        contact: String,
    },
    RosterUnchanged {
        owner: String,
        contact: String,
    },
    AffiliationUpdated {
        room_id: String,
        user_id: String,
        affiliation: Affiliation,
    },
    AffiliationUnchanged {
        room_id: String,
        user_id: String,
    },
    BookmarksUpdated {
        user_id: String,
    },
    BookmarksUnchanged {
        user_id: String,
    },
    /// A remote call failed; the phase continued
    RemoteCallFailed {
        endpoint: String,
        detail: String,
    },
}

impl ReportEntry {
    /// Stable kind tag, used in summaries and convergence checks
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UserRegistered { .. } => "user-registered",
            Self::UserAlreadyExists { .. } => "user-already-exists",
            Self::UserDeleted { .. } => "user-deleted",
            Self::RoomCreated { .. } => "room-created",
            Self::RoomDeleted { .. } => "room-deleted",
            Self::RosterUpdated { .. } => "roster-updated",
            Self::RosterUnchanged { .. } => "roster-unchanged",
            Self::AffiliationUpdated { .. } => "affiliation-updated",
            Self::AffiliationUnchanged { .. } => "affiliation-unchanged",
            Self::BookmarksUpdated { .. } => "bookmarks-updated",
            Self::BookmarksUnchanged { .. } => "bookmarks-unchanged",
            Self::RemoteCallFailed { .. } => "remote-call-failed",
        }
    }

    /// True for entries that record an actual change on the remote
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            Self::UserRegistered { .. }
                | Self::UserDeleted { .. }
                | Self::RoomCreated { .. }
                | Self::RoomDeleted { .. }
                | Self::RosterUpdated { .. }
                | Self::AffiliationUpdated { .. }
                | Self::BookmarksUpdated { .. }
        )
    }

    /// Human-readable description
    pub fn description(&self) -> String {
        match self {
            Self::UserRegistered { user_id } => format!("registered user {}", user_id),
            Self::UserAlreadyExists { user_id } => {
                format!("user {} already registered, skipped", user_id)
            }
            Self::UserDeleted { user_id } => format!("deleted user {}", user_id),
            Self::RoomCreated { room_id } => format!("created room {}", room_id),
            Self::RoomDeleted { room_id } => format!("destroyed room {}", room_id),
            Self::RosterUpdated { owner, contact } => {
                format!("updated roster of {}: {}", owner, contact)
            }
            Self::RosterUnchanged { owner, contact } => {
                format!("roster of {} already lists {}", owner, contact)
            }
            Self::AffiliationUpdated {
                room_id,
                user_id,
                affiliation,
            } => format!("set {} to {} in {}", user_id, affiliation, room_id),
            Self::AffiliationUnchanged { room_id, user_id } => {
                format!("{} unchanged in {}", user_id, room_id)
            }
            Self::BookmarksUpdated { user_id } => format!("rewrote bookmarks of {}", user_id),
            Self::BookmarksUnchanged { user_id } => {
                format!("bookmarks of {} already current", user_id)
            }
            Self::RemoteCallFailed { endpoint, detail } => {
                format!("remote call {} failed: {}", endpoint, detail)
            }
        }
    }
}

/// Ordered list of everything one sync observed
#[derive(Debug, Clone, Default)]
pub struct ChangeReport {
    entries: Vec<ReportEntry>,
}

impl ChangeReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: ReportEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Count of entries that changed the remote
    pub fn change_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_change()).count()
    }

    /// Count of failed remote calls
    pub fn failure_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, ReportEntry::RemoteCallFailed { .. }))
            .count()
    }

    /// True when the sync found nothing to change and nothing failed
    pub fn is_converged(&self) -> bool {
        self.change_count() == 0 && self.failure_count() == 0
    }

    /// One line per entry, for logs and the bot's status reply
    pub fn summary(&self) -> String {
        if self.entries.is_empty() {
            return "nothing to do".to_string();
        }
        self.entries
            .iter()
            .map(|e| e.description())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        let entry = ReportEntry::UserRegistered {
            user_id: "alice".to_string(),
        };
        assert_eq!(entry.kind(), "user-registered");
        assert!(entry.is_change());

        let entry = ReportEntry::UserAlreadyExists {
            user_id: "admin".to_string(),
        };
        assert_eq!(entry.kind(), "user-already-exists");
        assert!(!entry.is_change());
    }

    #[test]
    fn test_convergence() {
        let mut report = ChangeReport::new();
        report.push(ReportEntry::RosterUnchanged {
            owner: "alice".to_string(),
            contact: "bob".to_string(),
        });
        assert!(report.is_converged());

        report.push(ReportEntry::RoomCreated {
            room_id: "officers".to_string(),
        });
        assert!(!report.is_converged());
        assert_eq!(report.change_count(), 1);
    }

    #[test]
    fn test_failures_break_convergence() {
        let mut report = ChangeReport::new();
        report.push(ReportEntry::RemoteCallFailed {
            endpoint: "register".to_string(),
            detail: "boom".to_string(),
        });
        assert!(!report.is_converged());
        assert_eq!(report.failure_count(), 1);
    }

    #[test]
    fn test_summary() {
        let mut report = ChangeReport::new();
        assert_eq!(report.summary(), "nothing to do");

        report.push(ReportEntry::UserDeleted {
            user_id: "alice".to_string(),
        });
        assert!(report.summary().contains("deleted user alice"));
    }
}
