// src/document.rs

//! The configuration document.
//!
//! Operators describe the desired community state - groups, members, chat
//! rooms and their access policy - in one persistent document. The sync
//! engine converges the live ejabberd server toward it.
//!
//! # Example userdb.json
//!
//! ```json
//! {
//!   "groups": {
//!     "group/owner": "Owner",
//!     "group/bot": "Bot",
//!     "group/member": "Member"
//!   },
//!   "rooms": [
//!     {
//!       "name": "Officers",
//!       "room-id": "officers",
//!       "members": ["group/owner"],
//!       "admins": ["group/owner"],
//!       "only-admins-can-speak?": false
//!     }
//!   ],
//!   "members": [
//!     { "name": "Alice", "user-id": "alice", "groups": ["group/owner"] }
//!   ],
//!   "do-not-edit-state": {
//!     "managed-members": ["alice"],
//!     "managed-rooms": ["officers"],
//!     "managed-groups": ["group/bot", "group/member", "group/owner"]
//!   }
//! }
//! ```
//!
//! `rooms` and `members` are ordered sequences (insertion order matters to
//! operators); the group sets inside them are order-insensitive sets. The
//! `do-not-edit-state` section is rewritten by the engine on every
//! successful sync and is the engine's only memory of what it manages.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::groupkey::GroupKey;

/// Fixed user id of the virtual admin-bot member. The bot is ghost-included
/// at the start of every sync and ghost-removed before persistence, so this
/// id never appears in the operator-visible member list.
pub const BOT_USER_ID: &str = "admin";

/// The configuration document: four operator-facing sections plus the
/// engine-maintained tracking section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Group key -> human-readable label
    pub groups: BTreeMap<GroupKey, String>,

    /// Managed rooms, in operator order
    #[serde(default)]
    pub rooms: Vec<Room>,

    /// Managed members, in operator order
    #[serde(default)]
    pub members: Vec<Member>,

    /// Engine-maintained tracking; operators never edit this
    #[serde(rename = "do-not-edit-state", default)]
    pub tracking: Tracking,

    /// SHA-256 of the file bytes this document was read from. Attached by
    /// the config store on read, stripped before write.
    #[serde(rename = "_file-sha256", default, skip_serializing_if = "Option::is_none")]
    pub file_sha256: Option<String>,
}

/// A managed chat room and its access policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    /// Operator-facing display name, unique across rooms
    pub name: String,

    /// Stable server identifier, assigned by the engine on first sync and
    /// treated as read-only by operators
    #[serde(rename = "room-id", default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,

    /// Groups whose members hold the `member` affiliation
    pub members: BTreeSet<GroupKey>,

    /// Groups whose members hold the `admin` affiliation
    pub admins: BTreeSet<GroupKey>,

    /// Moderated room: only admins may speak
    #[serde(rename = "only-admins-can-speak?", default)]
    pub only_admins_can_speak: bool,
}

/// A managed user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Display name, unique across members
    pub name: String,

    /// Server account localpart, unique across members
    #[serde(rename = "user-id")]
    pub user_id: String,

    /// Groups this member belongs to
    pub groups: BTreeSet<GroupKey>,
}

/// Engine-maintained tracking: the last-persisted set of managed
/// identifiers plus the admin bot's credentials.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tracking {
    #[serde(rename = "managed-members", default)]
    pub managed_members: BTreeSet<String>,

    #[serde(rename = "managed-rooms", default)]
    pub managed_rooms: BTreeSet<String>,

    #[serde(rename = "managed-groups", default)]
    pub managed_groups: BTreeSet<GroupKey>,

    #[serde(
        rename = "admin-credentials",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub admin_credentials: Option<BotCredentials>,
}

/// Stored credentials of the admin bot's server account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotCredentials {
    pub username: String,
    pub password: String,
}

impl Document {
    /// The compiled-in default document used to seed a fresh db folder
    pub fn seed() -> Self {
        let mut groups = BTreeMap::new();
        groups.insert(GroupKey::owner(), "Owner".to_string());
        groups.insert(GroupKey::bot(), "Bot".to_string());
        groups.insert(GroupKey::new("group", "member"), "Member".to_string());

        Self {
            groups,
            rooms: Vec::new(),
            members: Vec::new(),
            tracking: Tracking::default(),
            file_sha256: None,
        }
    }

    /// All member user-ids, in document order
    pub fn member_ids(&self) -> BTreeSet<String> {
        self.members.iter().map(|m| m.user_id.clone()).collect()
    }

    /// All assigned room-ids
    pub fn room_ids(&self) -> BTreeSet<String> {
        self.rooms
            .iter()
            .filter_map(|r| r.room_id.clone())
            .collect()
    }

    /// All defined group keys
    pub fn group_keys(&self) -> BTreeSet<GroupKey> {
        self.groups.keys().cloned().collect()
    }

    /// Look up a member by user-id
    pub fn find_member(&self, user_id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.user_id == user_id)
    }

    /// Return a copy with the attached file SHA removed
    pub fn without_sha(&self) -> Self {
        let mut doc = self.clone();
        doc.file_sha256 = None;
        doc
    }

    /// The virtual admin-bot member ghost-included during syncs
    pub fn ghost_bot_member() -> Member {
        let mut groups = BTreeSet::new();
        groups.insert(GroupKey::bot());
        Member {
            name: "Admin Bot".to_string(),
            user_id: BOT_USER_ID.to_string(),
            groups,
        }
    }
}

/// Check an entity id (user-id or room-id): lowercase ASCII letters, digits
/// and hyphens, non-empty, no leading or trailing hyphen.
pub fn is_valid_entity_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('-')
        && !id.ends_with('-')
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Derive a room-id candidate from a display name via kebab-case
/// normalization: lowercase, runs of non-alphanumerics collapse to one
/// hyphen, leading/trailing hyphens trimmed.
pub fn kebab_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_hyphen = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document() -> Document {
        let mut doc = Document::seed();
        doc.members.push(Member {
            name: "Alice".to_string(),
            user_id: "alice".to_string(),
            groups: [GroupKey::owner()].into_iter().collect(),
        });
        doc.rooms.push(Room {
            name: "Officers".to_string(),
            room_id: Some("officers".to_string()),
            members: [GroupKey::owner()].into_iter().collect(),
            admins: [GroupKey::owner()].into_iter().collect(),
            only_admins_can_speak: false,
        });
        doc
    }

    #[test]
    fn test_wire_names() {
        let doc = sample_document();
        let json = serde_json::to_string_pretty(&doc).unwrap();

        assert!(json.contains("\"room-id\""));
        assert!(json.contains("\"user-id\""));
        assert!(json.contains("\"only-admins-can-speak?\""));
        assert!(json.contains("\"do-not-edit-state\""));
        assert!(json.contains("\"group/owner\""));
        // No SHA attached, so the reserved key must not serialize
        assert!(!json.contains("_file-sha256"));
    }

    #[test]
    fn test_round_trip_preserves_order() {
        let mut doc = Document::seed();
        for name in ["Zeta", "Alpha", "Midway"] {
            doc.members.push(Member {
                name: name.to_string(),
                user_id: kebab_case(name),
                groups: [GroupKey::owner()].into_iter().collect(),
            });
        }

        let json = serde_json::to_string_pretty(&doc).unwrap();
        let back: Document = serde_json::from_str(&json).unwrap();
        let names: Vec<&str> = back.members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Zeta", "Alpha", "Midway"]);
    }

    #[test]
    fn test_entity_id_rules() {
        assert!(is_valid_entity_id("alice"));
        assert!(is_valid_entity_id("room-2"));
        assert!(!is_valid_entity_id(""));
        assert!(!is_valid_entity_id("-edge"));
        assert!(!is_valid_entity_id("edge-"));
        assert!(!is_valid_entity_id("Upper"));
        assert!(!is_valid_entity_id("with space"));
    }

    #[test]
    fn test_kebab_case() {
        assert_eq!(kebab_case("Officers"), "officers");
        assert_eq!(kebab_case("Senior Officers"), "senior-officers");
        assert_eq!(kebab_case("  Q&A -- Lounge  "), "q-a-lounge");
        assert_eq!(kebab_case("42 Things"), "42-things");
        assert_eq!(kebab_case("!!!"), "");
    }

    #[test]
    fn test_ghost_bot_member() {
        let bot = Document::ghost_bot_member();
        assert_eq!(bot.user_id, BOT_USER_ID);
        assert!(bot.groups.contains(&GroupKey::bot()));
    }
}
