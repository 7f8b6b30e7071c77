// src/schema.rs

//! Schema validation for the configuration document.
//!
//! Validation runs in two passes. The structural pass works on raw JSON:
//! closed records reject unknown keys and suggest the closest legal key
//! for likely misspellings. The semantic pass works on the typed document:
//! mandatory groups, uniqueness, id lexical rules, and group
//! cross-references.
//!
//! Groups are validated first; if they fail, rooms and members are not
//! validated at all - their group references could not be resolved against
//! a broken group table, so the group errors are returned alone.

use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

use crate::document::{is_valid_entity_id, Document, BOT_USER_ID};
use crate::error::Error;
use crate::groupkey::GroupKey;

/// One humanized validation failure, keyed by document path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Path into the document, e.g. `members[1].groups`
    pub path: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// The document was rejected by the schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors {
    issues: Vec<ValidationIssue>,
}

impl ValidationErrors {
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    pub fn messages(&self) -> Vec<String> {
        self.issues.iter().map(|i| i.to_string()).collect()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "document failed validation: {}", self.messages().join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Legal top-level keys. `_file-sha256` is reserved for the config store.
const DOCUMENT_KEYS: &[&str] = &["groups", "rooms", "members", "do-not-edit-state", "_file-sha256"];
const ROOM_KEYS: &[&str] = &["name", "room-id", "members", "admins", "only-admins-can-speak?"];
const MEMBER_KEYS: &[&str] = &["name", "user-id", "groups"];
const TRACKING_KEYS: &[&str] = &[
    "managed-members",
    "managed-rooms",
    "managed-groups",
    "admin-credentials",
];
const CREDENTIAL_KEYS: &[&str] = &["username", "password"];

/// Parse raw document text and run both validation passes.
///
/// Unparsable text is a `Format` error; schema rejections are
/// `Validation` errors carrying the full issue list.
pub fn parse_and_validate(text: &str) -> crate::Result<Document> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| Error::Format(e.to_string()))?;

    let mut issues = Vec::new();
    check_structure(&value, &mut issues);
    if !issues.is_empty() {
        return Err(ValidationErrors::new(issues).into());
    }

    let doc: Document =
        serde_json::from_value(value).map_err(|e| Error::Format(e.to_string()))?;

    validate_document(&doc)?;
    Ok(doc)
}

/// Semantic validation of a typed document.
pub fn validate_document(doc: &Document) -> Result<(), ValidationErrors> {
    let mut issues = Vec::new();

    validate_groups(doc, &mut issues);
    if !issues.is_empty() {
        // Rooms and members cross-reference the group table; with a broken
        // table their errors would be noise.
        return Err(ValidationErrors::new(issues));
    }

    let defined = doc.group_keys();
    validate_rooms(doc, &defined, &mut issues);
    validate_members(doc, &defined, &mut issues);

    if issues.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors::new(issues))
    }
}

fn validate_groups(doc: &Document, issues: &mut Vec<ValidationIssue>) {
    for mandatory in [GroupKey::owner(), GroupKey::bot()] {
        if !doc.groups.contains_key(&mandatory) {
            issues.push(ValidationIssue {
                path: "groups".to_string(),
                message: format!("missing mandatory group \"{}\"", mandatory),
            });
        }
    }

    let mut seen_labels: BTreeSet<&str> = BTreeSet::new();
    for (key, label) in &doc.groups {
        if label.trim().is_empty() {
            issues.push(ValidationIssue {
                path: format!("groups[{}]", key),
                message: "label must not be blank".to_string(),
            });
        } else if !seen_labels.insert(label.as_str()) {
            issues.push(ValidationIssue {
                path: format!("groups[{}]", key),
                message: format!("label \"{}\" must be unique", label),
            });
        }
    }
}

fn validate_rooms(doc: &Document, defined: &BTreeSet<GroupKey>, issues: &mut Vec<ValidationIssue>) {
    let mut seen_names: BTreeSet<&str> = BTreeSet::new();

    for (i, room) in doc.rooms.iter().enumerate() {
        let at = |field: &str| format!("rooms[{}].{}", i, field);

        if room.name.trim().is_empty() {
            issues.push(ValidationIssue {
                path: at("name"),
                message: "room name must not be blank".to_string(),
            });
        } else if !seen_names.insert(room.name.as_str()) {
            issues.push(ValidationIssue {
                path: at("name"),
                message: format!("room name \"{}\" must be unique", room.name),
            });
        }

        if let Some(id) = &room.room_id {
            if !is_valid_entity_id(id) {
                issues.push(ValidationIssue {
                    path: at("room-id"),
                    message: format!(
                        "\"{}\" is not a valid id (lowercase letters, digits and \
                         hyphens, no leading or trailing hyphen)",
                        id
                    ),
                });
            }
        }

        if room.members.is_empty() {
            issues.push(ValidationIssue {
                path: at("members"),
                message: "room must grant membership to at least one group".to_string(),
            });
        }
        if room.admins.is_empty() {
            issues.push(ValidationIssue {
                path: at("admins"),
                message: "room must grant admin to at least one group".to_string(),
            });
        }

        for (field, keys) in [("members", &room.members), ("admins", &room.admins)] {
            for key in keys {
                if !defined.contains(key) {
                    issues.push(ValidationIssue {
                        path: at(field),
                        message: format!("references undefined group \"{}\"", key),
                    });
                }
            }
        }
    }
}

fn validate_members(
    doc: &Document,
    defined: &BTreeSet<GroupKey>,
    issues: &mut Vec<ValidationIssue>,
) {
    let mut seen_names: BTreeSet<&str> = BTreeSet::new();
    let mut seen_ids: BTreeSet<&str> = BTreeSet::new();

    for (i, member) in doc.members.iter().enumerate() {
        let at = |field: &str| format!("members[{}].{}", i, field);

        if member.name.trim().is_empty() {
            issues.push(ValidationIssue {
                path: at("name"),
                message: "member name must not be blank".to_string(),
            });
        } else if !seen_names.insert(member.name.as_str()) {
            issues.push(ValidationIssue {
                path: at("name"),
                message: format!("member name \"{}\" must be unique", member.name),
            });
        }

        if !is_valid_entity_id(&member.user_id) {
            issues.push(ValidationIssue {
                path: at("user-id"),
                message: format!(
                    "\"{}\" is not a valid id (lowercase letters, digits and \
                     hyphens, no leading or trailing hyphen)",
                    member.user_id
                ),
            });
        } else if member.user_id == BOT_USER_ID {
            issues.push(ValidationIssue {
                path: at("user-id"),
                message: format!("user-id \"{}\" is reserved for the admin bot", BOT_USER_ID),
            });
        } else if !seen_ids.insert(member.user_id.as_str()) {
            issues.push(ValidationIssue {
                path: at("user-id"),
                message: format!("user-id \"{}\" must be unique", member.user_id),
            });
        }

        if member.groups.is_empty() {
            issues.push(ValidationIssue {
                path: at("groups"),
                message: "member must belong to at least one group".to_string(),
            });
        }
        for key in &member.groups {
            if !defined.contains(key) {
                issues.push(ValidationIssue {
                    path: at("groups"),
                    message: format!("references undefined group \"{}\"", key),
                });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Structural pass: closed records over raw JSON
// ---------------------------------------------------------------------------

fn check_structure(value: &Value, issues: &mut Vec<ValidationIssue>) {
    let Some(top) = value.as_object() else {
        issues.push(ValidationIssue {
            path: String::new(),
            message: "document must be a JSON object".to_string(),
        });
        return;
    };

    check_keys(top.keys(), DOCUMENT_KEYS, "", issues);

    if let Some(rooms) = top.get("rooms").and_then(Value::as_array) {
        for (i, room) in rooms.iter().enumerate() {
            if let Some(obj) = room.as_object() {
                check_keys(obj.keys(), ROOM_KEYS, &format!("rooms[{}]", i), issues);
            }
        }
    }

    if let Some(members) = top.get("members").and_then(Value::as_array) {
        for (i, member) in members.iter().enumerate() {
            if let Some(obj) = member.as_object() {
                check_keys(obj.keys(), MEMBER_KEYS, &format!("members[{}]", i), issues);
            }
        }
    }

    if let Some(tracking) = top.get("do-not-edit-state").and_then(Value::as_object) {
        check_keys(tracking.keys(), TRACKING_KEYS, "do-not-edit-state", issues);

        if let Some(creds) = tracking.get("admin-credentials").and_then(Value::as_object) {
            check_keys(
                creds.keys(),
                CREDENTIAL_KEYS,
                "do-not-edit-state.admin-credentials",
                issues,
            );
        }
    }
}

fn check_keys<'a>(
    keys: impl Iterator<Item = &'a String>,
    legal: &[&str],
    path: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    for key in keys {
        if legal.contains(&key.as_str()) {
            continue;
        }
        let message = match closest_key(key, legal) {
            Some(suggestion) => {
                format!("unknown key \"{}\" (did you mean \"{}\"?)", key, suggestion)
            }
            None => format!("unknown key \"{}\"", key),
        };
        issues.push(ValidationIssue {
            path: path.to_string(),
            message,
        });
    }
}

/// Closest legal key within edit distance 2, if any
fn closest_key<'a>(key: &str, legal: &[&'a str]) -> Option<&'a str> {
    legal
        .iter()
        .map(|candidate| (levenshtein(key, candidate), *candidate))
        .filter(|(d, _)| *d <= 2)
        .min_by_key(|(d, _)| *d)
        .map(|(_, candidate)| candidate)
}

/// Textbook two-row Levenshtein distance
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Member, Room};

    fn valid_document() -> Document {
        let mut doc = Document::seed();
        doc.members.push(Member {
            name: "Alice".to_string(),
            user_id: "alice".to_string(),
            groups: [GroupKey::owner()].into_iter().collect(),
        });
        doc.rooms.push(Room {
            name: "Officers".to_string(),
            room_id: None,
            members: [GroupKey::owner()].into_iter().collect(),
            admins: [GroupKey::owner()].into_iter().collect(),
            only_admins_can_speak: false,
        });
        doc
    }

    #[test]
    fn test_valid_document_passes() {
        assert!(validate_document(&valid_document()).is_ok());
    }

    #[test]
    fn test_missing_mandatory_group() {
        let mut doc = valid_document();
        doc.groups.remove(&GroupKey::bot());

        let errors = validate_document(&doc).unwrap_err();
        let rendered = errors.to_string();
        assert!(rendered.contains("group/bot"), "got: {}", rendered);
    }

    #[test]
    fn test_group_errors_short_circuit() {
        let mut doc = valid_document();
        doc.groups.clear();
        // Broken rooms too; their errors must not surface
        doc.rooms[0].name = String::new();

        let errors = validate_document(&doc).unwrap_err();
        assert!(errors.issues().iter().all(|i| i.path.starts_with("groups")));
    }

    #[test]
    fn test_duplicate_room_name() {
        let mut doc = valid_document();
        let copy = doc.rooms[0].clone();
        doc.rooms.push(copy);

        let errors = validate_document(&doc).unwrap_err();
        assert!(errors.to_string().contains("must be unique"));
    }

    #[test]
    fn test_duplicate_user_id() {
        let mut doc = valid_document();
        let mut copy = doc.members[0].clone();
        copy.name = "Alice Two".to_string();
        doc.members.push(copy);

        let errors = validate_document(&doc).unwrap_err();
        assert!(errors.to_string().contains("must be unique"));
    }

    #[test]
    fn test_undefined_group_reference_path() {
        let mut doc = valid_document();
        doc.members[0]
            .groups
            .insert(GroupKey::new("group", "phantom"));

        let errors = validate_document(&doc).unwrap_err();
        assert_eq!(errors.issues()[0].path, "members[0].groups");
    }

    #[test]
    fn test_reserved_bot_user_id() {
        let mut doc = valid_document();
        doc.members.push(Member {
            name: "Impostor".to_string(),
            user_id: "admin".to_string(),
            groups: [GroupKey::owner()].into_iter().collect(),
        });

        let errors = validate_document(&doc).unwrap_err();
        assert!(errors.to_string().contains("reserved"));
    }

    #[test]
    fn test_unknown_key_suggestion() {
        let text = r#"{
            "groups": { "group/owner": "Owner", "group/bot": "Bot" },
            "memberz": []
        }"#;

        let err = parse_and_validate(text).unwrap_err();
        let rendered = err.to_string();
        assert!(rendered.contains("did you mean \"members\""), "got: {}", rendered);
    }

    #[test]
    fn test_reserved_sha_key_accepted() {
        let text = r#"{
            "groups": { "group/owner": "Owner", "group/bot": "Bot" },
            "_file-sha256": "cafe"
        }"#;

        let doc = parse_and_validate(text).unwrap();
        assert_eq!(doc.file_sha256.as_deref(), Some("cafe"));
    }

    #[test]
    fn test_unparsable_is_format_error() {
        match parse_and_validate("{ not json") {
            Err(Error::Format(_)) => {}
            other => panic!("expected format error, got {:?}", other),
        }
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("rooms", "rooms"), 0);
        assert_eq!(levenshtein("roms", "rooms"), 1);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
    }
}
