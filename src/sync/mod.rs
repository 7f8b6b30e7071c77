// src/sync/mod.rs

//! The reconciliation engine.
//!
//! `sync_state` converges the remote server toward one document snapshot
//! across eight ordered phases:
//!
//! 1. Ghost-include the admin bot and snapshot the previous tracking.
//! 2. Compute diffs against the tracking section.
//! 3. Delete users no longer in the document.
//! 4. Destroy rooms no longer in the document.
//! 5. Register new users.
//! 6. Create rooms without a stable id (assigning one).
//! 7. Converge rosters, writing only real differences.
//! 8. Converge room affiliations and bookmarks, one affiliation fetch per
//!    room, writing only real differences.
//!
//! followed by rewriting the tracking section and ghost-removing the bot.
//! Deletions run before creations so an id freed and reused within one
//! mutation works. A failed remote call is logged, recorded in the report,
//! and never aborts its phase: one bad entity must not block the rest of
//! the convergence. Repeating a sync against a converged remote performs
//! no writes at all - the remote emits presence traffic on every roster
//! write, so write minimization is a hard requirement, not an
//! optimization.

mod report;

pub use report::{ChangeReport, ReportEntry};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Env;
use crate::document::{kebab_case, Document, Room, Tracking, BOT_USER_ID};
use crate::groupkey::GroupKey;
use crate::membership::{affiliation, Affiliation};
use crate::remote::{bare_jid, Bookmark, RemoteApi, RoomOption};

/// Everything the engine needs besides the document and the remote
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub env: Env,
    /// Fixed password handed to new accounts in dev and test
    pub default_test_password: String,
    /// MUC options merged into every created room
    pub managed_muc_options: Vec<RoomOption>,
    pub xmpp_domain: String,
    pub muc_service: String,
}

/// Downstream effects the engine requests from the admin bot.
///
/// The bot is wired in explicitly; the engine never reaches for a global.
pub trait SyncNotifier: Send + Sync {
    /// A room was created; the bot should join it
    fn room_created(&self, room_id: &str);
    /// Deliver an out-of-band direct message to a managed user
    fn direct_message(&self, user_id: &str, body: &str);
}

/// Notifier that drops everything; used before the bot is wired up and in
/// one-shot CLI syncs
pub struct NullNotifier;

impl SyncNotifier for NullNotifier {
    fn room_created(&self, _room_id: &str) {}
    fn direct_message(&self, _user_id: &str, _body: &str) {}
}

/// Result of one sync: the effective document and the change report
#[derive(Debug)]
pub struct SyncOutcome {
    pub state: Document,
    pub report: ChangeReport,
}

/// The eight-phase reconciliation engine
pub struct SyncEngine {
    remote: Arc<dyn RemoteApi>,
    notifier: Arc<dyn SyncNotifier>,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(
        remote: Arc<dyn RemoteApi>,
        notifier: Arc<dyn SyncNotifier>,
        config: SyncConfig,
    ) -> Self {
        Self {
            remote,
            notifier,
            config,
        }
    }

    pub fn remote(&self) -> &Arc<dyn RemoteApi> {
        &self.remote
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run all phases against one document snapshot.
    ///
    /// Returns the effective document - room ids assigned, tracking
    /// rewritten, bot ghost-removed - plus the change report.
    pub fn sync_state(&self, mut doc: Document) -> crate::Result<SyncOutcome> {
        let mut report = ChangeReport::new();

        // Phase 1: ghost-include the bot, snapshot previous tracking
        doc.members.insert(0, Document::ghost_bot_member());
        let previous = doc.tracking.clone();

        // Phase 2: diffs against tracking
        let current_members = doc.member_ids();
        let users_to_add: Vec<String> = current_members
            .difference(&previous.managed_members)
            .cloned()
            .collect();
        let users_to_delete: Vec<String> = previous
            .managed_members
            .difference(&current_members)
            .cloned()
            .collect();
        let current_rooms = doc.room_ids();
        let rooms_to_delete: Vec<String> = previous
            .managed_rooms
            .difference(&current_rooms)
            .cloned()
            .collect();

        info!(
            add = users_to_add.len(),
            delete = users_to_delete.len(),
            destroy = rooms_to_delete.len(),
            "sync started"
        );

        // Phases 3-8
        self.delete_users(&doc, &previous, &users_to_delete, &mut report);
        self.delete_rooms(&previous, &rooms_to_delete, &mut report);
        self.register_users(&users_to_add, &mut report);
        self.create_rooms(&mut doc, &mut report);
        self.sync_rosters(&doc, &mut report);
        self.sync_affiliations_and_bookmarks(&doc, &mut report);

        // Phase 9: rewrite tracking from the effective document
        doc.tracking = Tracking {
            managed_members: doc
                .members
                .iter()
                .filter(|m| m.user_id != BOT_USER_ID)
                .map(|m| m.user_id.clone())
                .collect(),
            managed_rooms: doc.room_ids(),
            managed_groups: doc.group_keys(),
            admin_credentials: previous.admin_credentials,
        };

        // Phase 10: ghost-remove the bot
        doc.members.retain(|m| m.user_id != BOT_USER_ID);

        info!(
            changes = report.change_count(),
            failures = report.failure_count(),
            "sync finished"
        );

        Ok(SyncOutcome { state: doc, report })
    }

    /// Phase 3: tear down removed users - rosters, affiliations, account
    fn delete_users(
        &self,
        doc: &Document,
        previous: &Tracking,
        users: &[String],
        report: &mut ChangeReport,
    ) {
        let domain = &self.config.xmpp_domain;

        for user_id in users {
            for peer in doc.members.iter().filter(|m| &m.user_id != user_id) {
                if let Err(e) =
                    self.remote
                        .delete_rosteritem(&peer.user_id, domain, user_id, domain)
                {
                    record_failure(report, "delete_rosteritem", &e);
                }
            }

            for room_id in &previous.managed_rooms {
                if let Err(e) = self.remote.set_room_affiliation(
                    room_id,
                    &self.config.muc_service,
                    user_id,
                    domain,
                    Affiliation::None,
                ) {
                    record_failure(report, "set_room_affiliation", &e);
                }
            }

            match self.remote.unregister(user_id, domain) {
                Ok(()) => report.push(ReportEntry::UserDeleted {
                    user_id: user_id.clone(),
                }),
                Err(e) => record_failure(report, "unregister", &e),
            }
        }
    }

    /// Phase 4: destroy removed rooms after clearing tracked affiliations
    fn delete_rooms(&self, previous: &Tracking, rooms: &[String], report: &mut ChangeReport) {
        for room_id in rooms {
            for user_id in &previous.managed_members {
                if let Err(e) = self.remote.set_room_affiliation(
                    room_id,
                    &self.config.muc_service,
                    user_id,
                    &self.config.xmpp_domain,
                    Affiliation::None,
                ) {
                    record_failure(report, "set_room_affiliation", &e);
                }
            }

            match self.remote.destroy_room(room_id, &self.config.muc_service) {
                Ok(()) => report.push(ReportEntry::RoomDeleted {
                    room_id: room_id.clone(),
                }),
                Err(e) => record_failure(report, "destroy_room", &e),
            }
        }
    }

    /// Phase 5: register new accounts, skipping ones the remote already has
    fn register_users(&self, users: &[String], report: &mut ChangeReport) {
        if users.is_empty() {
            return;
        }

        let existing: BTreeSet<String> =
            match self.remote.registered_users(&self.config.xmpp_domain) {
                Ok(names) => names.into_iter().collect(),
                Err(e) => {
                    record_failure(report, "registered_users", &e);
                    BTreeSet::new()
                }
            };

        for user_id in users {
            if existing.contains(user_id) {
                report.push(ReportEntry::UserAlreadyExists {
                    user_id: user_id.clone(),
                });
                continue;
            }

            // Real user passwords are set later by the out-of-band signup
            // flow; this one only has to be unguessable.
            let password = self.generate_password();
            match self
                .remote
                .register(user_id, &self.config.xmpp_domain, &password)
            {
                Ok(()) => report.push(ReportEntry::UserRegistered {
                    user_id: user_id.clone(),
                }),
                Err(e) => record_failure(report, "register", &e),
            }
        }
    }

    /// Phase 6: create rooms without a stable id and assign one
    fn create_rooms(&self, doc: &mut Document, report: &mut ChangeReport) {
        let mut used = doc.room_ids();

        for room in doc.rooms.iter_mut().filter(|r| r.room_id.is_none()) {
            let room_id = unique_room_id(&room.name, &used);
            let options = self.room_options(room);

            match self.remote.create_room_with_opts(
                &room_id,
                &self.config.muc_service,
                &self.config.xmpp_domain,
                &options,
            ) {
                Ok(()) => {
                    used.insert(room_id.clone());
                    room.room_id = Some(room_id.clone());
                    self.notifier.room_created(&room_id);
                    report.push(ReportEntry::RoomCreated { room_id });
                }
                Err(e) => record_failure(report, "create_room_with_opts", &e),
            }
        }
    }

    /// Configured default MUC options merged with the room's policy
    fn room_options(&self, room: &Room) -> Vec<RoomOption> {
        let mut options = self.config.managed_muc_options.clone();
        let moderated = if room.only_admins_can_speak {
            "true"
        } else {
            "false"
        };
        upsert_option(&mut options, "moderated", moderated);
        if room.only_admins_can_speak {
            upsert_option(&mut options, "members_by_default", "false");
        }
        options
    }

    /// Phase 7: converge every member's roster toward the full member list
    fn sync_rosters(&self, doc: &Document, report: &mut ChangeReport) {
        let domain = &self.config.xmpp_domain;
        let defined = doc.group_keys();

        for owner in &doc.members {
            let roster = match self.remote.get_roster(&owner.user_id, domain) {
                Ok(r) => r,
                Err(e) => {
                    record_failure(report, "get_roster", &e);
                    continue;
                }
            };

            for contact in doc.members.iter().filter(|m| m.user_id != owner.user_id) {
                let contact_jid = format!("{}@{}", contact.user_id, domain);
                let target_groups = group_labels(doc, &contact.groups, &defined);

                let current = roster.iter().find(|entry| {
                    entry.jid == contact_jid
                        || entry.jid.starts_with(&format!("{}/", contact_jid))
                });

                let differs = match current {
                    None => true,
                    Some(entry) => {
                        let current_set: BTreeSet<&str> =
                            entry.groups.iter().map(String::as_str).collect();
                        let target_set: BTreeSet<&str> =
                            target_groups.iter().map(String::as_str).collect();
                        entry.nick != contact.name || current_set != target_set
                    }
                };

                if differs {
                    match self.remote.add_rosteritem(
                        &owner.user_id,
                        domain,
                        &contact.user_id,
                        domain,
                        &contact.name,
                        &target_groups,
                        "both",
                    ) {
                        Ok(()) => report.push(ReportEntry::RosterUpdated {
                            owner: owner.user_id.clone(),
                            contact: contact.user_id.clone(),
                        }),
                        Err(e) => record_failure(report, "add_rosteritem", &e),
                    }
                } else {
                    report.push(ReportEntry::RosterUnchanged {
                        owner: owner.user_id.clone(),
                        contact: contact.user_id.clone(),
                    });
                }
            }
        }
    }

    /// Phase 8: converge affiliations and bookmarks with one affiliation
    /// fetch per room
    fn sync_affiliations_and_bookmarks(&self, doc: &Document, report: &mut ChangeReport) {
        let domain = &self.config.xmpp_domain;
        let muc = &self.config.muc_service;
        let managed: Vec<&Room> = doc.rooms.iter().filter(|r| r.room_id.is_some()).collect();

        // One fetch per room; a failed fetch skips that room's affiliation
        // writes rather than pretending everyone is at "none".
        let mut current_affs: BTreeMap<&str, BTreeMap<String, Affiliation>> = BTreeMap::new();
        for room in &managed {
            let room_id = room.room_id.as_deref().expect("managed rooms have ids");
            match self.remote.get_room_affiliations(room_id, muc) {
                Ok(entries) => {
                    let by_jid = entries
                        .into_iter()
                        .map(|e| (bare_jid(&e.jid).to_string(), e.affiliation))
                        .collect();
                    current_affs.insert(room_id, by_jid);
                }
                Err(e) => record_failure(report, "get_room_affiliations", &e),
            }
        }

        // Target affiliations; the bot group is implicitly admin everywhere,
        // which is what puts the ghost-included bot in every room.
        let mut targets: BTreeMap<(&str, &str), Affiliation> = BTreeMap::new();
        for room in &managed {
            let room_id = room.room_id.as_deref().expect("managed rooms have ids");
            let mut admins = room.admins.clone();
            admins.insert(GroupKey::bot());
            for member in &doc.members {
                targets.insert(
                    (room_id, member.user_id.as_str()),
                    affiliation(&member.groups, &admins, &room.members),
                );
            }
        }

        for room in &managed {
            let room_id = room.room_id.as_deref().expect("managed rooms have ids");
            let Some(room_affs) = current_affs.get(room_id) else {
                continue;
            };

            for member in &doc.members {
                let target = targets[&(room_id, member.user_id.as_str())];
                let jid = format!("{}@{}", member.user_id, domain);
                let current = room_affs.get(&jid).copied().unwrap_or(Affiliation::None);

                if current == target {
                    report.push(ReportEntry::AffiliationUnchanged {
                        room_id: room_id.to_string(),
                        user_id: member.user_id.clone(),
                    });
                    continue;
                }

                match self
                    .remote
                    .set_room_affiliation(room_id, muc, &member.user_id, domain, target)
                {
                    Ok(()) => {
                        report.push(ReportEntry::AffiliationUpdated {
                            room_id: room_id.to_string(),
                            user_id: member.user_id.clone(),
                            affiliation: target,
                        });
                        if member.user_id != BOT_USER_ID {
                            self.notifier.direct_message(
                                &member.user_id,
                                &self.affiliation_message(room, room_id, target),
                            );
                        }
                    }
                    Err(e) => record_failure(report, "set_room_affiliation", &e),
                }
            }
        }

        // Bookmarks: desired set per member from the target affiliations
        for member in &doc.members {
            let mut desired: Vec<Bookmark> = managed
                .iter()
                .filter(|room| {
                    let room_id = room.room_id.as_deref().expect("managed rooms have ids");
                    targets[&(room_id, member.user_id.as_str())].grants_access()
                })
                .map(|room| Bookmark {
                    jid: format!(
                        "{}@{}",
                        room.room_id.as_deref().expect("managed rooms have ids"),
                        muc
                    ),
                    name: room.name.clone(),
                    autojoin: true,
                    nick: Some(member.user_id.clone()),
                })
                .collect();
            desired.sort_by(|a, b| a.jid.cmp(&b.jid));

            let mut current = match self.remote.get_user_bookmarks(&member.user_id, domain) {
                Ok(marks) => marks,
                Err(e) => {
                    record_failure(report, "private_get", &e);
                    continue;
                }
            };
            current.sort_by(|a, b| a.jid.cmp(&b.jid));

            if current == desired {
                report.push(ReportEntry::BookmarksUnchanged {
                    user_id: member.user_id.clone(),
                });
                continue;
            }

            match self
                .remote
                .set_user_bookmarks(&member.user_id, domain, &desired)
            {
                Ok(()) => report.push(ReportEntry::BookmarksUpdated {
                    user_id: member.user_id.clone(),
                }),
                Err(e) => record_failure(report, "private_set", &e),
            }
        }
    }

    fn affiliation_message(&self, room: &Room, room_id: &str, target: Affiliation) -> String {
        if target.grants_access() {
            format!(
                "You are now {} in the room \"{}\". Join: xmpp:{}@{}?join",
                target, room.name, room_id, self.config.muc_service
            )
        } else {
            format!("You no longer have access to the room \"{}\".", room.name)
        }
    }

    fn generate_password(&self) -> String {
        match self.config.env {
            Env::Prod => random_password(),
            Env::Dev | Env::Test => self.config.default_test_password.clone(),
        }
    }
}

/// Cryptographically strong random password: 32 bytes of OS entropy,
/// base64-encoded
pub fn random_password() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

fn record_failure(report: &mut ChangeReport, endpoint: &str, error: &crate::Error) {
    warn!(endpoint, %error, "remote call failed, continuing");
    report.push(ReportEntry::RemoteCallFailed {
        endpoint: endpoint.to_string(),
        detail: error.to_string(),
    });
}

/// Labels of the member's groups that are actually defined, sorted
fn group_labels(doc: &Document, groups: &BTreeSet<GroupKey>, defined: &BTreeSet<GroupKey>) -> Vec<String> {
    let mut labels: Vec<String> = groups
        .iter()
        .filter(|g| defined.contains(*g))
        .filter_map(|g| doc.groups.get(g).cloned())
        .collect();
    labels.sort();
    labels
}

/// Derive a room id from the name, suffixing on collision with an id
/// already present in the working document
fn unique_room_id(name: &str, used: &BTreeSet<String>) -> String {
    let base = {
        let kebab = kebab_case(name);
        if kebab.is_empty() {
            "room".to_string()
        } else {
            kebab
        }
    };

    if !used.contains(&base) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}-{}", base, n);
        if !used.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn upsert_option(options: &mut Vec<RoomOption>, name: &str, value: &str) {
    match options.iter_mut().find(|o| o.name == name) {
        Some(existing) => existing.value = value.to_string(),
        None => options.push(RoomOption::new(name, value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_room_id() {
        let mut used = BTreeSet::new();
        assert_eq!(unique_room_id("Officers", &used), "officers");

        used.insert("officers".to_string());
        assert_eq!(unique_room_id("Officers", &used), "officers-2");

        used.insert("officers-2".to_string());
        assert_eq!(unique_room_id("Officers", &used), "officers-3");

        assert_eq!(unique_room_id("!!!", &used), "room");
    }

    #[test]
    fn test_upsert_option_overrides_defaults() {
        let mut options = vec![RoomOption::new("moderated", "false")];
        upsert_option(&mut options, "moderated", "true");
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].value, "true");

        upsert_option(&mut options, "members_by_default", "false");
        assert_eq!(options.len(), 2);
    }

    #[test]
    fn test_random_password_entropy() {
        let a = random_password();
        let b = random_password();
        assert_ne!(a, b);
        // 32 bytes of entropy encode to 44 base64 characters
        assert_eq!(a.len(), 44);
    }
}
