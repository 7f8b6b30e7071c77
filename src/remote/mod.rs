// src/remote/mod.rs

//! Typed facade over the ejabberd HTTP admin API.
//!
//! `RemoteApi` is the seam the sync engine and the admin bot talk
//! through; [`client::AdminApiClient`] is the production implementation.
//! Every operation maps to one `POST {adminApiUrl}/<endpoint>` call with a
//! JSON payload; a 200 response is success, anything else is an
//! [`ApiError`] carrying the endpoint, status, and response body.

pub mod bookmarks;
mod client;

pub use client::AdminApiClient;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::membership::Affiliation;

/// A remote call returned a non-200 response
#[derive(Debug, Clone, Error)]
#[error("admin API {endpoint} returned {status}: {body}")]
pub struct ApiError {
    pub endpoint: String,
    pub status: u16,
    pub body: String,
}

/// Strip the resource from a full JID
pub fn bare_jid(jid: &str) -> &str {
    jid.split('/').next().unwrap_or(jid)
}

/// Local part of a bare or full JID
pub fn jid_local_part(jid: &str) -> &str {
    bare_jid(jid).split('@').next().unwrap_or(jid)
}

/// Connection settings for the admin API and the XMPP deployment it governs
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Base URL of the ejabberd HTTP admin API
    pub admin_api_url: String,
    /// Primary XMPP domain; the `host` field of every user-level call
    pub xmpp_domain: String,
    /// MUC service domain; the `service` field of every room-level call
    pub muc_service: String,
}

/// A MUC room option as the admin API serializes it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomOption {
    pub name: String,
    pub value: String,
}

impl RoomOption {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One row of a room's affiliation list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffiliationEntry {
    pub jid: String,
    pub affiliation: Affiliation,
}

/// One row of a user's roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub jid: String,
    #[serde(default)]
    pub nick: String,
    #[serde(default)]
    pub subscription: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// A XEP-0048 conference bookmark
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bookmark {
    /// Bare room JID, `room-id@mucService`
    pub jid: String,
    /// Display label
    pub name: String,
    pub autojoin: bool,
    /// Preferred nick inside the room
    pub nick: Option<String>,
}

/// The ejabberd admin API surface the engine depends on.
///
/// `host` is always the configured XMPP domain and `service` the MUC
/// service; they travel as explicit parameters because the remote treats
/// them as part of every payload.
pub trait RemoteApi: Send + Sync {
    // User accounts
    fn register(&self, user: &str, host: &str, password: &str) -> crate::Result<()>;
    fn change_password(&self, user: &str, host: &str, new_password: &str) -> crate::Result<()>;
    fn unregister(&self, user: &str, host: &str) -> crate::Result<()>;
    fn registered_users(&self, host: &str) -> crate::Result<Vec<String>>;

    // MUC rooms
    fn create_room(&self, room: &str, service: &str, host: &str) -> crate::Result<()>;
    fn create_room_with_opts(
        &self,
        room: &str,
        service: &str,
        host: &str,
        options: &[RoomOption],
    ) -> crate::Result<()>;
    fn destroy_room(&self, room: &str, service: &str) -> crate::Result<()>;
    fn muc_online_rooms(&self, service: &str) -> crate::Result<Vec<String>>;
    fn get_room_options(&self, room: &str, service: &str) -> crate::Result<Vec<RoomOption>>;
    fn get_room_affiliations(
        &self,
        room: &str,
        service: &str,
    ) -> crate::Result<Vec<AffiliationEntry>>;
    fn set_room_affiliation(
        &self,
        room: &str,
        service: &str,
        user: &str,
        host: &str,
        affiliation: Affiliation,
    ) -> crate::Result<()>;

    // Rosters
    fn get_roster(&self, user: &str, host: &str) -> crate::Result<Vec<RosterEntry>>;
    #[allow(clippy::too_many_arguments)]
    fn add_rosteritem(
        &self,
        local_user: &str,
        local_host: &str,
        user: &str,
        host: &str,
        nick: &str,
        groups: &[String],
        subscription: &str,
    ) -> crate::Result<()>;
    fn delete_rosteritem(
        &self,
        local_user: &str,
        local_host: &str,
        user: &str,
        host: &str,
    ) -> crate::Result<()>;

    // Bookmarks (XEP-0048 private storage)
    fn get_user_bookmarks(&self, user: &str, host: &str) -> crate::Result<Vec<Bookmark>>;
    fn set_user_bookmarks(
        &self,
        user: &str,
        host: &str,
        bookmarks: &[Bookmark],
    ) -> crate::Result<()>;
}
