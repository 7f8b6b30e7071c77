// src/remote/client.rs

//! Blocking HTTP client for the ejabberd admin API.

use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::{AffiliationEntry, ApiError, Bookmark, RemoteApi, RemoteConfig, RoomOption};
use crate::error::{Error, Result};
use crate::membership::Affiliation;
use crate::remote::bookmarks;

/// Per-request timeout
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// The production `RemoteApi` implementation
pub struct AdminApiClient {
    config: RemoteConfig,
    client: Client,
}

impl AdminApiClient {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    /// POST a JSON payload; returns the response body of a 200, otherwise
    /// an `ApiError`. Transport failures surface as status 0.
    fn post(&self, endpoint: &str, payload: Value) -> Result<String> {
        let url = if self.config.admin_api_url.ends_with('/') {
            format!("{}{}", self.config.admin_api_url, endpoint)
        } else {
            format!("{}/{}", self.config.admin_api_url, endpoint)
        };

        debug!(endpoint, "admin API call");

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .map_err(|e| ApiError {
                endpoint: endpoint.to_string(),
                status: 0,
                body: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().unwrap_or_default();

        if status.as_u16() != 200 {
            return Err(ApiError {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            }
            .into());
        }

        Ok(body)
    }

    fn post_unit(&self, endpoint: &str, payload: Value) -> Result<()> {
        self.post(endpoint, payload).map(|_| ())
    }

    fn post_json<T: DeserializeOwned>(&self, endpoint: &str, payload: Value) -> Result<T> {
        let body = self.post(endpoint, payload)?;
        serde_json::from_str(&body).map_err(|e| {
            ApiError {
                endpoint: endpoint.to_string(),
                status: 200,
                body: format!("unparsable response ({e}): {body}"),
            }
            .into()
        })
    }
}

impl RemoteApi for AdminApiClient {
    fn register(&self, user: &str, host: &str, password: &str) -> Result<()> {
        self.post_unit(
            "register",
            json!({ "user": user, "host": host, "password": password }),
        )
    }

    fn change_password(&self, user: &str, host: &str, new_password: &str) -> Result<()> {
        self.post_unit(
            "change_password",
            json!({ "user": user, "host": host, "newpass": new_password }),
        )
    }

    fn unregister(&self, user: &str, host: &str) -> Result<()> {
        self.post_unit("unregister", json!({ "user": user, "host": host }))
    }

    fn registered_users(&self, host: &str) -> Result<Vec<String>> {
        self.post_json("registered_users", json!({ "host": host }))
    }

    fn create_room(&self, room: &str, service: &str, host: &str) -> Result<()> {
        self.post_unit(
            "create_room",
            json!({ "name": room, "service": service, "host": host }),
        )
    }

    fn create_room_with_opts(
        &self,
        room: &str,
        service: &str,
        host: &str,
        options: &[RoomOption],
    ) -> Result<()> {
        self.post_unit(
            "create_room_with_opts",
            json!({
                "name": room,
                "service": service,
                "host": host,
                "options": options,
            }),
        )
    }

    fn destroy_room(&self, room: &str, service: &str) -> Result<()> {
        self.post_unit("destroy_room", json!({ "name": room, "service": service }))
    }

    fn muc_online_rooms(&self, service: &str) -> Result<Vec<String>> {
        self.post_json("muc_online_rooms", json!({ "service": service }))
    }

    fn get_room_options(&self, room: &str, service: &str) -> Result<Vec<RoomOption>> {
        self.post_json(
            "get_room_options",
            json!({ "name": room, "service": service }),
        )
    }

    fn get_room_affiliations(&self, room: &str, service: &str) -> Result<Vec<AffiliationEntry>> {
        self.post_json(
            "get_room_affiliations",
            json!({ "name": room, "service": service }),
        )
    }

    fn set_room_affiliation(
        &self,
        room: &str,
        service: &str,
        user: &str,
        host: &str,
        affiliation: Affiliation,
    ) -> Result<()> {
        self.post_unit(
            "set_room_affiliation",
            json!({
                "name": room,
                "service": service,
                "jid": format!("{user}@{host}"),
                "affiliation": affiliation.as_str(),
            }),
        )
    }

    fn get_roster(&self, user: &str, host: &str) -> Result<Vec<super::RosterEntry>> {
        self.post_json("get_roster", json!({ "user": user, "host": host }))
    }

    fn add_rosteritem(
        &self,
        local_user: &str,
        local_host: &str,
        user: &str,
        host: &str,
        nick: &str,
        groups: &[String],
        subscription: &str,
    ) -> Result<()> {
        self.post_unit(
            "add_rosteritem",
            json!({
                "localuser": local_user,
                "localhost": local_host,
                "user": user,
                "host": host,
                "nick": nick,
                "groups": groups,
                "subs": subscription,
            }),
        )
    }

    fn delete_rosteritem(
        &self,
        local_user: &str,
        local_host: &str,
        user: &str,
        host: &str,
    ) -> Result<()> {
        self.post_unit(
            "delete_rosteritem",
            json!({
                "localuser": local_user,
                "localhost": local_host,
                "user": user,
                "host": host,
            }),
        )
    }

    fn get_user_bookmarks(&self, user: &str, host: &str) -> Result<Vec<Bookmark>> {
        let body = self.post(
            "private_get",
            json!({
                "user": user,
                "host": host,
                "element": "storage",
                "ns": bookmarks::STORAGE_NS,
            }),
        )?;

        // The endpoint returns the stored element either as a raw XML
        // string or wrapped in a JSON string; accept both.
        let xml = serde_json::from_str::<String>(&body).unwrap_or(body);
        Ok(bookmarks::from_storage_xml(&xml))
    }

    fn set_user_bookmarks(&self, user: &str, host: &str, marks: &[Bookmark]) -> Result<()> {
        self.post_unit(
            "private_set",
            json!({
                "user": user,
                "host": host,
                "element": bookmarks::to_storage_xml(marks),
            }),
        )
    }
}
