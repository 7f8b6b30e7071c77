// tests/common/mod.rs

//! Shared test utilities: an in-memory remote server, a recording
//! notifier, a scripted chat transport, and fixture documents.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use majordomo::bot::{ChatTransport, ConnectError, TransportEvent};
use majordomo::document::{BotCredentials, Document, Member, Room};
use majordomo::groupkey::GroupKey;
use majordomo::membership::Affiliation;
use majordomo::remote::{AffiliationEntry, ApiError, Bookmark, RemoteApi, RoomOption, RosterEntry};
use majordomo::sync::{SyncConfig, SyncEngine, SyncNotifier};
use majordomo::Env;

pub const DOMAIN: &str = "example.org";
pub const MUC: &str = "conference.example.org";
pub const TEST_PASSWORD: &str = "test-password";

// ---------------------------------------------------------------------------
// In-memory remote
// ---------------------------------------------------------------------------

/// Everything the fake ejabberd remembers
#[derive(Debug, Default)]
pub struct RemoteState {
    /// user -> password
    pub users: BTreeMap<String, String>,
    /// room -> creation options
    pub rooms: BTreeMap<String, Vec<RoomOption>>,
    /// room -> bare jid -> affiliation
    pub affiliations: BTreeMap<String, BTreeMap<String, Affiliation>>,
    /// user -> contact bare jid -> roster entry
    pub rosters: BTreeMap<String, BTreeMap<String, RosterEntry>>,
    /// user -> stored bookmarks
    pub bookmarks: BTreeMap<String, Vec<Bookmark>>,
    /// every endpoint invocation, in order
    pub calls: Vec<String>,
    /// endpoints that fail with an injected 500
    pub fail_endpoints: BTreeSet<String>,
}

/// A fake admin API backed by a mutex-guarded state map
#[derive(Default)]
pub struct InMemoryRemote {
    pub state: Mutex<RemoteState>,
}

impl InMemoryRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_endpoint(&self, endpoint: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_endpoints
            .insert(endpoint.to_string());
    }

    pub fn heal_endpoint(&self, endpoint: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_endpoints
            .remove(endpoint);
    }

    /// Number of calls to `endpoint` so far
    pub fn call_count(&self, endpoint: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.as_str() == endpoint)
            .count()
    }

    pub fn clear_call_log(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn affiliation_of(&self, room: &str, jid: &str) -> Affiliation {
        self.state
            .lock()
            .unwrap()
            .affiliations
            .get(room)
            .and_then(|m| m.get(jid))
            .copied()
            .unwrap_or(Affiliation::None)
    }

    fn begin(&self, endpoint: &str) -> Result<(), majordomo::Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(endpoint.to_string());
        if state.fail_endpoints.contains(endpoint) {
            return Err(ApiError {
                endpoint: endpoint.to_string(),
                status: 500,
                body: "injected failure".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn api_error(endpoint: &str, status: u16, body: &str) -> majordomo::Error {
        ApiError {
            endpoint: endpoint.to_string(),
            status,
            body: body.to_string(),
        }
        .into()
    }
}

impl RemoteApi for InMemoryRemote {
    fn register(&self, user: &str, _host: &str, password: &str) -> majordomo::Result<()> {
        self.begin("register")?;
        let mut state = self.state.lock().unwrap();
        if state.users.contains_key(user) {
            return Err(Self::api_error("register", 409, "conflict: user exists"));
        }
        state.users.insert(user.to_string(), password.to_string());
        Ok(())
    }

    fn change_password(&self, user: &str, _host: &str, new_password: &str) -> majordomo::Result<()> {
        self.begin("change_password")?;
        let mut state = self.state.lock().unwrap();
        match state.users.get_mut(user) {
            Some(password) => {
                *password = new_password.to_string();
                Ok(())
            }
            None => Err(Self::api_error("change_password", 404, "unknown user")),
        }
    }

    fn unregister(&self, user: &str, _host: &str) -> majordomo::Result<()> {
        self.begin("unregister")?;
        let mut state = self.state.lock().unwrap();
        state.users.remove(user);
        state.rosters.remove(user);
        state.bookmarks.remove(user);
        Ok(())
    }

    fn registered_users(&self, _host: &str) -> majordomo::Result<Vec<String>> {
        self.begin("registered_users")?;
        Ok(self.state.lock().unwrap().users.keys().cloned().collect())
    }

    fn create_room(&self, room: &str, service: &str, host: &str) -> majordomo::Result<()> {
        self.create_room_with_opts(room, service, host, &[])
    }

    fn create_room_with_opts(
        &self,
        room: &str,
        _service: &str,
        _host: &str,
        options: &[RoomOption],
    ) -> majordomo::Result<()> {
        self.begin("create_room_with_opts")?;
        let mut state = self.state.lock().unwrap();
        if state.rooms.contains_key(room) {
            return Err(Self::api_error(
                "create_room_with_opts",
                409,
                "room exists",
            ));
        }
        state.rooms.insert(room.to_string(), options.to_vec());
        state.affiliations.insert(room.to_string(), BTreeMap::new());
        Ok(())
    }

    fn destroy_room(&self, room: &str, _service: &str) -> majordomo::Result<()> {
        self.begin("destroy_room")?;
        let mut state = self.state.lock().unwrap();
        if state.rooms.remove(room).is_none() {
            return Err(Self::api_error("destroy_room", 404, "unknown room"));
        }
        state.affiliations.remove(room);
        Ok(())
    }

    fn muc_online_rooms(&self, service: &str) -> majordomo::Result<Vec<String>> {
        self.begin("muc_online_rooms")?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .rooms
            .keys()
            .map(|r| format!("{}@{}", r, service))
            .collect())
    }

    fn get_room_options(&self, room: &str, _service: &str) -> majordomo::Result<Vec<RoomOption>> {
        self.begin("get_room_options")?;
        self.state
            .lock()
            .unwrap()
            .rooms
            .get(room)
            .cloned()
            .ok_or_else(|| Self::api_error("get_room_options", 404, "unknown room"))
    }

    fn get_room_affiliations(
        &self,
        room: &str,
        _service: &str,
    ) -> majordomo::Result<Vec<AffiliationEntry>> {
        self.begin("get_room_affiliations")?;
        let state = self.state.lock().unwrap();
        let affs = state
            .affiliations
            .get(room)
            .ok_or_else(|| Self::api_error("get_room_affiliations", 404, "unknown room"))?;
        Ok(affs
            .iter()
            .map(|(jid, affiliation)| AffiliationEntry {
                jid: jid.clone(),
                affiliation: *affiliation,
            })
            .collect())
    }

    fn set_room_affiliation(
        &self,
        room: &str,
        _service: &str,
        user: &str,
        host: &str,
        affiliation: Affiliation,
    ) -> majordomo::Result<()> {
        self.begin("set_room_affiliation")?;
        let mut state = self.state.lock().unwrap();
        let affs = state
            .affiliations
            .get_mut(room)
            .ok_or_else(|| Self::api_error("set_room_affiliation", 404, "unknown room"))?;
        let jid = format!("{}@{}", user, host);
        if affiliation == Affiliation::None {
            affs.remove(&jid);
        } else {
            affs.insert(jid, affiliation);
        }
        Ok(())
    }

    fn get_roster(&self, user: &str, _host: &str) -> majordomo::Result<Vec<RosterEntry>> {
        self.begin("get_roster")?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .rosters
            .get(user)
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default())
    }

    fn add_rosteritem(
        &self,
        local_user: &str,
        _local_host: &str,
        user: &str,
        host: &str,
        nick: &str,
        groups: &[String],
        subscription: &str,
    ) -> majordomo::Result<()> {
        self.begin("add_rosteritem")?;
        let jid = format!("{}@{}", user, host);
        self.state
            .lock()
            .unwrap()
            .rosters
            .entry(local_user.to_string())
            .or_default()
            .insert(
                jid.clone(),
                RosterEntry {
                    jid,
                    nick: nick.to_string(),
                    subscription: subscription.to_string(),
                    groups: groups.to_vec(),
                },
            );
        Ok(())
    }

    fn delete_rosteritem(
        &self,
        local_user: &str,
        _local_host: &str,
        user: &str,
        host: &str,
    ) -> majordomo::Result<()> {
        self.begin("delete_rosteritem")?;
        let jid = format!("{}@{}", user, host);
        if let Some(roster) = self.state.lock().unwrap().rosters.get_mut(local_user) {
            roster.remove(&jid);
        }
        Ok(())
    }

    fn get_user_bookmarks(&self, user: &str, _host: &str) -> majordomo::Result<Vec<Bookmark>> {
        self.begin("private_get")?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .bookmarks
            .get(user)
            .cloned()
            .unwrap_or_default())
    }

    fn set_user_bookmarks(
        &self,
        user: &str,
        _host: &str,
        bookmarks: &[Bookmark],
    ) -> majordomo::Result<()> {
        self.begin("private_set")?;
        self.state
            .lock()
            .unwrap()
            .bookmarks
            .insert(user.to_string(), bookmarks.to_vec());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Recording notifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    RoomCreated(String),
    Dm { user_id: String, body: String },
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn dms_for(&self, user_id: &str) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|n| match n {
                Notification::Dm { user_id: u, body } if u == user_id => Some(body.clone()),
                _ => None,
            })
            .collect()
    }
}

impl SyncNotifier for RecordingNotifier {
    fn room_created(&self, room_id: &str) {
        self.events
            .lock()
            .unwrap()
            .push(Notification::RoomCreated(room_id.to_string()));
    }

    fn direct_message(&self, user_id: &str, body: &str) {
        self.events.lock().unwrap().push(Notification::Dm {
            user_id: user_id.to_string(),
            body: body.to_string(),
        });
    }
}

// ---------------------------------------------------------------------------
// Scripted transport
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct TransportScript {
    /// Outcomes for successive connect attempts; exhausted means Ok
    pub connect_results: Mutex<VecDeque<Result<(), ConnectError>>>,
    /// Events handed to the bot, in order
    pub events: Mutex<VecDeque<TransportEvent>>,
    /// Everything the bot did: "connect:<pw>", "join:<jid>:<nick>",
    /// "dm:<jid>:<body>", "muc:<jid>:<body>", "disconnect"
    pub log: Mutex<Vec<String>>,
}

impl TransportScript {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_connect_result(&self, result: Result<(), ConnectError>) {
        self.connect_results.lock().unwrap().push_back(result);
    }

    pub fn push_event(&self, event: TransportEvent) {
        self.events.lock().unwrap().push_back(event);
    }

    pub fn log_entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.starts_with("connect:"))
            .count()
    }
}

/// `ChatTransport` driven by a shared script
pub struct ScriptedTransport {
    pub script: Arc<TransportScript>,
}

impl ChatTransport for ScriptedTransport {
    fn connect(&mut self, credentials: &BotCredentials) -> Result<(), ConnectError> {
        self.script
            .log
            .lock()
            .unwrap()
            .push(format!("connect:{}", credentials.password));
        self.script
            .connect_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    fn disconnect(&mut self) {
        self.script.log.lock().unwrap().push("disconnect".to_string());
    }

    fn join_room(&mut self, room_jid: &str, nick: &str) -> Result<(), ConnectError> {
        self.script
            .log
            .lock()
            .unwrap()
            .push(format!("join:{}:{}", room_jid, nick));
        Ok(())
    }

    fn send_direct(&mut self, to_jid: &str, body: &str) -> Result<(), ConnectError> {
        self.script
            .log
            .lock()
            .unwrap()
            .push(format!("dm:{}:{}", to_jid, body));
        Ok(())
    }

    fn send_room(&mut self, room_jid: &str, body: &str) -> Result<(), ConnectError> {
        self.script
            .log
            .lock()
            .unwrap()
            .push(format!("muc:{}:{}", room_jid, body));
        Ok(())
    }

    fn next_event(&mut self, timeout: Duration) -> Option<TransportEvent> {
        let event = self.script.events.lock().unwrap().pop_front();
        if event.is_none() {
            std::thread::sleep(timeout.min(Duration::from_millis(10)));
        }
        event
    }
}

/// Poll until `predicate` holds or `timeout` elapses
pub fn wait_for(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    false
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn group(key: &str) -> GroupKey {
    GroupKey::parse(key).unwrap()
}

pub fn groups(keys: &[&str]) -> BTreeSet<GroupKey> {
    keys.iter().map(|k| group(k)).collect()
}

/// Document with the standard three groups and nothing else
pub fn base_document() -> Document {
    Document::seed()
}

pub fn member(name: &str, user_id: &str, in_groups: &[&str]) -> Member {
    Member {
        name: name.to_string(),
        user_id: user_id.to_string(),
        groups: groups(in_groups),
    }
}

pub fn room(name: &str, admins: &[&str], members: &[&str], moderated: bool) -> Room {
    Room {
        name: name.to_string(),
        room_id: None,
        members: groups(members),
        admins: groups(admins),
        only_admins_can_speak: moderated,
    }
}

pub fn sync_config() -> SyncConfig {
    SyncConfig {
        env: Env::Test,
        default_test_password: TEST_PASSWORD.to_string(),
        managed_muc_options: vec![RoomOption::new("persistent", "true")],
        xmpp_domain: DOMAIN.to_string(),
        muc_service: MUC.to_string(),
    }
}

pub fn engine(remote: Arc<InMemoryRemote>, notifier: Arc<RecordingNotifier>) -> SyncEngine {
    SyncEngine::new(remote, notifier, sync_config())
}

/// Scenario 1 document: Alice plus the Officers room
pub fn scenario_one_document() -> Document {
    let mut doc = base_document();
    doc.members
        .push(member("Alice", "alice", &["group/owner"]));
    doc.rooms
        .push(room("Officers", &["group/owner"], &["group/owner"], false));
    doc
}

pub fn jid(user: &str) -> String {
    format!("{}@{}", user, DOMAIN)
}
