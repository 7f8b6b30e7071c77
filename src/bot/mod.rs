// src/bot/mod.rs

//! The admin bot.
//!
//! One privileged XMPP account (`admin`) participates in every managed
//! room so the engine can deliver out-of-band notifications and meeting
//! invites. The component owns the XMPP session exclusively and runs a
//! single pump thread: operations arrive over a channel, session events
//! are polled from the transport, and the joined-room map is only ever
//! touched from that thread.
//!
//! # Credential self-healing
//!
//! The bot's password lives in the document's tracking section. On
//! startup the bot registers the account if the remote does not know it,
//! takes the account over with a fresh password if the local credentials
//! were lost, and - when authentication fails with SASL - resets the
//! password through the admin API and retries exactly once. A stream
//! policy violation (rate limit, IP ban) never triggers a reset: the
//! component surfaces a diagnostic and stays alive in a degraded state so
//! reconciliation keeps working.

pub mod backoff;
pub mod commands;
pub mod transport;

pub use commands::BotCommand;
pub use transport::{ChatTransport, ConnectError, DisabledTransport, TransportEvent};

use std::collections::BTreeSet;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::document::{kebab_case, BotCredentials, BOT_USER_ID};
use crate::remote::RemoteApi;
use crate::store::ConfigStore;
use crate::sync::{random_password, SyncNotifier};
use backoff::ReconnectBackoff;
use transport::{bare_jid, jid_local_part};

/// Event poll interval of the pump thread
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Lock time-to-live while persisting credentials
const CREDENTIAL_LOCK_TTL: Duration = Duration::from_secs(10);

/// Bot component settings
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub xmpp_domain: String,
    pub muc_service: String,
    /// Nick used in every joined room; also the self-message filter
    pub nick: String,
    /// ejabberd web console, revealed by `bot login ej admin`
    pub admin_console_url: String,
}

impl BotConfig {
    pub fn new(xmpp_domain: impl Into<String>, muc_service: impl Into<String>) -> Self {
        let xmpp_domain = xmpp_domain.into();
        let admin_console_url = format!("https://{}:5280/admin/", xmpp_domain);
        Self {
            xmpp_domain,
            muc_service: muc_service.into(),
            nick: BOT_USER_ID.to_string(),
            admin_console_url,
        }
    }
}

/// Connection state as reported by `bot status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotState {
    Offline,
    Connecting,
    Connected,
    /// Alive but unable to hold a session; carries the diagnostic
    Degraded(String),
}

impl BotState {
    fn describe(&self) -> String {
        match self {
            Self::Offline => "offline".to_string(),
            Self::Connecting => "connecting".to_string(),
            Self::Connected => "connected".to_string(),
            Self::Degraded(reason) => format!("degraded ({})", reason),
        }
    }
}

/// Which service a message targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetService {
    Dm,
    Muc,
}

/// Address of an outgoing message; the full JID is derived from the
/// configured domains
#[derive(Debug, Clone)]
pub struct MessageTarget {
    pub local_part: String,
    pub service: TargetService,
}

/// Produces meeting links for `bot create meet`
pub trait MeetLinkProvider: Send + Sync {
    fn meet_link(&self, name: Option<&str>) -> String;
}

/// Jitsi-style links: `<base>/<room-slug>`
pub struct JitsiMeetLinks {
    base_url: String,
}

impl JitsiMeetLinks {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl MeetLinkProvider for JitsiMeetLinks {
    fn meet_link(&self, name: Option<&str>) -> String {
        let slug = match name.map(kebab_case) {
            Some(s) if !s.is_empty() => s,
            _ => format!("meet-{:08x}", rand::random::<u32>()),
        };
        format!("{}/{}", self.base_url.trim_end_matches('/'), slug)
    }
}

enum BotOp {
    Join(String),
    SendDirect { user_id: String, body: String },
    SendRoom { room_id: String, body: String },
    Suspend,
    Resume,
    Shutdown,
}

#[derive(Default)]
struct BotShared {
    state: Option<BotState>,
    /// Stable ids of rooms the session currently sits in
    joined: BTreeSet<String>,
    credentials: Option<BotCredentials>,
}

struct BotInner {
    ops: Mutex<Sender<BotOp>>,
    shared: Mutex<BotShared>,
    config: BotConfig,
}

/// Cloneable handle to the bot; this is what gets wired into the sync
/// engine
#[derive(Clone)]
pub struct BotHandle {
    inner: Arc<BotInner>,
}

impl BotHandle {
    fn send_op(&self, op: BotOp) {
        let sender = self.inner.ops.lock().expect("ops mutex poisoned");
        if sender.send(op).is_err() {
            warn!("bot pump is gone, dropping operation");
        }
    }

    pub fn state(&self) -> BotState {
        self.inner
            .shared
            .lock()
            .expect("bot shared mutex poisoned")
            .state
            .clone()
            .unwrap_or(BotState::Offline)
    }

    pub fn joined_rooms(&self) -> BTreeSet<String> {
        self.inner
            .shared
            .lock()
            .expect("bot shared mutex poisoned")
            .joined
            .clone()
    }

    /// Send a message. Direct messages addressed to the bot's own user id
    /// are dropped - affiliation changes must not notify the bot about
    /// itself.
    pub fn send_message(&self, target: MessageTarget, text: &str) {
        match target.service {
            TargetService::Dm => {
                if target.local_part == BOT_USER_ID {
                    debug!("dropping self-addressed direct message");
                    return;
                }
                self.send_op(BotOp::SendDirect {
                    user_id: target.local_part,
                    body: text.to_string(),
                });
            }
            TargetService::Muc => {
                self.send_op(BotOp::SendRoom {
                    room_id: target.local_part,
                    body: text.to_string(),
                });
            }
        }
    }
}

impl SyncNotifier for BotHandle {
    fn room_created(&self, room_id: &str) {
        self.send_op(BotOp::Join(room_id.to_string()));
    }

    fn direct_message(&self, user_id: &str, body: &str) {
        self.send_message(
            MessageTarget {
                local_part: user_id.to_string(),
                service: TargetService::Dm,
            },
            body,
        );
    }
}

/// The admin bot component: pump thread plus handle
pub struct AdminBot {
    handle: BotHandle,
    thread: Option<JoinHandle<()>>,
}

impl AdminBot {
    /// Spawn the pump thread. Credential bootstrap and the first connect
    /// happen on the pump, so startup never blocks on the network.
    pub fn start(
        config: BotConfig,
        transport: Box<dyn ChatTransport>,
        remote: Arc<dyn RemoteApi>,
        store: Arc<ConfigStore>,
        meet: Arc<dyn MeetLinkProvider>,
    ) -> crate::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let inner = Arc::new(BotInner {
            ops: Mutex::new(tx),
            shared: Mutex::new(BotShared::default()),
            config,
        });
        let handle = BotHandle {
            inner: inner.clone(),
        };

        let pump = BotPump {
            inner,
            ops: rx,
            transport,
            remote,
            store,
            meet,
            backoff: ReconnectBackoff::default(),
            credentials: None,
            retry_at: None,
            sasl_heal_used: false,
            suspended: false,
        };

        let thread = thread::Builder::new()
            .name("admin-bot".to_string())
            .spawn(move || pump.run())
            .map_err(crate::Error::Io)?;

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> BotHandle {
        self.handle.clone()
    }

    /// Park the dispatcher while keeping the session alive
    pub fn suspend(&self) {
        self.handle.send_op(BotOp::Suspend);
    }

    pub fn resume(&self) {
        self.handle.send_op(BotOp::Resume);
    }

    /// Disconnect and stop the pump thread
    pub fn halt(mut self) {
        self.handle.send_op(BotOp::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

struct BotPump {
    inner: Arc<BotInner>,
    ops: Receiver<BotOp>,
    transport: Box<dyn ChatTransport>,
    remote: Arc<dyn RemoteApi>,
    store: Arc<ConfigStore>,
    meet: Arc<dyn MeetLinkProvider>,
    backoff: ReconnectBackoff,
    credentials: Option<BotCredentials>,
    retry_at: Option<Instant>,
    /// One password reset per outage; cleared on successful connect
    sasl_heal_used: bool,
    suspended: bool,
}

impl BotPump {
    fn run(mut self) {
        info!("admin bot starting");
        self.bootstrap();

        loop {
            loop {
                match self.ops.try_recv() {
                    Ok(BotOp::Shutdown) | Err(TryRecvError::Disconnected) => {
                        self.transport.disconnect();
                        self.set_state(BotState::Offline);
                        info!("admin bot stopped");
                        return;
                    }
                    Ok(op) => self.handle_op(op),
                    Err(TryRecvError::Empty) => break,
                }
            }

            if self.suspended {
                thread::sleep(POLL_INTERVAL);
                continue;
            }

            if let Some(at) = self.retry_at {
                if Instant::now() >= at {
                    self.retry_at = None;
                    self.try_connect(!self.sasl_heal_used, true);
                }
            }

            if let Some(event) = self.transport.next_event(POLL_INTERVAL) {
                self.handle_event(event);
            }
        }
    }

    fn set_state(&self, state: BotState) {
        self.inner
            .shared
            .lock()
            .expect("bot shared mutex poisoned")
            .state = Some(state);
    }

    fn config(&self) -> &BotConfig {
        &self.inner.config
    }

    // -- credential lifecycle ------------------------------------------

    fn bootstrap(&mut self) {
        match self.ensure_credentials() {
            Ok(credentials) => {
                self.credentials = Some(credentials);
                self.try_connect(true, false);
            }
            Err(e) => {
                error!("bot credential bootstrap failed: {}", e);
                self.set_state(BotState::Degraded(e.to_string()));
            }
        }
    }

    /// Make sure the `admin` account exists and we hold its password
    fn ensure_credentials(&mut self) -> crate::Result<BotCredentials> {
        let doc = self.store.read()?;
        let stored = doc.tracking.admin_credentials.clone();

        let domain = self.config().xmpp_domain.clone();
        let known = self
            .remote
            .registered_users(&domain)?
            .iter()
            .any(|u| u == BOT_USER_ID);

        if !known {
            info!("registering admin bot account");
            let credentials = fresh_credentials();
            self.remote
                .register(BOT_USER_ID, &domain, &credentials.password)?;
            self.persist_credentials(&credentials);
            return Ok(credentials);
        }

        if let Some(credentials) = stored {
            return Ok(credentials);
        }

        // The account exists but we lost its password; take it over.
        info!("admin bot account exists without stored credentials, resetting");
        let credentials = fresh_credentials();
        self.remote
            .change_password(BOT_USER_ID, &domain, &credentials.password)?;
        self.persist_credentials(&credentials);
        Ok(credentials)
    }

    /// Store credentials in the tracking section, under the advisory lock
    /// so a concurrent sync cannot interleave.
    fn persist_credentials(&self, credentials: &BotCredentials) {
        for _ in 0..3 {
            match self
                .store
                .lock("admin-bot credential bootstrap", CREDENTIAL_LOCK_TTL)
            {
                Ok(()) => {}
                Err(crate::Error::LockHeld { .. }) => {
                    // A sync is in flight; wait it out
                    thread::sleep(Duration::from_millis(300));
                    continue;
                }
                Err(e) => {
                    warn!("cannot take lock while persisting credentials: {}", e);
                    return;
                }
            }

            let result = self.store.read().and_then(|mut doc| {
                doc.tracking.admin_credentials = Some(credentials.clone());
                self.store.write(&doc).map(|_| ())
            });
            if let Err(e) = self.store.clear_lock() {
                warn!("failed to clear credential lock: {}", e);
            }

            match result {
                Ok(()) => {
                    self.inner
                        .shared
                        .lock()
                        .expect("bot shared mutex poisoned")
                        .credentials = Some(credentials.clone());
                    return;
                }
                Err(e) => {
                    warn!("could not persist bot credentials: {}", e);
                    return;
                }
            }
        }
        warn!("lock contention while persisting credentials, keeping them in memory");
    }

    // -- connection lifecycle ------------------------------------------

    /// Attempt to connect. `allow_heal` permits one SASL-triggered
    /// password reset; `retry_on_policy` distinguishes the reconnect path
    /// (backoff and try again) from bootstrap (stay degraded).
    fn try_connect(&mut self, allow_heal: bool, retry_on_policy: bool) {
        let Some(credentials) = self.credentials.clone() else {
            self.set_state(BotState::Degraded("no credentials".to_string()));
            return;
        };

        self.set_state(BotState::Connecting);
        match self.transport.connect(&credentials) {
            Ok(()) => {
                info!("admin bot connected");
                self.backoff.reset();
                self.sasl_heal_used = false;
                self.retry_at = None;
                self.set_state(BotState::Connected);
                self.rejoin(false);
            }
            Err(ConnectError::Sasl(msg)) if allow_heal && !self.sasl_heal_used => {
                warn!("SASL failure ({}), resetting bot password once", msg);
                self.sasl_heal_used = true;
                let fresh = fresh_credentials();
                match self.remote.change_password(
                    BOT_USER_ID,
                    &self.config().xmpp_domain,
                    &fresh.password,
                ) {
                    Ok(()) => {
                        self.persist_credentials(&fresh);
                        self.credentials = Some(fresh);
                        self.try_connect(false, retry_on_policy);
                    }
                    Err(e) => {
                        error!("password reset failed: {}", e);
                        self.set_state(BotState::Degraded(e.to_string()));
                        self.schedule_retry();
                    }
                }
            }
            Err(ConnectError::Sasl(msg)) => {
                error!("SASL failure after password reset: {}", msg);
                self.set_state(BotState::Degraded(msg));
                self.schedule_retry();
            }
            Err(ConnectError::PolicyViolation(msg)) => {
                // Rate limit or IP ban; fresh credentials would not help
                // and hammering the server makes the ban longer.
                error!("stream policy violation: {}", msg);
                self.set_state(BotState::Degraded(msg));
                if retry_on_policy {
                    self.schedule_retry();
                }
            }
            Err(ConnectError::Unavailable(msg)) => {
                warn!("transport unavailable: {}", msg);
                self.set_state(BotState::Degraded(msg));
            }
            Err(ConnectError::Io(msg)) => {
                warn!("connect failed: {}", msg);
                self.set_state(BotState::Offline);
                self.schedule_retry();
            }
        }
    }

    fn schedule_retry(&mut self) {
        let delay = self.backoff.next_delay();
        debug!("next connection attempt in {:?}", delay);
        self.retry_at = Some(Instant::now() + delay);
    }

    /// Join configured rooms. `only_missing` is the resumed-session path:
    /// rooms the server still considers joined are left alone.
    fn rejoin(&mut self, only_missing: bool) {
        let doc = match self.store.read() {
            Ok(doc) => doc,
            Err(e) => {
                warn!("cannot read document for room join: {}", e);
                return;
            }
        };

        if !only_missing {
            self.inner
                .shared
                .lock()
                .expect("bot shared mutex poisoned")
                .joined
                .clear();
        }

        for room_id in doc.room_ids() {
            self.join_room(&room_id);
        }
    }

    fn join_room(&mut self, room_id: &str) {
        {
            let shared = self.inner.shared.lock().expect("bot shared mutex poisoned");
            if shared.joined.contains(room_id) {
                return;
            }
            if shared.state != Some(BotState::Connected) {
                debug!("not connected, deferring join of {}", room_id);
                return;
            }
        }

        let room_jid = format!("{}@{}", room_id, self.config().muc_service);
        let nick = self.config().nick.clone();
        match self.transport.join_room(&room_jid, &nick) {
            Ok(()) => {
                info!("joined {}", room_jid);
                self.inner
                    .shared
                    .lock()
                    .expect("bot shared mutex poisoned")
                    .joined
                    .insert(room_id.to_string());
            }
            Err(e) => warn!("failed to join {}: {}", room_jid, e),
        }
    }

    // -- dispatch -------------------------------------------------------

    fn handle_op(&mut self, op: BotOp) {
        match op {
            BotOp::Join(room_id) => self.join_room(&room_id),
            BotOp::SendDirect { user_id, body } => {
                let jid = format!("{}@{}", user_id, self.config().xmpp_domain);
                if let Err(e) = self.transport.send_direct(&jid, &body) {
                    warn!("direct message to {} failed: {}", jid, e);
                }
            }
            BotOp::SendRoom { room_id, body } => {
                let jid = format!("{}@{}", room_id, self.config().muc_service);
                if let Err(e) = self.transport.send_room(&jid, &body) {
                    warn!("room message to {} failed: {}", jid, e);
                }
            }
            BotOp::Suspend => {
                info!("admin bot suspended");
                self.suspended = true;
            }
            BotOp::Resume => {
                info!("admin bot resumed");
                self.suspended = false;
                let connected = {
                    let shared = self.inner.shared.lock().expect("bot shared mutex poisoned");
                    shared.state == Some(BotState::Connected)
                };
                if connected {
                    self.rejoin(true);
                }
            }
            BotOp::Shutdown => unreachable!("shutdown handled by the pump loop"),
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { resumed } => {
                info!(resumed, "session established");
                self.backoff.reset();
                self.sasl_heal_used = false;
                self.retry_at = None;
                self.set_state(BotState::Connected);
                self.rejoin(resumed);
            }
            TransportEvent::ConnectionLost { error } => {
                warn!("session lost: {}", error);
                self.set_state(BotState::Offline);
                self.schedule_retry();
            }
            TransportEvent::Direct { from_jid, body } => self.on_direct(&from_jid, &body),
            TransportEvent::Room {
                room_jid,
                sender_nick,
                body,
            } => {
                if sender_nick == self.config().nick {
                    return;
                }
                self.on_room(&room_jid, &sender_nick, &body);
            }
        }
    }

    fn on_direct(&mut self, from_jid: &str, body: &str) {
        let Some(command) = commands::parse(body) else {
            return;
        };

        let sender = jid_local_part(from_jid).to_string();
        let reply = self.execute_dm(command, &sender);
        let to = bare_jid(from_jid).to_string();
        if let Err(e) = self.transport.send_direct(&to, &reply) {
            warn!("reply to {} failed: {}", to, e);
        }
    }

    fn on_room(&mut self, room_jid: &str, _sender_nick: &str, body: &str) {
        let Some(command) = commands::parse(body) else {
            return;
        };

        let reply = self.execute_muc(command);
        if let Err(e) = self.transport.send_room(room_jid, &reply) {
            warn!("reply to {} failed: {}", room_jid, e);
        }
    }

    fn execute_dm(&mut self, command: BotCommand, sender: &str) -> String {
        match command {
            BotCommand::Help => commands::dm_help().to_string(),
            BotCommand::Status => self.status_text(),
            BotCommand::CreateMeet { name } => {
                format!("Meeting ready: {}", self.meet.meet_link(name.as_deref()))
            }
            BotCommand::LoginUserAdmin => {
                if !self.is_owner(sender) {
                    return "This command is restricted to owners.".to_string();
                }
                let fresh = fresh_credentials();
                match self.remote.change_password(
                    BOT_USER_ID,
                    &self.config().xmpp_domain,
                    &fresh.password,
                ) {
                    Ok(()) => {
                        self.persist_credentials(&fresh);
                        let reply = format!(
                            "Account: {}@{}\nPassword: {}",
                            BOT_USER_ID,
                            self.config().xmpp_domain,
                            fresh.password
                        );
                        self.credentials = Some(fresh);
                        reply
                    }
                    Err(e) => format!("Password reset failed: {}", e),
                }
            }
            BotCommand::LoginEjAdmin => {
                if !self.is_owner(sender) {
                    return "This command is restricted to owners.".to_string();
                }
                match &self.credentials {
                    Some(credentials) => format!(
                        "ejabberd admin account: {}@{}\nPassword: {}\nConsole: {}",
                        credentials.username,
                        self.config().xmpp_domain,
                        credentials.password,
                        self.config().admin_console_url
                    ),
                    None => "No credentials on file yet.".to_string(),
                }
            }
        }
    }

    /// MUC verb table: credential verbs are DM-only
    fn execute_muc(&mut self, command: BotCommand) -> String {
        match command {
            BotCommand::Help => commands::muc_help().to_string(),
            BotCommand::Status => self.status_text(),
            BotCommand::CreateMeet { name } => {
                format!("Meeting ready: {}", self.meet.meet_link(name.as_deref()))
            }
            BotCommand::LoginUserAdmin | BotCommand::LoginEjAdmin => {
                "Ask me in a direct message.".to_string()
            }
        }
    }

    fn is_owner(&self, sender: &str) -> bool {
        match self.store.read() {
            Ok(doc) => doc
                .find_member(sender)
                .map(|m| m.groups.contains(&crate::groupkey::GroupKey::owner()))
                .unwrap_or(false),
            Err(e) => {
                warn!("cannot read document for owner check: {}", e);
                false
            }
        }
    }

    fn status_text(&self) -> String {
        let doc = match self.store.read() {
            Ok(doc) => doc,
            Err(e) => return format!("Document unreadable: {}", e),
        };

        let shared = self.inner.shared.lock().expect("bot shared mutex poisoned");
        let state = shared
            .state
            .clone()
            .unwrap_or(BotState::Offline)
            .describe();
        let joined: Vec<&str> = shared.joined.iter().map(String::as_str).collect();

        format!(
            "{} members, {} rooms, {} groups managed. Connection: {}. Joined rooms: {}.",
            doc.members.len(),
            doc.rooms.len(),
            doc.groups.len(),
            state,
            if joined.is_empty() {
                "none".to_string()
            } else {
                joined.join(", ")
            }
        )
    }
}

fn fresh_credentials() -> BotCredentials {
    BotCredentials {
        username: BOT_USER_ID.to_string(),
        password: random_password(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meet_links() {
        let links = JitsiMeetLinks::new("https://meet.example.org/");
        assert_eq!(
            links.meet_link(Some("Weekly Standup")),
            "https://meet.example.org/weekly-standup"
        );

        let random = links.meet_link(None);
        assert!(random.starts_with("https://meet.example.org/meet-"));
    }

    #[test]
    fn test_bot_config_defaults() {
        let config = BotConfig::new("example.org", "conference.example.org");
        assert_eq!(config.nick, "admin");
        assert_eq!(config.admin_console_url, "https://example.org:5280/admin/");
    }

    #[test]
    fn test_fresh_credentials() {
        let creds = fresh_credentials();
        assert_eq!(creds.username, "admin");
        assert!(!creds.password.is_empty());
    }
}
