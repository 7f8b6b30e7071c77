// src/lifecycle.rs

//! Component graph.
//!
//! Initialization order is config-store -> remote-api -> sync-engine ->
//! admin-bot -> watcher, followed by one startup sync. `suspend` and
//! `resume` keep the XMPP session alive across development reloads -
//! reconnect storms earn IP bans from the server - by parking the bot's
//! dispatcher and the watcher without tearing either down.

use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::bot::{AdminBot, BotHandle, ChatTransport, JitsiMeetLinks};
use crate::config::AppConfig;
use crate::mutator::Mutator;
use crate::remote::{AdminApiClient, RemoteApi};
use crate::store::ConfigStore;
use crate::sync::{SyncEngine, SyncNotifier};
use crate::watcher::FileWatcher;

/// Late-bound notifier: the engine is constructed before the bot exists,
/// so the bot handle is slotted in once it is up. Until then downstream
/// effects are dropped.
#[derive(Default)]
pub struct NotifierCell {
    handle: Mutex<Option<BotHandle>>,
}

impl NotifierCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, handle: BotHandle) {
        *self.handle.lock().expect("notifier mutex poisoned") = Some(handle);
    }
}

impl SyncNotifier for NotifierCell {
    fn room_created(&self, room_id: &str) {
        if let Some(handle) = &*self.handle.lock().expect("notifier mutex poisoned") {
            handle.room_created(room_id);
        }
    }

    fn direct_message(&self, user_id: &str, body: &str) {
        if let Some(handle) = &*self.handle.lock().expect("notifier mutex poisoned") {
            handle.direct_message(user_id, body);
        }
    }
}

/// The running daemon: every component, owned
pub struct App {
    store: Arc<ConfigStore>,
    mutator: Arc<Mutator>,
    bot: Option<AdminBot>,
    watcher: Option<FileWatcher>,
}

impl App {
    /// Wire and start every component, then run the startup sync.
    ///
    /// The transport is injected: production deployments adapt their XMPP
    /// client library, tests script one.
    pub fn init(config: AppConfig, transport: Box<dyn ChatTransport>) -> crate::Result<Self> {
        info!(env = %config.env, folder = %config.db_folder.display(), "starting");

        let store = Arc::new(ConfigStore::open(&config.db_folder)?);
        let remote: Arc<dyn RemoteApi> = Arc::new(AdminApiClient::new(config.remote())?);

        let notifier = Arc::new(NotifierCell::new());
        let engine = SyncEngine::new(remote.clone(), notifier.clone(), config.sync());
        let mutator = Arc::new(Mutator::new(store.clone(), engine, config.sync_timeout()));

        let meet = Arc::new(JitsiMeetLinks::new(config.meet_base_url.clone()));
        let bot = AdminBot::start(config.bot(), transport, remote, store.clone(), meet)?;
        notifier.set(bot.handle());

        let outcome = mutator.swap_state("startup", |doc| doc);
        if !outcome.is_applied() {
            warn!("startup sync was not applied: {:?}", outcome);
        }

        let watcher = FileWatcher::spawn(store.clone(), mutator.clone(), config.watch_interval());

        Ok(Self {
            store,
            mutator,
            bot: Some(bot),
            watcher: Some(watcher),
        })
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn mutator(&self) -> &Arc<Mutator> {
        &self.mutator
    }

    pub fn bot_handle(&self) -> Option<BotHandle> {
        self.bot.as_ref().map(|b| b.handle())
    }

    /// Park the watcher and the bot dispatcher, keeping the session open
    pub fn suspend(&self) {
        info!("suspending");
        if let Some(watcher) = &self.watcher {
            watcher.pause();
        }
        if let Some(bot) = &self.bot {
            bot.suspend();
        }
    }

    /// Undo `suspend`; the bot rejoins any room it is missing from
    pub fn resume(&self) {
        info!("resuming");
        if let Some(bot) = &self.bot {
            bot.resume();
        }
        if let Some(watcher) = &self.watcher {
            watcher.resume();
        }
    }

    /// Stop every component in reverse initialization order
    pub fn halt(mut self) {
        info!("halting");
        if let Some(mut watcher) = self.watcher.take() {
            watcher.stop();
        }
        if let Some(bot) = self.bot.take() {
            bot.halt();
        }
    }
}

/// Convenience for one-shot CLI use: store + mutator without bot or
/// watcher, dropping notifications.
pub fn open_offline(config: &AppConfig, db_folder: Option<&Path>) -> crate::Result<(Arc<ConfigStore>, Mutator)> {
    let folder = db_folder.unwrap_or(&config.db_folder);
    let store = Arc::new(ConfigStore::open(folder)?);
    let remote: Arc<dyn RemoteApi> = Arc::new(AdminApiClient::new(config.remote())?);
    let engine = SyncEngine::new(
        remote,
        Arc::new(crate::sync::NullNotifier),
        config.sync(),
    );
    let mutator = Mutator::new(store.clone(), engine, config.sync_timeout());
    Ok((store, mutator))
}
