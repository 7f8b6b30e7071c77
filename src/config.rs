// src/config.rs

//! Daemon configuration.
//!
//! Loaded from a TOML file; every key has a default so a minimal file (or
//! none at all) works for local development.
//!
//! # Example majordomo.toml
//!
//! ```toml
//! db_folder = "/var/lib/majordomo"
//! admin_api_url = "http://127.0.0.1:5443/api"
//! xmpp_domain = "example.org"
//! muc_service = "conference.example.org"
//! env = "prod"
//! sync_timeout_s = 60
//!
//! [[managed_muc_options]]
//! name = "persistent"
//! value = "true"
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::bot::BotConfig;
use crate::error::{Error, Result};
use crate::remote::{RemoteConfig, RoomOption};
use crate::sync::SyncConfig;

/// Deployment environment; controls generated-password policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Env {
    Dev,
    Test,
    Prod,
}

impl fmt::Display for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dev => write!(f, "dev"),
            Self::Test => write!(f, "test"),
            Self::Prod => write!(f, "prod"),
        }
    }
}

impl FromStr for Env {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "dev" => Ok(Self::Dev),
            "test" => Ok(Self::Test),
            "prod" => Ok(Self::Prod),
            other => Err(format!("unknown environment: {} (dev, test or prod)", other)),
        }
    }
}

/// Everything the lifecycle layer hands to the core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_db_folder")]
    pub db_folder: PathBuf,

    #[serde(default = "default_admin_api_url")]
    pub admin_api_url: String,

    #[serde(default = "default_xmpp_domain")]
    pub xmpp_domain: String,

    /// MUC service domain; defaults to `conference.<xmpp_domain>`
    #[serde(default)]
    pub muc_service: Option<String>,

    #[serde(default = "default_env")]
    pub env: Env,

    /// Fixed password for accounts created in dev and test
    #[serde(default = "default_test_password")]
    pub default_test_password: String,

    /// Default options merged into every created room
    #[serde(default = "default_muc_options")]
    pub managed_muc_options: Vec<RoomOption>,

    /// Advisory lock time-to-live for one sync, in seconds
    #[serde(default = "default_sync_timeout_s")]
    pub sync_timeout_s: u64,

    /// Config-folder poll interval, in milliseconds
    #[serde(default = "default_watch_poll_ms")]
    pub watch_poll_ms: u64,

    /// Base URL for `bot create meet` links
    #[serde(default = "default_meet_base_url")]
    pub meet_base_url: String,
}

fn default_db_folder() -> PathBuf {
    PathBuf::from("/var/lib/majordomo")
}

fn default_admin_api_url() -> String {
    "http://127.0.0.1:5443/api".to_string()
}

fn default_xmpp_domain() -> String {
    "localhost".to_string()
}

fn default_env() -> Env {
    Env::Dev
}

fn default_test_password() -> String {
    "majordomo-dev-password".to_string()
}

fn default_muc_options() -> Vec<RoomOption> {
    vec![
        RoomOption::new("persistent", "true"),
        RoomOption::new("members_only", "true"),
        RoomOption::new("public_list", "false"),
    ]
}

fn default_sync_timeout_s() -> u64 {
    60
}

fn default_watch_poll_ms() -> u64 {
    2000
}

fn default_meet_base_url() -> String {
    "https://meet.jit.si".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_folder: default_db_folder(),
            admin_api_url: default_admin_api_url(),
            xmpp_domain: default_xmpp_domain(),
            muc_service: None,
            env: default_env(),
            default_test_password: default_test_password(),
            managed_muc_options: default_muc_options(),
            sync_timeout_s: default_sync_timeout_s(),
            watch_poll_ms: default_watch_poll_ms(),
            meet_base_url: default_meet_base_url(),
        }
    }
}

impl AppConfig {
    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        toml::from_str(&text)
            .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))
    }

    /// Load from a file when given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    /// MUC service domain, derived from the XMPP domain unless overridden
    pub fn muc_service(&self) -> String {
        self.muc_service
            .clone()
            .unwrap_or_else(|| format!("conference.{}", self.xmpp_domain))
    }

    pub fn remote(&self) -> RemoteConfig {
        RemoteConfig {
            admin_api_url: self.admin_api_url.clone(),
            xmpp_domain: self.xmpp_domain.clone(),
            muc_service: self.muc_service(),
        }
    }

    pub fn sync(&self) -> SyncConfig {
        SyncConfig {
            env: self.env,
            default_test_password: self.default_test_password.clone(),
            managed_muc_options: self.managed_muc_options.clone(),
            xmpp_domain: self.xmpp_domain.clone(),
            muc_service: self.muc_service(),
        }
    }

    pub fn bot(&self) -> BotConfig {
        BotConfig::new(self.xmpp_domain.clone(), self.muc_service())
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_s)
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_poll_ms)
    }
}
