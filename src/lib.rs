// src/lib.rs

//! majordomo - declarative community management for ejabberd
//!
//! Operators describe groups, members, chat rooms and their access policy
//! in one persistent document; majordomo continuously converges the live
//! server (accounts, room affiliations, rosters, bookmarks) toward it and
//! drives a privileged bot account that sits in every managed room.
//!
//! # Architecture
//!
//! - Document-first: all desired state in one validated JSON document,
//!   atomically replaced on every write, no in-memory authoritative copy
//! - Swap-state: every mutation is a validate -> sync -> persist
//!   transaction serialized through an advisory lock file
//! - Eight-phase sync: deletions before creations, one fetch per remote
//!   collection, writes only on real differences
//! - Self-healing bot: stale credentials are reset through the admin API,
//!   lost sessions reconnect with random-increasing backoff

pub mod bot;
pub mod config;
pub mod document;
mod error;
pub mod groupkey;
pub mod lifecycle;
pub mod membership;
pub mod mutator;
pub mod remote;
pub mod schema;
pub mod store;
pub mod sync;
pub mod watcher;

pub use config::{AppConfig, Env};
pub use document::{Document, Member, Room, Tracking, BOT_USER_ID};
pub use error::{Error, Result};
pub use groupkey::{GroupKey, GroupKeyParseError};
pub use lifecycle::App;
pub use membership::{affiliation, Affiliation};
pub use mutator::{Mutator, SwapOutcome};
pub use schema::{validate_document, ValidationErrors, ValidationIssue};
pub use store::ConfigStore;
pub use sync::{ChangeReport, ReportEntry, SyncEngine, SyncOutcome};
