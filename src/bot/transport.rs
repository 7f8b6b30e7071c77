// src/bot/transport.rs

//! The XMPP session seam.
//!
//! The wire protocol is not part of this crate; the bot drives a
//! [`ChatTransport`] and any XMPP stack can sit behind it. The trait is
//! deliberately small: connect with credentials, join rooms, send, and a
//! polled event stream. Production deployments hand `App::init` an adapter
//! over their client library; the test suite scripts one in memory.

use std::time::Duration;
use thiserror::Error;

use crate::document::BotCredentials;

/// Why a connection attempt failed.
///
/// The distinction matters for self-healing: a SASL failure means the
/// stored password is stale and one reset is worth trying; a stream-level
/// policy violation means the server is rate-limiting or banning us and a
/// retry with fresh credentials would make it worse.
#[derive(Debug, Clone, Error)]
pub enum ConnectError {
    #[error("SASL authentication failed: {0}")]
    Sasl(String),

    #[error("stream policy violation: {0}")]
    PolicyViolation(String),

    /// No transport is wired in; the bot stays degraded
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("connection error: {0}")]
    Io(String),
}

/// Events the session surfaces to the bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Authenticated; `resumed` when the server resumed the previous
    /// session rather than starting a fresh one
    Connected { resumed: bool },
    /// The session closed on error; the reconnection manager takes over
    ConnectionLost { error: String },
    /// Incoming direct message
    Direct { from_jid: String, body: String },
    /// Incoming MUC message
    Room {
        room_jid: String,
        sender_nick: String,
        body: String,
    },
}

/// A long-lived XMPP client session
pub trait ChatTransport: Send {
    fn connect(&mut self, credentials: &BotCredentials) -> Result<(), ConnectError>;
    fn disconnect(&mut self);
    fn join_room(&mut self, room_jid: &str, nick: &str) -> Result<(), ConnectError>;
    fn send_direct(&mut self, to_jid: &str, body: &str) -> Result<(), ConnectError>;
    fn send_room(&mut self, room_jid: &str, body: &str) -> Result<(), ConnectError>;
    /// Wait up to `timeout` for the next session event
    fn next_event(&mut self, timeout: Duration) -> Option<TransportEvent>;
}

/// Transport used when no XMPP adapter is wired in. Every connect fails
/// permanently, which parks the bot in its declared-degraded state while
/// reconciliation keeps running.
pub struct DisabledTransport;

impl ChatTransport for DisabledTransport {
    fn connect(&mut self, _credentials: &BotCredentials) -> Result<(), ConnectError> {
        Err(ConnectError::Unavailable(
            "no XMPP transport configured".to_string(),
        ))
    }

    fn disconnect(&mut self) {}

    fn join_room(&mut self, _room_jid: &str, _nick: &str) -> Result<(), ConnectError> {
        Err(ConnectError::Unavailable("not connected".to_string()))
    }

    fn send_direct(&mut self, _to_jid: &str, _body: &str) -> Result<(), ConnectError> {
        Err(ConnectError::Unavailable("not connected".to_string()))
    }

    fn send_room(&mut self, _room_jid: &str, _body: &str) -> Result<(), ConnectError> {
        Err(ConnectError::Unavailable("not connected".to_string()))
    }

    fn next_event(&mut self, timeout: Duration) -> Option<TransportEvent> {
        std::thread::sleep(timeout);
        None
    }
}

pub use crate::remote::{bare_jid, jid_local_part};
