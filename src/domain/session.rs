//! Session and pending-request domain types (§3, §4.2, §4.4).

use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::ids::{RequestId, SessionId};

/// Which specialization of the session machine this is (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionKind {
    Public,
    Private,
}

/// Connection lifecycle state (§4.2): `Disconnected -> Connecting ->
/// (Connected | Failed) -> Disconnecting -> Disconnected`, plus the
/// authenticated sub-state layered on top of `Connected` for private
/// sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Authenticating,
    Authenticated,
    Failed,
    Disconnecting,
}

impl SessionState {
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            SessionState::Connected | SessionState::Authenticating | SessionState::Authenticated
        )
    }

    pub fn is_ready(self, kind: SessionKind) -> bool {
        match kind {
            SessionKind::Public => self == SessionState::Connected,
            SessionKind::Private => self == SessionState::Authenticated,
        }
    }
}

/// Session is one lifecycle of one transport connection plus its protocol
/// state (§3). The Adapter Facade exclusively owns its Sessions; Sessions
/// exclusively own their Transport and Subscription Registry — this struct
/// is the bookkeeping record, not the owner of those live resources (those
/// live in `crate::session_machine::SessionMachine`).
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub kind: SessionKind,
    pub venue: String,
    pub state: SessionState,
    pub reconnect_attempts: u32,
    #[serde(skip)]
    pub last_message_at: Option<Instant>,
    pub has_token: bool,
}

impl SessionInfo {
    pub fn new(id: SessionId, kind: SessionKind, venue: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            venue: venue.into(),
            state: SessionState::Disconnected,
            reconnect_attempts: 0,
            last_message_at: None,
            has_token: false,
        }
    }
}

/// Bookkeeping record for one outstanding request-response exchange (§3, §4.4).
/// The actual completion channel lives in `crate::multiplexer::Multiplexer`;
/// this type is the plain data the multiplexer stores per entry.
#[derive(Debug)]
pub struct PendingRequestInfo {
    pub request_id: RequestId,
    pub method: String,
    pub sent_at: Instant,
    pub timeout_ms: u64,
}

impl PendingRequestInfo {
    pub fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.sent_at).as_millis() as u64 >= self.timeout_ms
    }
}
