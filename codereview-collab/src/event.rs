//! Collaboration events.
//!
//! One variant per event kind, so handlers match exhaustively instead of
//! dispatching on strings. Each kind keeps its wire name
//! (`"cursor:move"`, `"users:update"`, …) for logging and for consumers
//! that still key on it.
//!
//! ```text
//!  channel.emit(event)
//!       │
//!       ▼
//!  EventEnvelope { sequence, origin, event }
//!       │
//!       ├── handler #1 (subscription order)
//!       ├── handler #2
//!       └── …
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use codereview_core::{CollaboratingUser, FileId, UserId};
use serde::{Deserialize, Serialize};

/// Discriminant of [`CollabEvent`], used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Connect,
    Disconnect,
    UsersUpdate,
    CodeUpdate,
    CursorMove,
    UserTyping,
    UserStopTyping,
    PresenceUpdate,
    UserJoined,
    FileViewChange,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::Connect,
        EventKind::Disconnect,
        EventKind::UsersUpdate,
        EventKind::CodeUpdate,
        EventKind::CursorMove,
        EventKind::UserTyping,
        EventKind::UserStopTyping,
        EventKind::PresenceUpdate,
        EventKind::UserJoined,
        EventKind::FileViewChange,
    ];

    /// Wire name of the event.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connect => "connect",
            EventKind::Disconnect => "disconnect",
            EventKind::UsersUpdate => "users:update",
            EventKind::CodeUpdate => "code:update",
            EventKind::CursorMove => "cursor:move",
            EventKind::UserTyping => "user:typing",
            EventKind::UserStopTyping => "user:stop_typing",
            EventKind::PresenceUpdate => "presence:update",
            EventKind::UserJoined => "user:joined",
            EventKind::FileViewChange => "file:view_change",
        }
    }

    /// Whether a sent event of this kind also comes back as a peer copy.
    ///
    /// Cursor moves are echoed once only.
    pub fn has_peer_copy(&self) -> bool {
        !matches!(self, EventKind::CursorMove)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event name: {0}")]
pub struct UnknownEvent(pub String);

impl FromStr for EventKind {
    type Err = UnknownEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownEvent(s.to_string()))
    }
}

// ───────────────────────────────────────────────────────────────────
// Payloads
// ───────────────────────────────────────────────────────────────────

/// Shared editor contents changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeUpdate {
    pub code: String,
    /// `Some(false)` on the copy that simulates another peer's broadcast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_self: Option<bool>,
}

/// A collaborator's caret moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorMove {
    pub user_id: UserId,
    pub user_name: String,
    pub user_avatar: String,
    pub color: String,
    pub file_id: FileId,
    pub line: u32,
    pub column: u32,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl CursorMove {
    /// Cursor event for a present user at the given position.
    pub fn for_user(user: &CollaboratingUser, file_id: FileId, line: u32, column: u32) -> Self {
        Self {
            user_id: user.id(),
            user_name: user.user.name.clone(),
            user_avatar: user.user.avatar.clone(),
            color: user.color.clone(),
            file_id,
            line,
            column,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Typing {
    pub user_id: UserId,
    pub user_name: String,
    pub file_id: FileId,
    pub line_number: u32,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileViewChange {
    pub user_id: UserId,
    pub user_name: String,
    pub file_id: FileId,
    pub file_name: String,
    pub timestamp: i64,
}

/// Every event the collaboration channel carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum CollabEvent {
    #[serde(rename = "connect")]
    Connect { room: String },
    #[serde(rename = "disconnect")]
    Disconnect,
    #[serde(rename = "users:update")]
    UsersUpdate { users: Vec<CollaboratingUser> },
    #[serde(rename = "code:update")]
    CodeUpdate(CodeUpdate),
    #[serde(rename = "cursor:move")]
    CursorMove(CursorMove),
    #[serde(rename = "user:typing")]
    UserTyping(Typing),
    #[serde(rename = "user:stop_typing")]
    UserStopTyping { user_id: UserId, timestamp: i64 },
    #[serde(rename = "presence:update")]
    PresenceUpdate { users: Vec<CollaboratingUser> },
    #[serde(rename = "user:joined")]
    UserJoined {
        user: CollaboratingUser,
        joined_at: DateTime<Utc>,
    },
    #[serde(rename = "file:view_change")]
    FileViewChange(FileViewChange),
}

impl CollabEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            CollabEvent::Connect { .. } => EventKind::Connect,
            CollabEvent::Disconnect => EventKind::Disconnect,
            CollabEvent::UsersUpdate { .. } => EventKind::UsersUpdate,
            CollabEvent::CodeUpdate(_) => EventKind::CodeUpdate,
            CollabEvent::CursorMove(_) => EventKind::CursorMove,
            CollabEvent::UserTyping(_) => EventKind::UserTyping,
            CollabEvent::UserStopTyping { .. } => EventKind::UserStopTyping,
            CollabEvent::PresenceUpdate { .. } => EventKind::PresenceUpdate,
            CollabEvent::UserJoined { .. } => EventKind::UserJoined,
            CollabEvent::FileViewChange(_) => EventKind::FileViewChange,
        }
    }

    /// Shorthand for a local code change.
    pub fn code(code: impl Into<String>) -> Self {
        CollabEvent::CodeUpdate(CodeUpdate {
            code: code.into(),
            from_self: None,
        })
    }

    /// The copy delivered as if another peer had broadcast it.
    pub fn peer_copy(&self) -> Self {
        match self {
            CollabEvent::CodeUpdate(update) => CollabEvent::CodeUpdate(CodeUpdate {
                from_self: Some(false),
                ..update.clone()
            }),
            other => other.clone(),
        }
    }
}

/// Who produced an event, from the local client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Lifecycle and presence snapshots generated by the channel itself
    System,
    /// Our own `send`, delivered back to us
    Echo,
    /// Simulated broadcast from another peer
    Peer,
    /// Simulated peer activity (background generator)
    Synthetic,
}

impl Origin {
    /// Whether the event came from someone other than the local user.
    pub fn is_remote(&self) -> bool {
        matches!(self, Origin::Peer | Origin::Synthetic)
    }
}

/// What a handler receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Per-channel emission counter, strictly increasing.
    pub sequence: u64,
    pub origin: Origin,
    pub event: CollabEvent,
}

impl EventEnvelope {
    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }
}
