//! Presence tracking: who is in the room and where their cursors are.
//!
//! ## Architecture
//!
//! ```text
//! EventChannel
//!       │  UsersUpdate / PresenceUpdate / UserJoined
//!       │  CursorMove / UserTyping / UserStopTyping / Disconnect
//!       ▼
//! PresenceRoster::apply()
//!       │
//!       ▼
//! users() / others() / cursors()   (what the UI renders)
//! ```
//!
//! The roster is plain state; [`crate::session::CollaborationSession`]
//! owns one behind a lock and feeds it from channel handlers.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use codereview_core::{CollaboratingUser, CursorPosition, UserId};

use crate::event::{CollabEvent, CursorMove};

/// Render data for one remote cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorMarker {
    pub user_id: UserId,
    pub user_name: String,
    pub color: String,
    pub position: CursorPosition,
    pub is_typing: bool,
}

/// Present users of one room, in arrival order.
#[derive(Debug, Clone)]
pub struct PresenceRoster {
    local_user_id: UserId,
    users: Vec<CollaboratingUser>,
}

fn millis_to_datetime(timestamp: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(timestamp)
        .single()
        .unwrap_or_else(Utc::now)
}

impl PresenceRoster {
    /// Empty roster for the given local user.
    pub fn new(local_user_id: UserId) -> Self {
        Self {
            local_user_id,
            users: Vec::new(),
        }
    }

    /// Fold one channel event into the roster.
    ///
    /// Returns `true` if anything visible changed.
    pub fn apply(&mut self, event: &CollabEvent) -> bool {
        match event {
            CollabEvent::UsersUpdate { users } | CollabEvent::PresenceUpdate { users } => {
                self.users = users.clone();
                true
            }

            CollabEvent::UserJoined { user, joined_at } => {
                let mut user = user.clone();
                user.last_active = *joined_at;
                match self.users.iter_mut().find(|u| u.id() == user.id()) {
                    Some(existing) => *existing = user,
                    None => self.users.push(user),
                }
                true
            }

            CollabEvent::CursorMove(cursor) => self.apply_cursor(cursor),

            CollabEvent::UserTyping(typing) => self.update(typing.user_id, |u| {
                u.is_typing = true;
                u.last_active = millis_to_datetime(typing.timestamp);
            }),

            CollabEvent::UserStopTyping { user_id, timestamp } => self.update(*user_id, |u| {
                u.is_typing = false;
                u.last_active = millis_to_datetime(*timestamp);
            }),

            CollabEvent::Disconnect => {
                let changed = !self.users.is_empty();
                self.users.clear();
                changed
            }

            CollabEvent::Connect { .. }
            | CollabEvent::CodeUpdate(_)
            | CollabEvent::FileViewChange(_) => false,
        }
    }

    /// Cursor moves from people we have never seen are ignored; they show up
    /// with the next presence snapshot.
    fn apply_cursor(&mut self, cursor: &CursorMove) -> bool {
        self.update(cursor.user_id, |u| {
            u.cursor_position = Some(CursorPosition {
                file_id: cursor.file_id,
                line: cursor.line,
                column: cursor.column,
            });
            u.last_active = millis_to_datetime(cursor.timestamp);
        })
    }

    fn update(&mut self, user_id: UserId, f: impl FnOnce(&mut CollaboratingUser)) -> bool {
        match self.users.iter_mut().find(|u| u.id() == user_id) {
            Some(user) => {
                f(user);
                true
            }
            None => false,
        }
    }

    /// Everyone present, including the local user.
    pub fn users(&self) -> &[CollaboratingUser] {
        &self.users
    }

    /// Everyone present except the local user.
    pub fn others(&self) -> impl Iterator<Item = &CollaboratingUser> {
        let me = self.local_user_id;
        self.users.iter().filter(move |u| u.id() != me)
    }

    pub fn user(&self, user_id: UserId) -> Option<&CollaboratingUser> {
        self.users.iter().find(|u| u.id() == user_id)
    }

    /// Remote cursors to draw, optionally limited to one file.
    pub fn cursors(&self, file_id: Option<codereview_core::FileId>) -> Vec<CursorMarker> {
        self.others()
            .filter_map(|u| {
                let position = u.cursor_position?;
                if file_id.is_some_and(|f| f != position.file_id) {
                    return None;
                }
                Some(CursorMarker {
                    user_id: u.id(),
                    user_name: u.user.name.clone(),
                    color: u.color.clone(),
                    position,
                    is_typing: u.is_typing,
                })
            })
            .collect()
    }

    /// Drop users idle for longer than `timeout` as of `now`.
    ///
    /// The local user is never pruned. Returns the removed ids.
    pub fn prune_idle(&mut self, timeout: Duration, now: DateTime<Utc>) -> Vec<UserId> {
        let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
        let me = self.local_user_id;
        let mut removed = Vec::new();
        self.users.retain(|u| {
            let keep = u.id() == me || now - u.last_active <= timeout;
            if !keep {
                removed.push(u.id());
            }
            keep
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn local_user_id(&self) -> UserId {
        self.local_user_id
    }
}
