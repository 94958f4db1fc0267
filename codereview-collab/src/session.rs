//! A reviewer's membership in one collaboration room.
//!
//! Bundles what a UI needs from the channel: connection status, the
//! presence roster, remote code changes, and outgoing code/cursor
//! broadcasts. Every handler the session registers is removed again when
//! it leaves (or is dropped).
//!
//! ## Data flow
//!
//! ```text
//!  local edit ──► broadcast_code_change() ──► channel.send()
//!                      ▲ suppressed once after a remote change
//!                      │
//!  channel ──► CodeUpdate (Peer/Synthetic) ──► on_remote_code_change(cb)
//!  channel ──► presence events ──► PresenceRoster
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use codereview_core::{CollaboratingUser, FileId, User};
use tokio::time::Instant;

use crate::channel::{handler, ChannelError, EventChannel, Handler};
use crate::event::{CollabEvent, CursorMove, EventKind};
use crate::presence::{CursorMarker, PresenceRoster};

/// Kinds that feed the presence roster.
const PRESENCE_KINDS: [EventKind; 6] = [
    EventKind::UsersUpdate,
    EventKind::PresenceUpdate,
    EventKind::UserJoined,
    EventKind::CursorMove,
    EventKind::UserTyping,
    EventKind::UserStopTyping,
];

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct CollaborationSession {
    channel: EventChannel,
    room: String,
    local_user: User,
    presence: Arc<Mutex<PresenceRoster>>,
    connected: Arc<AtomicBool>,
    /// Set when a remote change was applied locally; the resulting local
    /// change must not be broadcast back.
    remote_update: Arc<AtomicBool>,
    subscriptions: Vec<(EventKind, Handler)>,
    last_cursor_broadcast: Option<Instant>,
    left: bool,
}

impl CollaborationSession {
    /// Subscribe to `channel` and connect it to `room`.
    pub fn join(channel: EventChannel, room: impl Into<String>) -> Self {
        let room = room.into();
        let local_user = channel.roster().current_user().clone();
        let mut session = Self {
            presence: Arc::new(Mutex::new(PresenceRoster::new(local_user.id))),
            connected: Arc::new(AtomicBool::new(false)),
            remote_update: Arc::new(AtomicBool::new(false)),
            subscriptions: Vec::new(),
            last_cursor_broadcast: None,
            left: false,
            channel,
            room,
            local_user,
        };

        let connected = session.connected.clone();
        session.subscribe(
            EventKind::Connect,
            handler(move |_| connected.store(true, Ordering::SeqCst)),
        );

        let connected = session.connected.clone();
        let presence = session.presence.clone();
        session.subscribe(
            EventKind::Disconnect,
            handler(move |env| {
                connected.store(false, Ordering::SeqCst);
                lock(&presence).apply(&env.event);
            }),
        );

        for kind in PRESENCE_KINDS {
            let presence = session.presence.clone();
            session.subscribe(
                kind,
                handler(move |env| {
                    lock(&presence).apply(&env.event);
                }),
            );
        }

        log::info!(
            "{} joining room {} on channel {}",
            session.local_user.name,
            session.room,
            session.channel.id()
        );
        session.channel.connect(session.room.clone());
        session
    }

    fn subscribe(&mut self, kind: EventKind, h: Handler) {
        self.channel.on(kind, h.clone());
        self.subscriptions.push((kind, h));
    }

    /// Call `callback` with code changes made by other people.
    ///
    /// Echoes of our own sends are skipped.
    pub fn on_remote_code_change<F>(&mut self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let remote_update = self.remote_update.clone();
        self.subscribe(
            EventKind::CodeUpdate,
            handler(move |env| {
                if !env.origin.is_remote() {
                    return;
                }
                if let CollabEvent::CodeUpdate(update) = &env.event {
                    remote_update.store(true, Ordering::SeqCst);
                    callback(&update.code);
                }
            }),
        );
    }

    /// Share a local code change.
    ///
    /// The first change after a remote update is the editor applying that
    /// update, so it is swallowed instead of sent. Returns whether the
    /// change was sent.
    pub fn broadcast_code_change(&self, code: impl Into<String>) -> Result<bool, ChannelError> {
        if self.remote_update.swap(false, Ordering::SeqCst) {
            log::trace!("suppressing echo of remote code change");
            return Ok(false);
        }
        self.channel.send(CollabEvent::code(code))?;
        Ok(true)
    }

    /// Share the local cursor, at most once per `cursor_broadcast_interval`.
    ///
    /// Returns `Ok(false)` when throttled.
    pub fn broadcast_cursor_move(&mut self, cursor: CursorMove) -> Result<bool, ChannelError> {
        let interval = self.channel.config().cursor_broadcast_interval;
        let now = Instant::now();
        if self
            .last_cursor_broadcast
            .is_some_and(|last| now.duration_since(last) < interval)
        {
            return Ok(false);
        }

        self.channel.send(CollabEvent::CursorMove(cursor))?;
        self.last_cursor_broadcast = Some(now);
        Ok(true)
    }

    /// Convenience for the local user's own cursor.
    pub fn move_cursor(&mut self, file_id: FileId, line: u32, column: u32) -> Result<bool, ChannelError> {
        let me = lock(&self.presence)
            .user(self.local_user.id)
            .cloned()
            .unwrap_or_else(|| self.local_presence());
        self.broadcast_cursor_move(CursorMove::for_user(&me, file_id, line, column))
    }

    fn local_presence(&self) -> CollaboratingUser {
        CollaboratingUser {
            user: self.local_user.clone(),
            color: String::new(),
            cursor_position: None,
            is_typing: false,
            last_active: chrono::Utc::now(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Everyone present, including us.
    pub fn users(&self) -> Vec<CollaboratingUser> {
        lock(&self.presence).users().to_vec()
    }

    /// Remote cursors to draw, optionally limited to one file.
    pub fn cursors(&self, file_id: Option<FileId>) -> Vec<CursorMarker> {
        lock(&self.presence).cursors(file_id)
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn local_user(&self) -> &User {
        &self.local_user
    }

    pub fn channel(&self) -> &EventChannel {
        &self.channel
    }

    /// Unsubscribe everything this session registered and disconnect.
    pub fn leave(&mut self) {
        if self.left {
            return;
        }
        self.left = true;
        for (kind, h) in self.subscriptions.drain(..) {
            self.channel.off(kind, &h);
        }
        self.channel.disconnect();
        self.connected.store(false, Ordering::SeqCst);
        lock(&self.presence).apply(&CollabEvent::Disconnect);
        log::info!("{} left room {}", self.local_user.name, self.room);
    }
}

impl Drop for CollaborationSession {
    fn drop(&mut self) {
        self.leave();
    }
}
