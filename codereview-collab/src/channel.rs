//! In-process collaboration channel.
//!
//! Emulates a persistent WebSocket connection to a review room without any
//! network: connecting and sending take a simulated round trip, and once
//! connected a background task produces cursor moves for the other people
//! in the roster.
//!
//! ```text
//!              connect(room)                 (connect_delay)
//! Disconnected ─────────────► Connecting ─────────────────► Connected
//!      ▲                          │                            │
//!      └──────── disconnect() ────┴──────── disconnect() ──────┘
//! ```
//!
//! Only `Connected` accepts `send`. `disconnect` is valid from any state.
//! Every transition bumps a generation counter; delayed work captured under
//! an older generation is discarded when it wakes up.
//!
//! Dispatch runs over a snapshot of the subscriber list, so handlers may
//! subscribe or unsubscribe (themselves or others) while an event is being
//! delivered. A panicking handler is logged and skipped; the rest still run.
//! That relies on unwinding, so the crate refuses to build with
//! `panic = "abort"`.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::Utc;
use codereview_core::Roster;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::config::{ChannelConfig, ConfigError};
use crate::event::{CollabEvent, CursorMove, EventEnvelope, EventKind, Origin};
use crate::latency::{entropy_rng, simulate};

#[cfg(not(panic = "unwind"))]
compile_error!("handler isolation needs panic = \"unwind\"");

/// Shared event callback. Identity (the allocation) is what `off` matches on.
pub type Handler = Arc<dyn Fn(&EventEnvelope) + Send + Sync>;

/// Wrap a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&EventEnvelope) + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel is not connected")]
    NotConnected,
}

/// Channel connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Counters for monitoring dispatch health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub events_emitted: u64,
    pub handler_calls: u64,
    pub handler_panics: u64,
    pub rejected_sends: u64,
}

#[derive(Default)]
struct AtomicChannelStats {
    events_emitted: AtomicU64,
    handler_calls: AtomicU64,
    handler_panics: AtomicU64,
    rejected_sends: AtomicU64,
}

struct ConnectionSlot {
    state: ConnectionState,
    room: Option<String>,
    generation: u64,
    /// Runtime captured by `connect`; delayed work is spawned onto it so
    /// `send` works from any thread.
    runtime: Option<Handle>,
    pending_connect: Option<JoinHandle<()>>,
    simulations: Vec<JoinHandle<()>>,
}

impl ConnectionSlot {
    /// Cancel delayed work and start a new generation.
    fn advance(&mut self) -> u64 {
        self.generation += 1;
        if let Some(pending) = self.pending_connect.take() {
            pending.abort();
        }
        for task in self.simulations.drain(..) {
            task.abort();
        }
        self.generation
    }

    fn is_live(&self, generation: u64) -> bool {
        self.generation == generation && self.state == ConnectionState::Connected
    }
}

struct Inner {
    id: Uuid,
    config: ChannelConfig,
    roster: Roster,
    slot: Mutex<ConnectionSlot>,
    subscribers: Mutex<HashMap<EventKind, Vec<Handler>>>,
    sequence: AtomicU64,
    rng: Mutex<StdRng>,
    stats: AtomicChannelStats,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn same_handler(a: &Handler, b: &Handler) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

impl Inner {
    fn dispatch(&self, origin: Origin, event: CollabEvent) -> usize {
        let kind = event.kind();
        let snapshot: Vec<Handler> = lock(&self.subscribers)
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        let envelope = EventEnvelope {
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
            origin,
            event,
        };
        self.stats.events_emitted.fetch_add(1, Ordering::Relaxed);
        log::trace!(
            "[{}] #{} {} ({:?}) -> {} handler(s)",
            self.id,
            envelope.sequence,
            kind,
            origin,
            snapshot.len()
        );

        for callback in &snapshot {
            self.stats.handler_calls.fetch_add(1, Ordering::Relaxed);
            if catch_unwind(AssertUnwindSafe(|| callback(&envelope))).is_err() {
                self.stats.handler_panics.fetch_add(1, Ordering::Relaxed);
                log::error!(
                    "[{}] handler for {} panicked; continuing with remaining handlers",
                    self.id,
                    kind
                );
            }
        }

        snapshot.len()
    }

    fn is_live(&self, generation: u64) -> bool {
        lock(&self.slot).is_live(generation)
    }

    /// Completes a connection attempt unless it was superseded meanwhile.
    fn finish_connect(self: &Arc<Self>, generation: u64, room: String) {
        {
            let mut slot = lock(&self.slot);
            if slot.generation != generation {
                log::debug!("[{}] stale connect for room {room} ignored", self.id);
                return;
            }
            slot.state = ConnectionState::Connected;
            // Dropping our own handle detaches it; it is about to finish anyway.
            slot.pending_connect = None;
            let simulation = tokio::spawn(run_cursor_simulation(
                Arc::downgrade(self),
                generation,
                self.config.cursor_interval,
            ));
            slot.simulations.push(simulation);
        }

        log::info!("[{}] connected to room {room}", self.id);
        if self.is_live(generation) {
            self.dispatch(Origin::System, CollabEvent::Connect { room });
        }
        if self.is_live(generation) {
            let users = self.roster.present_users(Utc::now());
            self.dispatch(Origin::System, CollabEvent::UsersUpdate { users });
        }
    }

    /// Picks another user and a random spot in the simulated file.
    fn synthetic_cursor(&self) -> Option<CursorMove> {
        let others: Vec<_> = self.roster.others().collect();
        let mut rng = lock(&self.rng);
        let user = others.choose(&mut *rng).copied()?;
        let line = rng.gen_range(1..=self.config.max_line);
        let column = rng.gen_range(1..=self.config.max_column);
        Some(CursorMove::for_user(
            user,
            self.config.synthetic_file_id,
            line,
            column,
        ))
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let slot = self.slot.get_mut().unwrap_or_else(PoisonError::into_inner);
        slot.advance();
    }
}

async fn run_cursor_simulation(channel: Weak<Inner>, generation: u64, period: std::time::Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(inner) = channel.upgrade() else {
            break;
        };
        if !inner.is_live(generation) {
            break;
        }
        if let Some(cursor) = inner.synthetic_cursor() {
            log::debug!(
                "[{}] synthetic cursor: {} at {}:{}",
                inner.id,
                cursor.user_name,
                cursor.line,
                cursor.column
            );
            inner.dispatch(Origin::Synthetic, CollabEvent::CursorMove(cursor));
        }
    }
}

/// Handle to a simulated collaboration channel. Cheap to clone; clones
/// share the connection and the subscriber lists.
///
/// `connect` and `send` spawn onto the ambient Tokio runtime.
#[derive(Clone)]
pub struct EventChannel {
    inner: Arc<Inner>,
}

impl EventChannel {
    /// Create a disconnected channel for the given roster.
    pub fn new(config: ChannelConfig, roster: Roster) -> Result<Self, ConfigError> {
        Self::with_rng(config, roster, entropy_rng())
    }

    /// Create with an explicit random source (for testing).
    pub fn with_rng(
        config: ChannelConfig,
        roster: Roster,
        rng: StdRng,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                config,
                roster,
                slot: Mutex::new(ConnectionSlot {
                    state: ConnectionState::Disconnected,
                    room: None,
                    generation: 0,
                    runtime: None,
                    pending_connect: None,
                    simulations: Vec::new(),
                }),
                subscribers: Mutex::new(HashMap::new()),
                sequence: AtomicU64::new(0),
                rng: Mutex::new(rng),
                stats: AtomicChannelStats::default(),
            }),
        })
    }

    /// Start connecting to `room`.
    ///
    /// After the connect delay the channel emits `Connect`, then a
    /// `UsersUpdate` snapshot, and starts synthetic cursor traffic. Calling
    /// this again before or after that point restarts the sequence.
    pub fn connect(&self, room: impl Into<String>) {
        let room = room.into();
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                log::error!(
                    "[{}] connect({room}) called outside a Tokio runtime; staying disconnected",
                    self.inner.id
                );
                return;
            }
        };

        let mut slot = lock(&self.inner.slot);
        if slot.state != ConnectionState::Disconnected {
            log::debug!("[{}] restarting connection sequence", self.inner.id);
        }
        let generation = slot.advance();
        slot.state = ConnectionState::Connecting;
        slot.room = Some(room.clone());
        slot.runtime = Some(runtime.clone());

        let channel = Arc::downgrade(&self.inner);
        let delay = self.inner.config.connect_delay;
        slot.pending_connect = Some(runtime.spawn(async move {
            simulate(delay).await;
            if let Some(inner) = channel.upgrade() {
                inner.finish_connect(generation, room);
            }
        }));
    }

    /// Drop the connection immediately.
    ///
    /// Cancels a pending connect, stops synthetic traffic, emits
    /// `Disconnect` and clears the room. Safe to call in any state.
    pub fn disconnect(&self) {
        let generation = {
            let mut slot = lock(&self.inner.slot);
            let generation = slot.advance();
            if slot.state != ConnectionState::Disconnected {
                log::info!("[{}] disconnected", self.inner.id);
            }
            slot.state = ConnectionState::Disconnected;
            generation
        };

        self.inner.dispatch(Origin::System, CollabEvent::Disconnect);

        let mut slot = lock(&self.inner.slot);
        // A handler may already have reconnected.
        if slot.generation == generation {
            slot.room = None;
        }
    }

    /// Subscribe `handler` to events of `kind`.
    pub fn on(&self, kind: EventKind, handler: Handler) {
        lock(&self.inner.subscribers)
            .entry(kind)
            .or_default()
            .push(handler);
    }

    /// Unsubscribe `handler` from `kind`. Unknown handlers are ignored.
    pub fn off(&self, kind: EventKind, handler: &Handler) {
        let mut subscribers = lock(&self.inner.subscribers);
        if let Some(list) = subscribers.get_mut(&kind) {
            list.retain(|h| !same_handler(h, handler));
            if list.is_empty() {
                subscribers.remove(&kind);
            }
        }
    }

    /// Deliver `event` to its subscribers right now, as a channel event.
    ///
    /// Returns the number of handlers invoked.
    pub fn emit(&self, event: CollabEvent) -> usize {
        self.inner.dispatch(Origin::System, event)
    }

    /// Deliver `event` with an explicit origin.
    pub fn emit_from(&self, origin: Origin, event: CollabEvent) -> usize {
        self.inner.dispatch(origin, event)
    }

    /// Send `event` to the room.
    ///
    /// While not connected the event is dropped with a warning. Otherwise,
    /// after the send delay it is echoed back with [`Origin::Echo`] and,
    /// except for cursor moves, once more with [`Origin::Peer`]. Echoes
    /// whose connection has since closed are dropped.
    pub fn send(&self, event: CollabEvent) -> Result<(), ChannelError> {
        let kind = event.kind();
        let (generation, runtime) = {
            let slot = lock(&self.inner.slot);
            match (&slot.state, &slot.runtime) {
                (ConnectionState::Connected, Some(runtime)) => (slot.generation, runtime.clone()),
                _ => {
                    drop(slot);
                    self.inner.stats.rejected_sends.fetch_add(1, Ordering::Relaxed);
                    log::warn!("[{}] channel not connected; dropping {kind}", self.inner.id);
                    return Err(ChannelError::NotConnected);
                }
            }
        };

        let channel = Arc::downgrade(&self.inner);
        let delay = self.inner.config.send_delay;
        runtime.spawn(async move {
            simulate(delay).await;
            let Some(inner) = channel.upgrade() else {
                return;
            };
            if !inner.is_live(generation) {
                log::debug!("[{}] connection closed before echo of {kind}", inner.id);
                return;
            }
            let peer_copy = kind.has_peer_copy().then(|| event.peer_copy());
            inner.dispatch(Origin::Echo, event);
            if let Some(copy) = peer_copy {
                inner.dispatch(Origin::Peer, copy);
            }
        });

        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.inner.slot).state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Room of the current or pending connection.
    pub fn current_room(&self) -> Option<String> {
        lock(&self.inner.slot).room.clone()
    }

    /// Number of handlers subscribed to `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        lock(&self.inner.subscribers).get(&kind).map_or(0, Vec::len)
    }

    /// Number of running synthetic generators (0 or 1).
    pub fn active_simulations(&self) -> usize {
        lock(&self.inner.slot)
            .simulations
            .iter()
            .filter(|task| !task.is_finished())
            .count()
    }

    pub fn roster(&self) -> &Roster {
        &self.inner.roster
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    /// Channel instance id, used as the log prefix.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Lock-free snapshot of the dispatch counters.
    pub fn stats(&self) -> ChannelStats {
        let stats = &self.inner.stats;
        ChannelStats {
            events_emitted: stats.events_emitted.load(Ordering::Relaxed),
            handler_calls: stats.handler_calls.load(Ordering::Relaxed),
            handler_panics: stats.handler_panics.load(Ordering::Relaxed),
            rejected_sends: stats.rejected_sends.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChannel")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("room", &self.current_room())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codereview_core::fixtures::demo_roster;
    use rand::SeedableRng;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn channel() -> EventChannel {
        EventChannel::with_rng(
            ChannelConfig::default(),
            demo_roster().unwrap(),
            StdRng::seed_from_u64(1),
        )
        .unwrap()
    }

    fn counter(channel: &EventChannel, kind: EventKind) -> (Handler, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let h = handler(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        channel.on(kind, h.clone());
        (h, count)
    }

    #[test]
    fn test_initial_state() {
        let channel = channel();
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert!(!channel.is_connected());
        assert_eq!(channel.current_room(), None);
        assert_eq!(channel.stats(), ChannelStats::default());
    }

    #[test]
    fn test_emit_invokes_each_subscriber_once() {
        let channel = channel();
        let (_h, count) = counter(&channel, EventKind::CodeUpdate);

        assert_eq!(channel.emit(CollabEvent::code("a")), 1);
        assert_eq!(channel.emit(CollabEvent::code("b")), 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let channel = channel();
        assert_eq!(channel.emit(CollabEvent::code("nobody home")), 0);
        assert_eq!(channel.stats().events_emitted, 1);
    }

    #[test]
    fn test_off_stops_delivery() {
        let channel = channel();
        let (h, count) = counter(&channel, EventKind::CodeUpdate);

        channel.emit(CollabEvent::code("a"));
        channel.off(EventKind::CodeUpdate, &h);
        channel.emit(CollabEvent::code("b"));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(channel.subscriber_count(EventKind::CodeUpdate), 0);
    }

    #[test]
    fn test_off_unknown_handler_is_noop() {
        let channel = channel();
        let (_h, count) = counter(&channel, EventKind::CodeUpdate);
        let stranger = handler(|_| {});

        channel.off(EventKind::CodeUpdate, &stranger);
        channel.off(EventKind::Connect, &stranger);
        channel.emit(CollabEvent::code("a"));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(channel.subscriber_count(EventKind::CodeUpdate), 1);
    }

    #[test]
    fn test_handlers_run_in_subscription_order() {
        let channel = channel();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            channel.on(
                EventKind::CodeUpdate,
                handler(move |_| order.lock().unwrap().push(i)),
            );
        }

        channel.emit(CollabEvent::code("x"));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_kinds_are_isolated() {
        let channel = channel();
        let (_h, count) = counter(&channel, EventKind::Connect);
        channel.emit(CollabEvent::code("x"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_sequence_is_strictly_increasing() {
        let channel = channel();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        channel.on(
            EventKind::CodeUpdate,
            handler(move |env| s.lock().unwrap().push(env.sequence)),
        );

        for _ in 0..5 {
            channel.emit(CollabEvent::code("x"));
        }
        let seen = seen.lock().unwrap();
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_panicking_handler_does_not_stop_others() {
        let channel = channel();
        channel.on(EventKind::CodeUpdate, handler(|_| panic!("boom")));
        let (_h, count) = counter(&channel, EventKind::CodeUpdate);

        assert_eq!(channel.emit(CollabEvent::code("x")), 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(channel.stats().handler_panics, 1);
    }

    #[test]
    fn test_self_unsubscribe_during_dispatch() {
        let channel = channel();
        let first_calls = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<Handler>>> = Arc::new(Mutex::new(None));

        let ch = channel.clone();
        let calls = first_calls.clone();
        let me = slot.clone();
        let first = handler(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            if let Some(h) = me.lock().unwrap().as_ref() {
                ch.off(EventKind::CodeUpdate, h);
            }
        });
        *slot.lock().unwrap() = Some(first.clone());
        channel.on(EventKind::CodeUpdate, first);
        let (_h, second) = counter(&channel, EventKind::CodeUpdate);

        channel.emit(CollabEvent::code("a"));
        channel.emit(CollabEvent::code("b"));

        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_emits_connect_then_users() {
        let channel = channel();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for kind in [EventKind::Connect, EventKind::UsersUpdate] {
            let s = seen.clone();
            channel.on(kind, handler(move |env| s.lock().unwrap().push(env.event.clone())));
        }

        channel.connect("pr-1");
        assert_eq!(channel.state(), ConnectionState::Connecting);
        assert_eq!(channel.current_room().as_deref(), Some("pr-1"));

        tokio::time::sleep(Duration::from_millis(499)).await;
        assert!(!channel.is_connected());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(channel.is_connected());
        assert_eq!(channel.active_simulations(), 1);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], CollabEvent::Connect { room: "pr-1".into() });
        match &seen[1] {
            CollabEvent::UsersUpdate { users } => assert_eq!(users.len(), 3),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_before_delay_never_connects() {
        let channel = channel();
        let (_h, connects) = counter(&channel, EventKind::Connect);
        let (_h2, cursors) = counter(&channel, EventKind::CursorMove);

        channel.connect("pr-1");
        tokio::time::sleep(Duration::from_millis(100)).await;
        channel.disconnect();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert_eq!(connects.load(Ordering::SeqCst), 0);
        assert_eq!(cursors.load(Ordering::SeqCst), 0);
        assert_eq!(channel.active_simulations(), 0);
        assert_eq!(channel.current_room(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_restarts_sequence() {
        let channel = channel();
        let rooms = Arc::new(Mutex::new(Vec::new()));
        let r = rooms.clone();
        channel.on(
            EventKind::Connect,
            handler(move |env| {
                if let CollabEvent::Connect { room } = &env.event {
                    r.lock().unwrap().push(room.clone());
                }
            }),
        );

        channel.connect("first");
        tokio::time::sleep(Duration::from_millis(300)).await;
        channel.connect("second");
        tokio::time::sleep(Duration::from_millis(300)).await;
        // The first attempt would have fired by now.
        assert!(rooms.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(*rooms.lock().unwrap(), vec!["second".to_string()]);
        assert_eq!(channel.active_simulations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent() {
        let channel = channel();
        let (_h, disconnects) = counter(&channel, EventKind::Disconnect);

        channel.disconnect();
        channel.disconnect();

        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert_eq!(disconnects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_while_disconnected_is_rejected() {
        let channel = channel();
        let (_h, count) = counter(&channel, EventKind::CodeUpdate);

        assert_eq!(
            channel.send(CollabEvent::code("x")),
            Err(ChannelError::NotConnected)
        );
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(channel.stats().rejected_sends, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_echoes_and_broadcasts() {
        let channel = channel();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        channel.on(
            EventKind::CodeUpdate,
            handler(move |env| s.lock().unwrap().push((env.origin, env.event.clone()))),
        );

        channel.connect("pr-1");
        tokio::time::sleep(Duration::from_millis(600)).await;
        channel.send(CollabEvent::code("let x = 1;")).unwrap();
        tokio::time::sleep(Duration::from_millis(49)).await;
        assert!(seen.lock().unwrap().is_empty());
        tokio::time::sleep(Duration::from_millis(2)).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (Origin::Echo, CollabEvent::code("let x = 1;")));
        assert_eq!(seen[1].0, Origin::Peer);
        assert_eq!(seen[1].1, CollabEvent::code("let x = 1;").peer_copy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_cursor_move_echoes_once() {
        let channel = channel();
        let origins = Arc::new(Mutex::new(Vec::new()));
        let o = origins.clone();
        channel.on(
            EventKind::CursorMove,
            handler(move |env| o.lock().unwrap().push(env.origin)),
        );

        channel.connect("pr-1");
        tokio::time::sleep(Duration::from_millis(600)).await;
        let me = channel.roster().collaborators()[2].clone();
        channel
            .send(CollabEvent::CursorMove(CursorMove::for_user(
                &me,
                codereview_core::FileId(1),
                3,
                4,
            )))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(*origins.lock().unwrap(), vec![Origin::Echo]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_echo_dropped_after_disconnect() {
        let channel = channel();
        let (_h, count) = counter(&channel, EventKind::CodeUpdate);

        channel.connect("pr-1");
        tokio::time::sleep(Duration::from_millis(600)).await;
        channel.send(CollabEvent::code("x")).unwrap();
        channel.disconnect();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_synthetic_cursors_come_from_others() {
        let channel = channel();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        channel.on(
            EventKind::CursorMove,
            handler(move |env| s.lock().unwrap().push(env.clone())),
        );

        channel.connect("pr-1");
        tokio::time::sleep(Duration::from_millis(500 + 2000 * 5 + 10)).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 5);
        let me = channel.roster().current_user().id;
        for env in seen.iter() {
            assert_eq!(env.origin, Origin::Synthetic);
            match &env.event {
                CollabEvent::CursorMove(cursor) => {
                    assert_ne!(cursor.user_id, me);
                    assert_eq!(cursor.file_id, codereview_core::FileId(1));
                    assert!((1..=100).contains(&cursor.line));
                    assert!((1..=80).contains(&cursor.column));
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_stops_synthetic_cursors() {
        let channel = channel();
        let (_h, count) = counter(&channel, EventKind::CursorMove);

        channel.connect("pr-1");
        tokio::time::sleep(Duration::from_millis(500 + 2000 + 10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        channel.disconnect();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(channel.active_simulations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_may_disconnect_on_connect() {
        let channel = channel();
        let ch = channel.clone();
        channel.on(EventKind::Connect, handler(move |_| ch.disconnect()));
        let (_h, users) = counter(&channel, EventKind::UsersUpdate);

        channel.connect("pr-1");
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(channel.state(), ConnectionState::Disconnected);
        // The snapshot is skipped once the connection is gone.
        assert_eq!(users.load(Ordering::SeqCst), 0);
        assert_eq!(channel.active_simulations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_from_plain_thread() {
        let channel = channel();
        let (_h, count) = counter(&channel, EventKind::CodeUpdate);

        channel.connect("pr-1");
        tokio::time::sleep(Duration::from_millis(600)).await;

        let ch = channel.clone();
        let sent = std::thread::spawn(move || ch.send(CollabEvent::code("from a worker")))
            .join()
            .unwrap();
        assert_eq!(sent, Ok(()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_zero_cursor_interval_is_rejected() {
        let config = ChannelConfig {
            cursor_interval: Duration::ZERO,
            ..ChannelConfig::default()
        };
        let result = EventChannel::new(config, demo_roster().unwrap());
        assert_eq!(
            result.unwrap_err(),
            ConfigError::ZeroInterval("cursor_interval")
        );
    }

    #[test]
    fn test_synthetic_cursor_without_others() {
        let roster = demo_roster().unwrap();
        let me = roster.current_user().clone();
        let alone = Roster::new(me, Vec::new());
        let channel = EventChannel::with_rng(
            ChannelConfig::default(),
            alone,
            StdRng::seed_from_u64(1),
        )
        .unwrap();
        assert!(channel.inner.synthetic_cursor().is_none());
    }

    #[test]
    fn test_connect_outside_runtime_stays_disconnected() {
        let channel = channel();
        channel.connect("pr-1");
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }
}
