//! # codereview-collab: Simulated real-time collaboration for code review
//!
//! In-process stand-ins for the services a review client talks to: an
//! event channel that behaves like a room-scoped WebSocket, and a comment
//! store that behaves like a slow REST backend.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐   on/off/send    ┌──────────────────┐
//! │ CollaborationSession │ ◄──────────────► │  EventChannel    │
//! │ (per reviewer)       │   EventEnvelope  │  (mock socket)   │
//! └──────────┬───────────┘                  └────────┬─────────┘
//!            │                                       │ synthetic
//!            ▼                                       ▼ cursor task
//! ┌──────────────────────┐                  ┌──────────────────┐
//! │ PresenceRoster       │                  │ Roster (core)    │
//! └──────────────────────┘                  └──────────────────┘
//!
//! ┌──────────────────────┐   simulate(latency)
//! │ CommentStore         │ ─────────────────► RwLock<comments, threads>
//! └──────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`channel`]: pub/sub channel with connect lifecycle and echoes
//! - [`event`]: typed events and envelopes
//! - [`presence`]: who is here and where their cursors are
//! - [`session`]: a reviewer's membership in one room
//! - [`store`]: comments, threads and reactions
//! - [`config`]: timing knobs
//! - [`latency`]: simulated delays and the random source behind them
//!
//! Comment mutations are not broadcast over the channel; consumers that
//! want live comment updates refetch.

pub mod channel;
pub mod config;
pub mod event;
pub mod latency;
pub mod presence;
pub mod session;
pub mod store;

// Re-exports for convenience
pub use channel::{handler, ChannelError, ChannelStats, ConnectionState, EventChannel, Handler};
pub use config::{ChannelConfig, ConfigError, StoreConfig};
pub use event::{
    CodeUpdate, CollabEvent, CursorMove, EventEnvelope, EventKind, FileViewChange, Origin,
    Typing, UnknownEvent,
};
pub use latency::entropy_rng;
pub use presence::{CursorMarker, PresenceRoster};
pub use session::CollaborationSession;
pub use store::CommentStore;
