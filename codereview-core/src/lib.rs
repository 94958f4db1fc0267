//! # codereview-core: Review data model
//!
//! Plain data shared by the collaboration channel, the comment store and
//! whatever UI sits on top of them.
//!
//! ## Modules
//!
//! - [`user`]: users, collaborating users and the session roster
//! - [`comment`]: comments, reactions and threads
//! - [`fixtures`]: seed data for the mock services
//!
//! All records serialize with camelCase field names, which is the shape the
//! review UI consumes.

pub mod comment;
pub mod fixtures;
pub mod user;

pub use comment::{
    Comment, CommentId, CommentReaction, CommentThread, FileId, PrId, ReactionId, ReactionKind,
    ThreadId, UnknownReaction,
};
pub use fixtures::{FixtureError, Seed, ThreadSeed};
pub use user::{CollaboratingUser, CursorPosition, Role, Roster, User, UserId};
