//! Users and presence identities.
//!
//! A [`User`] is a stable account. A [`CollaboratingUser`] is the same
//! account while it is present in a collaboration room: it gains a display
//! color, an optional cursor and a typing flag. The [`Roster`] is the
//! identity provider handed to the mock services: who "I" am, and which
//! other people can show up in a room.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Numeric user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Account role within the review tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Developer,
    Reviewer,
    Admin,
}

/// A user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub name: String,
    pub email: String,
    pub avatar: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_id: Option<String>,
}

/// Where a collaborator's caret currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPosition {
    pub file_id: crate::FileId,
    pub line: u32,
    pub column: u32,
}

/// A user currently present in a collaboration room.
///
/// Ephemeral: only exists while the channel is connected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaboratingUser {
    #[serde(flatten)]
    pub user: User,
    /// CSS color string used for the cursor and avatar ring.
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_position: Option<CursorPosition>,
    #[serde(default)]
    pub is_typing: bool,
    pub last_active: DateTime<Utc>,
}

impl CollaboratingUser {
    pub fn id(&self) -> UserId {
        self.user.id
    }

    /// Copy of this user with `last_active` bumped to `now`.
    pub fn touched(&self, now: DateTime<Utc>) -> Self {
        Self {
            last_active: now,
            ..self.clone()
        }
    }
}

/// Identity provider for the mock services.
///
/// `current_user` is "me" for authorship and reaction de-duplication.
/// `collaborators` is the fixed set of people reported as present when a
/// room connects; it may include the current user.
#[derive(Debug, Clone)]
pub struct Roster {
    current_user: User,
    collaborators: Vec<CollaboratingUser>,
}

impl Roster {
    pub fn new(current_user: User, collaborators: Vec<CollaboratingUser>) -> Self {
        Self {
            current_user,
            collaborators,
        }
    }

    pub fn current_user(&self) -> &User {
        &self.current_user
    }

    /// Everyone reported as present, including the current user if listed.
    pub fn collaborators(&self) -> &[CollaboratingUser] {
        &self.collaborators
    }

    /// Collaborators other than the current user.
    pub fn others(&self) -> impl Iterator<Item = &CollaboratingUser> {
        let me = self.current_user.id;
        self.collaborators.iter().filter(move |u| u.id() != me)
    }

    /// Presence snapshot with every `last_active` stamped to `now`.
    pub fn present_users(&self, now: DateTime<Utc>) -> Vec<CollaboratingUser> {
        self.collaborators.iter().map(|u| u.touched(now)).collect()
    }
}
