//! Seed data for the mock services.
//!
//! The demo roster and the demo comment set are embedded JSON documents.
//! Comments and threads reference users by id; loading resolves those ids
//! against the roster's user list.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::comment::{
    Comment, CommentId, CommentReaction, FileId, PrId, ReactionId, ReactionKind, ThreadId,
};
use crate::user::{CollaboratingUser, CursorPosition, Roster, User, UserId};

const USERS_JSON: &str = include_str!("../fixtures/users.json");
const COMMENTS_JSON: &str = include_str!("../fixtures/comments.json");

#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    #[error("fixture JSON is malformed: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("fixture references unknown user {0}")]
    UnknownUser(UserId),
}

/// A thread as stored: comment ids in chronological order.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadSeed {
    pub id: ThreadId,
    pub file_id: FileId,
    pub line_number: u32,
    pub comment_ids: Vec<CommentId>,
    pub resolved: bool,
    pub resolved_by: Option<User>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Initial contents for a comment store.
#[derive(Debug, Clone, Default)]
pub struct Seed {
    pub comments: Vec<Comment>,
    pub threads: Vec<ThreadSeed>,
}

// ───────────────────────────────────────────────────────────────────
// JSON shapes
// ───────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsersFile {
    current_user_id: UserId,
    users: Vec<User>,
    collaborators: Vec<CollaboratorEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CollaboratorEntry {
    user_id: UserId,
    color: String,
    cursor_position: Option<CursorPosition>,
    #[serde(default)]
    is_typing: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentsFile {
    comments: Vec<CommentEntry>,
    threads: Vec<ThreadEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentEntry {
    id: CommentId,
    pr_id: PrId,
    file_id: FileId,
    line_number: u32,
    content: String,
    author_id: UserId,
    created_at: DateTime<Utc>,
    resolved: bool,
    #[serde(default)]
    reactions: Vec<ReactionEntry>,
    parent_id: Option<CommentId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReactionEntry {
    id: ReactionId,
    #[serde(rename = "type")]
    kind: ReactionKind,
    user_id: UserId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadEntry {
    id: ThreadId,
    file_id: FileId,
    line_number: u32,
    comment_ids: Vec<CommentId>,
    resolved: bool,
    resolved_by_id: Option<UserId>,
    resolved_at: Option<DateTime<Utc>>,
}

struct UserDirectory(HashMap<UserId, User>);

impl UserDirectory {
    fn get(&self, id: UserId) -> Result<User, FixtureError> {
        self.0.get(&id).cloned().ok_or(FixtureError::UnknownUser(id))
    }
}

fn parse_users(json: &str) -> Result<(UsersFile, UserDirectory), FixtureError> {
    let file: UsersFile = serde_json::from_str(json)?;
    let directory = UserDirectory(file.users.iter().map(|u| (u.id, u.clone())).collect());
    Ok((file, directory))
}

// ───────────────────────────────────────────────────────────────────
// Loaders
// ───────────────────────────────────────────────────────────────────

/// Build a roster from a users document.
pub fn roster_from_json(json: &str, now: DateTime<Utc>) -> Result<Roster, FixtureError> {
    let (file, directory) = parse_users(json)?;
    let current_user = directory.get(file.current_user_id)?;

    let collaborators = file
        .collaborators
        .into_iter()
        .map(|entry| {
            Ok(CollaboratingUser {
                user: directory.get(entry.user_id)?,
                color: entry.color,
                cursor_position: entry.cursor_position,
                is_typing: entry.is_typing,
                last_active: now,
            })
        })
        .collect::<Result<Vec<_>, FixtureError>>()?;

    Ok(Roster::new(current_user, collaborators))
}

/// Build a store seed from a users document and a comments document.
pub fn seed_from_json(users_json: &str, comments_json: &str) -> Result<Seed, FixtureError> {
    let (_, directory) = parse_users(users_json)?;
    let file: CommentsFile = serde_json::from_str(comments_json)?;

    let mut comments = Vec::with_capacity(file.comments.len());
    for entry in file.comments {
        let reactions = entry
            .reactions
            .into_iter()
            .map(|r| {
                Ok(CommentReaction {
                    id: r.id,
                    kind: r.kind,
                    user: directory.get(r.user_id)?,
                })
            })
            .collect::<Result<Vec<_>, FixtureError>>()?;

        comments.push(Comment {
            id: entry.id,
            pr_id: entry.pr_id,
            file_id: entry.file_id,
            line_number: entry.line_number,
            content: entry.content,
            author: directory.get(entry.author_id)?,
            created_at: entry.created_at,
            updated_at: entry.created_at,
            resolved: entry.resolved,
            reactions,
            replies: Vec::new(),
            parent_id: entry.parent_id,
        });
    }

    let threads = file
        .threads
        .into_iter()
        .map(|t| {
            Ok(ThreadSeed {
                id: t.id,
                file_id: t.file_id,
                line_number: t.line_number,
                comment_ids: t.comment_ids,
                resolved: t.resolved,
                resolved_by: t.resolved_by_id.map(|id| directory.get(id)).transpose()?,
                resolved_at: t.resolved_at,
            })
        })
        .collect::<Result<Vec<_>, FixtureError>>()?;

    log::debug!(
        "Loaded seed: {} comments, {} threads",
        comments.len(),
        threads.len()
    );

    Ok(Seed { comments, threads })
}

/// The built-in roster: four teammates plus "You" (user 5).
pub fn demo_roster() -> Result<Roster, FixtureError> {
    roster_from_json(USERS_JSON, Utc::now())
}

/// The built-in review comments on PR 1.
pub fn demo_seed() -> Result<Seed, FixtureError> {
    seed_from_json(USERS_JSON, COMMENTS_JSON)
}
