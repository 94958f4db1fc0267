//! Inline review comments, reactions and threads.
//!
//! A thread is the ordered group of comments anchored at one
//! `(file, line)` pair. Replies point at a root comment through
//! `parent_id`; in practice threading is one level deep.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::user::{User, UserId};

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

numeric_id!(
    /// Pull request identifier.
    PrId
);
numeric_id!(
    /// Identifier of a file within a pull request diff.
    FileId
);
numeric_id!(
    /// Comment identifier, unique for the lifetime of the store.
    CommentId
);
numeric_id!(
    /// Thread identifier.
    ThreadId
);
numeric_id!(ReactionId);

/// The fixed set of reactions a comment can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReactionKind {
    #[serde(rename = "👍")]
    ThumbsUp,
    #[serde(rename = "👎")]
    ThumbsDown,
    #[serde(rename = "❤️")]
    Heart,
    #[serde(rename = "🎉")]
    Hooray,
    #[serde(rename = "😕")]
    Confused,
    #[serde(rename = "🚀")]
    Rocket,
}

impl ReactionKind {
    pub const ALL: [ReactionKind; 6] = [
        ReactionKind::ThumbsUp,
        ReactionKind::ThumbsDown,
        ReactionKind::Heart,
        ReactionKind::Hooray,
        ReactionKind::Confused,
        ReactionKind::Rocket,
    ];

    /// The emoji shown in the UI.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReactionKind::ThumbsUp => "👍",
            ReactionKind::ThumbsDown => "👎",
            ReactionKind::Heart => "❤️",
            ReactionKind::Hooray => "🎉",
            ReactionKind::Confused => "😕",
            ReactionKind::Rocket => "🚀",
        }
    }
}

impl fmt::Display for ReactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is not one of the supported reaction emoji.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported reaction: {0}")]
pub struct UnknownReaction(pub String);

impl FromStr for ReactionKind {
    type Err = UnknownReaction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReactionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownReaction(s.to_string()))
    }
}

/// One user's reaction on a comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentReaction {
    pub id: ReactionId,
    #[serde(rename = "type")]
    pub kind: ReactionKind,
    pub user: User,
}

/// An inline comment on a diff line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: CommentId,
    pub pr_id: PrId,
    pub file_id: FileId,
    pub line_number: u32,
    pub content: String,
    pub author: User,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved: bool,
    #[serde(default)]
    pub reactions: Vec<CommentReaction>,
    /// Only populated by nested views such as [`CommentThread::nested`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replies: Vec<Comment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<CommentId>,
}

impl Comment {
    pub fn is_reply(&self) -> bool {
        self.parent_id.is_some()
    }

    /// Whether `user` already reacted with `kind`.
    pub fn has_reaction(&self, user: UserId, kind: ReactionKind) -> bool {
        self.reactions
            .iter()
            .any(|r| r.user.id == user && r.kind == kind)
    }

    /// Number of reactions of the given kind.
    pub fn reaction_count(&self, kind: ReactionKind) -> usize {
        self.reactions.iter().filter(|r| r.kind == kind).count()
    }
}

/// Ordered comments anchored at one `(file, line)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentThread {
    pub id: ThreadId,
    pub file_id: FileId,
    pub line_number: u32,
    /// Chronological (insertion) order.
    pub comments: Vec<Comment>,
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl CommentThread {
    /// Root comments with their replies folded in, one level deep.
    ///
    /// A reply to a reply is attached to the root of its chain. A reply
    /// whose parent is no longer in the thread is promoted to a root.
    pub fn nested(&self) -> Vec<Comment> {
        let present: HashMap<CommentId, Option<CommentId>> = self
            .comments
            .iter()
            .map(|c| (c.id, c.parent_id))
            .collect();

        let root_of = |mut id: CommentId| {
            // Bounded walk: a malformed cycle cannot spin forever.
            for _ in 0..present.len() {
                match present.get(&id).copied().flatten() {
                    Some(parent) if present.contains_key(&parent) => id = parent,
                    _ => break,
                }
            }
            id
        };

        let mut roots: Vec<Comment> = Vec::new();
        let mut index: HashMap<CommentId, usize> = HashMap::new();
        let mut pending: Vec<(CommentId, Comment)> = Vec::new();

        for comment in &self.comments {
            let root = root_of(comment.id);
            if root == comment.id {
                index.insert(comment.id, roots.len());
                roots.push(comment.clone());
            } else {
                pending.push((root, comment.clone()));
            }
        }

        for (root, reply) in pending {
            if let Some(&i) = index.get(&root) {
                roots[i].replies.push(reply);
            }
        }

        roots
    }

    /// Id of the first comment, which opened the thread.
    pub fn root_id(&self) -> Option<CommentId> {
        self.comments.first().map(|c| c.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::Role;

    fn author() -> User {
        User {
            id: UserId(1),
            username: "sarah.chen".into(),
            name: "Sarah Chen".into(),
            email: "sarah.chen@company.com".into(),
            avatar: String::new(),
            role: Role::Developer,
            github_id: None,
        }
    }

    fn comment(id: u64, parent: Option<u64>) -> Comment {
        let now = Utc::now();
        Comment {
            id: CommentId(id),
            pr_id: PrId(1),
            file_id: FileId(1),
            line_number: 18,
            content: format!("comment {id}"),
            author: author(),
            created_at: now,
            updated_at: now,
            resolved: false,
            reactions: Vec::new(),
            replies: Vec::new(),
            parent_id: parent.map(CommentId),
        }
    }

    fn thread(comments: Vec<Comment>) -> CommentThread {
        CommentThread {
            id: ThreadId(1),
            file_id: FileId(1),
            line_number: 18,
            comments,
            resolved: false,
            resolved_by: None,
            resolved_at: None,
        }
    }

    #[test]
    fn test_reaction_kind_parse() {
        for kind in ReactionKind::ALL {
            assert_eq!(kind.as_str().parse::<ReactionKind>().unwrap(), kind);
        }
        assert!("🦀".parse::<ReactionKind>().is_err());
    }

    #[test]
    fn test_reaction_serializes_as_emoji() {
        let reaction = CommentReaction {
            id: ReactionId(1),
            kind: ReactionKind::Rocket,
            user: author(),
        };
        let json = serde_json::to_value(&reaction).unwrap();
        assert_eq!(json["type"], "🚀");
    }

    #[test]
    fn test_has_reaction() {
        let mut c = comment(1, None);
        c.reactions.push(CommentReaction {
            id: ReactionId(9),
            kind: ReactionKind::ThumbsUp,
            user: author(),
        });

        assert!(c.has_reaction(UserId(1), ReactionKind::ThumbsUp));
        assert!(!c.has_reaction(UserId(1), ReactionKind::Heart));
        assert!(!c.has_reaction(UserId(2), ReactionKind::ThumbsUp));
        assert_eq!(c.reaction_count(ReactionKind::ThumbsUp), 1);
    }

    #[test]
    fn test_nested_folds_replies_under_root() {
        let t = thread(vec![comment(1, None), comment(2, Some(1)), comment(3, Some(1))]);
        let nested = t.nested();

        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].id, CommentId(1));
        let reply_ids: Vec<_> = nested[0].replies.iter().map(|c| c.id).collect();
        assert_eq!(reply_ids, vec![CommentId(2), CommentId(3)]);
    }

    #[test]
    fn test_nested_flattens_deep_replies() {
        let t = thread(vec![comment(1, None), comment(2, Some(1)), comment(3, Some(2))]);
        let nested = t.nested();

        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].replies.len(), 2);
    }

    #[test]
    fn test_nested_promotes_orphans() {
        // Parent 1 was deleted.
        let t = thread(vec![comment(2, Some(1)), comment(3, None)]);
        let nested = t.nested();

        let ids: Vec<_> = nested.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![CommentId(2), CommentId(3)]);
    }

    #[test]
    fn test_root_id() {
        assert_eq!(thread(vec![]).root_id(), None);
        assert_eq!(thread(vec![comment(4, None)]).root_id(), Some(CommentId(4)));
    }
}
