//! Latency-simulated comment store.
//!
//! One authoritative comment table; threads only hold comment ids and are
//! materialized on read, so a deleted comment disappears from its thread
//! without any bookkeeping.
//!
//! ```text
//!   add_comment(pr, file, line, ..)
//!        │  simulate(mutation_latency)
//!        ▼
//!   ┌──────────── write lock ─────────────┐
//!   │ allocate id                         │
//!   │ index[(file, line)] ─► thread       │
//!   │   found:   push id                  │
//!   │   missing: create thread #max+1     │
//!   └─────────────────────────────────────┘
//! ```
//!
//! Missing entities are soft failures: `None` or `false`, never an error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use codereview_core::{
    Comment, CommentId, CommentReaction, CommentThread, FileId, PrId, ReactionId,
    ReactionKind, Seed, ThreadId, User,
};
use tokio::sync::RwLock;

use rand::rngs::StdRng;

use crate::config::{ConfigError, StoreConfig};
use crate::latency::{entropy_rng, jittered, simulate};

#[derive(Debug, Clone)]
struct ThreadRecord {
    id: ThreadId,
    file_id: FileId,
    line_number: u32,
    comment_ids: Vec<CommentId>,
    resolved: bool,
    resolved_by: Option<User>,
    resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct StoreState {
    /// Storage (insertion) order.
    comments: Vec<Comment>,
    /// Creation order.
    threads: Vec<ThreadRecord>,
    index: HashMap<(FileId, u32), usize>,
    next_comment_id: u64,
    next_reaction_id: u64,
    /// One above the highest thread id ever stored.
    next_thread_id: u64,
}

impl StoreState {
    fn comment(&self, id: CommentId) -> Option<&Comment> {
        self.comments.iter().find(|c| c.id == id)
    }

    fn comment_mut(&mut self, id: CommentId) -> Option<&mut Comment> {
        self.comments.iter_mut().find(|c| c.id == id)
    }

    fn thread_position(&self, id: ThreadId) -> Option<usize> {
        self.threads.iter().position(|t| t.id == id)
    }

    fn materialize(&self, record: &ThreadRecord) -> CommentThread {
        let comments = record
            .comment_ids
            .iter()
            .filter_map(|id| self.comment(*id).cloned())
            .collect();
        CommentThread {
            id: record.id,
            file_id: record.file_id,
            line_number: record.line_number,
            comments,
            resolved: record.resolved,
            resolved_by: record.resolved_by.clone(),
            resolved_at: record.resolved_at,
        }
    }

    /// Append `id` to the `(file, line)` thread, creating it if needed.
    fn attach(&mut self, file_id: FileId, line_number: u32, id: CommentId) -> ThreadId {
        if let Some(&pos) = self.index.get(&(file_id, line_number)) {
            let thread = &mut self.threads[pos];
            thread.comment_ids.push(id);
            return thread.id;
        }

        let thread_id = ThreadId(self.next_thread_id);
        self.next_thread_id += 1;
        self.index.insert((file_id, line_number), self.threads.len());
        self.threads.push(ThreadRecord {
            id: thread_id,
            file_id,
            line_number,
            comment_ids: vec![id],
            resolved: false,
            resolved_by: None,
            resolved_at: None,
        });
        log::debug!("created thread {thread_id} at file {file_id} line {line_number}");
        thread_id
    }

    fn set_resolved(&mut self, thread_id: ThreadId, resolver: Option<&User>) -> Option<CommentThread> {
        let pos = self.thread_position(thread_id)?;
        let resolved = resolver.is_some();
        let record = &mut self.threads[pos];
        record.resolved = resolved;
        record.resolved_by = resolver.cloned();
        record.resolved_at = resolver.map(|_| Utc::now());

        let ids = record.comment_ids.clone();
        for comment in self.comments.iter_mut().filter(|c| ids.contains(&c.id)) {
            comment.resolved = resolved;
        }
        Some(self.materialize(&self.threads[pos]))
    }
}

/// Handle to the comment store. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CommentStore {
    config: StoreConfig,
    current_user: User,
    state: Arc<RwLock<StoreState>>,
    rng: Arc<Mutex<StdRng>>,
}

impl CommentStore {
    /// Empty store acting on behalf of `current_user`.
    pub fn new(config: StoreConfig, current_user: User) -> Result<Self, ConfigError> {
        Self::with_seed(config, current_user, Seed::default())
    }

    /// Store preloaded with `seed`.
    ///
    /// New comment ids start at `first_comment_id`, or above the highest
    /// seeded id if that is larger. New threads are numbered above the
    /// highest seeded thread id, so gaps in the seed are never reused.
    pub fn with_seed(
        config: StoreConfig,
        current_user: User,
        seed: Seed,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let max_comment = seed.comments.iter().map(|c| c.id.0).max().unwrap_or(0);
        let max_reaction = seed
            .comments
            .iter()
            .flat_map(|c| c.reactions.iter().map(|r| r.id.0))
            .max()
            .unwrap_or(0);
        let max_thread = seed.threads.iter().map(|t| t.id.0).max().unwrap_or(0);

        let threads: Vec<ThreadRecord> = seed
            .threads
            .into_iter()
            .map(|t| ThreadRecord {
                id: t.id,
                file_id: t.file_id,
                line_number: t.line_number,
                comment_ids: t.comment_ids,
                resolved: t.resolved,
                resolved_by: t.resolved_by,
                resolved_at: t.resolved_at,
            })
            .collect();
        let index = threads
            .iter()
            .enumerate()
            .map(|(pos, t)| ((t.file_id, t.line_number), pos))
            .collect();

        let state = StoreState {
            comments: seed.comments,
            threads,
            index,
            next_comment_id: config.first_comment_id.max(max_comment + 1),
            next_reaction_id: max_reaction + 1,
            next_thread_id: max_thread + 1,
        };
        log::debug!(
            "comment store ready: {} comments, {} threads",
            state.comments.len(),
            state.threads.len()
        );

        Ok(Self {
            config,
            current_user,
            state: Arc::new(RwLock::new(state)),
            rng: Arc::new(Mutex::new(entropy_rng())),
        })
    }

    pub fn current_user(&self) -> &User {
        &self.current_user
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    async fn delay(&self, base: Duration) {
        let latency = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            jittered(&mut *rng, base, self.config.jitter)
        };
        simulate(latency).await;
    }

    // ── Reads ──────────────────────────────────────────────────────────

    /// All comments on `pr_id`, in storage order.
    pub async fn fetch_comments_by_pr(&self, pr_id: PrId) -> Vec<Comment> {
        self.delay(self.config.fetch_latency).await;
        let state = self.state.read().await;
        state
            .comments
            .iter()
            .filter(|c| c.pr_id == pr_id)
            .cloned()
            .collect()
    }

    /// Threads on `file_id` in creation order, each with its live comments.
    pub async fn fetch_threads_by_file(&self, file_id: FileId) -> Vec<CommentThread> {
        self.delay(self.config.fetch_latency).await;
        let state = self.state.read().await;
        state
            .threads
            .iter()
            .filter(|t| t.file_id == file_id)
            .map(|t| state.materialize(t))
            .collect()
    }

    pub async fn fetch_thread(&self, thread_id: ThreadId) -> Option<CommentThread> {
        self.delay(self.config.fetch_latency).await;
        let state = self.state.read().await;
        let pos = state.thread_position(thread_id)?;
        Some(state.materialize(&state.threads[pos]))
    }

    pub async fn comment_count(&self) -> usize {
        self.state.read().await.comments.len()
    }

    pub async fn thread_count(&self) -> usize {
        self.state.read().await.threads.len()
    }

    // ── Mutations ──────────────────────────────────────────────────────

    /// Post a comment as the current user.
    ///
    /// The comment joins the thread at `(file_id, line_number)`, which is
    /// created on first use. A `parent_id` must name a live root comment of
    /// that thread; otherwise nothing is stored and `None` is returned.
    ///
    /// New comments always start unresolved, even on a resolved thread; the
    /// thread keeps its resolved flag until it is resolved or unresolved
    /// again, which then updates every comment in it.
    pub async fn add_comment(
        &self,
        pr_id: PrId,
        file_id: FileId,
        line_number: u32,
        content: impl Into<String>,
        parent_id: Option<CommentId>,
    ) -> Option<Comment> {
        let content = content.into();
        self.delay(self.config.mutation_latency).await;

        let mut state = self.state.write().await;
        if let Some(parent) = parent_id {
            let valid = state.comment(parent).is_some_and(|p| {
                !p.is_reply() && p.file_id == file_id && p.line_number == line_number
            });
            if !valid {
                log::warn!(
                    "reply to comment {parent} rejected: not a root comment at file {file_id} line {line_number}"
                );
                return None;
            }
        }

        let id = CommentId(state.next_comment_id);
        state.next_comment_id += 1;
        let now = Utc::now();
        let comment = Comment {
            id,
            pr_id,
            file_id,
            line_number,
            content,
            author: self.current_user.clone(),
            created_at: now,
            updated_at: now,
            resolved: false,
            reactions: Vec::new(),
            replies: Vec::new(),
            parent_id,
        };
        state.comments.push(comment.clone());
        let thread_id = state.attach(file_id, line_number, id);
        log::debug!("added comment {id} to thread {thread_id}");

        Some(comment)
    }

    /// Replace a comment's content. `None` if it does not exist.
    pub async fn update_comment(&self, id: CommentId, content: impl Into<String>) -> Option<Comment> {
        let content = content.into();
        self.delay(self.config.mutation_latency).await;

        let mut state = self.state.write().await;
        let comment = state.comment_mut(id)?;
        comment.content = content;
        comment.updated_at = Utc::now();
        Some(comment.clone())
    }

    /// Remove a comment. Returns `true` iff it existed.
    pub async fn delete_comment(&self, id: CommentId) -> bool {
        self.delay(self.config.mutation_latency).await;

        let mut state = self.state.write().await;
        let before = state.comments.len();
        state.comments.retain(|c| c.id != id);
        let removed = state.comments.len() != before;
        if removed {
            log::debug!("deleted comment {id}");
        }
        removed
    }

    /// Mark a thread and all its comments resolved by the current user.
    pub async fn resolve_thread(&self, thread_id: ThreadId) -> Option<CommentThread> {
        self.delay(self.config.mutation_latency).await;
        let mut state = self.state.write().await;
        state.set_resolved(thread_id, Some(&self.current_user))
    }

    /// Reopen a thread, clearing the resolver.
    pub async fn unresolve_thread(&self, thread_id: ThreadId) -> Option<CommentThread> {
        self.delay(self.config.mutation_latency).await;
        let mut state = self.state.write().await;
        state.set_resolved(thread_id, None)
    }

    /// React to a comment as the current user.
    ///
    /// Reacting twice with the same kind is a no-op.
    pub async fn add_reaction(&self, comment_id: CommentId, kind: ReactionKind) -> Option<Comment> {
        self.delay(self.config.reaction_latency).await;

        let mut state = self.state.write().await;
        let user = self.current_user.id;
        let next_id = ReactionId(state.next_reaction_id);
        let comment = state.comment_mut(comment_id)?;
        if comment.has_reaction(user, kind) {
            return Some(comment.clone());
        }
        comment.reactions.push(CommentReaction {
            id: next_id,
            kind,
            user: self.current_user.clone(),
        });
        let snapshot = comment.clone();
        state.next_reaction_id += 1;
        Some(snapshot)
    }

    /// Withdraw the current user's `kind` reactions from a comment.
    pub async fn remove_reaction(&self, comment_id: CommentId, kind: ReactionKind) -> Option<Comment> {
        self.delay(self.config.reaction_latency).await;

        let mut state = self.state.write().await;
        let user = self.current_user.id;
        let comment = state.comment_mut(comment_id)?;
        comment
            .reactions
            .retain(|r| !(r.user.id == user && r.kind == kind));
        Some(comment.clone())
    }
}

impl std::fmt::Debug for CommentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommentStore")
            .field("current_user", &self.current_user.id)
            .field("config", &self.config)
            .finish()
    }
}
