//! CodeReview collaboration demo: headless driver for the mock services.
//!
//! Joins a review room on the simulated channel, shares a code change and
//! a cursor, walks a comment thread through the store, then watches the
//! room for a while and leaves. Everything is reported through `log`;
//! run with `RUST_LOG=info` (or `debug`/`trace` for dispatch detail).

mod settings;

use log::{error, info};
use thiserror::Error;

use codereview_collab::{
    handler, CollaborationSession, CommentStore, ConfigError, EventChannel, EventKind, Handler,
};
use codereview_core::fixtures::{demo_roster, demo_seed};
use codereview_core::{FileId, FixtureError, PrId, ReactionKind};
use settings::Settings;

#[derive(Error, Debug)]
enum AppError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("fixtures: {0}")]
    Fixture(#[from] FixtureError),
}

/// Log every event on the channel. Returns the handler for unsubscribing.
fn watch(channel: &EventChannel) -> Handler {
    let watcher = handler(|env| {
        info!("#{} {} from {:?}", env.sequence, env.kind(), env.origin);
    });
    for kind in EventKind::ALL {
        channel.on(kind, watcher.clone());
    }
    watcher
}

async fn review_comments(store: &CommentStore) {
    let threads = store.fetch_threads_by_file(FileId(1)).await;
    for thread in &threads {
        info!(
            "thread {} at line {}: {} comment(s), resolved={}",
            thread.id,
            thread.line_number,
            thread.comments.len(),
            thread.resolved
        );
    }

    let Some(comment) = store
        .add_comment(PrId(1), FileId(1), 64, "Could this allocation move out of the loop?", None)
        .await
    else {
        return;
    };
    info!("posted comment {}", comment.id);

    if let Some(reply) = store
        .add_comment(PrId(1), FileId(1), 64, "Good point, will fix.", Some(comment.id))
        .await
    {
        info!("posted reply {}", reply.id);
    }
    if let Some(c) = store.add_reaction(comment.id, ReactionKind::ThumbsUp).await {
        info!("comment {} now has {} reaction(s)", c.id, c.reactions.len());
    }

    let threads = store.fetch_threads_by_file(FileId(1)).await;
    if let Some(thread) = threads.iter().find(|t| t.line_number == 64) {
        if let Some(resolved) = store.resolve_thread(thread.id).await {
            info!(
                "thread {} resolved by {}",
                resolved.id,
                resolved
                    .resolved_by
                    .as_ref()
                    .map_or("nobody", |u| u.name.as_str())
            );
        }
    }
    info!("store holds {} comment(s)", store.comment_count().await);
}

async fn run(settings: Settings) -> Result<(), AppError> {
    let roster = demo_roster()?;
    let me = roster.current_user().clone();
    let store = CommentStore::with_seed(settings.store.clone(), me, demo_seed()?)?;

    let channel = EventChannel::new(settings.channel.clone(), roster)?;
    let watcher = watch(&channel);

    let mut session = CollaborationSession::join(channel.clone(), settings.room.clone());
    session.on_remote_code_change(|code| info!("remote code change ({} bytes)", code.len()));

    tokio::time::sleep(settings.channel.connect_delay + settings.channel.send_delay).await;
    if !session.is_connected() {
        error!("room {} did not connect", settings.room);
    }
    info!("{} user(s) present", session.users().len());

    if let Err(e) = session.broadcast_code_change("fn review() -> bool { true }") {
        error!("broadcast failed: {e}");
    }
    if let Err(e) = session.move_cursor(FileId(1), 12, 4) {
        error!("cursor broadcast failed: {e}");
    }

    review_comments(&store).await;

    tokio::time::sleep(settings.run_for).await;
    for cursor in session.cursors(None) {
        info!(
            "{} is at {}:{}:{}",
            cursor.user_name, cursor.position.file_id, cursor.position.line, cursor.position.column
        );
    }

    session.leave();
    for kind in EventKind::ALL {
        channel.off(kind, &watcher);
    }

    let stats = channel.stats();
    info!(
        "done: {} event(s), {} handler call(s), {} panic(s), {} rejected send(s)",
        stats.events_emitted, stats.handler_calls, stats.handler_panics, stats.rejected_sends
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::init();

    info!("Starting CodeReview collaboration demo...");

    let result = match Settings::from_env() {
        Ok(settings) => run(settings).await,
        Err(e) => Err(e.into()),
    };
    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}
