//! Cooperative shutdown.
//!
//! One root `CancellationToken` for the node; every session gets a child token
//! so it can be stopped on its own (tie-break loser, LEAVE) or together with
//! everything else. Every task the node spawns goes through the tracker, so
//! `wait` can join them all.
//!
//! Latency: session read loops and the accept loop `select!` on their token,
//! so a stop is observed at the next suspension point. A partially received
//! frame is abandoned rather than completed, which is harmless because the
//! socket is being torn down. Handlers already running (a gossip dial, say)
//! finish first; the connect timeout bounds that. `wait` gives up after the
//! configured grace period; `wait_until` takes a deadline shared with other
//! shutdown work.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Clone)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tracker: TaskTracker,
    grace: Duration,
}

impl ShutdownCoordinator {
    pub fn new(grace: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            grace,
        }
    }

    /// Token that fires when the node stops.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Per-session token: cancelled with the node, or on its own.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn is_stopping(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Spawn a task the coordinator will wait for.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(task)
    }

    /// Number of tracked tasks still running.
    pub fn tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Raise the stop signal. Idempotent.
    pub fn trigger(&self) {
        self.token.cancel();
        self.tracker.close();
    }

    /// Wait for every tracked task to finish, up to the grace period.
    /// Returns false if some were still running when it expired.
    pub async fn wait(&self) -> bool {
        self.wait_until(Instant::now() + self.grace).await
    }

    /// Like `wait`, but gives up at `deadline`.
    pub async fn wait_until(&self, deadline: Instant) -> bool {
        self.tracker.close();
        tokio::time::timeout_at(deadline, self.tracker.wait())
            .await
            .is_ok()
    }
}
