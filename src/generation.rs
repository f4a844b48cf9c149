//! Generation tracking for conversational turns.
//!
//! Every outbound turn is stamped with a [`Generation`].  Only the most
//! recently issued generation is current; anything stamped with an older one
//! is stale and must never touch the transcript.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Notify;

/// Identifier of one conversational turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    /// Returns the raw counter value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen#{}", self.0)
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    counter: AtomicU64,
    bumped: Notify,
}

/// The single source of truth for which turn is live.
///
/// Clones share the same counter, so a clone handed to another task can
/// invalidate the running turn.  Checking currency is a single atomic load.
#[derive(Clone, Debug, Default)]
pub struct RequestTracker {
    state: Arc<TrackerState>,
}

impl RequestTracker {
    /// Creates a tracker with no live turn.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new generation, invalidating every previous one.
    pub fn begin_turn(&self) -> Generation {
        Generation(self.bump())
    }

    /// Invalidates the live generation without opening new work.
    pub fn cancel(&self) {
        self.bump();
    }

    /// Returns whether `generation` still matches the live counter.
    pub fn is_current(&self, generation: Generation) -> bool {
        self.state.counter.load(Ordering::Acquire) == generation.0
    }

    /// Returns the live counter value as a generation.
    pub fn current(&self) -> Generation {
        Generation(self.state.counter.load(Ordering::Acquire))
    }

    /// Resolves once `generation` is no longer current.
    pub async fn superseded(&self, generation: Generation) {
        loop {
            let notified = self.state.bumped.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_current(generation) {
                return;
            }
            notified.await;
        }
    }

    fn bump(&self) -> u64 {
        let next = self.state.counter.fetch_add(1, Ordering::AcqRel) + 1;
        self.state.bumped.notify_waiters();
        next
    }
}

/// A handle that can only cancel.
///
/// Give this to signal handlers or UI threads that must abort the running
/// turn without holding the session.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    tracker: RequestTracker,
}

impl CancelHandle {
    pub(crate) fn new(tracker: RequestTracker) -> Self {
        Self { tracker }
    }

    /// Invalidates whatever turn is live right now.
    pub fn cancel(&self) {
        self.tracker.cancel();
    }
}
