//! Debounced terminal geometry propagation.
//!
//! Window resizes arrive in bursts while the user drags; the remote PTY
//! only needs the final geometry. One timer is armed on the first
//! observation of a burst and the latest geometry wins when it fires.
//! Geometry seen while the connection is down is parked and replayed
//! once the channel reopens.

use std::time::Duration;

use tokio::time::{Instant, sleep_until};

pub struct ResizeCoordinator {
    debounce: Duration,
    deadline: Option<Instant>,
    latest: Option<(u16, u16)>,
    pending: Option<(u16, u16)>,
}

impl ResizeCoordinator {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            deadline: None,
            latest: None,
            pending: None,
        }
    }

    /// Record a geometry change. Arms the debounce timer if no burst is
    /// in flight; an ongoing burst keeps its original deadline.
    pub fn observe(&mut self, cols: u16, rows: u16) {
        self.latest = Some((cols, rows));
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.debounce);
        }
    }

    /// Resolves when the armed timer elapses; pends forever when no
    /// burst is in flight, so it is safe to poll unconditionally in a
    /// select loop.
    pub async fn elapsed(&self) {
        match self.deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    /// Disarm and yield the geometry the burst settled on.
    pub fn fire(&mut self) -> Option<(u16, u16)> {
        self.deadline = None;
        self.latest.take()
    }

    /// Park a geometry that could not be delivered; last write wins.
    pub fn retain(&mut self, cols: u16, rows: u16) {
        self.pending = Some((cols, rows));
    }

    /// Take the parked geometry, if any. Called when the channel
    /// (re)opens so the remote PTY catches up with reality.
    pub fn take_pending(&mut self) -> Option<(u16, u16)> {
        self.pending.take()
    }
}
