use tracing::debug;

use crate::timer::CancelableTimer;

/// Two-phase destructive action with an undo window.
///
/// Scheduling records the target and arms the timer; [`PendingAction::undo`]
/// drops it before the deadline; [`PendingAction::poll`] hands the target out
/// exactly once when the window lapses. Only one action may be pending.
#[derive(Debug, Clone)]
pub struct PendingAction<T> {
    timer: CancelableTimer<T>,
    window_ms: u64,
}

impl<T: std::fmt::Debug> PendingAction<T> {
    pub fn new(window_ms: u64) -> Self {
        Self {
            timer: CancelableTimer::new(),
            window_ms,
        }
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Schedule `target`, replacing (and returning) any pending target.
    pub fn schedule(&mut self, target: T, now_ms: u64) -> Option<T> {
        debug!(?target, window_ms = self.window_ms, "pending action armed");
        self.timer.arm(now_ms, self.window_ms, target)
    }

    /// Cancel the pending action. Returns the dropped target.
    pub fn undo(&mut self) -> Option<T> {
        let target = self.timer.cancel();
        if target.is_some() {
            debug!(?target, "pending action undone");
        }
        target
    }

    /// Return the target once its window has lapsed.
    pub fn poll(&mut self, now_ms: u64) -> Option<T> {
        self.timer.poll_expired(now_ms)
    }

    pub fn target(&self) -> Option<&T> {
        self.timer.payload()
    }

    /// Whether the presentation layer should offer an undo control.
    pub fn undo_visible(&self) -> bool {
        self.timer.is_armed()
    }

    pub fn deadline_ms(&self) -> Option<u64> {
        self.timer.deadline_ms()
    }
}
