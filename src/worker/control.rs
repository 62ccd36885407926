//! Cooperative run control: stop and pause flags threaded through workers.
//!
//! Both flags are polled, never enforced — an in-flight UI action is never
//! interrupted. Stop is checked at loop-iteration boundaries; pause spins
//! the loop at low frequency until released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::info;

/// Shared stop/pause context for a run.
#[derive(Debug, Default)]
pub struct RunControl {
    stop: AtomicBool,
    pause: AtomicBool,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every worker to finish its current machine and terminate.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.pause.store(false, Ordering::SeqCst);
    }

    /// Flip the pause flag, returning the new state.
    pub fn toggle_pause(&self) -> bool {
        let paused = !self.pause.load(Ordering::SeqCst);
        self.pause.store(paused, Ordering::SeqCst);
        info!("[Control] {}", if paused { "paused" } else { "resumed" });
        paused
    }

    pub fn is_paused(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    /// Block while paused, polling at `poll` intervals. Returns early when
    /// a stop is requested.
    pub fn wait_while_paused(&self, poll: Duration) {
        while self.is_paused() && !self.stop_requested() {
            thread::sleep(poll);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_is_sticky() {
        let control = RunControl::new();
        assert!(!control.stop_requested());
        control.request_stop();
        assert!(control.stop_requested());
        assert!(control.stop_requested());
    }

    #[test]
    fn test_toggle_pause() {
        let control = RunControl::new();
        assert!(control.toggle_pause());
        assert!(control.is_paused());
        assert!(!control.toggle_pause());
        assert!(!control.is_paused());
    }

    #[test]
    fn test_wait_while_paused_exits_on_stop() {
        let control = RunControl::new();
        control.pause();
        control.request_stop();
        // Must return promptly despite the pause flag being set.
        control.wait_while_paused(Duration::from_millis(1));
    }
}
