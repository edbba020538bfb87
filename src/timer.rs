//! Per-response inactivity timer.
//!
//! Grounded in `original_source/TimerThread.py`: a one-shot countdown that
//! calls back into the owning connection when it elapses, unless canceled
//! first. Modeled as a capability trait rather than a direct dependency on
//! `connection::State` so this module never imports `crate::connection`
//! (the REDESIGN FLAG on the source's handler/timer import cycle).

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// What a timer calls when its countdown elapses without cancellation.
pub trait TimerSink: Send + Sync {
    /// Invoked with the epoch the timer was started under. The sink
    /// decides whether that epoch is still current before acting on it.
    fn mark_timed_out(&self, epoch: u64);
}

/// Starts a one-shot timer that fires `sink.mark_timed_out(epoch)` after
/// `seconds`, ticking once per second so `cancel` is checked promptly.
/// `cancel` is a shutdown-style watch receiver: a hangup or explicit
/// `true` value stops the countdown silently.
pub fn spawn<S>(epoch: u64, seconds: u64, sink: Arc<S>, mut cancel: watch::Receiver<bool>)
where
    S: TimerSink + 'static,
{
    tokio::spawn(async move {
        let mut remaining = seconds;
        loop {
            if *cancel.borrow() {
                return;
            }
            if remaining == 0 {
                sink.mark_timed_out(epoch);
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(1)) => {
                    remaining -= 1;
                }
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        return;
                    }
                }
            }
        }
    });
}
