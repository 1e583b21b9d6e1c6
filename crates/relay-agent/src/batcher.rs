//! Message Batcher (`spec.md` §4.B) — coalesces rapid-fire user messages
//! arriving within a debounce window into a single provider turn.
//!
//! No direct teacher precedent (`skynet-telegram` dispatches one API call
//! per inbound message); built fresh against `spec.md` §4.B's window-reset
//! semantics using the same `tokio::time::sleep` + reset-on-arrival shape
//! the teacher uses for its typing-indicator keepalive
//! (`skynet-telegram::typing`).

use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::timeout;

/// Waits for a thread's pending batch to go quiet for `window` before
/// returning, so a burst of messages sent seconds apart folds into one
/// generation instead of one per message. Each call to `notify.notified()`
/// races against the window; every new arrival resets it.
///
/// Returns once no new arrival has reset the window for `window`, or
/// immediately if `window` is zero.
pub async fn await_batch_window(notify: &Notify, window: Duration) {
    if window.is_zero() {
        return;
    }
    loop {
        match timeout(window, notify.notified()).await {
            Ok(()) => continue,
            Err(_elapsed) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    #[tokio::test]
    async fn returns_promptly_when_no_arrivals() {
        let notify = Notify::new();
        let start = Instant::now();
        await_batch_window(&notify, Duration::from_millis(50)).await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn zero_window_returns_immediately() {
        let notify = Notify::new();
        let start = Instant::now();
        await_batch_window(&notify, Duration::ZERO).await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn arrival_resets_the_window() {
        let notify = Arc::new(Notify::new());
        let window = Duration::from_millis(80);
        let n2 = notify.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            n2.notify_one();
        });
        let start = Instant::now();
        await_batch_window(&notify, window).await;
        // total wait should be roughly 30ms (reset) + 80ms (final quiet window)
        assert!(start.elapsed() >= Duration::from_millis(100));
        handle.await.unwrap();
    }
}
