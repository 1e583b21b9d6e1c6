//! Thread Registry and Generation Tracker (`spec.md` §4.A, §4.I).
//!
//! Grounded on the teacher's `skynet-gateway::app::AppState::active_operations:
//! DashMap<String, CancellationToken>`, generalized two ways: the key is a
//! structured `ThreadKey` instead of an opaque string, and each entry also
//! owns the thread's pending message batch and the `Notify` the batcher's
//! window timer waits on, folding what `spec.md` describes as two components
//! (§4.A, §4.I) into one map with one lock per thread — a thread's generation
//! and its pending batch change together and should not be observed torn.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;

use relay_core::ThreadKey;

/// One thread's live, in-memory state: whatever has arrived since the last
/// completed response, plus the means to cancel whatever's in flight.
pub struct ThreadState {
    /// Batched content blocks not yet sent to the provider.
    pub pending: Vec<serde_json::Value>,
    /// Signalled whenever `pending` gains an entry, so the batcher's sleep
    /// can be reset without polling.
    pub notify: Arc<Notify>,
    /// Cancellation token for the generation currently running against this
    /// thread, if any, tagged with a monotonic id so a stale `end_generation`
    /// call (racing a newer `start_generation`) can recognize it's stale and
    /// no-op instead of clobbering the replacement. `spec.md` §5: a new user
    /// message cancels whatever generation is in flight for the same thread.
    pub generation: Option<(u64, CancellationToken)>,
    next_generation_id: u64,
    /// Published on every `start_generation`/`end_generation` transition so a
    /// caller waiting for the current generation to exit can `changed()`
    /// instead of polling — a `watch` rather than `Notify`, since a waiter
    /// that subscribes after the signal fires must still see the latest
    /// value instead of missing it outright.
    active: watch::Sender<Option<u64>>,
}

impl Default for ThreadState {
    fn default() -> Self {
        let (active, _) = watch::channel(None);
        Self {
            pending: Vec::new(),
            notify: Arc::new(Notify::new()),
            generation: None,
            next_generation_id: 0,
            active,
        }
    }
}

/// RAII guard returned alongside a generation's `CancellationToken`. Releases
/// the generation slot exactly once, on drop — including on an early `?`
/// return from the turn that started it — so a second message's
/// `start_generation` is never handed the slot back until every Store write
/// belonging to the first generation has actually completed, not merely
/// until its orchestrator loop returned.
pub struct GenerationGuard {
    registry: ThreadRegistry,
    key: ThreadKey,
    id: u64,
}

impl GenerationGuard {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for GenerationGuard {
    fn drop(&mut self) {
        self.registry.end_generation(&self.key, self.id);
    }
}

/// Concurrent per-thread state, keyed by `ThreadKey`. One instance is shared
/// across all channel adapters feeding the same bot process.
#[derive(Default, Clone)]
pub struct ThreadRegistry {
    threads: Arc<DashMap<ThreadKey, ThreadState>>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a content block to the thread's pending batch, creating the
    /// entry if this is the first arrival, and wake the batcher.
    pub fn push_pending(&self, key: ThreadKey, block: serde_json::Value) {
        let mut entry = self.threads.entry(key).or_default();
        entry.pending.push(block);
        entry.notify.notify_one();
    }

    /// Take the pending batch, leaving the thread's entry with an empty one.
    pub fn take_pending(&self, key: &ThreadKey) -> Vec<serde_json::Value> {
        self.threads
            .get_mut(key)
            .map(|mut e| std::mem::take(&mut e.pending))
            .unwrap_or_default()
    }

    pub fn notify_handle(&self, key: ThreadKey) -> Arc<Notify> {
        self.threads.entry(key).or_default().notify.clone()
    }

    pub fn has_pending(&self, key: &ThreadKey) -> bool {
        self.threads.get(key).map(|e| !e.pending.is_empty()).unwrap_or(false)
    }

    /// Register a new generation for this thread. If one is already running
    /// there, cancel it and wait for its `end_generation` to actually fire —
    /// cancellation is cooperative, so the prior task may still be mid-flight
    /// against the Store for a while after its token is cancelled, and a
    /// second concurrent generation must not start until it's done (`spec.md`
    /// §4.B, invariant #1 in §8: at most one generation handle is active).
    /// Returns the new token plus the generation id to hand to
    /// `end_generation`; prefer [`Self::start_generation_guarded`] so that
    /// release happens automatically.
    pub async fn start_generation(&self, key: ThreadKey) -> (u64, CancellationToken) {
        loop {
            let mut rx = {
                let mut entry = self.threads.entry(key.clone()).or_default();
                match &entry.generation {
                    Some((_, old_token)) => {
                        old_token.cancel();
                        entry.active.subscribe()
                    }
                    None => {
                        let token = CancellationToken::new();
                        let id = entry.next_generation_id;
                        entry.next_generation_id += 1;
                        entry.generation = Some((id, token.clone()));
                        let _ = entry.active.send(Some(id));
                        return (id, token);
                    }
                }
            };
            let _ = rx.changed().await;
        }
    }

    /// [`Self::start_generation`], wrapped in a [`GenerationGuard`] that
    /// calls `end_generation` on drop instead of requiring the caller to
    /// remember to.
    pub async fn start_generation_guarded(&self, key: ThreadKey) -> (GenerationGuard, CancellationToken) {
        let (id, token) = self.start_generation(key.clone()).await;
        (GenerationGuard { registry: self.clone(), key, id }, token)
    }

    /// Clear the generation slot once a response finishes, but only if it
    /// still holds the id we started with — an intervening
    /// `start_generation` call already cancelled and replaced it, and
    /// clearing here would erase the new one.
    pub fn end_generation(&self, key: &ThreadKey, id: u64) {
        if let Some(mut entry) = self.threads.get_mut(key) {
            if entry.generation.as_ref().map(|(gid, _)| *gid) == Some(id) {
                entry.generation = None;
                let _ = entry.active.send(None);
            }
        }
    }

    /// Cancel the generation running for this thread, if any, without
    /// starting a new one.
    pub fn cancel_generation(&self, key: &ThreadKey) -> bool {
        if let Some(entry) = self.threads.get(key) {
            if let Some((_, token)) = &entry.generation {
                token.cancel();
                return true;
            }
        }
        false
    }

    /// Cancel every in-flight generation across all threads — used at
    /// shutdown, grounded on the teacher's `skynet-gateway::stop` sweep.
    pub fn cancel_all(&self) {
        for entry in self.threads.iter() {
            if let Some((_, token)) = &entry.generation {
                token.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn key(n: i64) -> ThreadKey {
        ThreadKey::new(relay_core::ChatId(n), relay_core::UserId(n), None)
    }

    #[test]
    fn pending_accumulates_and_drains() {
        let reg = ThreadRegistry::new();
        let k = key(1);
        reg.push_pending(k.clone(), serde_json::json!({"type": "text", "text": "a"}));
        reg.push_pending(k.clone(), serde_json::json!({"type": "text", "text": "b"}));
        assert!(reg.has_pending(&k));
        let drained = reg.take_pending(&k);
        assert_eq!(drained.len(), 2);
        assert!(!reg.has_pending(&k));
    }

    #[tokio::test]
    async fn starting_new_generation_cancels_old() {
        let reg = ThreadRegistry::new();
        let k = key(1);
        let (first_id, first) = reg.start_generation(k.clone()).await;
        assert!(!first.is_cancelled());

        let reg2 = reg.clone();
        let k2 = k.clone();
        let waiter = tokio::spawn(async move { reg2.start_generation(k2).await });
        tokio::task::yield_now().await;
        assert!(first.is_cancelled(), "starting a second generation must cancel the first immediately");

        reg.end_generation(&k, first_id);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn start_generation_waits_for_prior_exit() {
        let reg = ThreadRegistry::new();
        let k = key(1);
        let (first_id, _first_token) = reg.start_generation(k.clone()).await;

        let reg2 = reg.clone();
        let k2 = k.clone();
        let waiter = tokio::spawn(async move { reg2.start_generation(k2).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "second generation must not start until the first ends");

        reg.end_generation(&k, first_id);
        let result = tokio::time::timeout(Duration::from_millis(200), waiter).await;
        assert!(result.is_ok(), "second generation should proceed once the first ends");
    }

    #[tokio::test]
    async fn cancel_generation_without_replacing() {
        let reg = ThreadRegistry::new();
        let k = key(1);
        let (_, token) = reg.start_generation(k.clone()).await;
        assert!(reg.cancel_generation(&k));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn end_generation_is_noop_if_superseded() {
        let reg = ThreadRegistry::new();
        let k = key(1);
        let (first_id, _first_token) = reg.start_generation(k.clone()).await;

        let reg2 = reg.clone();
        let k2 = k.clone();
        let waiter = tokio::spawn(async move { reg2.start_generation(k2).await });
        tokio::task::yield_now().await;

        reg.end_generation(&k, first_id);
        let (second_id, _second_token) = waiter.await.unwrap();

        reg.end_generation(&k, first_id);
        assert!(reg.cancel_generation(&k), "second generation should remain registered");
        let _ = second_id;
    }

    #[tokio::test]
    async fn cancel_all_hits_every_thread() {
        let reg = ThreadRegistry::new();
        let (_, a) = reg.start_generation(key(1)).await;
        let (_, b) = reg.start_generation(key(2)).await;
        reg.cancel_all();
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
    }
}
