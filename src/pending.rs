//! Tracking of in-flight calls awaiting responses.
//!
//! Each outstanding call owns a oneshot receiver; the table keeps the sender
//! keyed by request id. Request ids carry their creation time in the high bits,
//! so ordering the table by id orders it by age and expiry is a range split.
//!
//! A call ends in exactly one of two ways:
//! - a response arrives and [`PendingCalls::resolve`] delivers it, or
//! - the sweeper removes the entry, dropping the sender, which the waiting
//!   caller observes as a timeout.
//!
//! Whichever happens first removes the entry, so the other becomes a no-op.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::codec::Message;
use crate::id::{id_floor, now_millis};

/// Pending-call table.
///
/// Lives on one scheduler thread; borrows never span an `.await`.
#[derive(Debug, Default)]
pub struct PendingCalls {
    calls: RefCell<BTreeMap<u64, oneshot::Sender<Message>>>,
}

impl PendingCalls {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call and return the receiver its response will arrive on.
    ///
    /// Re-registering an id replaces the earlier entry; its caller sees a
    /// timeout.
    pub fn register(&self, request_id: u64) -> oneshot::Receiver<Message> {
        let (tx, rx) = oneshot::channel();
        self.calls.borrow_mut().insert(request_id, tx);
        rx
    }

    /// Deliver a response.
    ///
    /// Returns `false` if the id is unknown (already resolved, swept, or never
    /// issued) or the caller stopped waiting. The message is dropped either way.
    pub fn resolve(&self, request_id: u64, response: Message) -> bool {
        let entry = self.calls.borrow_mut().remove(&request_id);
        match entry {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Forget a call without answering it.
    pub fn remove(&self, request_id: u64) -> bool {
        self.calls.borrow_mut().remove(&request_id).is_some()
    }

    /// Check whether a call is still waiting.
    pub fn contains(&self, request_id: u64) -> bool {
        self.calls.borrow().contains_key(&request_id)
    }

    /// Number of calls waiting.
    pub fn len(&self) -> usize {
        self.calls.borrow().len()
    }

    /// Check whether no call is waiting.
    pub fn is_empty(&self) -> bool {
        self.calls.borrow().is_empty()
    }

    /// Drop every call whose id is strictly below `cutoff_id`.
    ///
    /// Returns how many calls were expired.
    pub fn sweep_before(&self, cutoff_id: u64) -> usize {
        let mut calls = self.calls.borrow_mut();
        let keep = calls.split_off(&cutoff_id);
        let expired = std::mem::replace(&mut *calls, keep);
        expired.len()
    }

    /// Drop every call issued more than `window` before `now_ms`.
    pub fn sweep_expired(&self, now_ms: u64, window: Duration) -> usize {
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        self.sweep_before(id_floor(now_ms.saturating_sub(window_ms)))
    }
}

/// Periodically expire calls older than `window`.
///
/// Runs until the table is dropped by every other owner.
pub async fn run_sweeper(pending: Rc<PendingCalls>, interval: Duration, window: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if Rc::strong_count(&pending) == 1 {
            tracing::debug!("Sweeper stopping");
            return;
        }

        let expired = pending.sweep_expired(now_millis(), window);
        if expired > 0 {
            tracing::debug!(expired, remaining = pending.len(), "Expired pending calls");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::TIMESTAMP_SHIFT;

    fn id_at(millis: u64, seq: u64) -> u64 {
        (millis << TIMESTAMP_SHIFT) | seq
    }

    fn msg(body: &'static [u8]) -> Message {
        Message::new("t", body)
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let pending = PendingCalls::new();
        let rx = pending.register(42);
        assert!(pending.contains(42));

        assert!(pending.resolve(42, msg(b"response")));
        assert!(!pending.contains(42));
        assert_eq!(rx.await.unwrap().body(), b"response");
    }

    #[tokio::test]
    async fn test_resolve_at_most_once() {
        let pending = PendingCalls::new();
        let rx = pending.register(1);

        assert!(pending.resolve(1, msg(b"first")));
        assert!(!pending.resolve(1, msg(b"second")));
        assert_eq!(rx.await.unwrap().body(), b"first");
    }

    #[test]
    fn test_resolve_unknown_id() {
        let pending = PendingCalls::new();
        assert!(!pending.resolve(7, msg(b"late")));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_resolve_after_caller_gone() {
        let pending = PendingCalls::new();
        drop(pending.register(3));

        assert!(!pending.resolve(3, msg(b"x")));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_before_splits_by_id() {
        let pending = PendingCalls::new();
        let old = pending.register(id_at(1000, 0));
        let _edge = pending.register(id_at(2000, 0));
        let _new = pending.register(id_at(3000, 5));

        let expired = pending.sweep_before(id_at(2000, 0));

        assert_eq!(expired, 1);
        assert_eq!(pending.len(), 2);
        assert!(pending.contains(id_at(2000, 0)));
        assert!(old.await.is_err());
    }

    #[test]
    fn test_sweep_expired_window() {
        let pending = PendingCalls::new();
        let _a = pending.register(id_at(10_000, 1));
        let _b = pending.register(id_at(24_000, 1));
        let _c = pending.register(id_at(26_000, 1));

        let expired = pending.sweep_expired(40_000, Duration::from_millis(15_000));

        assert_eq!(expired, 2);
        assert!(pending.contains(id_at(26_000, 1)));
    }

    #[test]
    fn test_sweep_expired_early_clock() {
        let pending = PendingCalls::new();
        let _a = pending.register(id_at(5, 0));

        assert_eq!(pending.sweep_expired(10, Duration::from_secs(15)), 0);
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_after_sweep_is_noop() {
        let pending = PendingCalls::new();
        let id = id_at(1, 0);
        let rx = pending.register(id);

        pending.sweep_before(id + 1);
        assert!(!pending.resolve(id, msg(b"late")));
        assert!(rx.await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_expires_stale_calls() {
        let pending = Rc::new(PendingCalls::new());
        let stale = pending.register(id_at(now_millis().saturating_sub(60_000), 0));

        let local = tokio::task::LocalSet::new();
        local.spawn_local(run_sweeper(
            pending.clone(),
            Duration::from_millis(100),
            Duration::from_millis(1_000),
        ));

        local
            .run_until(async {
                assert!(stale.await.is_err());
            })
            .await;
        assert!(pending.is_empty());
    }
}
