//! Status Broadcaster
//!
//! Fans canonical state changes out to any number of observers. A new
//! subscription always yields the current state first, so no observer has
//! to wait for a future event to learn the present one. Observers that fall
//! behind see the newest state only; intermediate states may be coalesced.

use crate::state::CanonicalState;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Holds the authoritative state and its observers
#[derive(Clone)]
pub struct StatusBroadcaster {
    tx: Arc<watch::Sender<CanonicalState>>,
}

impl StatusBroadcaster {
    pub fn new(initial: CanonicalState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Current state
    pub fn current(&self) -> CanonicalState {
        *self.tx.borrow()
    }

    /// Register an observer
    pub fn subscribe(&self) -> StatusSubscription {
        let rx = self.tx.subscribe();
        debug!("Status observer registered ({} total)", self.tx.receiver_count());
        StatusSubscription { rx, replay: true }
    }

    /// Number of live observers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Store `state` and notify every observer
    ///
    /// Returns `false` when the state was already current; observers are
    /// not woken in that case.
    pub(crate) fn publish(&self, state: CanonicalState) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        })
    }

    /// Replace `expected` with `state`, leaving any other value alone
    pub(crate) fn replace(&self, expected: CanonicalState, state: CanonicalState) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == expected && expected != state {
                *current = state;
                true
            } else {
                false
            }
        })
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new(CanonicalState::default())
    }
}

/// One observer's view of the state stream
///
/// Dropping the subscription (or calling [`unsubscribe`](Self::unsubscribe))
/// removes the observer.
pub struct StatusSubscription {
    rx: watch::Receiver<CanonicalState>,
    replay: bool,
}

impl StatusSubscription {
    /// Wait for the next state
    ///
    /// The first call returns the state current at subscription time
    /// without waiting. Returns `None` once the broadcaster is gone.
    pub async fn next(&mut self) -> Option<CanonicalState> {
        if std::mem::take(&mut self.replay) {
            return Some(*self.rx.borrow_and_update());
        }
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }

    /// Stop receiving updates
    pub fn unsubscribe(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_subscribe_replays_current() {
        let broadcaster = StatusBroadcaster::default();
        let mut sub = broadcaster.subscribe();

        assert_eq!(sub.next().await, Some(CanonicalState::NoConnection));
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_only_present() {
        let broadcaster = StatusBroadcaster::default();
        broadcaster.publish(CanonicalState::Preparing);
        broadcaster.publish(CanonicalState::Connecting);
        broadcaster.publish(CanonicalState::Connected);

        let mut sub = broadcaster.subscribe();
        assert_eq!(sub.next().await, Some(CanonicalState::Connected));

        // nothing else is queued
        let pending = tokio::time::timeout(Duration::from_millis(20), sub.next()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_in_order_delivery() {
        let broadcaster = StatusBroadcaster::default();
        let mut sub = broadcaster.subscribe();
        assert_eq!(sub.next().await, Some(CanonicalState::NoConnection));

        broadcaster.publish(CanonicalState::Connecting);
        assert_eq!(sub.next().await, Some(CanonicalState::Connecting));
        broadcaster.publish(CanonicalState::Connected);
        assert_eq!(sub.next().await, Some(CanonicalState::Connected));
    }

    #[tokio::test]
    async fn test_coalesces_to_newest() {
        let broadcaster = StatusBroadcaster::default();
        let mut sub = broadcaster.subscribe();
        sub.next().await;

        broadcaster.publish(CanonicalState::Preparing);
        broadcaster.publish(CanonicalState::Connecting);
        broadcaster.publish(CanonicalState::Connected);

        assert_eq!(sub.next().await, Some(CanonicalState::Connected));
    }

    #[test]
    fn test_publish_same_state_is_noop() {
        let broadcaster = StatusBroadcaster::default();
        assert!(broadcaster.publish(CanonicalState::Connected));
        assert!(!broadcaster.publish(CanonicalState::Connected));
    }

    #[test]
    fn test_replace_only_matching() {
        let broadcaster = StatusBroadcaster::new(CanonicalState::Connecting);

        assert!(!broadcaster.replace(CanonicalState::Preparing, CanonicalState::Disconnected));
        assert_eq!(broadcaster.current(), CanonicalState::Connecting);

        assert!(broadcaster.replace(CanonicalState::Connecting, CanonicalState::Disconnected));
        assert_eq!(broadcaster.current(), CanonicalState::Disconnected);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let broadcaster = StatusBroadcaster::default();
        let a = broadcaster.subscribe();
        let _b = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 2);

        a.unsubscribe();
        assert_eq!(broadcaster.subscriber_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unsubscribe_during_publish() {
        let broadcaster = StatusBroadcaster::default();
        let publisher = {
            let broadcaster = broadcaster.clone();
            tokio::spawn(async move {
                for i in 0..1000 {
                    let state = if i % 2 == 0 {
                        CanonicalState::Connected
                    } else {
                        CanonicalState::Disconnected
                    };
                    broadcaster.publish(state);
                    tokio::task::yield_now().await;
                }
            })
        };

        for _ in 0..100 {
            let mut sub = broadcaster.subscribe();
            sub.next().await;
            sub.unsubscribe();
        }

        publisher.await.unwrap();
        assert_eq!(broadcaster.subscriber_count(), 0);
        assert_eq!(broadcaster.current(), CanonicalState::Disconnected);
    }

    #[tokio::test]
    async fn test_ends_when_broadcaster_dropped() {
        let broadcaster = StatusBroadcaster::default();
        let mut sub = broadcaster.subscribe();
        sub.next().await;

        drop(broadcaster);
        assert_eq!(sub.next().await, None);
    }
}
