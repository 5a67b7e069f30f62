//! Per-channel correlation of digit events with the call flow waiting for them

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::{
    error::{AriError, AriResult},
    event::{EventCategory, InboundEvent},
};

/// Single-shot slot for one waiter.
struct PendingWait {
    registration: u64,
    /// Taken by the first matching offer; later offers find `None`.
    tx: Option<oneshot::Sender<InboundEvent>>,
}

/// Turns "the next digit on channel X" into an awaitable result.
///
/// One instance is shared (via `Arc`) between the event stream reader, which
/// [`offer`](Self::offer)s digit events, and call flows, which
/// [`begin_wait`](Self::begin_wait). Events for channels nobody is waiting on
/// are dropped, not queued.
#[derive(Default)]
pub struct EventCorrelator {
    waits: Mutex<HashMap<String, PendingWait>>,
    next_registration: AtomicU64,
}

impl std::fmt::Debug for EventCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventCorrelator")
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// Removes this registration's entry on every exit path, including drop on cancellation.
struct WaitGuard<'a> {
    correlator: &'a EventCorrelator,
    channel_id: &'a str,
    registration: u64,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        let mut waits = self
            .correlator
            .waits
            .lock();
        if waits
            .get(self.channel_id)
            .is_some_and(|w| w.registration == self.registration)
        {
            waits.remove(self.channel_id);
            trace!(channel_id = %self.channel_id, "[WAIT] entry removed");
        }
    }
}

impl EventCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait up to `timeout` for the next digit event on `channel_id`.
    ///
    /// Returns `Ok(None)` on timeout. Fails with [`AriError::DuplicateWait`]
    /// if this channel already has a waiter; the existing wait is untouched.
    /// The entry is gone by the time this returns or is dropped.
    pub async fn begin_wait(
        &self,
        channel_id: &str,
        timeout: Duration,
    ) -> AriResult<Option<InboundEvent>> {
        let (tx, rx) = oneshot::channel();
        let registration = self
            .next_registration
            .fetch_add(1, Ordering::Relaxed);
        {
            let mut waits = self
                .waits
                .lock();
            if waits.contains_key(channel_id) {
                return Err(AriError::DuplicateWait {
                    channel_id: channel_id.to_string(),
                });
            }
            waits.insert(
                channel_id.to_string(),
                PendingWait {
                    registration,
                    tx: Some(tx),
                },
            );
        }
        let _guard = WaitGuard {
            correlator: self,
            channel_id,
            registration,
        };
        debug!(channel_id, ?timeout, "[WAIT] waiting for digit");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(event)) => {
                debug!(channel_id, digit = ?event.digit(), "[WAIT] fulfilled");
                Ok(Some(event))
            }
            // The sender lives in our own entry, so it can only vanish with it.
            Ok(Err(_)) => Ok(None),
            Err(_) => {
                debug!(channel_id, "[WAIT] timed out");
                Ok(None)
            }
        }
    }

    /// Hand a digit event to the waiter on its channel, if any.
    ///
    /// Returns `true` if a waiter was fulfilled. Non-digit events, events
    /// without a waiter, and repeat offers before the next `begin_wait` are
    /// ignored.
    pub fn offer(&self, event: &InboundEvent) -> bool {
        if event.category() != EventCategory::DigitReceived {
            return false;
        }
        let Some(channel_id) = event.channel_id() else {
            return false;
        };

        let tx = {
            let mut waits = self
                .waits
                .lock();
            waits
                .get_mut(channel_id)
                .and_then(|w| {
                    w.tx
                        .take()
                })
        };

        match tx {
            Some(tx) => tx
                .send(event.clone())
                .is_ok(),
            None => {
                trace!(channel_id, "[WAIT] no waiter, digit dropped");
                false
            }
        }
    }

    /// Whether `channel_id` currently has a waiter registered.
    pub fn is_waiting(&self, channel_id: &str) -> bool {
        self.waits
            .lock()
            .contains_key(channel_id)
    }

    /// Number of registered waits.
    pub fn pending_count(&self) -> usize {
        self.waits
            .lock()
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::Instant;

    async fn until_waiting(correlator: &EventCorrelator, channel_id: &str) {
        while !correlator.is_waiting(channel_id) {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_returns_none_and_cleans_up() {
        let correlator = EventCorrelator::new();
        let started = Instant::now();
        let result = correlator
            .begin_wait("C1", Duration::from_secs(2))
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(correlator.pending_count(), 0);

        let again = correlator
            .begin_wait("C1", Duration::from_millis(10))
            .await;
        assert!(matches!(again, Ok(None)));
    }

    #[tokio::test(start_paused = true)]
    async fn offer_fulfills_before_timeout() {
        let correlator = Arc::new(EventCorrelator::new());
        let waiter = {
            let correlator = correlator.clone();
            tokio::spawn(async move {
                let started = Instant::now();
                let event = correlator
                    .begin_wait("C1", Duration::from_secs(30))
                    .await;
                (event, started.elapsed())
            })
        };
        until_waiting(&correlator, "C1").await;

        assert!(correlator.offer(&InboundEvent::dtmf("C1", '1')));
        let (event, elapsed) = waiter
            .await
            .unwrap();
        assert_eq!(
            event
                .unwrap()
                .and_then(|e| e.digit()),
            Some('1')
        );
        assert!(elapsed < Duration::from_secs(30));
        assert!(!correlator.is_waiting("C1"));
    }

    #[tokio::test]
    async fn duplicate_wait_fails_fast() {
        let correlator = Arc::new(EventCorrelator::new());
        let first = {
            let correlator = correlator.clone();
            tokio::spawn(async move {
                correlator
                    .begin_wait("C1", Duration::from_secs(5))
                    .await
            })
        };
        until_waiting(&correlator, "C1").await;

        let second = correlator
            .begin_wait("C1", Duration::from_secs(5))
            .await;
        assert!(matches!(
            second,
            Err(AriError::DuplicateWait { ref channel_id }) if channel_id == "C1"
        ));

        // The first waiter is still registered and still receives its digit.
        assert!(correlator.is_waiting("C1"));
        assert!(correlator.offer(&InboundEvent::dtmf("C1", '7')));
        let event = first
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(event.digit(), Some('7'));
    }

    #[tokio::test]
    async fn second_offer_is_ignored() {
        let correlator = Arc::new(EventCorrelator::new());
        let waiter = {
            let correlator = correlator.clone();
            tokio::spawn(async move {
                correlator
                    .begin_wait("C1", Duration::from_secs(5))
                    .await
            })
        };
        until_waiting(&correlator, "C1").await;

        assert!(correlator.offer(&InboundEvent::dtmf("C1", '1')));
        assert!(!correlator.offer(&InboundEvent::dtmf("C1", '2')));
        let event = waiter
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(event.digit(), Some('1'));
    }

    #[tokio::test]
    async fn events_without_waiter_are_not_buffered() {
        let correlator = EventCorrelator::new();
        assert!(!correlator.offer(&InboundEvent::dtmf("C1", '1')));
        let result = correlator
            .begin_wait("C1", Duration::from_millis(20))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn other_channels_and_types_do_not_match() {
        let correlator = Arc::new(EventCorrelator::new());
        let waiter = {
            let correlator = correlator.clone();
            tokio::spawn(async move {
                correlator
                    .begin_wait("C1", Duration::from_millis(50))
                    .await
            })
        };
        until_waiting(&correlator, "C1").await;

        assert!(!correlator.offer(&InboundEvent::dtmf("C2", '1')));
        assert!(!correlator.offer(&InboundEvent::stasis_end("C1")));
        assert!(waiter
            .await
            .unwrap()
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn cancelled_wait_removes_entry() {
        let correlator = Arc::new(EventCorrelator::new());
        let waiter = {
            let correlator = correlator.clone();
            tokio::spawn(async move {
                correlator
                    .begin_wait("C1", Duration::from_secs(60))
                    .await
            })
        };
        until_waiting(&correlator, "C1").await;

        waiter.abort();
        assert!(waiter
            .await
            .unwrap_err()
            .is_cancelled());
        assert_eq!(correlator.pending_count(), 0);
        assert!(!correlator.offer(&InboundEvent::dtmf("C1", '1')));
    }
}
