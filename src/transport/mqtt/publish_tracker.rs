//! Publish completion tracking
//!
//! Pairs locally numbered publishes with the packet ids rumqttc assigns and
//! fires each completion callback exactly once. The caller registering a
//! callback and the event loop completing the publish may arrive in either
//! order; both sides take the same lock and whichever comes second fires.

use super::super::OnPublish;
use rumqttc::QoS;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use tracing::{debug, warn};

#[derive(Default)]
struct TrackerState {
    next_seq: u64,
    /// Publishes handed to rumqttc but not yet written to the network
    in_flight: VecDeque<(u64, QoS)>,
    /// Written publishes waiting for PubAck/PubComp, by pkid
    awaiting_ack: HashMap<u16, (u64, QoS)>,
    /// Registrations by sequence number; `None` when the caller has no callback
    callbacks: HashMap<u64, Option<OnPublish>>,
    /// Sequence numbers completed before their callback was registered
    completed: HashSet<u64>,
}

/// Shared between the publishing caller and the event loop task
#[derive(Default)]
pub struct PublishTracker {
    state: Mutex<TrackerState>,
}

impl std::fmt::Debug for PublishTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishTracker").finish_non_exhaustive()
    }
}

impl PublishTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        // callbacks never run under the lock
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a publish about to be handed to rumqttc and return its sequence
    pub fn begin(&self, qos: QoS) -> u64 {
        let mut state = self.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.in_flight.push_back((seq, qos));
        seq
    }

    /// Forget a publish that rumqttc refused
    pub fn abort(&self, seq: u64) {
        let mut state = self.lock();
        state.in_flight.retain(|(queued, _)| *queued != seq);
        state.callbacks.remove(&seq);
        state.completed.remove(&seq);
    }

    /// Attach the caller's callback to `seq`
    ///
    /// Fires it immediately when the publish already completed. Every begun
    /// publish must be registered, with `None` when there is no callback.
    pub fn register(&self, seq: u64, callback: Option<OnPublish>) {
        let fire = {
            let mut state = self.lock();
            if state.completed.remove(&seq) {
                callback
            } else {
                state.callbacks.insert(seq, callback);
                None
            }
        };
        if let Some(callback) = fire {
            debug!(seq, "Publish completed before callback registration");
            callback();
        }
    }

    /// rumqttc wrote a publish to the network
    pub fn on_outgoing(&self, pkid: u16) {
        let completed = {
            let mut state = self.lock();
            if pkid != 0 && state.awaiting_ack.contains_key(&pkid) {
                // retransmission of a publish already paired
                return;
            }
            let Some((seq, qos)) = state.in_flight.pop_front() else {
                warn!(pkid, "Outgoing publish with no tracked request");
                return;
            };
            match qos {
                QoS::AtMostOnce => Some(seq),
                QoS::AtLeastOnce | QoS::ExactlyOnce => {
                    state.awaiting_ack.insert(pkid, (seq, qos));
                    None
                }
            }
        };
        if let Some(seq) = completed {
            self.complete(seq);
        }
    }

    /// PubAck received; completes QoS 1 publishes
    pub fn on_acknowledged(&self, pkid: u16) {
        self.finish(pkid, QoS::AtLeastOnce);
    }

    /// PubComp received; completes QoS 2 publishes
    pub fn on_completed(&self, pkid: u16) {
        self.finish(pkid, QoS::ExactlyOnce);
    }

    fn finish(&self, pkid: u16, expected: QoS) {
        let seq = {
            let mut state = self.lock();
            match state.awaiting_ack.get(&pkid) {
                Some((seq, qos)) if *qos == expected => {
                    let seq = *seq;
                    state.awaiting_ack.remove(&pkid);
                    seq
                }
                _ => return,
            }
        };
        self.complete(seq);
    }

    fn complete(&self, seq: u64) {
        let fire = {
            let mut state = self.lock();
            match state.callbacks.remove(&seq) {
                Some(callback) => callback,
                None => {
                    state.completed.insert(seq);
                    None
                }
            }
        };
        if let Some(callback) = fire {
            callback();
        }
    }

    /// Publishes waiting to be written or acknowledged
    pub fn pending(&self) -> usize {
        let state = self.lock();
        state.in_flight.len() + state.awaiting_ack.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicUsize>, Option<OnPublish>) {
        let count = Arc::new(AtomicUsize::new(0));
        let clone = count.clone();
        let callback: OnPublish = Box::new(move || {
            clone.fetch_add(1, Ordering::SeqCst);
        });
        (count, Some(callback))
    }

    #[test]
    fn test_callback_registered_before_ack() {
        let tracker = PublishTracker::new();
        let (count, callback) = counter();

        let seq = tracker.begin(QoS::AtLeastOnce);
        tracker.register(seq, callback);
        tracker.on_outgoing(1);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tracker.on_acknowledged(1);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tracker.on_acknowledged(1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn test_ack_before_callback_registered() {
        let tracker = PublishTracker::new();
        let (count, callback) = counter();

        let seq = tracker.begin(QoS::AtLeastOnce);
        tracker.on_outgoing(3);
        tracker.on_acknowledged(3);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tracker.register(seq, callback);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_qos0_completes_on_send() {
        let tracker = PublishTracker::new();
        let (count, callback) = counter();

        let seq = tracker.begin(QoS::AtMostOnce);
        tracker.register(seq, callback);
        tracker.on_outgoing(0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_qos2_waits_for_pubcomp() {
        let tracker = PublishTracker::new();
        let (count, callback) = counter();

        let seq = tracker.begin(QoS::ExactlyOnce);
        tracker.register(seq, callback);
        tracker.on_outgoing(5);
        tracker.on_acknowledged(5);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tracker.on_completed(5);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_publishes_pair_in_order() {
        let tracker = PublishTracker::new();
        let (first_count, first) = counter();
        let (second_count, second) = counter();

        let a = tracker.begin(QoS::AtLeastOnce);
        let b = tracker.begin(QoS::AtLeastOnce);
        tracker.register(a, first);
        tracker.register(b, second);
        tracker.on_outgoing(10);
        tracker.on_outgoing(11);
        // a retransmitted publish is not paired again
        tracker.on_outgoing(10);

        tracker.on_acknowledged(11);
        assert_eq!(first_count.load(Ordering::SeqCst), 0);
        assert_eq!(second_count.load(Ordering::SeqCst), 1);

        tracker.on_acknowledged(10);
        assert_eq!(first_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_publish_without_callback_leaves_no_state() {
        let tracker = PublishTracker::new();

        let early = tracker.begin(QoS::AtMostOnce);
        tracker.register(early, None);
        tracker.on_outgoing(0);

        let late = tracker.begin(QoS::AtMostOnce);
        tracker.on_outgoing(0);
        tracker.register(late, None);

        let state = tracker.lock();
        assert!(state.callbacks.is_empty());
        assert!(state.completed.is_empty());
    }

    #[test]
    fn test_abort_removes_request() {
        let tracker = PublishTracker::new();
        let seq = tracker.begin(QoS::AtLeastOnce);
        tracker.abort(seq);
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn test_race_fires_exactly_once() {
        for _ in 0..200 {
            let tracker = Arc::new(PublishTracker::new());
            let (count, callback) = counter();
            let seq = tracker.begin(QoS::AtLeastOnce);

            let network = {
                let tracker = tracker.clone();
                std::thread::spawn(move || {
                    tracker.on_outgoing(1);
                    tracker.on_acknowledged(1);
                })
            };
            tracker.register(seq, callback);
            network.join().unwrap();

            assert_eq!(count.load(Ordering::SeqCst), 1);
        }
    }
}
