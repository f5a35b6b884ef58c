//! # roster-events
//!
//! The process-wide event log shared by every gateway connection.
//!
//! HTTP handlers publish `(subject, payload)` entries; each connection's
//! delivery loop scans for undelivered entries matching its authorized
//! subjects. Delivery marking is global: once any connection has received an
//! entry it is never offered to another. Entries are never removed — a
//! delivered entry stays in the log as an inert record and every scan skips
//! it via its atomic flag.

#![deny(unsafe_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use roster_core::ids::BotId;
use serde_json::Value;
use tracing::{debug, warn};

/// Log size at which growth warnings start (every further doubling warns).
const GROWTH_WARN_FLOOR: usize = 10_000;

/// One published event.
#[derive(Debug)]
pub struct EventEntry {
    /// Position in the log, assigned at publish time.
    pub seq: u64,
    /// The bot this event pertains to.
    pub subject: BotId,
    /// Opaque event payload.
    pub payload: Value,
    delivered: AtomicBool,
}

impl EventEntry {
    /// Whether this entry has been delivered (claimed) already.
    pub fn is_delivered(&self) -> bool {
        self.delivered.load(Ordering::Acquire)
    }
}

/// Append-only event log with claim-once delivery marking.
///
/// Appends take the write lock; scans take the read lock; claims are
/// lock-free compare-and-swap on the entry flag, so two delivery loops
/// racing for the same entry resolve to exactly one winner.
pub struct EventLog {
    entries: RwLock<Vec<Arc<EventEntry>>>,
    published: AtomicU64,
    delivered: AtomicU64,
}

impl EventLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        }
    }

    /// Append an event; returns its sequence number.
    pub fn publish(&self, subject: BotId, payload: Value) -> u64 {
        let mut entries = self.entries.write();
        let seq = entries.len() as u64;
        entries.push(Arc::new(EventEntry {
            seq,
            subject,
            payload,
            delivered: AtomicBool::new(false),
        }));
        let total = self.published.fetch_add(1, Ordering::Relaxed) + 1;
        if total as usize >= GROWTH_WARN_FLOOR && (total & (total - 1)) == 0 {
            warn!(total, "event log keeps delivered entries; size is unbounded");
        }
        debug!(seq, subject = %subject, "event published");
        seq
    }

    /// Undelivered entries whose subject is in `subjects`, in publish order.
    ///
    /// Snapshot semantics: entries claimed between this scan and the caller's
    /// sends are filtered again by [`EventLog::claim`].
    pub fn pending_for(&self, subjects: &[BotId]) -> Vec<Arc<EventEntry>> {
        let entries = self.entries.read();
        entries
            .iter()
            .filter(|e| !e.is_delivered() && subjects.contains(&e.subject))
            .cloned()
            .collect()
    }

    /// Claim an entry for delivery.
    ///
    /// Returns `true` exactly once per entry across all callers. The caller
    /// must [`EventLog::release`] the claim if its send does not complete, so
    /// the entry can be retried on a later tick or by another connection.
    pub fn claim(&self, seq: u64) -> bool {
        let entries = self.entries.read();
        let Some(entry) = entries.get(seq as usize) else {
            return false;
        };
        let won = entry
            .delivered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            let _ = self.delivered.fetch_add(1, Ordering::Relaxed);
        }
        won
    }

    /// Undo a claim after a failed send.
    pub fn release(&self, seq: u64) {
        let entries = self.entries.read();
        if let Some(entry) = entries.get(seq as usize) {
            if entry
                .delivered
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let _ = self.delivered.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }

    /// Total entries ever published.
    pub fn len(&self) -> usize {
        self.published.load(Ordering::Relaxed) as usize
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries published but not yet delivered.
    pub fn pending_count(&self) -> usize {
        let published = self.published.load(Ordering::Relaxed);
        let delivered = self.delivered.load(Ordering::Relaxed);
        published.saturating_sub(delivered) as usize
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn publish_assigns_sequential_seqs() {
        let log = EventLog::new();
        assert_eq!(log.publish(BotId(1), json!({})), 0);
        assert_eq!(log.publish(BotId(2), json!({})), 1);
        assert_eq!(log.publish(BotId(1), json!({})), 2);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn empty_log() {
        let log = EventLog::new();
        assert!(log.is_empty());
        assert_eq!(log.pending_count(), 0);
        assert!(log.pending_for(&[BotId(1)]).is_empty());
    }

    #[test]
    fn pending_filters_by_subject() {
        let log = EventLog::new();
        let _ = log.publish(BotId(1), json!({"a": 1}));
        let _ = log.publish(BotId(2), json!({"b": 2}));
        let _ = log.publish(BotId(1), json!({"c": 3}));

        let pending = log.pending_for(&[BotId(1)]);
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].payload["a"], 1);
        assert_eq!(pending[1].payload["c"], 3);
    }

    #[test]
    fn pending_preserves_publish_order() {
        let log = EventLog::new();
        for i in 0..10 {
            let _ = log.publish(BotId(5), json!({"i": i}));
        }
        let pending = log.pending_for(&[BotId(5)]);
        let seqs: Vec<u64> = pending.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, (0..10).collect::<Vec<u64>>());
    }

    #[test]
    fn pending_matches_any_authorized_subject() {
        let log = EventLog::new();
        let _ = log.publish(BotId(1), json!({}));
        let _ = log.publish(BotId(2), json!({}));
        let _ = log.publish(BotId(3), json!({}));

        let pending = log.pending_for(&[BotId(1), BotId(3)]);
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn claim_wins_exactly_once() {
        let log = EventLog::new();
        let seq = log.publish(BotId(1), json!({}));
        assert!(log.claim(seq));
        assert!(!log.claim(seq));
    }

    #[test]
    fn claimed_entry_skipped_by_scans() {
        let log = EventLog::new();
        let seq = log.publish(BotId(1), json!({}));
        assert!(log.claim(seq));
        assert!(log.pending_for(&[BotId(1)]).is_empty());
    }

    #[test]
    fn release_makes_entry_pending_again() {
        let log = EventLog::new();
        let seq = log.publish(BotId(1), json!({}));
        assert!(log.claim(seq));
        log.release(seq);
        assert_eq!(log.pending_for(&[BotId(1)]).len(), 1);
        // And claimable again.
        assert!(log.claim(seq));
    }

    #[test]
    fn release_of_unclaimed_entry_is_noop() {
        let log = EventLog::new();
        let seq = log.publish(BotId(1), json!({}));
        log.release(seq);
        assert_eq!(log.pending_count(), 1);
        assert!(log.claim(seq));
    }

    #[test]
    fn claim_unknown_seq_returns_false() {
        let log = EventLog::new();
        assert!(!log.claim(99));
    }

    #[test]
    fn release_unknown_seq_is_noop() {
        let log = EventLog::new();
        log.release(99);
        assert_eq!(log.pending_count(), 0);
    }

    #[test]
    fn pending_count_tracks_claims_and_releases() {
        let log = EventLog::new();
        let a = log.publish(BotId(1), json!({}));
        let _b = log.publish(BotId(2), json!({}));
        assert_eq!(log.pending_count(), 2);

        assert!(log.claim(a));
        assert_eq!(log.pending_count(), 1);

        log.release(a);
        assert_eq!(log.pending_count(), 2);
    }

    #[test]
    fn delivered_entries_remain_in_log() {
        let log = EventLog::new();
        let seq = log.publish(BotId(1), json!({"x": 1}));
        assert!(log.claim(seq));
        // Still counted in len — never removed.
        assert_eq!(log.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_have_one_winner_per_entry() {
        let log = Arc::new(EventLog::new());
        for _ in 0..100 {
            let _ = log.publish(BotId(1), json!({}));
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let log = Arc::clone(&log);
            handles.push(tokio::spawn(async move {
                let mut won = 0usize;
                for seq in 0..100u64 {
                    if log.claim(seq) {
                        won += 1;
                    }
                }
                won
            }));
        }

        let mut total = 0;
        for h in handles {
            total += h.await.unwrap();
        }
        // Every entry claimed by exactly one task.
        assert_eq!(total, 100);
        assert_eq!(log.pending_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn publish_while_scanning_does_not_lose_entries() {
        let log = Arc::new(EventLog::new());

        let writer = {
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                for i in 0..500 {
                    let _ = log.publish(BotId(1), json!({"i": i}));
                }
            })
        };
        let reader = {
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                for _ in 0..50 {
                    let _ = log.pending_for(&[BotId(1)]);
                    tokio::task::yield_now().await;
                }
            })
        };

        writer.await.unwrap();
        reader.await.unwrap();
        assert_eq!(log.pending_for(&[BotId(1)]).len(), 500);
    }
}
