//! Expiring, bounded in-memory caches for summaries and details.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::types::{MessageDetail, MessageSummary, Uid};

/// Time source for expiry checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Clone, Debug)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    seq: u64,
}

/// Concurrent map with lazy TTL expiry and a capacity bound.
///
/// On overflow the least-recently-inserted entry is evicted. Reads do not
/// refresh an entry's position. Concurrent inserts of the same key are
/// last-writer-wins.
pub struct TtlCache<V> {
    entries: DashMap<Uid, CacheEntry<V>>,
    // Insertion order as (key, seq). Records whose seq no longer matches the
    // live entry are skipped when popped and dropped on compaction.
    order: Mutex<VecDeque<(Uid, u64)>>,
    ttl: Duration,
    capacity: usize,
    next_seq: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration, capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            ttl,
            capacity: capacity.max(1),
            next_seq: AtomicU64::new(0),
            clock,
        }
    }

    pub fn get(&self, key: Uid) -> Option<V> {
        let now = self.clock.now();
        if let Some(entry) = self.entries.get(&key) {
            if self.is_fresh(&entry, now) {
                return Some(entry.value.clone());
            }
        } else {
            return None;
        }

        // Only drop the entry if it is still the stale one; a concurrent
        // writer may have replaced it since the read above.
        self.entries
            .remove_if(&key, |_, entry| !self.is_fresh(entry, now));
        None
    }

    pub fn insert(&self, key: Uid, value: V) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let entry = CacheEntry {
            value,
            inserted_at: self.clock.now(),
            seq,
        };
        self.entries.insert(key, entry);

        // No shard guard is held while the queue is locked.
        let mut order = self.order.lock().unwrap_or_else(PoisonError::into_inner);
        order.push_back((key, seq));
        while self.entries.len() > self.capacity {
            let Some((oldest, oldest_seq)) = order.pop_front() else {
                break;
            };
            self.entries.remove_if(&oldest, |_, entry| entry.seq == oldest_seq);
        }
        if order.len() > self.capacity.saturating_mul(2) {
            order.retain(|(key, seq)| self.entries.get(key).is_some_and(|e| e.seq == *seq));
        }
    }

    pub fn contains(&self, key: Uid) -> bool {
        self.get(key).is_some()
    }

    /// Entries currently held, including stale ones not yet reclaimed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.entries.clear();
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| self.is_fresh(entry, now));
        before.saturating_sub(self.entries.len())
    }

    fn is_fresh(&self, entry: &CacheEntry<V>, now: Instant) -> bool {
        now.saturating_duration_since(entry.inserted_at) < self.ttl
    }
}

/// How a session's UIDVALIDITY compares with the one the caches hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UidValidityCheck {
    /// Same epoch (or the first one seen); the session may use the caches.
    Current,
    /// A freshly selected session reported a newer epoch; both caches were
    /// emptied.
    Changed,
    /// The session disagrees with the caches and must not touch them.
    Stale,
}

/// The two caches the engine shares across workers.
pub struct CacheLayer {
    summaries: TtlCache<MessageSummary>,
    details: TtlCache<MessageDetail>,
    // UIDVALIDITY + 1, zero until a session has reported one.
    uid_validity: AtomicU64,
}

impl CacheLayer {
    pub fn new(
        ttl: Duration,
        summary_capacity: usize,
        detail_capacity: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            summaries: TtlCache::new(ttl, summary_capacity, clock.clone()),
            details: TtlCache::new(ttl, detail_capacity, clock),
            uid_validity: AtomicU64::new(0),
        }
    }

    pub fn with_system_clock(ttl: Duration, summary_capacity: usize, detail_capacity: usize) -> Self {
        Self::new(ttl, summary_capacity, detail_capacity, Arc::new(SystemClock))
    }

    pub fn summaries(&self) -> &TtlCache<MessageSummary> {
        &self.summaries
    }

    pub fn details(&self) -> &TtlCache<MessageDetail> {
        &self.details
    }

    /// Checks a session's UIDVALIDITY against the caches' epoch.
    ///
    /// Only a session that has just selected the folder (`fresh`) can move
    /// the epoch forward, which empties both caches. A long-lived session
    /// reporting any other value, or a fresh one reporting an older value,
    /// is `Stale`.
    pub fn reconcile_uid_validity(&self, uid_validity: u32, fresh: bool) -> UidValidityCheck {
        let tagged = u64::from(uid_validity) + 1;
        let swapped = self
            .uid_validity
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current == 0 || (fresh && tagged > current)).then_some(tagged)
            });

        match swapped {
            Ok(0) => UidValidityCheck::Current,
            Ok(previous) => {
                warn!(
                    old_uidvalidity = previous - 1,
                    new_uidvalidity = uid_validity,
                    "UIDVALIDITY changed, clearing message caches"
                );
                self.clear();
                UidValidityCheck::Changed
            }
            Err(current) if current == tagged => UidValidityCheck::Current,
            Err(current) => {
                debug!(
                    cached_uidvalidity = current - 1,
                    session_uidvalidity = uid_validity,
                    fresh,
                    "Session UIDVALIDITY does not match the caches"
                );
                UidValidityCheck::Stale
            }
        }
    }

    pub fn clear(&self) {
        self.summaries.clear();
        self.details.clear();
    }

    pub fn purge_expired(&self) -> usize {
        let removed = self.summaries.purge_expired() + self.details.purge_expired();
        if removed > 0 {
            debug!(removed, "Purged expired cache entries");
        }
        removed
    }
}
