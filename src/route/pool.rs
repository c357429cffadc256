use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::clock::Clock;

use super::endpoint::Endpoint;

/// An ordered, thread-safe set of endpoints sharing one route URI.
///
/// Membership is keyed by canonical address. The pool hands out
/// round-robin [`EndpointIterator`]s over a snapshot of the current
/// membership, tracks per-endpoint freshness for pruning, and remembers
/// recent failures so new iterations bias away from bad backends.
pub struct Pool {
    context_path: String,
    retry_after_failure: Duration,
    clock: Arc<dyn Clock>,
    inner: Mutex<PoolInner>,
}

struct PoolInner {
    entries: Vec<PoolEntry>,
    // Round-robin position shared across iterators for fairness.
    cursor: usize,
}

struct PoolEntry {
    endpoint: Arc<Endpoint>,
    updated_at: Instant,
    failed_at: Option<Instant>,
}

impl Pool {
    /// `retry_after_failure` is how long a failed endpoint is skipped by
    /// new iterations before it becomes eligible again.
    pub fn new(
        retry_after_failure: Duration,
        context_path: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            context_path: context_path.into(),
            retry_after_failure,
            clock,
            inner: Mutex::new(PoolInner {
                entries: Vec::new(),
                cursor: 0,
            }),
        }
    }

    pub fn context_path(&self) -> &str {
        &self.context_path
    }

    /// Inserts or updates an endpoint. Returns true when the canonical
    /// address is new to the pool.
    ///
    /// An existing entry is replaced only when the incoming modification
    /// tag supersedes the stored one, but its freshness timestamp is
    /// always renewed: re-registration heartbeats keep routes alive even
    /// when they carry nothing new.
    pub fn put(&self, endpoint: Endpoint) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        match inner
            .entries
            .iter_mut()
            .find(|e| e.endpoint.canonical_addr() == endpoint.canonical_addr())
        {
            Some(entry) => {
                if entry
                    .endpoint
                    .modification_tag()
                    .succeeded_by(endpoint.modification_tag())
                {
                    entry.endpoint = Arc::new(endpoint);
                    entry.failed_at = None;
                }
                entry.updated_at = now;
                false
            }
            None => {
                inner.entries.push(PoolEntry {
                    endpoint: Arc::new(endpoint),
                    updated_at: now,
                    failed_at: None,
                });
                true
            }
        }
    }

    /// Deletes by canonical address. Returns true on hit.
    pub fn remove(&self, endpoint: &Endpoint) -> bool {
        let mut inner = self.inner.lock();
        match inner
            .entries
            .iter()
            .position(|e| e.endpoint.canonical_addr() == endpoint.canonical_addr())
        {
            Some(idx) => {
                inner.entries.remove(idx);
                if inner.cursor > idx {
                    inner.cursor -= 1;
                }
                true
            }
            None => false,
        }
    }

    /// Returns a round-robin iterator over a snapshot of the current
    /// membership. Concurrent `put`/`remove` calls do not affect an
    /// iteration already in flight.
    pub fn endpoints(&self) -> EndpointIterator<'_> {
        let now = self.clock.now();
        let inner = self.inner.lock();
        let snapshot: Vec<IterEntry> = inner
            .entries
            .iter()
            .map(|e| IterEntry {
                endpoint: Arc::clone(&e.endpoint),
                failed: e
                    .failed_at
                    .is_some_and(|t| now.duration_since(t) <= self.retry_after_failure),
            })
            .collect();
        let pos = if snapshot.is_empty() {
            0
        } else {
            inner.cursor % snapshot.len()
        };
        drop(inner);
        EndpointIterator {
            pool: self,
            snapshot,
            pos,
            last_idx: None,
        }
    }

    /// Applies `f` to every endpoint under the pool lock. `f` must not
    /// re-enter the pool.
    pub fn each(&self, mut f: impl FnMut(&Arc<Endpoint>)) {
        let inner = self.inner.lock();
        for entry in &inner.entries {
            f(&entry.endpoint);
        }
    }

    /// Removes and returns every endpoint whose last update is at least
    /// its staleness threshold ago. A per-endpoint override takes
    /// precedence over `default_threshold` when non-zero.
    pub fn prune_endpoints(&self, default_threshold: Duration) -> Vec<Arc<Endpoint>> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let mut pruned = Vec::new();
        let mut idx = 0;
        while idx < inner.entries.len() {
            let override_threshold = inner.entries[idx].endpoint.stale_threshold();
            let threshold = if override_threshold.is_zero() {
                default_threshold
            } else {
                override_threshold
            };
            if now.duration_since(inner.entries[idx].updated_at) >= threshold {
                let entry = inner.entries.remove(idx);
                if inner.cursor > idx {
                    inner.cursor -= 1;
                }
                pruned.push(entry.endpoint);
            } else {
                idx += 1;
            }
        }
        pruned
    }

    /// Bulk-refreshes every endpoint's freshness timestamp. Used after a
    /// control-plane reconnect so the next prune tick does not evict
    /// routes whose re-registration is still in flight.
    pub fn mark_updated(&self, t: Instant) {
        let mut inner = self.inner.lock();
        for entry in &mut inner.entries {
            entry.updated_at = t;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    fn mark_failed(&self, canonical_addr: &str) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        if let Some(entry) = inner
            .entries
            .iter_mut()
            .find(|e| e.endpoint.canonical_addr() == canonical_addr)
        {
            entry.failed_at = Some(now);
        }
    }

    fn store_cursor(&self, cursor: usize) {
        self.inner.lock().cursor = cursor;
    }
}

struct IterEntry {
    endpoint: Arc<Endpoint>,
    failed: bool,
}

/// Stateful round-robin cursor over a pool snapshot.
///
/// Endpoints reported through [`EndpointIterator::endpoint_failed`] are
/// skipped for the remainder of the iteration; when a full revolution
/// finds nothing but failures, the marks are cleared and iteration
/// continues, so a pool only yields `None` when its membership is empty.
pub struct EndpointIterator<'a> {
    pool: &'a Pool,
    snapshot: Vec<IterEntry>,
    pos: usize,
    last_idx: Option<usize>,
}

impl EndpointIterator<'_> {
    pub fn next(&mut self) -> Option<Arc<Endpoint>> {
        let len = self.snapshot.len();
        if len == 0 {
            self.last_idx = None;
            return None;
        }

        for _ in 0..len {
            let idx = self.pos % len;
            self.pos = idx + 1;
            if !self.snapshot[idx].failed {
                return Some(self.select(idx));
            }
        }

        // Everything is marked failed: reset the marks rather than turn
        // away a request that still has retries left.
        for entry in &mut self.snapshot {
            entry.failed = false;
        }
        let idx = self.pos % len;
        self.pos = idx + 1;
        Some(self.select(idx))
    }

    /// Marks the last endpoint returned by [`next`](Self::next) as failed,
    /// both for this iteration and, age-bound, for iterations started
    /// while the pool's retry window is open.
    pub fn endpoint_failed(&mut self, reason: &str) {
        if let Some(idx) = self.last_idx {
            let entry = &mut self.snapshot[idx];
            entry.failed = true;
            debug!(
                endpoint = entry.endpoint.canonical_addr(),
                reason, "endpoint-marked-failed"
            );
            self.pool.mark_failed(entry.endpoint.canonical_addr());
        }
    }

    fn select(&mut self, idx: usize) -> Arc<Endpoint> {
        self.last_idx = Some(idx);
        self.pool.store_cursor(self.pos);
        Arc::clone(&self.snapshot[idx].endpoint)
    }
}
