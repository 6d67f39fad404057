//! Bounded LRU memo of audit verdicts keyed by fingerprint, with a per-key
//! single-flight gate so concurrent misses on the same key do not spawn
//! duplicate auditor invocations (C1).

use super::types::AuditResult;
use dashmap::DashMap;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::Notify;

struct CachedEntry {
    value: AuditResult,
    stored_at: Instant,
}

/// Coordination point for one in-flight fingerprint. The leader (the task
/// that first registers the gate) builds the result and calls
/// [`Gate::publish`]; every follower awaits [`Gate::wait`] on the same gate.
struct Gate {
    notify: Notify,
    result: std::sync::Mutex<Option<AuditResult>>,
}

impl Gate {
    fn new() -> Self {
        Self {
            notify: Notify::new(),
            result: std::sync::Mutex::new(None),
        }
    }

    fn publish(&self, value: AuditResult) {
        *self.result.lock().expect("gate mutex poisoned") = Some(value);
        self.notify.notify_waiters();
    }

    async fn wait(&self) -> AuditResult {
        loop {
            if let Some(value) = self.result.lock().expect("gate mutex poisoned").clone() {
                return value;
            }
            self.notify.notified().await;
        }
    }
}

/// What a caller should do after consulting the cache for a fingerprint.
pub enum CacheOutcome {
    /// A fresh, unexpired entry was found.
    Hit(AuditResult),
    /// No entry existed and no build was in flight; the caller is now the
    /// leader and must call [`AuditCache::publish`] exactly once for this
    /// key, whether the build succeeds or fails.
    MissLeader,
    /// No entry existed, but another caller is already building one; this
    /// is the result that build eventually produced.
    MissFollower(AuditResult),
}

/// Best-effort, in-memory-only result cache. A process crash losing the
/// cache is an accepted miss, never a correctness issue.
pub struct AuditCache {
    max_age: Duration,
    entries: AsyncMutex<LruCache<String, CachedEntry>>,
    in_flight: DashMap<String, Arc<Gate>>,
}

impl AuditCache {
    pub fn new(max_entries: usize, max_age: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_entries.max(1)).expect("capacity must be nonzero");
        Self {
            max_age,
            entries: AsyncMutex::new(LruCache::new(capacity)),
            in_flight: DashMap::new(),
        }
    }

    /// Look up `key`. Returns `Hit` on a fresh cached entry, registers the
    /// caller as the build leader on a cold miss, or waits for and returns
    /// the in-flight leader's result on a warm miss.
    pub async fn lookup_or_lead(&self, key: &str) -> CacheOutcome {
        {
            let mut entries = self.entries.lock().await;
            if let Some(entry) = entries.get(key) {
                if entry.stored_at.elapsed() <= self.max_age {
                    return CacheOutcome::Hit(entry.value.clone());
                }
                entries.pop(key);
            }
        }

        // `DashMap::entry` locks the shard for the duration of the closure,
        // so exactly one caller observes `or_insert_with` actually run the
        // closure -- that caller, and only that caller, is the leader.
        let mut became_leader = false;
        let gate = self
            .in_flight
            .entry(key.to_string())
            .or_insert_with(|| {
                became_leader = true;
                Arc::new(Gate::new())
            })
            .clone();

        if became_leader {
            CacheOutcome::MissLeader
        } else {
            CacheOutcome::MissFollower(gate.wait().await)
        }
    }

    /// Called exactly once by the leader for `key`, with the result of a
    /// completed (successful or synthetic-fallback) audit. Wakes any
    /// followers and stores the result for future lookups.
    pub async fn publish(&self, key: &str, value: AuditResult) {
        if let Some((_, gate)) = self.in_flight.remove(key) {
            gate.publish(value.clone());
        }
        let mut entries = self.entries.lock().await;
        entries.put(
            key.to_string(),
            CachedEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    /// Called by the leader when the build failed in a way that must not be
    /// cached (e.g. a hard engine error rather than a synthetic fallback).
    /// Followers waiting on `wait()` would otherwise hang forever, so this
    /// publishes the given placeholder to unblock them without caching it.
    pub async fn abandon(&self, key: &str, placeholder: AuditResult) {
        if let Some((_, gate)) = self.in_flight.remove(key) {
            gate.publish(placeholder);
        }
    }
}
