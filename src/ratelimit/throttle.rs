//! Fixed-interval throttling limiter.

use std::borrow::Borrow;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use tracing::{debug, trace};

use super::backend::{Limiter, LimiterKey};
use super::store::{KeyState, KeyedStateStore};
use crate::clock::{Clock, MonotonicClock, Timestamp};

/// The most recent accept time for one key.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ThrottleState {
    last_accepted: Option<Timestamp>,
}

impl ThrottleState {
    fn elapsed(&self, now: Timestamp) -> Option<Duration> {
        self.last_accepted
            .map(|last| now.saturating_duration_since(last))
    }
}

impl KeyState for ThrottleState {
    fn is_vacant(&self) -> bool {
        self.last_accepted.is_none()
    }
}

/// Admits at most one request per key every `min_interval`.
///
/// Only the last accept time is kept per key, so memory grows with the
/// number of distinct keys rather than with traffic. Entries are not evicted
/// on their own; callers that need a bound call
/// [`purge_stale`](Limiter::purge_stale) or layer their own eviction on top.
pub struct ThrottlingLimiter<K = String, C = MonotonicClock>
where
    K: Eq + Hash,
{
    min_interval: Duration,
    clock: C,
    last_seen: KeyedStateStore<K, ThrottleState>,
}

impl<K> ThrottlingLimiter<K, MonotonicClock>
where
    K: Eq + Hash + Debug,
{
    /// Create a limiter reading the system monotonic clock.
    pub fn new(min_interval: Duration) -> Self {
        Self::with_clock(min_interval, MonotonicClock::new())
    }
}

impl<K, C> ThrottlingLimiter<K, C>
where
    K: Eq + Hash + Debug,
    C: Clock,
{
    /// Create a limiter reading `clock`.
    pub fn with_clock(min_interval: Duration, clock: C) -> Self {
        debug!(
            min_interval_ms = min_interval.as_millis() as u64,
            "Creating throttling limiter"
        );
        Self {
            min_interval,
            clock,
            last_seen: KeyedStateStore::new(),
        }
    }

    /// Minimum gap between two accepted requests for the same key.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Clear all per-key state.
    pub fn clear(&self) {
        self.last_seen.clear();
    }

    fn allows(&self, state: &ThrottleState, now: Timestamp) -> bool {
        state
            .elapsed(now)
            .map_or(true, |elapsed| elapsed >= self.min_interval)
    }

    fn admit<Q>(&self, key: &Q, now: impl FnOnce() -> Timestamp) -> bool
    where
        K: Borrow<Q>,
        Q: LimiterKey<K> + ?Sized,
    {
        let (accepted, now) = self.last_seen.update(key, |state| {
            let now = now();
            if self.allows(state, now) {
                state.last_accepted = Some(now);
                (true, now)
            } else {
                (false, now)
            }
        });

        if accepted {
            trace!(key = ?key, now = %now, "Request admitted");
        } else {
            debug!(
                key = ?key,
                now = %now,
                min_interval_ms = self.min_interval.as_millis() as u64,
                "Request throttled"
            );
        }
        accepted
    }
}

impl<K, C> Limiter<K> for ThrottlingLimiter<K, C>
where
    K: Eq + Hash + Debug,
    C: Clock,
{
    fn now(&self) -> Timestamp {
        self.clock.now()
    }

    fn can_send_at<Q>(&self, key: &Q, now: Timestamp) -> bool
    where
        K: Borrow<Q>,
        Q: LimiterKey<K> + ?Sized,
    {
        self.last_seen
            .read(key, |state| state.map_or(true, |state| self.allows(state, now)))
    }

    fn record_at<Q>(&self, key: &Q, now: Timestamp) -> bool
    where
        K: Borrow<Q>,
        Q: LimiterKey<K> + ?Sized,
    {
        self.admit(key, || now)
    }

    /// Reads the clock under the key's lock, so the stored accept time never
    /// moves backwards under concurrent callers.
    fn record<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: LimiterKey<K> + ?Sized,
    {
        self.admit(key, || self.clock.now())
    }

    fn time_until_next_allowed_at<Q>(&self, key: &Q, now: Timestamp) -> Duration
    where
        K: Borrow<Q>,
        Q: LimiterKey<K> + ?Sized,
    {
        self.last_seen.read(key, |state| {
            state
                .and_then(|state| state.elapsed(now))
                .map(|elapsed| self.min_interval.saturating_sub(elapsed))
                .unwrap_or(Duration::ZERO)
        })
    }

    fn purge_stale(&self, now: Timestamp) -> usize {
        let purged = self
            .last_seen
            .retain(|_, state| !self.allows(state, now));
        if purged > 0 {
            debug!(purged = purged, "Purged idle throttling keys");
        }
        purged
    }

    fn tracked_keys(&self) -> usize {
        self.last_seen.len()
    }
}
