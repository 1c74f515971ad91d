//! Sliding-window counting limiter.

use std::borrow::Borrow;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use tracing::{debug, trace};

use super::backend::{Limiter, LimiterKey};
use super::store::{KeyState, KeyedStateStore};
use crate::clock::{Clock, MonotonicClock, Timestamp};

/// Accept timestamps for one key, oldest first.
///
/// Only timestamps inside the trailing window are retained once cleanup has
/// run. Timestamps are appended in non-decreasing order, so stale entries are
/// always at the front.
#[derive(Debug, Default)]
pub(crate) struct WindowState {
    accepted: VecDeque<Timestamp>,
}

impl WindowState {
    /// Drop timestamps at or before `now - window`. Returns how many were dropped.
    fn evict_stale(&mut self, now: Timestamp, window: Duration) -> usize {
        let Some(cutoff) = now.checked_sub(window) else {
            return 0;
        };

        let mut evicted = 0;
        while self.accepted.front().is_some_and(|oldest| *oldest <= cutoff) {
            self.accepted.pop_front();
            evicted += 1;
        }
        evicted
    }

    fn oldest(&self) -> Option<Timestamp> {
        self.accepted.front().copied()
    }

    fn len(&self) -> usize {
        self.accepted.len()
    }
}

impl KeyState for WindowState {
    fn is_vacant(&self) -> bool {
        self.accepted.is_empty()
    }
}

/// Admits at most `max_requests` per key in any trailing window of length
/// `window`.
///
/// A key's entry is created on its first accepted request and released as
/// soon as a query finds all of its timestamps aged out.
pub struct SlidingWindowLimiter<K = String, C = MonotonicClock>
where
    K: Eq + Hash,
{
    window: Duration,
    max_requests: usize,
    clock: C,
    windows: KeyedStateStore<K, WindowState>,
}

impl<K> SlidingWindowLimiter<K, MonotonicClock>
where
    K: Eq + Hash + Debug,
{
    /// Create a limiter reading the system monotonic clock.
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self::with_clock(window, max_requests, MonotonicClock::new())
    }
}

impl<K, C> SlidingWindowLimiter<K, C>
where
    K: Eq + Hash + Debug,
    C: Clock,
{
    /// Create a limiter reading `clock`.
    pub fn with_clock(window: Duration, max_requests: usize, clock: C) -> Self {
        debug!(
            window_ms = window.as_millis() as u64,
            max_requests = max_requests,
            "Creating sliding window limiter"
        );
        Self {
            window,
            max_requests,
            clock,
            windows: KeyedStateStore::new(),
        }
    }

    /// Length of the trailing window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Maximum number of accepted requests per key within the window.
    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Clear all per-key state.
    pub fn clear(&self) {
        self.windows.clear();
    }

    fn cleanup(&self, key: &impl Debug, state: &mut WindowState, now: Timestamp) {
        let evicted = state.evict_stale(now, self.window);
        if evicted > 0 {
            trace!(key = ?key, evicted = evicted, "Evicted stale timestamps");
            if state.is_vacant() {
                debug!(key = ?key, "Releasing idle sliding window state");
            }
        }
    }

    fn admit<Q>(&self, key: &Q, now: impl FnOnce() -> Timestamp) -> bool
    where
        K: Borrow<Q>,
        Q: LimiterKey<K> + ?Sized,
    {
        let (accepted, now) = self.windows.update(key, |state| {
            let now = now();
            self.cleanup(&key, state, now);
            if state.len() < self.max_requests {
                state.accepted.push_back(now);
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
                limit = self.max_requests,
                "Sliding window limit reached"
            );
        }
        accepted
    }
}

impl<K, C> Limiter<K> for SlidingWindowLimiter<K, C>
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
        self.windows.update(key, |state| {
            self.cleanup(&key, state, now);
            state.len() < self.max_requests
        })
    }

    fn record_at<Q>(&self, key: &Q, now: Timestamp) -> bool
    where
        K: Borrow<Q>,
        Q: LimiterKey<K> + ?Sized,
    {
        self.admit(key, || now)
    }

    /// Reads the clock under the key's lock, so accept timestamps for a key
    /// are appended in the order the clock handed them out.
    fn record<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: LimiterKey<K> + ?Sized,
    {
        self.admit(key, || self.clock.now())
    }

    /// Time until the oldest retained timestamp leaves the window.
    ///
    /// With `max_requests > 1` this is advisory: it reports when the oldest
    /// entry expires even if other slots are already free.
    fn time_until_next_allowed_at<Q>(&self, key: &Q, now: Timestamp) -> Duration
    where
        K: Borrow<Q>,
        Q: LimiterKey<K> + ?Sized,
    {
        self.windows.read(key, |state| {
            state
                .and_then(WindowState::oldest)
                .map(|oldest| self.window.saturating_sub(now.saturating_duration_since(oldest)))
                .unwrap_or(Duration::ZERO)
        })
    }

    fn purge_stale(&self, now: Timestamp) -> usize {
        let purged = self.windows.retain(|_, state| {
            state.evict_stale(now, self.window);
            true
        });
        if purged > 0 {
            debug!(purged = purged, "Purged idle sliding window keys");
        }
        purged
    }

    fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}
