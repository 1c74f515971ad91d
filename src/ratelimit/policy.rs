//! Runtime selection between the admission policies.

use std::borrow::Borrow;
use std::fmt::{self, Debug};
use std::hash::Hash;
use std::time::Duration;

use super::backend::{Limiter, LimiterKey};
use super::sliding_window::SlidingWindowLimiter;
use super::throttle::ThrottlingLimiter;
use crate::clock::{Clock, MonotonicClock, Timestamp};

/// One of the available admission policies.
///
/// Lets a host choose the policy from configuration while still calling a
/// single [`Limiter`] implementation.
pub enum Policy<K = String, C = MonotonicClock>
where
    K: Eq + Hash,
{
    /// At most N requests per key in any trailing window.
    SlidingWindow(SlidingWindowLimiter<K, C>),
    /// At most one request per key per minimum interval.
    Throttling(ThrottlingLimiter<K, C>),
}

impl<K, C> Policy<K, C>
where
    K: Eq + Hash,
{
    /// Short name of the policy, for logs and reports.
    pub fn name(&self) -> &'static str {
        match self {
            Policy::SlidingWindow(_) => "sliding_window",
            Policy::Throttling(_) => "throttling",
        }
    }
}

impl<K, C> fmt::Display for Policy<K, C>
where
    K: Eq + Hash + Debug,
    C: Clock,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::SlidingWindow(limiter) => write!(
                f,
                "sliding window ({} requests per {:?})",
                limiter.max_requests(),
                limiter.window()
            ),
            Policy::Throttling(limiter) => {
                write!(f, "throttling (one request per {:?})", limiter.min_interval())
            }
        }
    }
}

impl<K, C> From<SlidingWindowLimiter<K, C>> for Policy<K, C>
where
    K: Eq + Hash,
{
    fn from(limiter: SlidingWindowLimiter<K, C>) -> Self {
        Policy::SlidingWindow(limiter)
    }
}

impl<K, C> From<ThrottlingLimiter<K, C>> for Policy<K, C>
where
    K: Eq + Hash,
{
    fn from(limiter: ThrottlingLimiter<K, C>) -> Self {
        Policy::Throttling(limiter)
    }
}

impl<K, C> Limiter<K> for Policy<K, C>
where
    K: Eq + Hash + Debug,
    C: Clock,
{
    fn now(&self) -> Timestamp {
        match self {
            Policy::SlidingWindow(limiter) => limiter.now(),
            Policy::Throttling(limiter) => limiter.now(),
        }
    }

    fn can_send_at<Q>(&self, key: &Q, now: Timestamp) -> bool
    where
        K: Borrow<Q>,
        Q: LimiterKey<K> + ?Sized,
    {
        match self {
            Policy::SlidingWindow(limiter) => limiter.can_send_at(key, now),
            Policy::Throttling(limiter) => limiter.can_send_at(key, now),
        }
    }

    fn record_at<Q>(&self, key: &Q, now: Timestamp) -> bool
    where
        K: Borrow<Q>,
        Q: LimiterKey<K> + ?Sized,
    {
        match self {
            Policy::SlidingWindow(limiter) => limiter.record_at(key, now),
            Policy::Throttling(limiter) => limiter.record_at(key, now),
        }
    }

    fn record<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: LimiterKey<K> + ?Sized,
    {
        match self {
            Policy::SlidingWindow(limiter) => limiter.record(key),
            Policy::Throttling(limiter) => limiter.record(key),
        }
    }

    fn time_until_next_allowed_at<Q>(&self, key: &Q, now: Timestamp) -> Duration
    where
        K: Borrow<Q>,
        Q: LimiterKey<K> + ?Sized,
    {
        match self {
            Policy::SlidingWindow(limiter) => limiter.time_until_next_allowed_at(key, now),
            Policy::Throttling(limiter) => limiter.time_until_next_allowed_at(key, now),
        }
    }

    fn purge_stale(&self, now: Timestamp) -> usize {
        match self {
            Policy::SlidingWindow(limiter) => limiter.purge_stale(now),
            Policy::Throttling(limiter) => limiter.purge_stale(now),
        }
    }

    fn tracked_keys(&self) -> usize {
        match self {
            Policy::SlidingWindow(limiter) => limiter.tracked_keys(),
            Policy::Throttling(limiter) => limiter.tracked_keys(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SteppingClock};

    #[test]
    fn test_policy_delegates_to_sliding_window() {
        let clock = ManualClock::new();
        let policy: Policy<String, ManualClock> =
            SlidingWindowLimiter::with_clock(Duration::from_secs(10), 2, clock.clone()).into();

        assert_eq!(policy.name(), "sliding_window");
        assert!(policy.record("key"));
        assert!(policy.record("key"));
        assert!(!policy.record("key"));
        assert_eq!(policy.time_until_next_allowed("key"), Duration::from_secs(10));
        assert_eq!(policy.tracked_keys(), 1);
    }

    #[test]
    fn test_policy_delegates_to_throttling() {
        let clock = ManualClock::new();
        let policy: Policy<String, ManualClock> =
            ThrottlingLimiter::with_clock(Duration::from_secs(2), clock.clone()).into();

        assert_eq!(policy.name(), "throttling");
        assert!(policy.record("key"));
        assert!(!policy.can_send("key"));

        clock.advance(Duration::from_secs(2));
        assert!(policy.can_send("key"));
        assert_eq!(policy.purge_stale(clock.now()), 1);
    }

    #[test]
    fn test_policy_display() {
        let policy: Policy<String, ManualClock> =
            ThrottlingLimiter::with_clock(Duration::from_secs(10), ManualClock::new()).into();

        assert_eq!(policy.to_string(), "throttling (one request per 10s)");
    }

    #[test]
    fn test_policy_record_reads_clock_once() {
        let clock = SteppingClock::new(Duration::from_secs(1));
        let policy: Policy<String, SteppingClock> =
            SlidingWindowLimiter::with_clock(Duration::from_secs(10), 3, clock.clone()).into();

        assert!(policy.record("key"));
        assert!(policy.record("key"));
        assert_eq!(clock.reads(), 2);
        assert_eq!(
            policy.time_until_next_allowed_at("key", Timestamp::from_secs(2)),
            Duration::from_secs(8)
        );
    }
}
