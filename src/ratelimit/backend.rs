//! Limiter trait shared by all admission policies.

use std::borrow::Borrow;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use crate::clock::Timestamp;

/// Borrowed form of a limiter key `K`.
///
/// Implemented for every type that can be hashed, compared, logged and turned
/// back into an owned `K`, e.g. `str` for `String` keys.
pub trait LimiterKey<K>: Hash + Eq + Debug + ToOwned<Owned = K> {}

impl<K, Q> LimiterKey<K> for Q where Q: Hash + Eq + Debug + ToOwned<Owned = K> + ?Sized {}

/// Trait for per-key admission policies.
///
/// Keys are looked up through their borrowed form, the same way the std maps
/// do, so a `Limiter<String>` accepts `&str`. The `*_at` methods take the
/// current time explicitly; the remaining methods read the limiter's clock.
pub trait Limiter<K> {
    /// The limiter's current time.
    fn now(&self) -> Timestamp;

    /// Whether a request for `key` would be admitted at `now`.
    ///
    /// Does not record anything. Repeated calls without an intervening
    /// [`record_at`](Self::record_at) return the same answer.
    fn can_send_at<Q>(&self, key: &Q, now: Timestamp) -> bool
    where
        K: Borrow<Q>,
        Q: LimiterKey<K> + ?Sized;

    /// Admit and record a request for `key` at `now` if allowed.
    ///
    /// The check and the write happen atomically per key. Returns `false`
    /// without changing any state when the request is denied.
    fn record_at<Q>(&self, key: &Q, now: Timestamp) -> bool
    where
        K: Borrow<Q>,
        Q: LimiterKey<K> + ?Sized;

    /// How long after `now` the policy expects `key` to be admitted again.
    fn time_until_next_allowed_at<Q>(&self, key: &Q, now: Timestamp) -> Duration
    where
        K: Borrow<Q>,
        Q: LimiterKey<K> + ?Sized;

    /// Drop state for every key that is indistinguishable from an absent key
    /// at `now`. Returns the number of keys dropped.
    fn purge_stale(&self, now: Timestamp) -> usize;

    /// Number of keys with resident state.
    fn tracked_keys(&self) -> usize;

    /// [`can_send_at`](Self::can_send_at) using the limiter's clock.
    fn can_send<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: LimiterKey<K> + ?Sized,
    {
        self.can_send_at(key, self.now())
    }

    /// [`record_at`](Self::record_at) using the limiter's clock.
    ///
    /// Limiters that lock per key override this to read the clock while the
    /// lock is held, so a key's accept times follow the clock's order.
    fn record<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: LimiterKey<K> + ?Sized,
    {
        self.record_at(key, self.now())
    }

    /// [`time_until_next_allowed_at`](Self::time_until_next_allowed_at) using
    /// the limiter's clock.
    fn time_until_next_allowed<Q>(&self, key: &Q) -> Duration
    where
        K: Borrow<Q>,
        Q: LimiterKey<K> + ?Sized,
    {
        self.time_until_next_allowed_at(key, self.now())
    }
}
