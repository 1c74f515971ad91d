//! Time sources for the limiters.
//!
//! Limiters never read the wall clock directly. They ask an injected
//! [`Clock`] for the current [`Timestamp`], which lets tests and the virtual
//! time simulation drive time explicitly.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A point in time, measured as an offset from a clock's origin.
///
/// Timestamps from different clocks are not comparable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(Duration);

impl Timestamp {
    /// The clock's origin.
    pub const ZERO: Timestamp = Timestamp(Duration::ZERO);

    /// Create a timestamp from an offset since the clock origin.
    pub const fn from_offset(offset: Duration) -> Self {
        Timestamp(offset)
    }

    /// Create a timestamp from whole seconds since the clock origin.
    pub const fn from_secs(secs: u64) -> Self {
        Timestamp(Duration::from_secs(secs))
    }

    /// Create a timestamp from milliseconds since the clock origin.
    pub const fn from_millis(millis: u64) -> Self {
        Timestamp(Duration::from_millis(millis))
    }

    /// Create a timestamp from fractional seconds since the clock origin.
    ///
    /// Panics if `secs` is negative, NaN or overflows, like
    /// [`Duration::from_secs_f64`].
    pub fn from_secs_f64(secs: f64) -> Self {
        Timestamp(Duration::from_secs_f64(secs))
    }

    /// The offset since the clock origin.
    pub fn offset(&self) -> Duration {
        self.0
    }

    /// Time elapsed from `earlier` to `self`, or zero if `earlier` is later.
    pub fn saturating_duration_since(&self, earlier: Timestamp) -> Duration {
        self.0.saturating_sub(earlier.0)
    }

    /// `self - duration`, or `None` if that would precede the clock origin.
    pub fn checked_sub(&self, duration: Duration) -> Option<Timestamp> {
        self.0.checked_sub(duration).map(Timestamp)
    }

    /// `self + duration`, saturating at the maximum representable timestamp.
    pub fn saturating_add(&self, duration: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(duration))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.0.as_secs_f64())
    }
}

/// A source of monotonically non-decreasing timestamps.
///
/// Limiters rely on this: a reading earlier than a previously recorded
/// timestamp for the same key leads to premature or delayed eviction.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> Timestamp;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

/// Clock backed by the operating system's monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock whose origin is the moment of construction.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.origin.elapsed())
    }
}

/// A manually driven clock.
///
/// Clones share the same underlying time, so a test can hand one clone to a
/// limiter and keep another to move time forward.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock reading [`Timestamp::ZERO`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock reading `start`.
    pub fn starting_at(start: Timestamp) -> Self {
        let clock = Self::new();
        clock.set(start);
        clock
    }

    /// Move time forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(duration_to_nanos(by), Ordering::SeqCst);
    }

    /// Jump to `to`.
    ///
    /// Callers are responsible for keeping time monotonic.
    pub fn set(&self, to: Timestamp) {
        self.nanos.store(duration_to_nanos(to.offset()), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(Duration::from_nanos(self.nanos.load(Ordering::SeqCst)))
    }
}

fn duration_to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Test clock that moves forward by a fixed step every time it is read.
#[cfg(test)]
#[derive(Debug, Clone)]
pub(crate) struct SteppingClock {
    nanos: Arc<AtomicU64>,
    step: u64,
}

#[cfg(test)]
impl SteppingClock {
    pub(crate) fn new(step: Duration) -> Self {
        Self {
            nanos: Arc::new(AtomicU64::new(0)),
            step: duration_to_nanos(step),
        }
    }

    /// Number of readings handed out so far.
    pub(crate) fn reads(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst) / self.step.max(1)
    }
}

#[cfg(test)]
impl Clock for SteppingClock {
    fn now(&self) -> Timestamp {
        Timestamp(Duration::from_nanos(
            self.nanos.fetch_add(self.step, Ordering::SeqCst),
        ))
    }
}
