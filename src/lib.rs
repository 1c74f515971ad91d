//! Ratewarden - Per-key request admission governor
//!
//! This crate decides in real time whether a request tagged with an arbitrary
//! key may proceed. Two policies are provided: a sliding-window counting
//! limiter and a fixed-interval throttling limiter. Both are safe to share
//! across threads and keep their per-key state in a lock-striped store.

pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod simulation;

pub use clock::{Clock, ManualClock, MonotonicClock, Timestamp};
pub use error::{RateWardenError, Result};
pub use ratelimit::{Limiter, Policy, SlidingWindowLimiter, ThrottlingLimiter};
