//! Admission policies and per-key state management.

mod backend;
mod policy;
mod sliding_window;
mod store;
mod throttle;

pub use backend::{Limiter, LimiterKey};
pub use policy::Policy;
pub use sliding_window::SlidingWindowLimiter;
pub use throttle::ThrottlingLimiter;
