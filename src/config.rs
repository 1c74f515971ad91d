//! Configuration management for Ratewarden.

use std::fmt::Debug;
use std::hash::Hash;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::clock::Clock;
use crate::error::{RateWardenError, Result};
use crate::ratelimit::{Policy, SlidingWindowLimiter, ThrottlingLimiter};

/// Main configuration for Ratewarden.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Admission policy configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Simulation harness configuration
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Admission policy configuration, tagged by `policy`.
///
/// Durations are fractional seconds. Values are kept signed so that negative
/// input is reported as a configuration error instead of a parse failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum LimiterConfig {
    /// Sliding-window counting limiter
    SlidingWindow {
        /// Length of the trailing window in seconds
        #[serde(default = "default_window_secs")]
        window_secs: f64,
        /// Maximum accepted requests per key within the window
        #[serde(default = "default_max_requests")]
        max_requests: i64,
    },
    /// Fixed-interval throttling limiter
    Throttling {
        /// Minimum gap between accepted requests per key, in seconds
        #[serde(default = "default_min_interval_secs")]
        min_interval_secs: f64,
    },
}

impl Default for LimiterConfig {
    fn default() -> Self {
        LimiterConfig::SlidingWindow {
            window_secs: default_window_secs(),
            max_requests: default_max_requests(),
        }
    }
}

fn default_window_secs() -> f64 {
    10.0
}

fn default_max_requests() -> i64 {
    1
}

fn default_min_interval_secs() -> f64 {
    10.0
}

impl LimiterConfig {
    /// Check every parameter without building a limiter.
    pub fn validate(&self) -> Result<()> {
        match *self {
            LimiterConfig::SlidingWindow {
                window_secs,
                max_requests,
            } => {
                parse_duration("window_secs", window_secs)?;
                parse_max_requests(max_requests)?;
            }
            LimiterConfig::Throttling { min_interval_secs } => {
                parse_duration("min_interval_secs", min_interval_secs)?;
            }
        }
        Ok(())
    }

    /// Build the configured limiter reading `clock`.
    ///
    /// Invalid parameters are rejected here, before any request is seen.
    pub fn build<K, C>(&self, clock: C) -> Result<Policy<K, C>>
    where
        K: Eq + Hash + Debug,
        C: Clock,
    {
        let policy = match *self {
            LimiterConfig::SlidingWindow {
                window_secs,
                max_requests,
            } => {
                let window = parse_duration("window_secs", window_secs)?;
                let max_requests = parse_max_requests(max_requests)?;
                Policy::SlidingWindow(SlidingWindowLimiter::with_clock(window, max_requests, clock))
            }
            LimiterConfig::Throttling { min_interval_secs } => {
                let min_interval = parse_duration("min_interval_secs", min_interval_secs)?;
                Policy::Throttling(ThrottlingLimiter::with_clock(min_interval, clock))
            }
        };
        Ok(policy)
    }

    /// Pause between simulation batches when none is configured.
    ///
    /// Long enough for the policy to let every user through again at the
    /// start of the next batch with the default parameters.
    pub fn default_batch_pause_secs(&self) -> f64 {
        match self {
            LimiterConfig::SlidingWindow { .. } => 4.0,
            LimiterConfig::Throttling { .. } => 10.0,
        }
    }
}

fn parse_duration(field: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|e| {
        RateWardenError::Config(format!(
            "{} must be a non-negative number of seconds, got {}: {}",
            field, secs, e
        ))
    })
}

fn parse_max_requests(max_requests: i64) -> Result<usize> {
    usize::try_from(max_requests).map_err(|_| {
        RateWardenError::Config(format!("max_requests must be non-negative, got {}", max_requests))
    })
}

/// Configuration for the message stream simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of message batches
    #[serde(default = "default_batches")]
    pub batches: u32,

    /// Messages sent per batch
    #[serde(default = "default_messages_per_batch")]
    pub messages_per_batch: u32,

    /// Number of distinct users messages are spread across
    #[serde(default = "default_users")]
    pub users: u32,

    /// Lower bound of the random delay after each message, in milliseconds
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Upper bound (exclusive) of the random delay after each message, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Pause between batches in seconds; the policy's default when unset
    #[serde(default)]
    pub batch_pause_secs: Option<f64>,

    /// Seed for the delay generator; random when unset
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            batches: default_batches(),
            messages_per_batch: default_messages_per_batch(),
            users: default_users(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            batch_pause_secs: None,
            seed: None,
        }
    }
}

fn default_batches() -> u32 {
    2
}

fn default_messages_per_batch() -> u32 {
    10
}

fn default_users() -> u32 {
    5
}

fn default_min_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    1000
}

impl SimulationConfig {
    /// Check the simulation parameters.
    pub fn validate(&self) -> Result<()> {
        if self.users == 0 {
            return Err(RateWardenError::Config("users must be at least 1".to_string()));
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(RateWardenError::Config(format!(
                "min_delay_ms ({}) must not exceed max_delay_ms ({})",
                self.min_delay_ms, self.max_delay_ms
            )));
        }
        if let Some(secs) = self.batch_pause_secs {
            parse_duration("batch_pause_secs", secs)?;
        }
        Ok(())
    }

    /// Pause between batches, falling back to the default for `limiter`.
    pub fn batch_pause(&self, limiter: &LimiterConfig) -> Result<Duration> {
        let secs = self
            .batch_pause_secs
            .unwrap_or_else(|| limiter.default_batch_pause_secs());
        parse_duration("batch_pause_secs", secs)
    }
}

impl WardenConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: WardenConfig = serde_yaml::from_str(yaml)
            .map_err(|e| RateWardenError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the whole configuration.
    pub fn validate(&self) -> Result<()> {
        self.limiter.validate()?;
        self.simulation.validate()
    }
}
