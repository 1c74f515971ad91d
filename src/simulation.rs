//! Message stream simulation.
//!
//! Replays a stream of messages spread round-robin across a small set of
//! users, with a random delay after each message and a pause between
//! batches. Every message goes through [`Limiter::record_at`] and reports the
//! resulting wait time.
//!
//! Time can pass for real ([`Pacing::RealTime`]) or be simulated by moving a
//! [`ManualClock`] forward ([`Pacing::Virtual`]), which makes runs instant and,
//! with a fixed seed, reproducible.

use std::fmt;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::clock::{ManualClock, Timestamp};
use crate::config::{LimiterConfig, SimulationConfig};
use crate::error::{RateWardenError, Result};
use crate::ratelimit::Limiter;

/// How time passes between simulated messages.
#[derive(Debug, Clone)]
pub enum Pacing {
    /// Sleep on the tokio timer.
    RealTime,
    /// Advance the given clock without sleeping.
    Virtual(ManualClock),
}

impl Pacing {
    /// Let `duration` pass.
    pub async fn pause(&self, duration: Duration) {
        match self {
            Pacing::RealTime => tokio::time::sleep(duration).await,
            Pacing::Virtual(clock) => clock.advance(duration),
        }
    }
}

/// What the limiter decided for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The message was admitted
    Accepted,
    /// Denied because the sliding window was full
    RateLimited,
    /// Denied because the minimum interval had not passed
    Throttled,
}

impl Verdict {
    /// The verdict a denial under `limiter` is reported as.
    pub fn denied_by(limiter: &LimiterConfig) -> Self {
        match limiter {
            LimiterConfig::SlidingWindow { .. } => Verdict::RateLimited,
            LimiterConfig::Throttling { .. } => Verdict::Throttled,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Verdict::Accepted => "accepted",
            Verdict::RateLimited => "rate-limited",
            Verdict::Throttled => "throttled",
        };
        f.write_str(label)
    }
}

/// The outcome of one simulated message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageOutcome {
    /// Zero-based batch index
    pub batch: u32,
    /// One-based message number, continuing across batches
    pub message_id: u32,
    /// The user the message was sent as
    pub user: String,
    /// Limiter time at which the message was sent
    pub sent_at: Timestamp,
    /// The limiter's decision
    pub verdict: Verdict,
    /// Wait reported right after the message
    pub wait: Duration,
}

impl MessageOutcome {
    /// Whether the limiter admitted the message.
    pub fn accepted(&self) -> bool {
        self.verdict == Verdict::Accepted
    }
}

impl fmt::Display for MessageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Message {:2} | User {} | {}", self.message_id, self.user, self.verdict)?;
        if !self.accepted() {
            write!(f, " (wait {:.1}s)", self.wait.as_secs_f64())?;
        }
        Ok(())
    }
}

/// Everything observed during one simulation run.
#[derive(Debug, Clone, Default)]
pub struct SimulationReport {
    /// Outcomes in the order the messages were sent
    pub outcomes: Vec<MessageOutcome>,
}

impl SimulationReport {
    /// Number of admitted messages.
    pub fn accepted(&self) -> usize {
        self.outcomes.iter().filter(|o| o.accepted()).count()
    }

    /// Number of denied messages.
    pub fn denied(&self) -> usize {
        self.outcomes.len() - self.accepted()
    }
}

/// Drives a limiter with the configured message stream.
pub struct Simulation {
    config: SimulationConfig,
    batch_pause: Duration,
    denial: Verdict,
    rng: StdRng,
}

impl Simulation {
    /// Create a simulation for the policy described by `limiter`, validating
    /// `config` first.
    ///
    /// The policy picks the default batch pause and how denials are labelled.
    pub fn new(config: SimulationConfig, limiter: &LimiterConfig) -> Result<Self> {
        config.validate()?;
        let batch_pause = config.batch_pause(limiter)?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            config,
            batch_pause,
            denial: Verdict::denied_by(limiter),
            rng,
        })
    }

    /// The user a message number is sent as.
    pub fn user_for(&self, message_id: u32) -> String {
        (message_id % self.config.users + 1).to_string()
    }

    fn next_delay(&mut self) -> Duration {
        let (min, max) = (self.config.min_delay_ms, self.config.max_delay_ms);
        if min >= max {
            return Duration::from_millis(min);
        }
        Duration::from_millis(self.rng.gen_range(min..max))
    }

    /// Send every configured message through `limiter`.
    ///
    /// `on_outcome` sees each outcome as soon as it is decided. Fails if the
    /// limiter's clock is observed moving backwards.
    pub async fn run<L, F>(
        &mut self,
        limiter: &L,
        pacing: &Pacing,
        mut on_outcome: F,
    ) -> Result<SimulationReport>
    where
        L: Limiter<String>,
        F: FnMut(&MessageOutcome),
    {
        let mut report = SimulationReport::default();
        let mut message_id: u32 = 0;
        let mut previous: Option<Timestamp> = None;

        for batch in 0..self.config.batches {
            if batch > 0 {
                info!(
                    pause_ms = self.batch_pause.as_millis() as u64,
                    "Waiting before next batch"
                );
                pacing.pause(self.batch_pause).await;
            }
            info!(batch = batch + 1, "Starting message batch");

            for _ in 0..self.config.messages_per_batch {
                message_id = message_id.checked_add(1).ok_or_else(|| {
                    RateWardenError::Simulation("message counter overflowed".to_string())
                })?;
                let user = self.user_for(message_id);

                let now = limiter.now();
                if let Some(earlier) = previous.filter(|earlier| now < *earlier) {
                    return Err(RateWardenError::Simulation(format!(
                        "clock moved backwards from {} to {}",
                        earlier, now
                    )));
                }
                previous = Some(now);

                let verdict = if limiter.record_at(user.as_str(), now) {
                    Verdict::Accepted
                } else {
                    self.denial
                };
                let wait = limiter.time_until_next_allowed_at(user.as_str(), now);

                let outcome = MessageOutcome {
                    batch,
                    message_id,
                    user,
                    sent_at: now,
                    verdict,
                    wait,
                };
                debug!(
                    message_id = outcome.message_id,
                    user = %outcome.user,
                    verdict = %outcome.verdict,
                    wait_ms = outcome.wait.as_millis() as u64,
                    "Message processed"
                );
                on_outcome(&outcome);
                report.outcomes.push(outcome);

                let delay = self.next_delay();
                pacing.pause(delay).await;
            }
        }

        info!(
            accepted = report.accepted(),
            denied = report.denied(),
            "Simulation finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, MonotonicClock};
    use crate::ratelimit::{SlidingWindowLimiter, ThrottlingLimiter};
    use std::collections::HashMap;

    fn throttling(min_interval_secs: f64) -> LimiterConfig {
        LimiterConfig::Throttling { min_interval_secs }
    }

    fn seeded(seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed: Some(seed),
            ..SimulationConfig::default()
        }
    }

    fn accepted_times(report: &SimulationReport) -> HashMap<String, Vec<Timestamp>> {
        let mut by_user: HashMap<String, Vec<Timestamp>> = HashMap::new();
        for outcome in report.outcomes.iter().filter(|o| o.accepted()) {
            by_user.entry(outcome.user.clone()).or_default().push(outcome.sent_at);
        }
        by_user
    }

    #[test]
    fn test_users_are_assigned_round_robin() {
        let simulation =
            Simulation::new(SimulationConfig::default(), &LimiterConfig::default()).unwrap();

        assert_eq!(simulation.user_for(1), "2");
        assert_eq!(simulation.user_for(4), "5");
        assert_eq!(simulation.user_for(5), "1");
        assert_eq!(simulation.user_for(11), "2");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = SimulationConfig {
            users: 0,
            ..SimulationConfig::default()
        };

        let result = Simulation::new(config, &LimiterConfig::default());

        assert!(matches!(result, Err(RateWardenError::Config(_))));
    }

    #[tokio::test]
    async fn test_sliding_window_first_batch() {
        let clock = ManualClock::new();
        let limiter = SlidingWindowLimiter::with_clock(Duration::from_secs(10), 1, clock.clone());
        let mut simulation = Simulation::new(seeded(1), &LimiterConfig::default()).unwrap();

        let report = simulation
            .run(&limiter, &Pacing::Virtual(clock), |_| {})
            .await
            .unwrap();

        assert_eq!(report.outcomes.len(), 20);
        let first_batch: Vec<&MessageOutcome> =
            report.outcomes.iter().filter(|o| o.batch == 0).collect();
        // Each user repeats after five delays of under a second each.
        for outcome in &first_batch[..5] {
            assert!(outcome.accepted(), "{}", outcome);
            assert_eq!(outcome.wait, Duration::from_secs(10));
        }
        for outcome in &first_batch[5..] {
            assert_eq!(outcome.verdict, Verdict::RateLimited, "{}", outcome);
            assert!(outcome.wait > Duration::ZERO);
            assert!(outcome.wait < Duration::from_secs(10));
        }
    }

    #[tokio::test]
    async fn test_sliding_window_accepts_are_a_window_apart() {
        let clock = ManualClock::new();
        let window = Duration::from_secs(10);
        let limiter = SlidingWindowLimiter::with_clock(window, 1, clock.clone());
        let mut simulation = Simulation::new(seeded(3), &LimiterConfig::default()).unwrap();

        let report = simulation
            .run(&limiter, &Pacing::Virtual(clock), |_| {})
            .await
            .unwrap();

        for times in accepted_times(&report).values() {
            for pair in times.windows(2) {
                assert!(pair[1].saturating_duration_since(pair[0]) >= window);
            }
        }
    }

    #[tokio::test]
    async fn test_throttling_accepts_are_an_interval_apart() {
        let clock = ManualClock::new();
        let min_interval = Duration::from_secs(10);
        let limiter = ThrottlingLimiter::with_clock(min_interval, clock.clone());
        let mut simulation = Simulation::new(seeded(5), &throttling(10.0)).unwrap();

        let report = simulation
            .run(&limiter, &Pacing::Virtual(clock), |_| {})
            .await
            .unwrap();

        assert!(report
            .outcomes
            .iter()
            .all(|o| o.accepted() || o.verdict == Verdict::Throttled));
        let by_user = accepted_times(&report);
        assert_eq!(by_user.len(), 5);
        for times in by_user.values() {
            // The pause plus ten delays always clears the interval.
            assert_eq!(times.len(), 2);
            assert!(times[1].saturating_duration_since(times[0]) >= min_interval);
        }
    }

    #[tokio::test]
    async fn test_seeded_runs_are_reproducible() {
        let mut runs = Vec::new();
        for _ in 0..2 {
            let clock = ManualClock::new();
            let window = Duration::from_secs(10);
            let limiter = SlidingWindowLimiter::with_clock(window, 2, clock.clone());
            let mut simulation = Simulation::new(seeded(99), &LimiterConfig::default()).unwrap();
            let report = simulation
                .run(&limiter, &Pacing::Virtual(clock), |_| {})
                .await
                .unwrap();
            runs.push(report.outcomes);
        }

        assert_eq!(runs[0], runs[1]);
    }

    #[test]
    fn test_denial_verdict_follows_policy() {
        assert_eq!(Verdict::denied_by(&LimiterConfig::default()), Verdict::RateLimited);
        assert_eq!(Verdict::denied_by(&throttling(10.0)), Verdict::Throttled);
    }

    #[tokio::test]
    async fn test_virtual_pacing_advances_clock() {
        let clock = ManualClock::new();
        let limiter = ThrottlingLimiter::with_clock(Duration::from_secs(1), clock.clone());
        let config = SimulationConfig {
            min_delay_ms: 200,
            max_delay_ms: 200,
            ..seeded(0)
        };
        let mut simulation = Simulation::new(config, &throttling(1.0)).unwrap();

        let mut seen = 0;
        simulation
            .run(&limiter, &Pacing::Virtual(clock.clone()), |_| seen += 1)
            .await
            .unwrap();

        assert_eq!(seen, 20);
        // 20 delays of 200ms plus the throttling default pause of 10s
        assert_eq!(clock.now(), Timestamp::from_secs(14));
    }

    #[tokio::test]
    async fn test_backwards_clock_is_reported() {
        let limiter_clock = ManualClock::starting_at(Timestamp::from_secs(5));
        let window = Duration::from_secs(1);
        let limiter = SlidingWindowLimiter::with_clock(window, 1, limiter_clock.clone());
        let mut simulation = Simulation::new(seeded(2), &LimiterConfig::default()).unwrap();

        let result = simulation
            .run(&limiter, &Pacing::Virtual(ManualClock::new()), |_| {
                limiter_clock.set(Timestamp::ZERO)
            })
            .await;

        assert!(matches!(result, Err(RateWardenError::Simulation(_))));
    }

    #[tokio::test]
    async fn test_real_time_pacing_with_zero_delays() {
        let limiter: SlidingWindowLimiter<String, MonotonicClock> =
            SlidingWindowLimiter::new(Duration::from_secs(60), 1);
        let config = SimulationConfig {
            min_delay_ms: 0,
            max_delay_ms: 0,
            batch_pause_secs: Some(0.0),
            ..seeded(4)
        };
        let mut simulation = Simulation::new(config, &LimiterConfig::default()).unwrap();

        let report = simulation
            .run(&limiter, &Pacing::RealTime, |_| {})
            .await
            .unwrap();

        assert_eq!(report.accepted(), 5);
        assert_eq!(report.denied(), 15);
    }

    #[test]
    fn test_outcome_display() {
        let accepted = MessageOutcome {
            batch: 0,
            message_id: 3,
            user: "4".to_string(),
            sent_at: Timestamp::ZERO,
            verdict: Verdict::Accepted,
            wait: Duration::from_secs(10),
        };
        let rate_limited = MessageOutcome {
            verdict: Verdict::RateLimited,
            wait: Duration::from_millis(5_300),
            ..accepted.clone()
        };
        let throttled = MessageOutcome {
            verdict: Verdict::Throttled,
            ..rate_limited.clone()
        };

        assert_eq!(accepted.to_string(), "Message  3 | User 4 | accepted");
        assert_eq!(rate_limited.to_string(), "Message  3 | User 4 | rate-limited (wait 5.3s)");
        assert_eq!(throttled.to_string(), "Message  3 | User 4 | throttled (wait 5.3s)");
    }
}
