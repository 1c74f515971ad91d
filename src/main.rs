use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ratewarden::clock::{Clock, ManualClock, MonotonicClock};
use ratewarden::config::{LimiterConfig, WardenConfig};
use ratewarden::simulation::{MessageOutcome, Pacing, Simulation, SimulationReport};

/// Replay a per-user message stream through a rate limiter.
#[derive(Parser, Debug)]
#[command(name = "ratewarden")]
#[command(about = "Per-key request admission governor", version)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Admission policy, overriding the configuration file
    #[arg(short, long, value_enum)]
    policy: Option<PolicyArg>,

    /// Sliding window length in seconds
    #[arg(long, allow_negative_numbers = true)]
    window_secs: Option<f64>,

    /// Maximum requests per user within the sliding window
    #[arg(long, allow_negative_numbers = true)]
    max_requests: Option<i64>,

    /// Minimum interval between requests in seconds (throttling)
    #[arg(long, allow_negative_numbers = true)]
    min_interval_secs: Option<f64>,

    /// Seed for the random delays
    #[arg(long)]
    seed: Option<u64>,

    /// Simulate the passage of time instead of sleeping
    #[arg(long)]
    virtual_time: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum PolicyArg {
    SlidingWindow,
    Throttling,
}

impl Args {
    /// Merge command-line overrides into the loaded configuration.
    fn apply(&self, config: &mut WardenConfig) {
        let policy = self.policy.unwrap_or(match config.limiter {
            LimiterConfig::SlidingWindow { .. } => PolicyArg::SlidingWindow,
            LimiterConfig::Throttling { .. } => PolicyArg::Throttling,
        });

        config.limiter = match (policy, &config.limiter) {
            (
                PolicyArg::SlidingWindow,
                &LimiterConfig::SlidingWindow {
                    window_secs,
                    max_requests,
                },
            ) => LimiterConfig::SlidingWindow {
                window_secs: self.window_secs.unwrap_or(window_secs),
                max_requests: self.max_requests.unwrap_or(max_requests),
            },
            (PolicyArg::SlidingWindow, _) => LimiterConfig::SlidingWindow {
                window_secs: self.window_secs.unwrap_or(10.0),
                max_requests: self.max_requests.unwrap_or(1),
            },
            (PolicyArg::Throttling, &LimiterConfig::Throttling { min_interval_secs }) => {
                LimiterConfig::Throttling {
                    min_interval_secs: self.min_interval_secs.unwrap_or(min_interval_secs),
                }
            }
            (PolicyArg::Throttling, _) => LimiterConfig::Throttling {
                min_interval_secs: self.min_interval_secs.unwrap_or(10.0),
            },
        };

        if self.seed.is_some() {
            config.simulation.seed = self.seed;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);
    if args.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Starting Ratewarden");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => WardenConfig::from_file(path)?,
        None => WardenConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;
    info!(limiter = ?config.limiter, "Configuration loaded");

    let run = run_simulation(&config, args.virtual_time, outcome_printer());
    let report = tokio::select! {
        report = run => Some(report?),
        _ = shutdown_signal() => None,
    };

    match report {
        Some(report) => print_summary(&report),
        None => warn!("Simulation interrupted"),
    }

    info!("Ratewarden stopped");
    Ok(())
}

/// Build the configured limiter and drive the message stream through it.
async fn run_simulation<F>(
    config: &WardenConfig,
    virtual_time: bool,
    on_outcome: F,
) -> anyhow::Result<SimulationReport>
where
    F: FnMut(&MessageOutcome),
{
    let mut simulation = Simulation::new(config.simulation.clone(), &config.limiter)?;

    let report = if virtual_time {
        let clock = ManualClock::new();
        let limiter = config.limiter.build::<String, _>(clock.clone())?;
        info!(policy = %limiter, "Running simulation in virtual time");
        let pacing = Pacing::Virtual(clock);
        simulation.run(&limiter, &pacing, on_outcome).await?
    } else {
        let clock = MonotonicClock::new();
        let limiter = config.limiter.build::<String, _>(clock)?;
        info!(policy = %limiter, started_at = %clock.now(), "Running simulation in real time");
        let pacing = Pacing::RealTime;
        simulation.run(&limiter, &pacing, on_outcome).await?
    };
    Ok(report)
}

/// Print each outcome, leaving a blank line between batches.
fn outcome_printer() -> impl FnMut(&MessageOutcome) {
    let mut current_batch = 0;
    move |outcome: &MessageOutcome| {
        if outcome.batch != current_batch {
            println!();
            current_batch = outcome.batch;
        }
        println!("{}", outcome);
    }
}

fn print_summary(report: &SimulationReport) {
    println!();
    println!(
        "{} messages: {} accepted, {} denied",
        report.outcomes.len(),
        report.accepted(),
        report.denied()
    );
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping simulation");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping simulation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratewarden::simulation::Verdict;

    fn throttling_config() -> WardenConfig {
        WardenConfig {
            limiter: LimiterConfig::Throttling {
                min_interval_secs: 2.0,
            },
            ..WardenConfig::default()
        }
    }

    #[test]
    fn test_policy_switch_fills_in_defaults() {
        let args = Args::parse_from([
            "ratewarden",
            "--policy",
            "sliding-window",
            "--max-requests",
            "3",
        ]);
        let mut config = throttling_config();

        args.apply(&mut config);

        assert_eq!(
            config.limiter,
            LimiterConfig::SlidingWindow {
                window_secs: 10.0,
                max_requests: 3
            }
        );
    }

    #[test]
    fn test_switch_to_throttling_uses_default_interval() {
        let args = Args::parse_from(["ratewarden", "--policy", "throttling"]);
        let mut config = WardenConfig::default();

        args.apply(&mut config);

        assert_eq!(
            config.limiter,
            LimiterConfig::Throttling {
                min_interval_secs: 10.0
            }
        );
    }

    #[test]
    fn test_overrides_keep_file_values_for_same_policy() {
        let args = Args::parse_from(["ratewarden", "--window-secs", "30"]);
        let mut config = WardenConfig {
            limiter: LimiterConfig::SlidingWindow {
                window_secs: 60.0,
                max_requests: 5,
            },
            ..WardenConfig::default()
        };

        args.apply(&mut config);

        assert_eq!(
            config.limiter,
            LimiterConfig::SlidingWindow {
                window_secs: 30.0,
                max_requests: 5
            }
        );
    }

    #[test]
    fn test_flags_for_other_policy_are_ignored() {
        let args = Args::parse_from([
            "ratewarden",
            "--window-secs",
            "30",
            "--min-interval-secs",
            "4",
        ]);
        let mut config = throttling_config();

        args.apply(&mut config);

        assert_eq!(
            config.limiter,
            LimiterConfig::Throttling {
                min_interval_secs: 4.0
            }
        );
    }

    #[test]
    fn test_seed_is_overridden_only_when_given() {
        let mut config = WardenConfig::default();
        config.simulation.seed = Some(7);

        Args::parse_from(["ratewarden"]).apply(&mut config);
        assert_eq!(config.simulation.seed, Some(7));

        Args::parse_from(["ratewarden", "--seed", "42"]).apply(&mut config);
        assert_eq!(config.simulation.seed, Some(42));
    }

    #[test]
    fn test_negative_override_fails_validation() {
        let args = Args::parse_from(["ratewarden", "--max-requests", "-1"]);
        let mut config = WardenConfig::default();

        args.apply(&mut config);

        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_virtual_time_run_completes() {
        let args = Args::parse_from(["ratewarden", "--policy", "throttling", "--seed", "3"]);
        let mut config = WardenConfig::default();
        args.apply(&mut config);

        let mut verdicts = Vec::new();
        let report = run_simulation(&config, true, |outcome| verdicts.push(outcome.verdict))
            .await
            .unwrap();

        assert_eq!(verdicts.len(), 20);
        assert_eq!(report.accepted(), 10);
        assert!(verdicts
            .iter()
            .all(|verdict| matches!(verdict, Verdict::Accepted | Verdict::Throttled)));
    }
}
