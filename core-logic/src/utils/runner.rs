use crate::traits::RunStats;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct WorkerRunner;

impl WorkerRunner {
    /// Returns a token cancelled on Ctrl+C. Workers select on it at every
    /// suspension point.
    pub fn shutdown_token() -> CancellationToken {
        let token = CancellationToken::new();
        let cloned_token = token.clone();

        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    info!(target: "task_result", "🛑 Received Ctrl+C. Initiating graceful shutdown...");
                    cloned_token.cancel();
                }
                Err(err) => {
                    error!("Unable to listen for shutdown signal: {}", err);
                }
            }
        });

        token
    }

    pub fn success_rate(stats: &RunStats) -> f64 {
        let total = stats.total();
        if total > 0 {
            (stats.success + stats.cooldown) as f64 / total as f64 * 100.0
        } else {
            0.0
        }
    }

    pub fn log_summary(label: &str, stats: &RunStats, elapsed: Duration) {
        info!(
            target: "task_result",
            "{} complete in {:.1}s | SUCCESS: {} | COOLDOWN: {} | FAILED: {} | Auth failed: {} | Cancelled: {} | Success Rate: {:.2}%",
            label,
            elapsed.as_secs_f64(),
            stats.success,
            stats.cooldown,
            stats.failed,
            stats.auth_failed,
            stats.cancelled,
            Self::success_rate(stats)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate_counts_cooldowns() {
        let stats = RunStats {
            success: 1,
            cooldown: 1,
            failed: 2,
            ..Default::default()
        };
        assert!((WorkerRunner::success_rate(&stats) - 50.0).abs() < f64::EPSILON);
        assert_eq!(WorkerRunner::success_rate(&RunStats::default()), 0.0);
    }
}
