//! Exponential-backoff reconnection for the push channel.
//!
//! Delays start at [`ReconnectConfig::initial_delay`], grow by
//! [`ReconnectConfig::multiplier`] after each failure up to
//! [`ReconnectConfig::max_delay`], and get a random jitter of up to
//! [`ReconnectConfig::jitter`] of the delay so that many clients do not
//! reconnect in lockstep.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::connection::{StreamEndpoint, WsStream};

/// Tunable parameters for the backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the (un-jittered) delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Maximum extra delay as a fraction of the base delay (`0.1` = 10 %).
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Add up to `config.jitter * delay` of random extra wait.
pub fn jittered(delay: Duration, config: &ReconnectConfig) -> Duration {
    let max_extra_ms = delay.as_millis() as f64 * config.jitter.max(0.0);
    let extra_ms = rand::random::<f64>() * max_extra_ms;
    delay + Duration::from_millis(extra_ms as u64)
}

/// Backoff state across consecutive failures.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    current: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            current: config.initial_delay,
            config,
            attempt: 0,
        }
    }

    /// Number of failed attempts since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Wait to apply before the next attempt; advances the schedule.
    pub fn next_wait(&mut self) -> Duration {
        let wait = jittered(self.current, &self.config);
        self.current = next_delay(self.current, &self.config);
        self.attempt += 1;
        wait
    }

    /// Back to the initial delay after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.config.initial_delay;
        self.attempt = 0;
    }
}

/// Attempt to connect with exponential backoff.
///
/// Returns `Some(stream)` once a connection succeeds, or `None` if `cancel`
/// is triggered first.
pub async fn reconnect_loop(
    endpoint: &StreamEndpoint,
    backoff: &mut Backoff,
    cancel: &CancellationToken,
) -> Option<WsStream> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(ws_url = %endpoint.ws_url(), "Reconnect cancelled");
                return None;
            }
            result = endpoint.connect() => {
                match result {
                    Ok(stream) => {
                        if backoff.attempt() > 0 {
                            tracing::info!(attempt = backoff.attempt(), "Push channel reconnected");
                        }
                        backoff.reset();
                        return Some(stream);
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            attempt = backoff.attempt() + 1,
                            "Push channel connect attempt failed",
                        );
                    }
                }
            }
        }

        let delay = backoff.next_wait();
        tracing::debug!(delay_ms = delay.as_millis() as u64, "Waiting before reconnect");

        // Wait before the next attempt, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> ReconnectConfig {
        ReconnectConfig {
            jitter: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn next_delay_doubles() {
        let config = ReconnectConfig::default();
        let d = next_delay(Duration::from_secs(1), &config);
        assert_eq!(d, Duration::from_secs(2));
    }

    #[test]
    fn next_delay_clamps_at_max() {
        let config = ReconnectConfig {
            max_delay: Duration::from_secs(10),
            ..Default::default()
        };
        let d = next_delay(Duration::from_secs(8), &config);
        assert_eq!(d, Duration::from_secs(10));
    }

    #[test]
    fn full_backoff_sequence_without_jitter() {
        let mut backoff = Backoff::new(no_jitter());
        let expected = [1, 2, 4, 8, 16, 30, 30, 30];

        for &expected_secs in &expected {
            assert_eq!(backoff.next_wait().as_secs(), expected_secs);
        }
        assert_eq!(backoff.attempt(), expected.len() as u32);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let config = ReconnectConfig::default();
        let base = Duration::from_secs(10);
        for _ in 0..100 {
            let d = jittered(base, &config);
            assert!(d >= base);
            assert!(d <= base + Duration::from_secs(1));
        }
    }

    #[test]
    fn reset_restarts_schedule() {
        let mut backoff = Backoff::new(no_jitter());
        backoff.next_wait();
        backoff.next_wait();
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_wait(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn cancellation_token_stops_reconnect() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let endpoint = StreamEndpoint::new("ws://127.0.0.1:9/ws");
        let mut backoff = Backoff::new(ReconnectConfig::default());

        let result = reconnect_loop(&endpoint, &mut backoff, &cancel).await;
        assert!(result.is_none());
    }
}
