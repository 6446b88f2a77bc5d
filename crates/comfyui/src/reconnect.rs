//! Exponential-backoff reconnection for the job event stream.
//!
//! When the event stream cannot be opened, or drops before the job has
//! finished, the listener calls [`reconnect_loop`] to keep retrying with
//! increasing delays until either the connection is restored or the
//! [`CancellationToken`] is triggered. The watcher keeps polling history in
//! the meantime, so a long outage only costs the early-completion hint.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::{ComfyUIClient, ComfyUIConnection};

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Delay that follows `current`, capped at `max_delay`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier.max(1.0)).min(self.max_delay)
    }
}

/// Reconnect to the event stream with exponential backoff.
///
/// Waits `initial_delay` before the first attempt. Returns
/// `Some(connection)` once a connection succeeds, or `None` if `cancel` is
/// triggered first.
pub async fn reconnect_loop(
    client: &ComfyUIClient,
    client_id: &str,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
) -> Option<ComfyUIConnection> {
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        // Wait before the next attempt, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
        tracing::debug!(
            client_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting to ComfyUI event stream",
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(client_id, "Reconnect cancelled");
                return None;
            }
            result = client.connect(client_id) => {
                match result {
                    Ok(conn) => {
                        tracing::info!(client_id, attempt, "Reconnected to ComfyUI event stream");
                        return Some(conn);
                    }
                    Err(e) => {
                        tracing::warn!(
                            client_id,
                            error = %e,
                            "Reconnect attempt {attempt} failed",
                        );
                    }
                }
            }
        }

        delay = config.next_delay(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EngineEndpoint;

    #[test]
    fn backoff_grows_until_capped() {
        let config = ReconnectConfig::default();
        let mut delay = config.initial_delay;
        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(delay.as_secs());
            delay = config.next_delay(delay);
        }
        assert_eq!(seen, [1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn multiplier_below_one_never_shrinks_the_delay() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
            multiplier: 0.5,
        };
        assert_eq!(config.next_delay(Duration::from_millis(50)), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn cancelled_token_returns_without_connecting() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let client = ComfyUIClient::new(EngineEndpoint::parse("http://localhost:9").unwrap());
        let result = reconnect_loop(&client, "c1", &ReconnectConfig::default(), &cancel).await;
        assert!(result.is_none());
    }
}
