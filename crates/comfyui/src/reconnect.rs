//! Backoff reconnection for ComfyUI WebSocket connections.
//!
//! When the WebSocket to a ComfyUI server drops, the manager calls
//! [`reconnect_loop`] to keep retrying with growing, slightly jittered
//! delays until the connection is restored or the [`CancellationToken`]
//! fires. The HTTP liveness probe runs independently, so a server can be
//! CONNECTED for dispatch while its push stream is still reconnecting.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::{ComfyUIClient, ComfyUIConnection};

/// Failed attempts logged at `warn` before dropping to `debug`.
const LOUD_ATTEMPTS: u32 = 3;

/// Tunable parameters for the backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts (before jitter).
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of the delay added as random jitter, `0.0..=1.0`.
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

/// Next base delay, clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    current.mul_f64(config.multiplier).min(config.max_delay)
}

/// `delay` plus up to `config.jitter` of itself, so servers restarted
/// together are not hammered in lockstep.
fn jittered(delay: Duration, config: &ReconnectConfig) -> Duration {
    let jitter = config.jitter.clamp(0.0, 1.0);
    if jitter == 0.0 {
        return delay;
    }
    delay + delay.mul_f64(rand::random_range(0.0..jitter))
}

/// Reconnect to a ComfyUI server, backing off between attempts.
///
/// Returns `Some(connection)` once a connection succeeds, or `None` if
/// `cancel` fires first.
pub async fn reconnect_loop(
    client: &ComfyUIClient,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
) -> Option<ComfyUIConnection> {
    let mut delay = config.initial_delay;

    for attempt in 1u32.. {
        let wait = jittered(delay, config);
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(wait) => {}
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return None,
            result = client.connect() => result,
        };

        match result {
            Ok(conn) => {
                tracing::info!(api_url = %client.api_url(), attempt, "Reconnected to ComfyUI");
                return Some(conn);
            }
            Err(e) if attempt <= LOUD_ATTEMPTS => {
                tracing::warn!(
                    api_url = %client.api_url(),
                    attempt,
                    next_delay_ms = next_delay(delay, config).as_millis() as u64,
                    error = %e,
                    "Reconnect attempt failed",
                );
            }
            Err(e) => {
                tracing::debug!(api_url = %client.api_url(), attempt, error = %e, "Reconnect attempt failed");
            }
        }

        delay = next_delay(delay, config);
    }

    None
}
