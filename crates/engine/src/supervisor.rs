//! Connection supervisor: keeps the transport session alive.
//!
//! Connects, relays pairing codes to observers, health-checks the session and
//! reconnects with capped exponential backoff. The dispatch controller only
//! sees the resulting `connected` flag.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use relay_common::types::DispatchEvent;

use crate::sink::EventSink;
use crate::transport::{ConnectionState, Transport};

/// Supervisor timing.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Delay between health checks while connected or awaiting pairing.
    pub health_interval: Duration,
    /// First reconnect delay after a failure.
    pub initial_backoff: Duration,
    /// Upper bound for the reconnect delay.
    pub max_backoff: Duration,
    /// Relative jitter applied to each reconnect delay (0.0 – 1.0).
    pub jitter_factor: f64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            health_interval: Duration::from_secs(30),
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(120),
            jitter_factor: 0.2,
        }
    }
}

impl SupervisorConfig {
    /// Reconnect delay after `failures` consecutive failures, before jitter.
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.saturating_sub(1).min(16));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let jitter = delay.as_secs_f64() * self.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        Duration::from_secs_f64((delay.as_secs_f64() + jitter).max(0.0))
    }
}

/// Supervised connect / health-check loop around a [`Transport`].
pub struct ConnectionSupervisor {
    transport: Arc<dyn Transport>,
    sink: Arc<dyn EventSink>,
    config: SupervisorConfig,
    connected_tx: watch::Sender<bool>,
}

impl ConnectionSupervisor {
    pub fn new(
        transport: Arc<dyn Transport>,
        sink: Arc<dyn EventSink>,
        config: SupervisorConfig,
    ) -> (Self, watch::Receiver<bool>) {
        let (connected_tx, connected_rx) = watch::channel(false);
        (
            Self {
                transport,
                sink,
                config,
                connected_tx,
            },
            connected_rx,
        )
    }

    /// Run forever; cancel by dropping the future.
    pub async fn run(self) {
        let mut failures = 0u32;

        loop {
            let connected = *self.connected_tx.borrow();
            let wait = if connected {
                self.check_health(&mut failures).await
            } else {
                self.try_connect(&mut failures).await
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// One connect attempt. Returns how long to wait before the next step.
    async fn try_connect(&self, failures: &mut u32) -> Duration {
        match self.transport.connect().await {
            Ok(ConnectionState::Connected) => {
                *failures = 0;
                self.set_connected(true).await;
                self.config.health_interval
            }
            Ok(ConnectionState::AwaitingPairing { code }) => {
                *failures = 0;
                tracing::info!(transport = self.transport.name(), "Awaiting transport pairing");
                self.sink.publish(DispatchEvent::PairingCode(code)).await;
                self.sink
                    .publish(DispatchEvent::status("awaiting pairing"))
                    .await;
                self.wait_for_pairing().await
            }
            Err(e) => {
                *failures += 1;
                let delay = self.config.jittered(self.config.backoff(*failures));
                tracing::warn!(
                    transport = self.transport.name(),
                    failures = *failures,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transport connect failed"
                );
                self.sink
                    .publish(DispatchEvent::status(format!("disconnected: {}", e)))
                    .await;
                delay
            }
        }
    }

    /// Poll until the pairing completes; a failed poll hands back to connect.
    async fn wait_for_pairing(&self) -> Duration {
        tokio::time::sleep(self.config.health_interval).await;
        match self.transport.is_connected().await {
            Ok(true) => {
                self.set_connected(true).await;
                self.config.health_interval
            }
            Ok(false) => Duration::ZERO,
            Err(e) => {
                tracing::warn!(error = %e, "Pairing status check failed");
                self.config.initial_backoff
            }
        }
    }

    async fn check_health(&self, failures: &mut u32) -> Duration {
        match self.transport.is_connected().await {
            Ok(true) => self.config.health_interval,
            Ok(false) => {
                tracing::warn!(transport = self.transport.name(), "Transport session lost");
                self.set_connected(false).await;
                Duration::ZERO
            }
            Err(e) => {
                *failures += 1;
                tracing::warn!(error = %e, "Transport health check failed");
                self.set_connected(false).await;
                self.config.jittered(self.config.backoff(*failures))
            }
        }
    }

    async fn set_connected(&self, connected: bool) {
        let changed = self.connected_tx.send_replace(connected) != connected;
        if !changed {
            return;
        }

        if connected {
            tracing::info!(transport = self.transport.name(), "Transport connected");
            self.sink.publish(DispatchEvent::status("connected")).await;
        } else {
            self.sink.publish(DispatchEvent::status("disconnected")).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = SupervisorConfig {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            ..SupervisorConfig::default()
        };
        assert_eq!(config.backoff(1), Duration::from_secs(1));
        assert_eq!(config.backoff(2), Duration::from_secs(2));
        assert_eq!(config.backoff(4), Duration::from_secs(8));
        assert_eq!(config.backoff(5), Duration::from_secs(10));
        assert_eq!(config.backoff(60), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_within_factor() {
        let config = SupervisorConfig {
            jitter_factor: 0.2,
            ..SupervisorConfig::default()
        };
        for _ in 0..100 {
            let delay = config.jittered(Duration::from_secs(10));
            assert!(delay >= Duration::from_secs(8));
            assert!(delay <= Duration::from_secs(12));
        }
    }
}
