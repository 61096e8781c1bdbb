//! Process-wide server reachability flag.
//!
//! [`HealthChecker`] is the only writer; monitors hold read-only
//! [`HealthSignal`]s and skip their poll while the flag is down.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::ArtifactApi;

/// Read-only view of the shared health flag.
#[derive(Debug, Clone)]
pub struct HealthSignal {
    rx: watch::Receiver<bool>,
}

impl HealthSignal {
    /// A signal that always reports healthy, for monitors without a checker.
    pub fn always_healthy() -> Self {
        let (tx, rx) = watch::channel(true);
        // Dropping the sender freezes the last value.
        drop(tx);
        Self { rx }
    }

    pub(crate) fn from_receiver(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    pub fn is_healthy(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Owns the health flag and flips it from periodic probes.
pub struct HealthChecker {
    api: Arc<dyn ArtifactApi>,
    tx: watch::Sender<bool>,
    interval: Duration,
}

impl HealthChecker {
    pub fn new(api: Arc<dyn ArtifactApi>, interval: Duration) -> Self {
        let (tx, _) = watch::channel(true);
        Self { api, tx, interval }
    }

    pub fn signal(&self) -> HealthSignal {
        HealthSignal::from_receiver(self.tx.subscribe())
    }

    /// Runs one probe and updates the flag. Returns the new value.
    pub async fn probe(&self) -> bool {
        let healthy = match self.api.health().await {
            Ok(()) => true,
            Err(e) => {
                if *self.tx.borrow() {
                    warn!(error = %e, "Lost connection to server");
                }
                false
            }
        };
        let changed = self.tx.send_if_modified(|current| {
            if *current == healthy {
                false
            } else {
                *current = healthy;
                true
            }
        });
        if changed && healthy {
            info!("Server connection restored");
        }
        healthy
    }

    /// Probes immediately, then every interval until cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.cancelled() => break,
            }
            self.probe().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientError, MockArtifactApi};

    #[test]
    fn default_signal_is_healthy() {
        assert!(HealthSignal::always_healthy().is_healthy());
    }

    #[tokio::test]
    async fn probe_flips_the_flag_both_ways() {
        let mut api = MockArtifactApi::new();
        let mut seq = mockall::Sequence::new();
        api.expect_health()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(ClientError::Status(503)));
        api.expect_health()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));

        let checker = HealthChecker::new(Arc::new(api), Duration::from_secs(5));
        let signal = checker.signal();
        assert!(signal.is_healthy());

        assert!(!checker.probe().await);
        assert!(!signal.is_healthy());

        assert!(checker.probe().await);
        assert!(signal.is_healthy());
    }
}
