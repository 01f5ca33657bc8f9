//! Background expiry sweeper
//!
//! A single tokio task that periodically runs
//! [`LuckyMoney::sweep_expired`] on the blocking pool. Store transactions are
//! synchronous, so the task never holds a writer across an `.await`.

use crate::{service::LuckyMoney, Error, Result};
use chrono::Utc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Handle to a running sweeper
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for the current pass to finish
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.task
            .await
            .map_err(|e| Error::Other(format!("Sweeper task failed: {}", e)))
    }
}

struct Sweeper {
    service: LuckyMoney,
    period: Duration,
    shutdown: oneshot::Receiver<()>,
}

impl Sweeper {
    async fn run(mut self) {
        let mut timer = interval(self.period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                // Shutdown requested or handle dropped
                _ = &mut self.shutdown => break,

                _ = timer.tick() => self.sweep_once().await,
            }
        }

        tracing::info!("Expiry sweeper stopped");
    }

    async fn sweep_once(&self) {
        let service = self.service.clone();
        let outcome = tokio::task::spawn_blocking(move || service.sweep_expired(Utc::now())).await;

        match outcome {
            Ok(Ok(expired)) => tracing::debug!(expired, "Sweep pass complete"),
            Ok(Err(e)) => tracing::error!("Error sweeping expired envelopes: {}", e),
            Err(e) => tracing::error!("Sweep pass panicked: {}", e),
        }
    }
}

/// Spawn the sweeper on the current runtime
pub fn spawn_sweeper(service: LuckyMoney, period: Duration) -> SweeperHandle {
    let (tx, rx) = oneshot::channel();
    let sweeper = Sweeper {
        service,
        period,
        shutdown: rx,
    };

    let task = tokio::spawn(async move {
        sweeper.run().await;
    });

    tracing::info!(period_secs = period.as_secs_f64(), "Expiry sweeper started");

    SweeperHandle {
        shutdown: Some(tx),
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Asset, Distribution, NewEnvelope, UserId};
    use crate::Config;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn create_test_service(expire_after_secs: u64) -> (LuckyMoney, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;
        config.envelope.expire_after_secs = expire_after_secs;

        (LuckyMoney::open(&config).unwrap(), temp_dir)
    }

    fn equal_oracle(total: Decimal, _: u32, count: u32) -> Result<Vec<Decimal>> {
        Ok(vec![total / Decimal::from(count); count as usize])
    }

    #[tokio::test]
    async fn test_sweeper_spawn_and_shutdown() {
        let (service, _temp) = create_test_service(3600);

        let handle = spawn_sweeper(service, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_sweeper_expires_due_envelopes() {
        let (service, _temp) = create_test_service(0);
        let cny = Asset::new("CNY");
        service
            .ledger()
            .deposit(UserId(1), &cny, Decimal::new(10, 0))
            .unwrap();

        let envelope = service
            .create_envelope(
                &NewEnvelope {
                    sender: UserId(1),
                    sender_name: "alice".to_string(),
                    asset: cny.clone(),
                    number: 2,
                    distribution: Distribution::Random {
                        total: Decimal::new(4, 0),
                    },
                    message: String::new(),
                },
                &equal_oracle,
            )
            .unwrap();

        let handle = spawn_sweeper(service.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown().await.unwrap();

        assert!(service.envelopes().is_expired(envelope.id).unwrap());
        let account = service.ledger().balance(UserId(1), &cny).unwrap();
        assert_eq!(account.amount, Decimal::new(10, 0));
        assert_eq!(account.locked, Decimal::ZERO);
    }
}
