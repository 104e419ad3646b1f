//! Periodic getStatus() poll.
//!
//! Every tick reads the trap's authoritative status and forwards a
//! `StatusSnapshot` into the monitor channel. A failed cycle is reported as
//! `MonitorInput::PollFailed` and retried on the next tick; there is no
//! backoff. The poll runs inline in the tick loop and missed ticks are
//! skipped, so two polls are never in flight at once.

use crate::onchain::types::StatusSnapshot;
use crate::onchain::{ChainError, ContractReader};
use crate::service::MonitorInput;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct Poller {
    reader: Arc<dyn ContractReader>,
    interval: Duration,
    call_timeout: Duration,
}

impl Poller {
    pub fn new(reader: Arc<dyn ContractReader>, interval: Duration, call_timeout: Duration) -> Self {
        Self {
            reader,
            interval,
            call_timeout,
        }
    }

    /// One poll cycle, bounded by the call timeout.
    pub async fn poll_once(&self) -> Result<StatusSnapshot, ChainError> {
        let reading = tokio::time::timeout(self.call_timeout, self.reader.get_status())
            .await
            .map_err(|_| ChainError::Timeout {
                method: "getStatus",
                timeout: self.call_timeout,
            })??;
        Ok(StatusSnapshot::new(reading, Utc::now()))
    }

    /// Poll until `cancel` fires. The first poll runs immediately. A poll in
    /// flight when shutdown is requested is allowed to finish and its result
    /// is still forwarded.
    pub async fn run(self, tx: mpsc::Sender<MonitorInput>, cancel: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = self.interval.as_secs_f64(), "status poller started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let input = match self.poll_once().await {
                Ok(snapshot) => {
                    debug!(
                        dust = %snapshot.dust_count,
                        threshold = %snapshot.threshold,
                        would_trigger = snapshot.would_trigger,
                        block = snapshot.observed_at_block,
                        "status polled"
                    );
                    MonitorInput::Poll(snapshot)
                }
                Err(e) => {
                    warn!(error = %e, "status poll failed, retrying next tick");
                    MonitorInput::PollFailed(e)
                }
            };

            if tx.send(input).await.is_err() {
                break;
            }
        }

        info!("status poller stopped");
    }
}
