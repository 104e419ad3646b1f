//! Reconnect supervision for the log subscription.
//!
//! A session is one connect → subscribe → stream cycle. The supervisor keeps
//! restarting sessions with exponential backoff until it is cancelled or the
//! retry budget runs out.

use crate::onchain::ChainError;
use crate::service::{MonitorInput, SourceStatus};

use std::fmt::Display;
use std::future::{Future, IntoFuture};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Exponential backoff between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// Reconnect attempts allowed after a failure. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

impl BackoffPolicy {
    /// Delay before reconnect attempt `attempt` (1-based): initial * 2^(attempt-1), capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        self.initial
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max)
            .min(self.max)
    }

    pub fn exhausted(&self, attempts_made: u32) -> bool {
        matches!(self.max_attempts, Some(max) if attempts_made >= max)
    }
}

/// How a single subscription session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// Shutdown was requested while the session was running.
    Cancelled,
    /// The subscription was live and the node closed the stream.
    StreamEnded,
    /// Connecting or subscribing failed; no events flowed.
    ConnectFailed(ChainError),
}

impl SessionEnd {
    fn was_established(&self) -> bool {
        matches!(self, SessionEnd::StreamEnded)
    }
}

/// One session setup call, bounded by `timeout` and abandoned on cancellation.
/// Failures end the session as `ConnectFailed`.
pub async fn setup_step<F, T, E>(
    cancel: &CancellationToken,
    timeout: Duration,
    method: &'static str,
    step: F,
) -> Result<T, SessionEnd>
where
    F: IntoFuture<Output = Result<T, E>>,
    E: Display,
{
    let step = step.into_future();
    tokio::select! {
        _ = cancel.cancelled() => Err(SessionEnd::Cancelled),
        res = tokio::time::timeout(timeout, step) => match res {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(SessionEnd::ConnectFailed(ChainError::Connection(format!(
                "{method}: {e}"
            )))),
            Err(_) => Err(SessionEnd::ConnectFailed(ChainError::Timeout { method, timeout })),
        },
    }
}

/// Run `session` until cancelled, reconnecting with backoff in between.
///
/// Returns `Ok(())` on cancellation and `ChainError::Exhausted` once the
/// retry budget is spent. A session that got as far as subscribing resets the
/// attempt counter.
pub async fn supervise<F, Fut>(
    policy: &BackoffPolicy,
    cancel: &CancellationToken,
    status_tx: &mpsc::Sender<MonitorInput>,
    mut session: F,
) -> Result<(), ChainError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SessionEnd>,
{
    let mut attempts: u32 = 0;

    loop {
        let end = session().await;

        let reason = match end {
            SessionEnd::Cancelled => return Ok(()),
            SessionEnd::StreamEnded => "subscription stream ended".to_string(),
            SessionEnd::ConnectFailed(ref e) => e.to_string(),
        };

        if cancel.is_cancelled() {
            return Ok(());
        }

        if end.was_established() {
            attempts = 0;
            warn!(reason = %reason, "event subscription lost");
        } else {
            warn!(reason = %reason, attempts = attempts, "event subscription failed");
        }
        let _ = status_tx.try_send(MonitorInput::Source(SourceStatus::Disconnected {
            reason: reason.clone(),
        }));

        if policy.exhausted(attempts) {
            error!(attempts = attempts, last_error = %reason, "reconnect budget exhausted");
            return Err(ChainError::Exhausted {
                attempts,
                last: reason,
            });
        }

        attempts += 1;
        let delay = policy.delay(attempts);
        info!(
            attempt = attempts,
            backoff_secs = delay.as_secs_f64(),
            "reconnecting event subscription"
        );
        let _ = status_tx.try_send(MonitorInput::Source(SourceStatus::Reconnecting {
            attempt: attempts,
            delay,
        }));

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
