//! Messages flowing from the producer tasks into the reconciliation loop.

use crate::onchain::types::{RawEvent, StatusSnapshot};
use crate::onchain::ChainError;

use std::time::Duration;

#[derive(Debug)]
pub enum MonitorInput {
    /// A live log from the subscription, not yet decoded.
    Log(RawEvent),
    /// A successful getStatus() poll.
    Poll(StatusSnapshot),
    /// A poll cycle that failed and was skipped.
    PollFailed(ChainError),
    /// Subscription connection changes.
    Source(SourceStatus),
    /// The subscription gave up reconnecting.
    SourceFailed(ChainError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStatus {
    Connected { head_block: Option<u64> },
    Disconnected { reason: String },
    Reconnecting { attempt: u32, delay: Duration },
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceStatus::Connected {
                head_block: Some(block),
            } => write!(f, "Subscribed to trap events at head block {block}"),
            SourceStatus::Connected { head_block: None } => write!(f, "Subscribed to trap events"),
            SourceStatus::Disconnected { reason } => write!(f, "Event subscription lost: {reason}"),
            SourceStatus::Reconnecting { attempt, delay } => write!(
                f,
                "Reconnecting event subscription (attempt {attempt}) in {:.1}s",
                delay.as_secs_f64()
            ),
        }
    }
}
