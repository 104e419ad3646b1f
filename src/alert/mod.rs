//! Operator-facing notifications.
//!
//! Everything the monitor has to tell a human goes through here:
//! - `Alert`: an incident started or ended, or the system was paused
//! - `Record`: informational lines (logged transactions, status polls, startup reads)
//! - `Diagnostic`: decode failures, poll failures, connection changes
//! - `ServiceStopped`: the monitor gave up and is exiting
//!
//! Notifications are stamped when emitted and handed to a dispatcher task
//! (see [`dispatch`]) that fans them out to every configured [`AlertSink`].

pub mod console;
pub mod dispatch;
pub mod webhook;

pub use console::ConsoleSink;
pub use dispatch::{AlertDispatcher, Notifier};
pub use webhook::WebhookSink;

use crate::onchain::types::{RecordedTx, StatusSnapshot, TrapSettings};
use crate::state::{DetectionSource, Transition};

use alloy::primitives::{utils::format_ether, Address, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Pass-through information shown to the operator without changing state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InformationalRecord {
    Transaction {
        from: Address,
        amount: U256,
        block_number: u64,
    },
    Status {
        snapshot: StatusSnapshot,
        under_attack: bool,
    },
    /// A detection folded into an already open incident.
    Corroborated {
        incident: u64,
        source: DetectionSource,
        block_number: u64,
        detections: u32,
    },
    TrapSettings(TrapSettings),
    RecentEntries {
        total: U256,
        entries: Vec<RecordedTx>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Alert(Transition),
    Record(InformationalRecord),
    Diagnostic { severity: Severity, message: String },
    ServiceStopped { reason: String },
}

impl Notification {
    pub fn diagnostic(severity: Severity, message: impl Into<String>) -> Self {
        Notification::Diagnostic {
            severity,
            message: message.into(),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Notification::Alert(_) | Notification::ServiceStopped { .. } => Severity::Critical,
            Notification::Record(_) => Severity::Info,
            Notification::Diagnostic { severity, .. } => *severity,
        }
    }

    /// Short machine-readable tag, used in webhook payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Alert(Transition::IncidentStarted { .. }) => "incident_started",
            Notification::Alert(Transition::IncidentEnded { .. }) => "incident_ended",
            Notification::Alert(Transition::Paused { .. }) => "emergency_pause",
            Notification::Record(InformationalRecord::Transaction { .. }) => "transaction",
            Notification::Record(InformationalRecord::Status { .. }) => "status",
            Notification::Record(InformationalRecord::Corroborated { .. }) => "corroborated",
            Notification::Record(InformationalRecord::TrapSettings(_)) => "trap_settings",
            Notification::Record(InformationalRecord::RecentEntries { .. }) => "recent_entries",
            Notification::Diagnostic { .. } => "diagnostic",
            Notification::ServiceStopped { .. } => "service_stopped",
        }
    }
}

impl std::fmt::Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notification::Alert(Transition::IncidentStarted {
                sequence,
                source,
                block_number,
                dust_count,
                threshold,
            }) => {
                write!(f, "🚨 ALERT: DUST ATTACK DETECTED! incident #{sequence} via {source} at block {block_number}")?;
                match (dust_count, threshold) {
                    (Some(d), Some(t)) => write!(f, " | dust transactions: {d}/{t}")?,
                    (Some(d), None) => write!(f, " | total dust transactions: {d}")?,
                    _ => {}
                }
                match source {
                    DetectionSource::DetectedEvent { message } => write!(f, " | message: {message}")?,
                    DetectionSource::AlertEvent { unique_senders, .. } => {
                        write!(f, " | unique senders: {unique_senders}")?
                    }
                    DetectionSource::Poll => {}
                }
                write!(f, " | Take immediate action!")
            }
            Notification::Alert(Transition::IncidentEnded {
                started_sequence,
                block_number,
                dust_count,
                threshold,
                suppressed,
                duration,
                ..
            }) => write!(
                f,
                "✅ Dust attack cleared: incident #{started_sequence} ended at block {block_number} | dust transactions: {dust_count}/{threshold} | {suppressed} duplicate detections | lasted {}s",
                duration.num_seconds()
            ),
            Notification::Alert(Transition::Paused {
                reason,
                block_number,
                timestamp,
                ..
            }) => write!(
                f,
                "⛔ EMERGENCY PAUSE: {reason} (block {block_number}, timestamp {timestamp})"
            ),
            Notification::Record(record) => match record {
                InformationalRecord::Transaction {
                    from,
                    amount,
                    block_number,
                } => write!(
                    f,
                    "💧 Dust logged: {from} sent {} ETH at block {block_number}",
                    format_ether(*amount)
                ),
                InformationalRecord::Status {
                    snapshot,
                    under_attack,
                } => write!(
                    f,
                    "Status: {}/{} dust transactions | Under attack: {under_attack} (block {})",
                    snapshot.dust_count, snapshot.threshold, snapshot.observed_at_block
                ),
                InformationalRecord::Corroborated {
                    incident,
                    source,
                    block_number,
                    detections,
                } => write!(
                    f,
                    "Detection via {source} at block {block_number} folded into incident #{incident} ({detections} detections)"
                ),
                InformationalRecord::TrapSettings(settings) => {
                    write!(f, "Trap settings: {settings}")
                }
                InformationalRecord::RecentEntries { total, entries } => {
                    write!(f, "Recorder holds {total} entries")?;
                    if !entries.is_empty() {
                        write!(f, "; last {}:", entries.len())?;
                        for (i, e) in entries.iter().enumerate() {
                            let sep = if i == 0 { " " } else { ", " };
                            write!(
                                f,
                                "{sep}{} sent {} ETH at block {}",
                                e.sender,
                                format_ether(e.amount),
                                e.block_number
                            )?;
                        }
                    }
                    Ok(())
                }
            },
            Notification::Diagnostic { severity, message } => write!(f, "[{severity}] {message}"),
            Notification::ServiceStopped { reason } => write!(f, "🛑 Monitoring stopped: {reason}"),
        }
    }
}

/// A notification stamped with its emission time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub emitted_at: DateTime<Utc>,
    pub notification: Notification,
}

impl Envelope {
    pub fn now(notification: Notification) -> Self {
        Self {
            emitted_at: Utc::now(),
            notification,
        }
    }

    pub fn severity(&self) -> Severity {
        self.notification.severity()
    }
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("webhook returned {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
}

/// A destination for notifications. Sinks must not block for long; the
/// dispatcher bounds each delivery with a timeout anyway.
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;

    /// Lowest severity this sink wants to receive.
    fn min_severity(&self) -> Severity {
        Severity::Info
    }

    async fn notify(&self, envelope: &Envelope) -> Result<(), SinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    #[test]
    fn test_severity_order_and_parse() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Critical);
        #[derive(Deserialize)]
        struct Wrap {
            s: Severity,
        }
        let w: Wrap = toml::from_str(r#"s = "warning""#).unwrap();
        assert_eq!(w.s, Severity::Warning);
    }

    #[test]
    fn test_alerts_are_critical() {
        let started = Notification::Alert(Transition::IncidentStarted {
            sequence: 1,
            source: DetectionSource::Poll,
            block_number: 10,
            dust_count: Some(U256::from(20u64)),
            threshold: Some(U256::from(15u64)),
        });
        assert_eq!(started.severity(), Severity::Critical);
        assert_eq!(started.kind(), "incident_started");
        let diag = Notification::diagnostic(Severity::Warning, "poll failed");
        assert_eq!(diag.severity(), Severity::Warning);
        assert_eq!(diag.to_string(), "[warning] poll failed");
    }

    #[test]
    fn test_renders_dust_and_status_lines() {
        let tx = Notification::Record(InformationalRecord::Transaction {
            from: address!("00000000000000000000000000000000000000aa"),
            amount: U256::from(1_000_000_000_000u64),
            block_number: 77,
        });
        let line = tx.to_string();
        assert!(line.starts_with("💧 Dust logged: 0x"));
        assert!(line.contains(" sent 0.000001"));
        assert!(line.ends_with(" ETH at block 77"));

        let status = Notification::Record(InformationalRecord::Status {
            snapshot: StatusSnapshot {
                dust_count: U256::from(3u64),
                threshold: U256::from(15u64),
                would_trigger: false,
                observed_at_block: 90,
                observed_at: Utc::now(),
            },
            under_attack: false,
        });
        assert_eq!(
            status.to_string(),
            "Status: 3/15 dust transactions | Under attack: false (block 90)"
        );
    }

    #[test]
    fn test_renders_detection_message() {
        let n = Notification::Alert(Transition::IncidentStarted {
            sequence: 4,
            source: DetectionSource::DetectedEvent {
                message: "Dust attack detected!".to_string(),
            },
            block_number: 500,
            dust_count: Some(U256::from(20u64)),
            threshold: None,
        });
        let line = n.to_string();
        assert!(line.starts_with("🚨 ALERT: DUST ATTACK DETECTED! incident #4"));
        assert!(line.contains("total dust transactions: 20"));
        assert!(line.contains("message: Dust attack detected!"));
    }
}
