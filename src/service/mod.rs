//! Monitor lifecycle.
//!
//! Wires the two producers (log subscription, status poller) into one bounded
//! channel and runs the reconciliation loop that owns `AttackState`. Every
//! outcome is handed to the alert dispatcher; reconciliation never waits on a
//! sink.
//!
//! Startup reads (trap settings, recent recorder entries) run beside the
//! producers and never delay the subscription.
//!
//! Shutdown:
//! 1. cancel the producers and abandon any unfinished startup reads
//! 2. keep reconciling until they have exited, bounded by the grace period
//! 3. close the notifier and let the dispatcher drain, bounded by the grace period

mod input;

pub use input::{MonitorInput, SourceStatus};

use crate::alert::{
    AlertDispatcher, AlertSink, ConsoleSink, InformationalRecord, Notification, Notifier,
    Severity, SinkError, WebhookSink,
};
use crate::config::{Config, ConfigError};
use crate::onchain::{decode, ChainClient, ChainError, ContractReader, EventSource, RawEvent};
use crate::poller::Poller;
use crate::state::{Applied, AttackState, Record};

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to set up alert sink: {0}")]
    Sink(#[from] SinkError),
    #[error("monitoring stopped: {0}")]
    Fatal(ChainError),
}

/// Timing and sizing knobs for one service run.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub call_timeout: Duration,
    pub shutdown_grace: Duration,
    pub notify_timeout: Duration,
    /// Recorder entries to show at startup; 0 skips the read.
    pub recent_entries: u64,
    pub channel_capacity: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            call_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(5),
            notify_timeout: Duration::from_secs(5),
            recent_entries: 5,
            channel_capacity: 1024,
        }
    }
}

impl MonitorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.monitor.poll_interval(),
            call_timeout: config.monitor.call_timeout(),
            shutdown_grace: config.monitor.shutdown_grace(),
            notify_timeout: Duration::from_millis(config.alerts.notify_timeout_ms),
            recent_entries: config.monitor.recent_entries_on_startup,
            channel_capacity: config.monitor.channel_capacity,
        }
    }
}

pub struct MonitorService {
    settings: MonitorSettings,
    source: Arc<dyn EventSource>,
    reader: Arc<dyn ContractReader>,
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl MonitorService {
    pub fn new(
        settings: MonitorSettings,
        source: Arc<dyn EventSource>,
        reader: Arc<dyn ContractReader>,
        sinks: Vec<Arc<dyn AlertSink>>,
    ) -> Self {
        Self {
            settings,
            source,
            reader,
            sinks,
        }
    }

    /// Build the production service: one `ChainClient` serving both the
    /// subscription and the poller, plus the configured sinks.
    pub fn from_config(config: &Config) -> Result<Self, ServiceError> {
        let client = Arc::new(ChainClient::from_config(config)?);
        let settings = MonitorSettings::from_config(config);

        let mut sinks: Vec<Arc<dyn AlertSink>> = Vec::new();
        if config.alerts.console {
            sinks.push(Arc::new(ConsoleSink::stdout()));
        }
        if let Some(url) = config
            .alerts
            .webhook_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
        {
            sinks.push(Arc::new(WebhookSink::new(
                url.to_string(),
                config.alerts.webhook_min_severity,
                settings.notify_timeout,
            )?));
            info!(min_severity = %config.alerts.webhook_min_severity, "webhook alerts enabled");
        }
        if sinks.is_empty() {
            warn!("no alert sinks configured, notifications will only reach the log");
        }

        Ok(Self::new(settings, client.clone(), client, sinks))
    }

    /// Run until `shutdown` fires (Ok) or the subscription exhausts its
    /// reconnect budget (`ServiceError::Fatal`, after a "monitoring stopped"
    /// notification).
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ServiceError> {
        let MonitorService {
            settings,
            source,
            reader,
            sinks,
        } = self;

        let (notifier, mut dispatcher) =
            AlertDispatcher::new(sinks, settings.notify_timeout).spawn();

        info!("🔍 Monitoring for dust attacks...");
        notifier.send(Notification::diagnostic(
            Severity::Info,
            "🔍 Monitoring for dust attacks...",
        ));

        // ─── Producers ───
        let producers = shutdown.child_token();
        let (tx, mut rx) = mpsc::channel(settings.channel_capacity);

        let source_task = {
            let tx = tx.clone();
            let cancel = producers.clone();
            tokio::spawn(async move {
                if let Err(e) = source.run(tx.clone(), cancel).await {
                    let _ = tx.send(MonitorInput::SourceFailed(e)).await;
                }
            })
        };
        let poller = Poller::new(reader.clone(), settings.poll_interval, settings.call_timeout);
        let poller_task = tokio::spawn(poller.run(tx, producers.clone()));

        // Startup reads run beside the producers and are abandoned on shutdown.
        let startup_task = {
            let settings = settings.clone();
            let notifier = notifier.clone();
            let cancel = producers.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = report_startup(reader.as_ref(), &settings, &notifier) => {}
                }
            })
        };

        // ─── Reconciliation ───
        let mut reconciler = Reconciler::new(notifier);
        let fatal = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break None,
                input = rx.recv() => match input {
                    Some(input) => {
                        if let Some(e) = reconciler.handle(input) {
                            break Some(e);
                        }
                    }
                    None => break None,
                },
            }
        };

        // ─── Shutdown ───
        producers.cancel();
        startup_task.abort();
        let _ = startup_task.await;
        let drained = tokio::time::timeout(settings.shutdown_grace, async {
            while let Some(input) = rx.recv().await {
                if let Some(e) = reconciler.handle(input) {
                    debug!(error = %e, "ignoring source failure during shutdown");
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                grace_ms = settings.shutdown_grace.as_millis() as u64,
                "producers still running after grace period, aborting"
            );
            source_task.abort();
            poller_task.abort();
        }

        let result = match fatal {
            Some(e) => {
                error!(error = %e, "monitoring stopped");
                reconciler.notifier.send(Notification::ServiceStopped {
                    reason: e.to_string(),
                });
                Err(ServiceError::Fatal(e))
            }
            None => {
                info!(
                    incidents = reconciler.state.sequence(),
                    under_attack = reconciler.state.under_attack(),
                    "monitor shut down"
                );
                reconciler.notifier.send(Notification::diagnostic(
                    Severity::Info,
                    "Monitoring stopped: shutdown requested",
                ));
                Ok(())
            }
        };

        drop(reconciler);
        if tokio::time::timeout(settings.shutdown_grace, &mut dispatcher)
            .await
            .is_err()
        {
            warn!("alert dispatcher did not drain within grace period");
            dispatcher.abort();
        }

        result
    }
}

/// Sole owner of `AttackState`; applies inputs one at a time.
struct Reconciler {
    state: AttackState,
    notifier: Notifier,
}

impl Reconciler {
    fn new(notifier: Notifier) -> Self {
        Self {
            state: AttackState::new(),
            notifier,
        }
    }

    /// Apply one input. Returns the error when the subscription has given up.
    fn handle(&mut self, input: MonitorInput) -> Option<ChainError> {
        match input {
            MonitorInput::Log(raw) => self.on_log(&raw),
            MonitorInput::Poll(snapshot) => {
                let applied = self.state.apply_poll(snapshot);
                self.route(applied);
            }
            MonitorInput::PollFailed(e) => {
                self.notifier.send(Notification::diagnostic(
                    Severity::Warning,
                    format!("Error checking status: {e}"),
                ));
            }
            MonitorInput::Source(status) => {
                let severity = match status {
                    SourceStatus::Disconnected { .. } => Severity::Warning,
                    SourceStatus::Connected { .. } | SourceStatus::Reconnecting { .. } => {
                        Severity::Info
                    }
                };
                self.notifier
                    .send(Notification::diagnostic(severity, status.to_string()));
            }
            MonitorInput::SourceFailed(e) => return Some(e),
        }
        None
    }

    fn on_log(&mut self, raw: &RawEvent) {
        match decode(raw) {
            Ok(event) => {
                debug!(event = %event, block = event.block_number(), "trap event");
                let applied = self.state.apply_event(&event, Utc::now());
                self.route(applied);
            }
            Err(e) => {
                warn!(
                    contract = %raw.address,
                    block = ?raw.block_number,
                    error = %e,
                    "discarding undecodable log"
                );
                let block = raw
                    .block_number
                    .map_or_else(|| "unknown".to_string(), |b| b.to_string());
                self.notifier.send(Notification::diagnostic(
                    Severity::Warning,
                    format!("Discarded log from {} at block {block}: {e}", raw.address),
                ));
            }
        }
    }

    fn route(&self, applied: Applied) {
        let notification = match applied {
            Applied::Transition(t) => Notification::Alert(t),
            Applied::Record(Record::Transaction {
                from,
                amount,
                block_number,
            }) => Notification::Record(InformationalRecord::Transaction {
                from,
                amount,
                block_number,
            }),
            Applied::Record(Record::Status(snapshot)) => {
                Notification::Record(InformationalRecord::Status {
                    snapshot,
                    under_attack: self.state.under_attack(),
                })
            }
            Applied::Record(Record::Corroborated {
                incident,
                source,
                block_number,
                detections,
            }) => Notification::Record(InformationalRecord::Corroborated {
                incident,
                source,
                block_number,
                detections,
            }),
            Applied::Stale { .. } => return,
        };
        self.notifier.send(notification);
    }
}

async fn bounded<T>(
    timeout: Duration,
    method: &'static str,
    call: impl Future<Output = Result<T, ChainError>>,
) -> Result<T, ChainError> {
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| ChainError::Timeout { method, timeout })?
}

/// Best-effort startup reads: trap constants and the most recent recorder
/// entries. Failures become diagnostics.
async fn report_startup(reader: &dyn ContractReader, settings: &MonitorSettings, notifier: &Notifier) {
    let timeout = settings.call_timeout;

    match bounded(timeout, "trap settings", reader.trap_settings()).await {
        Ok(trap) => {
            info!(settings = %trap, "trap settings");
            notifier.send(Notification::Record(InformationalRecord::TrapSettings(trap)));
        }
        Err(e) => notifier.send(Notification::diagnostic(
            Severity::Warning,
            format!("Could not read trap settings: {e}"),
        )),
    }

    if settings.recent_entries == 0 {
        return;
    }

    let total = match bounded(timeout, "getEntryCount", reader.get_entry_count()).await {
        Ok(n) => n,
        Err(e) => {
            notifier.send(Notification::diagnostic(
                Severity::Warning,
                format!("Could not read recorder entry count: {e}"),
            ));
            return;
        }
    };

    // getLast reverts when asked for more entries than exist.
    let k = u64::try_from(total)
        .unwrap_or(u64::MAX)
        .min(settings.recent_entries);
    let entries = if k == 0 {
        Vec::new()
    } else {
        match bounded(timeout, "getLast", reader.get_last(k)).await {
            Ok(entries) => entries,
            Err(e) => {
                notifier.send(Notification::diagnostic(
                    Severity::Warning,
                    format!("Could not read recent recorder entries: {e}"),
                ));
                return;
            }
        }
    };

    info!(total = %total, shown = entries.len(), "recorder entries");
    notifier.send(Notification::Record(InformationalRecord::RecentEntries {
        total,
        entries,
    }));
}
