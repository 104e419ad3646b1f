//! Notification fan-out task.
//!
//! The reconciliation loop never awaits a sink: it pushes envelopes into an
//! unbounded channel through a [`Notifier`], and a single dispatcher task
//! delivers each one to every sink in turn. Each delivery is bounded by a
//! timeout; failures are logged and dropped.

use super::{AlertSink, Envelope, Notification, SinkError};

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Cheap handle for emitting notifications.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl Notifier {
    /// Stamp `notification` with the current time and queue it.
    pub fn send(&self, notification: Notification) {
        if self.tx.send(Envelope::now(notification)).is_err() {
            debug!("alert dispatcher gone, notification dropped");
        }
    }
}

pub struct AlertDispatcher {
    sinks: Vec<Arc<dyn AlertSink>>,
    timeout: Duration,
}

impl AlertDispatcher {
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>, timeout: Duration) -> Self {
        Self { sinks, timeout }
    }

    /// Start the dispatcher. It runs until every `Notifier` clone is dropped
    /// and the queue is drained.
    pub fn spawn(self) -> (Notifier, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        let handle = tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                self.deliver(&envelope).await;
            }
            debug!("alert dispatcher drained");
        });
        (Notifier { tx }, handle)
    }

    async fn deliver(&self, envelope: &Envelope) {
        let severity = envelope.severity();
        let deliveries = self
            .sinks
            .iter()
            .filter(|sink| severity >= sink.min_severity())
            .map(|sink| async move {
                let result = match tokio::time::timeout(self.timeout, sink.notify(envelope)).await {
                    Ok(r) => r,
                    Err(_) => Err(SinkError::Timeout(self.timeout)),
                };
                if let Err(e) = result {
                    warn!(
                        sink = sink.name(),
                        kind = envelope.notification.kind(),
                        error = %e,
                        "alert delivery failed"
                    );
                }
            });
        join_all(deliveries).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::Severity;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<Envelope>>,
        min: Option<Severity>,
    }

    #[async_trait]
    impl AlertSink for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn min_severity(&self) -> Severity {
            self.min.unwrap_or(Severity::Info)
        }

        async fn notify(&self, envelope: &Envelope) -> Result<(), SinkError> {
            self.seen.lock().unwrap().push(envelope.clone());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl AlertSink for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn notify(&self, _envelope: &Envelope) -> Result<(), SinkError> {
            Err(SinkError::Rejected {
                status: 500,
                body: "boom".to_string(),
            })
        }
    }

    struct Hanging;

    #[async_trait]
    impl AlertSink for Hanging {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn notify(&self, _envelope: &Envelope) -> Result<(), SinkError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn diag(msg: &str) -> Notification {
        Notification::diagnostic(Severity::Info, msg)
    }

    #[tokio::test]
    async fn test_delivers_in_order() {
        let rec = Arc::new(Recording::default());
        let (notifier, handle) =
            AlertDispatcher::new(vec![rec.clone() as Arc<dyn AlertSink>], Duration::from_secs(1))
                .spawn();

        for i in 0..5 {
            notifier.send(diag(&format!("n{i}")));
        }
        drop(notifier);
        handle.await.unwrap();

        let seen: Vec<String> = rec
            .seen
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.notification.to_string())
            .collect();
        assert_eq!(seen, vec!["[info] n0", "[info] n1", "[info] n2", "[info] n3", "[info] n4"]);
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_block_others() {
        let rec = Arc::new(Recording::default());
        let (notifier, handle) =
            AlertDispatcher::new(vec![Arc::new(Failing) as Arc<dyn AlertSink>, rec.clone()], Duration::from_secs(1))
                .spawn();
        notifier.send(diag("a"));
        notifier.send(diag("b"));
        drop(notifier);
        handle.await.unwrap();
        assert_eq!(rec.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_sink_times_out() {
        let rec = Arc::new(Recording::default());
        let (notifier, handle) =
            AlertDispatcher::new(vec![Arc::new(Hanging) as Arc<dyn AlertSink>, rec.clone()], Duration::from_secs(5))
                .spawn();
        notifier.send(diag("a"));
        notifier.send(diag("b"));
        drop(notifier);
        handle.await.unwrap();
        assert_eq!(rec.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_min_severity_filters() {
        let rec = Arc::new(Recording {
            min: Some(Severity::Warning),
            ..Recording::default()
        });
        let (notifier, handle) =
            AlertDispatcher::new(vec![rec.clone() as Arc<dyn AlertSink>], Duration::from_secs(1))
                .spawn();
        notifier.send(diag("quiet"));
        notifier.send(Notification::diagnostic(Severity::Warning, "loud"));
        notifier.send(Notification::ServiceStopped {
            reason: "x".to_string(),
        });
        drop(notifier);
        handle.await.unwrap();

        let kinds: Vec<&'static str> = rec
            .seen
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.notification.kind())
            .collect();
        assert_eq!(kinds, vec!["diagnostic", "service_stopped"]);
    }
}
