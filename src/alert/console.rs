//! One timestamped line per notification on stdout.

use super::{AlertSink, Envelope, SinkError};

use async_trait::async_trait;
use std::io::Write;
use std::sync::Mutex;

pub struct ConsoleSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleSink {
    pub fn stdout() -> Self {
        Self::with_writer(Box::new(std::io::stdout()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn render(envelope: &Envelope) -> String {
        format!(
            "{} {}",
            envelope.emitted_at.format("%Y-%m-%d %H:%M:%S%.3f UTC"),
            envelope.notification
        )
    }
}

#[async_trait]
impl AlertSink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    async fn notify(&self, envelope: &Envelope) -> Result<(), SinkError> {
        let line = Self::render(envelope);
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(out, "{line}")?;
        out.flush()?;
        Ok(())
    }
}
