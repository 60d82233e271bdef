//! Buffered, non-blocking audit writer.

use std::sync::Arc;
use std::time::Duration;

use tokenbridge_core::ports::AuditSink;
use tokenbridge_domain::AuditEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::database::AuditWriter;

const WRITE_ATTEMPTS: usize = 3;
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Decouples audit recording from request latency: `record` pushes onto an
/// unbounded channel and returns; a writer task drains the channel into the
/// durable store, retrying transient failures.
///
/// Events are never dropped silently: a write that keeps failing after the
/// retry budget is logged at error level with the full event context.
pub struct BufferedAuditSink {
    tx: std::sync::Mutex<Option<mpsc::UnboundedSender<AuditEvent>>>,
    writer: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl BufferedAuditSink {
    pub fn new(writer: Arc<dyn AuditWriter>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(drain(rx, writer));
        Self {
            tx: std::sync::Mutex::new(Some(tx)),
            writer: std::sync::Mutex::new(Some(handle)),
        }
    }

    /// Close the channel and wait for the writer to flush everything queued.
    pub async fn shutdown(&self) {
        drop(lock(&self.tx).take());
        let handle = lock(&self.writer).take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(error = %err, "audit writer task did not shut down cleanly");
            }
        }
    }
}

fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl AuditSink for BufferedAuditSink {
    fn record(&self, event: AuditEvent) {
        let sent = lock(&self.tx).as_ref().map(|tx| tx.send(event).is_ok());
        if sent != Some(true) {
            error!("audit channel closed, event lost");
        }
    }
}

async fn drain(mut rx: mpsc::UnboundedReceiver<AuditEvent>, writer: Arc<dyn AuditWriter>) {
    while let Some(event) = rx.recv().await {
        let mut last_err = None;
        for attempt in 0..WRITE_ATTEMPTS {
            match writer.append(&event).await {
                Ok(()) => {
                    last_err = None;
                    break;
                }
                Err(err) => {
                    last_err = Some(err);
                    if attempt + 1 < WRITE_ATTEMPTS {
                        tokio::time::sleep(WRITE_RETRY_DELAY).await;
                    }
                }
            }
        }
        if let Some(err) = last_err {
            error!(
                action = event.action.as_str(),
                event_id = %event.id,
                error = %err,
                "audit event could not be persisted"
            );
        }
    }
}
