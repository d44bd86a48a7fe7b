// =============================================================================
// Alert Sink Fanout (C10)
// =============================================================================
//
// Notifier and AlertLog are external collaborators (chat delivery and
// spreadsheet/log rendering are out of scope); this module only owns the
// fanout ordering: log append precedes enrichment enqueue, and a failed log
// append drops the alert rather than enqueueing it anyway.

use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::error::Result;
use crate::model::{Alert, EnrichmentRecord};

/// Best-effort delivery of an emitted alert to a human-facing channel.
/// Failures are logged but never fatal to the fanout.
#[allow(async_fn_in_trait)]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<()>;
}

/// Durable, monotonically-row-numbered append log of emitted alerts.
#[allow(async_fn_in_trait)]
pub trait AlertLog: Send + Sync {
    /// Append `alert` and return the row id assigned to it.
    async fn append(&self, alert: &Alert) -> Result<u64>;
}

/// Wires an emitted alert through the notifier, the log, and the
/// enrichment queue, in the ordering spec.md §4.9 requires.
pub struct AlertFanout<N, L> {
    notifier: N,
    log: L,
    enrichment_tx: mpsc::UnboundedSender<EnrichmentRecord>,
}

impl<N: Notifier, L: AlertLog> AlertFanout<N, L> {
    pub fn new(notifier: N, log: L, enrichment_tx: mpsc::UnboundedSender<EnrichmentRecord>) -> Self {
        Self { notifier, log, enrichment_tx }
    }

    /// Dispatch one alert. Returns the assigned row id, or `None` if the
    /// log append failed (the alert is dropped — no enrichment record is
    /// created for it).
    pub async fn dispatch(&self, mut alert: Alert) -> Option<u64> {
        if let Err(e) = self.notifier.notify(&alert).await {
            warn!(instrument = %alert.instrument, kind = %alert.kind, error = %e, "notifier delivery failed");
        }

        let row_id = match self.log.append(&alert).await {
            Ok(id) => id,
            Err(e) => {
                error!(instrument = %alert.instrument, kind = %alert.kind, error = %e, "alert log append failed, dropping alert");
                return None;
            }
        };
        alert.row_id = Some(row_id);

        let record = EnrichmentRecord::new(row_id, alert.instrument.clone(), alert.timestamp);
        if self.enrichment_tx.send(record).is_err() {
            warn!(row_id, "enrichment queue closed, alert will not be enriched");
        }

        Some(row_id)
    }
}
