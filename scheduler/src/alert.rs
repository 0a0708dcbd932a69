use async_trait::async_trait;
use tracing::info;

use market::detector::{UnusualVolumeRecord, format_ratio};

/// Receives the unusual-volume table produced by a refresh.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn alert(&self, records: &[UnusualVolumeRecord]) -> anyhow::Result<()>;
}

/// Writes the top records (by delta) to the log.
pub struct LogAlertSink {
    top_n: usize,
}

impl LogAlertSink {
    pub fn new(top_n: usize) -> Self {
        Self { top_n: top_n.max(1) }
    }
}

impl Default for LogAlertSink {
    fn default() -> Self {
        Self::new(5)
    }
}

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn alert(&self, records: &[UnusualVolumeRecord]) -> anyhow::Result<()> {
        if records.is_empty() {
            info!(target: "alert", "no unusual volume found");
            return Ok(());
        }

        info!(
            target: "alert",
            total = records.len(),
            shown = records.len().min(self.top_n),
            "unusual volume detected"
        );

        // Records arrive sorted by delta, largest first.
        for r in records.iter().take(self.top_n) {
            info!(
                target: "alert",
                contract = %r.key,
                previous_volume = r.previous_volume,
                current_volume = r.current_volume,
                delta = r.delta,
                ratio = %format_ratio(r.ratio),
                bid = ?r.bid,
                ask = ?r.ask,
                current_price = ?r.current_price,
                "unusual contract"
            );
        }

        Ok(())
    }
}
