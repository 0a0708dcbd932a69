//! One pass of fetch -> store -> detect -> alert.
//!
//! Shared by the background scheduler and manual "fetch now" triggers so both
//! paths use the same thresholds and the same persistence rules.

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::{Span, info, instrument, warn};

use common::time::SnapshotTime;
use market::detector::{DetectionThresholds, UnusualVolumeRecord, detect};
use store::{AppendReceipt, SnapshotStore};

use crate::alert::AlertSink;
use crate::builder::{SnapshotBuilder, SymbolWarning};

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub symbols: Vec<String>,
    pub thresholds: DetectionThresholds,
}

/// Whether a pass may reuse a fresh quote cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchMode {
    /// Drop the cache and fetch everything from the source.
    Refresh,
    /// Serve from the cache when it is still inside its staleness window.
    ReuseFresh,
}

#[derive(Clone, Debug)]
pub enum CycleOutcome {
    /// Nothing came back from the source; store and detector were skipped.
    Empty { warnings: Vec<SymbolWarning> },
    /// A fresh cache answered the pass. The rows were already recorded when
    /// they were fetched, so nothing was appended and nothing was compared.
    Reused {
        /// When the cached quotes were fetched, if the cache recorded it.
        last_fetch_time: Option<DateTime<Utc>>,
        rows: usize,
        warnings: Vec<SymbolWarning>,
    },
    Stored {
        snapshot_time: SnapshotTime,
        rows: usize,
        /// Baseline the detector compared against, if one existed.
        previous_time: Option<SnapshotTime>,
        unusual: Vec<UnusualVolumeRecord>,
        warnings: Vec<SymbolWarning>,
        /// False when the append failed; detection still ran.
        persisted: bool,
    },
}

pub struct RefreshPipeline {
    builder: SnapshotBuilder,
    store: Arc<dyn SnapshotStore>,
    alerts: Arc<dyn AlertSink>,
    cfg: PipelineConfig,
}

impl RefreshPipeline {
    pub fn new(
        builder: SnapshotBuilder,
        store: Arc<dyn SnapshotStore>,
        alerts: Arc<dyn AlertSink>,
        cfg: PipelineConfig,
    ) -> Self {
        Self {
            builder,
            store,
            alerts,
            cfg,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    /// Runs one pass at `now`.
    ///
    /// The store picks the snapshot time while appending, so passes racing on
    /// the same store never share a timestamp. A failed append is logged and
    /// the pass still completes detection against the latest stored snapshot.
    /// Errors reading that baseline abort the pass.
    #[instrument(skip(self), fields(rows = tracing::field::Empty))]
    pub async fn run_once(&self, now: DateTime<Utc>, mode: FetchMode) -> anyhow::Result<CycleOutcome> {
        if mode == FetchMode::Refresh {
            if let Some(cache) = self.builder.cache() {
                cache.invalidate();
            }
        }

        let report = self.builder.build(&self.cfg.symbols, now).await;
        Span::current().record("rows", report.snapshot.len());

        if report.snapshot.is_empty() {
            info!(
                failed = report.warnings.len(),
                "empty snapshot; nothing stored this cycle"
            );
            return Ok(CycleOutcome::Empty {
                warnings: report.warnings,
            });
        }

        if report.from_cache {
            let last_fetch_time = self.builder.cache().and_then(|c| c.last_fetch_time());
            info!(
                rows = report.snapshot.len(),
                ?last_fetch_time,
                "served from fresh cache; nothing new to store"
            );
            return Ok(CycleOutcome::Reused {
                last_fetch_time,
                rows: report.snapshot.len(),
                warnings: report.warnings,
            });
        }

        let (snapshot, previous_time, persisted) =
            match self.store.append_next(&report.snapshot, now).await {
                Ok(Some(AppendReceipt { taken_at, previous })) => {
                    (report.snapshot.retimed(taken_at), previous, true)
                }
                // `None` only comes back for an empty snapshot, ruled out above.
                other => {
                    if let Err(e) = other {
                        warn!(error = ?e, "snapshot append failed; continuing without persistence");
                    }
                    let previous = self
                        .store
                        .latest_timestamp()
                        .await
                        .context("failed to look up latest snapshot time")?;
                    let taken_at = SnapshotTime::next_after(now, previous.as_ref());
                    (report.snapshot.retimed(taken_at), previous, false)
                }
            };

        let previous = match &previous_time {
            Some(t) => self
                .store
                .rows_at(t)
                .await
                .with_context(|| format!("failed to load snapshot {t}"))?,
            None => Vec::new(),
        };

        let unusual = detect(snapshot.quotes(), &previous, &self.cfg.thresholds);

        if !unusual.is_empty() {
            if let Err(e) = self.alerts.alert(&unusual).await {
                warn!(error = ?e, "alert sink failed");
            }
        }

        info!(
            snapshot_time = %snapshot.taken_at(),
            rows = snapshot.len(),
            baseline = previous.len(),
            unusual = unusual.len(),
            persisted,
            "snapshot stored"
        );

        Ok(CycleOutcome::Stored {
            snapshot_time: snapshot.taken_at().clone(),
            rows: snapshot.len(),
            previous_time,
            unusual,
            warnings: report.warnings,
            persisted,
        })
    }
}
