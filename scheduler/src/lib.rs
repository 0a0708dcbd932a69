//! Refresh pipeline and its background driver.
//!
//! Data flow for one cycle:
//! QuoteSource -> SnapshotBuilder -> SnapshotStore -> detector -> AlertSink

pub mod alert;
pub mod builder;
pub mod engine;
pub mod errors;
pub mod pipeline;
pub mod stats;

pub use alert::{AlertSink, LogAlertSink};
pub use builder::{BuildReport, SnapshotBuilder, SymbolWarning};
pub use engine::{RefreshScheduler, SchedulerConfig, SchedulerHandle};
pub use errors::SchedulerError;
pub use pipeline::{CycleOutcome, FetchMode, PipelineConfig, RefreshPipeline};
pub use stats::{SchedulerStats, StatsSnapshot};
