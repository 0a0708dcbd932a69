//! Append-only snapshot log.
//!
//! Every fetch pass lands here as one batch of rows sharing a timestamp.
//! There is no update or delete: the table is the audit history that volume
//! comparisons and the flow view read from.

pub mod sqlite_store;

use chrono::{DateTime, Utc};
use common::time::SnapshotTime;
use market::types::{ContractQuote, Snapshot};

pub use sqlite_store::SqliteSnapshotStore;

/// Where [`SnapshotStore::append_next`] placed a snapshot in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendReceipt {
    /// Time the rows were recorded under.
    pub taken_at: SnapshotTime,
    /// Newest snapshot before this one, read in the same transaction.
    pub previous: Option<SnapshotTime>,
}

/// A quote together with the snapshot it was recorded under.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredQuote {
    pub snapshot_time: SnapshotTime,
    pub quote: ContractQuote,
}

#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persists all rows of `snapshot` atomically. Empty snapshots are ignored.
    async fn append(&self, snapshot: &Snapshot) -> anyhow::Result<()>;

    /// Appends `snapshot` under `max(now, latest + 1s)`, choosing the time and
    /// writing the rows as one atomic step so concurrent writers never share
    /// a timestamp. Returns `None` for an empty snapshot.
    async fn append_next(
        &self,
        snapshot: &Snapshot,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<AppendReceipt>>;

    async fn latest_timestamp(&self) -> anyhow::Result<Option<SnapshotTime>>;

    /// Rows recorded under `at`, in insertion order. Unknown times yield nothing.
    async fn rows_at(&self, at: &SnapshotTime) -> anyhow::Result<Vec<ContractQuote>>;

    /// Whole log, oldest snapshot first.
    async fn all_rows(&self) -> anyhow::Result<Vec<StoredQuote>>;

    /// Distinct snapshot times, oldest first.
    async fn snapshot_times(&self) -> anyhow::Result<Vec<SnapshotTime>>;
}
