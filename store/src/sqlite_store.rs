//! SqliteSnapshotStore
//! --------------------
//! SQLite-backed implementation of [`SnapshotStore`].
//!
//!  - one row per contract per snapshot in `options_snapshots`
//!  - appends run inside a single transaction, so readers never see half a snapshot
//!  - `append_next` picks the snapshot time under `BEGIN IMMEDIATE`, so two
//!    writers cannot both read the same latest time and reuse it
//!  - rows that no longer decode (bad type text, negative volume) are skipped
//!    with a warning instead of failing the whole read
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use common::logger::warn_if_slow;
use common::time::SnapshotTime;
use market::types::{ContractQuote, OptionType, Snapshot};

use crate::{AppendReceipt, SnapshotStore, StoredQuote};

pub struct SqliteSnapshotStore {
    pool: SqlitePool,
    /// Serializes time allocation between writers in this process.
    write_lock: Mutex<()>,
}

impl SqliteSnapshotStore {
    /// Wraps an existing pool. The caller is responsible for [`migrate`](Self::migrate).
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
        }
    }

    /// Opens (creating if needed) the database at `url` and ensures the schema exists.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("invalid database url {url}"))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .context("failed to open snapshot database")?;

        let store = Self::from_pool(pool);
        store.migrate().await?;

        info!(url, "snapshot store ready");
        Ok(store)
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
CREATE TABLE IF NOT EXISTS options_snapshots (
  snapshot_time TEXT NOT NULL,
  symbol TEXT NOT NULL,
  type TEXT NOT NULL,
  expiry TEXT NOT NULL,
  strike REAL NOT NULL,
  volume REAL NOT NULL,
  bid REAL NOT NULL,
  ask REAL NOT NULL,
  current_price REAL
);
"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_options_snapshots_time ON options_snapshots(snapshot_time);"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    #[instrument(
        skip(self, snapshot),
        target = "store",
        fields(snapshot_time = %snapshot.taken_at(), rows = snapshot.len())
    )]
    async fn append(&self, snapshot: &Snapshot) -> anyhow::Result<()> {
        if snapshot.is_empty() {
            debug!("empty snapshot; nothing to append");
            return Ok(());
        }

        warn_if_slow("db_append_snapshot", Duration::from_millis(500), async {
            let mut tx = self.pool.begin().await?;
            insert_rows(&mut tx, snapshot.taken_at(), snapshot).await?;
            tx.commit().await?;
            anyhow::Ok(())
        })
        .await
        .context("failed to append snapshot")?;

        debug!("snapshot appended");
        Ok(())
    }

    #[instrument(
        skip(self, snapshot),
        target = "store",
        fields(rows = snapshot.len(), snapshot_time = tracing::field::Empty)
    )]
    async fn append_next(
        &self,
        snapshot: &Snapshot,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<AppendReceipt>> {
        if snapshot.is_empty() {
            debug!("empty snapshot; nothing to append");
            return Ok(None);
        }

        let _guard = self.write_lock.lock().await;

        let receipt = warn_if_slow("db_append_next_snapshot", Duration::from_millis(500), async {
            let mut conn = self.pool.acquire().await?;

            // Takes the write lock up front so the MAX read below cannot go stale.
            sqlx::query("BEGIN IMMEDIATE;").execute(&mut *conn).await?;

            let written = async {
                let previous = latest_in(&mut conn).await?;
                let taken_at = SnapshotTime::next_after(now, previous.as_ref());
                insert_rows(&mut conn, &taken_at, snapshot).await?;
                sqlx::query("COMMIT;").execute(&mut *conn).await?;
                anyhow::Ok(AppendReceipt { taken_at, previous })
            }
            .await;

            if written.is_err() {
                if let Err(e) = sqlx::query("ROLLBACK;").execute(&mut *conn).await {
                    warn!(error = %e, "rollback after failed append did not complete");
                }
            }
            written
        })
        .await
        .context("failed to append snapshot")?;

        tracing::Span::current().record("snapshot_time", receipt.taken_at.as_str());
        debug!(previous = ?receipt.previous, "snapshot appended");
        Ok(Some(receipt))
    }

    async fn latest_timestamp(&self) -> anyhow::Result<Option<SnapshotTime>> {
        let mut conn = self.pool.acquire().await?;
        latest_in(&mut conn).await
    }

    #[instrument(skip(self), target = "store", fields(snapshot_time = %at))]
    async fn rows_at(&self, at: &SnapshotTime) -> anyhow::Result<Vec<ContractQuote>> {
        let rows = sqlx::query(
            r#"
SELECT symbol, type, expiry, strike, volume, bid, ask, current_price
FROM options_snapshots
WHERE snapshot_time = ?
ORDER BY rowid;
"#,
        )
        .bind(at.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            match row_to_quote(&r) {
                Ok(q) => out.push(q),
                Err(e) => {
                    // poison-row resilience: skip but don't fail the read
                    warn!(error = %e, "skipping malformed snapshot row");
                }
            }
        }

        Ok(out)
    }

    #[instrument(skip(self), target = "store")]
    async fn all_rows(&self) -> anyhow::Result<Vec<StoredQuote>> {
        let rows = warn_if_slow("db_all_rows", Duration::from_millis(500), async {
            sqlx::query(
                r#"
SELECT snapshot_time, symbol, type, expiry, strike, volume, bid, ask, current_price
FROM options_snapshots
ORDER BY snapshot_time, rowid;
"#,
            )
            .fetch_all(&self.pool)
            .await
        })
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            match row_to_stored(&r) {
                Ok(s) => out.push(s),
                Err(e) => {
                    warn!(error = %e, "skipping malformed snapshot row");
                }
            }
        }

        Ok(out)
    }

    async fn snapshot_times(&self) -> anyhow::Result<Vec<SnapshotTime>> {
        let rows = sqlx::query(
            "SELECT DISTINCT snapshot_time FROM options_snapshots ORDER BY snapshot_time;",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            let raw: String = r.try_get("snapshot_time")?;
            match raw.parse::<SnapshotTime>() {
                Ok(t) => out.push(t),
                Err(e) => warn!(error = %e, raw, "skipping malformed snapshot_time"),
            }
        }

        Ok(out)
    }
}

/* =========================
Shared statements
========================= */

async fn latest_in(conn: &mut SqliteConnection) -> anyhow::Result<Option<SnapshotTime>> {
    let row = sqlx::query("SELECT MAX(snapshot_time) AS latest FROM options_snapshots;")
        .fetch_one(&mut *conn)
        .await?;

    let latest: Option<String> = row.try_get("latest")?;
    latest
        .map(|s| {
            s.parse::<SnapshotTime>()
                .with_context(|| format!("invalid snapshot_time {s}"))
        })
        .transpose()
}

async fn insert_rows(
    conn: &mut SqliteConnection,
    taken_at: &SnapshotTime,
    snapshot: &Snapshot,
) -> anyhow::Result<()> {
    for q in snapshot.quotes() {
        sqlx::query(
            r#"
INSERT INTO options_snapshots (
  snapshot_time, symbol, type, expiry, strike, volume, bid, ask, current_price
)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
        )
        .bind(taken_at.as_str())
        .bind(&q.symbol)
        .bind(q.option_type.as_str())
        .bind(&q.expiry)
        .bind(q.strike)
        .bind(q.volume as f64)
        .bind(q.bid)
        .bind(q.ask)
        .bind(q.current_price)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/* =========================
Row mapping + conversions
========================= */

fn row_to_quote(r: &SqliteRow) -> anyhow::Result<ContractQuote> {
    let type_str: String = r.try_get("type")?;
    let option_type = OptionType::from_str(&type_str)?;

    Ok(ContractQuote {
        symbol: r.try_get("symbol")?,
        option_type,
        expiry: r.try_get("expiry")?,
        strike: r.try_get("strike")?,
        volume: f64_to_volume(r.try_get("volume")?)?,
        bid: r.try_get("bid")?,
        ask: r.try_get("ask")?,
        current_price: r.try_get("current_price")?,
    })
}

fn row_to_stored(r: &SqliteRow) -> anyhow::Result<StoredQuote> {
    let raw: String = r.try_get("snapshot_time")?;
    let snapshot_time = raw
        .parse::<SnapshotTime>()
        .with_context(|| format!("invalid snapshot_time {raw}"))?;

    Ok(StoredQuote {
        snapshot_time,
        quote: row_to_quote(r)?,
    })
}

/* =========================
Numeric safety helpers
========================= */

fn f64_to_volume(v: f64) -> anyhow::Result<u64> {
    if !v.is_finite() || v < 0.0 {
        return Err(anyhow!("volume out of range: {v}"));
    }
    if v > u64::MAX as f64 {
        return Err(anyhow!("volume too large for u64: {v}"));
    }
    Ok(v.round() as u64)
}
