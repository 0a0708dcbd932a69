//! Read-side views over the snapshot log, rendered as plain text tables.

use std::collections::HashSet;
use std::fmt::Write;

use common::time::SnapshotTime;
use market::detector::{DetectionThresholds, UnusualVolumeRecord, detect, format_ratio};
use market::types::OptionType;
use store::{SnapshotStore, StoredQuote};

/// Each list accepts any of its values; an empty list accepts everything.
#[derive(Clone, Debug, Default)]
pub struct FlowFilter {
    pub symbols: Vec<String>,
    pub option_types: Vec<OptionType>,
    pub expiries: Vec<String>,
    pub strikes: Vec<f64>,
    pub limit: Option<usize>,
}

const STRIKE_EPSILON: f64 = 1e-9;

impl FlowFilter {
    fn matches(&self, q: &StoredQuote) -> bool {
        let quote = &q.quote;
        any_or_empty(&self.symbols, |s| quote.symbol.eq_ignore_ascii_case(s))
            && any_or_empty(&self.option_types, |t| quote.option_type == *t)
            && any_or_empty(&self.expiries, |e| quote.expiry == *e)
            && any_or_empty(&self.strikes, |k| (quote.strike - k).abs() < STRIKE_EPSILON)
    }
}

fn any_or_empty<T>(values: &[T], pred: impl Fn(&T) -> bool) -> bool {
    values.is_empty() || values.iter().any(pred)
}

/// Distinct contract observations across the whole log, highest volume first.
///
/// Re-recordings of an unchanged quote (same contract, volume, bid, ask and
/// underlying price) collapse into their first occurrence.
pub fn flow_view(rows: Vec<StoredQuote>, filter: &FlowFilter) -> Vec<StoredQuote> {
    let mut seen = HashSet::new();

    let mut out: Vec<StoredQuote> = rows
        .into_iter()
        .filter(|r| {
            let q = &r.quote;
            seen.insert((
                q.key(),
                q.volume,
                q.bid.to_bits(),
                q.ask.to_bits(),
                q.current_price.map(f64::to_bits),
            ))
        })
        .filter(|r| filter.matches(r))
        .collect();

    out.sort_by(|a, b| b.quote.volume.cmp(&a.quote.volume));

    if let Some(limit) = filter.limit {
        out.truncate(limit);
    }
    out
}

#[derive(Clone, Debug)]
pub struct UnusualReport {
    pub current: SnapshotTime,
    pub previous: Option<SnapshotTime>,
    pub records: Vec<UnusualVolumeRecord>,
}

/// Runs the detector over the two most recent snapshots. `None` when the log is empty.
pub async fn latest_unusual(
    store: &dyn SnapshotStore,
    thresholds: &DetectionThresholds,
) -> anyhow::Result<Option<UnusualReport>> {
    let times = store.snapshot_times().await?;

    let Some((current, rest)) = times.split_last() else {
        return Ok(None);
    };
    let previous = rest.last().cloned();

    let current_rows = store.rows_at(current).await?;
    let previous_rows = match &previous {
        Some(t) => store.rows_at(t).await?,
        None => Vec::new(),
    };

    Ok(Some(UnusualReport {
        current: current.clone(),
        previous,
        records: detect(&current_rows, &previous_rows, thresholds),
    }))
}

pub fn render_flow(rows: &[StoredQuote]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<19}  {:<6} {:<4} {:<10} {:>9} {:>9} {:>8} {:>8} {:>9}",
        "snapshot", "symbol", "type", "expiry", "strike", "volume", "bid", "ask", "price"
    );

    for r in rows {
        let q = &r.quote;
        let _ = writeln!(
            out,
            "{:<19}  {:<6} {:<4} {:<10} {:>9.2} {:>9} {:>8.2} {:>8.2} {:>9}",
            r.snapshot_time.as_str(),
            q.symbol,
            q.option_type.as_str(),
            q.expiry,
            q.strike,
            q.volume,
            q.bid,
            q.ask,
            price(q.current_price),
        );
    }
    out
}

pub fn render_unusual(records: &[UnusualVolumeRecord]) -> String {
    if records.is_empty() {
        return "no unusual volume found\n".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<6} {:<4} {:<10} {:>9} {:>9} {:>9} {:>9} {:>8} {:>8} {:>8} {:>9}",
        "symbol", "type", "expiry", "strike", "prev", "curr", "delta", "ratio", "bid", "ask", "price"
    );

    for r in records {
        let _ = writeln!(
            out,
            "{:<6} {:<4} {:<10} {:>9.2} {:>9} {:>9} {:>9} {:>8} {:>8} {:>8} {:>9}",
            r.key.symbol,
            r.key.option_type.as_str(),
            r.key.expiry,
            r.key.strike,
            r.previous_volume,
            r.current_volume,
            r.delta,
            format_ratio(r.ratio),
            price(r.bid),
            price(r.ask),
            price(r.current_price),
        );
    }
    out
}

fn price(v: Option<f64>) -> String {
    v.map(|p| format!("{p:.2}")).unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use market::types::{ContractQuote, Snapshot};
    use sqlx::sqlite::SqlitePoolOptions;
    use store::SqliteSnapshotStore;

    fn at(minute: u32) -> SnapshotTime {
        SnapshotTime::from_datetime(Utc.with_ymd_and_hms(2024, 1, 19, 14, minute, 0).unwrap())
    }

    fn quote(symbol: &str, option_type: OptionType, strike: f64, volume: u64) -> ContractQuote {
        ContractQuote {
            symbol: symbol.into(),
            option_type,
            expiry: "2024-01-19".into(),
            strike,
            volume,
            bid: 1.25,
            ask: 1.35,
            current_price: Some(495.0),
        }
    }

    fn stored(minute: u32, q: ContractQuote) -> StoredQuote {
        StoredQuote {
            snapshot_time: at(minute),
            quote: q,
        }
    }

    async fn memory_store() -> SqliteSnapshotStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteSnapshotStore::from_pool(pool);
        store.migrate().await.unwrap();
        store
    }

    #[test]
    fn flow_collapses_unchanged_rerecordings() {
        let rows = vec![
            stored(0, quote("NVDA", OptionType::Call, 500.0, 100)),
            stored(1, quote("NVDA", OptionType::Call, 500.0, 100)),
            stored(1, quote("NVDA", OptionType::Call, 500.0, 250)),
        ];

        let view = flow_view(rows, &FlowFilter::default());

        assert_eq!(view.len(), 2);
        assert_eq!(view[0].quote.volume, 250);
        assert_eq!(view[1].snapshot_time, at(0));
    }

    #[test]
    fn flow_applies_filters_then_limit() {
        let rows = vec![
            stored(0, quote("NVDA", OptionType::Call, 500.0, 10)),
            stored(0, quote("NVDA", OptionType::Put, 480.0, 900)),
            stored(0, quote("NVDA", OptionType::Put, 470.0, 50)),
            stored(0, quote("AAPL", OptionType::Put, 180.0, 5000)),
        ];

        let filter = FlowFilter {
            symbols: vec!["nvda".into()],
            option_types: vec![OptionType::Put],
            expiries: vec!["2024-01-19".into()],
            limit: Some(1),
            ..Default::default()
        };
        let view = flow_view(rows, &filter);

        assert_eq!(view.len(), 1);
        assert_eq!(view[0].quote.strike, 480.0);
    }

    #[test]
    fn flow_filters_accept_any_of_several_values() {
        let rows = vec![
            stored(0, quote("NVDA", OptionType::Call, 500.0, 10)),
            stored(0, quote("NVDA", OptionType::Put, 480.0, 900)),
            stored(0, quote("TSLA", OptionType::Call, 250.0, 70)),
            stored(0, quote("AAPL", OptionType::Put, 180.0, 5000)),
        ];

        let filter = FlowFilter {
            symbols: vec!["NVDA".into(), "tsla".into()],
            option_types: vec![OptionType::Call, OptionType::Put],
            strikes: vec![500.0, 250.0],
            ..Default::default()
        };
        let view = flow_view(rows.clone(), &filter);

        let picked: Vec<(&str, f64)> = view
            .iter()
            .map(|r| (r.quote.symbol.as_str(), r.quote.strike))
            .collect();
        assert_eq!(picked, vec![("TSLA", 250.0), ("NVDA", 500.0)]);

        let strike_only = FlowFilter {
            strikes: vec![480.0],
            ..Default::default()
        };
        let view = flow_view(rows, &strike_only);
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].quote.option_type, OptionType::Put);
    }

    #[tokio::test]
    async fn latest_unusual_compares_the_two_newest_snapshots() {
        let store = memory_store().await;
        assert!(
            latest_unusual(&store, &DetectionThresholds::default())
                .await
                .unwrap()
                .is_none()
        );

        for (minute, volume) in [(0, 50), (1, 100), (2, 2500)] {
            let snap = Snapshot::new(at(minute), vec![quote("NVDA", OptionType::Call, 500.0, volume)]);
            store.append(&snap).await.unwrap();
        }

        let report = latest_unusual(&store, &DetectionThresholds::default())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.current, at(2));
        assert_eq!(report.previous, Some(at(1)));
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].delta, 2400);
    }

    #[tokio::test]
    async fn single_snapshot_has_no_baseline() {
        let store = memory_store().await;
        let snap = Snapshot::new(at(0), vec![quote("SPY", OptionType::Call, 470.0, 9000)]);
        store.append(&snap).await.unwrap();

        let report = latest_unusual(&store, &DetectionThresholds::default())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.previous, None);
        assert!(report.records.is_empty());
    }

    #[test]
    fn renders_tables() {
        assert_eq!(render_unusual(&[]), "no unusual volume found\n");

        let record = UnusualVolumeRecord {
            key: quote("NVDA", OptionType::Call, 500.0, 0).key(),
            previous_volume: 0,
            current_volume: 1500,
            delta: 1500,
            ratio: f64::INFINITY,
            bid: Some(1.25),
            ask: None,
            current_price: Some(495.0),
        };
        let text = render_unusual(&[record]);
        assert!(text.contains("NVDA"));
        assert!(text.contains("inf"));
        assert_eq!(text.lines().count(), 2);

        let flow = render_flow(&[stored(0, quote("NVDA", OptionType::Put, 480.0, 900))]);
        assert!(flow.contains("2024-01-19 14:00:00"));
        assert!(flow.contains("Put"));
    }
}
