//! Volume-Change Detector
//!
//! Compares two snapshots of the same option universe and flags contracts
//! whose traded volume grew abnormally between them.
//!
//! ## Join
//! Rows are matched on [`ContractKey`] with a full outer join. Join order is
//! the current snapshot's rows in order, followed by contracts that only exist
//! in the previous snapshot. A missing side counts as volume 0.
//!
//! ## Metrics
//! ```text
//! delta = current_volume - previous_volume
//! ratio = current_volume / previous_volume   (previous_volume > 0)
//!       = +inf                               (previous_volume == 0, including 0 -> 0)
//! ```
//!
//! ## Both thresholds must pass
//! A contract is unusual iff `ratio >= ratio_threshold` AND
//! `delta >= delta_threshold`.
//! - ratio alone fires on tiny bases (3 -> 9 contracts is a 3x move)
//! - delta alone fires on every liquid index option that trades thousands per minute
//!
//! A new contract always has an infinite ratio, so only the delta threshold
//! gates it.
//!
//! ## Determinism
//! Pure function of its inputs; output is sorted by delta descending with a
//! stable sort, so ties keep join order.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::types::{ContractKey, ContractQuote};

/// Thresholds shared by the scheduled pipeline and on-demand comparisons.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionThresholds {
    /// Minimum `current / previous` volume ratio.
    pub ratio: f64,
    /// Minimum absolute volume increase.
    pub delta: i64,
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        Self {
            ratio: 2.0,
            delta: 1_000,
        }
    }
}

/// One flagged contract. Never persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct UnusualVolumeRecord {
    pub key: ContractKey,
    pub previous_volume: u64,
    pub current_volume: u64,
    pub delta: i64,
    /// `f64::INFINITY` when the contract had no previous volume.
    pub ratio: f64,
    /// Quote fields come from the current snapshot; `None` when the contract
    /// only exists in the previous one.
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub current_price: Option<f64>,
}

impl UnusualVolumeRecord {
    pub fn is_new(&self) -> bool {
        self.previous_volume == 0
    }
}

pub fn volume_ratio(current: u64, previous: u64) -> f64 {
    if previous > 0 {
        current as f64 / previous as f64
    } else {
        f64::INFINITY
    }
}

/// Human-readable ratio: `inf` for brand-new volume, two decimals otherwise.
pub fn format_ratio(ratio: f64) -> String {
    if ratio.is_infinite() {
        "inf".to_string()
    } else {
        format!("{ratio:.2}")
    }
}

pub fn volume_delta(current: u64, previous: u64) -> i64 {
    signed(current).saturating_sub(signed(previous))
}

/// Flags contracts that cleared both thresholds between `previous` and `current`.
///
/// Returns nothing when either side is empty: there is no baseline to compare.
pub fn detect(
    current: &[ContractQuote],
    previous: &[ContractQuote],
    thresholds: &DetectionThresholds,
) -> Vec<UnusualVolumeRecord> {
    if current.is_empty() || previous.is_empty() {
        return Vec::new();
    }

    let mut previous_volume: HashMap<ContractKey, u64> = HashMap::with_capacity(previous.len());
    for q in previous {
        previous_volume.entry(q.key()).or_insert(q.volume);
    }

    let mut seen: HashSet<ContractKey> = HashSet::with_capacity(current.len() + previous.len());
    let mut joined = Vec::with_capacity(current.len());

    for q in current {
        let key = q.key();
        if !seen.insert(key.clone()) {
            continue;
        }
        let prev = previous_volume.get(&key).copied().unwrap_or(0);
        joined.push(record(key, prev, q.volume, Some(q)));
    }

    for q in previous {
        let key = q.key();
        if !seen.insert(key.clone()) {
            continue;
        }
        joined.push(record(key, q.volume, 0, None));
    }

    let mut unusual: Vec<UnusualVolumeRecord> = joined
        .into_iter()
        .filter(|r| r.ratio >= thresholds.ratio && r.delta >= thresholds.delta)
        .collect();

    unusual.sort_by(|a, b| b.delta.cmp(&a.delta));
    unusual
}

fn record(
    key: ContractKey,
    previous_volume: u64,
    current_volume: u64,
    current_side: Option<&ContractQuote>,
) -> UnusualVolumeRecord {
    UnusualVolumeRecord {
        key,
        previous_volume,
        current_volume,
        delta: volume_delta(current_volume, previous_volume),
        ratio: volume_ratio(current_volume, previous_volume),
        bid: current_side.map(|q| q.bid),
        ask: current_side.map(|q| q.ask),
        current_price: current_side.and_then(|q| q.current_price),
    }
}

fn signed(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}
