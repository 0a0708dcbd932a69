//! Snapshot timestamps.
//!
//! Stored as text with second precision so that lexical order equals
//! chronological order (`MAX(snapshot_time)` in SQL is the latest snapshot).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SNAPSHOT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotTime(String);

impl SnapshotTime {
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.format(SNAPSHOT_TIME_FORMAT).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(&self.0, SNAPSHOT_TIME_FORMAT)
            .ok()
            .map(|n| n.and_utc())
    }

    /// Timestamp for a new append: `now`, or one second past `latest` when
    /// `now` would not sort strictly after it.
    pub fn next_after(now: DateTime<Utc>, latest: Option<&SnapshotTime>) -> Self {
        let candidate = Self::from_datetime(now);

        let Some(latest) = latest else {
            return candidate;
        };

        if candidate > *latest {
            return candidate;
        }

        match latest.to_datetime() {
            Some(dt) => Self::from_datetime(dt + Duration::seconds(1)),
            None => candidate,
        }
    }
}

impl FromStr for SnapshotTime {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n = NaiveDateTime::parse_from_str(s, SNAPSHOT_TIME_FORMAT)?;
        Ok(Self::from_datetime(n.and_utc()))
    }
}

impl fmt::Display for SnapshotTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
