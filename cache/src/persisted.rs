use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use market::source::OptionChain;

/// On-disk cache record.
///
/// ```json
/// {
///   "options": { "AAPL": { "2024-01-19": { "calls": [..], "puts": [..] } } },
///   "last_fetch_time": "2024-01-19T14:30:00Z",
///   "prices": { "AAPL": 185.92 }
/// }
/// ```
///
/// `prices` is optional on read so files holding only the first two fields load.
/// Numbers go through `serde_json`'s shortest round-trip float formatting, so
/// strikes, quotes and volumes come back bit-identical.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedCache {
    #[serde(default)]
    pub options: BTreeMap<String, BTreeMap<String, OptionChain>>,
    #[serde(default)]
    pub last_fetch_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub prices: BTreeMap<String, f64>,
}
