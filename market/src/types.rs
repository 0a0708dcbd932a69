use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use common::time::SnapshotTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OptionType {
    Call,
    Put,
}

impl OptionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionType::Call => "Call",
            OptionType::Put => "Put",
        }
    }
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptionType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Call" => Ok(OptionType::Call),
            "Put" => Ok(OptionType::Put),
            other => Err(anyhow::anyhow!("Invalid OptionType value: {}", other)),
        }
    }
}

/// Identifies one option contract: (symbol, type, expiry, strike).
///
/// Strikes are compared bit-for-bit (with `-0.0` folded into `0.0`) so the
/// key can live in hash maps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractKey {
    pub symbol: String,
    pub option_type: OptionType,
    pub expiry: String,
    pub strike: f64,
}

impl ContractKey {
    fn strike_bits(&self) -> u64 {
        if self.strike == 0.0 {
            0.0f64.to_bits()
        } else {
            self.strike.to_bits()
        }
    }
}

impl PartialEq for ContractKey {
    fn eq(&self, other: &Self) -> bool {
        self.symbol == other.symbol
            && self.option_type == other.option_type
            && self.expiry == other.expiry
            && self.strike_bits() == other.strike_bits()
    }
}

impl Eq for ContractKey {}

impl Hash for ContractKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.symbol.hash(state);
        self.option_type.hash(state);
        self.expiry.hash(state);
        self.strike_bits().hash(state);
    }
}

impl fmt::Display for ContractKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.symbol, self.expiry, self.strike, self.option_type
        )
    }
}

/// One options contract observed at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractQuote {
    pub symbol: String,
    pub option_type: OptionType,
    pub expiry: String,
    pub strike: f64,
    pub volume: u64,
    pub bid: f64,
    pub ask: f64,
    /// Underlying price at fetch time, if the source had one.
    pub current_price: Option<f64>,
}

impl ContractQuote {
    pub fn key(&self) -> ContractKey {
        ContractKey {
            symbol: self.symbol.clone(),
            option_type: self.option_type,
            expiry: self.expiry.clone(),
            strike: self.strike,
        }
    }
}

/// Immutable set of quotes captured together.
///
/// Construction drops repeated contract keys (first occurrence wins), so a
/// snapshot never holds two rows for the same contract.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    taken_at: SnapshotTime,
    quotes: Vec<ContractQuote>,
}

impl Snapshot {
    pub fn new(taken_at: SnapshotTime, quotes: Vec<ContractQuote>) -> Self {
        let mut seen = std::collections::HashSet::with_capacity(quotes.len());
        let quotes = quotes
            .into_iter()
            .filter(|q| seen.insert(q.key()))
            .collect();

        Self { taken_at, quotes }
    }

    pub fn taken_at(&self) -> &SnapshotTime {
        &self.taken_at
    }

    pub fn quotes(&self) -> &[ContractQuote] {
        &self.quotes
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    /// Same rows under a different timestamp.
    pub fn retimed(self, taken_at: SnapshotTime) -> Self {
        Self {
            taken_at,
            quotes: self.quotes,
        }
    }

    pub fn into_quotes(self) -> Vec<ContractQuote> {
        self.quotes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn quote(strike: f64, volume: u64) -> ContractQuote {
        ContractQuote {
            symbol: "AAPL".into(),
            option_type: OptionType::Call,
            expiry: "2024-01-19".into(),
            strike,
            volume,
            bid: 1.0,
            ask: 1.1,
            current_price: Some(185.0),
        }
    }

    #[test]
    fn option_type_text_round_trips() {
        assert_eq!("Call".parse::<OptionType>().unwrap(), OptionType::Call);
        assert_eq!("Put".parse::<OptionType>().unwrap(), OptionType::Put);
        assert_eq!(OptionType::Put.to_string(), "Put");
        assert!("call".parse::<OptionType>().is_err());
    }

    #[test]
    fn zero_strikes_share_a_key() {
        let mut set = HashSet::new();
        set.insert(quote(0.0, 1).key());
        assert!(set.contains(&quote(-0.0, 1).key()));
    }

    #[test]
    fn snapshot_drops_duplicate_contracts_keeping_first() {
        let t = SnapshotTime::from_datetime(chrono::Utc::now());
        let snap = Snapshot::new(t, vec![quote(150.0, 10), quote(155.0, 3), quote(150.0, 99)]);

        assert_eq!(snap.len(), 2);
        assert_eq!(snap.quotes()[0].volume, 10);
        assert_eq!(snap.quotes()[1].strike, 155.0);
    }

    #[test]
    fn put_and_call_at_same_strike_are_distinct() {
        let t = SnapshotTime::from_datetime(chrono::Utc::now());
        let mut put = quote(150.0, 5);
        put.option_type = OptionType::Put;

        let snap = Snapshot::new(t, vec![quote(150.0, 10), put]);
        assert_eq!(snap.len(), 2);
    }
}
