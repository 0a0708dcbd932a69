//! Boundary to the upstream options-chain provider.
//!
//! Providers hand back loosely typed rows (any field may be missing); they are
//! converted into [`ContractQuote`] here and nowhere else.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{ContractQuote, OptionType};

/// Raw contract row as the provider reports it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuoteRow {
    #[serde(default)]
    pub strike: Option<f64>,
    #[serde(default)]
    pub bid: Option<f64>,
    #[serde(default)]
    pub ask: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
}

/// Calls and puts for one symbol and expiry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionChain {
    #[serde(default)]
    pub calls: Vec<QuoteRow>,
    #[serde(default)]
    pub puts: Vec<QuoteRow>,
}

impl OptionChain {
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty() && self.puts.is_empty()
    }

    /// One quote per row, calls first.
    pub fn to_quotes(
        &self,
        symbol: &str,
        expiry: &str,
        current_price: Option<f64>,
    ) -> Vec<ContractQuote> {
        let calls = self.calls.iter().map(|r| (OptionType::Call, r));
        let puts = self.puts.iter().map(|r| (OptionType::Put, r));

        calls
            .chain(puts)
            .map(|(option_type, row)| ContractQuote {
                symbol: symbol.to_string(),
                option_type,
                expiry: expiry.to_string(),
                strike: finite(row.strike).unwrap_or(0.0),
                volume: volume_of(row.volume),
                bid: non_negative(row.bid),
                ask: non_negative(row.ask),
                current_price,
            })
            .collect()
    }
}

#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Live price of the underlying, if quoted.
    async fn current_price(&self, symbol: &str) -> anyhow::Result<Option<f64>>;

    /// Most recent daily close, used when no live price is available.
    async fn last_close(&self, symbol: &str) -> anyhow::Result<Option<f64>>;

    /// Listed expiries as `YYYY-MM-DD` tokens, nearest first.
    async fn expiries(&self, symbol: &str) -> anyhow::Result<Vec<String>>;

    async fn chain(&self, symbol: &str, expiry: &str) -> anyhow::Result<OptionChain>;
}

fn finite(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite())
}

fn non_negative(v: Option<f64>) -> f64 {
    finite(v).unwrap_or(0.0).max(0.0)
}

fn volume_of(v: Option<f64>) -> u64 {
    match finite(v) {
        Some(x) if x > 0.0 => x.round() as u64,
        _ => 0,
    }
}
