use serde::Deserialize;

use crate::source::{OptionChain, QuoteRow};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsEnvelope {
    pub option_chain: OptionChainResponse,
}

#[derive(Debug, Deserialize)]
pub struct OptionChainResponse {
    #[serde(default)]
    pub result: Vec<OptionsResult>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsResult {
    pub underlying_symbol: Option<String>,
    /// Expiries as unix seconds (midnight UTC).
    #[serde(default)]
    pub expiration_dates: Vec<i64>,
    pub quote: Option<UnderlyingQuote>,
    #[serde(default)]
    pub options: Vec<ExpiryContracts>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnderlyingQuote {
    pub regular_market_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiryContracts {
    pub expiration_date: i64,
    #[serde(default)]
    pub calls: Vec<RawContract>,
    #[serde(default)]
    pub puts: Vec<RawContract>,
}

#[derive(Debug, Deserialize)]
pub struct RawContract {
    pub strike: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub volume: Option<f64>,
}

impl From<&RawContract> for QuoteRow {
    fn from(c: &RawContract) -> Self {
        QuoteRow {
            strike: c.strike,
            bid: c.bid,
            ask: c.ask,
            volume: c.volume,
        }
    }
}

impl From<&ExpiryContracts> for OptionChain {
    fn from(e: &ExpiryContracts) -> Self {
        OptionChain {
            calls: e.calls.iter().map(QuoteRow::from).collect(),
            puts: e.puts.iter().map(QuoteRow::from).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChartEnvelope {
    pub chart: ChartResponse,
}

#[derive(Debug, Deserialize)]
pub struct ChartResponse {
    #[serde(default)]
    pub result: Option<Vec<ChartData>>,
}

#[derive(Debug, Deserialize)]
pub struct ChartData {
    pub indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
pub struct ChartIndicators {
    #[serde(default)]
    pub quote: Vec<ChartQuote>,
}

#[derive(Debug, Deserialize)]
pub struct ChartQuote {
    #[serde(default)]
    pub close: Vec<Option<f64>>,
}

impl ChartData {
    /// Last non-null close in the series.
    pub fn last_close(&self) -> Option<f64> {
        self.indicators
            .quote
            .first()?
            .close
            .iter()
            .rev()
            .find_map(|c| *c)
    }
}
