use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument, warn};

use crate::source::{OptionChain, QuoteSource};
use crate::yahoo::errors::YahooError;
use crate::yahoo::types::{ChartEnvelope, OptionsEnvelope, OptionsResult};

pub const DEFAULT_BASE_URL: &str = "https://query2.finance.yahoo.com";

const EXPIRY_FORMAT: &str = "%Y-%m-%d";

#[derive(Clone)]
pub struct YahooClient {
    http: Client,
    base_url: String,
}

impl YahooClient {
    pub fn new(base_url: String) -> Result<Self, YahooError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (compatible; optflow/0.1)")
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    #[instrument(skip(self), fields(symbol = %symbol), level = "debug")]
    async fn fetch_options(
        &self,
        symbol: &str,
        date: Option<i64>,
    ) -> Result<OptionsResult, YahooError> {
        let url = format!("{}/v7/finance/options/{}", self.base_url, symbol);

        let mut req = self.http.get(&url);
        if let Some(d) = date {
            req = req.query(&[("date", d)]);
        }

        let resp = req.send().await?;
        if resp.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(YahooError::RateLimited(symbol.to_string()));
        }

        let envelope: OptionsEnvelope = resp.error_for_status()?.json().await?;

        if let Some(err) = envelope.option_chain.error {
            return Err(YahooError::InvalidResponse(err.to_string()));
        }

        let result = envelope
            .option_chain
            .result
            .into_iter()
            .next()
            .ok_or_else(|| YahooError::InvalidResponse(format!("no option chain for {symbol}")))?;

        debug!(
            expiries = result.expiration_dates.len(),
            chains = result.options.len(),
            "yahoo options fetched"
        );

        Ok(result)
    }
}

#[async_trait]
impl QuoteSource for YahooClient {
    async fn current_price(&self, symbol: &str) -> anyhow::Result<Option<f64>> {
        let result = self.fetch_options(symbol, None).await?;
        Ok(result.quote.and_then(|q| q.regular_market_price))
    }

    #[instrument(skip(self), fields(symbol = %symbol), level = "debug")]
    async fn last_close(&self, symbol: &str) -> anyhow::Result<Option<f64>> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);

        let resp = self
            .http
            .get(&url)
            .query(&[("range", "1d"), ("interval", "1d")])
            .send()
            .await?;
        if resp.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(YahooError::RateLimited(symbol.to_string()).into());
        }

        let envelope: ChartEnvelope = resp.error_for_status()?.json().await?;

        Ok(envelope
            .chart
            .result
            .and_then(|r| r.into_iter().next())
            .and_then(|d| d.last_close()))
    }

    async fn expiries(&self, symbol: &str) -> anyhow::Result<Vec<String>> {
        let result = self.fetch_options(symbol, None).await?;
        Ok(result
            .expiration_dates
            .iter()
            .filter_map(|ts| expiry_token(*ts))
            .collect())
    }

    async fn chain(&self, symbol: &str, expiry: &str) -> anyhow::Result<OptionChain> {
        let epoch = expiry_epoch(expiry)?;
        let result = self.fetch_options(symbol, Some(epoch)).await?;

        Ok(chain_for_expiry(&result, epoch))
    }
}

/// The contracts listed under exactly `epoch`. Yahoo answers an unknown date
/// with its nearest expiration; those contracts belong to another expiry, so
/// they are dropped rather than filed under the requested one.
fn chain_for_expiry(result: &OptionsResult, epoch: i64) -> OptionChain {
    match result.options.iter().find(|o| o.expiration_date == epoch) {
        Some(contracts) => OptionChain::from(contracts),
        None => {
            warn!(
                requested = epoch,
                returned = ?result.options.iter().map(|o| o.expiration_date).collect::<Vec<_>>(),
                "no chain for the requested expiry"
            );
            OptionChain::default()
        }
    }
}

/// Unix seconds -> `YYYY-MM-DD`.
pub fn expiry_token(ts: i64) -> Option<String> {
    DateTime::from_timestamp(ts, 0).map(|d| d.format(EXPIRY_FORMAT).to_string())
}

/// `YYYY-MM-DD` -> unix seconds at midnight UTC.
pub fn expiry_epoch(token: &str) -> Result<i64, YahooError> {
    let date = NaiveDate::parse_from_str(token, EXPIRY_FORMAT)
        .map_err(|_| YahooError::InvalidExpiry(token.to_string()))?;

    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .ok_or_else(|| YahooError::InvalidExpiry(token.to_string()))
}
