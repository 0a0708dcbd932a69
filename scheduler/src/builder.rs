//! Snapshot Builder
//!
//! Pulls quotes for the configured symbol universe and assembles one
//! [`Snapshot`]. Symbols are independent: a failure on one is recorded as a
//! [`SymbolWarning`] and the pass moves on. Nothing is written to the
//! snapshot store here.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use cache::CacheCoordinator;
use common::time::SnapshotTime;
use market::source::{OptionChain, QuoteSource};
use market::types::{ContractQuote, Snapshot};

/// A symbol that was skipped because its fetch failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SymbolWarning {
    pub symbol: String,
    pub error: String,
}

#[derive(Clone, Debug)]
pub struct BuildReport {
    pub snapshot: Snapshot,
    pub warnings: Vec<SymbolWarning>,
    /// True when the rows were served from a fresh cache instead of the source.
    pub from_cache: bool,
}

struct SymbolData {
    price: Option<f64>,
    chains: BTreeMap<String, OptionChain>,
}

pub struct SnapshotBuilder {
    source: Arc<dyn QuoteSource>,
    cache: Option<Arc<CacheCoordinator>>,
    /// Pause between symbols to stay under upstream rate limits.
    throttle: Duration,
}

impl SnapshotBuilder {
    pub fn new(source: Arc<dyn QuoteSource>, throttle: Duration) -> Self {
        Self {
            source,
            cache: None,
            throttle,
        }
    }

    pub fn with_cache(mut self, cache: Arc<CacheCoordinator>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache(&self) -> Option<&Arc<CacheCoordinator>> {
        self.cache.as_ref()
    }

    /// Builds one snapshot tagged with `now`.
    ///
    /// The snapshot is empty only when every symbol failed or had no options.
    #[instrument(skip(self, symbols), target = "builder", fields(symbols = symbols.len()))]
    pub async fn build(&self, symbols: &[String], now: DateTime<Utc>) -> BuildReport {
        let taken_at = SnapshotTime::from_datetime(now);

        if let Some(cache) = self.cache.as_ref().filter(|c| c.is_fresh(now)) {
            debug!(last_fetch_time = ?cache.last_fetch_time(), "serving snapshot from fresh cache");
            return BuildReport {
                snapshot: Snapshot::new(taken_at, from_cache(cache, symbols)),
                warnings: Vec::new(),
                from_cache: true,
            };
        }

        let mut quotes = Vec::new();
        let mut warnings = Vec::new();
        let mut fetched = 0usize;

        for (i, symbol) in symbols.iter().enumerate() {
            match self.fetch_symbol(symbol).await {
                Ok(data) => {
                    fetched += 1;
                    for (expiry, chain) in &data.chains {
                        quotes.extend(chain.to_quotes(symbol, expiry, data.price));
                    }
                    if let Some(cache) = &self.cache {
                        cache.record_symbol(symbol, data.price, data.chains);
                    }
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "error fetching options; skipping symbol");
                    warnings.push(SymbolWarning {
                        symbol: symbol.clone(),
                        error: format!("{e:#}"),
                    });
                }
            }

            if i + 1 < symbols.len() && !self.throttle.is_zero() {
                tokio::time::sleep(self.throttle).await;
            }
        }

        if fetched > 0 {
            if let Some(cache) = &self.cache {
                if let Err(e) = cache.save(now).await {
                    warn!(error = %e, "failed to persist quote cache");
                }
            }
        }

        quotes.sort_by(|a, b| b.volume.cmp(&a.volume));

        info!(
            fetched,
            failed = warnings.len(),
            rows = quotes.len(),
            "fetch pass complete"
        );

        BuildReport {
            snapshot: Snapshot::new(taken_at, quotes),
            warnings,
            from_cache: false,
        }
    }

    async fn fetch_symbol(&self, symbol: &str) -> anyhow::Result<SymbolData> {
        let price = self.resolve_price(symbol).await;

        let expiries = self.source.expiries(symbol).await?;
        if expiries.is_empty() {
            debug!(symbol, "no listed expiries");
        }

        let mut chains = BTreeMap::new();
        for expiry in expiries {
            let chain = self.source.chain(symbol, &expiry).await?;
            chains.insert(expiry, chain);
        }

        Ok(SymbolData { price, chains })
    }

    /// Live quote first, then the last daily close. Lookup errors only cost the price.
    async fn resolve_price(&self, symbol: &str) -> Option<f64> {
        match self.source.current_price(symbol).await {
            Ok(Some(p)) => return Some(p),
            Ok(None) => {}
            Err(e) => debug!(symbol, error = %e, "live price unavailable"),
        }

        match self.source.last_close(symbol).await {
            Ok(p) => p,
            Err(e) => {
                debug!(symbol, error = %e, "daily close unavailable");
                None
            }
        }
    }
}

fn from_cache(cache: &CacheCoordinator, symbols: &[String]) -> Vec<ContractQuote> {
    let mut quotes = Vec::new();

    for symbol in symbols {
        let price = cache.price(symbol);
        for expiry in cache.expiries(symbol) {
            if let Some(chain) = cache.chain(symbol, &expiry) {
                quotes.extend(chain.to_quotes(symbol, &expiry, price));
            }
        }
    }

    quotes.sort_by(|a, b| b.volume.cmp(&a.volume));
    quotes
}
