use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, instrument, warn};

use market::source::OptionChain;

use crate::errors::CacheError;
use crate::persisted::PersistedCache;

/// True iff a fetch happened and it is younger than `staleness_window`.
pub fn is_valid(
    last_fetch_time: Option<DateTime<Utc>>,
    staleness_window: Duration,
    now: DateTime<Utc>,
) -> bool {
    let Some(last) = last_fetch_time else {
        return false;
    };

    match chrono::Duration::from_std(staleness_window) {
        Ok(window) => now.signed_duration_since(last) < window,
        // Window too large for chrono: never goes stale.
        Err(_) => true,
    }
}

/// Process-wide quote cache with a JSON copy on disk.
///
/// Constructed once at start-up and shared by `Arc`. Each symbol's entry is
/// replaced as a whole, so concurrent readers see either the old or the new
/// chains for a symbol, never a mix.
pub struct CacheCoordinator {
    path: PathBuf,
    staleness_window: Duration,
    state: RwLock<PersistedCache>,
}

impl CacheCoordinator {
    /// Empty cache that will persist to `path`.
    pub fn new(path: impl Into<PathBuf>, staleness_window: Duration) -> Self {
        Self {
            path: path.into(),
            staleness_window,
            state: RwLock::new(PersistedCache::default()),
        }
    }

    /// Restores the cache from `path`.
    ///
    /// A missing, unreadable or corrupt file yields an empty cache; start-up
    /// never fails because of it.
    #[instrument(skip_all, target = "cache", fields(path = %path.as_ref().display()))]
    pub async fn load(path: impl AsRef<Path>, staleness_window: Duration) -> Self {
        let path = path.as_ref();
        let coordinator = Self::new(path, staleness_window);

        match read_persisted(path).await {
            Ok(Some(persisted)) => {
                info!(
                    symbols = persisted.options.len(),
                    last_fetch_time = ?persisted.last_fetch_time,
                    "persisted quote cache restored"
                );
                *coordinator.state.write() = persisted;
            }
            Ok(None) => {
                info!("no persisted quote cache; starting empty");
            }
            Err(e) => {
                warn!(error = %e, "persisted quote cache unusable; starting empty");
            }
        }

        coordinator
    }

    /// Stamps `fetched_at` as the last successful fetch and writes the cache to disk.
    ///
    /// The in-memory stamp is kept even when the write fails.
    #[instrument(skip(self), target = "cache", fields(path = %self.path.display()))]
    pub async fn save(&self, fetched_at: DateTime<Utc>) -> Result<(), CacheError> {
        let persisted = {
            let mut state = self.state.write();
            state.last_fetch_time = Some(fetched_at);
            state.clone()
        };

        let json = serde_json::to_vec_pretty(&persisted)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(symbols = persisted.options.len(), "quote cache saved");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn staleness_window(&self) -> Duration {
        self.staleness_window
    }

    pub fn last_fetch_time(&self) -> Option<DateTime<Utc>> {
        self.state.read().last_fetch_time
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        is_valid(self.last_fetch_time(), self.staleness_window, now)
    }

    pub fn price(&self, symbol: &str) -> Option<f64> {
        self.state.read().prices.get(symbol).copied()
    }

    /// Cached expiries for `symbol`, nearest first.
    pub fn expiries(&self, symbol: &str) -> Vec<String> {
        self.state
            .read()
            .options
            .get(symbol)
            .map(|chains| chains.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn chain(&self, symbol: &str, expiry: &str) -> Option<OptionChain> {
        self.state.read().options.get(symbol)?.get(expiry).cloned()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.state.read().options.contains_key(symbol)
    }

    /// Replaces everything cached for `symbol` in one step.
    pub fn record_symbol(
        &self,
        symbol: &str,
        price: Option<f64>,
        chains: BTreeMap<String, OptionChain>,
    ) {
        let mut state = self.state.write();

        match price {
            Some(p) => {
                state.prices.insert(symbol.to_string(), p);
            }
            None => {
                state.prices.remove(symbol);
            }
        }
        state.options.insert(symbol.to_string(), chains);
    }

    /// Drops all cached data and the fetch stamp so the next read must fetch.
    pub fn invalidate(&self) {
        let mut state = self.state.write();
        let symbols = state.options.len();
        *state = PersistedCache::default();

        debug!(symbols, "quote cache invalidated");
    }
}

async fn read_persisted(path: &Path) -> Result<Option<PersistedCache>, CacheError> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    Ok(Some(serde_json::from_slice(&raw)?))
}
