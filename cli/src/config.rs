use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use market::detector::DetectionThresholds;
use market::yahoo::client::DEFAULT_BASE_URL;
use scheduler::{PipelineConfig, SchedulerConfig};
use tracing::warn;

pub const DEFAULT_SYMBOLS: [&str; 9] = [
    "AAPL", "TSLA", "MSFT", "AMZN", "SPY", "QQQ", "NVDA", "META", "GOOGL",
];

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// SQLite connection string for the snapshot log.
    pub database_url: String,

    // =========================
    // Refresh configuration
    // =========================
    /// Underlyings fetched on every pass, in fetch order.
    pub symbols: Vec<String>,

    /// Pause between background cycles.
    pub interval: Duration,

    /// Step size of the inter-cycle sleep; bounds how long a stop request waits.
    pub sleep_slice: Duration,

    /// Delay between symbols within one pass.
    ///
    /// The upstream rate-limits bursts; 200ms keeps a nine-symbol pass
    /// under two seconds while avoiding most 429s.
    pub throttle: Duration,

    // =========================
    // Detection configuration
    // =========================
    pub thresholds: DetectionThresholds,

    /// Rows surfaced by the log alert sink.
    pub alert_top_n: usize,

    // =========================
    // Cache configuration
    // =========================
    pub cache_path: PathBuf,

    /// How long a completed fetch may be reused before refetching.
    pub cache_ttl: Duration,

    pub yahoo_base_url: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Unparseable values fall back to
    /// their default with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let database_url = lookup("DATABASE_URL")
            .unwrap_or_else(|| "sqlite://options_data.db?mode=rwc".to_string());

        let symbols = lookup("OPTFLOW_SYMBOLS")
            .map(|raw| parse_symbols(&raw))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect());

        let defaults = DetectionThresholds::default();
        let ratio = parse_or(&lookup, "OPTFLOW_RATIO_THRESHOLD", defaults.ratio);
        let ratio = if ratio.is_finite() && ratio >= 0.0 {
            ratio
        } else {
            warn!(ratio, "ratio threshold must be a non-negative number; using default");
            defaults.ratio
        };

        Self {
            database_url,
            symbols,
            interval: positive_secs(&lookup, "OPTFLOW_INTERVAL_SECS", 60),
            sleep_slice: positive_secs(&lookup, "OPTFLOW_SLEEP_SLICE_SECS", 10),
            throttle: Duration::from_millis(parse_or(&lookup, "OPTFLOW_THROTTLE_MS", 200)),
            thresholds: DetectionThresholds {
                ratio,
                delta: parse_or(&lookup, "OPTFLOW_DELTA_THRESHOLD", defaults.delta),
            },
            alert_top_n: parse_or(&lookup, "OPTFLOW_ALERT_TOP_N", 5),
            cache_path: lookup("OPTFLOW_CACHE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("options_cache.json")),
            cache_ttl: Duration::from_secs(parse_or(&lookup, "OPTFLOW_CACHE_TTL_SECS", 300)),
            yahoo_base_url: lookup("YAHOO_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: self.interval,
            sleep_slice: self.sleep_slice,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            symbols: self.symbols.clone(),
            thresholds: self.thresholds,
        }
    }
}

/// Comma separated, case-insensitive, duplicates dropped (first wins).
fn parse_symbols(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for s in raw.split(',').map(|s| s.trim().to_uppercase()) {
        if !s.is_empty() && !out.contains(&s) {
            out.push(s);
        }
    }
    out
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Debug,
{
    let Some(raw) = lookup(key) else {
        return default;
    };

    match raw.trim().parse() {
        Ok(v) => v,
        Err(_) => {
            warn!(key, value = %raw, default = ?default, "invalid config value; using default");
            default
        }
    }
}

/// A zero pause would run cycles back to back against the upstream.
fn positive_secs(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Duration {
    match parse_or(lookup, key, default) {
        0 => {
            warn!(key, default, "value must be at least one second; using default");
            Duration::from_secs(default)
        }
        secs => Duration::from_secs(secs),
    }
}
