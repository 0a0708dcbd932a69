use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tracing_test::traced_test;

use cache::{CacheCoordinator, PersistedCache};
use market::source::{OptionChain, QuoteRow};

const WINDOW: Duration = Duration::from_secs(300);

/// Unique scratch path per test so parallel runs never share a file.
fn scratch_path() -> PathBuf {
    std::env::temp_dir()
        .join(format!("optflow-cache-{}", uuid::Uuid::new_v4()))
        .join("options_cache.json")
}

fn aapl_chains() -> BTreeMap<String, OptionChain> {
    let mut chains = BTreeMap::new();
    chains.insert(
        "2024-01-19".to_string(),
        OptionChain {
            calls: vec![QuoteRow {
                strike: Some(150.0),
                bid: Some(35.55),
                ask: Some(36.1),
                volume: Some(2_500.0),
            }],
            puts: vec![],
        },
    );
    chains
}

#[tokio::test]
async fn save_then_load_restores_chains_prices_and_stamp() {
    let path = scratch_path();
    let fetched_at = Utc.with_ymd_and_hms(2024, 1, 19, 14, 30, 0).unwrap();

    let cache = CacheCoordinator::new(&path, WINDOW);
    cache.record_symbol("AAPL", Some(185.92), aapl_chains());
    cache.save(fetched_at).await.unwrap();

    let restored = CacheCoordinator::load(&path, WINDOW).await;
    assert_eq!(restored.last_fetch_time(), Some(fetched_at));
    assert_eq!(restored.price("AAPL"), Some(185.92));
    assert_eq!(restored.expiries("AAPL"), vec!["2024-01-19".to_string()]);
    assert_eq!(
        restored.chain("AAPL", "2024-01-19"),
        aapl_chains().remove("2024-01-19")
    );

    assert!(restored.is_fresh(fetched_at + chrono::Duration::seconds(299)));
    assert!(!restored.is_fresh(fetched_at + chrono::Duration::seconds(300)));
}

#[tokio::test]
async fn written_file_uses_the_documented_layout() {
    let path = scratch_path();
    let cache = CacheCoordinator::new(&path, WINDOW);
    cache.record_symbol("AAPL", None, aapl_chains());
    cache.save(Utc::now()).await.unwrap();

    let raw: serde_json::Value =
        serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();

    assert!(raw["options"]["AAPL"]["2024-01-19"]["calls"].is_array());
    assert!(raw["options"]["AAPL"]["2024-01-19"]["puts"].is_array());
    assert!(raw["last_fetch_time"].is_string());
    assert!(raw.get("prices").is_none());

    let typed: PersistedCache = serde_json::from_value(raw).unwrap();
    assert_eq!(typed.options.len(), 1);
}

#[tokio::test]
#[traced_test]
async fn corrupt_file_loads_as_empty_cache() {
    let path = scratch_path();
    tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
    tokio::fs::write(&path, b"{ not json").await.unwrap();

    let cache = CacheCoordinator::load(&path, WINDOW).await;

    assert_eq!(cache.last_fetch_time(), None);
    assert!(!cache.is_fresh(Utc::now()));
    assert!(cache.expiries("AAPL").is_empty());
    assert!(logs_contain("persisted quote cache unusable"));
}

#[tokio::test]
async fn missing_file_loads_as_empty_cache() {
    let cache = CacheCoordinator::load(scratch_path(), WINDOW).await;
    assert_eq!(cache.last_fetch_time(), None);
}

#[tokio::test]
async fn failed_save_keeps_in_memory_stamp() {
    // Parent "directory" is a regular file, so the write must fail.
    let blocker = std::env::temp_dir().join(format!("optflow-blocker-{}", uuid::Uuid::new_v4()));
    tokio::fs::write(&blocker, b"").await.unwrap();

    let cache = CacheCoordinator::new(blocker.join("options_cache.json"), WINDOW);
    let now = Utc::now();

    assert!(cache.save(now).await.is_err());
    assert_eq!(cache.last_fetch_time(), Some(now));
}
