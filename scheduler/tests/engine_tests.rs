
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use market::detector::DetectionThresholds;
use market::source::{OptionChain, QuoteSource};
use mocks::{MemoryStore, MockSource, RecordingSink, SymbolFixture, calls};
use scheduler::{
    PipelineConfig, RefreshPipeline, RefreshScheduler, SchedulerConfig, SchedulerError,
    SnapshotBuilder,
};

fn config(interval_secs: u64) -> SchedulerConfig {
    SchedulerConfig {
        interval: Duration::from_secs(interval_secs),
        sleep_slice: Duration::from_secs(10),
    }
}

fn scheduler_over(
    source: Arc<dyn QuoteSource>,
    store: MemoryStore,
    cfg: SchedulerConfig,
) -> Arc<RefreshScheduler> {
    let pipeline = RefreshPipeline::new(
        SnapshotBuilder::new(source, Duration::ZERO),
        Arc::new(store),
        Arc::new(RecordingSink::new()),
        PipelineConfig {
            symbols: vec!["AAPL".to_string()],
            thresholds: DetectionThresholds::default(),
        },
    );
    Arc::new(RefreshScheduler::new(Arc::new(pipeline), cfg))
}

async fn healthy_source() -> Arc<MockSource> {
    let source = MockSource::new();
    source
        .insert("AAPL", SymbolFixture::with_chain(185.0, calls(&[(185.0, 100.0)])))
        .await;
    Arc::new(source)
}

struct PanickingSource;

#[async_trait]
impl QuoteSource for PanickingSource {
    async fn current_price(&self, _symbol: &str) -> anyhow::Result<Option<f64>> {
        Ok(Some(1.0))
    }

    async fn last_close(&self, _symbol: &str) -> anyhow::Result<Option<f64>> {
        Ok(None)
    }

    async fn expiries(&self, _symbol: &str) -> anyhow::Result<Vec<String>> {
        Ok(vec!["2024-01-19".to_string()])
    }

    async fn chain(&self, _symbol: &str, _expiry: &str) -> anyhow::Result<OptionChain> {
        panic!("malformed upstream payload");
    }
}

#[tokio::test(start_paused = true)]
async fn runs_a_cycle_per_interval_and_stores_each() {
    let store = MemoryStore::new();
    let scheduler = scheduler_over(healthy_source().await, store.clone(), config(60));

    let handle = scheduler.start().unwrap();
    tokio::time::sleep(Duration::from_secs(150)).await;
    handle.stop().await;

    let stats = scheduler.stats().snapshot();
    assert_eq!(stats.cycles_started, 3);
    assert_eq!(stats.cycles_stored, 3);
    assert_eq!(stats.cycles_failed, 0);
    assert_eq!(store.snapshot_count().await, 3);
}

#[tokio::test(start_paused = true)]
async fn failing_cycles_do_not_stop_the_loop() {
    let store = MemoryStore::new();
    store.fail_reads.store(true, Ordering::SeqCst);
    let scheduler = scheduler_over(healthy_source().await, store.clone(), config(60));

    let handle = scheduler.start().unwrap();
    tokio::time::sleep(Duration::from_secs(150)).await;
    assert!(scheduler.is_running());

    // Recovers once the store does.
    store.fail_reads.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(60)).await;
    handle.stop().await;

    let stats = scheduler.stats().snapshot();
    assert_eq!(stats.cycles_started, 4);
    assert_eq!(stats.cycles_failed, 3);
    assert_eq!(stats.cycles_stored, 1);
}

#[tokio::test(start_paused = true)]
async fn panicking_cycle_is_counted_and_the_loop_survives() {
    let scheduler = scheduler_over(Arc::new(PanickingSource), MemoryStore::new(), config(60));

    let handle = scheduler.start().unwrap();
    tokio::time::sleep(Duration::from_secs(90)).await;

    assert!(scheduler.is_running());
    assert!(!handle.is_finished());
    handle.stop().await;

    let stats = scheduler.stats().snapshot();
    assert_eq!(stats.cycles_started, 2);
    assert_eq!(stats.cycles_failed, 2);
}

#[tokio::test(start_paused = true)]
async fn empty_cycles_are_counted_separately() {
    let source = MockSource::new();
    source.insert("AAPL", SymbolFixture::failing()).await;
    let store = MemoryStore::new();
    let scheduler = scheduler_over(Arc::new(source), store.clone(), config(60));

    let handle = scheduler.start().unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;
    handle.stop().await;

    let stats = scheduler.stats().snapshot();
    assert_eq!(stats.cycles_empty, 1);
    assert_eq!(stats.cycles_failed, 0);
    assert_eq!(store.snapshot_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn second_start_is_rejected_until_stopped() {
    let scheduler = scheduler_over(healthy_source().await, MemoryStore::new(), config(60));

    let handle = scheduler.start().unwrap();
    assert!(scheduler.is_running());
    assert!(matches!(scheduler.start(), Err(SchedulerError::AlreadyRunning)));

    handle.stop().await;
    assert!(!scheduler.is_running());

    let again = scheduler.start().unwrap();
    again.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stop_is_observed_within_one_sleep_slice() {
    let scheduler = scheduler_over(healthy_source().await, MemoryStore::new(), config(3600));

    let handle = scheduler.start().unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(scheduler.stats().snapshot().cycles_started, 1);

    let requested = tokio::time::Instant::now();
    handle.stop().await;

    assert!(requested.elapsed() < Duration::from_secs(10));
    assert!(!scheduler.is_running());
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_stops_the_loop() {
    let scheduler = scheduler_over(healthy_source().await, MemoryStore::new(), config(60));

    drop(scheduler.start().unwrap());

    for _ in 0..10 {
        if !scheduler.is_running() {
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    assert!(!scheduler.is_running());
    assert_eq!(scheduler.stats().snapshot().cycles_started, 1);
}
