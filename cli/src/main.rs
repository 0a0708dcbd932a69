mod cli;
mod config;
mod report;

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::Instrument;

use cache::CacheCoordinator;
use common::logger::{CycleId, cycle_span, init_logger};
use market::detector::DetectionThresholds;
use market::yahoo::YahooClient;
use scheduler::{
    CycleOutcome, FetchMode, LogAlertSink, RefreshPipeline, RefreshScheduler, SnapshotBuilder,
};
use store::{SnapshotStore, SqliteSnapshotStore};

use cli::{Cli, Command};
use config::AppConfig;
use report::{FlowFilter, flow_view, latest_unusual, render_flow, render_unusual};

/// Wires source, cache, store and alert sink into the shared refresh pipeline.
async fn build_pipeline(
    cfg: &AppConfig,
    store: Arc<dyn SnapshotStore>,
) -> anyhow::Result<Arc<RefreshPipeline>> {
    let cache = Arc::new(CacheCoordinator::load(&cfg.cache_path, cfg.cache_ttl).await);
    let source = Arc::new(
        YahooClient::new(cfg.yahoo_base_url.clone()).context("failed to build quote client")?,
    );

    let builder = SnapshotBuilder::new(source, cfg.throttle).with_cache(cache);

    Ok(Arc::new(RefreshPipeline::new(
        builder,
        store,
        Arc::new(LogAlertSink::new(cfg.alert_top_n)),
        cfg.pipeline_config(),
    )))
}

async fn run(cfg: &AppConfig, store: Arc<dyn SnapshotStore>) -> anyhow::Result<()> {
    let pipeline = build_pipeline(cfg, store).await?;
    let scheduler = Arc::new(RefreshScheduler::new(pipeline, cfg.scheduler_config()));

    let handle = scheduler.start()?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    handle.stop().await;

    let stats = scheduler.stats().snapshot();
    tracing::info!(?stats, "scheduler totals");
    Ok(())
}

async fn fetch(cfg: &AppConfig, store: Arc<dyn SnapshotStore>, force: bool) -> anyhow::Result<()> {
    let pipeline = build_pipeline(cfg, store).await?;
    let mode = if force {
        FetchMode::Refresh
    } else {
        FetchMode::ReuseFresh
    };

    let outcome = pipeline
        .run_once(Utc::now(), mode)
        .instrument(cycle_span("manual", CycleId::new()))
        .await?;

    match outcome {
        CycleOutcome::Empty { warnings } => {
            println!("no data fetched ({} symbol(s) failed)", warnings.len());
        }
        CycleOutcome::Reused {
            last_fetch_time,
            rows,
            warnings,
        } => {
            let fetched = last_fetch_time
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "an earlier run".to_string());
            println!(
                "quote cache from {fetched} is still fresh: {rows} contracts, {} symbol(s) skipped",
                warnings.len()
            );
            println!("nothing new stored; use --force to refetch");
        }
        CycleOutcome::Stored {
            snapshot_time,
            rows,
            previous_time,
            unusual,
            warnings,
            persisted,
        } => {
            println!(
                "snapshot {snapshot_time}: {rows} contracts, {} symbol(s) skipped{}",
                warnings.len(),
                if persisted { "" } else { " (not persisted)" }
            );
            match previous_time {
                Some(prev) => println!("compared against {prev}"),
                None => println!("first snapshot; nothing to compare yet"),
            }
            print!("{}", render_unusual(&unusual));
        }
    }
    Ok(())
}

async fn unusual(
    cfg: &AppConfig,
    store: &dyn SnapshotStore,
    ratio: Option<f64>,
    delta: Option<i64>,
) -> anyhow::Result<()> {
    let thresholds = DetectionThresholds {
        ratio: ratio.unwrap_or(cfg.thresholds.ratio),
        delta: delta.unwrap_or(cfg.thresholds.delta),
    };

    match latest_unusual(store, &thresholds).await? {
        None => println!("no snapshots recorded yet"),
        Some(report) => {
            match &report.previous {
                Some(prev) => println!("{} vs {}", report.current, prev),
                None => println!("{} (no earlier snapshot)", report.current),
            }
            print!("{}", render_unusual(&report.records));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_logger("optflow", is_production);

    let cli = Cli::parse();

    let mut cfg = AppConfig::from_env();
    if let Some(url) = cli.database_url {
        cfg.database_url = url;
    }

    let store: Arc<dyn SnapshotStore> = Arc::new(
        SqliteSnapshotStore::connect(&cfg.database_url)
            .await
            .with_context(|| format!("failed to open snapshot store at {}", cfg.database_url))?,
    );

    match cli.command {
        Command::Run => run(&cfg, store).await,
        Command::Fetch { force } => fetch(&cfg, store, force).await,
        Command::Flow {
            symbol,
            option_type,
            expiry,
            strike,
            limit,
        } => {
            let filter = FlowFilter {
                symbols: symbol,
                option_types: option_type.into_iter().map(Into::into).collect(),
                expiries: expiry,
                strikes: strike,
                limit: Some(limit),
            };
            let rows = flow_view(store.all_rows().await?, &filter);
            print!("{}", render_flow(&rows));
            Ok(())
        }
        Command::Unusual { ratio, delta } => unusual(&cfg, store.as_ref(), ratio, delta).await,
    }
}
