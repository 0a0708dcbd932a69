use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{Span, field};

use super::CycleId;

/// Root span for one pass of the refresh pipeline.
///
/// `trigger` names what started the pass (`scheduler`, `manual`, ...).
/// `rows` is recorded later, once the snapshot size is known.
pub fn cycle_span(trigger: &'static str, cycle_id: CycleId) -> Span {
    tracing::info_span!(
        "refresh_cycle",
        trigger = %trigger,
        cycle_id = %cycle_id,
        rows = field::Empty
    )
}

/// Awaits `fut` and emits a `performance` warning when it took longer than `max`.
pub async fn warn_if_slow<F, T>(label: &'static str, max: Duration, fut: F) -> T
where
    F: Future<Output = T>,
{
    let start = Instant::now();
    let out = fut.await;
    let elapsed = start.elapsed();
    if elapsed > max {
        tracing::warn!(
            target: "performance",
            label = label,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow operation detected"
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn slow_future_is_reported() {
        let out = warn_if_slow("sleepy", Duration::from_millis(1), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            7
        })
        .await;

        assert_eq!(out, 7);
        assert!(logs_contain("slow operation detected"));
    }

    #[tokio::test]
    #[traced_test]
    async fn fast_future_is_silent() {
        let out = warn_if_slow("quick", Duration::from_secs(5), async { "ok" }).await;

        assert_eq!(out, "ok");
        assert!(!logs_contain("slow operation detected"));
    }
}
