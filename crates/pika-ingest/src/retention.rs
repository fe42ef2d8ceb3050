use pika_storage::{Resolution, SeriesStore};
use std::sync::Arc;
use std::time::Duration;

/// Raw samples live two hours.
pub const RAW_RETENTION_MS: i64 = 2 * 3600 * 1000;
/// Deletion batch ceiling per table per pass.
pub const DELETE_BATCH_ROWS: usize = 10_000;

/// Hourly retention sweeper. Deletion is batched so a large backlog is
/// drained across passes instead of stalling a tick.
pub struct RetentionSweeper {
    series: Arc<dyn SeriesStore>,
    period: Duration,
}

impl RetentionSweeper {
    pub fn new(series: Arc<dyn SeriesStore>) -> Self {
        Self {
            series,
            period: Duration::from_secs(3600),
        }
    }

    #[cfg(test)]
    pub fn with_period(series: Arc<dyn SeriesStore>, period: Duration) -> Self {
        Self { series, period }
    }

    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(self.period);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let series = self.series.clone();
                    let sweep = tokio::task::spawn_blocking(move || sweep_once(series.as_ref()));
                    if let Err(e) = sweep.await {
                        tracing::error!(error = %e, "Retention sweep task panicked");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Retention sweeper stopped");
    }
}

/// One full pass: raw cutoff, per-resolution cutoffs, then whole-file drops
/// for partitions past every window.
pub fn sweep_once(series: &dyn SeriesStore) {
    let now_ms = chrono::Utc::now().timestamp_millis();

    match drain(series, now_ms - RAW_RETENTION_MS, None) {
        Ok(removed) if removed > 0 => {
            tracing::info!(removed, "Raw sample retention sweep finished")
        }
        Err(e) => tracing::error!(error = %e, "Raw sample retention sweep failed"),
        _ => {}
    }

    for resolution in Resolution::ALL {
        let cutoff = now_ms - resolution.retention_days() * 86_400_000;
        match drain(series, cutoff, Some(resolution)) {
            Ok(removed) if removed > 0 => {
                tracing::info!(resolution = resolution.as_str(), removed, "Aggregate retention sweep finished")
            }
            Err(e) => {
                tracing::error!(resolution = resolution.as_str(), error = %e, "Aggregate retention sweep failed")
            }
            _ => {}
        }
    }

    match series.drop_expired_partitions() {
        Ok(dropped) if dropped > 0 => tracing::info!(dropped, "Dropped expired partitions"),
        Err(e) => tracing::error!(error = %e, "Partition drop failed"),
        _ => {}
    }
}

fn drain(
    series: &dyn SeriesStore,
    cutoff_ms: i64,
    resolution: Option<Resolution>,
) -> anyhow::Result<usize> {
    let mut total = 0usize;
    loop {
        let removed = match resolution {
            Some(r) => series.delete_aggregates_before(r, cutoff_ms, DELETE_BATCH_ROWS)?,
            None => series.delete_raw_before(cutoff_ms, DELETE_BATCH_ROWS)?,
        };
        total += removed;
        if removed < DELETE_BATCH_ROWS {
            return Ok(total);
        }
    }
}
