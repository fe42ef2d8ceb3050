//! Metric ingestion pipeline: validation, per-kind batched raw writes,
//! tumbling 1m/5m/1h aggregation, the latest-value overlay, range-query
//! planning and retention sweeping.
//!
//! One [`Ingestor`] is shared by every agent session; writes for a given
//! `(agent, kind, subject)` series are serialized through a 64-way
//! FNV-sharded lock inside the aggregator, and raw rows flow through one
//! bounded writer task per metric kind.

pub mod aggregator;
pub mod batcher;
pub mod latest;
pub mod query;
pub mod retention;
pub mod validate;


use crate::aggregator::AggregatorSet;
use crate::batcher::RawWriters;
use crate::latest::LatestOverlay;
use crate::validate::Validator;
use anyhow::Result;
use pika_common::types::{MetricKind, Sample};
use pika_storage::{AggRow, PikaStore, RawRow, SeriesStore, SnapshotRow};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Grace window for samples arriving after their bucket closed.
pub const LATE_GRACE_MS: i64 = 30_000;
/// Maximum raw rows per writer batch.
pub const BATCH_MAX_ROWS: usize = 256;
/// Writer batch flush interval.
pub const BATCH_MAX_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
pub struct IngestCounters {
    pub accepted: AtomicU64,
    pub rejected: AtomicU64,
    pub late: AtomicU64,
}

pub struct Ingestor {
    writers: RawWriters,
    aggregators: Arc<AggregatorSet>,
    overlay: Arc<LatestOverlay>,
    validator: Validator,
    agg_tx: tokio::sync::mpsc::UnboundedSender<Vec<AggRow>>,
    mirror_tx: tokio::sync::mpsc::UnboundedSender<SnapshotRow>,
    pub counters: IngestCounters,
}

impl Ingestor {
    /// Builds the ingestor and spawns its per-kind writer tasks, the
    /// single aggregate writer, the snapshot mirror and the bucket
    /// flusher. Tasks run until `shutdown` flips to `true` and flush their
    /// in-flight batches before exiting.
    pub fn spawn(
        series: Arc<dyn SeriesStore>,
        store: Arc<PikaStore>,
        overlay: Arc<LatestOverlay>,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> Arc<Self> {
        let writers = RawWriters::spawn(series.clone(), shutdown.clone());
        let aggregators = Arc::new(AggregatorSet::new());

        // Overlay changes are mirrored to the latest_snapshots table, and
        // mirrored rows past the overlay TTL are pruned once a minute.
        let (mirror_tx, mut mirror_rx) = tokio::sync::mpsc::unbounded_channel::<SnapshotRow>();
        let mirror_store = store;
        let ttl_ms = overlay.ttl_ms();
        tokio::spawn(async move {
            let mut prune = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    maybe = mirror_rx.recv() => {
                        let Some(row) = maybe else { break };
                        if let Err(e) = mirror_store.upsert_snapshot(&row).await {
                            tracing::warn!(agent_id = %row.agent_id, error = %e, "Snapshot mirror write failed");
                        }
                    }
                    _ = prune.tick() => {
                        let cutoff = chrono::Utc::now().timestamp_millis() - ttl_ms;
                        if let Err(e) = mirror_store.delete_snapshots_before(cutoff).await {
                            tracing::warn!(error = %e, "Snapshot mirror prune failed");
                        }
                    }
                }
            }
        });

        // One writer for all closed buckets: per-series rows were drained
        // in ascending bucket order, and a single consumer keeps them that
        // way on disk.
        let (agg_tx, mut agg_rx) = tokio::sync::mpsc::unbounded_channel::<Vec<AggRow>>();
        let agg_series = series.clone();
        tokio::spawn(async move {
            while let Some(rows) = agg_rx.recv().await {
                let series = agg_series.clone();
                let write = tokio::task::spawn_blocking(move || write_with_retry(series, rows));
                if let Err(e) = write.await {
                    tracing::error!(error = %e, "Aggregate writer task panicked");
                }
            }
        });

        let ingestor = Arc::new(Self {
            writers,
            aggregators: aggregators.clone(),
            overlay,
            validator: Validator::new(),
            agg_tx,
            mirror_tx,
            counters: IngestCounters::default(),
        });

        // Timer-driven bucket close: buckets whose window (plus grace) has
        // passed are emitted even when the series went quiet.
        let flusher = ingestor.clone();
        let mut flush_shutdown = shutdown;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let now_ms = chrono::Utc::now().timestamp_millis();
                        flusher.flush_closed_buckets(now_ms);
                    }
                    _ = flush_shutdown.changed() => {
                        if *flush_shutdown.borrow() {
                            // Final drain: everything still open gets closed.
                            flusher.flush_closed_buckets(i64::MAX);
                            break;
                        }
                    }
                }
            }
        });

        ingestor
    }

    /// Handles one telemetry frame from a session consumer. Returns the
    /// number of accepted samples.
    pub async fn ingest_telemetry(
        &self,
        agent_id: &str,
        kind: MetricKind,
        samples: Vec<Sample>,
    ) -> usize {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut accepted = 0usize;

        for sample in samples {
            if let Err(reason) = self.validator.check(agent_id, kind, &sample, now_ms) {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                self.validator.log_rejection(agent_id, kind, reason, now_ms);
                continue;
            }

            let subject = sample.subject.clone().unwrap_or_default();

            // Overlay first: the alert engine reads from here and must see
            // the newest accepted value even if persistence lags.
            let changed = self.overlay.update(
                agent_id,
                kind,
                &subject,
                sample.timestamp,
                sample.fields.clone(),
            );
            if changed {
                let _ = self.mirror_tx.send(SnapshotRow {
                    agent_id: agent_id.to_owned(),
                    kind: kind.as_str().to_owned(),
                    subject: subject.clone(),
                    ts_ms: sample.timestamp,
                    fields: serde_json::Value::Object(sample.fields.clone()),
                });
            }

            let fields_json = serde_json::Value::Object(sample.fields.clone()).to_string();
            self.writers
                .enqueue(RawRow {
                    agent_id: agent_id.to_owned(),
                    kind,
                    subject: subject.clone(),
                    ts_ms: sample.timestamp,
                    fields_json,
                })
                .await;

            if kind.is_aggregated() {
                let (closed, late) =
                    self.aggregators
                        .ingest(agent_id, kind, &subject, &sample, now_ms);
                if late {
                    self.counters.late.fetch_add(1, Ordering::Relaxed);
                }
                self.persist_aggregates(closed);
            }

            accepted += 1;
        }

        self.counters
            .accepted
            .fetch_add(accepted as u64, Ordering::Relaxed);
        accepted
    }

    fn flush_closed_buckets(&self, now_ms: i64) {
        let closed = self.aggregators.close_due(now_ms);
        self.persist_aggregates(closed);
    }

    /// Closed buckets are handed to the aggregate writer; the shard lock is
    /// already released by the time rows reach here.
    fn persist_aggregates(&self, rows: Vec<AggRow>) {
        if rows.is_empty() {
            return;
        }
        if self.agg_tx.send(rows).is_err() {
            tracing::error!("Aggregate writer channel closed, buckets dropped");
        }
    }

    pub fn overlay(&self) -> &Arc<LatestOverlay> {
        &self.overlay
    }
}

/// Transient aggregate write failures retry up to 3 times with ~200 ms
/// jitter before the batch is surrendered.
fn write_with_retry(series: Arc<dyn SeriesStore>, rows: Vec<AggRow>) {
    for attempt in 0..3u32 {
        match series.append_aggregates(&rows) {
            Ok(()) => return,
            Err(e) if attempt < 2 => {
                let jitter = {
                    use rand::Rng;
                    rand::thread_rng().gen_range(0..200)
                };
                tracing::warn!(attempt = attempt + 1, error = %e, "Aggregate write failed, retrying");
                std::thread::sleep(Duration::from_millis(200 + jitter));
            }
            Err(e) => {
                tracing::error!(error = %e, "Aggregate write failed after retries");
            }
        }
    }
}

/// Convenience: ascending aggregate rows for `(agent, kind)` over the range,
/// at the planner-selected resolution.
pub fn range_query(
    series: &dyn SeriesStore,
    agent_id: &str,
    kind: MetricKind,
    from_ms: i64,
    to_ms: i64,
) -> Result<(pika_storage::Resolution, Vec<AggRow>)> {
    let resolution = query::choose_resolution(from_ms, to_ms);
    let rows = series.query_aggregates(&pika_storage::SeriesQuery {
        agent_id: agent_id.to_owned(),
        kind,
        resolution,
        from_ms,
        to_ms,
    })?;
    Ok((resolution, rows))
}
