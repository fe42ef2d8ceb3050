use crate::{BATCH_MAX_ROWS, BATCH_MAX_WAIT};
use pika_common::types::MetricKind;
use pika_storage::{RawRow, SeriesStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One writer task per metric kind. Raw rows are appended in arrival order;
/// a batch closes at 256 rows or after 1 s, whichever comes first.
pub struct RawWriters {
    senders: HashMap<MetricKind, mpsc::Sender<RawRow>>,
}

impl RawWriters {
    pub fn spawn(
        series: Arc<dyn SeriesStore>,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> Self {
        let mut senders = HashMap::new();
        for kind in MetricKind::ALL {
            let (tx, rx) = mpsc::channel::<RawRow>(BATCH_MAX_ROWS * 4);
            senders.insert(kind, tx);
            tokio::spawn(writer_loop(kind, rx, series.clone(), shutdown.clone()));
        }
        Self { senders }
    }

    /// Hands a row to its kind's writer. Await-based, so a slow writer
    /// back-pressures the session consumer instead of ballooning memory.
    pub async fn enqueue(&self, row: RawRow) {
        if let Some(tx) = self.senders.get(&row.kind) {
            if tx.send(row).await.is_err() {
                tracing::warn!("Raw writer channel closed, dropping sample");
            }
        }
    }
}

async fn writer_loop(
    kind: MetricKind,
    mut rx: mpsc::Receiver<RawRow>,
    series: Arc<dyn SeriesStore>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut batch: Vec<RawRow> = Vec::with_capacity(BATCH_MAX_ROWS);
    let mut tick = tokio::time::interval(BATCH_MAX_WAIT);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe_row = rx.recv() => {
                match maybe_row {
                    Some(row) => {
                        batch.push(row);
                        if batch.len() >= BATCH_MAX_ROWS {
                            flush(kind, &mut batch, series.as_ref());
                        }
                    }
                    None => break,
                }
            }
            _ = tick.tick() => {
                flush(kind, &mut batch, series.as_ref());
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    // Drain whatever arrived before the channel closed.
    while let Ok(row) = rx.try_recv() {
        batch.push(row);
    }
    flush(kind, &mut batch, series.as_ref());
    tracing::debug!(kind = %kind, "Raw writer stopped");
}

fn flush(kind: MetricKind, batch: &mut Vec<RawRow>, series: &dyn SeriesStore) {
    if batch.is_empty() {
        return;
    }
    let rows = std::mem::take(batch);
    let count = rows.len();
    if let Err(e) = series.append_raw(&rows) {
        tracing::error!(kind = %kind, count, error = %e, "Raw batch write failed");
    } else {
        tracing::trace!(kind = %kind, count, "Raw batch written");
    }
}
