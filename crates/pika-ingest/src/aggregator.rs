use crate::LATE_GRACE_MS;
use pika_common::types::{fnv1a, MetricKind, Sample};
use pika_storage::{AggRow, Resolution};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

const SHARD_COUNT: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    agent_id: String,
    kind: MetricKind,
    subject: String,
}

#[derive(Debug, Default)]
struct GaugeAcc {
    min: f64,
    max: f64,
    sum: f64,
    count: u64,
}

impl GaugeAcc {
    fn push(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.sum += value;
        self.count += 1;
    }
}

#[derive(Debug, Default)]
struct BucketAcc {
    gauges: HashMap<&'static str, GaugeAcc>,
    rates: HashMap<&'static str, f64>,
}

impl BucketAcc {
    fn is_empty(&self) -> bool {
        self.gauges.is_empty() && self.rates.is_empty()
    }

    fn to_fields_json(&self) -> String {
        let mut obj = serde_json::Map::new();
        for (field, acc) in &self.gauges {
            obj.insert(
                (*field).to_owned(),
                json!({
                    "min": acc.min,
                    "avg": acc.sum / acc.count as f64,
                    "max": acc.max,
                }),
            );
        }
        for (field, max) in &self.rates {
            obj.insert((*field).to_owned(), json!({ "max": max }));
        }
        serde_json::Value::Object(obj).to_string()
    }
}

/// Open buckets for one series; `BTreeMap` keeps bucket starts ascending so
/// emission order matches the persistence contract.
#[derive(Debug, Default)]
struct SeriesState {
    buckets: [BTreeMap<i64, BucketAcc>; 3],
}

/// Tumbling aggregators for every live series, sharded 64 ways by FNV over
/// the series key. Bucket close is the only state transition taken under the
/// shard lock; callers persist the returned rows after release.
pub struct AggregatorSet {
    shards: Vec<Mutex<HashMap<SeriesKey, SeriesState>>>,
}

impl AggregatorSet {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &SeriesKey) -> MutexGuard<'_, HashMap<SeriesKey, SeriesState>> {
        let mut bytes = Vec::with_capacity(
            key.agent_id.len() + key.kind.as_str().len() + key.subject.len() + 2,
        );
        bytes.extend_from_slice(key.agent_id.as_bytes());
        bytes.push(b'|');
        bytes.extend_from_slice(key.kind.as_str().as_bytes());
        bytes.push(b'|');
        bytes.extend_from_slice(key.subject.as_bytes());
        let idx = (fnv1a(&bytes) % SHARD_COUNT as u64) as usize;
        self.shards[idx]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start of the bucket containing `ts_ms` for `resolution`.
    pub fn bucket_start(ts_ms: i64, resolution: Resolution) -> i64 {
        ts_ms - ts_ms.rem_euclid(resolution.millis())
    }

    /// A bucket is closed once wall clock passes its end plus the grace
    /// window.
    fn is_closed(bucket_start: i64, resolution: Resolution, now_ms: i64) -> bool {
        bucket_start + resolution.millis() + LATE_GRACE_MS <= now_ms
    }

    /// Feeds one accepted sample. Returns buckets closed as a side effect
    /// of time advancing, plus whether the sample was late for any
    /// resolution (dropped from that resolution and counted by the caller).
    pub fn ingest(
        &self,
        agent_id: &str,
        kind: MetricKind,
        subject: &str,
        sample: &Sample,
        now_ms: i64,
    ) -> (Vec<AggRow>, bool) {
        let key = SeriesKey {
            agent_id: agent_id.to_owned(),
            kind,
            subject: subject.to_owned(),
        };
        let mut late = false;
        let mut closed = Vec::new();

        {
            let mut shard = self.shard(&key);
            let state = shard.entry(key.clone()).or_default();

            for (slot, resolution) in Resolution::ALL.iter().enumerate() {
                let start = Self::bucket_start(sample.timestamp, *resolution);
                if Self::is_closed(start, *resolution, now_ms) {
                    late = true;
                    continue;
                }
                let acc = state.buckets[slot].entry(start).or_default();
                for field in kind.gauge_fields() {
                    if let Some(v) = sample.fields.get(*field).and_then(|v| v.as_f64()) {
                        acc.gauges.entry(field).or_default().push(v);
                    }
                }
                for field in kind.rate_fields() {
                    if let Some(v) = sample.fields.get(*field).and_then(|v| v.as_f64()) {
                        let entry = acc.rates.entry(field).or_insert(v);
                        if v > *entry {
                            *entry = v;
                        }
                    }
                }
            }

            Self::drain_closed(&key, state, now_ms, &mut closed);
        }

        (closed, late)
    }

    /// Timer-driven close across every series.
    pub fn close_due(&self, now_ms: i64) -> Vec<AggRow> {
        let mut closed = Vec::new();
        for shard in &self.shards {
            let mut shard = shard.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            shard.retain(|key, state| {
                Self::drain_closed(key, state, now_ms, &mut closed);
                // Series with no open buckets left are dropped; a future
                // sample recreates them.
                state.buckets.iter().any(|b| !b.is_empty())
            });
        }
        closed
    }

    fn drain_closed(key: &SeriesKey, state: &mut SeriesState, now_ms: i64, out: &mut Vec<AggRow>) {
        for (slot, resolution) in Resolution::ALL.iter().enumerate() {
            while let Some((&start, _)) = state.buckets[slot].first_key_value() {
                if !Self::is_closed(start, *resolution, now_ms) {
                    break;
                }
                let acc = state.buckets[slot].remove(&start).unwrap_or_default();
                if acc.is_empty() {
                    continue;
                }
                out.push(AggRow {
                    agent_id: key.agent_id.clone(),
                    kind: key.kind,
                    subject: key.subject.clone(),
                    resolution: *resolution,
                    bucket_start_ms: start,
                    fields_json: acc.to_fields_json(),
                });
            }
        }
    }
}

impl Default for AggregatorSet {
    fn default() -> Self {
        Self::new()
    }
}
