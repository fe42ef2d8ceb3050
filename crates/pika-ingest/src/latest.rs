use pika_common::types::{fnv1a, MetricKind};
use serde_json::Map;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

const SHARD_COUNT: usize = 64;

/// One overlay cell: the newest accepted payload for a series.
#[derive(Debug, Clone)]
pub struct LatestValue {
    pub ts_ms: i64,
    pub fields: Map<String, serde_json::Value>,
}

type Cell = HashMap<(String, MetricKind, String), LatestValue>;

/// Non-blocking latest-value overlay: `(agent, kind, subject) → newest
/// payload`, last-writer-wins ordered by sample timestamp. Reads by the
/// alert engine and the `/latest` endpoint ignore entries older than the
/// TTL (2 × offline threshold).
pub struct LatestOverlay {
    shards: Vec<RwLock<Cell>>,
    ttl_ms: i64,
}

impl LatestOverlay {
    pub fn new(ttl_ms: i64) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
            ttl_ms,
        }
    }

    pub fn ttl_ms(&self) -> i64 {
        self.ttl_ms
    }

    fn shard_index(agent_id: &str, kind: MetricKind, subject: &str) -> usize {
        let mut bytes = Vec::with_capacity(agent_id.len() + subject.len() + 12);
        bytes.extend_from_slice(agent_id.as_bytes());
        bytes.push(b'|');
        bytes.extend_from_slice(kind.as_str().as_bytes());
        bytes.push(b'|');
        bytes.extend_from_slice(subject.as_bytes());
        (fnv1a(&bytes) % SHARD_COUNT as u64) as usize
    }

    fn read_shard(&self, idx: usize) -> RwLockReadGuard<'_, Cell> {
        self.shards[idx]
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_shard(&self, idx: usize) -> RwLockWriteGuard<'_, Cell> {
        self.shards[idx]
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stores the payload if it is newer than the current cell. Returns
    /// `true` when the cell changed (callers mirror changes to persistence).
    pub fn update(
        &self,
        agent_id: &str,
        kind: MetricKind,
        subject: &str,
        ts_ms: i64,
        fields: Map<String, serde_json::Value>,
    ) -> bool {
        let idx = Self::shard_index(agent_id, kind, subject);
        let key = (agent_id.to_owned(), kind, subject.to_owned());
        let mut shard = self.write_shard(idx);
        match shard.get(&key) {
            Some(existing) if existing.ts_ms > ts_ms => false,
            _ => {
                shard.insert(key, LatestValue { ts_ms, fields });
                true
            }
        }
    }

    pub fn get(
        &self,
        agent_id: &str,
        kind: MetricKind,
        subject: &str,
        now_ms: i64,
    ) -> Option<LatestValue> {
        let idx = Self::shard_index(agent_id, kind, subject);
        let shard = self.read_shard(idx);
        let value = shard.get(&(agent_id.to_owned(), kind, subject.to_owned()))?;
        if now_ms - value.ts_ms > self.ttl_ms {
            return None;
        }
        Some(value.clone())
    }

    /// Newest unexpired value of one numeric field, any subject. Multi-
    /// instance kinds resolve to the specific subject when given.
    pub fn get_field(
        &self,
        agent_id: &str,
        kind: MetricKind,
        subject: Option<&str>,
        field: &str,
        now_ms: i64,
    ) -> Option<f64> {
        match subject {
            Some(subject) => self
                .get(agent_id, kind, subject, now_ms)?
                .fields
                .get(field)?
                .as_f64(),
            None => {
                let mut newest: Option<(i64, f64)> = None;
                for shard in &self.shards {
                    let shard = shard.read().unwrap_or_else(|poisoned| poisoned.into_inner());
                    for ((agent, k, _), value) in shard.iter() {
                        if agent != agent_id || *k != kind {
                            continue;
                        }
                        if now_ms - value.ts_ms > self.ttl_ms {
                            continue;
                        }
                        if let Some(v) = value.fields.get(field).and_then(|v| v.as_f64()) {
                            match newest {
                                Some((ts, _)) if ts >= value.ts_ms => {}
                                _ => newest = Some((value.ts_ms, v)),
                            }
                        }
                    }
                }
                newest.map(|(_, v)| v)
            }
        }
    }

    /// All unexpired cells for one agent (the `/latest` endpoint).
    pub fn snapshot_for_agent(
        &self,
        agent_id: &str,
        now_ms: i64,
    ) -> Vec<(MetricKind, String, LatestValue)> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let shard = shard.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            for ((agent, kind, subject), value) in shard.iter() {
                if agent == agent_id && now_ms - value.ts_ms <= self.ttl_ms {
                    out.push((*kind, subject.clone(), value.clone()));
                }
            }
        }
        out.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()).then_with(|| a.1.cmp(&b.1)));
        out
    }
}
