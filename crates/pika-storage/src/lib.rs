//! Persistence layer of the Pika server.
//!
//! Storage is two-tier: high-volume time-series rows (raw samples and the
//! 1m/5m/1h aggregates) live in daily-partitioned SQLite files managed by
//! [`partition::PartitionManager`] and accessed through the [`SeriesStore`]
//! trait, while domain rows (agents, monitors, check results, verdicts,
//! alert rules and records, properties) live in a single SeaORM database
//! managed by [`store::PikaStore`].

pub mod engine;
pub mod entities;
pub mod partition;
pub mod store;

#[cfg(test)]
mod tests;

use anyhow::Result;
use pika_common::types::MetricKind;
use serde::{Deserialize, Serialize};

/// Aggregate resolution. Each resolution owns its own partition table so
/// retention sweeps stay independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "1h")]
    OneHour,
}

impl Resolution {
    pub const ALL: [Resolution; 3] = [
        Resolution::OneMinute,
        Resolution::FiveMinutes,
        Resolution::OneHour,
    ];

    pub fn secs(&self) -> i64 {
        match self {
            Resolution::OneMinute => 60,
            Resolution::FiveMinutes => 300,
            Resolution::OneHour => 3600,
        }
    }

    pub fn millis(&self) -> i64 {
        self.secs() * 1000
    }

    pub fn table(&self) -> &'static str {
        match self {
            Resolution::OneMinute => "agg_1m",
            Resolution::FiveMinutes => "agg_5m",
            Resolution::OneHour => "agg_1h",
        }
    }

    /// Retention window for this resolution.
    pub fn retention_days(&self) -> i64 {
        match self {
            Resolution::OneMinute => 7,
            Resolution::FiveMinutes => 30,
            Resolution::OneHour => 365,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::OneMinute => "1m",
            Resolution::FiveMinutes => "5m",
            Resolution::OneHour => "1h",
        }
    }
}

/// One raw sample row, exactly as received (payload kept as JSON text).
#[derive(Debug, Clone)]
pub struct RawRow {
    pub agent_id: String,
    pub kind: MetricKind,
    pub subject: String,
    pub ts_ms: i64,
    pub fields_json: String,
}

/// One closed aggregate bucket. `fields_json` maps field name to
/// `{min, avg, max}` for gauges and `{max}` for rates.
#[derive(Debug, Clone)]
pub struct AggRow {
    pub agent_id: String,
    pub kind: MetricKind,
    pub subject: String,
    pub resolution: Resolution,
    pub bucket_start_ms: i64,
    pub fields_json: String,
}

/// Parameters for an aggregate range read.
#[derive(Debug, Clone)]
pub struct SeriesQuery {
    pub agent_id: String,
    pub kind: MetricKind,
    pub resolution: Resolution,
    pub from_ms: i64,
    pub to_ms: i64,
}

/// Time-series persistence. Implementations must be shareable across the
/// ingest writers, the retention sweeper and the HTTP read path.
pub trait SeriesStore: Send + Sync {
    /// Appends raw samples in the order given.
    fn append_raw(&self, rows: &[RawRow]) -> Result<()>;

    /// Appends closed aggregate buckets.
    fn append_aggregates(&self, rows: &[AggRow]) -> Result<()>;

    /// Reads aggregate rows for one `(agent, kind)` over `[from, to)`,
    /// ascending by bucket start (then subject).
    fn query_aggregates(&self, query: &SeriesQuery) -> Result<Vec<AggRow>>;

    /// Deletes raw rows older than `cutoff_ms`, at most `max_rows` per call.
    /// Returns the number of rows removed.
    fn delete_raw_before(&self, cutoff_ms: i64, max_rows: usize) -> Result<usize>;

    /// Deletes aggregate rows of one resolution older than `cutoff_ms`,
    /// at most `max_rows` per call. Returns the number of rows removed.
    fn delete_aggregates_before(
        &self,
        resolution: Resolution,
        cutoff_ms: i64,
        max_rows: usize,
    ) -> Result<usize>;

    /// Drops whole partition files past every retention window.
    fn drop_expired_partitions(&self) -> Result<u32>;

    /// Counts raw rows older than `cutoff_ms` (retention verification).
    fn count_raw_before(&self, cutoff_ms: i64) -> Result<u64>;

    /// Counts aggregate rows of one resolution older than `cutoff_ms`.
    fn count_aggregates_before(&self, resolution: Resolution, cutoff_ms: i64) -> Result<u64>;
}

pub use engine::SqlitePartitionEngine;
pub use store::agent::{AgentRow, ApiKeyRow};
pub use store::alert::{AlertRecordRow, AlertRuleRow};
pub use store::check::{CheckResultRow, VerdictRow};
pub use store::monitor::MonitorRow;
pub use store::property::PropertyRow;
pub use store::snapshot::SnapshotRow;
pub use store::PikaStore;
