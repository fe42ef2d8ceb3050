use crate::partition::PartitionManager;
use crate::{AggRow, RawRow, Resolution, SeriesQuery, SeriesStore};
use anyhow::Result;
use pika_common::types::MetricKind;
use std::path::Path;
use std::str::FromStr;

/// [`SeriesStore`] backed by daily-partitioned SQLite files.
pub struct SqlitePartitionEngine {
    partitions: PartitionManager,
}

impl SqlitePartitionEngine {
    pub fn new(data_dir: &Path) -> Result<Self> {
        Ok(Self {
            partitions: PartitionManager::new(data_dir)?,
        })
    }
}

impl SeriesStore for SqlitePartitionEngine {
    fn append_raw(&self, rows: &[RawRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        // Batches are grouped per partition so each file commits once.
        let mut by_key: Vec<(String, Vec<&RawRow>)> = Vec::new();
        for row in rows {
            let key = self.partitions.get_or_create(row.ts_ms)?;
            match by_key.iter_mut().find(|(k, _)| *k == key) {
                Some((_, group)) => group.push(row),
                None => by_key.push((key, vec![row])),
            }
        }

        for (key, group) in by_key {
            self.partitions.with_partition(&key, |conn| {
                let tx = conn.unchecked_transaction()?;
                {
                    let mut stmt = tx.prepare_cached(
                        "INSERT INTO raw_samples (agent_id, kind, subject, ts_ms, fields) \
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                    )?;
                    for row in &group {
                        stmt.execute(rusqlite::params![
                            &row.agent_id,
                            row.kind.as_str(),
                            &row.subject,
                            row.ts_ms,
                            &row.fields_json,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })?;
        }
        Ok(())
    }

    fn append_aggregates(&self, rows: &[AggRow]) -> Result<()> {
        for row in rows {
            let key = self.partitions.get_or_create(row.bucket_start_ms)?;
            let sql = format!(
                "INSERT INTO {} (agent_id, kind, subject, bucket_start_ms, fields) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                row.resolution.table()
            );
            self.partitions.with_partition(&key, |conn| {
                conn.execute(
                    &sql,
                    rusqlite::params![
                        &row.agent_id,
                        row.kind.as_str(),
                        &row.subject,
                        row.bucket_start_ms,
                        &row.fields_json,
                    ],
                )?;
                Ok(())
            })?;
        }
        Ok(())
    }

    fn query_aggregates(&self, query: &SeriesQuery) -> Result<Vec<AggRow>> {
        let keys = self
            .partitions
            .partitions_in_range(query.from_ms, query.to_ms)?;
        let mut results = Vec::new();
        let sql = format!(
            "SELECT agent_id, kind, subject, bucket_start_ms, fields FROM {} \
             WHERE agent_id = ?1 AND kind = ?2 \
               AND bucket_start_ms >= ?3 AND bucket_start_ms < ?4 \
             ORDER BY bucket_start_ms ASC, subject ASC",
            query.resolution.table()
        );

        for key in keys {
            self.partitions.with_partition(&key, |conn| {
                let mut stmt = conn.prepare_cached(&sql)?;
                let rows = stmt.query_map(
                    rusqlite::params![
                        &query.agent_id,
                        query.kind.as_str(),
                        query.from_ms,
                        query.to_ms,
                    ],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, i64>(3)?,
                            row.get::<_, String>(4)?,
                        ))
                    },
                )?;
                for row in rows {
                    let (agent_id, kind, subject, bucket_start_ms, fields_json) = row?;
                    let kind = MetricKind::from_str(&kind)
                        .map_err(|e| anyhow::anyhow!("corrupt kind column: {e}"))?;
                    results.push(AggRow {
                        agent_id,
                        kind,
                        subject,
                        resolution: query.resolution,
                        bucket_start_ms,
                        fields_json,
                    });
                }
                Ok(())
            })?;
        }

        // Partitions were visited in day order; within a day rows are
        // already sorted, so one stable sort keeps the contract cheap.
        results.sort_by(|a, b| {
            a.bucket_start_ms
                .cmp(&b.bucket_start_ms)
                .then_with(|| a.subject.cmp(&b.subject))
        });
        Ok(results)
    }

    fn delete_raw_before(&self, cutoff_ms: i64, max_rows: usize) -> Result<usize> {
        self.partitions
            .delete_before("raw_samples", "ts_ms", cutoff_ms, max_rows)
    }

    fn delete_aggregates_before(
        &self,
        resolution: Resolution,
        cutoff_ms: i64,
        max_rows: usize,
    ) -> Result<usize> {
        self.partitions
            .delete_before(resolution.table(), "bucket_start_ms", cutoff_ms, max_rows)
    }

    fn drop_expired_partitions(&self) -> Result<u32> {
        // A whole file is droppable only once the longest-lived resolution
        // has aged out of it.
        let max_retention = Resolution::ALL
            .iter()
            .map(|r| r.retention_days())
            .max()
            .unwrap_or(365);
        self.partitions.drop_older_than(max_retention + 1)
    }

    fn count_raw_before(&self, cutoff_ms: i64) -> Result<u64> {
        self.partitions
            .count_before("raw_samples", "ts_ms", cutoff_ms)
    }

    fn count_aggregates_before(&self, resolution: Resolution, cutoff_ms: i64) -> Result<u64> {
        self.partitions
            .count_before(resolution.table(), "bucket_start_ms", cutoff_ms)
    }
}
