use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing;

const SERIES_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS raw_samples (
    agent_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    subject TEXT NOT NULL DEFAULT '',
    ts_ms INTEGER NOT NULL,
    fields TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_raw_agent_kind_time
    ON raw_samples(agent_id, kind, ts_ms);
CREATE INDEX IF NOT EXISTS idx_raw_time ON raw_samples(ts_ms);

CREATE TABLE IF NOT EXISTS agg_1m (
    agent_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    subject TEXT NOT NULL DEFAULT '',
    bucket_start_ms INTEGER NOT NULL,
    fields TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_agg_1m_series
    ON agg_1m(agent_id, kind, subject, bucket_start_ms);
CREATE INDEX IF NOT EXISTS idx_agg_1m_time ON agg_1m(bucket_start_ms);

CREATE TABLE IF NOT EXISTS agg_5m (
    agent_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    subject TEXT NOT NULL DEFAULT '',
    bucket_start_ms INTEGER NOT NULL,
    fields TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_agg_5m_series
    ON agg_5m(agent_id, kind, subject, bucket_start_ms);
CREATE INDEX IF NOT EXISTS idx_agg_5m_time ON agg_5m(bucket_start_ms);

CREATE TABLE IF NOT EXISTS agg_1h (
    agent_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    subject TEXT NOT NULL DEFAULT '',
    bucket_start_ms INTEGER NOT NULL,
    fields TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_agg_1h_series
    ON agg_1h(agent_id, kind, subject, bucket_start_ms);
CREATE INDEX IF NOT EXISTS idx_agg_1h_time ON agg_1h(bucket_start_ms);
";

/// Daily SQLite partition files (`YYYY-MM-DD.db`, WAL mode) holding the
/// time-series tables. Connections are cached per partition.
pub struct PartitionManager {
    data_dir: PathBuf,
    connections: Mutex<HashMap<String, Connection>>,
}

impl PartitionManager {
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            connections: Mutex::new(HashMap::new()),
        })
    }

    /// Lock the connections map, recovering from a poisoned Mutex if necessary.
    fn lock_connections(&self) -> MutexGuard<'_, HashMap<String, Connection>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn partition_key(ts_ms: i64) -> String {
        DateTime::<Utc>::from_timestamp_millis(ts_ms)
            .unwrap_or_else(Utc::now)
            .format("%Y-%m-%d")
            .to_string()
    }

    fn partition_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{key}.db"))
    }

    fn open_partition(&self, path: &Path) -> Result<Connection> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SERIES_SCHEMA)?;
        Ok(conn)
    }

    /// Resolves (creating if needed) the partition containing `ts_ms`.
    pub fn get_or_create(&self, ts_ms: i64) -> Result<String> {
        let key = Self::partition_key(ts_ms);
        let mut conns = self.lock_connections();
        if !conns.contains_key(&key) {
            let path = self.partition_path(&key);
            let existed = path.exists();
            let conn = self.open_partition(&path)?;
            if !existed {
                tracing::info!(partition = %key, "Created new partition");
            }
            conns.insert(key.clone(), conn);
        }
        Ok(key)
    }

    pub fn with_partition<F, R>(&self, key: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let conns = self.lock_connections();
        let conn = conns
            .get(key)
            .ok_or_else(|| anyhow::anyhow!("Partition {key} not found"))?;
        f(conn)
    }

    /// Existing partitions whose day overlaps `[from_ms, to_ms]`, ascending.
    pub fn partitions_in_range(&self, from_ms: i64, to_ms: i64) -> Result<Vec<String>> {
        let from_date = DateTime::<Utc>::from_timestamp_millis(from_ms)
            .unwrap_or_else(Utc::now)
            .date_naive();
        let to_date = DateTime::<Utc>::from_timestamp_millis(to_ms)
            .unwrap_or_else(Utc::now)
            .date_naive();
        let mut keys = Vec::new();
        let mut date = from_date;
        while date <= to_date {
            let key = date.format("%Y-%m-%d").to_string();
            let path = self.partition_path(&key);
            if path.exists() {
                let mut conns = self.lock_connections();
                if !conns.contains_key(&key) {
                    let conn = self.open_partition(&path)?;
                    conns.insert(key.clone(), conn);
                }
                keys.push(key);
            }
            date = date.succ_opt().unwrap_or(date);
        }
        Ok(keys)
    }

    /// Drops partition files whose whole day lies before `cutoff_days` ago.
    /// WAL/SHM companions are removed alongside the database file.
    pub fn drop_older_than(&self, cutoff_days: i64) -> Result<u32> {
        let cutoff_date = (Utc::now() - chrono::Duration::days(cutoff_days)).date_naive();
        let mut removed = 0u32;

        let mut expired: Vec<(String, PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(date_str) = name.strip_suffix(".db") {
                if let Ok(date) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
                    if date < cutoff_date {
                        expired.push((date_str.to_string(), entry.path()));
                    }
                }
            }
        }

        for (date_str, db_path) in &expired {
            {
                // Dropping the cached Connection checkpoints the WAL.
                let mut conns = self.lock_connections();
                conns.remove(date_str.as_str());
            }

            if let Err(e) = std::fs::remove_file(db_path) {
                tracing::error!(partition = %date_str, error = %e, "Failed to remove partition file");
                continue;
            }
            for suffix in ["-wal", "-shm"] {
                let aux = self.data_dir.join(format!("{date_str}.db{suffix}"));
                if aux.exists() {
                    if let Err(e) = std::fs::remove_file(&aux) {
                        tracing::warn!(path = %aux.display(), error = %e, "Failed to remove auxiliary file");
                    }
                }
            }

            tracing::info!(partition = %date_str, "Removed expired partition");
            removed += 1;
        }

        Ok(removed)
    }

    /// Partition keys on disk whose day starts at or before `cutoff_ms`,
    /// ascending. Reads the directory rather than walking the calendar.
    fn keys_up_to(&self, cutoff_ms: i64) -> Result<Vec<String>> {
        let cutoff_date = DateTime::<Utc>::from_timestamp_millis(cutoff_ms)
            .unwrap_or_else(Utc::now)
            .date_naive();
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(date_str) = name.strip_suffix(".db") {
                if let Ok(date) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
                    if date <= cutoff_date {
                        let mut conns = self.lock_connections();
                        if !conns.contains_key(date_str) {
                            let conn = self.open_partition(&entry.path())?;
                            conns.insert(date_str.to_string(), conn);
                        }
                        keys.push(date_str.to_string());
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Batched row deletion in one table across partitions overlapping the
    /// cutoff. `rowid IN (SELECT ... LIMIT n)` keeps each delete bounded.
    pub fn delete_before(
        &self,
        table: &str,
        time_column: &str,
        cutoff_ms: i64,
        max_rows: usize,
    ) -> Result<usize> {
        let keys = self.keys_up_to(cutoff_ms)?;
        let mut remaining = max_rows;
        let mut deleted = 0usize;

        for key in keys {
            if remaining == 0 {
                break;
            }
            let sql = format!(
                "DELETE FROM {table} WHERE rowid IN \
                 (SELECT rowid FROM {table} WHERE {time_column} < ?1 LIMIT ?2)"
            );
            let n = self.with_partition(&key, |conn| {
                let n = conn.execute(&sql, rusqlite::params![cutoff_ms, remaining as i64])?;
                Ok(n)
            })?;
            deleted += n;
            remaining = remaining.saturating_sub(n);
        }

        Ok(deleted)
    }

    pub fn count_before(&self, table: &str, time_column: &str, cutoff_ms: i64) -> Result<u64> {
        let keys = self.keys_up_to(cutoff_ms)?;
        let mut total = 0u64;
        for key in keys {
            let sql = format!("SELECT COUNT(*) FROM {table} WHERE {time_column} < ?1");
            let n: i64 = self.with_partition(&key, |conn| {
                let n = conn.query_row(&sql, rusqlite::params![cutoff_ms], |row| row.get(0))?;
                Ok(n)
            })?;
            total += n as u64;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn drop_older_than_removes_expired_partitions_and_wal_files() {
        let tmp = TempDir::new().unwrap();
        let pm = PartitionManager::new(tmp.path()).unwrap();

        let old_ms = (Utc::now() - chrono::Duration::days(10)).timestamp_millis();
        let old_key = pm.get_or_create(old_ms).unwrap();
        let today_key = pm.get_or_create(Utc::now().timestamp_millis()).unwrap();

        let old_db = tmp.path().join(format!("{old_key}.db"));
        let today_db = tmp.path().join(format!("{today_key}.db"));
        assert!(old_db.exists());
        assert!(today_db.exists());

        let old_wal = tmp.path().join(format!("{old_key}.db-wal"));
        std::fs::write(&old_wal, b"wal data").unwrap();

        let removed = pm.drop_older_than(7).unwrap();
        assert_eq!(removed, 1);
        assert!(!old_db.exists());
        assert!(!old_wal.exists());
        assert!(today_db.exists());
    }

    #[test]
    fn partitions_in_range_skips_missing_days() {
        let tmp = TempDir::new().unwrap();
        let pm = PartitionManager::new(tmp.path()).unwrap();

        let now = Utc::now().timestamp_millis();
        pm.get_or_create(now).unwrap();
        let keys = pm
            .partitions_in_range(now - 3 * 86_400_000, now)
            .unwrap();
        assert_eq!(keys.len(), 1);
    }
}
