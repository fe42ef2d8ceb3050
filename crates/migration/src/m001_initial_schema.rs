use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m001_initial_schema"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.get_connection().execute_unprepared(UP_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(DOWN_SQL)
            .await?;
        Ok(())
    }
}

// Time columns are epoch milliseconds throughout.
const UP_SQL: &str = "
PRAGMA journal_mode=WAL;

CREATE TABLE IF NOT EXISTS api_keys (
    id TEXT PRIMARY KEY NOT NULL,
    key TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS agents (
    id TEXT PRIMARY KEY NOT NULL,
    api_key TEXT NOT NULL,
    name TEXT NOT NULL,
    hostname TEXT NOT NULL DEFAULT '',
    ip TEXT NOT NULL DEFAULT '',
    os TEXT NOT NULL DEFAULT '',
    arch TEXT NOT NULL DEFAULT '',
    version TEXT NOT NULL DEFAULT '',
    location TEXT NOT NULL DEFAULT '',
    status INTEGER NOT NULL DEFAULT 0,
    last_seen_at INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_agents_status ON agents(status);
CREATE INDEX IF NOT EXISTS idx_agents_last_seen ON agents(last_seen_at DESC);

CREATE TABLE IF NOT EXISTS monitors (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    monitor_type TEXT NOT NULL,
    target TEXT NOT NULL,
    interval_sec INTEGER NOT NULL,
    timeout_ms INTEGER NOT NULL,
    expected TEXT,
    probe_selection TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS check_results (
    id TEXT PRIMARY KEY NOT NULL,
    monitor_id TEXT NOT NULL,
    agent_id TEXT NOT NULL,
    started_at INTEGER NOT NULL,
    latency_ms INTEGER NOT NULL,
    status TEXT NOT NULL,
    http_code INTEGER,
    tls_expiry_at INTEGER,
    error TEXT
);
CREATE INDEX IF NOT EXISTS idx_check_results_monitor_time
    ON check_results(monitor_id, started_at);

CREATE TABLE IF NOT EXISTS monitor_verdicts (
    id TEXT PRIMARY KEY NOT NULL,
    monitor_id TEXT NOT NULL,
    tick_at INTEGER NOT NULL,
    status TEXT NOT NULL,
    participant_count INTEGER NOT NULL,
    down_count INTEGER NOT NULL,
    min_latency_ms INTEGER,
    max_latency_ms INTEGER,
    cert_expiry_days INTEGER
);
CREATE INDEX IF NOT EXISTS idx_monitor_verdicts_monitor_time
    ON monitor_verdicts(monitor_id, tick_at);

CREATE TABLE IF NOT EXISTS alert_rules (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    agent_id TEXT,
    monitor_id TEXT,
    op TEXT NOT NULL,
    threshold REAL NOT NULL,
    for_sec INTEGER NOT NULL,
    level TEXT NOT NULL,
    escalation_threshold REAL,
    channels TEXT NOT NULL DEFAULT '[]',
    enabled INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS alert_records (
    id TEXT PRIMARY KEY NOT NULL,
    rule_id TEXT NOT NULL,
    status TEXT NOT NULL,
    first_breach_at INTEGER NOT NULL,
    fired_at INTEGER NOT NULL,
    resolved_at INTEGER,
    last_value REAL NOT NULL,
    threshold REAL NOT NULL,
    level TEXT NOT NULL,
    message TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_alert_records_rule_status
    ON alert_records(rule_id, status);

CREATE TABLE IF NOT EXISTS properties (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    value TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS latest_snapshots (
    agent_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    subject TEXT NOT NULL DEFAULT '',
    ts_ms INTEGER NOT NULL,
    fields TEXT NOT NULL,
    PRIMARY KEY (agent_id, kind, subject)
);
";

const DOWN_SQL: &str = "
DROP TABLE IF EXISTS latest_snapshots;
DROP TABLE IF EXISTS properties;
DROP TABLE IF EXISTS alert_records;
DROP TABLE IF EXISTS alert_rules;
DROP TABLE IF EXISTS monitor_verdicts;
DROP TABLE IF EXISTS check_results;
DROP TABLE IF EXISTS monitors;
DROP TABLE IF EXISTS agents;
DROP TABLE IF EXISTS api_keys;
";
