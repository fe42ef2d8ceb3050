use crate::engine::SqlitePartitionEngine;
use crate::{AggRow, PikaStore, RawRow, Resolution, SeriesQuery, SeriesStore};
use chrono::Utc;
use pika_common::types::{AgentStatus, MetricKind};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

fn setup_engine() -> (TempDir, SqlitePartitionEngine) {
    let dir = TempDir::new().unwrap();
    let engine = SqlitePartitionEngine::new(dir.path()).unwrap();
    (dir, engine)
}

fn raw(agent: &str, ts_ms: i64, usage: f64) -> RawRow {
    RawRow {
        agent_id: agent.to_string(),
        kind: MetricKind::Cpu,
        subject: String::new(),
        ts_ms,
        fields_json: format!(r#"{{"usagePercent":{usage}}}"#),
    }
}

fn agg(agent: &str, resolution: Resolution, bucket_start_ms: i64) -> AggRow {
    AggRow {
        agent_id: agent.to_string(),
        kind: MetricKind::Cpu,
        subject: String::new(),
        resolution,
        bucket_start_ms,
        fields_json: r#"{"usagePercent":{"min":1.0,"avg":2.0,"max":3.0}}"#.to_string(),
    }
}

#[test]
fn append_and_query_aggregates_ascending() {
    let (_dir, engine) = setup_engine();
    let now = Utc::now().timestamp_millis();
    let base = now - now % 60_000;

    // Insert out of order; the read path must come back ascending.
    engine
        .append_aggregates(&[
            agg("web-01", Resolution::OneMinute, base),
            agg("web-01", Resolution::OneMinute, base - 120_000),
            agg("web-01", Resolution::OneMinute, base - 60_000),
        ])
        .unwrap();

    let rows = engine
        .query_aggregates(&SeriesQuery {
            agent_id: "web-01".into(),
            kind: MetricKind::Cpu,
            resolution: Resolution::OneMinute,
            from_ms: base - 600_000,
            to_ms: base + 60_000,
        })
        .unwrap();

    assert_eq!(rows.len(), 3);
    assert!(rows.windows(2).all(|w| w[0].bucket_start_ms < w[1].bucket_start_ms));
}

#[test]
fn aggregate_tables_are_independent() {
    let (_dir, engine) = setup_engine();
    let now = Utc::now().timestamp_millis();
    let hour = now - now % 3_600_000;

    engine
        .append_aggregates(&[
            agg("web-01", Resolution::OneMinute, hour),
            agg("web-01", Resolution::OneHour, hour),
        ])
        .unwrap();

    let rows_1m = engine
        .query_aggregates(&SeriesQuery {
            agent_id: "web-01".into(),
            kind: MetricKind::Cpu,
            resolution: Resolution::OneMinute,
            from_ms: hour,
            to_ms: hour + 1,
        })
        .unwrap();
    let rows_1h = engine
        .query_aggregates(&SeriesQuery {
            agent_id: "web-01".into(),
            kind: MetricKind::Cpu,
            resolution: Resolution::OneHour,
            from_ms: hour,
            to_ms: hour + 1,
        })
        .unwrap();

    assert_eq!(rows_1m.len(), 1);
    assert_eq!(rows_1h.len(), 1);
}

#[test]
fn raw_retention_deletes_in_batches() {
    let (_dir, engine) = setup_engine();
    let now = Utc::now().timestamp_millis();
    let old = now - 3 * 3_600_000; // 3h ago, past the 2h raw retention

    let rows: Vec<RawRow> = (0..10).map(|i| raw("web-01", old + i, 50.0)).collect();
    engine.append_raw(&rows).unwrap();
    engine.append_raw(&[raw("web-01", now, 60.0)]).unwrap();

    let cutoff = now - 2 * 3_600_000;
    assert_eq!(engine.count_raw_before(cutoff).unwrap(), 10);

    // Batch smaller than the backlog: two passes drain it.
    let first = engine.delete_raw_before(cutoff, 6).unwrap();
    assert_eq!(first, 6);
    let second = engine.delete_raw_before(cutoff, 6).unwrap();
    assert_eq!(second, 4);

    assert_eq!(engine.count_raw_before(cutoff).unwrap(), 0);
    // The fresh sample survives.
    assert_eq!(engine.count_raw_before(now + 1).unwrap(), 1);
}

#[tokio::test]
async fn property_round_trip() {
    let store = PikaStore::new_in_memory().await.unwrap();

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct SystemConfig {
        #[serde(rename = "systemNameEn")]
        system_name_en: String,
        #[serde(rename = "systemNameZh")]
        system_name_zh: String,
        #[serde(rename = "logoBase64")]
        logo_base64: String,
    }

    let cfg = SystemConfig {
        system_name_en: "Pika Monitor".into(),
        system_name_zh: "皮卡监控".into(),
        logo_base64: String::new(),
    };
    store
        .set_property("system_config", "系统配置", &cfg)
        .await
        .unwrap();

    let row = store.get_property("system_config").await.unwrap().unwrap();
    assert_eq!(row.name, "系统配置");
    assert_eq!(row.value["systemNameEn"], "Pika Monitor");
    assert_eq!(row.value["systemNameZh"], "皮卡监控");

    let decoded: SystemConfig = store.get_property_into("system_config").await.unwrap();
    assert_eq!(decoded, cfg);

    // Upsert replaces in place.
    store
        .set_property(
            "system_config",
            "系统配置",
            &serde_json::json!({"systemNameEn": "x", "systemNameZh": "y", "logoBase64": ""}),
        )
        .await
        .unwrap();
    let row = store.get_property("system_config").await.unwrap().unwrap();
    assert_eq!(row.value["systemNameEn"], "x");

    assert!(store.delete_property("system_config").await.unwrap());
    assert!(store.get_property("system_config").await.unwrap().is_none());
}

#[tokio::test]
async fn agent_handshake_upsert_and_liveness() {
    let store = PikaStore::new_in_memory().await.unwrap();
    let now = Utc::now().timestamp_millis();

    let meta = pika_common::frames::AgentMeta {
        hostname: "web-01".into(),
        ip: "10.0.0.5".into(),
        os: "linux".into(),
        arch: "amd64".into(),
        version: "0.3.0".into(),
        location: "eu-west".into(),
    };

    let created = store
        .upsert_agent_on_handshake(None, "k-1", &meta, now)
        .await
        .unwrap();
    assert_eq!(created.status, AgentStatus::Online);
    assert_eq!(created.hostname, "web-01");

    // Reconnect with the same id refreshes metadata instead of duplicating.
    let mut meta2 = meta.clone();
    meta2.version = "0.3.1".into();
    let updated = store
        .upsert_agent_on_handshake(Some(&created.id), "k-1", &meta2, now + 1000)
        .await
        .unwrap();
    assert_eq!(updated.id, created.id);
    assert_eq!(updated.version, "0.3.1");
    assert_eq!(store.list_agents().await.unwrap().len(), 1);

    // Stale detection picks it up once last_seen falls behind the cutoff.
    let stale = store
        .list_stale_online_agents(now + 100_000)
        .await
        .unwrap();
    assert_eq!(stale.len(), 1);

    store
        .set_agent_status(&created.id, AgentStatus::Offline, now + 100_000)
        .await
        .unwrap();
    assert!(store.list_online_agents().await.unwrap().is_empty());
}

#[tokio::test]
async fn firing_record_queries() {
    use crate::AlertRecordRow;
    use pika_common::types::{AlertLevel, AlertRecordStatus};

    let store = PikaStore::new_in_memory().await.unwrap();
    let now = Utc::now().timestamp_millis();

    let record = AlertRecordRow {
        id: "r-1".into(),
        rule_id: "rule-1".into(),
        status: AlertRecordStatus::Firing,
        first_breach_at: now - 60_000,
        fired_at: now,
        resolved_at: None,
        last_value: 91.0,
        threshold: 80.0,
        level: AlertLevel::Warning,
        message: "cpu above threshold".into(),
    };
    store.insert_alert_record(&record).await.unwrap();

    let firing = store.firing_records("rule-1").await.unwrap();
    assert_eq!(firing.len(), 1);

    let resolved = store
        .resolve_alert_record("r-1", now + 1000, 50.0, "recovered")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resolved.status, AlertRecordStatus::Resolved);
    assert_eq!(resolved.resolved_at, Some(now + 1000));
    assert!(store.firing_records("rule-1").await.unwrap().is_empty());
}
