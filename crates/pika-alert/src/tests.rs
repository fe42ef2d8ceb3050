use crate::engine::AlertEngine;
use crate::{AlertNotification, NotifyKind};
use pika_common::events::SystemEvent;
use pika_common::types::{AlertKind, AlertLevel, AlertRecordStatus, CompareOp, MetricKind};
use pika_ingest::latest::LatestOverlay;
use pika_storage::{AlertRecordRow, AlertRuleRow, PikaStore};
use serde_json::Map;
use std::sync::Arc;
use tokio::sync::mpsc;

const T0: i64 = 1_700_000_000_000;

struct Harness {
    engine: AlertEngine,
    store: Arc<PikaStore>,
    overlay: Arc<LatestOverlay>,
    events_tx: mpsc::UnboundedSender<SystemEvent>,
    notify_rx: mpsc::UnboundedReceiver<AlertNotification>,
}

async fn setup() -> Harness {
    let store = Arc::new(PikaStore::new_in_memory().await.unwrap());
    let overlay = Arc::new(LatestOverlay::new(10 * 60 * 1000));
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (notify_tx, notify_rx) = mpsc::unbounded_channel();
    let engine = AlertEngine::new(store.clone(), overlay.clone(), events_rx, notify_tx);
    Harness {
        engine,
        store,
        overlay,
        events_tx,
        notify_rx,
    }
}

fn cpu_rule(for_sec: i64) -> AlertRuleRow {
    AlertRuleRow {
        id: "rule-cpu".into(),
        name: "cpu high".into(),
        kind: AlertKind::Cpu,
        agent_id: Some("a1".into()),
        monitor_id: None,
        op: CompareOp::GreaterThan,
        threshold: 80.0,
        for_sec,
        level: AlertLevel::Warning,
        escalation_threshold: None,
        channels: vec![],
        enabled: true,
        created_at: T0,
    }
}

fn set_cpu(overlay: &LatestOverlay, ts_ms: i64, usage: f64) {
    let mut fields = Map::new();
    fields.insert("usagePercent".into(), usage.into());
    overlay.update("a1", MetricKind::Cpu, "", ts_ms, fields);
}

#[tokio::test]
async fn fires_after_sustain_and_resolves() {
    let mut h = setup().await;
    h.store.insert_alert_rule(&cpu_rule(60)).await.unwrap();

    // Below threshold: nothing happens.
    set_cpu(&h.overlay, T0, 70.0);
    h.engine.evaluate_tick(T0).await.unwrap();
    assert!(h.notify_rx.try_recv().is_err());

    // Breach starts at t=10s; the sustain window keeps it pending.
    set_cpu(&h.overlay, T0 + 10_000, 85.0);
    h.engine.evaluate_tick(T0 + 10_000).await.unwrap();
    for offset in [20_000, 30_000, 40_000, 50_000, 60_000] {
        set_cpu(&h.overlay, T0 + offset, 85.0);
        h.engine.evaluate_tick(T0 + offset).await.unwrap();
    }
    assert!(h.store.firing_records("rule-cpu").await.unwrap().is_empty());
    assert!(h.notify_rx.try_recv().is_err());

    // t=70s: breach sustained for 60s, the record fires once.
    set_cpu(&h.overlay, T0 + 70_000, 85.0);
    h.engine.evaluate_tick(T0 + 70_000).await.unwrap();

    let firing = h.store.firing_records("rule-cpu").await.unwrap();
    assert_eq!(firing.len(), 1);
    assert_eq!(firing[0].fired_at, T0 + 70_000);
    assert_eq!(firing[0].first_breach_at, T0 + 10_000);
    assert_eq!(firing[0].last_value, 85.0);

    let event = h.notify_rx.try_recv().unwrap();
    assert_eq!(event.kind, NotifyKind::Firing);
    assert_eq!(event.rule.id, "rule-cpu");
    assert!(h.notify_rx.try_recv().is_err());

    // Further breached ticks do not duplicate the record.
    set_cpu(&h.overlay, T0 + 80_000, 86.0);
    h.engine.evaluate_tick(T0 + 80_000).await.unwrap();
    assert_eq!(h.store.firing_records("rule-cpu").await.unwrap().len(), 1);
    assert!(h.notify_rx.try_recv().is_err());

    // Recovery at t=100s resolves and notifies exactly once.
    set_cpu(&h.overlay, T0 + 100_000, 50.0);
    h.engine.evaluate_tick(T0 + 100_000).await.unwrap();

    assert!(h.store.firing_records("rule-cpu").await.unwrap().is_empty());
    let event = h.notify_rx.try_recv().unwrap();
    assert_eq!(event.kind, NotifyKind::Resolved);
    assert_eq!(event.record.status, AlertRecordStatus::Resolved);
    assert_eq!(event.record.resolved_at, Some(T0 + 100_000));
    assert!(h.notify_rx.try_recv().is_err());
}

#[tokio::test]
async fn flapping_below_sustain_never_fires() {
    let mut h = setup().await;
    h.store.insert_alert_rule(&cpu_rule(60)).await.unwrap();

    // 85/70 oscillation every 15 s: the breach never holds for 60 s.
    for i in 0..10 {
        let ts = T0 + i * 15_000;
        let usage = if i % 2 == 0 { 85.0 } else { 70.0 };
        set_cpu(&h.overlay, ts, usage);
        h.engine.evaluate_tick(ts).await.unwrap();
    }

    assert!(h.store.firing_records("rule-cpu").await.unwrap().is_empty());
    assert!(h.store.all_firing_records().await.unwrap().is_empty());
    assert!(h.notify_rx.try_recv().is_err());
}

#[tokio::test]
async fn offline_agent_fires_network_rule() {
    let mut h = setup().await;
    h.store
        .insert_alert_rule(&AlertRuleRow {
            id: "rule-net".into(),
            name: "agent offline".into(),
            kind: AlertKind::Network,
            agent_id: Some("a1".into()),
            monitor_id: None,
            op: CompareOp::LessEqual,
            threshold: 0.0,
            for_sec: 30,
            level: AlertLevel::Critical,
            escalation_threshold: None,
            channels: vec![],
            enabled: true,
            created_at: T0,
        })
        .await
        .unwrap();

    // Sweeper noticed the agent went dark.
    h.events_tx
        .send(SystemEvent::AgentOffline {
            agent_id: "a1".into(),
            at_ms: T0,
        })
        .unwrap();

    h.engine.evaluate_tick(T0).await.unwrap();
    assert!(h.store.firing_records("rule-net").await.unwrap().is_empty());

    h.engine.evaluate_tick(T0 + 30_000).await.unwrap();
    let firing = h.store.firing_records("rule-net").await.unwrap();
    assert_eq!(firing.len(), 1);
    assert_eq!(h.notify_rx.try_recv().unwrap().kind, NotifyKind::Firing);

    // The next inbound frame flips the agent back online.
    h.events_tx
        .send(SystemEvent::AgentOnline {
            agent_id: "a1".into(),
            at_ms: T0 + 60_000,
        })
        .unwrap();
    h.engine.evaluate_tick(T0 + 60_000).await.unwrap();
    assert!(h.store.firing_records("rule-net").await.unwrap().is_empty());
    assert_eq!(h.notify_rx.try_recv().unwrap().kind, NotifyKind::Resolved);
}

#[tokio::test]
async fn duplicate_firing_records_are_repaired() {
    let mut h = setup().await;
    h.store.insert_alert_rule(&cpu_rule(0)).await.unwrap();

    // Two firing rows for one rule violate the uniqueness invariant.
    for (id, fired_at) in [("r-old", T0 - 120_000), ("r-new", T0 - 60_000)] {
        h.store
            .insert_alert_record(&AlertRecordRow {
                id: id.into(),
                rule_id: "rule-cpu".into(),
                status: AlertRecordStatus::Firing,
                first_breach_at: fired_at,
                fired_at,
                resolved_at: None,
                last_value: 90.0,
                threshold: 80.0,
                level: AlertLevel::Warning,
                message: String::new(),
            })
            .await
            .unwrap();
    }

    set_cpu(&h.overlay, T0, 90.0);
    h.engine.evaluate_tick(T0).await.unwrap();

    let firing = h.store.firing_records("rule-cpu").await.unwrap();
    assert_eq!(firing.len(), 1);
    // The newer record survives; the older was resolved in place.
    assert_eq!(firing[0].id, "r-new");
}

#[tokio::test]
async fn deleted_rule_auto_resolves_with_reason() {
    let mut h = setup().await;

    h.store
        .insert_alert_record(&AlertRecordRow {
            id: "r-orphan".into(),
            rule_id: "rule-gone".into(),
            status: AlertRecordStatus::Firing,
            first_breach_at: T0 - 60_000,
            fired_at: T0 - 60_000,
            resolved_at: None,
            last_value: 95.0,
            threshold: 80.0,
            level: AlertLevel::Warning,
            message: String::new(),
        })
        .await
        .unwrap();

    h.engine.evaluate_tick(T0).await.unwrap();

    assert!(h.store.all_firing_records().await.unwrap().is_empty());
    // No notification for a rule that no longer routes anywhere.
    assert!(h.notify_rx.try_recv().is_err());
}

#[tokio::test]
async fn escalation_emits_single_level_up() {
    let mut h = setup().await;
    let mut rule = cpu_rule(0);
    rule.escalation_threshold = Some(95.0);
    h.store.insert_alert_rule(&rule).await.unwrap();

    set_cpu(&h.overlay, T0, 85.0);
    h.engine.evaluate_tick(T0).await.unwrap();
    assert_eq!(h.notify_rx.try_recv().unwrap().kind, NotifyKind::Firing);

    // Crosses the critical band: exactly one level-up.
    set_cpu(&h.overlay, T0 + 10_000, 97.0);
    h.engine.evaluate_tick(T0 + 10_000).await.unwrap();
    let event = h.notify_rx.try_recv().unwrap();
    assert_eq!(event.kind, NotifyKind::LevelUp);
    assert_eq!(event.record.level, AlertLevel::Critical);

    set_cpu(&h.overlay, T0 + 20_000, 99.0);
    h.engine.evaluate_tick(T0 + 20_000).await.unwrap();
    assert!(h.notify_rx.try_recv().is_err());

    let firing = h.store.firing_records("rule-cpu").await.unwrap();
    assert_eq!(firing[0].level, AlertLevel::Critical);
}
