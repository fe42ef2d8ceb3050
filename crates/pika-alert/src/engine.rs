use crate::{AlertNotification, NotifyKind};
use anyhow::Result;
use pika_common::events::SystemEvent;
use pika_common::types::{AlertKind, AlertLevel, CheckStatus, MetricKind};
use pika_ingest::latest::LatestOverlay;
use pika_storage::{AlertRecordRow, AlertRuleRow, PikaStore};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Evaluation period.
pub const TICK_SECS: u64 = 10;

pub struct AlertEngine {
    store: Arc<PikaStore>,
    overlay: Arc<LatestOverlay>,
    events_rx: mpsc::UnboundedReceiver<SystemEvent>,
    notify_tx: mpsc::UnboundedSender<AlertNotification>,
    /// Online flags fed by `agent.online` / `agent.offline` events.
    agent_online: HashMap<String, bool>,
    /// Current monitor states fed by `monitor.transition` events.
    monitor_status: HashMap<String, CheckStatus>,
    /// Hidden per-rule sustain clock.
    first_breach: HashMap<String, i64>,
    /// Rules whose current firing lifespan already emitted a level-up.
    escalated: HashSet<String>,
}

impl AlertEngine {
    pub fn new(
        store: Arc<PikaStore>,
        overlay: Arc<LatestOverlay>,
        events_rx: mpsc::UnboundedReceiver<SystemEvent>,
        notify_tx: mpsc::UnboundedSender<AlertNotification>,
    ) -> Self {
        Self {
            store,
            overlay,
            events_rx,
            notify_tx,
            agent_online: HashMap::new(),
            monitor_status: HashMap::new(),
            first_breach: HashMap::new(),
            escalated: HashSet::new(),
        }
    }

    pub async fn run(mut self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        tracing::info!(tick_secs = TICK_SECS, "Alert engine started");

        // Seed the online map so rules do not see every agent as offline
        // until its first frame after a restart.
        match self.store.list_agents().await {
            Ok(agents) => {
                for agent in agents {
                    self.agent_online.insert(
                        agent.id,
                        agent.status == pika_common::types::AgentStatus::Online,
                    );
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to seed agent online map"),
        }

        let mut tick = tokio::time::interval(Duration::from_secs(TICK_SECS));
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let now_ms = chrono::Utc::now().timestamp_millis();
                    if let Err(e) = self.evaluate_tick(now_ms).await {
                        tracing::error!(error = %e, "Alert evaluation tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Alert engine stopped");
    }

    /// One full evaluation pass. Public so tests can drive a simulated
    /// clock through it.
    pub async fn evaluate_tick(&mut self, now_ms: i64) -> Result<()> {
        self.drain_events();

        let rules = self.store.list_enabled_alert_rules().await?;
        self.resolve_orphaned_records(&rules, now_ms).await?;

        for rule in rules {
            let observable = self.pull_observable(&rule, now_ms).await;
            let Some(actual) = observable else {
                // No data for this rule's source this tick; state is kept
                // as-is rather than treated as recovery.
                continue;
            };

            let breach = rule.op.check(actual, rule.threshold);

            if breach {
                self.on_breach(&rule, actual, now_ms).await?;
            } else {
                self.on_clear(&rule, actual, now_ms).await?;
            }
        }
        Ok(())
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                SystemEvent::AgentOnline { agent_id, .. } => {
                    self.agent_online.insert(agent_id, true);
                }
                SystemEvent::AgentOffline { agent_id, .. } => {
                    self.agent_online.insert(agent_id, false);
                }
                SystemEvent::MonitorTransition { monitor_id, to, .. } => {
                    self.monitor_status.insert(monitor_id, to);
                }
            }
        }
    }

    /// The rule's current observable, or `None` when its source has no data.
    ///
    /// `network` and `service` observables are encoded as 1.0 (healthy) /
    /// 0.0 (offline, down); resource and cert rules yield the raw value.
    async fn pull_observable(&mut self, rule: &AlertRuleRow, now_ms: i64) -> Option<f64> {
        match rule.kind {
            AlertKind::Cpu => {
                let agent_id = rule.agent_id.as_deref()?;
                self.overlay
                    .get_field(agent_id, MetricKind::Cpu, None, "usagePercent", now_ms)
            }
            AlertKind::Memory => {
                let agent_id = rule.agent_id.as_deref()?;
                self.overlay
                    .get_field(agent_id, MetricKind::Memory, None, "usagePercent", now_ms)
            }
            AlertKind::Disk => {
                let agent_id = rule.agent_id.as_deref()?;
                self.overlay
                    .get_field(agent_id, MetricKind::Disk, None, "avgUsagePercent", now_ms)
                    .or_else(|| {
                        self.overlay.get_field(
                            agent_id,
                            MetricKind::Disk,
                            None,
                            "usagePercent",
                            now_ms,
                        )
                    })
            }
            AlertKind::Network => {
                let agent_id = rule.agent_id.as_deref()?;
                let online = *self.agent_online.get(agent_id)?;
                Some(if online { 1.0 } else { 0.0 })
            }
            AlertKind::Cert => {
                let monitor_id = rule.monitor_id.as_deref()?;
                let days = self
                    .store
                    .last_verdict(monitor_id)
                    .await
                    .ok()
                    .flatten()
                    .and_then(|v| v.cert_expiry_days)?;
                Some(days as f64)
            }
            AlertKind::Service => {
                let monitor_id = rule.monitor_id.as_deref()?;
                let status = match self.monitor_status.get(monitor_id) {
                    Some(status) => *status,
                    None => {
                        let status = self
                            .store
                            .last_verdict(monitor_id)
                            .await
                            .ok()
                            .flatten()
                            .map(|v| v.status)?;
                        self.monitor_status.insert(monitor_id.to_owned(), status);
                        status
                    }
                };
                match status {
                    CheckStatus::Up => Some(1.0),
                    CheckStatus::Down => Some(0.0),
                    // `unknown` means the probes could not vote; it neither
                    // fires nor resolves a service rule.
                    CheckStatus::Unknown => None,
                }
            }
        }
    }

    async fn on_breach(&mut self, rule: &AlertRuleRow, actual: f64, now_ms: i64) -> Result<()> {
        let first = *self
            .first_breach
            .entry(rule.id.clone())
            .or_insert(now_ms);
        if now_ms - first < rule.for_sec * 1000 {
            return Ok(());
        }

        let firing = self.firing_record_repaired(rule, now_ms).await?;
        match firing {
            None => {
                let record = AlertRecordRow {
                    id: pika_common::id::next_id(),
                    rule_id: rule.id.clone(),
                    status: pika_common::types::AlertRecordStatus::Firing,
                    first_breach_at: first,
                    fired_at: now_ms,
                    resolved_at: None,
                    last_value: actual,
                    threshold: rule.threshold,
                    level: rule.level,
                    message: breach_message(rule, actual),
                };
                self.store.insert_alert_record(&record).await?;
                tracing::warn!(
                    rule_id = %rule.id,
                    kind = %rule.kind,
                    value = actual,
                    threshold = rule.threshold,
                    "Alert firing"
                );
                self.emit(NotifyKind::Firing, rule, record).await;
            }
            Some(record) => {
                // Still firing: refresh the live value and consider level
                // escalation exactly once per lifespan.
                let escalate = rule
                    .escalation_threshold
                    .filter(|esc| rule.op.check(actual, *esc))
                    .is_some()
                    && record.level < AlertLevel::Critical
                    && !self.escalated.contains(&rule.id);

                let level = if escalate {
                    Some(AlertLevel::Critical)
                } else {
                    None
                };
                if let Some(updated) = self
                    .store
                    .update_alert_record_value(&record.id, actual, level)
                    .await?
                {
                    if escalate {
                        self.escalated.insert(rule.id.clone());
                        tracing::warn!(
                            rule_id = %rule.id,
                            value = actual,
                            "Alert level escalated to critical"
                        );
                        self.emit(NotifyKind::LevelUp, rule, updated).await;
                    }
                }
            }
        }
        Ok(())
    }

    async fn on_clear(&mut self, rule: &AlertRuleRow, actual: f64, now_ms: i64) -> Result<()> {
        self.first_breach.remove(&rule.id);
        let Some(record) = self.firing_record_repaired(rule, now_ms).await? else {
            return Ok(());
        };
        let resolved = self
            .store
            .resolve_alert_record(&record.id, now_ms, actual, &resolved_message(rule))
            .await?;
        self.escalated.remove(&rule.id);
        if let Some(record) = resolved {
            tracing::info!(rule_id = %rule.id, kind = %rule.kind, "Alert resolved");
            self.emit(NotifyKind::Resolved, rule, record).await;
        }
        Ok(())
    }

    /// The rule's single firing record. More than one firing row violates
    /// the uniqueness invariant: the older rows are resolved in place and
    /// the newest survives.
    async fn firing_record_repaired(
        &self,
        rule: &AlertRuleRow,
        now_ms: i64,
    ) -> Result<Option<AlertRecordRow>> {
        let mut firing = self.store.firing_records(&rule.id).await?;
        if firing.len() > 1 {
            tracing::error!(
                rule_id = %rule.id,
                count = firing.len(),
                "Invariant violation: multiple firing records, auto-repairing"
            );
            let keep = firing.pop();
            for stale in firing {
                self.store
                    .resolve_alert_record(&stale.id, now_ms, stale.last_value, "duplicate_repaired")
                    .await?;
            }
            return Ok(keep);
        }
        Ok(firing.pop())
    }

    /// Firing records whose rule was deleted are auto-resolved with reason
    /// `rule_removed`; without the rule there is no channel list left to
    /// notify.
    async fn resolve_orphaned_records(
        &mut self,
        rules: &[AlertRuleRow],
        now_ms: i64,
    ) -> Result<()> {
        let live: HashSet<&str> = rules.iter().map(|r| r.id.as_str()).collect();
        for record in self.store.all_firing_records().await? {
            if !live.contains(record.rule_id.as_str()) {
                tracing::info!(
                    rule_id = %record.rule_id,
                    record_id = %record.id,
                    "Resolving firing record for removed rule"
                );
                self.store
                    .resolve_alert_record(&record.id, now_ms, record.last_value, "rule_removed")
                    .await?;
                self.first_breach.remove(&record.rule_id);
                self.escalated.remove(&record.rule_id);
            }
        }
        Ok(())
    }

    async fn emit(&self, kind: NotifyKind, rule: &AlertRuleRow, record: AlertRecordRow) {
        let agent = match &rule.agent_id {
            Some(agent_id) => self.store.get_agent(agent_id).await.ok().flatten(),
            None => None,
        };
        let event = AlertNotification {
            kind,
            rule: rule.clone(),
            record,
            agent,
        };
        if self.notify_tx.send(event).is_err() {
            tracing::error!("Notification channel closed, event dropped");
        }
    }
}

fn breach_message(rule: &AlertRuleRow, actual: f64) -> String {
    match rule.kind {
        AlertKind::Network => "agent offline".to_string(),
        AlertKind::Service => "service down".to_string(),
        AlertKind::Cert => format!(
            "certificate expires in {actual:.0} days (threshold {:.0})",
            rule.threshold
        ),
        _ => format!(
            "{} usage {:.2}% breaches threshold {:.2}%",
            rule.kind, actual, rule.threshold
        ),
    }
}

fn resolved_message(rule: &AlertRuleRow) -> String {
    match rule.kind {
        AlertKind::Network => "agent back online".to_string(),
        AlertKind::Service => "service recovered".to_string(),
        _ => "recovered".to_string(),
    }
}
