use crate::consensus::{compute_verdict, rotation_epoch, select_fanout_probes};
use crate::CommandSink;
use anyhow::Result;
use pika_common::events::SystemEvent;
use pika_common::frames::{CheckReport, CommandVerb, ServerFrame};
use pika_common::types::{CheckStatus, ProbeSelection};
use pika_storage::{CheckResultRow, MonitorRow, PikaStore, VerdictRow};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Extra wait beyond the monitor's own timeout before a tick is reduced
/// without the missing participants.
const REDUCE_SLACK_MS: i64 = 2_000;

struct PendingTick {
    monitor: MonitorRow,
    tick_at: i64,
    deadline_ms: i64,
    expected: HashSet<String>,
    reports: Vec<(String, CheckReport)>,
}

/// Drives all monitors from a single ticker task. Fan-out of probe commands
/// happens as independent sends; reduction for a given monitor always runs
/// on this task, so no verdict is computed twice.
pub struct MonitorScheduler {
    store: Arc<PikaStore>,
    sink: Arc<dyn CommandSink>,
    events_tx: mpsc::UnboundedSender<SystemEvent>,
    next_due: HashMap<String, i64>,
    pending: HashMap<String, PendingTick>,
    current_status: HashMap<String, CheckStatus>,
    results_rx: mpsc::Receiver<(String, CheckReport)>,
}

impl MonitorScheduler {
    pub fn new(
        store: Arc<PikaStore>,
        sink: Arc<dyn CommandSink>,
        events_tx: mpsc::UnboundedSender<SystemEvent>,
        results_rx: mpsc::Receiver<(String, CheckReport)>,
    ) -> Self {
        Self {
            store,
            sink,
            events_tx,
            next_due: HashMap::new(),
            pending: HashMap::new(),
            current_status: HashMap::new(),
            results_rx,
        }
    }

    pub async fn run(mut self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        tracing::info!("Monitor scheduler started");
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let now_ms = chrono::Utc::now().timestamp_millis();
                    if let Err(e) = self.dispatch_due(now_ms).await {
                        tracing::error!(error = %e, "Monitor dispatch cycle failed");
                    }
                    self.reduce_expired(now_ms).await;
                }
                maybe = self.results_rx.recv() => {
                    match maybe {
                        Some((agent_id, report)) => self.on_check_result(agent_id, report).await,
                        None => break,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Monitor scheduler stopped");
    }

    async fn dispatch_due(&mut self, now_ms: i64) -> Result<()> {
        let monitors = self.store.list_enabled_monitors().await?;
        let online: Vec<String> = self
            .store
            .list_online_agents()
            .await?
            .into_iter()
            .map(|a| a.id)
            .collect();

        for monitor in monitors {
            let due = *self.next_due.get(&monitor.id).unwrap_or(&0);
            if now_ms < due {
                continue;
            }
            if self.pending.contains_key(&monitor.id) {
                // The previous tick has not been reduced yet; keep the
                // clock honest without stacking a second fan-out.
                continue;
            }
            self.next_due
                .insert(monitor.id.clone(), now_ms + monitor.interval_sec * 1000);
            self.start_tick(monitor, &online, now_ms).await;
        }
        Ok(())
    }

    async fn start_tick(&mut self, monitor: MonitorRow, online: &[String], now_ms: i64) {
        let eligible = eligible_probes(&monitor.probe_selection, online, &monitor.id, now_ms);

        if eligible.is_empty() {
            tracing::warn!(monitor_id = %monitor.id, "No assignable probe reachable, recording unknown tick");
            let previous = self.current_for(&monitor.id).await;
            self.persist_verdict(&monitor, now_ms, CheckStatus::Unknown, &[], previous)
                .await;
            return;
        }

        let mut expected = HashSet::new();
        for agent_id in &eligible {
            let frame = ServerFrame::Command {
                id: pika_common::id::next_id(),
                verb: CommandVerb::Probe,
                params: json!({
                    "monitor": {
                        "id": monitor.id,
                        "type": monitor.monitor_type,
                        "target": monitor.target,
                        "timeoutMs": monitor.timeout_ms,
                        "expected": monitor.expected,
                    }
                }),
            };
            match self.sink.send_command(agent_id, frame).await {
                Ok(()) => {
                    expected.insert(agent_id.clone());
                }
                Err(e) => {
                    tracing::warn!(
                        monitor_id = %monitor.id,
                        agent_id = %agent_id,
                        error = %e,
                        "Probe command delivery failed, probe will not vote"
                    );
                }
            }
        }

        if expected.is_empty() {
            let previous = self.current_for(&monitor.id).await;
            self.persist_verdict(&monitor, now_ms, CheckStatus::Unknown, &[], previous)
                .await;
            return;
        }

        let deadline_ms = now_ms + monitor.timeout_ms + REDUCE_SLACK_MS;
        self.pending.insert(
            monitor.id.clone(),
            PendingTick {
                monitor,
                tick_at: now_ms,
                deadline_ms,
                expected,
                reports: Vec::new(),
            },
        );
    }

    async fn on_check_result(&mut self, agent_id: String, report: CheckReport) {
        let row = CheckResultRow {
            id: pika_common::id::next_id(),
            monitor_id: report.monitor_id.clone(),
            agent_id: agent_id.clone(),
            started_at: report.started_at,
            latency_ms: report.latency_ms,
            status: report.status,
            http_code: report.http_code,
            tls_expiry_at: report.tls_expiry_at,
            error: report.error.clone(),
        };
        if let Err(e) = self.store.insert_check_result(&row).await {
            tracing::error!(monitor_id = %report.monitor_id, error = %e, "Failed to persist check result");
        }

        let complete = match self.pending.get_mut(&report.monitor_id) {
            Some(tick) if tick.expected.contains(&agent_id) => {
                tick.reports.push((agent_id, report.clone()));
                tick.reports.len() >= tick.expected.len()
            }
            _ => {
                tracing::debug!(
                    monitor_id = %report.monitor_id,
                    agent_id = %agent_id,
                    "Check result outside any pending tick, stored only"
                );
                false
            }
        };

        if complete {
            if let Some(tick) = self.pending.remove(&report.monitor_id) {
                self.reduce(tick).await;
            }
        }
    }

    async fn reduce_expired(&mut self, now_ms: i64) {
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, t)| now_ms >= t.deadline_ms)
            .map(|(id, _)| id.clone())
            .collect();
        for monitor_id in expired {
            if let Some(tick) = self.pending.remove(&monitor_id) {
                self.reduce(tick).await;
            }
        }
    }

    async fn reduce(&mut self, tick: PendingTick) {
        let statuses: Vec<CheckStatus> = tick.reports.iter().map(|(_, r)| r.status).collect();
        let previous = self.current_for(&tick.monitor.id).await;
        let verdict = compute_verdict(&tick.monitor.probe_selection, &statuses, previous);

        let reports: Vec<&CheckReport> = tick.reports.iter().map(|(_, r)| r).collect();
        self.persist_verdict(&tick.monitor, tick.tick_at, verdict, &reports, previous)
            .await;
    }

    async fn current_for(&mut self, monitor_id: &str) -> CheckStatus {
        if let Some(status) = self.current_status.get(monitor_id) {
            return *status;
        }
        // First tick since startup: recover the prior state from storage so
        // restarts neither re-fire nor swallow transitions.
        let status = match self.store.last_verdict(monitor_id).await {
            Ok(Some(v)) => v.status,
            Ok(None) => CheckStatus::Unknown,
            Err(e) => {
                tracing::error!(monitor_id = %monitor_id, error = %e, "Failed to load last verdict");
                CheckStatus::Unknown
            }
        };
        self.current_status
            .insert(monitor_id.to_owned(), status);
        status
    }

    async fn persist_verdict(
        &mut self,
        monitor: &MonitorRow,
        tick_at: i64,
        status: CheckStatus,
        reports: &[&CheckReport],
        previous: CheckStatus,
    ) {
        let up_latencies: Vec<i64> = reports
            .iter()
            .filter(|r| r.status == CheckStatus::Up)
            .map(|r| r.latency_ms)
            .collect();
        let down_count = reports
            .iter()
            .filter(|r| r.status == CheckStatus::Down)
            .count() as i32;
        let cert_expiry_days = reports
            .iter()
            .filter_map(|r| r.tls_expiry_at)
            .min()
            .map(|expiry| (expiry - tick_at) / 86_400_000);

        let row = VerdictRow {
            id: pika_common::id::next_id(),
            monitor_id: monitor.id.clone(),
            tick_at,
            status,
            participant_count: reports.len() as i32,
            down_count,
            min_latency_ms: up_latencies.iter().min().copied(),
            max_latency_ms: up_latencies.iter().max().copied(),
            cert_expiry_days,
        };
        if let Err(e) = self.store.insert_verdict(&row).await {
            tracing::error!(monitor_id = %monitor.id, error = %e, "Failed to persist verdict");
        }

        // `unknown` never moves the state machine: up ↔ down only, entered
        // from unknown on the first decisive tick.
        if status != CheckStatus::Unknown && status != previous {
            self.current_status.insert(monitor.id.clone(), status);
            tracing::info!(
                monitor_id = %monitor.id,
                from = %previous,
                to = %status,
                "Monitor transition"
            );
            let _ = self.events_tx.send(SystemEvent::MonitorTransition {
                monitor_id: monitor.id.clone(),
                from: previous,
                to: status,
                at_ms: tick_at,
            });
        }
    }
}

/// Online agents intersected with the monitor's selection.
fn eligible_probes(
    selection: &ProbeSelection,
    online: &[String],
    monitor_id: &str,
    now_ms: i64,
) -> Vec<String> {
    match selection {
        ProbeSelection::All | ProbeSelection::Any => online.to_vec(),
        ProbeSelection::List { agent_ids } => online
            .iter()
            .filter(|id| agent_ids.contains(id))
            .cloned()
            .collect(),
        ProbeSelection::Fanout { fanout } => select_fanout_probes(
            monitor_id,
            rotation_epoch(now_ms),
            online,
            *fanout as usize,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eligible_probes_respects_allow_list() {
        let online = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let sel = ProbeSelection::List {
            agent_ids: vec!["b".into(), "d".into()],
        };
        assert_eq!(eligible_probes(&sel, &online, "m-1", 0), vec!["b".to_string()]);
    }

    #[test]
    fn eligible_probes_fanout_caps_count() {
        let online: Vec<String> = (0..5).map(|i| format!("agent-{i}")).collect();
        let sel = ProbeSelection::Fanout { fanout: 3 };
        let picked = eligible_probes(&sel, &online, "m-1", 0);
        assert_eq!(picked.len(), 3);
        for p in &picked {
            assert!(online.contains(p));
        }
    }
}
