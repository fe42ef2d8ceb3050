//! Agent link management: one authenticated duplex session per agent,
//! frame-driven liveness, downstream command delivery, and the sweeper
//! that flips silent agents offline.

pub mod queue;
pub mod session;

use pika_common::events::SystemEvent;
use pika_common::frames::ServerFrame;
use pika_common::types::AgentStatus;
use pika_storage::PikaStore;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Outbound frame buffer per session.
const OUTBOUND_DEPTH: usize = 64;
/// Wait before the single command redelivery attempt.
const COMMAND_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Minimum spacing of auth-failure logs per source IP.
const AUTH_LOG_INTERVAL_MS: i64 = 1_000;
/// How often an inbound frame refreshes the persisted `last_seen_at`.
const DB_TOUCH_INTERVAL_MS: i64 = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("link: agent {0} is not connected")]
    AgentNotConnected(String),
    #[error("link: command delivery to {0} failed after retry")]
    CommandFailed(String),
    #[error("link: invalid api key")]
    Unauthorized,
    #[error("link: malformed frame: {0}")]
    Protocol(String),
    #[error("link: expected hello as the first frame")]
    HandshakeExpected,
}

/// Handle to one live session held in the registry.
#[derive(Clone)]
pub struct SessionHandle {
    pub seq: u64,
    pub outbound_tx: mpsc::Sender<ServerFrame>,
    /// Flipped to preempt the session when the same agent reconnects.
    pub kill_tx: watch::Sender<bool>,
}

#[derive(Debug, Clone, Copy)]
struct Liveness {
    last_seen_ms: i64,
    last_db_touch_ms: i64,
    online: bool,
}

/// Shared session table plus the liveness bookkeeping the sweeper reads.
/// Sharding key for both maps is the agent id; sessions never take each
/// other's locks on the hot path.
pub struct LinkManager {
    store: Arc<PikaStore>,
    events_tx: mpsc::UnboundedSender<SystemEvent>,
    sessions: Mutex<HashMap<String, SessionHandle>>,
    liveness: Mutex<HashMap<String, Liveness>>,
    auth_failures: Mutex<HashMap<IpAddr, i64>>,
    session_seq: AtomicU64,
    offline_threshold_ms: i64,
}

impl LinkManager {
    pub fn new(
        store: Arc<PikaStore>,
        events_tx: mpsc::UnboundedSender<SystemEvent>,
        offline_threshold_ms: i64,
    ) -> Self {
        Self {
            store,
            events_tx,
            sessions: Mutex::new(HashMap::new()),
            liveness: Mutex::new(HashMap::new()),
            auth_failures: Mutex::new(HashMap::new()),
            session_seq: AtomicU64::new(1),
            offline_threshold_ms,
        }
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<String, SessionHandle>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_liveness(&self) -> MutexGuard<'_, HashMap<String, Liveness>> {
        self.liveness
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn next_session_seq(&self) -> u64 {
        self.session_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a session, preempting any prior session of the same agent.
    pub fn register(&self, agent_id: &str, handle: SessionHandle) {
        let old = self.lock_sessions().insert(agent_id.to_owned(), handle);
        if let Some(old) = old {
            tracing::info!(agent_id = %agent_id, "Agent reconnected, preempting prior session");
            let _ = old.kill_tx.send(true);
        }
        let now_ms = chrono::Utc::now().timestamp_millis();
        self.lock_liveness().insert(
            agent_id.to_owned(),
            Liveness {
                last_seen_ms: now_ms,
                last_db_touch_ms: now_ms,
                online: true,
            },
        );
    }

    /// Removes the session only when `seq` still owns the slot; a preempted
    /// session must not tear down its successor.
    pub fn deregister(&self, agent_id: &str, seq: u64) {
        let mut sessions = self.lock_sessions();
        if sessions.get(agent_id).map(|h| h.seq) == Some(seq) {
            sessions.remove(agent_id);
        }
    }

    pub fn session_count(&self) -> usize {
        self.lock_sessions().len()
    }

    /// Called for every accepted inbound frame. Refreshes liveness,
    /// re-onlines an agent the sweeper had flipped, and throttles the
    /// persisted `last_seen_at` mirror.
    pub async fn touch(&self, agent_id: &str, now_ms: i64) {
        let (was_offline, db_due) = {
            let mut liveness = self.lock_liveness();
            let entry = liveness.entry(agent_id.to_owned()).or_insert(Liveness {
                last_seen_ms: now_ms,
                last_db_touch_ms: 0,
                online: false,
            });
            let was_offline = !entry.online;
            entry.online = true;
            entry.last_seen_ms = now_ms;
            let db_due = was_offline || now_ms - entry.last_db_touch_ms >= DB_TOUCH_INTERVAL_MS;
            if db_due {
                entry.last_db_touch_ms = now_ms;
            }
            (was_offline, db_due)
        };

        if was_offline {
            tracing::info!(agent_id = %agent_id, "Agent back online");
            if let Err(e) = self
                .store
                .set_agent_status(agent_id, AgentStatus::Online, now_ms)
                .await
            {
                tracing::error!(agent_id = %agent_id, error = %e, "Failed to persist online status");
            }
            let _ = self.events_tx.send(SystemEvent::AgentOnline {
                agent_id: agent_id.to_owned(),
                at_ms: now_ms,
            });
        } else if db_due {
            if let Err(e) = self.store.touch_agent_last_seen(agent_id, now_ms).await {
                tracing::error!(agent_id = %agent_id, error = %e, "Failed to persist last_seen_at");
            }
        }
    }

    /// Whether an auth failure from this address should be logged; at most
    /// one log per second per IP.
    pub fn should_log_auth_failure(&self, addr: IpAddr, now_ms: i64) -> bool {
        let mut failures = self
            .auth_failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        failures.retain(|_, last| now_ms - *last < 60_000);
        match failures.get(&addr) {
            Some(last) if now_ms - last < AUTH_LOG_INTERVAL_MS => false,
            _ => {
                failures.insert(addr, now_ms);
                true
            }
        }
    }

    /// Liveness sweeper: every `period` flips agents silent past the
    /// offline threshold and emits `agent.offline`.
    pub async fn run_sweeper(
        self: Arc<Self>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!(
            offline_threshold_ms = self.offline_threshold_ms,
            "Liveness sweeper started"
        );
        let mut tick = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let now_ms = chrono::Utc::now().timestamp_millis();
                    self.sweep(now_ms).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Liveness sweeper stopped");
    }

    pub async fn sweep(&self, now_ms: i64) {
        let cutoff = now_ms - self.offline_threshold_ms;

        // In-memory first: agents with a live session that simply went
        // silent.
        let mut stale: Vec<String> = Vec::new();
        {
            let mut liveness = self.lock_liveness();
            for (agent_id, entry) in liveness.iter_mut() {
                if entry.online && entry.last_seen_ms < cutoff {
                    entry.online = false;
                    stale.push(agent_id.clone());
                }
            }
        }

        // Then the persisted view, which also covers agents from before a
        // server restart.
        match self.store.list_stale_online_agents(cutoff).await {
            Ok(rows) => {
                for row in rows {
                    if !stale.contains(&row.id) {
                        stale.push(row.id);
                    }
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to query stale agents"),
        }

        for agent_id in stale {
            tracing::warn!(agent_id = %agent_id, "Agent offline (no frames past threshold)");
            if let Err(e) = self
                .store
                .set_agent_status(&agent_id, AgentStatus::Offline, now_ms)
                .await
            {
                tracing::error!(agent_id = %agent_id, error = %e, "Failed to persist offline status");
            }
            let _ = self.events_tx.send(SystemEvent::AgentOffline {
                agent_id,
                at_ms: now_ms,
            });
        }
    }

    /// Best-effort command delivery with one retry after one second.
    pub async fn deliver(&self, agent_id: &str, frame: ServerFrame) -> Result<(), LinkError> {
        let tx = self
            .lock_sessions()
            .get(agent_id)
            .map(|h| h.outbound_tx.clone())
            .ok_or_else(|| LinkError::AgentNotConnected(agent_id.to_owned()))?;

        if tx.try_send(frame.clone()).is_ok() {
            return Ok(());
        }
        tokio::time::sleep(COMMAND_RETRY_DELAY).await;
        match tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(_) => {
                tracing::warn!(agent_id = %agent_id, "command.failed: outbound queue unavailable");
                Err(LinkError::CommandFailed(agent_id.to_owned()))
            }
        }
    }

    pub fn outbound_channel(&self) -> (mpsc::Sender<ServerFrame>, mpsc::Receiver<ServerFrame>) {
        mpsc::channel(OUTBOUND_DEPTH)
    }
}

#[async_trait::async_trait]
impl pika_monitor::CommandSink for LinkManager {
    async fn send_command(&self, agent_id: &str, frame: ServerFrame) -> anyhow::Result<()> {
        self.deliver(agent_id, frame).await.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pika_common::frames::CommandVerb;

    async fn manager() -> (Arc<LinkManager>, mpsc::UnboundedReceiver<SystemEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let store = Arc::new(PikaStore::new_in_memory().await.unwrap());
        (
            Arc::new(LinkManager::new(store, events_tx, 90_000)),
            events_rx,
        )
    }

    fn handle(seq: u64) -> (SessionHandle, mpsc::Receiver<ServerFrame>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(2);
        let (kill_tx, _) = watch::channel(false);
        (
            SessionHandle {
                seq,
                outbound_tx,
                kill_tx,
            },
            outbound_rx,
        )
    }

    #[tokio::test]
    async fn reconnect_preempts_prior_session() {
        let (manager, _events) = manager().await;

        let (first, _rx1) = handle(manager.next_session_seq());
        let first_kill = first.kill_tx.subscribe();
        manager.register("a1", first);
        assert!(!*first_kill.borrow());

        let (second, _rx2) = handle(manager.next_session_seq());
        manager.register("a1", second);
        assert!(*first_kill.borrow(), "prior session must be told to die");
        assert_eq!(manager.session_count(), 1);
    }

    #[tokio::test]
    async fn deregister_ignores_stale_sequence() {
        let (manager, _events) = manager().await;

        let (first, _rx1) = handle(manager.next_session_seq());
        let first_seq = first.seq;
        manager.register("a1", first);

        let (second, _rx2) = handle(manager.next_session_seq());
        let second_seq = second.seq;
        manager.register("a1", second);

        // The preempted session cleaning up must not evict its successor.
        manager.deregister("a1", first_seq);
        assert_eq!(manager.session_count(), 1);

        manager.deregister("a1", second_seq);
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn command_failure_after_retry_is_typed() {
        let (manager, _events) = manager().await;

        let err = manager
            .deliver(
                "ghost",
                ServerFrame::Command {
                    id: "c-1".into(),
                    verb: CommandVerb::Reload,
                    params: serde_json::Value::Null,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::AgentNotConnected(_)));
    }

    #[tokio::test]
    async fn auth_failure_logging_is_rate_limited_per_ip() {
        let (manager, _events) = manager().await;
        let ip: IpAddr = "10.0.0.9".parse().unwrap();

        assert!(manager.should_log_auth_failure(ip, 1_000));
        assert!(!manager.should_log_auth_failure(ip, 1_500));
        assert!(manager.should_log_auth_failure(ip, 2_500));

        let other: IpAddr = "10.0.0.10".parse().unwrap();
        assert!(manager.should_log_auth_failure(other, 1_500));
    }

    #[tokio::test]
    async fn sweep_emits_offline_event_for_silent_agent() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let store = Arc::new(PikaStore::new_in_memory().await.unwrap());
        let manager = Arc::new(LinkManager::new(store.clone(), events_tx, 90_000));

        let meta = pika_common::frames::AgentMeta {
            hostname: "web-01".into(),
            ..Default::default()
        };
        let t0 = 1_700_000_000_000;
        let agent = store
            .upsert_agent_on_handshake(None, "k", &meta, t0)
            .await
            .unwrap();
        manager.touch(&agent.id, t0).await;
        // touch() on a fresh entry reports the agent online once.
        let _ = events_rx.try_recv();

        // At t0+90s the agent has been silent exactly past the threshold.
        manager.sweep(t0 + 90_001).await;

        match events_rx.try_recv().unwrap() {
            SystemEvent::AgentOffline { agent_id, .. } => assert_eq!(agent_id, agent.id),
            other => panic!("unexpected event: {other:?}"),
        }
        // Only one offline event per transition.
        assert!(events_rx.try_recv().is_err());

        let row = store.get_agent(&agent.id).await.unwrap().unwrap();
        assert_eq!(row.status, AgentStatus::Offline);

        // The next frame flips it back and emits exactly one online event.
        manager.touch(&agent.id, t0 + 95_000).await;
        match events_rx.try_recv().unwrap() {
            SystemEvent::AgentOnline { agent_id, .. } => assert_eq!(agent_id, agent.id),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
