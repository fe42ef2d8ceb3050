use crate::link::queue::InboundQueue;
use crate::link::{LinkError, SessionHandle};
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use pika_common::frames::{AgentFrame, ServerFrame};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// The hello frame must arrive this quickly on a fresh connection.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Axum handler for the duplex agent endpoint.
pub async fn agent_ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = handle_socket(socket, state, addr).await {
            tracing::debug!(peer = %addr, error = %e, "Agent session closed with error");
        }
    })
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    addr: SocketAddr,
) -> Result<(), LinkError> {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Handshake: the first frame must be hello carrying a valid api key.
    let hello = tokio::time::timeout(HANDSHAKE_TIMEOUT, next_frame(&mut ws_rx))
        .await
        .map_err(|_| LinkError::HandshakeExpected)??;
    let (api_key, agent_id, meta) = match hello {
        AgentFrame::Hello {
            api_key,
            agent_id,
            meta,
        } => (api_key, agent_id, meta),
        _ => return Err(LinkError::HandshakeExpected),
    };

    let now_ms = chrono::Utc::now().timestamp_millis();
    let authorized = state
        .store
        .find_api_key(&api_key)
        .await
        .map_err(|e| LinkError::Protocol(e.to_string()))?
        .is_some();
    if !authorized {
        if state.link.should_log_auth_failure(addr.ip(), now_ms) {
            tracing::warn!(peer = %addr, "Agent handshake rejected: invalid api key");
        }
        // Terminal for this connection, not for the server.
        let _ = ws_tx.close().await;
        return Err(LinkError::Unauthorized);
    }

    let prior = match &agent_id {
        Some(id) => state
            .store
            .get_agent(id)
            .await
            .map_err(|e| LinkError::Protocol(e.to_string()))?,
        None => None,
    };
    let agent = state
        .store
        .upsert_agent_on_handshake(agent_id.as_deref(), &api_key, &meta, now_ms)
        .await
        .map_err(|e| LinkError::Protocol(e.to_string()))?;
    let was_offline = prior
        .map(|p| p.status == pika_common::types::AgentStatus::Offline)
        .unwrap_or(true);
    if was_offline {
        let _ = state
            .events_tx
            .send(pika_common::events::SystemEvent::AgentOnline {
                agent_id: agent.id.clone(),
                at_ms: now_ms,
            });
    }

    send_frame(
        &mut ws_tx,
        &ServerFrame::HelloReply {
            agent_id: agent.id.clone(),
            server_time: now_ms,
        },
    )
    .await?;

    tracing::info!(agent_id = %agent.id, hostname = %meta.hostname, peer = %addr, "Agent session established");

    // Register, preempting any prior session of this agent.
    let seq = state.link.next_session_seq();
    let (outbound_tx, mut outbound_rx) = state.link.outbound_channel();
    let (kill_tx, mut kill_rx) = watch::channel(false);
    state.link.register(
        &agent.id,
        SessionHandle {
            seq,
            outbound_tx,
            kill_tx,
        },
    );

    let queue = Arc::new(InboundQueue::new());

    // Consumer task: drains the bounded queue, validates and dispatches.
    let consumer = tokio::spawn(consume_frames(
        state.clone(),
        agent.id.clone(),
        queue.clone(),
    ));

    // Producer loop plus the outbound writer, multiplexed on this task.
    let result = loop {
        tokio::select! {
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<AgentFrame>(text.as_str()) {
                            Ok(frame @ (AgentFrame::Telemetry { .. } | AgentFrame::CheckResult(_))) => {
                                queue.push(frame);
                            }
                            Ok(AgentFrame::Hello { .. }) => {
                                tracing::debug!(agent_id = %agent.id, "Duplicate hello ignored");
                            }
                            Err(e) => {
                                tracing::debug!(agent_id = %agent.id, error = %e, "Dropping malformed frame");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break Ok(()),
                    Some(Ok(_)) => {} // ping/pong/binary are ignored
                    Some(Err(e)) => break Err(LinkError::Protocol(e.to_string())),
                }
            }
            maybe_frame = outbound_rx.recv() => {
                match maybe_frame {
                    Some(frame) => {
                        if let Err(e) = send_frame(&mut ws_tx, &frame).await {
                            break Err(e);
                        }
                    }
                    None => break Ok(()),
                }
            }
            _ = kill_rx.changed() => {
                if *kill_rx.borrow() {
                    tracing::debug!(agent_id = %agent.id, "Session preempted by reconnect");
                    break Ok(());
                }
            }
        }
    };

    state.link.deregister(&agent.id, seq);
    consumer.abort();
    let lost = queue.lost.load(std::sync::atomic::Ordering::Relaxed);
    if lost > 0 {
        tracing::warn!(agent_id = %agent.id, lost, "Session closed with dropped telemetry frames");
    }
    let _ = ws_tx.close().await;
    result
}

/// Single consumer per session: every frame refreshes liveness, telemetry
/// flows to the ingestor, check results to the probe coordinator.
async fn consume_frames(state: AppState, agent_id: String, queue: Arc<InboundQueue>) {
    loop {
        let frame = queue.pop().await;
        let now_ms = chrono::Utc::now().timestamp_millis();
        state.link.touch(&agent_id, now_ms).await;

        match frame {
            AgentFrame::Telemetry { kind, samples } => {
                state.ingestor.ingest_telemetry(&agent_id, kind, samples).await;
            }
            AgentFrame::CheckResult(report) => {
                if state
                    .results_tx
                    .send((agent_id.clone(), report))
                    .await
                    .is_err()
                {
                    tracing::error!(agent_id = %agent_id, "Probe coordinator channel closed");
                }
            }
            AgentFrame::Hello { .. } => {}
        }
    }
}

async fn next_frame(
    ws_rx: &mut SplitStream<WebSocket>,
) -> Result<AgentFrame, LinkError> {
    loop {
        match ws_rx.next().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(text.as_str())
                    .map_err(|e| LinkError::Protocol(e.to_string()));
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(LinkError::Protocol("connection closed".into()))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(LinkError::Protocol(e.to_string())),
        }
    }
}

async fn send_frame(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
) -> Result<(), LinkError> {
    let text = serde_json::to_string(frame).map_err(|e| LinkError::Protocol(e.to_string()))?;
    ws_tx
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| LinkError::Protocol(e.to_string()))
}
