use anyhow::Result;
use pika_alert::engine::AlertEngine;
use pika_ingest::latest::LatestOverlay;
use pika_ingest::retention::RetentionSweeper;
use pika_ingest::Ingestor;
use pika_monitor::scheduler::MonitorScheduler;
use pika_monitor::uptime::UptimeComputer;
use pika_monitor::CommandSink;
use pika_notify::dispatcher::{run_dispatcher, Notifier};
use pika_server::app;
use pika_server::config::ServerConfig;
use pika_server::link::LinkManager;
use pika_server::state::AppState;
use pika_storage::{PikaStore, SeriesStore, SqlitePartitionEngine};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

/// Queues keep accepting in-flight work for this long after the shutdown
/// signal before the process exits.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  pika-server [config.toml]    Start the server");
}

#[tokio::main]
async fn main() -> Result<()> {
    pika_common::id::init(1, 1);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pika=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    if matches!(args.get(1).map(|s| s.as_str()), Some("--help" | "-h")) {
        print_usage();
        return Ok(());
    }
    let config_path = args
        .get(1)
        .map(|s| s.as_str())
        .unwrap_or("config/server.toml");

    run_server(config_path).await
}

async fn run_server(config_path: &str) -> Result<()> {
    let config = Arc::new(ServerConfig::load(config_path)?);

    tracing::info!(
        agent_listen = %config.agent_listen,
        http_listen = %config.http_listen,
        data_dir = %config.database.data_dir,
        "pika-server starting"
    );

    // Storage: domain rows plus time-series partitions.
    let data_dir = Path::new(&config.database.data_dir);
    let store = Arc::new(PikaStore::new(data_dir).await?);
    let series: Arc<dyn SeriesStore> =
        Arc::new(SqlitePartitionEngine::new(&data_dir.join("series"))?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Ingestion: overlay, per-kind writers, aggregators, snapshot mirror.
    let overlay = Arc::new(LatestOverlay::new(config.offline_threshold_ms() * 2));
    let ingestor = Ingestor::spawn(
        series.clone(),
        store.clone(),
        overlay.clone(),
        shutdown_rx.clone(),
    );

    // Event plumbing: A and C produce, E consumes, E feeds F.
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (notify_tx, notify_rx) = mpsc::unbounded_channel();
    let (results_tx, results_rx) = mpsc::channel(1024);

    let link = Arc::new(LinkManager::new(
        store.clone(),
        events_tx.clone(),
        config.offline_threshold_ms(),
    ));

    let notifier = Arc::new(Notifier::new(store.clone()));
    let uptime = Arc::new(UptimeComputer::new(store.clone()));

    let state = AppState {
        store: store.clone(),
        series: series.clone(),
        ingestor,
        overlay: overlay.clone(),
        link: link.clone(),
        notifier: notifier.clone(),
        uptime,
        results_tx,
        events_tx: events_tx.clone(),
        config: config.clone(),
        start_time_ms: chrono::Utc::now().timestamp_millis(),
    };

    // Long-running workers, all cancelled through the shared signal.
    let sweeper_handle = tokio::spawn(link.clone().run_sweeper(
        Duration::from_secs(config.liveness.sweep_interval_secs),
        shutdown_rx.clone(),
    ));

    let scheduler = MonitorScheduler::new(
        store.clone(),
        link.clone() as Arc<dyn CommandSink>,
        events_tx.clone(),
        results_rx,
    );
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx.clone()));

    let engine = AlertEngine::new(store.clone(), overlay, events_rx, notify_tx);
    let engine_handle = tokio::spawn(engine.run(shutdown_rx.clone()));

    let dispatcher_handle = tokio::spawn(run_dispatcher(
        notifier,
        notify_rx,
        shutdown_rx.clone(),
    ));

    let retention_handle =
        tokio::spawn(RetentionSweeper::new(series).run(shutdown_rx.clone()));

    // Listeners: the agent endpoint and the operator surface bind
    // separately.
    let agent_addr: SocketAddr = config.agent_listen.parse()?;
    let agent_listener = tokio::net::TcpListener::bind(agent_addr).await?;
    let agent_server = axum::serve(
        agent_listener,
        app::build_agent_app(state.clone()).into_make_service_with_connect_info::<SocketAddr>(),
    );

    let http_addr: SocketAddr = config.http_listen.parse()?;
    let http_listener = tokio::net::TcpListener::bind(http_addr).await?;
    let http_server = axum::serve(
        http_listener,
        app::build_http_app(state.clone()).into_make_service_with_connect_info::<SocketAddr>(),
    );

    tracing::info!(agent = %agent_addr, http = %http_addr, "Server started");

    tokio::select! {
        result = agent_server.with_graceful_shutdown(wait_for_ctrl_c()) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Agent endpoint error");
            }
        }
        result = http_server.with_graceful_shutdown(wait_for_ctrl_c()) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server error");
            }
        }
        _ = wait_for_ctrl_c() => {
            tracing::info!("Shutting down gracefully");
        }
    }

    // Stop accepting new work, then give in-flight writes the grace window.
    let _ = shutdown_tx.send(true);
    tokio::time::sleep(SHUTDOWN_GRACE).await;

    for handle in [
        sweeper_handle,
        scheduler_handle,
        engine_handle,
        dispatcher_handle,
        retention_handle,
    ] {
        handle.abort();
    }

    tracing::info!("Server stopped");
    Ok(())
}

async fn wait_for_ctrl_c() {
    signal::ctrl_c().await.ok();
}
