use crate::config::ServerConfig;
use crate::link::LinkManager;
use pika_common::events::SystemEvent;
use pika_common::frames::CheckReport;
use pika_ingest::latest::LatestOverlay;
use pika_ingest::Ingestor;
use pika_monitor::uptime::UptimeComputer;
use pika_notify::dispatcher::Notifier;
use pika_storage::{PikaStore, SeriesStore};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<PikaStore>,
    pub series: Arc<dyn SeriesStore>,
    pub ingestor: Arc<Ingestor>,
    pub overlay: Arc<LatestOverlay>,
    pub link: Arc<LinkManager>,
    pub notifier: Arc<Notifier>,
    pub uptime: Arc<UptimeComputer>,
    pub results_tx: mpsc::Sender<(String, CheckReport)>,
    pub events_tx: mpsc::UnboundedSender<SystemEvent>,
    pub config: Arc<ServerConfig>,
    pub start_time_ms: i64,
}
