use crate::error::{NotifyError, Result};
use crate::{channels, template, ChannelConfig, ChannelType};
use pika_alert::AlertNotification;
use pika_storage::store::property::PROPERTY_NOTIFICATION_CHANNELS;
use pika_storage::PikaStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

/// Outbound request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Concurrent deliveries across all events and channels.
pub const WORKER_POOL_SIZE: usize = 8;

/// Renders messages and fans them out to the configured channels. Failures
/// are per-channel: one broken endpoint never aborts the rest of a batch,
/// and nothing is retried automatically (the test operation is the
/// operator's probe).
pub struct Notifier {
    client: reqwest::Client,
    store: Arc<PikaStore>,
}

impl Notifier {
    pub fn new(store: Arc<PikaStore>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, store }
    }

    /// The stored channel list; an absent property means nothing is
    /// configured yet.
    pub async fn load_channels(&self) -> anyhow::Result<Vec<ChannelConfig>> {
        match self.store.get_property(PROPERTY_NOTIFICATION_CHANNELS).await? {
            Some(row) if !row.value.is_null() => Ok(serde_json::from_value(row.value)?),
            _ => Ok(Vec::new()),
        }
    }

    pub async fn send_to_channel(&self, channel: &ChannelConfig, message: &str) -> Result<()> {
        match channel.channel_type {
            ChannelType::Dingtalk => {
                channels::dingtalk::send(&self.client, &channel.config, message).await
            }
            ChannelType::Wecom => {
                channels::wecom::send(&self.client, &channel.config, message).await
            }
            ChannelType::Feishu => {
                channels::feishu::send(&self.client, &channel.config, message).await
            }
            ChannelType::Webhook => {
                channels::webhook::send(&self.client, &channel.config, message).await
            }
            ChannelType::Email => {
                channels::email::send(&self.client, &channel.config, message).await
            }
        }
    }

    /// Delivers one notification event to every routed channel. Returns the
    /// per-channel failures; an empty list means full success.
    pub async fn notify(&self, event: &AlertNotification) -> Vec<(ChannelType, NotifyError)> {
        let configured = match self.load_channels().await {
            Ok(configured) => configured,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load notification channels");
                return Vec::new();
            }
        };

        let routed = crate::route(&configured, &event.rule.channels);
        if routed.is_empty() {
            tracing::debug!(rule_id = %event.rule.id, "No enabled channel routed for rule");
            return Vec::new();
        }

        let message = template::render(event);
        let mut failures = Vec::new();
        for channel in routed {
            match self.send_to_channel(channel, &message).await {
                Ok(()) => {
                    tracing::info!(
                        channel_type = %channel.channel_type,
                        rule_id = %event.rule.id,
                        kind = event.kind.as_str(),
                        "Notification sent"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        channel_type = %channel.channel_type,
                        rule_id = %event.rule.id,
                        record_id = %event.record.id,
                        error = %e,
                        "Failed to send notification"
                    );
                    failures.push((channel.channel_type, e));
                }
            }
        }
        failures
    }

    /// Sends a canned message through the stored config for `channel_type`.
    pub async fn test_channel(&self, channel_type: ChannelType) -> Result<()> {
        let configured = self.load_channels().await.map_err(|e| {
            NotifyError::NotConfigured(format!("{}: {e}", channel_type.as_str()))
        })?;
        let channel = configured
            .iter()
            .find(|c| c.channel_type == channel_type)
            .ok_or_else(|| NotifyError::NotConfigured(channel_type.as_str().to_string()))?;
        if !channel.enabled {
            return Err(NotifyError::Disabled(channel_type.as_str()));
        }
        self.send_to_channel(channel, template::test_message()).await
    }
}

/// Worker pool consuming the engine's event channel. Each (event, channel
/// fan-out) runs as its own task under a semaphore of
/// [`WORKER_POOL_SIZE`] permits, so a slow endpoint cannot block the queue.
pub async fn run_dispatcher(
    notifier: Arc<Notifier>,
    mut events_rx: mpsc::UnboundedReceiver<AlertNotification>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    tracing::info!(pool_size = WORKER_POOL_SIZE, "Notification dispatcher started");
    let semaphore = Arc::new(Semaphore::new(WORKER_POOL_SIZE));

    loop {
        tokio::select! {
            maybe = events_rx.recv() => {
                let Some(event) = maybe else { break };
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let notifier = notifier.clone();
                tokio::spawn(async move {
                    let failures = notifier.notify(&event).await;
                    if !failures.is_empty() {
                        tracing::warn!(
                            rule_id = %event.rule.id,
                            failed = failures.len(),
                            "Notification batch finished with failures"
                        );
                    }
                    drop(permit);
                });
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::info!("Notification dispatcher stopped");
}
