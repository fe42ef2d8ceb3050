use crate::channels::{decode_config, post_json};
use crate::error::{NotifyError, Result};
use serde::Deserialize;
use serde_json::{json, Value};

const CHANNEL: &str = "webhook";

/// Custom webhook config: an arbitrary URL receiving the Feishu-shaped
/// text body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WebhookConfig {
    pub url: String,
}

pub async fn send(client: &reqwest::Client, config: &Value, message: &str) -> Result<()> {
    let config: WebhookConfig = decode_config(CHANNEL, config)?;
    if config.url.is_empty() {
        return Err(NotifyError::InvalidConfig {
            channel: CHANNEL,
            reason: "missing url".into(),
        });
    }

    let body = json!({
        "msg_type": "text",
        "content": { "text": message },
    });
    post_json(client, CHANNEL, &config.url, &body).await?;
    Ok(())
}
