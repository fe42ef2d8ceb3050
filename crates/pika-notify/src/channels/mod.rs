pub mod dingtalk;
pub mod email;
pub mod feishu;
pub mod wecom;
pub mod webhook;

use crate::error::{truncate_remote_error, NotifyError, Result};
use serde_json::Value;

/// POSTs a JSON body and enforces the shared HTTP success contract:
/// any non-2xx response is a failure carrying the (truncated) remote text.
pub(crate) async fn post_json(
    client: &reqwest::Client,
    channel: &'static str,
    url: &str,
    body: &Value,
) -> Result<Value> {
    let resp = client
        .post(url)
        .header("Content-Type", "application/json")
        .json(body)
        .send()
        .await?;

    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(NotifyError::Api {
            channel,
            detail: format!("HTTP {}: {}", status.as_u16(), truncate_remote_error(&text)),
        });
    }
    Ok(serde_json::from_str(&text).unwrap_or(Value::Null))
}

/// Decodes a channel's strict config schema out of the property blob.
pub(crate) fn decode_config<T: serde::de::DeserializeOwned>(
    channel: &'static str,
    config: &Value,
) -> Result<T> {
    serde_json::from_value(config.clone()).map_err(|e| NotifyError::InvalidConfig {
        channel,
        reason: e.to_string(),
    })
}
