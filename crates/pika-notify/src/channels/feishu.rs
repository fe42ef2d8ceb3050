use crate::channels::{decode_config, post_json};
use crate::error::{NotifyError, Result};
use serde::Deserialize;
use serde_json::{json, Value};

const CHANNEL: &str = "feishu";

/// Feishu bot config: `secretKey` is the hook token in the webhook path.
/// `signSecret` is accepted for config compatibility but not used; Feishu
/// requests are sent unsigned.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FeishuConfig {
    pub secret_key: String,
    #[serde(default)]
    pub sign_secret: Option<String>,
}

pub fn build_url(config: &FeishuConfig) -> String {
    format!(
        "https://open.feishu.cn/open-apis/bot/v2/hook/{}",
        config.secret_key
    )
}

pub async fn send(client: &reqwest::Client, config: &Value, message: &str) -> Result<()> {
    let config: FeishuConfig = decode_config(CHANNEL, config)?;
    if config.secret_key.is_empty() {
        return Err(NotifyError::InvalidConfig {
            channel: CHANNEL,
            reason: "missing secretKey".into(),
        });
    }

    let body = json!({
        "msg_type": "text",
        "content": { "text": message },
    });
    post_json(client, CHANNEL, &build_url(&config), &body).await?;
    Ok(())
}
