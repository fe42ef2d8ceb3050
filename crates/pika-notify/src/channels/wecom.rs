use crate::channels::{decode_config, post_json};
use crate::error::{NotifyError, Result};
use serde::Deserialize;
use serde_json::{json, Value};

const CHANNEL: &str = "wecom";

/// WeCom group robot config: `secretKey` is the webhook `key` parameter.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WeComConfig {
    pub secret_key: String,
}

pub fn build_url(config: &WeComConfig) -> String {
    format!(
        "https://qyapi.weixin.qq.com/cgi-bin/webhook/send?key={}",
        config.secret_key
    )
}

pub async fn send(client: &reqwest::Client, config: &Value, message: &str) -> Result<()> {
    let config: WeComConfig = decode_config(CHANNEL, config)?;
    if config.secret_key.is_empty() {
        return Err(NotifyError::InvalidConfig {
            channel: CHANNEL,
            reason: "missing secretKey".into(),
        });
    }

    let body = json!({
        "msgtype": "text",
        "text": { "content": message },
    });
    let reply = post_json(client, CHANNEL, &build_url(&config), &body).await?;

    // WeCom answers HTTP 200 even for failures; errcode is authoritative.
    match reply.get("errcode").and_then(|v| v.as_i64()) {
        Some(0) => Ok(()),
        Some(code) => {
            let errmsg = reply
                .get("errmsg")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            Err(NotifyError::Api {
                channel: CHANNEL,
                detail: format!("errcode={code}: {errmsg}"),
            })
        }
        None => Err(NotifyError::Api {
            channel: CHANNEL,
            detail: "response missing errcode".into(),
        }),
    }
}
