use crate::channels::{decode_config, post_json};
use crate::error::{NotifyError, Result};
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const CHANNEL: &str = "dingtalk";

/// DingTalk robot config: `secretKey` is the webhook access token,
/// `signSecret` enables request signing when present.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DingTalkConfig {
    pub secret_key: String,
    #[serde(default)]
    pub sign_secret: Option<String>,
}

/// `base64(HMAC_SHA256(secret, "{timestamp}\n{secret}"))`, DingTalk's
/// documented signing string.
pub fn sign(timestamp_ms: i64, secret: &str) -> String {
    let string_to_sign = format!("{timestamp_ms}\n{secret}");
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(string_to_sign.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

/// The final webhook URL; with a signing secret it carries exactly one
/// `timestamp` and one `sign` query parameter.
pub fn build_url(config: &DingTalkConfig, timestamp_ms: i64) -> String {
    let base = format!(
        "https://oapi.dingtalk.com/robot/send?access_token={}",
        config.secret_key
    );
    match &config.sign_secret {
        Some(secret) if !secret.is_empty() => {
            let sign = urlencoding::encode(&sign(timestamp_ms, secret)).into_owned();
            format!("{base}&timestamp={timestamp_ms}&sign={sign}")
        }
        _ => base,
    }
}

pub async fn send(client: &reqwest::Client, config: &Value, message: &str) -> Result<()> {
    let config: DingTalkConfig = decode_config(CHANNEL, config)?;
    if config.secret_key.is_empty() {
        return Err(NotifyError::InvalidConfig {
            channel: CHANNEL,
            reason: "missing secretKey".into(),
        });
    }

    let url = build_url(&config, chrono::Utc::now().timestamp_millis());
    let body = json!({
        "msgtype": "text",
        "text": { "content": message },
    });

    let reply = post_json(client, CHANNEL, &url, &body).await?;
    // DingTalk reports failures inside a 200 body.
    match reply.get("errcode").and_then(|v| v.as_i64()) {
        None | Some(0) => Ok(()),
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
    }
}
