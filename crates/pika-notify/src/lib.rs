//! Notification delivery: message rendering, per-channel adapters and the
//! dispatch worker pool.
//!
//! Channel dispatch is a closed tagged variant — adding a channel type is a
//! compile-time change. Supported endpoints are DingTalk, WeCom, Feishu and
//! custom webhooks; email is reserved and returns a typed "not implemented"
//! error. Channel configs live in the `notification_channels` property as
//! one JSON blob.

pub mod channels;
pub mod dispatcher;
pub mod error;
pub mod template;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};

/// The closed set of notification channel types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Dingtalk,
    Wecom,
    Feishu,
    Webhook,
    Email,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Dingtalk => "dingtalk",
            ChannelType::Wecom => "wecom",
            ChannelType::Feishu => "feishu",
            ChannelType::Webhook => "webhook",
            ChannelType::Email => "email",
        }
    }
}

impl std::str::FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dingtalk" => Ok(ChannelType::Dingtalk),
            "wecom" => Ok(ChannelType::Wecom),
            "feishu" => Ok(ChannelType::Feishu),
            "webhook" => Ok(ChannelType::Webhook),
            "email" => Ok(ChannelType::Email),
            _ => Err(format!("unknown channel type: {s}")),
        }
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the `notification_channels` property blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    pub enabled: bool,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Channels a rule actually notifies: the rule's channel list intersected
/// with the globally enabled ones.
pub fn route<'a>(
    configured: &'a [ChannelConfig],
    rule_channels: &[String],
) -> Vec<&'a ChannelConfig> {
    configured
        .iter()
        .filter(|c| c.enabled)
        .filter(|c| rule_channels.iter().any(|r| r == c.channel_type.as_str()))
        .collect()
}
