use crate::channels::dingtalk::{self, DingTalkConfig};
use crate::channels::feishu::{self, FeishuConfig};
use crate::channels::wecom::{self, WeComConfig};
use crate::error::NotifyError;
use crate::{route, template, ChannelConfig, ChannelType};
use base64::Engine;
use pika_alert::{AlertNotification, NotifyKind};
use pika_common::types::{AlertKind, AlertLevel, AlertRecordStatus, CompareOp};
use pika_storage::{AgentRow, AlertRecordRow, AlertRuleRow};
use serde_json::json;

#[test]
fn dingtalk_sign_is_deterministic_hmac() {
    // The reference vector from the signing contract: ts=1700000000000,
    // secret="s".
    let a = dingtalk::sign(1_700_000_000_000, "s");
    let b = dingtalk::sign(1_700_000_000_000, "s");
    assert_eq!(a, b);

    // A standard-base64 HMAC-SHA256 digest decodes to exactly 32 bytes.
    let raw = base64::engine::general_purpose::STANDARD
        .decode(&a)
        .unwrap();
    assert_eq!(raw.len(), 32);

    // Different timestamp or secret changes the signature.
    assert_ne!(a, dingtalk::sign(1_700_000_000_001, "s"));
    assert_ne!(a, dingtalk::sign(1_700_000_000_000, "t"));
}

#[test]
fn dingtalk_signed_url_has_exactly_one_timestamp_and_sign() {
    let config = DingTalkConfig {
        secret_key: "tok".into(),
        sign_secret: Some("s".into()),
    };
    let url = dingtalk::build_url(&config, 1_700_000_000_000);

    assert!(url.starts_with("https://oapi.dingtalk.com/robot/send?access_token=tok"));
    assert_eq!(url.matches("timestamp=").count(), 1);
    assert_eq!(url.matches("sign=").count(), 1);
    assert!(url.contains("timestamp=1700000000000"));
}

#[test]
fn dingtalk_url_without_secret_is_unsigned() {
    let config = DingTalkConfig {
        secret_key: "tok".into(),
        sign_secret: None,
    };
    let url = dingtalk::build_url(&config, 1_700_000_000_000);
    assert_eq!(
        url,
        "https://oapi.dingtalk.com/robot/send?access_token=tok"
    );
}

#[test]
fn wecom_and_feishu_urls_embed_the_key() {
    let url = wecom::build_url(&WeComConfig {
        secret_key: "k-1".into(),
    });
    assert_eq!(
        url,
        "https://qyapi.weixin.qq.com/cgi-bin/webhook/send?key=k-1"
    );

    let url = feishu::build_url(&FeishuConfig {
        secret_key: "hook-1".into(),
        sign_secret: None,
    });
    assert_eq!(url, "https://open.feishu.cn/open-apis/bot/v2/hook/hook-1");
}

#[test]
fn strict_config_schemas_reject_unknown_fields() {
    let bad = json!({"secretKey": "tok", "unexpected": true});
    assert!(serde_json::from_value::<DingTalkConfig>(bad).is_err());

    let good = json!({"secretKey": "tok", "signSecret": "s"});
    let config: DingTalkConfig = serde_json::from_value(good).unwrap();
    assert_eq!(config.sign_secret.as_deref(), Some("s"));
}

#[tokio::test]
async fn email_channel_is_a_typed_not_implemented() {
    let client = reqwest::Client::new();
    let err = crate::channels::email::send(&client, &json!({}), "hi")
        .await
        .unwrap_err();
    assert!(matches!(err, NotifyError::NotImplemented));
}

#[test]
fn route_intersects_rule_channels_with_enabled_ones() {
    let configured = vec![
        ChannelConfig {
            channel_type: ChannelType::Dingtalk,
            enabled: true,
            config: json!({}),
        },
        ChannelConfig {
            channel_type: ChannelType::Wecom,
            enabled: false,
            config: json!({}),
        },
        ChannelConfig {
            channel_type: ChannelType::Feishu,
            enabled: true,
            config: json!({}),
        },
    ];

    // The rule asks for dingtalk + wecom; wecom is globally disabled.
    let routed = route(&configured, &["dingtalk".into(), "wecom".into()]);
    assert_eq!(routed.len(), 1);
    assert_eq!(routed[0].channel_type, ChannelType::Dingtalk);

    // A rule with no channels routes nowhere.
    assert!(route(&configured, &[]).is_empty());
}

fn sample_event(kind: NotifyKind) -> AlertNotification {
    AlertNotification {
        kind,
        rule: AlertRuleRow {
            id: "rule-1".into(),
            name: "cpu high".into(),
            kind: AlertKind::Cpu,
            agent_id: Some("a1".into()),
            monitor_id: None,
            op: CompareOp::GreaterThan,
            threshold: 80.0,
            for_sec: 60,
            level: AlertLevel::Warning,
            escalation_threshold: None,
            channels: vec!["dingtalk".into()],
            enabled: true,
            created_at: 0,
        },
        record: AlertRecordRow {
            id: "rec-1".into(),
            rule_id: "rule-1".into(),
            status: AlertRecordStatus::Firing,
            first_breach_at: 1_700_000_000_000,
            fired_at: 1_700_000_060_000,
            resolved_at: Some(1_700_000_120_000),
            last_value: 91.25,
            threshold: 80.0,
            level: AlertLevel::Warning,
            message: "cpu usage 91.25% breaches threshold 80.00%".into(),
        },
        agent: Some(AgentRow {
            id: "a1".into(),
            api_key: "k".into(),
            name: "web-01".into(),
            hostname: "web-01.internal".into(),
            ip: "10.0.0.5".into(),
            os: "linux".into(),
            arch: "amd64".into(),
            version: "0.3.0".into(),
            location: "eu-west".into(),
            status: pika_common::types::AgentStatus::Online,
            last_seen_at: 0,
            created_at: 0,
        }),
    }
}

#[test]
fn firing_message_carries_agent_and_values() {
    let message = template::render(&sample_event(NotifyKind::Firing));
    assert!(message.contains("⚠️"));
    assert!(message.contains("CPU alert"));
    assert!(message.contains("Probe: web-01 (a1)"));
    assert!(message.contains("Host: web-01.internal"));
    assert!(message.contains("IP: 10.0.0.5"));
    assert!(message.contains("Threshold: 80.00"));
    assert!(message.contains("Current value: 91.25"));
}

#[test]
fn resolved_message_uses_check_mark_and_resolve_time() {
    let message = template::render(&sample_event(NotifyKind::Resolved));
    assert!(message.starts_with("✅"));
    assert!(message.contains("resolved"));
    assert!(message.contains("Resolved at:"));
}

#[test]
fn rendering_is_deterministic() {
    let event = sample_event(NotifyKind::Firing);
    assert_eq!(template::render(&event), template::render(&event));
}
