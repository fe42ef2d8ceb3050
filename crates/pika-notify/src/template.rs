//! Plain-text notification message rendering. The output is a deterministic
//! function of the event, the alert record and the agent, so the same
//! lifecycle step always produces the same message.

use chrono::DateTime;
use pika_alert::{AlertNotification, NotifyKind};

fn format_ms(ts_ms: i64) -> String {
    DateTime::from_timestamp_millis(ts_ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts_ms.to_string())
}

pub fn render(event: &AlertNotification) -> String {
    let kind_name = event.rule.kind.display_name();
    let (agent_line, host_line, ip_line) = match &event.agent {
        Some(agent) => (
            format!("Probe: {} ({})\n", agent.name, agent.id),
            format!("Host: {}\n", agent.hostname),
            format!("IP: {}\n", agent.ip),
        ),
        None => (String::new(), String::new(), String::new()),
    };

    match event.kind {
        NotifyKind::Firing => format!(
            "{icon} {kind_name}\n\n\
             {agent_line}{host_line}{ip_line}\
             Alert type: {kind}\n\
             Message: {message}\n\
             Threshold: {threshold:.2}\n\
             Current value: {value:.2}\n\
             Fired at: {fired}",
            icon = event.record.level.icon(),
            kind = event.rule.kind,
            message = event.record.message,
            threshold = event.record.threshold,
            value = event.record.last_value,
            fired = format_ms(event.record.fired_at),
        ),
        NotifyKind::LevelUp => format!(
            "{icon} {kind_name} escalated to {level}\n\n\
             {agent_line}{host_line}{ip_line}\
             Alert type: {kind}\n\
             Message: {message}\n\
             Threshold: {threshold:.2}\n\
             Current value: {value:.2}\n\
             Fired at: {fired}",
            icon = event.record.level.icon(),
            level = event.record.level,
            kind = event.rule.kind,
            message = event.record.message,
            threshold = event.record.threshold,
            value = event.record.last_value,
            fired = format_ms(event.record.fired_at),
        ),
        NotifyKind::Resolved => format!(
            "✅ {kind_name} resolved\n\n\
             {agent_line}{host_line}{ip_line}\
             Alert type: {kind}\n\
             Current value: {value:.2}\n\
             Resolved at: {resolved}",
            kind = event.rule.kind,
            value = event.record.last_value,
            resolved = format_ms(event.record.resolved_at.unwrap_or(event.record.fired_at)),
        ),
    }
}

/// Canned message for the channel test operation.
pub fn test_message() -> &'static str {
    "This is a test notification message from Pika"
}
