//! Stateful alert rule engine.
//!
//! A single evaluation task ticks every 10 seconds, pulls each rule's
//! observable (latest metric overlay, agent online flag, monitor verdict or
//! certificate expiry), applies the sustain window, and drives alert
//! records through the firing → resolved lifecycle. Notification events go
//! out over a channel this engine owns; the dispatcher only consumes.

pub mod engine;

#[cfg(test)]
mod tests;

use pika_storage::{AgentRow, AlertRecordRow, AlertRuleRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyKind {
    Firing,
    Resolved,
    LevelUp,
}

impl NotifyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyKind::Firing => "firing",
            NotifyKind::Resolved => "resolved",
            NotifyKind::LevelUp => "level-up",
        }
    }
}

/// One notification event: everything the dispatcher needs to render and
/// route a message without calling back into the engine.
#[derive(Debug, Clone)]
pub struct AlertNotification {
    pub kind: NotifyKind,
    pub rule: AlertRuleRow,
    pub record: AlertRecordRow,
    pub agent: Option<AgentRow>,
}
