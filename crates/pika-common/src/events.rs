//! Internal events flowing between subsystems. The link manager and the
//! probe coordinator produce these; the alert engine is the sole consumer.

use crate::types::CheckStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemEvent {
    AgentOnline {
        agent_id: String,
        at_ms: i64,
    },
    AgentOffline {
        agent_id: String,
        at_ms: i64,
    },
    MonitorTransition {
        monitor_id: String,
        from: CheckStatus,
        to: CheckStatus,
        at_ms: i64,
    },
}
