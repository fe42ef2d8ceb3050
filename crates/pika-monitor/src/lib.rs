//! Monitor scheduling, probe coordination and uptime statistics.
//!
//! The scheduler keeps a next-due clock per monitor, fans probe commands out
//! to eligible agents, collects their check results, and reduces each tick
//! to a single consensus verdict. Uptime/SLA figures are a pure derivation
//! over the persisted verdicts.

pub mod consensus;
pub mod scheduler;
pub mod uptime;

use pika_common::frames::ServerFrame;

/// Downstream command delivery, implemented by the agent link manager.
/// `Err` means the command could not be delivered after the link layer's
/// retry.
#[async_trait::async_trait]
pub trait CommandSink: Send + Sync {
    async fn send_command(&self, agent_id: &str, frame: ServerFrame) -> anyhow::Result<()>;
}
