//! Shared vocabulary of the Pika monitoring server: metric kinds and their
//! field schemas, agent/monitor/alert status enums, the agent wire frames,
//! and snowflake id generation.

pub mod events;
pub mod frames;
pub mod id;
pub mod types;
