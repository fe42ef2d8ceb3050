//! JSON frames exchanged with agents over the persistent duplex channel.
//!
//! The first frame on a fresh connection must be [`AgentFrame::Hello`]; the
//! server answers with [`ServerFrame::HelloReply`] and from then on the link
//! carries telemetry and check results upstream and commands downstream.

use crate::types::{CheckStatus, MetricKind, Sample};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMeta {
    pub hostname: String,
    pub ip: String,
    pub os: String,
    pub arch: String,
    pub version: String,
    #[serde(default)]
    pub location: String,
}

/// Result of one probe execution, reported by the agent that ran it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckReport {
    pub monitor_id: String,
    pub started_at: i64,
    pub latency_ms: i64,
    pub status: CheckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_expiry_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Frames sent by an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AgentFrame {
    #[serde(rename_all = "camelCase")]
    Hello {
        api_key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
        meta: AgentMeta,
    },
    Telemetry {
        kind: MetricKind,
        samples: Vec<Sample>,
    },
    CheckResult(CheckReport),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandVerb {
    Audit,
    Probe,
    Reload,
}

/// Frames sent to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerFrame {
    #[serde(rename_all = "camelCase")]
    HelloReply { agent_id: String, server_time: i64 },
    Command {
        id: String,
        verb: CommandVerb,
        #[serde(default)]
        params: Value,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hello_frame_decodes() {
        let raw = json!({
            "type": "hello",
            "apiKey": "k-123",
            "meta": {
                "hostname": "web-01",
                "ip": "10.0.0.5",
                "os": "linux",
                "arch": "amd64",
                "version": "0.3.0"
            }
        });
        let frame: AgentFrame = serde_json::from_value(raw).unwrap();
        match frame {
            AgentFrame::Hello { api_key, agent_id, meta } => {
                assert_eq!(api_key, "k-123");
                assert!(agent_id.is_none());
                assert_eq!(meta.hostname, "web-01");
                assert_eq!(meta.location, "");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn telemetry_frame_round_trips() {
        let raw = json!({
            "type": "telemetry",
            "kind": "disk_io",
            "samples": [
                {"timestamp": 1700000000000_i64, "subject": "sda", "fields": {"readRate": 12.5, "writeRate": 3.0}}
            ]
        });
        let frame: AgentFrame = serde_json::from_value(raw.clone()).unwrap();
        let back = serde_json::to_value(&frame).unwrap();
        assert_eq!(raw, back);
    }

    #[test]
    fn command_frame_encodes_verb_lowercase() {
        let frame = ServerFrame::Command {
            id: "c-1".into(),
            verb: CommandVerb::Probe,
            params: json!({"monitor": {"id": "m-1"}}),
        };
        let v = serde_json::to_value(&frame).unwrap();
        assert_eq!(v["type"], "command");
        assert_eq!(v["verb"], "probe");
        assert_eq!(v["params"]["monitor"]["id"], "m-1");
    }
}
