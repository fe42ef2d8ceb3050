use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The metric kinds an agent may report.
///
/// Multi-instance kinds (`disk`, `disk_io`, `network`, `gpu`, `temperature`)
/// distinguish instances through the sample `subject` (mountpoint, device,
/// interface, sensor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Cpu,
    Memory,
    Disk,
    DiskIo,
    Network,
    Gpu,
    Temperature,
    Host,
    Load,
}

impl MetricKind {
    pub const ALL: [MetricKind; 9] = [
        MetricKind::Cpu,
        MetricKind::Memory,
        MetricKind::Disk,
        MetricKind::DiskIo,
        MetricKind::Network,
        MetricKind::Gpu,
        MetricKind::Temperature,
        MetricKind::Host,
        MetricKind::Load,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Memory => "memory",
            MetricKind::Disk => "disk",
            MetricKind::DiskIo => "disk_io",
            MetricKind::Network => "network",
            MetricKind::Gpu => "gpu",
            MetricKind::Temperature => "temperature",
            MetricKind::Host => "host",
            MetricKind::Load => "load",
        }
    }

    /// Gauge fields aggregate as min/avg/max over a bucket.
    pub fn gauge_fields(&self) -> &'static [&'static str] {
        match self {
            MetricKind::Cpu => &["usagePercent"],
            MetricKind::Memory => &["used", "total", "usagePercent"],
            MetricKind::Disk => &["used", "total", "usagePercent", "avgUsagePercent"],
            MetricKind::Gpu => &["utilization", "temperature"],
            MetricKind::Temperature => &["temperature"],
            MetricKind::Load => &["load1", "load5", "load15"],
            _ => &[],
        }
    }

    /// Rate fields aggregate as max over a bucket.
    pub fn rate_fields(&self) -> &'static [&'static str] {
        match self {
            MetricKind::DiskIo => &["readRate", "writeRate"],
            MetricKind::Network => &[
                "sentRate",
                "recvRate",
                "totalBytesSentRate",
                "totalBytesRecvRate",
            ],
            _ => &[],
        }
    }

    /// `host` carries platform strings and boot time; it feeds the latest
    /// snapshot only and produces no aggregate series.
    pub fn is_aggregated(&self) -> bool {
        !matches!(self, MetricKind::Host)
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(MetricKind::Cpu),
            "memory" => Ok(MetricKind::Memory),
            "disk" => Ok(MetricKind::Disk),
            "disk_io" => Ok(MetricKind::DiskIo),
            "network" => Ok(MetricKind::Network),
            "gpu" => Ok(MetricKind::Gpu),
            "temperature" => Ok(MetricKind::Temperature),
            "host" => Ok(MetricKind::Host),
            "load" => Ok(MetricKind::Load),
            _ => Err(format!("unknown metric kind: {s}")),
        }
    }
}

/// One reported data point. `fields` is the kind-specific payload; numeric
/// entries participate in aggregation, everything else is latest-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Offline,
    Online,
}

impl AgentStatus {
    pub fn as_i32(&self) -> i32 {
        match self {
            AgentStatus::Offline => 0,
            AgentStatus::Online => 1,
        }
    }

    pub fn from_i32(v: i32) -> Self {
        if v == 1 {
            AgentStatus::Online
        } else {
            AgentStatus::Offline
        }
    }
}

/// Status of a single probe check, and of a per-tick monitor verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Up,
    Down,
    Unknown,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Up => "up",
            CheckStatus::Down => "down",
            CheckStatus::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for CheckStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(CheckStatus::Up),
            "down" => Ok(CheckStatus::Down),
            "unknown" => Ok(CheckStatus::Unknown),
            _ => Err(format!("unknown check status: {s}")),
        }
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorType {
    Http,
    Tcp,
    Ping,
    Tls,
}

/// Which probes a monitor runs on each tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ProbeSelection {
    /// Every online agent; verdict requires all participants up.
    All,
    /// Every online agent; verdict requires any participant up.
    Any,
    /// A fixed allow-list of agent ids.
    List {
        #[serde(rename = "agentIds")]
        agent_ids: Vec<String>,
    },
    /// N probes chosen by consistent hashing, rotated daily.
    Fanout { fanout: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Critical => "critical",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            AlertLevel::Info => "ℹ️",
            AlertLevel::Warning => "⚠️",
            AlertLevel::Critical => "🚨",
        }
    }
}

impl std::str::FromStr for AlertLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(AlertLevel::Info),
            "warning" => Ok(AlertLevel::Warning),
            "critical" => Ok(AlertLevel::Critical),
            _ => Err(format!("unknown alert level: {s}")),
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an alert rule observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Cpu,
    Memory,
    Disk,
    Network,
    Cert,
    Service,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Cpu => "cpu",
            AlertKind::Memory => "memory",
            AlertKind::Disk => "disk",
            AlertKind::Network => "network",
            AlertKind::Cert => "cert",
            AlertKind::Service => "service",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            AlertKind::Cpu => "CPU alert",
            AlertKind::Memory => "Memory alert",
            AlertKind::Disk => "Disk alert",
            AlertKind::Network => "Network disconnect alert",
            AlertKind::Cert => "Certificate alert",
            AlertKind::Service => "Service alert",
        }
    }
}

impl std::str::FromStr for AlertKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(AlertKind::Cpu),
            "memory" => Ok(AlertKind::Memory),
            "disk" => Ok(AlertKind::Disk),
            "network" => Ok(AlertKind::Network),
            "cert" => Ok(AlertKind::Cert),
            "service" => Ok(AlertKind::Service),
            _ => Err(format!("unknown alert kind: {s}")),
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "gt")]
    GreaterThan,
    #[serde(rename = "ge")]
    GreaterEqual,
    #[serde(rename = "lt")]
    LessThan,
    #[serde(rename = "le")]
    LessEqual,
}

impl CompareOp {
    pub fn check(&self, value: f64, threshold: f64) -> bool {
        match self {
            CompareOp::GreaterThan => value > threshold,
            CompareOp::GreaterEqual => value >= threshold,
            CompareOp::LessThan => value < threshold,
            CompareOp::LessEqual => value <= threshold,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::GreaterThan => "gt",
            CompareOp::GreaterEqual => "ge",
            CompareOp::LessThan => "lt",
            CompareOp::LessEqual => "le",
        }
    }
}

impl std::str::FromStr for CompareOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gt" | ">" => Ok(CompareOp::GreaterThan),
            "ge" | ">=" => Ok(CompareOp::GreaterEqual),
            "lt" | "<" => Ok(CompareOp::LessThan),
            "le" | "<=" => Ok(CompareOp::LessEqual),
            _ => Err(format!("unknown compare operator: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertRecordStatus {
    Firing,
    Resolved,
}

impl AlertRecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertRecordStatus::Firing => "firing",
            AlertRecordStatus::Resolved => "resolved",
        }
    }
}

impl std::str::FromStr for AlertRecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "firing" => Ok(AlertRecordStatus::Firing),
            "resolved" => Ok(AlertRecordStatus::Resolved),
            _ => Err(format!("unknown alert record status: {s}")),
        }
    }
}

/// FNV-1a over a series key; used for the 64-way shard locks and for
/// rendezvous probe selection.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_kind_round_trips_through_str() {
        for kind in MetricKind::ALL {
            assert_eq!(kind.as_str().parse::<MetricKind>().unwrap(), kind);
        }
    }

    #[test]
    fn probe_selection_json_shape() {
        let sel: ProbeSelection =
            serde_json::from_str(r#"{"mode":"fanout","fanout":3}"#).unwrap();
        assert_eq!(sel, ProbeSelection::Fanout { fanout: 3 });

        let sel: ProbeSelection =
            serde_json::from_str(r#"{"mode":"list","agentIds":["a","b"]}"#).unwrap();
        assert_eq!(
            sel,
            ProbeSelection::List {
                agent_ids: vec!["a".into(), "b".into()]
            }
        );
    }

    #[test]
    fn compare_op_accepts_symbols() {
        assert_eq!(">".parse::<CompareOp>().unwrap(), CompareOp::GreaterThan);
        assert_eq!("<=".parse::<CompareOp>().unwrap(), CompareOp::LessEqual);
        assert!(CompareOp::GreaterEqual.check(80.0, 80.0));
        assert!(!CompareOp::GreaterThan.check(80.0, 80.0));
    }

    #[test]
    fn fnv1a_is_stable() {
        // Reference vector for the 64-bit FNV-1a parameters.
        assert_eq!(fnv1a(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
    }
}
