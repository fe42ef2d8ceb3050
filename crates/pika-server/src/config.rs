use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen address for the duplex agent endpoint.
    #[serde(default = "default_agent_listen")]
    pub agent_listen: String,
    /// Listen address for the admin/API collaborator surface.
    #[serde(default = "default_http_listen")]
    pub http_listen: String,

    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding the domain database and the time-series
    /// partitions.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LivenessConfig {
    /// An agent with no frame for this long is flipped offline.
    #[serde(default = "default_offline_threshold_secs")]
    pub offline_threshold_secs: u64,
    /// Liveness sweeper period.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            offline_threshold_secs: default_offline_threshold_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_agent_listen() -> String {
    "0.0.0.0:7001".to_string()
}

fn default_http_listen() -> String {
    "0.0.0.0:7002".to_string()
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_offline_threshold_secs() -> u64 {
    90
}

fn default_sweep_interval_secs() -> u64 {
    10
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn offline_threshold_ms(&self) -> i64 {
        self.liveness.offline_threshold_secs as i64 * 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.agent_listen, "0.0.0.0:7001");
        assert_eq!(config.http_listen, "0.0.0.0:7002");
        assert_eq!(config.database.data_dir, "data");
        assert_eq!(config.liveness.offline_threshold_secs, 90);
        assert_eq!(config.liveness.sweep_interval_secs, 10);
    }

    #[test]
    fn partial_config_overrides_selected_fields() {
        let config: ServerConfig = toml::from_str(
            r#"
            agent_listen = "127.0.0.1:9001"

            [liveness]
            offline_threshold_secs = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.agent_listen, "127.0.0.1:9001");
        assert_eq!(config.http_listen, "0.0.0.0:7002");
        assert_eq!(config.liveness.offline_threshold_secs, 30);
        assert_eq!(config.offline_threshold_ms(), 30_000);
    }
}
