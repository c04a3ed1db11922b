//! Configuration schema. TOML-deserialized via serde; duration
//! fields use `humantime_serde` so config authors can write `"2s"`/`"500ms"`.

use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_output() -> String {
    "stdout".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
    pub balance: String,
    pub discovery: DiscoveryConfig,
    pub healthcheck: HealthcheckConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    pub kind: String,
    #[serde(default)]
    pub static_list: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthcheckConfig {
    pub kind: String,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub count: u32,
    pub loss: f64,
    #[serde(with = "humantime_serde")]
    pub rtt: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, #[source] source: std::io::Error },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unknown balance strategy: {0:?}")]
    UnknownBalance(String),
    #[error("unknown discovery kind: {0:?}")]
    UnknownDiscovery(String),
    #[error("unknown healthcheck kind: {0:?}")]
    UnknownHealthcheck(String),
    #[error("invalid bind address {0:?}: {1}")]
    InvalidBind(String, std::net::AddrParseError),
}

impl Config {
    pub fn from_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub async fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read { path: path.display().to_string(), source })?;
        Self::from_str(&raw)
    }

    /// Validate the cross-field constraints that are fatal at
    /// startup: known balance/discovery/healthcheck kinds and a parseable
    /// bind address.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.server.balance.as_str(), "roundrobin" | "iphash") {
            return Err(ConfigError::UnknownBalance(self.server.balance.clone()));
        }
        if self.server.discovery.kind != "static" {
            return Err(ConfigError::UnknownDiscovery(self.server.discovery.kind.clone()));
        }
        if !matches!(self.server.healthcheck.kind.as_str(), "none" | "ping") {
            return Err(ConfigError::UnknownHealthcheck(self.server.healthcheck.kind.clone()));
        }
        self.server
            .bind
            .parse::<std::net::SocketAddr>()
            .map_err(|e| ConfigError::InvalidBind(self.server.bind.clone(), e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [logging]
        level = "info"

        [server]
        bind = "0.0.0.0:9000"
        balance = "roundrobin"

        [server.discovery]
        kind = "static"
        static_list = ["10.0.0.1:9001", "10.0.0.2:9001"]

        [server.healthcheck]
        kind = "ping"
        interval = "2s"
        timeout = "500ms"
        count = 3
        loss = 0.5
        rtt = "200ms"
    "#;

    #[test]
    fn parses_sample_config() {
        let cfg = Config::from_str(SAMPLE).unwrap();
        assert_eq!(cfg.server.bind, "0.0.0.0:9000");
        assert_eq!(cfg.server.healthcheck.interval, Duration::from_secs(2));
        assert_eq!(cfg.server.healthcheck.timeout, Duration::from_millis(500));
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_unknown_balance() {
        let bad = SAMPLE.replace("roundrobin", "weighted");
        let cfg = Config::from_str(&bad).unwrap();
        assert!(matches!(cfg.validate(), Err(ConfigError::UnknownBalance(_))));
    }

    #[test]
    fn rejects_bad_bind() {
        let bad = SAMPLE.replace("0.0.0.0:9000", "not-an-address");
        let cfg = Config::from_str(&bad).unwrap();
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidBind(_, _))));
    }
}
