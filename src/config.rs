use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Router configuration, injected into the registry and round tripper at
/// construction.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RouterConfig {
    pub router_ip: String,
    pub trace_key: String,
    pub router_group_guid: String,
    pub registry: RegistryConfig,
    pub proxy: ProxyConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// How often the background pruner ticks. Zero disables pruning.
    #[serde(with = "duration_serde")]
    pub prune_interval: Duration,
    /// Endpoints not refreshed within this window are evicted.
    #[serde(with = "duration_serde")]
    pub stale_threshold: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Attempts per request for retryable network failures.
    pub retry_limit: usize,
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,
    pub pool_max_idle_per_host: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            router_ip: "127.0.0.1".to_string(),
            trace_key: String::new(),
            router_group_guid: String::new(),
            registry: RegistryConfig::default(),
            proxy: ProxyConfig::default(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            prune_interval: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(120),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            retry_limit: 3,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            pool_max_idle_per_host: 20,
        }
    }
}

impl RouterConfig {
    /// Load configuration from a YAML file.
    pub async fn load(path: &str) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {path}"))?;

        let config: RouterConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {path}"))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.proxy.retry_limit == 0 {
            anyhow::bail!("proxy.retry_limit must be at least 1");
        }

        if !self.registry.prune_interval.is_zero() {
            if self.registry.stale_threshold.is_zero() {
                anyhow::bail!("registry.stale_threshold cannot be zero when pruning is enabled");
            }
            if self.registry.stale_threshold < self.registry.prune_interval {
                anyhow::bail!(
                    "registry.stale_threshold must be at least registry.prune_interval"
                );
            }
        }

        Ok(())
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let secs = duration.as_secs();
        serializer.serialize_str(&format!("{}s", secs))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
        let (value, multiplier) = if let Some(num) = s.strip_suffix("ms") {
            (num, 1u64)
        } else if let Some(num) = s.strip_suffix('s') {
            (num, 1_000)
        } else if let Some(num) = s.strip_suffix('m') {
            (num, 60_000)
        } else if let Some(num) = s.strip_suffix('h') {
            (num, 3_600_000)
        } else {
            (s, 1_000)
        };
        let value: u64 = value
            .parse()
            .map_err(|_| format!("invalid duration: {s}"))?;
        Ok(Duration::from_millis(value * multiplier))
    }
}
