// src/config/mod.rs

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ClientError, Result};

/// Prefix for every environment variable read by [`ClientConfig::from_env`]
pub const ENV_PREFIX: &str = "MANAGED_STORE_";

/// Backoff parameters for one retry budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries allowed after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(default = "default_base_delay", with = "duration_serde")]
    pub base_delay: Duration,

    /// Ceiling for the exponential part of the delay
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Jitter is drawn from `[0, delay * jitter_fraction)`
    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_jitter_fraction() -> f64 {
    0.2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter_fraction: default_jitter_fraction(),
        }
    }
}

impl RetryConfig {
    /// Budget used for establishing sessions
    pub fn connection_default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            jitter_fraction: 0.2,
        }
    }

    pub fn validate(&self, name: &str) -> Result<()> {
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err(ClientError::Config(format!(
                "{}.jitter_fraction must be within [0, 1], got {}",
                name, self.jitter_fraction
            )));
        }
        if self.base_delay > self.max_delay {
            return Err(ClientError::Config(format!(
                "{}.base_delay ({:?}) exceeds max_delay ({:?})",
                name, self.base_delay, self.max_delay
            )));
        }
        Ok(())
    }
}

/// What happens to queued operations when the client shuts down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Keep draining until the queue is empty or `shutdown_timeout` elapses
    Drain,
    /// Fail every queued operation with `ClientError::Shutdown`
    Discard,
}

impl FromStr for ShutdownPolicy {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "drain" => Ok(ShutdownPolicy::Drain),
            "discard" => Ok(ShutdownPolicy::Discard),
            other => Err(ClientError::Config(format!(
                "unknown shutdown policy '{}', expected 'drain' or 'discard'",
                other
            ))),
        }
    }
}

/// Configuration for the managed client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Retry budget for individual operations
    #[serde(default)]
    pub retry: RetryConfig,

    /// Retry budget for establishing a session
    #[serde(default = "RetryConfig::connection_default")]
    pub connect_retry: RetryConfig,

    /// Maximum number of buffered asynchronous operations
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How many operations the drain task takes per pass
    #[serde(default = "default_drain_batch_size")]
    pub drain_batch_size: usize,

    /// How often the session is probed
    #[serde(default = "default_health_check_interval", with = "duration_serde")]
    pub health_check_interval: Duration,

    /// Timeout for a single health probe
    #[serde(default = "default_probe_timeout", with = "duration_serde")]
    pub probe_timeout: Duration,

    /// Deadline for a synchronous operation including its retries
    #[serde(default, with = "option_duration_serde")]
    pub operation_timeout: Option<Duration>,

    #[serde(default = "default_shutdown_policy")]
    pub shutdown_policy: ShutdownPolicy,

    /// Upper bound on draining during shutdown
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_drain_batch_size() -> usize {
    50
}

fn default_health_check_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_shutdown_policy() -> ShutdownPolicy {
    ShutdownPolicy::Drain
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            connect_retry: RetryConfig::connection_default(),
            queue_capacity: default_queue_capacity(),
            drain_batch_size: default_drain_batch_size(),
            health_check_interval: default_health_check_interval(),
            probe_timeout: default_probe_timeout(),
            operation_timeout: None,
            shutdown_policy: default_shutdown_policy(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl ClientConfig {
    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ClientConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Build a config from `MANAGED_STORE_*` environment variables.
    ///
    /// Durations are given in milliseconds. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = ClientConfig::default();

        if let Some(v) = env_parse("MAX_RETRIES")? {
            config.retry.max_retries = v;
        }
        if let Some(v) = env_parse_millis("BASE_DELAY_MS")? {
            config.retry.base_delay = v;
        }
        if let Some(v) = env_parse_millis("MAX_DELAY_MS")? {
            config.retry.max_delay = v;
        }
        if let Some(v) = env_parse("JITTER_FRACTION")? {
            config.retry.jitter_fraction = v;
        }
        if let Some(v) = env_parse("CONNECT_MAX_RETRIES")? {
            config.connect_retry.max_retries = v;
        }
        if let Some(v) = env_parse("QUEUE_CAPACITY")? {
            config.queue_capacity = v;
        }
        if let Some(v) = env_parse("DRAIN_BATCH_SIZE")? {
            config.drain_batch_size = v;
        }
        if let Some(v) = env_parse_millis("HEALTH_CHECK_INTERVAL_MS")? {
            config.health_check_interval = v;
        }
        if let Some(v) = env_parse_millis("PROBE_TIMEOUT_MS")? {
            config.probe_timeout = v;
        }
        if let Some(v) = env_parse_millis("OPERATION_TIMEOUT_MS")? {
            config.operation_timeout = Some(v);
        }
        if let Some(v) = env_parse("SHUTDOWN_POLICY")? {
            config.shutdown_policy = v;
        }
        if let Some(v) = env_parse_millis("SHUTDOWN_TIMEOUT_MS")? {
            config.shutdown_timeout = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.retry.validate("retry")?;
        self.connect_retry.validate("connect_retry")?;

        if self.queue_capacity == 0 {
            return Err(ClientError::Config(
                "queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.drain_batch_size == 0 {
            return Err(ClientError::Config(
                "drain_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.health_check_interval.is_zero() {
            return Err(ClientError::Config(
                "health_check_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the Redis-backed document store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisStoreConfig {
    /// Redis connection URL
    pub url: String,

    /// Namespace prepended to every document path
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Connection timeout
    #[serde(default = "default_conn_timeout", with = "duration_serde")]
    pub connection_timeout: Duration,
}

fn default_key_prefix() -> String {
    "docs".to_string()
}

fn default_conn_timeout() -> Duration {
    Duration::from_secs(2)
}

impl RedisStoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key_prefix: default_key_prefix(),
            connection_timeout: default_conn_timeout(),
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    let key = format!("{}{}", ENV_PREFIX, name);
    match env::var(&key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ClientError::Config(format!("invalid value for {}: {}", key, e))),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ClientError::Config(format!("cannot read {}: {}", key, e))),
    }
}

fn env_parse_millis(name: &str) -> Result<Option<Duration>> {
    Ok(env_parse::<u64>(name)?.map(Duration::from_millis))
}

// Helper module to serialize/deserialize Duration with serde
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_defaults_fill_missing_fields() {
        let config = ClientConfig::from_json_str(r#"{"queue_capacity": 10}"#).unwrap();
        assert_eq!(config.queue_capacity, 10);
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.connect_retry, RetryConfig::connection_default());
        assert_eq!(config.health_check_interval, Duration::from_secs(5));
        assert_eq!(config.shutdown_policy, ShutdownPolicy::Drain);
        assert_eq!(config.operation_timeout, None);
    }

    #[test]
    fn test_json_durations_are_milliseconds() {
        let config = ClientConfig::from_json_str(
            r#"{
                "retry": {"max_retries": 2, "base_delay": 50, "max_delay": 400, "jitter_fraction": 0.0},
                "health_check_interval": 250,
                "operation_timeout": 1500,
                "shutdown_policy": "discard"
            }"#,
        )
        .unwrap();

        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.retry.base_delay, Duration::from_millis(50));
        assert_eq!(config.retry.max_delay, Duration::from_millis(400));
        assert_eq!(config.health_check_interval, Duration::from_millis(250));
        assert_eq!(config.operation_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.shutdown_policy, ShutdownPolicy::Discard);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = ClientConfig::default();
        config.retry.jitter_fraction = 1.5;
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));

        let mut config = ClientConfig::default();
        config.queue_capacity = 0;
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));

        let mut config = ClientConfig::default();
        config.drain_batch_size = 0;
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));

        let mut config = ClientConfig::default();
        config.connect_retry.base_delay = Duration::from_secs(60);
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));

        assert!(ClientConfig::default().validate().is_ok());
    }

    #[test]
    fn test_shutdown_policy_parsing() {
        assert_eq!("drain".parse::<ShutdownPolicy>().unwrap(), ShutdownPolicy::Drain);
        assert_eq!("DISCARD".parse::<ShutdownPolicy>().unwrap(), ShutdownPolicy::Discard);
        assert!("keep".parse::<ShutdownPolicy>().is_err());
    }

    // Env vars are process-wide, so everything env related lives in one test
    #[test]
    fn test_from_env_overrides() {
        env::set_var("MANAGED_STORE_MAX_RETRIES", "7");
        env::set_var("MANAGED_STORE_QUEUE_CAPACITY", "42");
        env::set_var("MANAGED_STORE_HEALTH_CHECK_INTERVAL_MS", "1200");
        env::set_var("MANAGED_STORE_SHUTDOWN_POLICY", "discard");

        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.retry.max_retries, 7);
        assert_eq!(config.queue_capacity, 42);
        assert_eq!(config.health_check_interval, Duration::from_millis(1200));
        assert_eq!(config.shutdown_policy, ShutdownPolicy::Discard);

        env::set_var("MANAGED_STORE_QUEUE_CAPACITY", "lots");
        assert!(matches!(ClientConfig::from_env(), Err(ClientError::Config(_))));

        for name in [
            "MANAGED_STORE_MAX_RETRIES",
            "MANAGED_STORE_QUEUE_CAPACITY",
            "MANAGED_STORE_HEALTH_CHECK_INTERVAL_MS",
            "MANAGED_STORE_SHUTDOWN_POLICY",
        ] {
            env::remove_var(name);
        }
    }
}
