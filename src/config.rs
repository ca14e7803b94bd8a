use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{InflightError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
  Memory,
  Redis,
}

impl FromStr for CacheBackend {
  type Err = InflightError;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_ascii_lowercase().as_str() {
      "memory" => Ok(CacheBackend::Memory),
      "redis" => Ok(CacheBackend::Redis),
      other => Err(InflightError::Config(format!("unknown cache backend '{}'", other))),
    }
  }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
  pub enabled: bool,
  pub ttl: Duration,
  pub key_prefix: String,
  pub backend: CacheBackend,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      ttl: Duration::from_secs(10),
      key_prefix: "running_jobs".into(),
      backend: CacheBackend::Memory,
    }
  }
}

#[derive(Debug, Clone)]
pub struct Config {
  pub redis_url: String,
  pub redis_prefix: String,
  pub redis_timeout: Duration,
  pub server_port: u16,
  /// `None` auto-detects from the cluster topology.
  pub queues: Option<Vec<String>>,
  pub max_jobs: usize,
  pub long_running_threshold_seconds: i64,
  pub cache: CacheConfig,
  pub server_identifier: Option<String>,
  /// When false every query covers all servers.
  pub distributed: bool,
  pub environment: String,
  pub topology_path: Option<String>,
  pub stream_interval: Duration,
  /// Path segments the HTTP routes are mounted under, empty for the root.
  pub route_prefix: Vec<String>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      redis_url: "redis://127.0.0.1:6379".into(),
      redis_prefix: String::new(),
      redis_timeout: Duration::from_secs(2),
      server_port: 8080,
      queues: None,
      max_jobs: 1000,
      long_running_threshold_seconds: 300,
      cache: CacheConfig::default(),
      server_identifier: None,
      distributed: true,
      environment: "production".into(),
      topology_path: None,
      stream_interval: Duration::from_secs(5),
      route_prefix: Vec::new(),
    }
  }
}

impl Config {
  pub fn from_env() -> Result<Self> {
    Self::from_lookup(|name| env::var(name).ok())
  }

  /// Builds the config from any variable source, unset variables keep their
  /// defaults.
  pub fn from_lookup<F>(lookup: F) -> Result<Self>
  where
    F: Fn(&str) -> Option<String>,
  {
    let defaults = Self::default();
    let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    let stream_interval = parse_or(var("INFLIGHT_STREAM_INTERVAL"), "INFLIGHT_STREAM_INTERVAL")?
      .map(Duration::from_secs)
      .unwrap_or(defaults.stream_interval);
    if stream_interval.is_zero() {
      return Err(InflightError::Config("INFLIGHT_STREAM_INTERVAL must be at least 1 second".into()));
    }

    Ok(Self {
      redis_url: var("REDIS_URL").unwrap_or(defaults.redis_url),
      redis_prefix: var("INFLIGHT_REDIS_PREFIX").unwrap_or(defaults.redis_prefix),
      redis_timeout: parse_or(var("INFLIGHT_REDIS_TIMEOUT_MS"), "INFLIGHT_REDIS_TIMEOUT_MS")?
        .map(Duration::from_millis)
        .unwrap_or(defaults.redis_timeout),
      server_port: parse_or(var("SERVER_PORT"), "SERVER_PORT")?.unwrap_or(defaults.server_port),
      queues: var("INFLIGHT_QUEUES").map(|raw| split_queues(&raw)).filter(|q| !q.is_empty()),
      max_jobs: parse_or(var("INFLIGHT_MAX_JOBS"), "INFLIGHT_MAX_JOBS")?.unwrap_or(defaults.max_jobs),
      long_running_threshold_seconds: parse_or(var("INFLIGHT_LONG_RUNNING_THRESHOLD"), "INFLIGHT_LONG_RUNNING_THRESHOLD")?
        .unwrap_or(defaults.long_running_threshold_seconds),
      cache: CacheConfig {
        enabled: parse_bool(var("INFLIGHT_CACHE_ENABLED"), "INFLIGHT_CACHE_ENABLED")?
          .unwrap_or(defaults.cache.enabled),
        ttl: parse_or(var("INFLIGHT_CACHE_TTL"), "INFLIGHT_CACHE_TTL")?
          .map(Duration::from_secs)
          .unwrap_or(defaults.cache.ttl),
        key_prefix: var("INFLIGHT_CACHE_PREFIX").unwrap_or(defaults.cache.key_prefix),
        backend: var("INFLIGHT_CACHE_BACKEND")
          .map(|raw| raw.parse())
          .transpose()?
          .unwrap_or(defaults.cache.backend),
      },
      server_identifier: var("INFLIGHT_SERVER_IDENTIFIER"),
      distributed: parse_bool(var("INFLIGHT_DISTRIBUTED"), "INFLIGHT_DISTRIBUTED")?.unwrap_or(defaults.distributed),
      environment: var("INFLIGHT_ENVIRONMENT").unwrap_or(defaults.environment),
      topology_path: var("INFLIGHT_TOPOLOGY_PATH"),
      stream_interval,
      route_prefix: var("INFLIGHT_ROUTE_PREFIX")
        .map(|raw| split_route_prefix(&raw))
        .unwrap_or(defaults.route_prefix),
    })
  }
}

pub fn split_queues(raw: &str) -> Vec<String> {
  raw.split(',')
    .map(str::trim)
    .filter(|q| !q.is_empty())
    .map(str::to_string)
    .collect()
}

/// `/api/v1/` becomes `["api", "v1"]`.
pub fn split_route_prefix(raw: &str) -> Vec<String> {
  raw.split('/')
    .map(str::trim)
    .filter(|segment| !segment.is_empty())
    .map(str::to_string)
    .collect()
}

fn parse_or<T: FromStr>(value: Option<String>, name: &str) -> Result<Option<T>> {
  value
    .map(|raw| raw.parse().map_err(|_| InflightError::Config(format!("{} is not valid: '{}'", name, raw))))
    .transpose()
}

fn parse_bool(value: Option<String>, name: &str) -> Result<Option<bool>> {
  value
    .map(|raw| match raw.to_ascii_lowercase().as_str() {
      "1" | "true" | "yes" | "on" => Ok(true),
      "0" | "false" | "no" | "off" => Ok(false),
      _ => Err(InflightError::Config(format!("{} is not a boolean: '{}'", name, raw))),
    })
    .transpose()
}
