use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::aggregator::{Aggregator, FetchLimits};
use crate::cache::{CacheStore, MemoryCacheStore, RedisCacheStore, ResultCache};
use crate::config::{CacheBackend, Config};
use crate::error::Result;
use crate::identity::{IdentityResolver, Topology};
use crate::models::{FetchResult, Scope, StatsResult};
use crate::stats::summarize;
use crate::store::{connect, QueueReader, RedisQueueReader};

/// Entry point for callers: resolves scope and queues, then fetches through
/// the cache when it is enabled.
pub struct RunningJobs {
  config: Config,
  resolver: IdentityResolver,
  aggregator: Aggregator,
  cache: Option<ResultCache>,
}

impl RunningJobs {
  pub fn new(
    config: Config,
    resolver: IdentityResolver,
    reader: Arc<dyn QueueReader>,
    cache_store: Arc<dyn CacheStore>,
  ) -> Self {
    let cache = (config.cache.enabled && !config.cache.ttl.is_zero())
      .then(|| ResultCache::new(cache_store, config.cache.key_prefix.clone()));
    Self {
      config,
      resolver,
      aggregator: Aggregator::new(reader),
      cache,
    }
  }

  /// Connects to Redis and loads the cluster topology named in `config`.
  pub async fn connect(config: Config) -> Result<Self> {
    let topology = match &config.topology_path {
      Some(path) => Topology::from_file(path)?,
      None => Topology::default(),
    };
    let resolver = IdentityResolver::new(config.server_identifier.clone(), config.environment.clone(), topology);

    let conn = connect(&config.redis_url).await?;
    let reader = Arc::new(RedisQueueReader::new(conn.clone(), config.redis_prefix.clone(), config.redis_timeout));
    let cache_store: Arc<dyn CacheStore> = match config.cache.backend {
      CacheBackend::Memory => Arc::new(MemoryCacheStore::new()),
      CacheBackend::Redis => Arc::new(RedisCacheStore::new(conn)),
    };

    info!(
      server = %resolver.local_identifier(),
      distributed = config.distributed,
      cache = config.cache.enabled,
      "Running jobs inspector ready"
    );
    Ok(Self::new(config, resolver, reader, cache_store))
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn is_distributed(&self) -> bool {
    self.config.distributed
  }

  pub fn local_identifier(&self) -> String {
    self.resolver.local_identifier()
  }

  /// Configured queues, else the local supervisor's queues, else every queue
  /// in the topology, else `default`.
  pub fn default_queues(&self) -> Vec<String> {
    if let Some(queues) = &self.config.queues {
      return queues.clone();
    }
    if let Some(queues) = self.resolver.local_queues() {
      return queues;
    }
    let all = self.resolver.topology().all_queues();
    if all.is_empty() {
      vec!["default".to_string()]
    } else {
      all
    }
  }

  pub fn scope_for(&self, server: Option<String>, show_all: bool) -> Scope {
    if show_all || !self.config.distributed {
      Scope::All
    } else {
      Scope::Server(server.unwrap_or_else(|| self.local_identifier()))
    }
  }

  fn limits(&self) -> FetchLimits {
    FetchLimits {
      max_jobs: self.config.max_jobs,
      long_running_threshold_seconds: self.config.long_running_threshold_seconds,
    }
  }

  /// Jobs running on `server` (this host when `None`), or on every server
  /// when `show_all` is set.
  pub async fn running_jobs(&self, server: Option<String>, show_all: bool, queues: Option<Vec<String>>) -> FetchResult {
    let scope = self.scope_for(server, show_all);
    let queues = queues.filter(|q| !q.is_empty()).unwrap_or_else(|| self.default_queues());
    self.fetch(&scope, &queues).await
  }

  /// Fetches `queues` for `scope`. A queue named twice is read once.
  pub async fn fetch(&self, scope: &Scope, queues: &[String]) -> FetchResult {
    let queues = distinct(queues);
    let limits = self.limits();
    let fetch = || self.aggregator.fetch(scope, &queues, limits, Utc::now().timestamp());
    match &self.cache {
      Some(cache) => cache.get_or_fetch(scope, &queues, self.config.cache.ttl, fetch).await,
      None => fetch().await,
    }
  }

  /// Fleet-wide statistics, whatever this host's own identity.
  pub async fn stats(&self, queues: Option<Vec<String>>) -> StatsResult {
    summarize(self.running_jobs(None, true, queues).await)
  }

  pub async fn clear_cache(&self) -> usize {
    match &self.cache {
      Some(cache) => cache.clear().await,
      None => 0,
    }
  }
}

/// First occurrence of each name, in request order.
fn distinct(queues: &[String]) -> Vec<String> {
  let mut seen = HashSet::new();
  queues.iter().filter(|q| seen.insert(*q)).cloned().collect()
}
