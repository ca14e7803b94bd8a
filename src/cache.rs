use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::{FetchResult, Scope};

/// Backing store for memoized fetch results.
#[async_trait]
pub trait CacheStore: Send + Sync {
  async fn get(&self, key: &str) -> Result<Option<FetchResult>>;
  async fn put(&self, key: &str, value: &FetchResult, ttl: Duration) -> Result<()>;
  async fn forget(&self, key: &str) -> Result<()>;
}

/// Process-local store. Expired entries are dropped on read and swept on
/// every write.
#[derive(Default)]
pub struct MemoryCacheStore {
  entries: Mutex<HashMap<String, (Instant, FetchResult)>>,
}

impl MemoryCacheStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub async fn len(&self) -> usize {
    let now = Instant::now();
    self.entries.lock().await.values().filter(|(expires, _)| *expires > now).count()
  }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
  async fn get(&self, key: &str) -> Result<Option<FetchResult>> {
    let mut entries = self.entries.lock().await;
    match entries.get(key) {
      Some((expires, value)) if *expires > Instant::now() => Ok(Some(value.clone())),
      Some(_) => {
        entries.remove(key);
        Ok(None)
      }
      None => Ok(None),
    }
  }

  async fn put(&self, key: &str, value: &FetchResult, ttl: Duration) -> Result<()> {
    let now = Instant::now();
    let mut entries = self.entries.lock().await;
    entries.retain(|_, (expires, _)| *expires > now);
    entries.insert(key.to_string(), (now + ttl, value.clone()));
    Ok(())
  }

  async fn forget(&self, key: &str) -> Result<()> {
    self.entries.lock().await.remove(key);
    Ok(())
  }
}

/// Shares results between processes through Redis string keys with an expiry.
#[derive(Clone)]
pub struct RedisCacheStore {
  conn: MultiplexedConnection,
}

impl RedisCacheStore {
  pub fn new(conn: MultiplexedConnection) -> Self {
    Self { conn }
  }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
  async fn get(&self, key: &str) -> Result<Option<FetchResult>> {
    let mut conn = self.conn.clone();
    let raw: Option<String> = conn.get(key).await?;
    match raw {
      Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
      None => Ok(None),
    }
  }

  async fn put(&self, key: &str, value: &FetchResult, ttl: Duration) -> Result<()> {
    let mut conn = self.conn.clone();
    let raw = serde_json::to_string(value)?;
    let _: () = conn.set_ex(key, raw, ttl.as_secs().max(1)).await?;
    Ok(())
  }

  async fn forget(&self, key: &str) -> Result<()> {
    let mut conn = self.conn.clone();
    let _: () = conn.del(key).await?;
    Ok(())
  }
}

/// Memoizes fetches per (scope, queue set) for a short TTL.
///
/// Every key written is recorded with its expiry so `clear` can remove
/// exactly those keys; concurrent misses on one key share a single fetch.
pub struct ResultCache {
  store: Arc<dyn CacheStore>,
  prefix: String,
  issued: Mutex<HashMap<String, Instant>>,
  inflight: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ResultCache {
  pub fn new(store: Arc<dyn CacheStore>, prefix: impl Into<String>) -> Self {
    Self {
      store,
      prefix: prefix.into(),
      issued: Mutex::new(HashMap::new()),
      inflight: StdMutex::new(HashMap::new()),
    }
  }

  pub fn key(&self, scope: &Scope, queues: &[String]) -> String {
    let marker = if scope.is_all() { "all" } else { "local" };
    format!("{}:{}:{}:{}", self.prefix, scope.filter_value(), marker, queue_set_hash(queues))
  }

  pub async fn get_or_fetch<F, Fut>(&self, scope: &Scope, queues: &[String], ttl: Duration, fetch: F) -> FetchResult
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = FetchResult>,
  {
    let key = self.key(scope, queues);
    if let Some(hit) = self.lookup(&key).await {
      return hit;
    }

    let gate = Gate::enter(&self.inflight, &key);
    let _turn = gate.lock().await;
    // Whoever held the gate before us may have filled the entry already.
    match self.lookup(&key).await {
      Some(hit) => hit,
      None => {
        let result = fetch().await;
        self.remember(&key, &result, ttl).await;
        result
      }
    }
  }

  /// Removes every entry this cache has written. Returns how many of them
  /// had not yet expired.
  pub async fn clear(&self) -> usize {
    let now = Instant::now();
    let keys: Vec<(String, Instant)> = self.issued.lock().await.drain().collect();
    let mut cleared = 0;
    for (key, expires) in &keys {
      if *expires > now {
        cleared += 1;
      }
      if let Err(e) = self.store.forget(key).await {
        warn!(key = %key, error = %e, "Failed to forget cached result");
      }
    }
    debug!(count = cleared, "Running jobs cache cleared");
    cleared
  }

  async fn lookup(&self, key: &str) -> Option<FetchResult> {
    match self.store.get(key).await {
      Ok(hit) => hit,
      Err(e) => {
        warn!(key = %key, error = %e, "Cache read failed, fetching directly");
        None
      }
    }
  }

  async fn remember(&self, key: &str, value: &FetchResult, ttl: Duration) {
    match self.store.put(key, value, ttl).await {
      Ok(()) => {
        let now = Instant::now();
        let mut issued = self.issued.lock().await;
        issued.retain(|_, expires| *expires > now);
        issued.insert(key.to_string(), now + ttl);
      }
      Err(e) => warn!(key = %key, error = %e, "Cache write failed"),
    }
  }
}

/// Per-key turn for concurrent misses. The map entry goes away with the last
/// holder, including one whose fetch was dropped half way.
struct Gate<'a> {
  inflight: &'a StdMutex<HashMap<String, Arc<Mutex<()>>>>,
  key: &'a str,
  turn: Arc<Mutex<()>>,
}

impl<'a> Gate<'a> {
  fn enter(inflight: &'a StdMutex<HashMap<String, Arc<Mutex<()>>>>, key: &'a str) -> Self {
    let turn = inflight
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .entry(key.to_string())
      .or_default()
      .clone();
    Self { inflight, key, turn }
  }

  async fn lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
    self.turn.lock().await
  }
}

impl Drop for Gate<'_> {
  fn drop(&mut self) {
    let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
    // The map and this gate are the only holders left.
    if Arc::strong_count(&self.turn) <= 2 {
      inflight.remove(self.key);
    }
  }
}

/// Hash of the queue set, independent of order and duplicates. Each name is
/// length-prefixed so no two distinct sets share an input.
pub fn queue_set_hash(queues: &[String]) -> String {
  let mut sorted: Vec<&str> = queues.iter().map(String::as_str).collect();
  sorted.sort_unstable();
  sorted.dedup();
  let mut hasher = blake3::Hasher::new();
  for name in sorted {
    hasher.update(&(name.len() as u64).to_le_bytes());
    hasher.update(name.as_bytes());
  }
  hasher.finalize().to_hex().as_str()[..16].to_string()
}
