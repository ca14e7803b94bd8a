use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisResult, Value};
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;
use tracing::info;

use crate::error::{InflightError, Result};
use crate::models::RawMarker;

static MAX_RETRIES: usize = 5;
static DELAY: u64 = 100;

/// Read access to the per-queue reserved sets.
#[async_trait]
pub trait QueueReader: Send + Sync {
  /// Up to `max_count` markers of `queue`, oldest reservation first. A queue
  /// without a reserved set reads as empty.
  async fn read(&self, queue: &str, max_count: usize) -> Result<Vec<RawMarker>>;
}

pub fn reserved_key(prefix: &str, queue: &str) -> String {
  format!("{}queues:{}:reserved", prefix, queue)
}

pub async fn connect(redis_url: &str) -> Result<MultiplexedConnection> {
  let client = Client::open(redis_url)?;
  let conn = Retry::spawn(ExponentialBackoff::from_millis(DELAY).take(MAX_RETRIES), || {
    client.get_multiplexed_async_connection()
  })
    .await?;
  info!("Redis connection established");
  Ok(conn)
}

#[derive(Clone)]
pub struct RedisQueueReader {
  conn: MultiplexedConnection,
  key_prefix: String,
  timeout: Duration,
}

impl RedisQueueReader {
  pub fn new(conn: MultiplexedConnection, key_prefix: impl Into<String>, timeout: Duration) -> Self {
    Self { conn, key_prefix: key_prefix.into(), timeout }
  }
}

#[async_trait]
impl QueueReader for RedisQueueReader {
  async fn read(&self, queue: &str, max_count: usize) -> Result<Vec<RawMarker>> {
    let Some(stop) = stop_index(max_count) else {
      return Ok(Vec::new());
    };

    let key = reserved_key(&self.key_prefix, queue);
    let mut conn = self.conn.clone();
    let reply: Value = within(self.timeout, queue, conn.zrange_withscores(&key, 0, stop)).await?;
    markers_from_reply(&reply)
  }
}

/// Last `ZRANGE` index covering `max_count` members, `None` for zero.
fn stop_index(max_count: usize) -> Option<isize> {
  let last = max_count.checked_sub(1)?;
  Some(isize::try_from(last).unwrap_or(isize::MAX))
}

async fn within<T, F>(limit: Duration, queue: &str, op: F) -> Result<T>
where
  F: Future<Output = RedisResult<T>>,
{
  match tokio::time::timeout(limit, op).await {
    Ok(reply) => Ok(reply?),
    Err(_) => Err(InflightError::StoreTimeout(queue.to_string())),
  }
}

/// Decodes a `WITHSCORES` reply, either flat member/score pairs or nested
/// pairs with double scores.
pub fn markers_from_reply(reply: &Value) -> Result<Vec<RawMarker>> {
  let entries: Vec<(Vec<u8>, f64)> = redis::from_redis_value(reply)?;
  Ok(entries
    .into_iter()
    .map(|(payload, timestamp)| RawMarker { payload, timestamp })
    .collect())
}
