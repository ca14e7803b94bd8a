#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use inflight::cache::MemoryCacheStore;
use inflight::config::Config;
use inflight::identity::{IdentityResolver, Topology};
use inflight::store::QueueReader;
use inflight::{InflightError, RawMarker, Result, RunningJobs};

/// Reserved sets held in memory; queues listed in `failing` error on read.
#[derive(Default)]
pub struct FakeQueues {
  queues: Mutex<HashMap<String, Vec<RawMarker>>>,
  failing: Mutex<HashSet<String>>,
}

impl FakeQueues {
  pub fn push(&self, queue: &str, marker: RawMarker) {
    let mut queues = self.queues.lock().unwrap();
    let markers = queues.entry(queue.to_string()).or_default();
    markers.push(marker);
    markers.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
  }

  pub fn clear(&self, queue: &str) {
    self.queues.lock().unwrap().remove(queue);
  }

  pub fn fail(&self, queue: &str) {
    self.failing.lock().unwrap().insert(queue.to_string());
  }
}

#[async_trait]
impl QueueReader for FakeQueues {
  async fn read(&self, queue: &str, max_count: usize) -> Result<Vec<RawMarker>> {
    if self.failing.lock().unwrap().contains(queue) {
      return Err(InflightError::StoreTimeout(queue.to_string()));
    }
    let queues = self.queues.lock().unwrap();
    Ok(queues
      .get(queue)
      .map(|markers| markers.iter().take(max_count).cloned().collect())
      .unwrap_or_default())
  }
}

pub fn now() -> i64 {
  Utc::now().timestamp()
}

/// A reserved marker tagged with `server`, reserved `age` seconds ago.
pub fn tagged(id: &str, kind: &str, server: &str, age: i64) -> RawMarker {
  marker(json!({
    "uuid": id,
    "displayName": kind,
    "attempts": 1,
    "tags": [format!("server:{}", server), format!("type:{}", kind)],
    "data": {"command": "opaque"}
  }), age)
}

pub fn marker(payload: Value, age: i64) -> RawMarker {
  RawMarker::new(serde_json::to_vec(&payload).unwrap(), (now() - age) as f64)
}

pub fn config() -> Config {
  Config {
    queues: Some(vec!["default".to_string()]),
    ..Config::default()
  }
}

pub fn manager(config: Config, queues: Arc<FakeQueues>) -> RunningJobs {
  manager_with_topology(config, queues, Topology::default())
}

pub fn manager_with_topology(config: Config, queues: Arc<FakeQueues>, topology: Topology) -> RunningJobs {
  let resolver = IdentityResolver::with_hostname(config.server_identifier.clone(), config.environment.clone(), topology, "worker-1");
  RunningJobs::new(config, resolver, queues, Arc::new(MemoryCacheStore::new()))
}

pub fn ttl(secs: u64) -> Duration {
  Duration::from_secs(secs)
}
