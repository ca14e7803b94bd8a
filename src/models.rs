use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One entry of a queue's reserved sorted set.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMarker {
  pub payload: Vec<u8>,
  /// Reservation time, seconds since the epoch.
  pub timestamp: f64,
}

impl RawMarker {
  pub fn new(payload: impl Into<Vec<u8>>, timestamp: f64) -> Self {
    Self { payload: payload.into(), timestamp }
  }
}

/// Identity filter applied to a query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
  All,
  Server(String),
}

impl Scope {
  pub fn is_all(&self) -> bool {
    matches!(self, Scope::All)
  }

  /// The server a `Server` scope restricts to, `*` for `All`.
  pub fn filter_value(&self) -> &str {
    match self {
      Scope::All => "*",
      Scope::Server(server) => server,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningJob {
  pub job_id: String,
  pub job_kind: String,
  pub queue: String,
  pub server: String,
  pub start_time: String,
  pub start_timestamp: i64,
  pub running_for_seconds: i64,
  pub running_for_formatted: String,
  pub attempts: u32,
  pub timeout_seconds: Option<i64>,
  pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
  pub jobs: Vec<RunningJob>,
  pub warnings: Vec<String>,
  pub total_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsResult {
  pub total_running: usize,
  pub by_server: HashMap<String, usize>,
  pub by_queue: HashMap<String, usize>,
  pub by_job_kind: HashMap<String, usize>,
  pub longest_running: Option<RunningJob>,
  pub warnings: Vec<String>,
}
