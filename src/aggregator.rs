use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::decoder::decode;
use crate::models::{FetchResult, RunningJob, Scope};
use crate::store::QueueReader;

/// Limits applied to one fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
  pub max_jobs: usize,
  pub long_running_threshold_seconds: i64,
}

/// Reads and decodes every requested queue and merges the result.
#[derive(Clone)]
pub struct Aggregator {
  reader: Arc<dyn QueueReader>,
}

impl Aggregator {
  pub fn new(reader: Arc<dyn QueueReader>) -> Self {
    Self { reader }
  }

  pub async fn fetch(&self, scope: &Scope, queues: &[String], limits: FetchLimits, now: i64) -> FetchResult {
    let reads = queues.iter().map(|queue| async move {
      (queue, self.reader.read(queue, limits.max_jobs).await)
    });

    let mut jobs: Vec<RunningJob> = Vec::new();
    let mut warnings = Vec::new();
    for (queue, read) in join_all(reads).await {
      match read {
        Ok(markers) => {
          let before = jobs.len();
          jobs.extend(markers.iter().filter_map(|raw| decode(raw, queue, scope, now)));
          debug!(queue = %queue, markers = markers.len(), running = jobs.len() - before, "Queue scanned");
        }
        Err(e) => {
          warn!(queue = %queue, error = %e, "Queue fetch failed");
          warnings.push(format!("Failed to fetch jobs from queue: {}", queue));
        }
      }
    }

    // Stable, so equal durations keep queue order then marker order.
    jobs.sort_by(|a, b| b.running_for_seconds.cmp(&a.running_for_seconds));

    let threshold = limits.long_running_threshold_seconds;
    let long_running = jobs.iter().filter(|job| job.running_for_seconds > threshold).count();
    if long_running > 0 {
      warnings.push(format!(
        "{} job(s) running over {} minutes",
        long_running,
        threshold_minutes(threshold)
      ));
    }

    let total_count = jobs.len();
    jobs.truncate(limits.max_jobs);

    FetchResult { jobs, warnings, total_count }
  }
}

/// Whole minutes print without a fraction, `90` seconds prints `1.5`.
fn threshold_minutes(seconds: i64) -> String {
  if seconds % 60 == 0 {
    (seconds / 60).to_string()
  } else {
    format!("{}", seconds as f64 / 60.0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  use async_trait::async_trait;
  use serde_json::json;

  use crate::error::{InflightError, Result};
  use crate::models::RawMarker;

  const NOW: i64 = 1_000_000;

  struct FakeReader {
    queues: HashMap<String, Vec<RawMarker>>,
    failing: Vec<String>,
  }

  #[async_trait]
  impl QueueReader for FakeReader {
    async fn read(&self, queue: &str, max_count: usize) -> Result<Vec<RawMarker>> {
      if self.failing.iter().any(|q| q == queue) {
        return Err(InflightError::StoreTimeout(queue.to_string()));
      }
      let mut markers = self.queues.get(queue).cloned().unwrap_or_default();
      markers.truncate(max_count);
      Ok(markers)
    }
  }

  fn marker(id: &str, server: &str, age: i64) -> RawMarker {
    let payload = json!({
      "uuid": id,
      "displayName": "Job",
      "tags": [format!("server:{}", server)],
      "data": {"command": "x"}
    });
    RawMarker::new(serde_json::to_vec(&payload).unwrap(), (NOW - age) as f64)
  }

  fn aggregator(queues: Vec<(&str, Vec<RawMarker>)>, failing: &[&str]) -> Aggregator {
    Aggregator::new(Arc::new(FakeReader {
      queues: queues.into_iter().map(|(q, m)| (q.to_string(), m)).collect(),
      failing: failing.iter().map(|q| q.to_string()).collect(),
    }))
  }

  fn names(queues: &[&str]) -> Vec<String> {
    queues.iter().map(|q| q.to_string()).collect()
  }

  fn limits(max_jobs: usize) -> FetchLimits {
    FetchLimits { max_jobs, long_running_threshold_seconds: 300 }
  }

  #[tokio::test]
  async fn merges_and_sorts_longest_first_for_any_queue_order() {
    let agg = aggregator(
      vec![
        ("a", vec![marker("a1", "w1", 10), marker("a2", "w1", 90)]),
        ("b", vec![marker("b1", "w2", 50)]),
      ],
      &[],
    );

    for order in [["a", "b"], ["b", "a"]] {
      let result = agg.fetch(&Scope::All, &names(&order), limits(100), NOW).await;
      let ids: Vec<&str> = result.jobs.iter().map(|j| j.job_id.as_str()).collect();
      assert_eq!(ids, vec!["a2", "b1", "a1"]);
    }
  }

  #[tokio::test]
  async fn ties_keep_queue_then_marker_order() {
    let agg = aggregator(
      vec![
        ("a", vec![marker("a1", "w1", 20), marker("a2", "w1", 20)]),
        ("b", vec![marker("b1", "w1", 20)]),
      ],
      &[],
    );
    let result = agg.fetch(&Scope::All, &names(&["b", "a"]), limits(100), NOW).await;
    let ids: Vec<&str> = result.jobs.iter().map(|j| j.job_id.as_str()).collect();
    assert_eq!(ids, vec!["b1", "a1", "a2"]);
  }

  #[tokio::test]
  async fn total_count_reports_size_before_cap() {
    let agg = aggregator(
      vec![
        ("a", vec![marker("a1", "w1", 1), marker("a2", "w1", 2)]),
        ("b", vec![marker("b1", "w1", 3), marker("b2", "w1", 4)]),
      ],
      &[],
    );
    let result = agg.fetch(&Scope::All, &names(&["a", "b"]), limits(3), NOW).await;
    assert_eq!(result.jobs.len(), 3);
    assert_eq!(result.total_count, 4);
    assert_eq!(result.jobs[0].job_id, "b2");
  }

  #[tokio::test]
  async fn failed_queue_becomes_warning_without_aborting_others() {
    let agg = aggregator(vec![("a", vec![marker("a1", "w1", 5)])], &["broken"]);
    let result = agg.fetch(&Scope::All, &names(&["broken", "a", "missing"]), limits(100), NOW).await;

    assert_eq!(result.total_count, 1);
    assert_eq!(result.warnings, vec!["Failed to fetch jobs from queue: broken"]);
  }

  #[tokio::test]
  async fn malformed_marker_adds_nothing() {
    let agg = aggregator(vec![("a", vec![RawMarker::new(b"nope".to_vec(), 1.0)])], &[]);
    let result = agg.fetch(&Scope::All, &names(&["a"]), limits(100), NOW).await;
    assert_eq!(result, FetchResult::default());
  }

  #[tokio::test]
  async fn long_running_jobs_produce_one_summary_warning() {
    let agg = aggregator(
      vec![("a", vec![marker("a1", "w1", 301), marker("a2", "w1", 400), marker("a3", "w1", 300)])],
      &[],
    );
    let result = agg.fetch(&Scope::All, &names(&["a"]), limits(100), NOW).await;
    assert_eq!(result.warnings, vec!["2 job(s) running over 5 minutes"]);
  }

  #[tokio::test]
  async fn scope_filters_other_servers() {
    let agg = aggregator(vec![("a", vec![marker("a1", "w1", 5), marker("a2", "w2", 6)])], &[]);
    let result = agg.fetch(&Scope::Server("w1".into()), &names(&["a"]), limits(100), NOW).await;
    assert_eq!(result.total_count, 1);
    assert_eq!(result.jobs[0].server, "w1");
  }

  #[test]
  fn no_queues_yield_an_empty_result() {
    let agg = aggregator(vec![], &[]);
    let result = tokio_test::block_on(agg.fetch(&Scope::All, &[], limits(10), NOW));
    assert_eq!(result, FetchResult::default());
  }

  #[test]
  fn fractional_threshold_minutes() {
    assert_eq!(threshold_minutes(300), "5");
    assert_eq!(threshold_minutes(90), "1.5");
  }
}
