use std::collections::HashMap;

use crate::models::{FetchResult, StatsResult};

/// Reduces a fleet-wide fetch into counts per server, queue and job kind.
pub fn summarize(result: FetchResult) -> StatsResult {
  let mut by_server: HashMap<String, usize> = HashMap::new();
  let mut by_queue: HashMap<String, usize> = HashMap::new();
  let mut by_job_kind: HashMap<String, usize> = HashMap::new();

  for job in &result.jobs {
    *by_server.entry(job.server.clone()).or_default() += 1;
    *by_queue.entry(job.queue.clone()).or_default() += 1;
    *by_job_kind.entry(job.job_kind.clone()).or_default() += 1;
  }

  StatsResult {
    total_running: result.jobs.len(),
    by_server,
    by_queue,
    by_job_kind,
    longest_running: result.jobs.into_iter().next(),
    warnings: result.warnings,
  }
}
