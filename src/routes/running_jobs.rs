use std::convert::Infallible;
use std::sync::{Arc, LazyLock};

use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use warp::http::StatusCode;
use warp::Filter;

use super::with_manager;
use crate::config::split_queues;
use crate::manager::RunningJobs;
use crate::models::FetchResult;

static QUEUE_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[\w.:\-]+$").unwrap());

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
  pub server: Option<String>,
  pub all: Option<String>,
  pub queues: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
  pub queues: Option<String>,
}

#[derive(Debug)]
struct InvalidQueue {
  name: String,
}
impl warp::reject::Reject for InvalidQueue {}

/// Reads a query-string flag the lenient way: `1`, `true`, `yes`, `on`.
pub fn is_truthy(value: Option<&str>) -> bool {
  matches!(
    value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
    Some("1" | "true" | "yes" | "on")
  )
}

/// Splits `a,b,c` and rejects names that cannot be queue names.
pub(crate) fn parse_queues(raw: Option<&str>) -> Result<Option<Vec<String>>, warp::Rejection> {
  let Some(raw) = raw else {
    return Ok(None);
  };
  let queues = split_queues(raw);
  if let Some(bad) = queues.iter().find(|q| !QUEUE_NAME.is_match(q)) {
    return Err(warp::reject::custom(InvalidQueue { name: bad.clone() }));
  }
  Ok(Some(queues).filter(|q| !q.is_empty()))
}

pub(crate) struct Listing {
  pub server: String,
  pub show_all: bool,
  pub queues: Vec<String>,
}

impl Listing {
  pub fn resolve(manager: &RunningJobs, query: &ListQuery) -> Result<Self, warp::Rejection> {
    let queues = parse_queues(query.queues.as_deref())?.unwrap_or_else(|| manager.default_queues());
    Ok(Self {
      server: query.server.clone().unwrap_or_else(|| manager.local_identifier()),
      show_all: is_truthy(query.all.as_deref()),
      queues,
    })
  }

  pub async fn fetch(&self, manager: &RunningJobs) -> FetchResult {
    manager
      .running_jobs(Some(self.server.clone()), self.show_all, Some(self.queues.clone()))
      .await
  }

  pub fn body(&self, result: FetchResult) -> Value {
    json!({
      "success": true,
      "server": self.server,
      "timestamp": Utc::now().to_rfc3339(),
      "queues_monitored": self.queues,
      "running_jobs_count": result.jobs.len(),
      "total_count": result.total_count,
      "jobs": result.jobs,
      "warnings": result.warnings,
    })
  }
}

pub fn list_route(manager: Arc<RunningJobs>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path("running-jobs")
    .and(warp::path::end())
    .and(warp::get())
    .and(warp::query::<ListQuery>())
    .and(with_manager(manager))
    .and_then(handle_list)
}

pub fn stats_route(manager: Arc<RunningJobs>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("running-jobs" / "stats")
    .and(warp::get())
    .and(warp::query::<StatsQuery>())
    .and(with_manager(manager))
    .and_then(handle_stats)
}

pub fn clear_cache_route(manager: Arc<RunningJobs>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("running-jobs" / "cache")
    .and(warp::delete())
    .and(with_manager(manager))
    .and_then(handle_clear_cache)
}

async fn handle_list(query: ListQuery, manager: Arc<RunningJobs>) -> Result<impl warp::Reply, warp::Rejection> {
  let listing = Listing::resolve(&manager, &query)?;
  let result = listing.fetch(&manager).await;
  Ok(warp::reply::json(&listing.body(result)))
}

async fn handle_stats(query: StatsQuery, manager: Arc<RunningJobs>) -> Result<impl warp::Reply, warp::Rejection> {
  let queues = parse_queues(query.queues.as_deref())?;
  let stats = manager.stats(queues).await;
  Ok(warp::reply::json(&json!({
    "success": true,
    "timestamp": Utc::now().to_rfc3339(),
    "stats": stats,
  })))
}

async fn handle_clear_cache(manager: Arc<RunningJobs>) -> Result<impl warp::Reply, warp::Rejection> {
  let cleared = manager.clear_cache().await;
  info!("Cleared {} cached running job result(s)", cleared);
  Ok(warp::reply::json(&json!({"success": true, "cleared": cleared})))
}

pub async fn handle_rejection(err: warp::Rejection) -> Result<impl warp::Reply, Infallible> {
  let (status, error, message) = if let Some(invalid) = err.find::<InvalidQueue>() {
    (StatusCode::BAD_REQUEST, "Invalid queue name", invalid.name.clone())
  } else if err.is_not_found() {
    (StatusCode::NOT_FOUND, "Not found", String::new())
  } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
    (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed", String::new())
  } else if err.find::<warp::reject::InvalidQuery>().is_some() {
    (StatusCode::BAD_REQUEST, "Invalid query", String::new())
  } else {
    warn!("Unhandled rejection: {:?}", err);
    (StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch running jobs", "Internal server error".to_string())
  };

  let body = warp::reply::json(&json!({"success": false, "error": error, "message": message}));
  Ok(warp::reply::with_status(body, status))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn truthy_flags() {
    for yes in ["1", "true", "TRUE", "on", "yes"] {
      assert!(is_truthy(Some(yes)));
    }
    for no in ["0", "false", "", "nope"] {
      assert!(!is_truthy(Some(no)));
    }
    assert!(!is_truthy(None));
  }

  #[test]
  fn queue_names_are_validated() {
    assert_eq!(parse_queues(Some("default,emails")).unwrap(), Some(vec!["default".into(), "emails".into()]));
    assert_eq!(parse_queues(Some(" , ")).unwrap(), None);
    assert_eq!(parse_queues(None).unwrap(), None);
    assert!(parse_queues(Some("default,bad queue")).is_err());
    assert!(parse_queues(Some("a*")).is_err());
  }
}
