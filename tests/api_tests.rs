mod common;

use std::sync::Arc;

use serde_json::Value;
use warp::http::StatusCode;

use common::{config, manager, tagged, FakeQueues};
use inflight::config::Config;
use inflight::routes::routes;

fn api(queues: Arc<FakeQueues>) -> impl warp::Filter<Extract = impl warp::Reply, Error = std::convert::Infallible> + Clone {
  api_with(config(), queues)
}

fn api_with(config: Config, queues: Arc<FakeQueues>) -> impl warp::Filter<Extract = impl warp::Reply, Error = std::convert::Infallible> + Clone {
  routes(Arc::new(manager(config, queues)))
}

fn seeded() -> Arc<FakeQueues> {
  let queues = Arc::new(FakeQueues::default());
  queues.push("default", tagged("a", "JobA", "worker-1", 400));
  queues.push("default", tagged("b", "JobB", "worker-2", 20));
  queues.push("emails", tagged("c", "JobC", "worker-2", 10));
  queues
}

fn body(bytes: &[u8]) -> Value {
  serde_json::from_slice(bytes).unwrap()
}

#[tokio::test]
async fn lists_local_jobs_by_default() {
  let res = warp::test::request().method("GET").path("/running-jobs").reply(&api(seeded())).await;
  assert_eq!(res.status(), StatusCode::OK);

  let json = body(res.body());
  assert_eq!(json["success"], true);
  assert_eq!(json["server"], "worker-1");
  assert_eq!(json["queues_monitored"], serde_json::json!(["default"]));
  assert_eq!(json["running_jobs_count"], 1);
  assert_eq!(json["jobs"][0]["job_id"], "a");
  assert_eq!(json["warnings"][0], "1 job(s) running over 5 minutes");
}

#[tokio::test]
async fn lists_every_server_and_queue_when_asked() {
  let res = warp::test::request()
    .method("GET")
    .path("/running-jobs?all=true&queues=default,emails")
    .reply(&api(seeded()))
    .await;

  let json = body(res.body());
  assert_eq!(json["total_count"], 3);
  let ids: Vec<&str> = json["jobs"].as_array().unwrap().iter().map(|j| j["job_id"].as_str().unwrap()).collect();
  assert_eq!(ids, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn filters_by_requested_server() {
  let res = warp::test::request()
    .method("GET")
    .path("/running-jobs?server=worker-2&queues=default,emails")
    .reply(&api(seeded()))
    .await;

  let json = body(res.body());
  assert_eq!(json["server"], "worker-2");
  assert_eq!(json["total_count"], 2);
}

#[tokio::test]
async fn reports_stats() {
  let res = warp::test::request()
    .method("GET")
    .path("/running-jobs/stats?queues=default,emails")
    .reply(&api(seeded()))
    .await;
  assert_eq!(res.status(), StatusCode::OK);

  let json = body(res.body());
  assert_eq!(json["stats"]["total_running"], 3);
  assert_eq!(json["stats"]["by_server"]["worker-2"], 2);
  assert_eq!(json["stats"]["by_queue"]["default"], 2);
  assert_eq!(json["stats"]["longest_running"]["job_kind"], "JobA");
}

#[tokio::test]
async fn rejects_invalid_queue_names() {
  let res = warp::test::request()
    .method("GET")
    .path("/running-jobs?queues=default,bad%20queue")
    .reply(&api(seeded()))
    .await;
  assert_eq!(res.status(), StatusCode::BAD_REQUEST);

  let json = body(res.body());
  assert_eq!(json["success"], false);
  assert_eq!(json["message"], "bad queue");
}

#[tokio::test]
async fn clears_the_cache() {
  let queues = seeded();
  let api = api(queues.clone());

  warp::test::request().method("GET").path("/running-jobs?all=1").reply(&api).await;
  queues.clear("default");

  let res = warp::test::request().method("DELETE").path("/running-jobs/cache").reply(&api).await;
  assert_eq!(body(res.body())["cleared"], 1);

  let res = warp::test::request().method("GET").path("/running-jobs?all=1").reply(&api).await;
  assert_eq!(body(res.body())["total_count"], 0);
}

#[tokio::test]
async fn unknown_path_is_not_found() {
  let res = warp::test::request().method("GET").path("/nope").reply(&api(seeded())).await;
  assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn mounts_under_configured_prefix() {
  let api = api_with(Config { route_prefix: vec!["api".into(), "v1".into()], ..config() }, seeded());

  let res = warp::test::request().method("GET").path("/api/v1/running-jobs?all=1").reply(&api).await;
  assert_eq!(res.status(), StatusCode::OK);
  assert_eq!(body(res.body())["total_count"], 2);

  let res = warp::test::request().method("GET").path("/api/v1/running-jobs/stats").reply(&api).await;
  assert_eq!(body(res.body())["stats"]["total_running"], 2);

  let res = warp::test::request().method("GET").path("/running-jobs").reply(&api).await;
  assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
