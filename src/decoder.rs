use chrono::DateTime;
use serde::Deserialize;
use serde_json::Value;

use crate::duration::format_duration;
use crate::identity::{identifier_of, UNKNOWN_SERVER};
use crate::models::{RawMarker, RunningJob, Scope};

/// The JSON document stored as a reserved-set member.
#[derive(Debug, Clone, Deserialize)]
pub struct JobPayload {
  #[serde(default)]
  pub uuid: Option<String>,
  #[serde(default, rename = "displayName")]
  pub display_name: Option<String>,
  #[serde(default)]
  pub attempts: Option<u32>,
  #[serde(default)]
  pub timeout: Option<i64>,
  #[serde(default, deserialize_with = "null_as_empty")]
  pub tags: Vec<String>,
  pub data: JobData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobData {
  /// Serialized command object; opaque apart from a best-effort identity read.
  #[serde(default)]
  pub command: Value,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

pub fn parse_payload(bytes: &[u8]) -> Option<JobPayload> {
  let payload: JobPayload = serde_json::from_slice(bytes).ok()?;
  if payload.data.command.is_null() {
    return None;
  }
  Some(payload)
}

/// Turns one reserved marker into a `RunningJob`, or `None` when the marker is
/// malformed, owned by another server in `scope`, or past its own timeout.
pub fn decode(raw: &RawMarker, queue: &str, scope: &Scope, now: i64) -> Option<RunningJob> {
  let payload = parse_payload(&raw.payload)?;
  let server = identifier_of(&payload);

  if let Scope::Server(wanted) = scope {
    if server != *wanted && server != UNKNOWN_SERVER {
      return None;
    }
  }

  if let Some(timeout) = payload.timeout {
    if now as f64 > raw.timestamp + timeout as f64 {
      return None;
    }
  }

  let start_timestamp = raw.timestamp.floor() as i64;
  let running_for_seconds = (now - start_timestamp).max(0);
  let start_time = DateTime::from_timestamp(start_timestamp, 0)
    .map(|t| t.to_rfc3339())
    .unwrap_or_default();

  Some(RunningJob {
    job_id: payload.uuid.unwrap_or_else(|| "unknown".to_string()),
    job_kind: payload.display_name.unwrap_or_else(|| "Unknown".to_string()),
    queue: queue.to_string(),
    server,
    start_time,
    start_timestamp,
    running_for_seconds,
    running_for_formatted: format_duration(running_for_seconds),
    attempts: payload.attempts.unwrap_or(0),
    timeout_seconds: payload.timeout,
    tags: payload.tags,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn marker(payload: Value, timestamp: f64) -> RawMarker {
    RawMarker::new(serde_json::to_vec(&payload).unwrap(), timestamp)
  }

  fn job(tags: Value, timeout: Value) -> Value {
    json!({
      "uuid": "6f1c2c1e-1111",
      "displayName": "App\\Jobs\\SendInvoice",
      "attempts": 2,
      "timeout": timeout,
      "tags": tags,
      "data": {"command": {"supervisor_id": "worker-1"}}
    })
  }

  #[test]
  fn decodes_a_complete_marker() {
    let raw = marker(job(json!(["server:worker-1"]), json!(120)), 1_700_000_000.7);
    let job = decode(&raw, "emails", &Scope::All, 1_700_000_060).unwrap();

    assert_eq!(job.job_id, "6f1c2c1e-1111");
    assert_eq!(job.job_kind, "App\\Jobs\\SendInvoice");
    assert_eq!(job.queue, "emails");
    assert_eq!(job.server, "worker-1");
    assert_eq!(job.start_timestamp, 1_700_000_000);
    assert_eq!(job.running_for_seconds, 60);
    assert_eq!(job.running_for_formatted, "1m 0s");
    assert_eq!(job.start_time, "2023-11-14T22:13:20+00:00");
    assert_eq!(job.attempts, 2);
    assert_eq!(job.timeout_seconds, Some(120));
    assert_eq!(job.tags, vec!["server:worker-1"]);
  }

  #[test]
  fn missing_fields_take_defaults() {
    let raw = marker(json!({"data": {"command": "opaque"}}), 100.0);
    let job = decode(&raw, "default", &Scope::All, 130).unwrap();

    assert_eq!(job.job_id, "unknown");
    assert_eq!(job.job_kind, "Unknown");
    assert_eq!(job.server, "unknown");
    assert_eq!(job.attempts, 0);
    assert_eq!(job.timeout_seconds, None);
    assert!(job.tags.is_empty());
  }

  #[test]
  fn clock_skew_clamps_to_zero() {
    let raw = marker(json!({"data": {"command": "x"}}), 105.0);
    let job = decode(&raw, "default", &Scope::All, 100).unwrap();
    assert_eq!(job.running_for_seconds, 0);
  }

  #[test]
  fn timed_out_marker_is_excluded() {
    let now = 10_000;
    let raw = marker(job(json!([]), json!(30)), (now - 31) as f64);
    assert!(decode(&raw, "default", &Scope::All, now).is_none());

    let raw = marker(job(json!([]), json!(30)), (now - 30) as f64);
    assert!(decode(&raw, "default", &Scope::All, now).is_some());
  }

  #[test]
  fn malformed_payloads_are_rejected() {
    let no_command = marker(json!({"uuid": "a", "data": {}}), 1.0);
    let no_data = marker(json!({"uuid": "a"}), 1.0);
    let null_command = marker(json!({"data": {"command": null}}), 1.0);
    let not_json = RawMarker::new(b"{not json".to_vec(), 1.0);

    for raw in [no_command, no_data, null_command, not_json] {
      assert!(decode(&raw, "default", &Scope::All, 10).is_none());
    }
  }

  #[test]
  fn scope_excludes_other_servers_but_keeps_unknown() {
    let scope = Scope::Server("worker-1".into());
    let other = marker(job(json!(["server:worker-2"]), Value::Null), 1.0);
    let mine = marker(job(json!(["server:worker-1"]), Value::Null), 1.0);
    let unknown = marker(json!({"data": {"command": "opaque"}}), 1.0);

    assert!(decode(&other, "default", &scope, 10).is_none());
    assert!(decode(&mine, "default", &scope, 10).is_some());
    assert_eq!(decode(&unknown, "default", &scope, 10).unwrap().server, "unknown");
  }

  #[test]
  fn null_tags_read_as_empty() {
    let raw = marker(json!({"tags": null, "data": {"command": "x"}}), 1.0);
    assert!(decode(&raw, "default", &Scope::All, 10).unwrap().tags.is_empty());
  }
}
