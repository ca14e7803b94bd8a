use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::decoder::JobPayload;
use crate::error::Result;

pub const UNKNOWN_SERVER: &str = "unknown";
const SERVER_TAG_PREFIX: &str = "server:";

/// Matches the `supervisor_id` property header inside a length-prefixed
/// serialized command object, capturing the byte length of its string value.
/// Protected and private properties carry a NUL-delimited scope marker.
static SUPERVISOR_PROPERTY: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r#"s:\d+:"(?:\x00[^\x00]*\x00)?supervisor_id";s:(\d+):""#).unwrap()
});

/// Queue list of a supervisor entry, written either as one name or a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum QueueSpec {
  One(String),
  Many(Vec<String>),
}

impl QueueSpec {
  pub fn names(&self) -> Vec<String> {
    match self {
      QueueSpec::One(name) => vec![name.clone()],
      QueueSpec::Many(names) => names.clone(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Supervisor {
  #[serde(default)]
  pub queue: Option<QueueSpec>,
}

/// Worker fleet layout: supervisors keyed by name, flat under `defaults` and
/// per environment under `environments`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Topology {
  #[serde(default)]
  pub defaults: BTreeMap<String, Supervisor>,
  #[serde(default)]
  pub environments: BTreeMap<String, BTreeMap<String, Supervisor>>,
}

impl Topology {
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
  }

  /// Finds the supervisor named `name`: current environment first, then the
  /// flat defaults, then every other environment.
  pub fn find_supervisor(&self, environment: &str, name: &str) -> Option<(&String, &Supervisor)> {
    self.environments
      .get(environment)
      .and_then(|supervisors| supervisors.get_key_value(name))
      .or_else(|| self.defaults.get_key_value(name))
      .or_else(|| {
        self.environments
          .values()
          .find_map(|supervisors| supervisors.get_key_value(name))
      })
  }

  /// Queue names of every supervisor, defaults before environments, without
  /// duplicates and in first-seen order.
  pub fn all_queues(&self) -> Vec<String> {
    let supervisors = self.defaults
      .values()
      .chain(self.environments.values().flat_map(|env| env.values()));

    let mut queues: Vec<String> = Vec::new();
    for name in supervisors.filter_map(|s| s.queue.as_ref()).flat_map(QueueSpec::names) {
      if !queues.contains(&name) {
        queues.push(name);
      }
    }
    queues
  }
}

/// A single way of reading the owning server off a job record.
pub type IdentityStrategy = fn(&JobPayload) -> Option<String>;

/// Evaluated in order, first match wins.
pub const STRATEGIES: &[IdentityStrategy] = &[server_from_tags, server_from_command];

/// Resolves which server owns `record`, `"unknown"` when no strategy matches.
pub fn identifier_of(record: &JobPayload) -> String {
  STRATEGIES
    .iter()
    .find_map(|strategy| strategy(record))
    .unwrap_or_else(|| UNKNOWN_SERVER.to_string())
}

pub fn server_from_tags(record: &JobPayload) -> Option<String> {
  record.tags
    .iter()
    .find_map(|tag| tag.strip_prefix(SERVER_TAG_PREFIX))
    .map(str::to_string)
}

/// Best-effort read of `supervisor_id` from the embedded command. The command
/// is opaque in general; anything that cannot be read is treated as absent.
pub fn server_from_command(record: &JobPayload) -> Option<String> {
  supervisor_id(&record.data.command)
}

fn supervisor_id(command: &Value) -> Option<String> {
  match command {
    Value::Object(fields) => fields.get("supervisor_id")?.as_str().map(str::to_string),
    Value::String(encoded) => {
      if let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(encoded) {
        return fields.get("supervisor_id")?.as_str().map(str::to_string);
      }
      supervisor_id_from_serialized(encoded)
    }
    _ => None,
  }
}

fn supervisor_id_from_serialized(encoded: &str) -> Option<String> {
  let captures = SUPERVISOR_PROPERTY.captures(encoded)?;
  let len: usize = captures.get(1)?.as_str().parse().ok()?;
  let start = captures.get(0)?.end();
  let value = encoded.get(start..start.checked_add(len)?)?;
  if !encoded[start + len..].starts_with("\";") {
    debug!("Serialized supervisor_id length does not match its value");
    return None;
  }
  Some(value.to_string())
}

/// Host name of this machine, `"unknown"` if it cannot be determined.
pub fn gethostname() -> String {
  hostname_from(|name| std::env::var(name).ok(), sysinfo::System::host_name)
}

/// Exported `HOSTNAME`/`HOST` win over the name the OS reports.
fn hostname_from<E, S>(env: E, system: S) -> String
where
  E: Fn(&str) -> Option<String>,
  S: FnOnce() -> Option<String>,
{
  env("HOSTNAME")
    .or_else(|| env("HOST"))
    .map(|name| name.trim().to_string())
    .filter(|name| !name.is_empty())
    .or_else(system)
    .map(|name| name.trim().to_string())
    .filter(|name| !name.is_empty())
    .unwrap_or_else(|| UNKNOWN_SERVER.to_string())
}

/// Determines the identifier this process reports as.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
  server_identifier: Option<String>,
  environment: String,
  topology: Topology,
  hostname: String,
}

impl IdentityResolver {
  pub fn new(server_identifier: Option<String>, environment: impl Into<String>, topology: Topology) -> Self {
    Self::with_hostname(server_identifier, environment, topology, gethostname())
  }

  pub fn with_hostname(
    server_identifier: Option<String>,
    environment: impl Into<String>,
    topology: Topology,
    hostname: impl Into<String>,
  ) -> Self {
    Self {
      server_identifier,
      environment: environment.into(),
      topology,
      hostname: hostname.into(),
    }
  }

  pub fn topology(&self) -> &Topology {
    &self.topology
  }

  pub fn hostname(&self) -> &str {
    &self.hostname
  }

  /// The explicit override when configured, else the topology entry named
  /// after this host, else the raw host name.
  pub fn local_identifier(&self) -> String {
    if let Some(id) = &self.server_identifier {
      return id.clone();
    }

    match self.topology.find_supervisor(&self.environment, &self.hostname) {
      Some((name, _)) => name.clone(),
      None => self.hostname.clone(),
    }
  }

  /// Queues the local supervisor is configured to work.
  pub fn local_queues(&self) -> Option<Vec<String>> {
    let (_, supervisor) = self.topology.find_supervisor(&self.environment, &self.local_identifier())?;
    supervisor.queue.as_ref().map(QueueSpec::names).filter(|q| !q.is_empty())
  }
}
