use anyhow::Context;
use chrono::{Local, TimeZone};
use clap::Parser;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use inflight::{config::Config, RunningJob, RunningJobs, StatsResult};

#[derive(Parser, Debug)]
#[command(name = "inflight")]
#[command(version)]
#[command(about = "List jobs currently running on the worker fleet")]
struct Args {
  /// Queue to inspect, repeatable (default: configured or detected queues)
  #[arg(long = "queue")]
  queues: Vec<String>,

  /// Maximum jobs to display
  #[arg(long, default_value_t = 100)]
  limit: usize,

  /// Show jobs from all servers
  #[arg(long)]
  all: bool,

  /// Output as JSON
  #[arg(long)]
  json: bool,

  /// Show statistics instead of the job list
  #[arg(long)]
  stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let config = Config::from_env().context("Failed to read configuration")?;
  let limit = args.limit.min(config.max_jobs);
  let manager = RunningJobs::connect(config)
    .await
    .context("Failed to connect to the job store")?;

  let distributed = manager.is_distributed();
  let show_all = args.all || !distributed;
  let queues = if args.queues.is_empty() { manager.default_queues() } else { args.queues.clone() };

  if args.stats {
    let stats = manager.stats(Some(queues)).await;
    if args.json {
      println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
      print_stats(&stats);
    }
    return Ok(());
  }

  let host = manager.local_identifier();
  let result = manager.running_jobs(None, show_all, Some(queues.clone())).await;

  if args.json {
    let jobs: Vec<&RunningJob> = result.jobs.iter().take(limit).collect();
    let output = json!({
      "server": host,
      "distributed": distributed,
      "show_all": show_all,
      "queues": queues,
      "running_jobs_count": result.jobs.len(),
      "total_count": result.total_count,
      "jobs": jobs,
      "warnings": result.warnings,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    return Ok(());
  }

  println!("Scanning queues: {}", queues.join(", "));
  if distributed {
    println!("Current server: {}", host);
    if show_all {
      println!("Showing jobs from ALL servers");
    }
  }
  println!();

  if result.jobs.is_empty() {
    if distributed && !show_all {
      println!("No jobs currently running on {}", host);
    } else {
      println!("No jobs currently running");
    }
    return Ok(());
  }

  let mut jobs = result.jobs.clone();
  jobs.sort_by_key(|job| job.start_timestamp);
  print_table(&jobs[..limit.min(jobs.len())]);

  println!();
  println!("Found {} running job(s)", result.total_count);
  for warning in &result.warnings {
    eprintln!("Warning: {}", warning);
  }
  Ok(())
}

fn print_table(jobs: &[RunningJob]) {
  println!(
    "{:<11} {:<35} {:<15} {:<20} {:<8} {:<10} {}",
    "ID", "JOB", "QUEUE", "SERVER", "STARTED", "DURATION", "ATTEMPTS"
  );
  println!("{}", "-".repeat(112));
  for job in jobs {
    println!(
      "{:<11} {:<35} {:<15} {:<20} {:<8} {:<10} {}",
      short_id(&job.job_id),
      truncate(&job.job_kind, 35),
      job.queue,
      truncate(&job.server, 20),
      started_at(job.start_timestamp),
      job.running_for_formatted,
      job.attempts
    );
  }
}

fn print_stats(stats: &StatsResult) {
  println!("Running Jobs Statistics");
  println!();
  println!("Total Running: {}", stats.total_running);
  println!();

  for (title, counts) in [
    ("By Server", &stats.by_server),
    ("By Queue", &stats.by_queue),
    ("By Job", &stats.by_job_kind),
  ] {
    if counts.is_empty() {
      continue;
    }
    let mut rows: Vec<_> = counts.iter().collect();
    rows.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    println!("{}:", title);
    for (name, count) in rows {
      println!("  - {}: {}", name, count);
    }
    println!();
  }

  if let Some(longest) = &stats.longest_running {
    println!("Longest Running:");
    println!("  - {} on {}", longest.job_kind, longest.server);
    println!("  - Duration: {}", longest.running_for_formatted);
  }

  for warning in &stats.warnings {
    eprintln!("Warning: {}", warning);
  }
}

fn short_id(id: &str) -> String {
  format!("{}...", id.chars().take(8).collect::<String>())
}

fn truncate(text: &str, max: usize) -> String {
  if text.chars().count() > max {
    format!("{}...", text.chars().take(max - 3).collect::<String>())
  } else {
    text.to_string()
  }
}

fn started_at(timestamp: i64) -> String {
  Local
    .timestamp_opt(timestamp, 0)
    .single()
    .map(|t| t.format("%H:%M:%S").to_string())
    .unwrap_or_else(|| "-".into())
}
