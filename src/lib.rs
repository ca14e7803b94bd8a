pub mod aggregator;
pub mod cache;
pub mod config;
pub mod decoder;
pub mod duration;
pub mod error;
pub mod identity;
pub mod manager;
pub mod models;
pub mod routes;
pub mod stats;
pub mod store;

pub use error::{InflightError, Result};
pub use manager::RunningJobs;
pub use models::{FetchResult, RawMarker, RunningJob, Scope, StatsResult};
