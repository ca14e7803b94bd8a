use std::convert::Infallible;
use std::sync::Arc;

use tokio_stream::{wrappers::IntervalStream, StreamExt};
use warp::Filter;

use super::running_jobs::{Listing, ListQuery};
use super::with_manager;
use crate::manager::RunningJobs;

/// Pushes a fresh listing every `stream_interval`, taking the same query
/// parameters as the list endpoint.
pub fn stream_route(manager: Arc<RunningJobs>) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
  warp::path!("running-jobs" / "stream")
    .and(warp::get())
    .and(warp::query::<ListQuery>())
    .and(with_manager(manager))
    .and_then(handle_stream)
}

async fn handle_stream(query: ListQuery, manager: Arc<RunningJobs>) -> Result<impl warp::Reply, warp::Rejection> {
  let listing = Arc::new(Listing::resolve(&manager, &query)?);
  let period = manager.config().stream_interval;

  let interval = IntervalStream::new(tokio::time::interval(period));
  let stream = interval.then(move |_| {
    let manager = manager.clone();
    let listing = listing.clone();
    async move {
      let result = listing.fetch(&manager).await;
      let event = warp::sse::Event::default()
        .event("running-jobs")
        .data(listing.body(result).to_string());
      Ok::<_, Infallible>(event)
    }
  });

  Ok(warp::sse::reply(warp::sse::keep_alive().stream(stream)))
}
