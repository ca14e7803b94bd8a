use std::convert::Infallible;
use std::sync::Arc;

use warp::filters::BoxedFilter;
use warp::Filter;

use crate::manager::RunningJobs;

pub mod running_jobs;
pub mod sse;

/// Every endpoint, mounted under the configured route prefix.
pub fn routes(
  manager: Arc<RunningJobs>
) -> impl Filter<Extract = impl warp::Reply, Error = Infallible> + Clone {
  let prefix = mount(&manager.config().route_prefix);
  let api = running_jobs::stats_route(manager.clone())
    .or(running_jobs::clear_cache_route(manager.clone()))
    .or(sse::stream_route(manager.clone()))
    .or(running_jobs::list_route(manager));

  prefix.and(api).recover(running_jobs::handle_rejection)
}

fn mount(segments: &[String]) -> BoxedFilter<()> {
  segments
    .iter()
    .fold(warp::any().boxed(), |prefix, segment| prefix.and(warp::path(segment.clone())).boxed())
}

pub(crate) fn with_manager(
  manager: Arc<RunningJobs>
) -> impl Filter<Extract = (Arc<RunningJobs>,), Error = Infallible> + Clone {
  warp::any().map(move || manager.clone())
}
