// ironagg-core/src/sharded.rs
// Simulated sharded execution: isolated per-shard coordinators on scoped
// threads, merged on the calling thread

use crate::error::{IronAggError, Result};
use crate::group::{GroupCoordinator, GroupSpec};
use crate::merge::MergeCoordinator;
use crate::options::GroupOptions;
use crate::value::Document;
use crate::{log_error, log_info};

/// Run `$group` over each shard independently, then merge the partials
///
/// Every shard gets its own coordinator (and spill state); only partial
/// documents cross the shard boundary. The result equals a single-node run
/// over the shards concatenated in order.
pub fn run_sharded(
    spec: &GroupSpec,
    options: &GroupOptions,
    shards: Vec<Vec<Document>>,
) -> Result<Vec<Document>> {
    let shard_count = shards.len();

    let partials: Vec<Result<Vec<Document>>> = crossbeam::thread::scope(|scope| {
        let handles: Vec<_> = shards
            .into_iter()
            .map(|docs| {
                scope.spawn(move |_| -> Result<Vec<Document>> {
                    let mut coordinator = GroupCoordinator::new(spec, options.clone())?;
                    coordinator.consume_all(docs)?;
                    coordinator.finish_partials()
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| {
                handle.join().unwrap_or_else(|_| {
                    log_error!("shard worker panicked");
                    Err(IronAggError::AggregationError(
                        "shard worker panicked".to_string(),
                    ))
                })
            })
            .collect()
    })
    .map_err(|_| IronAggError::AggregationError("shard worker panicked".to_string()))?;

    let mut merger = MergeCoordinator::new(spec)?;
    for shard in partials {
        merger.consume_shard(&shard?)?;
    }

    let results = merger.finish();
    log_info!(
        "Merged {} shards into {} groups",
        shard_count,
        results.len()
    );
    Ok(results)
}
