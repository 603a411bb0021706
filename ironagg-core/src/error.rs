// ironagg-core/src/error.rs
// Error type shared by every module of the $group engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IronAggError {
    /// Bad user input detected while building an accumulator (e.g. a non-positive `n`)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Malformed `$group` stage specification
    #[error("Aggregation error: {0}")]
    AggregationError(String),

    #[error(
        "Exceeded memory limit for $group ({used} bytes used, limit {limit} bytes), \
         but didn't allow external spilling. Pass allowDiskUse:true to opt in."
    )]
    QueryExceededMemoryLimitNoDiskUseAllowed { used: usize, limit: usize },

    /// Spilling was allowed but the spill storage could not be written or read back
    #[error("Spill failed: {0}")]
    SpillFailed(String),

    #[error("Corrupted spill data: {0}")]
    Corruption(String),

    /// A shard-produced partial result does not have the expected shape
    #[error("Invalid partial result: {0}")]
    InvalidPartial(String),

    /// A document or extended JSON value that cannot be represented
    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, IronAggError>;
