// ironagg-core/src/lib.rs
// $group accumulator engine: $top/$bottom/$topN/$bottomN with shared
// sort keys, exact $sum/$avg, spilling and shard partial merging

pub mod decimal;
pub mod error;
pub mod expression;
pub mod group;
pub mod logging;
pub mod merge;
pub mod options;
pub mod selector;
pub mod sharded;
pub mod sort_key;
pub mod spill;
pub mod summation;
pub mod value;
pub mod value_utils;

// Public exports
pub use decimal::Decimal;
pub use error::{IronAggError, Result};
pub use expression::Expression;
pub use group::{GroupCoordinator, GroupExplain, GroupSpec};
pub use logging::{get_log_level, set_log_level, LogLevel};
pub use merge::{merge_avg_partials, merge_sum_partials, merge_top_bottom_partials, MergeCoordinator};
pub use options::GroupOptions;
pub use selector::{BoundedSelector, Sense};
pub use sharded::run_sharded;
pub use sort_key::{SortDirection, SortKey, SortSpec};
pub use summation::{AvgCell, DoubleDoubleSum, NumericWidth, SumCell};
pub use value::{Document, Value};
