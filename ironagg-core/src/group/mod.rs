// ironagg-core/src/group/mod.rs
// $group stage: spec parsing, planning, per-group state and execution

mod coordinator;
mod plan;
mod spec;
mod state;

pub use coordinator::{AccumulatorExplain, GroupCoordinator, GroupExplain};
pub(crate) use coordinator::build_document;
pub use plan::{GroupPlan, SelectorClass, Slot};
pub use spec::{validate_n, AccumulatorOp, AccumulatorSpec, GroupSpec, SelectSpec};
pub use state::{Cell, GroupState};
