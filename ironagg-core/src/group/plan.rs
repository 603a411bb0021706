// ironagg-core/src/group/plan.rs
// Common sort-key optimization: partition selection accumulators into
// classes that share one selector per group

use super::spec::{validate_n, AccumulatorOp, GroupSpec};
use crate::error::Result;
use crate::expression::Expression;
use crate::selector::Sense;
use crate::sort_key::SortSpec;
use crate::value::{Document, Value};
use crate::log_debug;

/// One selector per group is created for each class
#[derive(Debug, Clone)]
pub struct SelectorClass {
    pub sense: Sense,
    pub sort_by: SortSpec,
    pub n: Expression,
    /// Pre-validated `n` when the expression is constant
    const_n: Option<usize>,
}

impl SelectorClass {
    fn matches(&self, sense: Sense, sort_by: &SortSpec, n: &Expression) -> bool {
        self.sense == sense && &self.sort_by == sort_by && &self.n == n
    }

    /// Evaluate `n` for a group; it may only see the group key
    pub fn n_for_group(&self, key: &Value) -> Result<usize> {
        match self.const_n {
            Some(n) => Ok(n),
            None => {
                let key_doc = Document::new().with("_id", key.clone());
                validate_n(self.n.evaluate(&key_doc))
            }
        }
    }
}

/// How one accumulator produces its value
#[derive(Debug, Clone)]
pub enum Slot {
    Sum(Expression),
    Avg(Expression),
    /// Reads selector `selector` of its group and evaluates `output`
    /// against every retained document
    View {
        selector: usize,
        output: Expression,
        single: bool,
    },
}

/// Execution plan derived from a [`GroupSpec`]
#[derive(Debug, Clone)]
pub struct GroupPlan {
    id: Expression,
    names: Vec<String>,
    ops: Vec<&'static str>,
    slots: Vec<Slot>,
    selectors: Vec<SelectorClass>,
}

impl GroupPlan {
    /// Build the plan; with `share_sort_keys` off every selection accumulator
    /// gets a selector of its own
    pub fn new(spec: &GroupSpec, share_sort_keys: bool) -> Result<Self> {
        let mut names = Vec::with_capacity(spec.accumulators().len());
        let mut ops = Vec::with_capacity(spec.accumulators().len());
        let mut slots = Vec::with_capacity(spec.accumulators().len());
        let mut selectors: Vec<SelectorClass> = Vec::new();

        for accumulator in spec.accumulators() {
            let slot = match &accumulator.op {
                AccumulatorOp::Sum(expr) => Slot::Sum(expr.clone()),
                AccumulatorOp::Avg(expr) => Slot::Avg(expr.clone()),
                AccumulatorOp::Select(select) => {
                    let shared = if share_sort_keys {
                        selectors
                            .iter()
                            .position(|c| c.matches(select.sense, &select.sort_by, &select.n))
                    } else {
                        None
                    };

                    let index = match shared {
                        Some(index) => {
                            log_debug!(
                                "{} '{}' shares selector {}",
                                select.op_name(),
                                accumulator.name,
                                index
                            );
                            index
                        }
                        None => {
                            let const_n = if select.n.is_constant() {
                                Some(validate_n(select.n.evaluate(&Document::new()))?)
                            } else {
                                None
                            };
                            selectors.push(SelectorClass {
                                sense: select.sense,
                                sort_by: select.sort_by.clone(),
                                n: select.n.clone(),
                                const_n,
                            });
                            selectors.len() - 1
                        }
                    };

                    Slot::View {
                        selector: index,
                        output: select.output.clone(),
                        single: select.single,
                    }
                }
            };
            names.push(accumulator.name.clone());
            ops.push(accumulator.op.op_name());
            slots.push(slot);
        }

        log_debug!(
            "$group plan: {} accumulators, {} selectors (sharing {})",
            slots.len(),
            selectors.len(),
            if share_sort_keys { "on" } else { "off" }
        );

        Ok(GroupPlan {
            id: spec.id().clone(),
            names,
            ops,
            slots,
            selectors,
        })
    }

    pub fn id(&self) -> &Expression {
        &self.id
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn ops(&self) -> &[&'static str] {
        &self.ops
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn selectors(&self) -> &[SelectorClass] {
        &self.selectors
    }

    /// Number of selection accumulators (one selector each when unshared)
    pub fn view_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, Slot::View { .. }))
            .count()
    }

    /// True if at least two accumulators read the same selector
    pub fn sharing_fired(&self) -> bool {
        self.selectors.len() < self.view_count()
    }
}
