// ironagg-core/src/group/state.rs
// Per-group accumulator state

use super::plan::{GroupPlan, Slot};
use crate::error::{IronAggError, Result};
use crate::selector::{BoundedSelector, Offer};
use crate::summation::{AvgCell, SumCell};
use crate::value::{Document, Value};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Numeric state of one accumulator; selection accumulators keep theirs
/// in the group's shared selectors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Cell {
    Sum(SumCell),
    Avg(AvgCell),
    View,
}

/// Everything accumulated for one group key
///
/// Selectors hold the retained documents themselves, so any accumulator
/// sharing a selector can evaluate its own output at finalize time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupState {
    selectors: Vec<BoundedSelector<Arc<Document>>>,
    cells: Vec<Cell>,
    bytes: usize,
}

const ENTRY_OVERHEAD: usize = 24;

impl GroupState {
    /// Open a group; `n` expressions are evaluated here against the key
    pub fn new(plan: &GroupPlan, key: &Value) -> Result<Self> {
        let selectors = plan
            .selectors()
            .iter()
            .map(|class| Ok(BoundedSelector::new(class.sense, class.n_for_group(key)?)))
            .collect::<Result<Vec<_>>>()?;

        let cells: Vec<Cell> = plan
            .slots()
            .iter()
            .map(|slot| match slot {
                Slot::Sum(_) => Cell::Sum(SumCell::new()),
                Slot::Avg(_) => Cell::Avg(AvgCell::new()),
                Slot::View { .. } => Cell::View,
            })
            .collect();

        let bytes = 64 + cells.len() * 48 + selectors.len() * 32;
        Ok(GroupState {
            selectors,
            cells,
            bytes,
        })
    }

    /// Feed one document; `seq` is its position in the input stream and
    /// `doc_bytes` its approximate size
    pub fn consume(&mut self, plan: &GroupPlan, doc: &Arc<Document>, seq: u64, doc_bytes: usize) {
        for (selector, class) in self.selectors.iter_mut().zip(plan.selectors()) {
            let key = class.sort_by.extract(doc);
            let key_bytes = key.approx_size();
            match selector.offer(key, seq, Arc::clone(doc)) {
                Offer::Kept => self.bytes += key_bytes + doc_bytes + ENTRY_OVERHEAD,
                Offer::Replaced(old_key, old_doc) => {
                    self.bytes += key_bytes + doc_bytes;
                    self.bytes = self
                        .bytes
                        .saturating_sub(old_key.approx_size() + old_doc.approx_size());
                }
                Offer::Rejected(_) => {}
            }
        }

        for (cell, slot) in self.cells.iter_mut().zip(plan.slots()) {
            match (cell, slot) {
                (Cell::Sum(sum), Slot::Sum(expr)) => {
                    if let Some(value) = expr.evaluate(doc) {
                        sum.add(&value);
                    }
                }
                (Cell::Avg(avg), Slot::Avg(expr)) => {
                    if let Some(value) = expr.evaluate(doc) {
                        avg.add(&value);
                    }
                }
                _ => {}
            }
        }
    }

    /// Combine with the state of the same group accumulated elsewhere
    /// (an earlier spill run)
    pub fn merge(&mut self, other: GroupState) -> Result<()> {
        if self.selectors.len() != other.selectors.len() || self.cells.len() != other.cells.len() {
            return Err(IronAggError::Corruption(
                "group state does not match the $group plan".to_string(),
            ));
        }

        for (mine, theirs) in self.selectors.iter_mut().zip(other.selectors) {
            mine.absorb(theirs);
        }
        for (mine, theirs) in self.cells.iter_mut().zip(other.cells) {
            match (mine, theirs) {
                (Cell::Sum(a), Cell::Sum(b)) => a.merge(&b),
                (Cell::Avg(a), Cell::Avg(b)) => a.merge(&b),
                (Cell::View, Cell::View) => {}
                _ => {
                    return Err(IronAggError::Corruption(
                        "accumulator kinds differ between group states".to_string(),
                    ))
                }
            }
        }
        self.bytes += other.bytes;
        Ok(())
    }

    pub fn selectors(&self) -> &[BoundedSelector<Arc<Document>>] {
        &self.selectors
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn approx_size(&self) -> usize {
        self.bytes
    }

    /// Final value of every accumulator, in declaration order
    pub fn finalize(&self, plan: &GroupPlan) -> Vec<Value> {
        self.cells
            .iter()
            .zip(plan.slots())
            .map(|(cell, slot)| match (cell, slot) {
                (Cell::Sum(sum), _) => sum.finalize(),
                (Cell::Avg(avg), _) => avg.finalize(),
                (
                    Cell::View,
                    Slot::View {
                        selector,
                        output,
                        single,
                    },
                ) => {
                    let selector = &self.selectors[*selector];
                    let evaluate = |doc: &Arc<Document>| output.evaluate(doc).unwrap_or(Value::Null);
                    if *single {
                        selector.finalize_single().map(evaluate).unwrap_or(Value::Null)
                    } else {
                        Value::Array(
                            selector
                                .finalize()
                                .into_iter()
                                .map(|(_, doc)| evaluate(doc))
                                .collect(),
                        )
                    }
                }
                _ => Value::Null,
            })
            .collect()
    }

    /// Shard-side partial of every accumulator, in declaration order
    ///
    /// Selection accumulators emit `[{output, sortKey}, ...]` in final order.
    pub fn to_partials(&self, plan: &GroupPlan) -> Vec<Value> {
        self.cells
            .iter()
            .zip(plan.slots())
            .map(|(cell, slot)| match (cell, slot) {
                (Cell::Sum(sum), _) => sum.to_partial(),
                (Cell::Avg(avg), _) => avg.to_partial(),
                (Cell::View, Slot::View { selector, output, .. }) => Value::Array(
                    self.selectors[*selector]
                        .finalize()
                        .into_iter()
                        .map(|(key, doc)| {
                            Value::Document(
                                Document::new()
                                    .with("output", output.evaluate(doc).unwrap_or(Value::Null))
                                    .with("sortKey", Value::Array(key.values())),
                            )
                        })
                        .collect(),
                ),
                _ => Value::Null,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::GroupSpec;
    use serde_json::json;

    fn plan(json: serde_json::Value) -> GroupPlan {
        GroupPlan::new(&GroupSpec::from_json(&json).unwrap(), true).unwrap()
    }

    fn feed(plan: &GroupPlan, state: &mut GroupState, docs: &[serde_json::Value], first_seq: u64) {
        for (i, json) in docs.iter().enumerate() {
            let doc = Arc::new(Document::from_json(json).unwrap());
            let bytes = doc.approx_size();
            state.consume(plan, &doc, first_seq + i as u64, bytes);
        }
    }

    #[test]
    fn test_shared_selector_independent_outputs() {
        let p = plan(json!({
            "_id": null,
            "ts": {"$top": {"output": "$s", "sortBy": {"y": -1}}},
            "tx": {"$top": {"output": "$x", "sortBy": {"y": -1}}},
            "all": {"$topN": {"n": 2, "output": {"s": "$s", "x": "$x"}, "sortBy": {"y": -1}}}
        }));
        let mut state = GroupState::new(&p, &Value::Null).unwrap();
        feed(
            &p,
            &mut state,
            &[json!({"s": "A", "y": 5, "x": 1}), json!({"s": "C", "y": 1000}), json!({"s": "B", "y": 24})],
            0,
        );

        let values = state.finalize(&p);
        assert_eq!(values[0], Value::from("C"));
        assert_eq!(values[1], Value::Null);
        assert_eq!(
            values[2],
            Value::from_json(&json!([{"s": "C"}, {"s": "B"}])).unwrap()
        );
    }

    #[test]
    fn test_empty_group_outputs() {
        let p = plan(json!({
            "_id": null,
            "t": {"$top": {"output": "$s", "sortBy": {"y": 1}}},
            "tn": {"$topN": {"n": 3, "output": "$s", "sortBy": {"y": 1}}},
            "avg": {"$avg": "$y"},
            "sum": {"$sum": "$y"}
        }));
        let state = GroupState::new(&p, &Value::Null).unwrap();
        assert_eq!(
            state.finalize(&p),
            vec![Value::Null, Value::Array(vec![]), Value::Null, Value::Int32(0)]
        );
    }

    #[test]
    fn test_merge_matches_single_pass() {
        let p = plan(json!({
            "_id": null,
            "b": {"$bottomN": {"n": 2, "output": "$s", "sortBy": {"y": 1}}},
            "sum": {"$sum": "$y"},
            "avg": {"$avg": "$y"}
        }));
        let docs = [
            json!({"s": "a", "y": 3}),
            json!({"s": "b", "y": 9}),
            json!({"s": "c", "y": 9}),
            json!({"s": "d", "y": 1}),
            json!({"s": "e", "y": 9}),
        ];

        let mut whole = GroupState::new(&p, &Value::Null).unwrap();
        feed(&p, &mut whole, &docs, 0);

        let mut early = GroupState::new(&p, &Value::Null).unwrap();
        feed(&p, &mut early, &docs[..2], 0);
        let mut late = GroupState::new(&p, &Value::Null).unwrap();
        feed(&p, &mut late, &docs[2..], 2);
        late.merge(early).unwrap();

        assert_eq!(late.finalize(&p), whole.finalize(&p));
        assert_eq!(
            whole.finalize(&p)[0],
            Value::from_json(&json!(["b", "c"])).unwrap()
        );
    }

    #[test]
    fn test_partials_carry_sort_keys() {
        let p = plan(json!({
            "_id": null,
            "t": {"$topN": {"n": 2, "output": "$s", "sortBy": {"y": -1}}}
        }));
        let mut state = GroupState::new(&p, &Value::Null).unwrap();
        feed(&p, &mut state, &[json!({"s": "a", "y": 1}), json!({"y": 7})], 0);

        let partials = state.to_partials(&p);
        assert_eq!(
            partials[0],
            Value::from_json(&json!([
                {"output": null, "sortKey": [7]},
                {"output": "a", "sortKey": [1]}
            ]))
            .unwrap()
        );
    }

    #[test]
    fn test_memory_estimate_tracks_evictions() {
        let p = plan(json!({
            "_id": null,
            "t": {"$top": {"output": "$s", "sortBy": {"y": 1}}}
        }));
        let mut state = GroupState::new(&p, &Value::Null).unwrap();
        let docs: Vec<_> = (0..100).rev().map(|y| json!({"s": "x", "y": y})).collect();
        feed(&p, &mut state, &docs[..1], 0);
        let after_one = state.approx_size();
        feed(&p, &mut state, &docs[1..], 1);
        assert_eq!(state.approx_size(), after_one);
    }

    #[test]
    fn test_merge_rejects_mismatched_states() {
        let a = plan(json!({"_id": null, "s": {"$sum": 1}}));
        let b = plan(json!({"_id": null, "s": {"$avg": 1}}));
        let mut left = GroupState::new(&a, &Value::Null).unwrap();
        let right = GroupState::new(&b, &Value::Null).unwrap();
        assert!(left.merge(right).is_err());
    }
}
