// ironagg-core/src/merge.rs
// Merging shard partials into final $group results

use crate::error::{IronAggError, Result};
use crate::group::{build_document, GroupPlan, GroupSpec, Slot};
use crate::selector::{BoundedSelector, Sense};
use crate::sort_key::SortSpec;
use crate::summation::{AvgCell, SumCell};
use crate::value::{Document, Value};
use crate::value_utils::canonical_key;
use crate::{log_debug, log_warn};
use ahash::AHashMap;

/// Merge state of one accumulator on the merging node
#[derive(Debug)]
enum MergeCell {
    Sum(SumCell),
    Avg(AvgCell),
    /// Re-selection over the entries every shard kept
    Select {
        selector: BoundedSelector<Value>,
        class: usize,
        single: bool,
    },
}

#[derive(Debug)]
struct MergeGroup {
    key: Value,
    cells: Vec<MergeCell>,
}

/// Combines partial documents from any number of shards
///
/// Partials must be fed in shard order, and in the order each shard produced
/// them; ties between selection entries are then resolved exactly as a
/// single node reading the shards one after the other would.
#[derive(Debug)]
pub struct MergeCoordinator {
    plan: GroupPlan,
    index: AHashMap<String, usize>,
    groups: Vec<MergeGroup>,
    next_seq: u64,
}

impl MergeCoordinator {
    pub fn new(spec: &GroupSpec) -> Result<Self> {
        // Partials carry one entry list per accumulator, so sharing is moot here
        Ok(MergeCoordinator {
            plan: GroupPlan::new(spec, true)?,
            index: AHashMap::new(),
            groups: Vec::new(),
            next_seq: 0,
        })
    }

    fn open_group(&self, key: &Value) -> Result<MergeGroup> {
        let cells = self
            .plan
            .slots()
            .iter()
            .map(|slot| {
                Ok(match slot {
                    Slot::Sum(_) => MergeCell::Sum(SumCell::new()),
                    Slot::Avg(_) => MergeCell::Avg(AvgCell::new()),
                    Slot::View {
                        selector, single, ..
                    } => {
                        let class = &self.plan.selectors()[*selector];
                        MergeCell::Select {
                            selector: BoundedSelector::new(class.sense, class.n_for_group(key)?),
                            class: *selector,
                            single: *single,
                        }
                    }
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(MergeGroup {
            key: key.clone(),
            cells,
        })
    }

    /// Merge one partial document `{_id, <name>: <partial>, ...}`
    pub fn consume_partial(&mut self, partial: &Document) -> Result<()> {
        let key = partial
            .get("_id")
            .cloned()
            .ok_or_else(|| IronAggError::InvalidPartial("partial has no _id".to_string()))?;
        let canonical = canonical_key(&key);

        let position = match self.index.get(&canonical) {
            Some(position) => *position,
            None => {
                let group = self.open_group(&key)?;
                self.groups.push(group);
                self.index.insert(canonical, self.groups.len() - 1);
                self.groups.len() - 1
            }
        };

        let group = &mut self.groups[position];
        for (name, cell) in self.plan.names().iter().zip(group.cells.iter_mut()) {
            let value = partial.get(name).ok_or_else(|| {
                IronAggError::InvalidPartial(format!("partial is missing accumulator '{}'", name))
            })?;
            match cell {
                MergeCell::Sum(sum) => sum.merge_partial(value)?,
                MergeCell::Avg(avg) => avg.merge_partial(value)?,
                MergeCell::Select {
                    selector, class, ..
                } => {
                    let sort_by = &self.plan.selectors()[*class].sort_by;
                    offer_entries(selector, sort_by, value, &mut self.next_seq)?;
                }
            }
        }
        Ok(())
    }

    /// Feed every partial of one shard
    pub fn consume_shard(&mut self, partials: &[Document]) -> Result<()> {
        for partial in partials {
            self.consume_partial(partial)?;
        }
        Ok(())
    }

    /// Final results in first-seen order across shards
    pub fn finish(self) -> Vec<Document> {
        log_debug!("Merged partials into {} groups", self.groups.len());
        let plan = &self.plan;
        self.groups
            .into_iter()
            .map(|group| {
                let values = group
                    .cells
                    .iter()
                    .map(|cell| match cell {
                        MergeCell::Sum(sum) => sum.finalize(),
                        MergeCell::Avg(avg) => avg.finalize(),
                        MergeCell::Select {
                            selector, single, ..
                        } => finalize_selection(selector, *single),
                    })
                    .collect();
                build_document(plan, group.key, values)
            })
            .collect()
    }
}

fn offer_entries(
    selector: &mut BoundedSelector<Value>,
    sort_by: &SortSpec,
    entries: &Value,
    next_seq: &mut u64,
) -> Result<()> {
    let entries = entries.as_array().ok_or_else(|| {
        IronAggError::InvalidPartial(format!(
            "selection partial must be an array, got {}",
            entries.type_name()
        ))
    })?;

    for entry in entries {
        let entry = entry.as_document().ok_or_else(|| {
            IronAggError::InvalidPartial("selection entry must be a document".to_string())
        })?;
        let sort_key = match entry.get("sortKey") {
            Some(Value::Array(values)) => sort_by.key_from_values(values.clone())?,
            _ => {
                return Err(IronAggError::InvalidPartial(
                    "selection entry needs a 'sortKey' array".to_string(),
                ))
            }
        };
        let output = match entry.get("output") {
            Some(value) => value.clone(),
            None => {
                log_warn!("selection entry without 'output', using null");
                Value::Null
            }
        };
        selector.offer(sort_key, *next_seq, output);
        *next_seq += 1;
    }
    Ok(())
}

fn finalize_selection(selector: &BoundedSelector<Value>, single: bool) -> Value {
    if single {
        selector.finalize_single().cloned().unwrap_or(Value::Null)
    } else {
        Value::Array(
            selector
                .finalize()
                .into_iter()
                .map(|(_, value)| value.clone())
                .collect(),
        )
    }
}

/// Merge `$sum` partials into the final sum
pub fn merge_sum_partials(partials: &[Value]) -> Result<Value> {
    let mut cell = SumCell::new();
    for partial in partials {
        cell.merge_partial(partial)?;
    }
    Ok(cell.finalize())
}

/// Merge `$avg` partials into the final average
pub fn merge_avg_partials(partials: &[Value]) -> Result<Value> {
    let mut cell = AvgCell::new();
    for partial in partials {
        cell.merge_partial(partial)?;
    }
    Ok(cell.finalize())
}

/// Re-select over shard-local `$top`/`$bottom`/`$topN`/`$bottomN` partials
///
/// `single` selects the scalar `$top`/`$bottom` output.
pub fn merge_top_bottom_partials(
    partials: &[Value],
    sense: Sense,
    n: usize,
    single: bool,
    sort_by: &SortSpec,
) -> Result<Value> {
    let mut selector = BoundedSelector::new(sense, n);
    let mut seq = 0;
    for partial in partials {
        offer_entries(&mut selector, sort_by, partial, &mut seq)?;
    }
    Ok(finalize_selection(&selector, single))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::GroupCoordinator;
    use crate::options::GroupOptions;
    use serde_json::json;

    fn val(json: serde_json::Value) -> Value {
        Value::from_json(&json).unwrap()
    }

    #[test]
    fn test_merge_sum_partials() {
        let result = merge_sum_partials(&[
            val(json!([18, {"$numberDouble": "9223372036854775807"}, -1.0])),
            val(json!([19, 0.0, 0.0, {"$numberDecimal": "0.000000000000001"}])),
        ])
        .unwrap();
        assert_eq!(result, val(json!({"$numberDecimal": "9223372036854775807.000000000000001"})));
    }

    #[test]
    fn test_merge_avg_partials() {
        let result = merge_avg_partials(&[
            val(json!({"count": 2, "ps": [16, 3.0, 0.0]})),
            val(json!({"count": 1, "ps": [1, 6.0, 0.0]})),
        ])
        .unwrap();
        assert_eq!(result, Value::Double(3.0));
        assert_eq!(merge_avg_partials(&[]).unwrap(), Value::Null);
    }

    #[test]
    fn test_merge_top_bottom_partials() {
        let sort_by = SortSpec::from_json(&json!({"y": -1})).unwrap();
        let shard_a = val(json!([
            {"output": "C", "sortKey": [1000]},
            {"output": "B", "sortKey": [24]}
        ]));
        let shard_b = val(json!([
            {"output": "C2", "sortKey": [300]},
            {"output": "D", "sortKey": [10]}
        ]));
        let partials = [shard_a, shard_b];

        let top2 = merge_top_bottom_partials(&partials, Sense::Top, 2, false, &sort_by).unwrap();
        assert_eq!(top2, val(json!(["C", "C2"])));

        let bottom = merge_top_bottom_partials(&partials, Sense::Bottom, 1, true, &sort_by).unwrap();
        assert_eq!(bottom, val(json!("D")));
    }

    #[test]
    fn test_malformed_selection_partial() {
        let sort_by = SortSpec::from_json(&json!({"y": 1})).unwrap();
        let no_key = [val(json!([{"output": 1}]))];
        assert!(merge_top_bottom_partials(&no_key, Sense::Top, 1, true, &sort_by).is_err());
        let wrong_arity = [val(json!([{"output": 1, "sortKey": [1, 2]}]))];
        assert!(merge_top_bottom_partials(&wrong_arity, Sense::Top, 1, true, &sort_by).is_err());
    }

    #[test]
    fn test_merge_coordinator_matches_single_node() {
        let spec = GroupSpec::from_json(&json!({
            "_id": "$k",
            "top": {"$topN": {"n": 2, "output": "$s", "sortBy": {"y": 1}}},
            "last": {"$bottom": {"output": "$s", "sortBy": {"y": 1}}},
            "total": {"$sum": "$y"},
            "mean": {"$avg": "$y"}
        }))
        .unwrap();
        let input: Vec<Document> = [
            json!({"k": "x", "s": "a", "y": 4}),
            json!({"k": "y", "s": "b", "y": 2}),
            json!({"k": "x", "s": "c", "y": 4}),
            json!({"k": "x", "s": "d", "y": 1}),
            json!({"k": "y", "s": "e", "y": 8}),
            json!({"k": "x", "s": "f", "y": 9}),
        ]
        .iter()
        .map(|d| Document::from_json(d).unwrap())
        .collect();

        let mut single = GroupCoordinator::new(&spec, GroupOptions::new()).unwrap();
        single.consume_all(input.clone()).unwrap();
        let expected = single.finish().unwrap();

        let mut merger = MergeCoordinator::new(&spec).unwrap();
        for shard in input.chunks(4) {
            let mut local = GroupCoordinator::new(&spec, GroupOptions::new()).unwrap();
            local.consume_all(shard.to_vec()).unwrap();
            merger.consume_shard(&local.finish_partials().unwrap()).unwrap();
        }
        assert_eq!(merger.finish(), expected);
    }

    #[test]
    fn test_partial_missing_accumulator_rejected() {
        let spec = GroupSpec::from_json(&json!({"_id": null, "s": {"$sum": 1}})).unwrap();
        let mut merger = MergeCoordinator::new(&spec).unwrap();
        let partial = Document::from_json(&json!({"_id": null})).unwrap();
        assert!(matches!(
            merger.consume_partial(&partial),
            Err(IronAggError::InvalidPartial(_))
        ));
    }
}
