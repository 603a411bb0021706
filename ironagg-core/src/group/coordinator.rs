// ironagg-core/src/group/coordinator.rs
// Streams documents into per-group state and produces results or partials

use super::plan::{GroupPlan, Slot};
use super::spec::GroupSpec;
use super::state::GroupState;
use crate::error::Result;
use crate::options::GroupOptions;
use crate::spill::{SpillCoordinator, SpilledGroup};
use crate::value::{Document, Value};
use crate::value_utils::canonical_key;
use crate::{log_debug, log_info, log_trace};
use ahash::AHashMap;
use serde::Serialize;
use std::sync::Arc;

/// A group currently held in memory
#[derive(Debug)]
struct LiveGroup {
    ordinal: u64,
    key: Value,
    state: GroupState,
}

/// Executes one `$group` stage over a document stream
///
/// Groups are created lazily on the first document with a new key and are
/// emitted in first-seen order. When the approximate memory held by group
/// state exceeds the budget, all in-memory groups are spilled (or the
/// computation fails if disk use is not allowed).
///
/// # Examples
///
/// ```
/// use ironagg_core::{GroupCoordinator, GroupOptions, GroupSpec};
/// use ironagg_core::value::{Document, Value};
/// use serde_json::json;
///
/// let spec = GroupSpec::from_json(&json!({
///     "_id": null,
///     "ts": {"$top": {"output": "$s", "sortBy": {"y": -1}}},
///     "tx": {"$top": {"output": "$x", "sortBy": {"y": -1}}}
/// }))
/// .unwrap();
/// let mut coordinator = GroupCoordinator::new(&spec, GroupOptions::new()).unwrap();
/// for doc in [json!({"s": "A", "y": 5}), json!({"s": "C", "y": 1000})] {
///     coordinator.consume(Document::from_json(&doc).unwrap()).unwrap();
/// }
/// assert_eq!(coordinator.explain().selector_count, 1);
///
/// let results = coordinator.finish().unwrap();
/// assert_eq!(results[0].get("ts"), Some(&Value::from("C")));
/// assert_eq!(results[0].get("tx"), Some(&Value::Null));
/// ```
#[derive(Debug)]
pub struct GroupCoordinator {
    plan: GroupPlan,
    options: GroupOptions,
    /// Ordinal of every key seen, including spilled groups
    ordinals: AHashMap<String, u64>,
    groups: AHashMap<String, LiveGroup>,
    spill: SpillCoordinator,
    memory_used: usize,
    next_seq: u64,
}

/// Diagnostics for one `$group` stage
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupExplain {
    /// Distinct selectors created per group
    pub selector_count: usize,
    /// Selection accumulators in the stage
    pub selection_accumulators: usize,
    /// At least two accumulators share a selector
    pub shared_sort_key_optimization: bool,
    pub accumulators: Vec<AccumulatorExplain>,
    pub groups: usize,
    pub documents: u64,
    pub spills: usize,
    pub spilled_bytes: u64,
    pub memory_used_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccumulatorExplain {
    pub name: String,
    pub op: String,
    /// Selector index for selection accumulators
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<usize>,
}

impl GroupCoordinator {
    pub fn new(spec: &GroupSpec, options: GroupOptions) -> Result<Self> {
        let plan = GroupPlan::new(spec, options.share_sort_keys)?;
        let spill = SpillCoordinator::new(&options);
        Ok(GroupCoordinator {
            plan,
            options,
            ordinals: AHashMap::new(),
            groups: AHashMap::new(),
            spill,
            memory_used: 0,
            next_seq: 0,
        })
    }

    pub fn plan(&self) -> &GroupPlan {
        &self.plan
    }

    pub fn options(&self) -> &GroupOptions {
        &self.options
    }

    /// Route one document to its group
    pub fn consume(&mut self, doc: Document) -> Result<()> {
        let seq = self.next_seq;
        self.next_seq += 1;

        // A missing _id groups with null
        let key = self.plan.id().evaluate(&doc).unwrap_or(Value::Null);
        let canonical = canonical_key(&key);
        let doc = Arc::new(doc);
        let doc_bytes = doc.approx_size();

        if !self.groups.contains_key(&canonical) {
            let state = GroupState::new(&self.plan, &key)?;
            let next_ordinal = self.ordinals.len() as u64;
            let ordinal = *self.ordinals.entry(canonical.clone()).or_insert(next_ordinal);
            log_debug!("Opening group #{} for key {:?}", ordinal, key);
            self.memory_used += state.approx_size() + key.approx_size() + canonical.len();
            self.groups.insert(
                canonical.clone(),
                LiveGroup {
                    ordinal,
                    key,
                    state,
                },
            );
        }

        if let Some(group) = self.groups.get_mut(&canonical) {
            let before = group.state.approx_size();
            group.state.consume(&self.plan, &doc, seq, doc_bytes);
            let after = group.state.approx_size();
            self.memory_used = (self.memory_used + after).saturating_sub(before);
        }
        log_trace!("Document #{} routed to group {}", seq, canonical);

        if self.spill.should_spill(self.memory_used)? {
            self.spill_groups()?;
        }
        Ok(())
    }

    pub fn consume_all(&mut self, docs: impl IntoIterator<Item = Document>) -> Result<()> {
        for doc in docs {
            self.consume(doc)?;
        }
        Ok(())
    }

    fn take_groups(&mut self) -> Vec<SpilledGroup> {
        let mut groups: Vec<SpilledGroup> = self
            .groups
            .drain()
            .map(|(_, group)| SpilledGroup {
                ordinal: group.ordinal,
                key: group.key,
                state: group.state,
            })
            .collect();
        groups.sort_by_key(|group| group.ordinal);
        self.memory_used = 0;
        groups
    }

    fn spill_groups(&mut self) -> Result<()> {
        let used = self.memory_used;
        let groups = self.take_groups();
        log_info!(
            "$group over memory budget ({} > {} bytes), spilling {} groups",
            used,
            self.options.max_memory_bytes,
            groups.len()
        );
        self.spill.spill(groups)?;
        Ok(())
    }

    fn drain(mut self, mut emit: impl FnMut(&GroupPlan, SpilledGroup) -> Document) -> Result<Vec<Document>> {
        let memory = self.take_groups();
        let mut results = Vec::with_capacity(self.ordinals.len());
        let plan = &self.plan;
        self.spill.merge_spilled(memory, |group| {
            results.push(emit(plan, group));
            Ok(())
        })?;
        log_info!(
            "$group finished: {} groups, {} spills",
            results.len(),
            self.spill.spill_count()
        );
        Ok(results)
    }

    /// Final results: `{_id, <name>: <value>, ...}` per group
    pub fn finish(self) -> Result<Vec<Document>> {
        self.drain(|plan, group| {
            let values = group.state.finalize(plan);
            build_document(plan, group.key, values)
        })
    }

    /// Shard-side partial results, consumed by
    /// [`MergeCoordinator`](crate::merge::MergeCoordinator)
    pub fn finish_partials(self) -> Result<Vec<Document>> {
        self.drain(|plan, group| {
            let values = group.state.to_partials(plan);
            build_document(plan, group.key, values)
        })
    }

    pub fn explain(&self) -> GroupExplain {
        let accumulators = self
            .plan
            .names()
            .iter()
            .zip(self.plan.ops())
            .zip(self.plan.slots())
            .map(|((name, op), slot)| AccumulatorExplain {
                name: name.clone(),
                op: op.to_string(),
                selector: match slot {
                    Slot::View { selector, .. } => Some(*selector),
                    _ => None,
                },
            })
            .collect();

        GroupExplain {
            selector_count: self.plan.selectors().len(),
            selection_accumulators: self.plan.view_count(),
            shared_sort_key_optimization: self.plan.sharing_fired(),
            accumulators,
            groups: self.ordinals.len(),
            documents: self.next_seq,
            spills: self.spill.spill_count(),
            spilled_bytes: self.spill.spilled_bytes(),
            memory_used_bytes: self.memory_used,
        }
    }
}

pub(crate) fn build_document(plan: &GroupPlan, key: Value, values: Vec<Value>) -> Document {
    let mut doc = Document::new().with("_id", key);
    for (name, value) in plan.names().iter().zip(values) {
        doc.insert(name.clone(), value);
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IronAggError;
    use serde_json::json;

    fn docs(json: serde_json::Value) -> Vec<Document> {
        json.as_array()
            .unwrap()
            .iter()
            .map(|d| Document::from_json(d).unwrap())
            .collect()
    }

    fn run(spec: serde_json::Value, input: serde_json::Value, options: GroupOptions) -> Vec<serde_json::Value> {
        let spec = GroupSpec::from_json(&spec).unwrap();
        let mut coordinator = GroupCoordinator::new(&spec, options).unwrap();
        coordinator.consume_all(docs(input)).unwrap();
        coordinator
            .finish()
            .unwrap()
            .iter()
            .map(Document::to_json)
            .collect()
    }

    #[test]
    fn test_groups_in_first_seen_order() {
        let out = run(
            json!({"_id": "$k", "n": {"$sum": 1}}),
            json!([{"k": "b"}, {"k": "a"}, {"k": "b"}, {"k": 1}, {"k": 1.0}, {}]),
            GroupOptions::new(),
        );
        assert_eq!(
            out,
            vec![
                json!({"_id": "b", "n": 2}),
                json!({"_id": "a", "n": 1}),
                json!({"_id": 1, "n": 2}),
                json!({"_id": null, "n": 1}),
            ]
        );
    }

    #[test]
    fn test_null_and_missing_inputs_ignored() {
        let out = run(
            json!({"_id": null, "s": {"$sum": "$v"}, "a": {"$avg": "$v"}}),
            json!([{"v": 5}, {"v": null}, {}]),
            GroupOptions::new(),
        );
        assert_eq!(out, vec![json!({"_id": null, "s": 5, "a": 5.0})]);
    }

    #[test]
    fn test_memory_limit_without_disk_use() {
        let spec = GroupSpec::from_json(&json!({
            "_id": "$k",
            "all": {"$topN": {"n": 100, "output": "$$ROOT", "sortBy": {"k": 1}}}
        }))
        .unwrap();
        let mut coordinator =
            GroupCoordinator::new(&spec, GroupOptions::new().with_max_memory_bytes(2048)).unwrap();

        let mut failure = None;
        for i in 0..1000 {
            let doc = Document::from_json(&json!({"k": i % 7, "pad": "x".repeat(64)})).unwrap();
            if let Err(e) = coordinator.consume(doc) {
                failure = Some(e);
                break;
            }
        }
        assert!(matches!(
            failure,
            Some(IronAggError::QueryExceededMemoryLimitNoDiskUseAllowed { limit: 2048, .. })
        ));
    }

    #[test]
    fn test_explain_reports_sharing() {
        let spec = GroupSpec::from_json(&json!({
            "_id": null,
            "a": {"$topN": {"n": 2, "output": "$s", "sortBy": {"y": 1}}},
            "b": {"$topN": {"n": 2, "output": "$t", "sortBy": {"y": 1}}},
            "c": {"$sum": "$y"}
        }))
        .unwrap();
        let coordinator = GroupCoordinator::new(&spec, GroupOptions::new()).unwrap();
        let explain = coordinator.explain();
        assert_eq!(explain.selector_count, 1);
        assert_eq!(explain.selection_accumulators, 2);
        assert!(explain.shared_sort_key_optimization);
        assert_eq!(explain.accumulators[2].selector, None);
        assert_eq!(explain.accumulators[1].op, "$topN");

        let unshared =
            GroupCoordinator::new(&spec, GroupOptions::new().with_share_sort_keys(false)).unwrap();
        assert_eq!(unshared.explain().selector_count, 2);
        assert!(!unshared.explain().shared_sort_key_optimization);
    }

    #[test]
    fn test_bad_group_dependent_n_fails_before_accumulating() {
        let spec = GroupSpec::from_json(&json!({
            "_id": "$k",
            "t": {"$topN": {"n": "$_id", "output": "$k", "sortBy": {"k": 1}}}
        }))
        .unwrap();
        let mut coordinator = GroupCoordinator::new(&spec, GroupOptions::new()).unwrap();
        coordinator
            .consume(Document::from_json(&json!({"k": 2})).unwrap())
            .unwrap();
        let err = coordinator
            .consume(Document::from_json(&json!({"k": 0})).unwrap())
            .unwrap_err();
        assert!(matches!(err, IronAggError::InvalidArgument(_)));
    }

    #[test]
    fn test_partials_layout() {
        let spec = GroupSpec::from_json(&json!({
            "_id": null,
            "s": {"$sum": "$v"},
            "a": {"$avg": "$v"},
            "t": {"$top": {"output": "$v", "sortBy": {"v": -1}}}
        }))
        .unwrap();
        let mut coordinator = GroupCoordinator::new(&spec, GroupOptions::new()).unwrap();
        coordinator.consume_all(docs(json!([{"v": 1}, {"v": 2}]))).unwrap();
        let partials: Vec<serde_json::Value> = coordinator
            .finish_partials()
            .unwrap()
            .iter()
            .map(Document::to_json)
            .collect();
        assert_eq!(
            partials,
            vec![json!({
                "_id": null,
                "s": [16, 3.0, 0.0],
                "a": {"count": 2, "ps": [16, 3.0, 0.0]},
                "t": [{"output": 2, "sortKey": [2]}]
            })]
        );
    }
}
