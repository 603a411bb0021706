// Integration tests for the $group engine
use ironagg_core::error::IronAggError;
use ironagg_core::{run_sharded, Document, GroupCoordinator, GroupOptions, GroupSpec, Value};
use serde_json::{json, Value as JsonValue};
use tempfile::TempDir;

// Helper to turn a JSON array into documents
fn docs(input: JsonValue) -> Vec<Document> {
    input
        .as_array()
        .unwrap()
        .iter()
        .map(|d| Document::from_json(d).unwrap())
        .collect()
}

fn run(spec: &JsonValue, input: Vec<Document>, options: GroupOptions) -> Vec<JsonValue> {
    let spec = GroupSpec::from_json(spec).unwrap();
    let mut coordinator = GroupCoordinator::new(&spec, options).unwrap();
    coordinator.consume_all(input).unwrap();
    coordinator
        .finish()
        .unwrap()
        .iter()
        .map(Document::to_json)
        .collect()
}

fn sales() -> Vec<Document> {
    docs(json!([
        {"s": "D", "y": 10},
        {"s": "A", "y": 5},
        {"s": "B", "y": 24},
        {"s": "C", "y": 1000},
        {"s": "A", "y": 1},
        {"s": "C", "y": 9},
        {"s": "C", "y": 300},
        {"s": "D", "y": 3}
    ]))
}

// Many groups, each with a handful of documents spread across the input
fn wide_input(groups: i64, per_group: i64) -> Vec<Document> {
    let mut out = Vec::new();
    for round in 0..per_group {
        for g in 0..groups {
            let y = (g * 37 + round * 11) % 97;
            out.push(
                Document::from_json(&json!({
                    "k": format!("key-{}", g),
                    "y": y,
                    "name": format!("doc-{}-{}", g, round),
                    "pad": "xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx"
                }))
                .unwrap(),
            );
        }
    }
    out
}

fn wide_spec() -> JsonValue {
    json!({
        "_id": "$k",
        "best": {"$top": {"output": "$name", "sortBy": {"y": -1}}},
        "bestY": {"$top": {"output": "$y", "sortBy": {"y": -1}}},
        "worst3": {"$bottomN": {"n": 3, "output": "$name", "sortBy": {"y": -1}}},
        "total": {"$sum": "$y"},
        "mean": {"$avg": "$y"},
        "count": {"$sum": 1}
    })
}

// =============================================================================
// SELECTION
// =============================================================================

#[test]
fn test_top_with_shared_sort_key() {
    let out = run(
        &json!({
            "_id": null,
            "ts": {"$top": {"output": "$s", "sortBy": {"y": -1}}},
            "tx": {"$top": {"output": "$x", "sortBy": {"y": -1}}},
            "total": {"$sum": "$y"}
        }),
        sales(),
        GroupOptions::new(),
    );
    assert_eq!(out, vec![json!({"_id": null, "ts": "C", "tx": null, "total": 1352})]);
}

#[test]
fn test_top_n_and_bottom_n_per_group() {
    let out = run(
        &json!({
            "_id": "$s",
            "top2": {"$topN": {"n": 2, "output": "$y", "sortBy": {"y": 1}}},
            "bottom2": {"$bottomN": {"n": 2, "output": "$y", "sortBy": {"y": 1}}},
            "last": {"$bottom": {"output": "$y", "sortBy": {"y": 1}}}
        }),
        sales(),
        GroupOptions::new(),
    );
    assert_eq!(
        out,
        vec![
            json!({"_id": "D", "top2": [3, 10], "bottom2": [3, 10], "last": 10}),
            json!({"_id": "A", "top2": [1, 5], "bottom2": [1, 5], "last": 5}),
            json!({"_id": "B", "top2": [24], "bottom2": [24], "last": 24}),
            json!({"_id": "C", "top2": [9, 300], "bottom2": [300, 1000], "last": 1000}),
        ]
    );
}

#[test]
fn test_n_from_group_key() {
    let out = run(
        &json!({
            "_id": "$k",
            "firstFew": {"$topN": {"n": "$_id", "output": "$v", "sortBy": {"v": 1}}}
        }),
        docs(json!([
            {"k": 1, "v": 5}, {"k": 2, "v": 4}, {"k": 1, "v": 3},
            {"k": 2, "v": 2}, {"k": 2, "v": 1}
        ])),
        GroupOptions::new(),
    );
    assert_eq!(
        out,
        vec![
            json!({"_id": 1, "firstFew": [3]}),
            json!({"_id": 2, "firstFew": [1, 2]}),
        ]
    );
}

#[test]
fn test_sort_key_optimization_is_transparent() {
    let spec = wide_spec();
    let input = wide_input(20, 6);
    let shared = run(&spec, input.clone(), GroupOptions::new());
    let unshared = run(&spec, input, GroupOptions::new().with_share_sort_keys(false));
    assert_eq!(shared, unshared);
}

#[test]
fn test_explain_reports_sharing() {
    let spec = GroupSpec::from_json(&wide_spec()).unwrap();

    let coordinator = GroupCoordinator::new(&spec, GroupOptions::new()).unwrap();
    let explain = coordinator.explain();
    assert!(explain.shared_sort_key_optimization);
    assert_eq!(explain.selection_accumulators, 3);
    assert_eq!(explain.selector_count, 2);

    let coordinator =
        GroupCoordinator::new(&spec, GroupOptions::new().with_share_sort_keys(false)).unwrap();
    let explain = coordinator.explain();
    assert!(!explain.shared_sort_key_optimization);
    assert_eq!(explain.selector_count, 3);
}

// =============================================================================
// SUMMATION
// =============================================================================

#[test]
fn test_sum_mixed_widths() {
    let out = run(
        &json!({"_id": null, "total": {"$sum": "$v"}}),
        docs(json!([
            {"v": {"$numberLong": "9223372036854775807"}},
            {"v": {"$numberDecimal": "0.000000000000001"}}
        ])),
        GroupOptions::new(),
    );
    assert_eq!(
        out,
        vec![json!({"_id": null, "total": {"$numberDecimal": "9223372036854775807.000000000000001"}})]
    );
}

#[test]
fn test_sum_promotes_int_to_long() {
    let out = run(
        &json!({"_id": null, "total": {"$sum": "$v"}}),
        docs(json!([{"v": 2147483647}, {"v": 2147483647}])),
        GroupOptions::new(),
    );
    assert_eq!(out, vec![json!({"_id": null, "total": 4294967294i64})]);
}

#[test]
fn test_avg_of_nothing_is_null() {
    let out = run(
        &json!({"_id": "$k", "mean": {"$avg": "$v"}, "total": {"$sum": "$v"}}),
        docs(json!([{"k": 1, "v": "text"}, {"k": 1}])),
        GroupOptions::new(),
    );
    assert_eq!(out, vec![json!({"_id": 1, "mean": null, "total": 0})]);
}

// =============================================================================
// SPILLING
// =============================================================================

#[test]
fn test_spill_matches_in_memory() {
    let temp_dir = TempDir::new().unwrap();
    let spec = wide_spec();
    let input = wide_input(40, 5);

    let expected = run(&spec, input.clone(), GroupOptions::new());

    let options = GroupOptions::new()
        .with_max_memory_bytes(8 * 1024)
        .with_allow_disk_use(true)
        .with_spill_dir(temp_dir.path());
    let parsed = GroupSpec::from_json(&spec).unwrap();
    let mut coordinator = GroupCoordinator::new(&parsed, options).unwrap();
    coordinator.consume_all(input).unwrap();

    let explain = coordinator.explain();
    assert!(explain.spills > 0, "expected at least one spill: {:?}", explain);
    assert!(explain.spilled_bytes > 0);

    let spilled: Vec<JsonValue> = coordinator
        .finish()
        .unwrap()
        .iter()
        .map(Document::to_json)
        .collect();
    assert_eq!(spilled, expected);
}

#[test]
fn test_memory_limit_without_disk_use() {
    let spec = GroupSpec::from_json(&wide_spec()).unwrap();
    let mut coordinator =
        GroupCoordinator::new(&spec, GroupOptions::new().with_max_memory_bytes(4 * 1024)).unwrap();

    match coordinator.consume_all(wide_input(40, 5)) {
        Err(IronAggError::QueryExceededMemoryLimitNoDiskUseAllowed { used, limit }) => {
            assert_eq!(limit, 4 * 1024);
            assert!(used > limit);
        }
        other => panic!("expected memory limit error, got {:?}", other),
    }
}

#[test]
fn test_spill_to_missing_directory_fails() {
    let temp_dir = TempDir::new().unwrap();
    let options = GroupOptions::new()
        .with_max_memory_bytes(1024)
        .with_allow_disk_use(true)
        .with_spill_dir(temp_dir.path().join("does-not-exist"));
    let spec = GroupSpec::from_json(&wide_spec()).unwrap();
    let mut coordinator = GroupCoordinator::new(&spec, options).unwrap();

    let result = coordinator.consume_all(wide_input(40, 5));
    assert!(matches!(result, Err(IronAggError::SpillFailed(_))), "{:?}", result);
}

// =============================================================================
// SHARDED EXECUTION
// =============================================================================

#[test]
fn test_sharded_matches_single_node() {
    let spec = wide_spec();
    let input = wide_input(15, 6);
    let expected = run(&spec, input.clone(), GroupOptions::new());

    let parsed = GroupSpec::from_json(&spec).unwrap();
    let shards: Vec<Vec<Document>> = input.chunks(17).map(|chunk| chunk.to_vec()).collect();
    let merged: Vec<JsonValue> = run_sharded(&parsed, &GroupOptions::new(), shards)
        .unwrap()
        .iter()
        .map(Document::to_json)
        .collect();
    assert_eq!(merged, expected);
}

#[test]
fn test_sharded_exact_sum_across_shards() {
    let spec = GroupSpec::from_json(&json!({"_id": null, "total": {"$sum": "$v"}})).unwrap();
    let shards = vec![
        docs(json!([{"v": {"$numberLong": "9223372036854775807"}}])),
        docs(json!([{"v": {"$numberDecimal": "0.000000000000001"}}])),
    ];
    let merged = run_sharded(&spec, &GroupOptions::new(), shards).unwrap();
    assert_eq!(
        merged[0].get("total"),
        Some(&Value::from_json(&json!({"$numberDecimal": "9223372036854775807.000000000000001"})).unwrap())
    );
}

#[test]
fn test_sharded_with_spilling_shards() {
    let temp_dir = TempDir::new().unwrap();
    let spec = wide_spec();
    let input = wide_input(30, 4);
    let expected = run(&spec, input.clone(), GroupOptions::new());

    let options = GroupOptions::new()
        .with_max_memory_bytes(8 * 1024)
        .with_allow_disk_use(true)
        .with_spill_dir(temp_dir.path());
    let parsed = GroupSpec::from_json(&spec).unwrap();
    let shards: Vec<Vec<Document>> = input.chunks(40).map(|chunk| chunk.to_vec()).collect();
    let merged: Vec<JsonValue> = run_sharded(&parsed, &options, shards)
        .unwrap()
        .iter()
        .map(Document::to_json)
        .collect();
    assert_eq!(merged, expected);
}
