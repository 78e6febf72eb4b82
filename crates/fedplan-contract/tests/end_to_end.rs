// Copyright (c) 2026 Fedplan Contributors
// SPDX-License-Identifier: Apache-2.0

//! Full transactions through the dispatch surface: registration
//! round-trips, lifecycle logs, listings and structured errors.

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use fedplan_contract::{run, InvokeResponse};
use fedplan_core::ledger::MemStore;

const WORKER_A: &str = "workerA";
const WORKER_B: &str = "workerB";

const DATA_MANAGER_KEY: &str = "0dddddd1-aaaa-bbbb-cccc-000000000001";
const TRAIN_SAMPLE_1: &str = "05aaaaa1-aaaa-bbbb-cccc-000000000001";
const TRAIN_SAMPLE_2: &str = "05aaaaa2-aaaa-bbbb-cccc-000000000002";
const TEST_SAMPLE_1: &str = "07eeeee1-aaaa-bbbb-cccc-000000000001";
const TEST_SAMPLE_2: &str = "07eeeee2-aaaa-bbbb-cccc-000000000002";
const OBJECTIVE_KEY: &str = "0bbbbbb1-aaaa-bbbb-cccc-000000000001";
const ALGO_KEY: &str = "0a111111-aaaa-bbbb-cccc-000000000001";
const TRAINTUPLE_KEY: &str = "02111111-aaaa-bbbb-cccc-000000000001";
const TESTTUPLE_KEY: &str = "03111111-aaaa-bbbb-cccc-000000000001";
const MODEL_KEY: &str = "04111111-aaaa-bbbb-cccc-000000000001";

fn checksum(seed: &str) -> String {
    hex::encode(Sha256::digest(seed.as_bytes()))
}

fn args(operation: &str, payload: Value) -> Vec<String> {
    vec![operation.to_string(), payload.to_string()]
}

fn invoke_ok(store: &mut MemStore, creator: &str, operation: &str, payload: Value) -> InvokeResponse {
    let response = run(store, creator, &args(operation, payload));
    assert_eq!(
        response.status, 200,
        "{operation} failed: {}",
        response.payload
    );
    response
}

fn algo_payload(key: &str) -> Value {
    json!({
        "key": key,
        "name": "logistic regression",
        "checksum": checksum("algo"),
        "storage_address": "https://assets.test/algo/file",
        "description_checksum": checksum("algo description"),
        "description_storage_address": "https://assets.test/algo/description",
        "permissions": {"process": {"public": true, "authorized_ids": []}},
    })
}

/// Nodes, dataset with train and test samples, objective and algo.
fn register_catalog(store: &mut MemStore) {
    run(store, WORKER_A, &["registerNode".to_string()]);
    run(store, WORKER_B, &["registerNode".to_string()]);
    invoke_ok(
        store,
        WORKER_A,
        "registerDataManager",
        json!({
            "key": DATA_MANAGER_KEY,
            "name": "liver slides",
            "opener_checksum": checksum("opener"),
            "opener_storage_address": "https://assets.test/dm/opener",
            "type": "images",
            "description_checksum": checksum("dm description"),
            "description_storage_address": "https://assets.test/dm/description",
            "permissions": {"process": {"public": true, "authorized_ids": []}},
        }),
    );
    invoke_ok(
        store,
        WORKER_A,
        "registerDataSample",
        json!({
            "keys": [TRAIN_SAMPLE_1, TRAIN_SAMPLE_2],
            "data_manager_keys": [DATA_MANAGER_KEY],
            "test_only": false,
        }),
    );
    invoke_ok(
        store,
        WORKER_A,
        "registerDataSample",
        json!({
            "keys": [TEST_SAMPLE_1, TEST_SAMPLE_2],
            "data_manager_keys": [DATA_MANAGER_KEY],
            "test_only": true,
        }),
    );
    invoke_ok(
        store,
        WORKER_A,
        "registerObjective",
        json!({
            "key": OBJECTIVE_KEY,
            "name": "MSI classification",
            "description_checksum": checksum("objective description"),
            "description_storage_address": "https://assets.test/objective/description",
            "metrics_name": "accuracy",
            "metrics_checksum": checksum("metrics"),
            "metrics_storage_address": "https://assets.test/objective/metrics",
            "test_dataset": {
                "data_manager_key": DATA_MANAGER_KEY,
                "data_sample_keys": [TEST_SAMPLE_1, TEST_SAMPLE_2],
            },
            "permissions": {"process": {"public": true, "authorized_ids": []}},
        }),
    );
    invoke_ok(store, WORKER_A, "registerAlgo", algo_payload(ALGO_KEY));
}

fn create_traintuple(store: &mut MemStore, key: &str, tag: &str) {
    invoke_ok(
        store,
        WORKER_A,
        "createTraintuple",
        json!({
            "key": key,
            "algo_key": ALGO_KEY,
            "data_manager_key": DATA_MANAGER_KEY,
            "data_sample_keys": [TRAIN_SAMPLE_1, TRAIN_SAMPLE_2],
            "tag": tag,
        }),
    );
}

fn traintuple_to_done(store: &mut MemStore, key: &str, model_key: &str) {
    invoke_ok(store, WORKER_A, "logStartTrain", json!({"key": key}));
    invoke_ok(
        store,
        WORKER_A,
        "logSuccessTrain",
        json!({
            "key": key,
            "log": "train done",
            "out_model": {
                "key": model_key,
                "checksum": checksum("model"),
                "storage_address": "https://models.test/out",
            },
        }),
    );
}

#[test]
fn register_then_query_returns_equal_fields() {
    let mut store = MemStore::new();
    register_catalog(&mut store);

    let response = invoke_ok(&mut store, WORKER_A, "queryAlgo", json!({"key": ALGO_KEY}));
    assert_eq!(response.payload["key"], ALGO_KEY);
    assert_eq!(response.payload["name"], "logistic regression");
    assert_eq!(response.payload["checksum"], checksum("algo"));
    assert_eq!(response.payload["owner"], WORKER_A);
    assert_eq!(response.payload["permissions"]["process"]["public"], true);

    let listing = invoke_ok(&mut store, WORKER_A, "queryAlgos", json!({"bookmark": ""}));
    assert_eq!(listing.payload["results"].as_array().map(Vec::len), Some(1));
    assert_eq!(listing.payload["bookmark"], "");
}

#[test]
fn dataset_view_splits_train_and_test_samples() {
    let mut store = MemStore::new();
    register_catalog(&mut store);

    let response = invoke_ok(
        &mut store,
        WORKER_A,
        "queryDataset",
        json!({"key": DATA_MANAGER_KEY}),
    );
    let train: Vec<&str> = response.payload["train_data_sample_keys"]
        .as_array()
        .expect("train keys")
        .iter()
        .filter_map(Value::as_str)
        .collect();
    let test: Vec<&str> = response.payload["test_data_sample_keys"]
        .as_array()
        .expect("test keys")
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert_eq!(train, [TRAIN_SAMPLE_1, TRAIN_SAMPLE_2]);
    assert_eq!(test, [TEST_SAMPLE_1, TEST_SAMPLE_2]);
}

#[test]
fn tuple_creation_emits_an_event_and_conflicts_echo_the_key() {
    let mut store = MemStore::new();
    register_catalog(&mut store);

    let response = run(
        &mut store,
        WORKER_A,
        &args(
            "createTraintuple",
            json!({
                "key": TRAINTUPLE_KEY,
                "algo_key": ALGO_KEY,
                "data_manager_key": DATA_MANAGER_KEY,
                "data_sample_keys": [TRAIN_SAMPLE_1],
            }),
        ),
    );
    assert_eq!(response.status, 200, "{}", response.payload);
    assert_eq!(response.payload["key"], TRAINTUPLE_KEY);
    assert_eq!(response.events.tuples, vec![TRAINTUPLE_KEY.to_string()]);

    let conflict = run(
        &mut store,
        WORKER_A,
        &args(
            "createTraintuple",
            json!({
                "key": TRAINTUPLE_KEY,
                "algo_key": ALGO_KEY,
                "data_manager_key": DATA_MANAGER_KEY,
                "data_sample_keys": [TRAIN_SAMPLE_1],
            }),
        ),
    );
    assert_eq!(conflict.status, 409);
    assert_eq!(conflict.payload["kind"], "conflict");
    assert_eq!(conflict.payload["key"], TRAINTUPLE_KEY);
    assert!(conflict.events.tuples.is_empty());
}

#[test]
fn certified_testtuple_runs_against_the_objective_dataset() {
    let mut store = MemStore::new();
    register_catalog(&mut store);
    create_traintuple(&mut store, TRAINTUPLE_KEY, "");
    traintuple_to_done(&mut store, TRAINTUPLE_KEY, MODEL_KEY);

    let response = invoke_ok(
        &mut store,
        WORKER_A,
        "createTesttuple",
        json!({
            "key": TESTTUPLE_KEY,
            "traintuple_key": TRAINTUPLE_KEY,
            "objective_key": OBJECTIVE_KEY,
        }),
    );
    assert_eq!(response.payload["key"], TESTTUPLE_KEY);

    let view = invoke_ok(
        &mut store,
        WORKER_A,
        "queryTesttuple",
        json!({"key": TESTTUPLE_KEY}),
    );
    assert_eq!(view.payload["certified"], true);
    assert_eq!(view.payload["status"], "todo");
    assert_eq!(view.payload["algo"]["key"], ALGO_KEY);
    assert_eq!(view.payload["dataset"]["opener_checksum"], checksum("opener"));

    invoke_ok(&mut store, WORKER_A, "logStartTest", json!({"key": TESTTUPLE_KEY}));
    invoke_ok(
        &mut store,
        WORKER_A,
        "logSuccessTest",
        json!({"key": TESTTUPLE_KEY, "log": "", "perf": 0.91}),
    );
    let view = invoke_ok(
        &mut store,
        WORKER_A,
        "queryTesttuple",
        json!({"key": TESTTUPLE_KEY}),
    );
    assert_eq!(view.payload["status"], "done");
    let perf = view.payload["dataset"]["perf"].as_f64().expect("perf");
    assert!((perf - 0.91).abs() < 1e-6);
}

#[test]
fn testtuple_with_train_samples_is_rejected() {
    let mut store = MemStore::new();
    register_catalog(&mut store);
    create_traintuple(&mut store, TRAINTUPLE_KEY, "");

    let response = run(
        &mut store,
        WORKER_A,
        &args(
            "createTesttuple",
            json!({
                "key": TESTTUPLE_KEY,
                "traintuple_key": TRAINTUPLE_KEY,
                "objective_key": OBJECTIVE_KEY,
                "data_manager_key": DATA_MANAGER_KEY,
                "data_sample_keys": [TRAIN_SAMPLE_1],
            }),
        ),
    );
    assert_eq!(response.status, 400);
    assert_eq!(response.payload["kind"], "bad_request");
}

#[test]
fn uncertified_testtuple_on_a_subset_of_the_test_dataset() {
    let mut store = MemStore::new();
    register_catalog(&mut store);
    create_traintuple(&mut store, TRAINTUPLE_KEY, "");
    traintuple_to_done(&mut store, TRAINTUPLE_KEY, MODEL_KEY);

    invoke_ok(
        &mut store,
        WORKER_A,
        "createTesttuple",
        json!({
            "key": TESTTUPLE_KEY,
            "traintuple_key": TRAINTUPLE_KEY,
            "objective_key": OBJECTIVE_KEY,
            "data_manager_key": DATA_MANAGER_KEY,
            "data_sample_keys": [TEST_SAMPLE_1],
        }),
    );
    let view = invoke_ok(
        &mut store,
        WORKER_A,
        "queryTesttuple",
        json!({"key": TESTTUPLE_KEY}),
    );
    assert_eq!(view.payload["certified"], false);
}

#[test]
fn filter_lists_tuples_by_worker_and_status_and_by_tag() {
    let mut store = MemStore::new();
    register_catalog(&mut store);
    create_traintuple(&mut store, TRAINTUPLE_KEY, "experiment v0");

    let by_status = invoke_ok(
        &mut store,
        WORKER_A,
        "queryFilter",
        json!({
            "index_name": "traintuple~worker~status",
            "attributes": format!("{WORKER_A}, todo"),
        }),
    );
    let results = by_status.payload.as_array().expect("array");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["key"], TRAINTUPLE_KEY);
    assert_eq!(results[0]["status"], "todo");

    let by_tag = invoke_ok(
        &mut store,
        WORKER_A,
        "queryFilter",
        json!({
            "index_name": "traintuple~tag",
            "attributes": "experiment v0",
        }),
    );
    assert_eq!(by_tag.payload.as_array().map(Vec::len), Some(1));

    let unknown = run(
        &mut store,
        WORKER_A,
        &args(
            "queryFilter",
            json!({"index_name": "objective~bogus", "attributes": ""}),
        ),
    );
    assert_eq!(unknown.status, 400);
}

#[test]
fn model_views_resolve_the_producing_tuple() {
    let mut store = MemStore::new();
    register_catalog(&mut store);
    create_traintuple(&mut store, TRAINTUPLE_KEY, "");
    traintuple_to_done(&mut store, TRAINTUPLE_KEY, MODEL_KEY);
    invoke_ok(
        &mut store,
        WORKER_A,
        "createTesttuple",
        json!({
            "key": TESTTUPLE_KEY,
            "traintuple_key": TRAINTUPLE_KEY,
            "objective_key": OBJECTIVE_KEY,
        }),
    );

    let model = invoke_ok(&mut store, WORKER_A, "queryModel", json!({"key": MODEL_KEY}));
    assert_eq!(model.payload["owner"], WORKER_A);
    assert_eq!(model.payload["traintuple_key"], TRAINTUPLE_KEY);

    let models = invoke_ok(&mut store, WORKER_A, "queryModels", json!({"bookmark": ""}));
    let results = models.payload["results"].as_array().expect("results");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["traintuple"]["key"], TRAINTUPLE_KEY);
    assert_eq!(results[0]["traintuple"]["out_model"]["key"], MODEL_KEY);

    let details = invoke_ok(
        &mut store,
        WORKER_A,
        "queryModelDetails",
        json!({"key": TRAINTUPLE_KEY}),
    );
    assert_eq!(details.payload["traintuple"]["key"], TRAINTUPLE_KEY);
    let testtuples = details.payload["testtuples"].as_array().expect("testtuples");
    assert_eq!(testtuples.len(), 1);
    assert_eq!(testtuples[0]["key"], TESTTUPLE_KEY);
}

#[test]
fn malformed_payloads_and_unknown_operations_are_bad_requests() {
    let mut store = MemStore::new();
    register_catalog(&mut store);

    let unknown = run(&mut store, WORKER_A, &["frobnicate".to_string()]);
    assert_eq!(unknown.status, 400);
    assert_eq!(unknown.payload["kind"], "bad_request");

    let garbled = run(
        &mut store,
        WORKER_A,
        &["queryAlgo".to_string(), "{not json".to_string()],
    );
    assert_eq!(garbled.status, 400);

    let unknown_field = run(
        &mut store,
        WORKER_A,
        &args("queryAlgo", json!({"key": ALGO_KEY, "bogus": 1})),
    );
    assert_eq!(unknown_field.status, 400);

    let missing = run(
        &mut store,
        WORKER_A,
        &args("queryAlgo", json!({"key": "00000000-0000-0000-0000-000000000000"})),
    );
    assert_eq!(missing.status, 404);
    assert_eq!(missing.payload["kind"], "not_found");
}

#[test]
fn foreign_worker_cannot_drive_the_lifecycle() {
    let mut store = MemStore::new();
    register_catalog(&mut store);
    create_traintuple(&mut store, TRAINTUPLE_KEY, "");

    let response = run(
        &mut store,
        WORKER_B,
        &args("logStartTrain", json!({"key": TRAINTUPLE_KEY})),
    );
    assert_eq!(response.status, 403);
    assert_eq!(response.payload["kind"], "forbidden");

    // Terminal tuples reject further log operations.
    traintuple_to_done(&mut store, TRAINTUPLE_KEY, MODEL_KEY);
    let response = run(
        &mut store,
        WORKER_A,
        &args("logStartTrain", json!({"key": TRAINTUPLE_KEY})),
    );
    assert_eq!(response.status, 400);
}

#[test]
fn plan_created_and_canceled_through_the_contract() {
    let mut store = MemStore::new();
    register_catalog(&mut store);
    let plan_key = "09111111-aaaa-bbbb-cccc-000000000001";
    let t1 = "09111111-aaaa-bbbb-cccc-000000000002";
    let t2 = "09111111-aaaa-bbbb-cccc-000000000003";

    let created = invoke_ok(
        &mut store,
        WORKER_A,
        "createComputePlan",
        json!({
            "key": plan_key,
            "traintuples": [
                {
                    "key": t1,
                    "id": "root",
                    "algo_key": ALGO_KEY,
                    "data_manager_key": DATA_MANAGER_KEY,
                    "data_sample_keys": [TRAIN_SAMPLE_1],
                },
                {
                    "key": t2,
                    "id": "child",
                    "algo_key": ALGO_KEY,
                    "data_manager_key": DATA_MANAGER_KEY,
                    "data_sample_keys": [TRAIN_SAMPLE_2],
                    "in_models_ids": ["root"],
                },
            ],
            "testtuples": [],
        }),
    );
    assert_eq!(created.payload["status"], "todo");
    assert_eq!(created.payload["testtuple_keys"].as_array().map(Vec::len), Some(0));

    let canceled = invoke_ok(
        &mut store,
        WORKER_A,
        "cancelComputePlan",
        json!({"key": plan_key}),
    );
    assert_eq!(canceled.payload["status"], "canceled");

    let t1_view = invoke_ok(&mut store, WORKER_A, "queryTraintuple", json!({"key": t1}));
    assert_eq!(t1_view.payload["status"], "aborted");
    let t2_view = invoke_ok(&mut store, WORKER_A, "queryTraintuple", json!({"key": t2}));
    assert_eq!(t2_view.payload["status"], "aborted");
}
