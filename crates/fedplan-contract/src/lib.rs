// Copyright (c) 2026 Fedplan Contributors
// SPDX-License-Identifier: Apache-2.0

//! fedplan-contract
//!
//! The invocation surface of the fedplan core. The host hands every
//! transaction an ordered list of string arguments: the operation name,
//! then (for most operations) one JSON document holding the operation's
//! input record. This crate decodes the arguments, dispatches into
//! `fedplan-core`, and encodes the JSON response or the structured error
//! with its stable numeric status code.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use fedplan_core::error::{LedgerError, LedgerResult};
use fedplan_core::input::{
    InputAggregatetuple, InputAlgo, InputBookmark, InputComputePlan, InputCompositeTraintuple,
    InputDataManager, InputDataSample, InputKey, InputLog, InputLogSuccessCompositeTrain,
    InputLogSuccessTest, InputLogSuccessTrain, InputObjective, InputQueryFilter, InputTesttuple,
    InputTraintuple, InputUpdateComputePlan, InputUpdateDataManager, InputUpdateDataSample,
};
use fedplan_core::ledger::{LedgerDb, LedgerStore, TupleEvents};
use fedplan_core::{
    aggregatetuple, algo, composite, compute_plan, data, filter, model, objective, permissions,
    testtuple, traintuple,
};

/// Result of one transaction, ready for the host: numeric status, JSON
/// payload (the response or the structured error) and the emitted events.
#[derive(Debug)]
pub struct InvokeResponse {
    pub status: u16,
    pub payload: Value,
    pub events: TupleEvents,
}

/// Run one operation as its own transaction against the store.
pub fn run<S: LedgerStore>(store: &mut S, creator: &str, args: &[String]) -> InvokeResponse {
    let mut db = LedgerDb::new(store, creator);
    match invoke(&mut db, args) {
        Ok(payload) => InvokeResponse {
            status: 200,
            payload,
            events: db.take_events(),
        },
        Err(err) => InvokeResponse {
            status: err.status(),
            payload: error_payload(&err),
            events: TupleEvents::default(),
        },
    }
}

/// Structured error document: `{kind, message, key?/keys?}`.
pub fn error_payload(err: &LedgerError) -> Value {
    let mut payload = json!({
        "kind": err.kind().as_str(),
        "message": err.to_string(),
    });
    let keys = err.keys();
    if let Some(map) = payload.as_object_mut() {
        match keys {
            [] => {}
            [key] => {
                map.insert("key".to_string(), json!(key));
            }
            many => {
                map.insert("keys".to_string(), json!(many));
            }
        }
    }
    payload
}

/// Dispatch one operation by name.
pub fn invoke<S: LedgerStore>(db: &mut LedgerDb<'_, S>, args: &[String]) -> LedgerResult<Value> {
    let operation = args
        .first()
        .ok_or_else(|| LedgerError::bad_request("missing operation name"))?
        .as_str();
    let rest = &args[1..];

    match operation {
        // catalog
        "registerNode" => to_value(permissions::register_node(db)?),
        "queryNodes" => to_value(permissions::query_nodes(db)?),
        "registerAlgo" => {
            let inp: InputAlgo = decode(rest)?;
            key_payload(algo::register_algo(db, &inp)?)
        }
        "registerCompositeAlgo" => {
            let inp: InputAlgo = decode(rest)?;
            key_payload(algo::register_composite_algo(db, &inp)?)
        }
        "registerAggregateAlgo" => {
            let inp: InputAlgo = decode(rest)?;
            key_payload(algo::register_aggregate_algo(db, &inp)?)
        }
        "registerObjective" => {
            let inp: InputObjective = decode(rest)?;
            key_payload(objective::register_objective(db, &inp)?)
        }
        "registerDataManager" => {
            let inp: InputDataManager = decode(rest)?;
            key_payload(data::register_data_manager(db, &inp)?)
        }
        "registerDataSample" => {
            let inp: InputDataSample = decode(rest)?;
            to_value(data::register_data_sample(db, &inp)?)
        }
        "updateDataSample" => {
            let inp: InputUpdateDataSample = decode(rest)?;
            to_value(data::update_data_sample(db, &inp)?)
        }
        "updateDataManager" => {
            let inp: InputUpdateDataManager = decode(rest)?;
            key_payload(data::update_data_manager(db, &inp)?)
        }

        // plan and tuple creation
        "createComputePlan" => {
            let inp: InputComputePlan = decode(rest)?;
            to_value(compute_plan::create_compute_plan(db, &inp)?)
        }
        "updateComputePlan" => {
            let inp: InputUpdateComputePlan = decode(rest)?;
            to_value(compute_plan::update_compute_plan(db, &inp)?)
        }
        "cancelComputePlan" => {
            let inp: InputKey = decode(rest)?;
            to_value(compute_plan::cancel_compute_plan(db, &inp)?)
        }
        "createTraintuple" => {
            let inp: InputTraintuple = decode(rest)?;
            key_payload(traintuple::create_traintuple(db, &inp)?)
        }
        "createCompositeTraintuple" => {
            let inp: InputCompositeTraintuple = decode(rest)?;
            key_payload(composite::create_composite_traintuple(db, &inp)?)
        }
        "createAggregatetuple" => {
            let inp: InputAggregatetuple = decode(rest)?;
            key_payload(aggregatetuple::create_aggregatetuple(db, &inp)?)
        }
        "createTesttuple" => {
            let inp: InputTesttuple = decode(rest)?;
            key_payload(testtuple::create_testtuple(db, &inp)?)
        }

        // lifecycle logs
        "logStartTrain" => {
            let inp: InputKey = decode(rest)?;
            to_value(traintuple::log_start_train(db, &inp)?)
        }
        "logStartCompositeTrain" => {
            let inp: InputKey = decode(rest)?;
            to_value(composite::log_start_composite_train(db, &inp)?)
        }
        "logStartAggregate" => {
            let inp: InputKey = decode(rest)?;
            to_value(aggregatetuple::log_start_aggregate(db, &inp)?)
        }
        "logStartTest" => {
            let inp: InputKey = decode(rest)?;
            to_value(testtuple::log_start_test(db, &inp)?)
        }
        "logSuccessTrain" => {
            let inp: InputLogSuccessTrain = decode(rest)?;
            to_value(traintuple::log_success_train(db, &inp)?)
        }
        "logSuccessCompositeTrain" => {
            let inp: InputLogSuccessCompositeTrain = decode(rest)?;
            to_value(composite::log_success_composite_train(db, &inp)?)
        }
        "logSuccessAggregate" => {
            let inp: InputLogSuccessTrain = decode(rest)?;
            to_value(aggregatetuple::log_success_aggregate(db, &inp)?)
        }
        "logSuccessTest" => {
            let inp: InputLogSuccessTest = decode(rest)?;
            to_value(testtuple::log_success_test(db, &inp)?)
        }
        "logFailTrain" => {
            let inp: InputLog = decode(rest)?;
            to_value(traintuple::log_fail_train(db, &inp)?)
        }
        "logFailCompositeTrain" => {
            let inp: InputLog = decode(rest)?;
            to_value(composite::log_fail_composite_train(db, &inp)?)
        }
        "logFailAggregate" => {
            let inp: InputLog = decode(rest)?;
            to_value(aggregatetuple::log_fail_aggregate(db, &inp)?)
        }
        "logFailTest" => {
            let inp: InputLog = decode(rest)?;
            to_value(testtuple::log_fail_test(db, &inp)?)
        }

        // queries
        "queryAlgo" => {
            let inp: InputKey = decode(rest)?;
            to_value(algo::query_algo(db, &inp)?)
        }
        "queryAlgos" => {
            let inp = decode_bookmark(rest)?;
            listing(algo::query_algos(db, &inp)?)
        }
        "queryCompositeAlgo" => {
            let inp: InputKey = decode(rest)?;
            to_value(algo::query_composite_algo(db, &inp)?)
        }
        "queryCompositeAlgos" => {
            let inp = decode_bookmark(rest)?;
            listing(algo::query_composite_algos(db, &inp)?)
        }
        "queryAggregateAlgo" => {
            let inp: InputKey = decode(rest)?;
            to_value(algo::query_aggregate_algo(db, &inp)?)
        }
        "queryAggregateAlgos" => {
            let inp = decode_bookmark(rest)?;
            listing(algo::query_aggregate_algos(db, &inp)?)
        }
        "queryObjective" => {
            let inp: InputKey = decode(rest)?;
            to_value(objective::query_objective(db, &inp)?)
        }
        "queryObjectives" => {
            let inp = decode_bookmark(rest)?;
            listing(objective::query_objectives(db, &inp)?)
        }
        "queryDataManager" => {
            let inp: InputKey = decode(rest)?;
            to_value(data::query_data_manager(db, &inp)?)
        }
        "queryDataManagers" => {
            let inp = decode_bookmark(rest)?;
            listing(data::query_data_managers(db, &inp)?)
        }
        "queryDataSamples" => {
            let inp = decode_bookmark(rest)?;
            listing(data::query_data_samples(db, &inp)?)
        }
        "queryDataset" => {
            let inp: InputKey = decode(rest)?;
            to_value(data::query_dataset(db, &inp)?)
        }
        "queryTraintuple" => {
            let inp: InputKey = decode(rest)?;
            to_value(traintuple::query_traintuple(db, &inp)?)
        }
        "queryTraintuples" => {
            let inp = decode_bookmark(rest)?;
            listing(traintuple::query_traintuples(db, &inp)?)
        }
        "queryCompositeTraintuple" => {
            let inp: InputKey = decode(rest)?;
            to_value(composite::query_composite_traintuple(db, &inp)?)
        }
        "queryCompositeTraintuples" => {
            let inp = decode_bookmark(rest)?;
            listing(composite::query_composite_traintuples(db, &inp)?)
        }
        "queryAggregatetuple" => {
            let inp: InputKey = decode(rest)?;
            to_value(aggregatetuple::query_aggregatetuple(db, &inp)?)
        }
        "queryAggregatetuples" => {
            let inp = decode_bookmark(rest)?;
            listing(aggregatetuple::query_aggregatetuples(db, &inp)?)
        }
        "queryTesttuple" => {
            let inp: InputKey = decode(rest)?;
            to_value(testtuple::query_testtuple(db, &inp)?)
        }
        "queryTesttuples" => {
            let inp = decode_bookmark(rest)?;
            listing(testtuple::query_testtuples(db, &inp)?)
        }
        "queryComputePlan" => {
            let inp: InputKey = decode(rest)?;
            to_value(compute_plan::query_compute_plan(db, &inp)?)
        }
        "queryComputePlans" => {
            let inp = decode_bookmark(rest)?;
            listing(compute_plan::query_compute_plans(db, &inp)?)
        }
        "queryModel" => {
            let inp: InputKey = decode(rest)?;
            to_value(model::query_model(db, &inp)?)
        }
        "queryModels" => {
            let inp = decode_bookmark(rest)?;
            listing(model::query_models(db, &inp)?)
        }
        "queryModelDetails" => {
            let inp: InputKey = decode(rest)?;
            to_value(model::query_model_details(db, &inp)?)
        }
        "queryFilter" => {
            let inp: InputQueryFilter = decode(rest)?;
            to_value(filter::query_filter(db, &inp)?)
        }

        other => Err(LedgerError::bad_request(format!(
            "operation {other} does not exist"
        ))),
    }
}

/// Decode the single JSON payload argument; unknown fields are rejected.
fn decode<T: DeserializeOwned>(args: &[String]) -> LedgerResult<T> {
    if args.len() != 1 {
        return Err(LedgerError::bad_request(format!(
            "incorrect number of arguments, expecting one, got {}",
            args.len()
        )));
    }
    serde_json::from_str(&args[0])
        .map_err(|err| LedgerError::bad_request(format!("invalid payload: {err}")))
}

/// Listing operations accept no payload, or a bookmark document.
fn decode_bookmark(args: &[String]) -> LedgerResult<InputBookmark> {
    match args {
        [] => Ok(InputBookmark::default()),
        [payload] if payload.is_empty() => Ok(InputBookmark::default()),
        [payload] => serde_json::from_str(payload)
            .map_err(|err| LedgerError::bad_request(format!("invalid payload: {err}"))),
        _ => Err(LedgerError::bad_request(
            "incorrect number of arguments, expecting at most one argument",
        )),
    }
}

fn to_value<T: Serialize>(value: T) -> LedgerResult<Value> {
    serde_json::to_value(value)
        .map_err(|err| LedgerError::internal(format!("could not encode response: {err}")))
}

fn key_payload(key: String) -> LedgerResult<Value> {
    Ok(json!({ "key": key }))
}

fn listing<T: Serialize>((results, bookmark): (Vec<T>, String)) -> LedgerResult<Value> {
    Ok(json!({
        "results": to_value(results)?,
        "bookmark": bookmark,
    }))
}
