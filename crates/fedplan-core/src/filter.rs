// Copyright (c) 2026 Fedplan Contributors
// SPDX-License-Identifier: Apache-2.0

//! `queryFilter`: listings over a whitelisted set of secondary indices,
//! filtered by comma-separated attribute values.

use serde_json::Value;

use crate::error::{LedgerError, LedgerResult};
use crate::input::InputQueryFilter;
use crate::ledger::{LedgerDb, LedgerStore};
use crate::output::OutputComputePlan;
use crate::{aggregatetuple, composite, compute_plan, testtuple, traintuple};

#[derive(Clone, Copy)]
enum FilterFamily {
    Traintuple,
    CompositeTraintuple,
    Aggregatetuple,
    Testtuple,
    ComputePlan,
}

pub fn query_filter<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    inp: &InputQueryFilter,
) -> LedgerResult<Vec<Value>> {
    let (index_name, object, family) = match inp.index_name.as_str() {
        "traintuple~worker~status" => (
            traintuple::TRAINTUPLE_WORKER_STATUS_INDEX,
            "traintuple",
            FilterFamily::Traintuple,
        ),
        "traintuple~tag" => (
            traintuple::TRAINTUPLE_TAG_INDEX,
            "traintuple",
            FilterFamily::Traintuple,
        ),
        "compositeTraintuple~worker~status" => (
            composite::COMPOSITE_WORKER_STATUS_INDEX,
            "compositeTraintuple",
            FilterFamily::CompositeTraintuple,
        ),
        "aggregatetuple~worker~status" => (
            aggregatetuple::AGGREGATETUPLE_WORKER_STATUS_INDEX,
            "aggregatetuple",
            FilterFamily::Aggregatetuple,
        ),
        "testtuple~worker~status" => (
            testtuple::TESTTUPLE_WORKER_STATUS_INDEX,
            "testtuple",
            FilterFamily::Testtuple,
        ),
        "testtuple~tag" => (
            testtuple::TESTTUPLE_TAG_INDEX,
            "testtuple",
            FilterFamily::Testtuple,
        ),
        "computePlan~tag" => (
            compute_plan::COMPUTE_PLAN_TAG_INDEX,
            "computePlan",
            FilterFamily::ComputePlan,
        ),
        other => {
            return Err(LedgerError::bad_request(format!(
                "filter {other} is not implemented"
            )))
        }
    };

    let attributes: Vec<String> = inp
        .attributes
        .split(", ")
        .map(str::to_string)
        .filter(|a| !a.is_empty())
        .collect();
    let mut partial: Vec<&str> = vec![object];
    partial.extend(attributes.iter().map(String::as_str));
    let keys = db.get_index_keys(index_name, &partial)?;

    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        let value = match family {
            FilterFamily::Traintuple => to_value(traintuple::get_output_traintuple(db, &key)?)?,
            FilterFamily::CompositeTraintuple => {
                to_value(composite::get_output_composite_traintuple(db, &key)?)?
            }
            FilterFamily::Aggregatetuple => {
                to_value(aggregatetuple::get_output_aggregatetuple(db, &key)?)?
            }
            FilterFamily::Testtuple => to_value(testtuple::get_output_testtuple(db, &key)?)?,
            FilterFamily::ComputePlan => {
                let plan = db.get_compute_plan(&key)?;
                to_value(OutputComputePlan::fill(db, &plan)?)?
            }
        };
        out.push(value);
    }
    Ok(out)
}

fn to_value<T: serde::Serialize>(value: T) -> LedgerResult<Value> {
    serde_json::to_value(value)
        .map_err(|err| LedgerError::internal(format!("could not encode filter result: {err}")))
}
