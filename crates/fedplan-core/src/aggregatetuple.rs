// Copyright (c) 2026 Fedplan Contributors
// SPDX-License-Identifier: Apache-2.0

//! Aggregatetuples: training tasks that combine parent models without a
//! dataset of their own. The executing worker comes from the request.

use crate::assets::{Aggregatetuple, AssetType, KeyChecksumAddress, Status};
use crate::compute_plan;
use crate::error::{LedgerError, LedgerResult};
use crate::input::{InputAggregatetuple, InputBookmark, InputKey, InputLog, InputLogSuccessTrain};
use crate::ledger::{LedgerDb, LedgerStore, OUTPUT_PAGE_SIZE};
use crate::output::OutputAggregatetuple;
use crate::permissions::merge_permissions;
use crate::tuple::{
    self, create_model_index, determine_status_from_in_models, validate_tuple_owner,
    UpdateDecision, TUPLE_IN_MODEL_INDEX,
};

pub const AGGREGATETUPLE_WORKER_STATUS_INDEX: &str = "aggregatetuple~worker~status~key";
pub const AGGREGATETUPLE_ALGO_INDEX: &str = "aggregatetuple~algo~key";
pub const AGGREGATETUPLE_TAG_INDEX: &str = "aggregatetuple~tag~key";

pub fn create_aggregatetuple<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    inp: &InputAggregatetuple,
) -> LedgerResult<String> {
    inp.validate()?;
    create_aggregatetuple_internal(db, inp, true)
}

pub(crate) fn create_aggregatetuple_internal<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    inp: &InputAggregatetuple,
    check_plan_availability: bool,
) -> LedgerResult<String> {
    let creator = db.creator().to_string();

    let algo = db.get_aggregate_algo(&inp.algo_key).map_err(|err| {
        LedgerError::bad_request(format!("could not retrieve aggregate algo: {err}"))
    })?;
    if !algo.permissions.can_process(&algo.owner, &creator) {
        return Err(LedgerError::forbidden(format!(
            "not authorized to process algo {}",
            inp.algo_key
        )));
    }

    // The out-model merges every parent model, so its permissions are the
    // intersection of the algo's with each parent's.
    let mut permissions = algo.permissions.clone();
    let mut parent_statuses = Vec::with_capacity(inp.in_models.len());
    for parent_key in &inp.in_models {
        let parent = db.get_generic_tuple(parent_key).map_err(|err| {
            LedgerError::bad_request(format!(
                "could not retrieve parent tuple with key {parent_key}: {err}"
            ))
        })?;
        parent_statuses.push(parent.status);
        permissions = merge_permissions(&permissions, &parent.permissions);
    }
    let status = determine_status_from_in_models(&parent_statuses);

    if db.key_exists(&inp.key) {
        return Err(LedgerError::conflict(
            "aggregatetuple already exists",
            &inp.key,
        ));
    }

    let (rank, compute_plan_key) = compute_plan::attach_tuple_to_plan(
        db,
        inp.rank,
        inp.compute_plan_key.as_deref(),
        AssetType::Aggregatetuple,
        &inp.key,
        status,
        &inp.worker,
        check_plan_availability,
    )?;

    let tuple = Aggregatetuple {
        key: inp.key.clone(),
        asset_type: AssetType::Aggregatetuple,
        algo_key: inp.algo_key.clone(),
        compute_plan_key,
        creator,
        log: String::new(),
        metadata: inp.metadata.clone(),
        rank,
        status,
        tag: inp.tag.clone(),
        in_model_keys: inp.in_models.clone(),
        out_model: None,
        permissions,
        worker: inp.worker.clone(),
    };
    save(db, &tuple)?;
    db.add_tuple_event(&tuple.key);
    Ok(tuple.key)
}

fn save<S: LedgerStore>(db: &mut LedgerDb<'_, S>, tuple: &Aggregatetuple) -> LedgerResult<()> {
    db.add(&tuple.key, tuple)?;
    db.create_index(
        AGGREGATETUPLE_ALGO_INDEX,
        &["aggregatetuple", &tuple.algo_key, &tuple.key],
    )?;
    db.create_index(
        AGGREGATETUPLE_WORKER_STATUS_INDEX,
        &[
            "aggregatetuple",
            &tuple.worker,
            tuple.status.as_str(),
            &tuple.key,
        ],
    )?;
    for in_model_key in &tuple.in_model_keys {
        db.create_index(TUPLE_IN_MODEL_INDEX, &["tuple", in_model_key, &tuple.key])?;
    }
    if let Some(plan_key) = &tuple.compute_plan_key {
        db.create_index(
            compute_plan::COMPUTE_PLAN_RANK_INDEX,
            &[
                "computePlan",
                plan_key,
                &tuple.worker,
                &tuple.rank.to_string(),
                &tuple.key,
            ],
        )?;
    }
    if !tuple.tag.is_empty() {
        db.create_index(
            AGGREGATETUPLE_TAG_INDEX,
            &["aggregatetuple", &tuple.tag, &tuple.key],
        )?;
    }
    Ok(())
}

pub(crate) fn commit_status_update<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    key: &str,
    tuple: &mut Aggregatetuple,
    new_status: Status,
) -> LedgerResult<()> {
    match tuple::prepare_status_update(tuple.status, new_status)? {
        UpdateDecision::Skip => return Ok(()),
        UpdateDecision::Apply => {}
    }
    let old_status = tuple.status;
    tuple.status = new_status;
    db.put(key, tuple)?;
    db.update_index(
        AGGREGATETUPLE_WORKER_STATUS_INDEX,
        &["aggregatetuple", &tuple.worker, old_status.as_str(), key],
        &["aggregatetuple", &tuple.worker, new_status.as_str(), key],
    )?;
    compute_plan::update_compute_plan_state(
        db,
        tuple.compute_plan_key.as_deref(),
        key,
        new_status,
        &tuple.worker,
    )?;
    tracing::info!(
        target: "fedplan.lifecycle",
        key,
        from = %old_status,
        to = %new_status,
        "aggregatetuple status updated"
    );
    Ok(())
}

pub(crate) fn abort_if_pending<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    key: &str,
) -> LedgerResult<bool> {
    let mut tuple = db.get_aggregatetuple(key)?;
    if !matches!(tuple.status, Status::Waiting | Status::Todo) {
        return Ok(false);
    }
    let old_status = tuple.status;
    tuple.status = Status::Aborted;
    db.put(key, &tuple)?;
    db.update_index(
        AGGREGATETUPLE_WORKER_STATUS_INDEX,
        &["aggregatetuple", &tuple.worker, old_status.as_str(), key],
        &["aggregatetuple", &tuple.worker, Status::Aborted.as_str(), key],
    )?;
    compute_plan::update_compute_plan_state(
        db,
        tuple.compute_plan_key.as_deref(),
        key,
        Status::Aborted,
        &tuple.worker,
    )?;
    tracing::info!(
        target: "fedplan.lifecycle",
        key,
        from = %old_status,
        to = %Status::Aborted,
        "aggregatetuple aborted by plan cancellation"
    );
    Ok(true)
}

pub fn log_start_aggregate<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    inp: &InputKey,
) -> LedgerResult<OutputAggregatetuple> {
    inp.validate()?;
    let mut tuple = db.get_aggregatetuple(&inp.key)?;
    validate_tuple_owner(db, &tuple.worker)?;
    commit_status_update(db, &inp.key, &mut tuple, Status::Doing)?;
    OutputAggregatetuple::fill(db, &tuple)
}

pub fn log_success_aggregate<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    inp: &InputLogSuccessTrain,
) -> LedgerResult<OutputAggregatetuple> {
    inp.validate()?;
    let mut tuple = db.get_aggregatetuple(&inp.key)?;
    validate_tuple_owner(db, &tuple.worker)?;

    tuple.out_model = Some(KeyChecksumAddress {
        key: inp.out_model.key.clone(),
        checksum: inp.out_model.checksum.clone(),
        storage_address: inp.out_model.storage_address.clone(),
    });
    tuple.log.push_str(&inp.log);
    create_model_index(db, &inp.out_model.key, &inp.key)?;

    commit_status_update(db, &inp.key, &mut tuple, Status::Done)?;
    compute_plan::try_add_intermediary_model(
        db,
        tuple.compute_plan_key.as_deref(),
        &tuple.worker,
        std::slice::from_ref(&inp.out_model.key),
    )?;

    tuple::update_traintuple_children(db, &inp.key, tuple.status, &mut Vec::new())?;
    tuple::update_testtuple_children(db, &inp.key, tuple.status)?;
    OutputAggregatetuple::fill(db, &tuple)
}

pub fn log_fail_aggregate<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    inp: &InputLog,
) -> LedgerResult<OutputAggregatetuple> {
    inp.validate()?;
    let mut tuple = db.get_aggregatetuple(&inp.key)?;
    validate_tuple_owner(db, &tuple.worker)?;
    tuple.log.push_str(&inp.log);
    commit_status_update(db, &inp.key, &mut tuple, Status::Failed)?;

    tuple::update_testtuple_children(db, &inp.key, tuple.status)?;
    if tuple.compute_plan_key.is_none() {
        tuple::update_traintuple_children(db, &inp.key, tuple.status, &mut Vec::new())?;
    }
    OutputAggregatetuple::fill(db, &tuple)
}

pub(crate) fn update_aggregatetuple_child<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    parent_key: &str,
    child_key: &str,
    parent_status: Status,
) -> LedgerResult<Status> {
    let mut child = db.get_aggregatetuple(child_key)?;
    let Some(new_status) =
        tuple::child_status_for(db, parent_key, parent_status, &child.in_model_keys)?
    else {
        return Ok(child.status);
    };
    commit_status_update(db, child_key, &mut child, new_status)?;
    db.add_tuple_event(child_key);
    Ok(child.status)
}

pub fn query_aggregatetuple<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    inp: &InputKey,
) -> LedgerResult<OutputAggregatetuple> {
    inp.validate()?;
    let tuple = db.get_aggregatetuple(&inp.key)?;
    OutputAggregatetuple::fill(db, &tuple)
}

pub fn query_aggregatetuples<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    inp: &InputBookmark,
) -> LedgerResult<(Vec<OutputAggregatetuple>, String)> {
    let (keys, bookmark) = db.get_index_keys_with_pagination(
        AGGREGATETUPLE_ALGO_INDEX,
        &["aggregatetuple"],
        OUTPUT_PAGE_SIZE,
        &inp.bookmark,
    )?;
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        let tuple = db.get_aggregatetuple(&key)?;
        out.push(OutputAggregatetuple::fill(db, &tuple)?);
    }
    Ok((out, bookmark))
}

pub(crate) fn get_output_aggregatetuple<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    key: &str,
) -> LedgerResult<OutputAggregatetuple> {
    let tuple = db.get_aggregatetuple(key)?;
    OutputAggregatetuple::fill(db, &tuple)
}
