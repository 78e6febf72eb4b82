// Copyright (c) 2026 Fedplan Contributors
// SPDX-License-Identifier: Apache-2.0

//! Standard traintuples: creation, lifecycle logs and queries.

use crate::assets::{AssetType, Dataset, KeyChecksumAddress, Status, Traintuple};
use crate::data::{check_same_data_manager, get_data_manager_owner};
use crate::error::{LedgerError, LedgerResult};
use crate::input::{InputBookmark, InputKey, InputLog, InputLogSuccessTrain, InputTraintuple};
use crate::ledger::{LedgerDb, LedgerStore, OUTPUT_PAGE_SIZE};
use crate::output::OutputTraintuple;
use crate::permissions::merge_permissions;
use crate::tuple::{
    self, create_model_index, determine_status_from_in_models, validate_tuple_owner,
    UpdateDecision, TUPLE_IN_MODEL_INDEX,
};
use crate::compute_plan;

pub const TRAINTUPLE_WORKER_STATUS_INDEX: &str = "traintuple~worker~status~key";
pub const TRAINTUPLE_ALGO_INDEX: &str = "traintuple~algo~key";
pub const TRAINTUPLE_TAG_INDEX: &str = "traintuple~tag~key";

pub fn create_traintuple<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    inp: &InputTraintuple,
) -> LedgerResult<String> {
    inp.validate()?;
    create_traintuple_internal(db, inp, true)
}

pub(crate) fn create_traintuple_internal<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    inp: &InputTraintuple,
    check_plan_availability: bool,
) -> LedgerResult<String> {
    let creator = db.creator().to_string();

    let algo = db
        .get_algo(&inp.algo_key)
        .map_err(|err| LedgerError::bad_request(format!("could not retrieve algo: {err}")))?;
    if !algo.permissions.can_process(&algo.owner, &creator) {
        return Err(LedgerError::forbidden(format!(
            "not authorized to process algo {}",
            inp.algo_key
        )));
    }

    let (_, train_only) = check_same_data_manager(db, &inp.data_manager_key, &inp.data_sample_keys)?;
    if !train_only {
        return Err(LedgerError::bad_request(
            "not possible to create a traintuple with test only data",
        ));
    }
    let data_manager = db.get_data_manager(&inp.data_manager_key).map_err(|err| {
        LedgerError::bad_request(format!("could not retrieve data manager: {err}"))
    })?;
    if !data_manager.permissions.can_process(&data_manager.owner, &creator) {
        return Err(LedgerError::forbidden(format!(
            "not authorized to process data manager {}",
            inp.data_manager_key
        )));
    }
    let permissions = merge_permissions(&data_manager.permissions, &algo.permissions);
    let worker = get_data_manager_owner(db, &inp.data_manager_key)?;

    let mut parent_statuses = Vec::with_capacity(inp.in_models.len());
    for parent_key in &inp.in_models {
        let parent = db.get_generic_tuple(parent_key).map_err(|err| {
            LedgerError::bad_request(format!(
                "could not retrieve parent tuple with key {parent_key}: {err}"
            ))
        })?;
        parent_statuses.push(parent.status);
    }
    let status = determine_status_from_in_models(&parent_statuses);

    if db.key_exists(&inp.key) {
        return Err(LedgerError::conflict(
            "traintuple already exists",
            &inp.key,
        ));
    }

    let (rank, compute_plan_key) = compute_plan::attach_tuple_to_plan(
        db,
        inp.rank,
        inp.compute_plan_key.as_deref(),
        AssetType::Traintuple,
        &inp.key,
        status,
        &worker,
        check_plan_availability,
    )?;

    let tuple = Traintuple {
        key: inp.key.clone(),
        asset_type: AssetType::Traintuple,
        algo_key: inp.algo_key.clone(),
        compute_plan_key,
        creator,
        log: String::new(),
        metadata: inp.metadata.clone(),
        rank,
        status,
        tag: inp.tag.clone(),
        dataset: Dataset {
            data_manager_key: inp.data_manager_key.clone(),
            data_sample_keys: inp.data_sample_keys.clone(),
            metadata: Default::default(),
            worker,
        },
        in_model_keys: inp.in_models.clone(),
        out_model: None,
        permissions,
    };
    save(db, &tuple)?;
    db.add_tuple_event(&tuple.key);
    Ok(tuple.key)
}

fn save<S: LedgerStore>(db: &mut LedgerDb<'_, S>, tuple: &Traintuple) -> LedgerResult<()> {
    db.add(&tuple.key, tuple)?;
    db.create_index(
        TRAINTUPLE_ALGO_INDEX,
        &["traintuple", &tuple.algo_key, &tuple.key],
    )?;
    db.create_index(
        TRAINTUPLE_WORKER_STATUS_INDEX,
        &[
            "traintuple",
            &tuple.dataset.worker,
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
                &tuple.dataset.worker,
                &tuple.rank.to_string(),
                &tuple.key,
            ],
        )?;
    }
    if !tuple.tag.is_empty() {
        db.create_index(TRAINTUPLE_TAG_INDEX, &["traintuple", &tuple.tag, &tuple.key])?;
    }
    Ok(())
}

pub(crate) fn commit_status_update<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    key: &str,
    tuple: &mut Traintuple,
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
        TRAINTUPLE_WORKER_STATUS_INDEX,
        &["traintuple", &tuple.dataset.worker, old_status.as_str(), key],
        &["traintuple", &tuple.dataset.worker, new_status.as_str(), key],
    )?;
    compute_plan::update_compute_plan_state(
        db,
        tuple.compute_plan_key.as_deref(),
        key,
        new_status,
        &tuple.dataset.worker,
    )?;
    tracing::info!(
        target: "fedplan.lifecycle",
        key,
        from = %old_status,
        to = %new_status,
        "traintuple status updated"
    );
    Ok(())
}

/// Plan-cancel path: abort a tuple that has not started yet.
pub(crate) fn abort_if_pending<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    key: &str,
) -> LedgerResult<bool> {
    let mut tuple = db.get_traintuple(key)?;
    if !matches!(tuple.status, Status::Waiting | Status::Todo) {
        return Ok(false);
    }
    let old_status = tuple.status;
    tuple.status = Status::Aborted;
    db.put(key, &tuple)?;
    db.update_index(
        TRAINTUPLE_WORKER_STATUS_INDEX,
        &["traintuple", &tuple.dataset.worker, old_status.as_str(), key],
        &["traintuple", &tuple.dataset.worker, Status::Aborted.as_str(), key],
    )?;
    compute_plan::update_compute_plan_state(
        db,
        tuple.compute_plan_key.as_deref(),
        key,
        Status::Aborted,
        &tuple.dataset.worker,
    )?;
    tracing::info!(
        target: "fedplan.lifecycle",
        key,
        from = %old_status,
        to = %Status::Aborted,
        "traintuple aborted by plan cancellation"
    );
    Ok(true)
}

pub fn log_start_train<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    inp: &InputKey,
) -> LedgerResult<OutputTraintuple> {
    inp.validate()?;
    let mut tuple = db.get_traintuple(&inp.key)?;
    validate_tuple_owner(db, &tuple.dataset.worker)?;
    commit_status_update(db, &inp.key, &mut tuple, Status::Doing)?;
    OutputTraintuple::fill(db, &tuple)
}

pub fn log_success_train<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    inp: &InputLogSuccessTrain,
) -> LedgerResult<OutputTraintuple> {
    inp.validate()?;
    let mut tuple = db.get_traintuple(&inp.key)?;
    validate_tuple_owner(db, &tuple.dataset.worker)?;

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
        &tuple.dataset.worker,
        std::slice::from_ref(&inp.out_model.key),
    )?;

    tuple::update_traintuple_children(db, &inp.key, tuple.status, &mut Vec::new())?;
    tuple::update_testtuple_children(db, &inp.key, tuple.status)?;
    OutputTraintuple::fill(db, &tuple)
}

pub fn log_fail_train<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    inp: &InputLog,
) -> LedgerResult<OutputTraintuple> {
    inp.validate()?;
    let mut tuple = db.get_traintuple(&inp.key)?;
    validate_tuple_owner(db, &tuple.dataset.worker)?;
    tuple.log.push_str(&inp.log);
    commit_status_update(db, &inp.key, &mut tuple, Status::Failed)?;

    tuple::update_testtuple_children(db, &inp.key, tuple.status)?;
    // Inside a compute plan the failure is recorded on the plan itself;
    // waiting training children stay put until the plan is canceled.
    if tuple.compute_plan_key.is_none() {
        tuple::update_traintuple_children(db, &inp.key, tuple.status, &mut Vec::new())?;
    }
    OutputTraintuple::fill(db, &tuple)
}

/// Move a waiting child along after one of its parents finished.
pub(crate) fn update_traintuple_child<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    parent_key: &str,
    child_key: &str,
    parent_status: Status,
) -> LedgerResult<Status> {
    let mut child = db.get_traintuple(child_key)?;
    let Some(new_status) =
        tuple::child_status_for(db, parent_key, parent_status, &child.in_model_keys)?
    else {
        return Ok(child.status);
    };
    commit_status_update(db, child_key, &mut child, new_status)?;
    db.add_tuple_event(child_key);
    Ok(child.status)
}

pub fn query_traintuple<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    inp: &InputKey,
) -> LedgerResult<OutputTraintuple> {
    inp.validate()?;
    let tuple = db.get_traintuple(&inp.key)?;
    OutputTraintuple::fill(db, &tuple)
}

pub fn query_traintuples<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    inp: &InputBookmark,
) -> LedgerResult<(Vec<OutputTraintuple>, String)> {
    let (keys, bookmark) = db.get_index_keys_with_pagination(
        TRAINTUPLE_ALGO_INDEX,
        &["traintuple"],
        OUTPUT_PAGE_SIZE,
        &inp.bookmark,
    )?;
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        let tuple = db.get_traintuple(&key)?;
        out.push(OutputTraintuple::fill(db, &tuple)?);
    }
    Ok((out, bookmark))
}

pub(crate) fn get_output_traintuple<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    key: &str,
) -> LedgerResult<OutputTraintuple> {
    let tuple = db.get_traintuple(key)?;
    OutputTraintuple::fill(db, &tuple)
}
