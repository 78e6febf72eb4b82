// Copyright (c) 2026 Fedplan Contributors
// SPDX-License-Identifier: Apache-2.0

//! Composite traintuples: two-output training tasks whose head model never
//! leaves its worker. The head parent must be another composite traintuple;
//! the trunk parent may be any training tuple.

use crate::assets::{
    AssetType, CompositeOutHeadModel, CompositeOutTrunkModel, CompositeTraintuple, Dataset,
    KeyChecksum, KeyChecksumAddress, Status,
};
use crate::compute_plan;
use crate::data::{check_same_data_manager, get_data_manager_owner};
use crate::error::{LedgerError, LedgerResult};
use crate::input::{
    InputBookmark, InputCompositeTraintuple, InputKey, InputLog, InputLogSuccessCompositeTrain,
};
use crate::ledger::{LedgerDb, LedgerStore, OUTPUT_PAGE_SIZE};
use crate::output::OutputCompositeTraintuple;
use crate::permissions::{new_permissions, Permissions};
use crate::tuple::{
    self, create_model_index, determine_status_from_in_models, validate_tuple_owner,
    UpdateDecision, TUPLE_IN_MODEL_INDEX,
};

pub const COMPOSITE_WORKER_STATUS_INDEX: &str = "compositeTraintuple~worker~status~key";
pub const COMPOSITE_ALGO_INDEX: &str = "compositeTraintuple~algo~key";
pub const COMPOSITE_TAG_INDEX: &str = "compositeTraintuple~tag~key";

pub fn create_composite_traintuple<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    inp: &InputCompositeTraintuple,
) -> LedgerResult<String> {
    inp.validate()?;
    create_composite_traintuple_internal(db, inp, true)
}

pub(crate) fn create_composite_traintuple_internal<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    inp: &InputCompositeTraintuple,
    check_plan_availability: bool,
) -> LedgerResult<String> {
    let creator = db.creator().to_string();

    let algo = db.get_composite_algo(&inp.algo_key).map_err(|err| {
        LedgerError::bad_request(format!("could not retrieve composite algo: {err}"))
    })?;
    if !algo.permissions.can_process(&algo.owner, &creator) {
        return Err(LedgerError::forbidden(format!(
            "not authorized to process algo {}",
            inp.algo_key
        )));
    }

    let (_, train_only) = check_same_data_manager(db, &inp.data_manager_key, &inp.data_sample_keys)?;
    if !train_only {
        return Err(LedgerError::bad_request(
            "not possible to create a composite traintuple with test only data",
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
    let worker = get_data_manager_owner(db, &inp.data_manager_key)?;

    let mut parent_statuses = Vec::new();
    if let Some(head_key) = &inp.in_head_model_key {
        let head = db.get_generic_tuple(head_key).map_err(|err| {
            LedgerError::bad_request(format!(
                "could not retrieve head in-model with key {head_key}: {err}"
            ))
        })?;
        if head.asset_type != AssetType::CompositeTraintuple {
            return Err(LedgerError::bad_request(format!(
                "head in-model must be a composite traintuple, got a {}",
                head.asset_type
            )));
        }
        if head.worker != worker {
            return Err(LedgerError::bad_request(format!(
                "dataset worker {worker} does not match head in-model worker {}",
                head.worker
            )));
        }
        parent_statuses.push(head.status);
    }
    if let Some(trunk_key) = &inp.in_trunk_model_key {
        let trunk = db.get_generic_tuple(trunk_key).map_err(|err| {
            LedgerError::bad_request(format!(
                "could not retrieve trunk in-model with key {trunk_key}: {err}"
            ))
        })?;
        if !trunk.asset_type.is_training_tuple() {
            return Err(LedgerError::bad_request(format!(
                "trunk in-model must be a training tuple, got a {}",
                trunk.asset_type
            )));
        }
        parent_statuses.push(trunk.status);
    }
    let status = determine_status_from_in_models(&parent_statuses);

    if db.key_exists(&inp.key) {
        return Err(LedgerError::conflict(
            "composite traintuple already exists",
            &inp.key,
        ));
    }

    let (rank, compute_plan_key) = compute_plan::attach_tuple_to_plan(
        db,
        inp.rank,
        inp.compute_plan_key.as_deref(),
        AssetType::CompositeTraintuple,
        &inp.key,
        status,
        &worker,
        check_plan_availability,
    )?;

    let tuple = CompositeTraintuple {
        key: inp.key.clone(),
        asset_type: AssetType::CompositeTraintuple,
        algo_key: inp.algo_key.clone(),
        compute_plan_key,
        creator: creator.clone(),
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
        in_head_model: inp.in_head_model_key.clone(),
        in_trunk_model: inp.in_trunk_model_key.clone(),
        out_head_model: CompositeOutHeadModel {
            out_model: None,
            permissions: Permissions::restricted_to(&creator),
        },
        out_trunk_model: CompositeOutTrunkModel {
            out_model: None,
            permissions: new_permissions(db, &inp.out_trunk_model_permissions, &creator)?,
        },
    };
    save(db, &tuple)?;
    db.add_tuple_event(&tuple.key);
    Ok(tuple.key)
}

fn save<S: LedgerStore>(db: &mut LedgerDb<'_, S>, tuple: &CompositeTraintuple) -> LedgerResult<()> {
    db.add(&tuple.key, tuple)?;
    db.create_index(
        COMPOSITE_ALGO_INDEX,
        &["compositeTraintuple", &tuple.algo_key, &tuple.key],
    )?;
    db.create_index(
        COMPOSITE_WORKER_STATUS_INDEX,
        &[
            "compositeTraintuple",
            &tuple.dataset.worker,
            tuple.status.as_str(),
            &tuple.key,
        ],
    )?;
    for parent_key in [&tuple.in_head_model, &tuple.in_trunk_model]
        .into_iter()
        .flatten()
    {
        db.create_index(TUPLE_IN_MODEL_INDEX, &["tuple", parent_key, &tuple.key])?;
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
        db.create_index(
            COMPOSITE_TAG_INDEX,
            &["compositeTraintuple", &tuple.tag, &tuple.key],
        )?;
    }
    Ok(())
}

pub(crate) fn commit_status_update<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    key: &str,
    tuple: &mut CompositeTraintuple,
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
        COMPOSITE_WORKER_STATUS_INDEX,
        &[
            "compositeTraintuple",
            &tuple.dataset.worker,
            old_status.as_str(),
            key,
        ],
        &[
            "compositeTraintuple",
            &tuple.dataset.worker,
            new_status.as_str(),
            key,
        ],
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
        "composite traintuple status updated"
    );
    Ok(())
}

pub(crate) fn abort_if_pending<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    key: &str,
) -> LedgerResult<bool> {
    let mut tuple = db.get_composite_traintuple(key)?;
    if !matches!(tuple.status, Status::Waiting | Status::Todo) {
        return Ok(false);
    }
    let old_status = tuple.status;
    tuple.status = Status::Aborted;
    db.put(key, &tuple)?;
    db.update_index(
        COMPOSITE_WORKER_STATUS_INDEX,
        &[
            "compositeTraintuple",
            &tuple.dataset.worker,
            old_status.as_str(),
            key,
        ],
        &[
            "compositeTraintuple",
            &tuple.dataset.worker,
            Status::Aborted.as_str(),
            key,
        ],
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
        "composite traintuple aborted by plan cancellation"
    );
    Ok(true)
}

pub fn log_start_composite_train<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    inp: &InputKey,
) -> LedgerResult<OutputCompositeTraintuple> {
    inp.validate()?;
    let mut tuple = db.get_composite_traintuple(&inp.key)?;
    validate_tuple_owner(db, &tuple.dataset.worker)?;
    commit_status_update(db, &inp.key, &mut tuple, Status::Doing)?;
    OutputCompositeTraintuple::fill(db, &tuple)
}

pub fn log_success_composite_train<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    inp: &InputLogSuccessCompositeTrain,
) -> LedgerResult<OutputCompositeTraintuple> {
    inp.validate()?;
    let mut tuple = db.get_composite_traintuple(&inp.key)?;
    validate_tuple_owner(db, &tuple.dataset.worker)?;

    tuple.out_head_model.out_model = Some(KeyChecksum {
        key: inp.out_head_model.key.clone(),
        checksum: inp.out_head_model.checksum.clone(),
    });
    tuple.out_trunk_model.out_model = Some(KeyChecksumAddress {
        key: inp.out_trunk_model.key.clone(),
        checksum: inp.out_trunk_model.checksum.clone(),
        storage_address: inp.out_trunk_model.storage_address.clone(),
    });
    tuple.log.push_str(&inp.log);
    create_model_index(db, &inp.out_head_model.key, &inp.key)?;
    create_model_index(db, &inp.out_trunk_model.key, &inp.key)?;

    commit_status_update(db, &inp.key, &mut tuple, Status::Done)?;
    compute_plan::try_add_intermediary_model(
        db,
        tuple.compute_plan_key.as_deref(),
        &tuple.dataset.worker,
        &[
            inp.out_head_model.key.clone(),
            inp.out_trunk_model.key.clone(),
        ],
    )?;

    tuple::update_traintuple_children(db, &inp.key, tuple.status, &mut Vec::new())?;
    tuple::update_testtuple_children(db, &inp.key, tuple.status)?;
    OutputCompositeTraintuple::fill(db, &tuple)
}

pub fn log_fail_composite_train<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    inp: &InputLog,
) -> LedgerResult<OutputCompositeTraintuple> {
    inp.validate()?;
    let mut tuple = db.get_composite_traintuple(&inp.key)?;
    validate_tuple_owner(db, &tuple.dataset.worker)?;
    tuple.log.push_str(&inp.log);
    commit_status_update(db, &inp.key, &mut tuple, Status::Failed)?;

    tuple::update_testtuple_children(db, &inp.key, tuple.status)?;
    if tuple.compute_plan_key.is_none() {
        tuple::update_traintuple_children(db, &inp.key, tuple.status, &mut Vec::new())?;
    }
    OutputCompositeTraintuple::fill(db, &tuple)
}

pub(crate) fn update_composite_traintuple_child<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    parent_key: &str,
    child_key: &str,
    parent_status: Status,
) -> LedgerResult<Status> {
    let mut child = db.get_composite_traintuple(child_key)?;
    let parents: Vec<String> = [&child.in_head_model, &child.in_trunk_model]
        .into_iter()
        .flatten()
        .cloned()
        .collect();
    let Some(new_status) = tuple::child_status_for(db, parent_key, parent_status, &parents)? else {
        return Ok(child.status);
    };
    commit_status_update(db, child_key, &mut child, new_status)?;
    db.add_tuple_event(child_key);
    Ok(child.status)
}

pub fn query_composite_traintuple<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    inp: &InputKey,
) -> LedgerResult<OutputCompositeTraintuple> {
    inp.validate()?;
    let tuple = db.get_composite_traintuple(&inp.key)?;
    OutputCompositeTraintuple::fill(db, &tuple)
}

pub fn query_composite_traintuples<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    inp: &InputBookmark,
) -> LedgerResult<(Vec<OutputCompositeTraintuple>, String)> {
    let (keys, bookmark) = db.get_index_keys_with_pagination(
        COMPOSITE_ALGO_INDEX,
        &["compositeTraintuple"],
        OUTPUT_PAGE_SIZE,
        &inp.bookmark,
    )?;
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        let tuple = db.get_composite_traintuple(&key)?;
        out.push(OutputCompositeTraintuple::fill(db, &tuple)?);
    }
    Ok((out, bookmark))
}

pub(crate) fn get_output_composite_traintuple<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    key: &str,
) -> LedgerResult<OutputCompositeTraintuple> {
    let tuple = db.get_composite_traintuple(key)?;
    OutputCompositeTraintuple::fill(db, &tuple)
}
