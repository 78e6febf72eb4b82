// Copyright (c) 2026 Fedplan Contributors
// SPDX-License-Identifier: Apache-2.0

//! Testtuples: evaluation tasks attached to a training tuple. A testtuple
//! is certified when its dataset is exactly the objective's canonical test
//! dataset.

use crate::assets::{AssetType, Status, Testtuple, TtDataset};
use crate::data::check_same_data_manager;
use crate::error::{LedgerError, LedgerResult};
use crate::input::{InputBookmark, InputKey, InputLog, InputLogSuccessTest, InputTesttuple};
use crate::ledger::{LedgerDb, LedgerStore, OUTPUT_PAGE_SIZE};
use crate::output::OutputTesttuple;
use crate::tuple::{self, validate_tuple_owner, UpdateDecision, TESTTUPLE_BY_TRAINTUPLE_INDEX};

pub const TESTTUPLE_WORKER_STATUS_INDEX: &str = "testtuple~worker~status~key";
pub const TESTTUPLE_ALGO_INDEX: &str = "testtuple~algo~key";
pub const TESTTUPLE_TAG_INDEX: &str = "testtuple~tag~key";

pub fn create_testtuple<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    inp: &InputTesttuple,
) -> LedgerResult<String> {
    inp.validate()?;
    create_testtuple_internal(db, inp)
}

pub(crate) fn create_testtuple_internal<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    inp: &InputTesttuple,
) -> LedgerResult<String> {
    let creator = db.creator().to_string();

    let objective = db.get_objective(&inp.objective_key).map_err(|err| {
        LedgerError::bad_request(format!("could not retrieve objective: {err}"))
    })?;
    let parent = db.get_generic_tuple(&inp.traintuple_key).map_err(|err| {
        LedgerError::bad_request(format!(
            "could not retrieve traintuple with key {}: {err}",
            inp.traintuple_key
        ))
    })?;
    if !parent.permissions.can_process(&parent.creator, &creator) {
        return Err(LedgerError::forbidden(format!(
            "not authorized to process traintuple {}",
            inp.traintuple_key
        )));
    }

    let status = match parent.status {
        Status::Done => Status::Todo,
        Status::Failed | Status::Aborted => {
            return Err(LedgerError::bad_request(format!(
                "could not register this testtuple, the traintuple {} has status {}",
                inp.traintuple_key, parent.status
            )))
        }
        _ => Status::Waiting,
    };

    let (data_manager_key, data_sample_keys, certified) = match &inp.data_manager_key {
        Some(dm_key) => {
            let (test_only, _) = check_same_data_manager(db, dm_key, &inp.data_sample_keys)?;
            if !test_only {
                return Err(LedgerError::bad_request(
                    "not possible to create a testtuple with train data",
                ));
            }
            let certified = objective.test_dataset.as_ref().is_some_and(|td| {
                td.data_manager_key == *dm_key
                    && same_key_set(&td.data_sample_keys, &inp.data_sample_keys)
            });
            (dm_key.clone(), inp.data_sample_keys.clone(), certified)
        }
        None => {
            let test_dataset = objective.test_dataset.as_ref().ok_or_else(|| {
                LedgerError::bad_request(format!(
                    "objective {} has no canonical test dataset",
                    inp.objective_key
                ))
            })?;
            (
                test_dataset.data_manager_key.clone(),
                test_dataset.data_sample_keys.clone(),
                true,
            )
        }
    };
    let data_manager = db.get_data_manager(&data_manager_key).map_err(|err| {
        LedgerError::bad_request(format!("could not retrieve data manager: {err}"))
    })?;

    if db.key_exists(&inp.key) {
        return Err(LedgerError::conflict("testtuple already exists", &inp.key));
    }

    let tuple = Testtuple {
        key: inp.key.clone(),
        algo_key: parent.algo_key.clone(),
        asset_type: AssetType::Testtuple,
        certified,
        compute_plan_key: parent.compute_plan_key.clone(),
        creator,
        dataset: TtDataset {
            key: data_manager.key.clone(),
            worker: data_manager.owner.clone(),
            data_sample_keys,
            opener_checksum: data_manager.opener.checksum.clone(),
            perf: 0.0,
        },
        log: String::new(),
        metadata: inp.metadata.clone(),
        traintuple_key: inp.traintuple_key.clone(),
        objective_key: inp.objective_key.clone(),
        permissions: parent.permissions.clone(),
        rank: parent.rank,
        status,
        tag: inp.tag.clone(),
    };

    if let Some(plan_key) = &tuple.compute_plan_key {
        let mut plan = db.get_compute_plan(plan_key)?;
        plan.testtuple_keys.push(tuple.key.clone());
        db.put(plan_key, &plan)?;
    }

    save(db, &tuple)?;
    db.add_tuple_event(&tuple.key);
    Ok(tuple.key)
}

fn same_key_set(a: &[String], b: &[String]) -> bool {
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort();
    b.sort();
    a == b
}

fn save<S: LedgerStore>(db: &mut LedgerDb<'_, S>, tuple: &Testtuple) -> LedgerResult<()> {
    db.add(&tuple.key, tuple)?;
    db.create_index(
        TESTTUPLE_ALGO_INDEX,
        &["testtuple", &tuple.algo_key, &tuple.key],
    )?;
    db.create_index(
        TESTTUPLE_WORKER_STATUS_INDEX,
        &[
            "testtuple",
            &tuple.dataset.worker,
            tuple.status.as_str(),
            &tuple.key,
        ],
    )?;
    db.create_index(
        TESTTUPLE_BY_TRAINTUPLE_INDEX,
        &[
            "testtuple",
            &tuple.traintuple_key,
            &tuple.certified.to_string(),
            &tuple.key,
        ],
    )?;
    if !tuple.tag.is_empty() {
        db.create_index(TESTTUPLE_TAG_INDEX, &["testtuple", &tuple.tag, &tuple.key])?;
    }
    Ok(())
}

pub(crate) fn commit_status_update<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    key: &str,
    tuple: &mut Testtuple,
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
        TESTTUPLE_WORKER_STATUS_INDEX,
        &["testtuple", &tuple.dataset.worker, old_status.as_str(), key],
        &["testtuple", &tuple.dataset.worker, new_status.as_str(), key],
    )?;
    tracing::info!(
        target: "fedplan.lifecycle",
        key,
        from = %old_status,
        to = %new_status,
        "testtuple status updated"
    );
    Ok(())
}

pub(crate) fn abort_if_pending<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    key: &str,
) -> LedgerResult<bool> {
    let mut tuple = db.get_testtuple(key)?;
    if !matches!(tuple.status, Status::Waiting | Status::Todo) {
        return Ok(false);
    }
    let old_status = tuple.status;
    tuple.status = Status::Aborted;
    db.put(key, &tuple)?;
    db.update_index(
        TESTTUPLE_WORKER_STATUS_INDEX,
        &["testtuple", &tuple.dataset.worker, old_status.as_str(), key],
        &["testtuple", &tuple.dataset.worker, Status::Aborted.as_str(), key],
    )?;
    tracing::info!(
        target: "fedplan.lifecycle",
        key,
        from = %old_status,
        to = %Status::Aborted,
        "testtuple aborted by plan cancellation"
    );
    Ok(true)
}

pub fn log_start_test<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    inp: &InputKey,
) -> LedgerResult<OutputTesttuple> {
    inp.validate()?;
    let mut tuple = db.get_testtuple(&inp.key)?;
    validate_tuple_owner(db, &tuple.dataset.worker)?;
    commit_status_update(db, &inp.key, &mut tuple, Status::Doing)?;
    OutputTesttuple::fill(db, &tuple)
}

pub fn log_success_test<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    inp: &InputLogSuccessTest,
) -> LedgerResult<OutputTesttuple> {
    inp.validate()?;
    let mut tuple = db.get_testtuple(&inp.key)?;
    validate_tuple_owner(db, &tuple.dataset.worker)?;
    tuple.dataset.perf = inp.perf;
    tuple.log.push_str(&inp.log);
    commit_status_update(db, &inp.key, &mut tuple, Status::Done)?;
    OutputTesttuple::fill(db, &tuple)
}

pub fn log_fail_test<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    inp: &InputLog,
) -> LedgerResult<OutputTesttuple> {
    inp.validate()?;
    let mut tuple = db.get_testtuple(&inp.key)?;
    validate_tuple_owner(db, &tuple.dataset.worker)?;
    tuple.log.push_str(&inp.log);
    commit_status_update(db, &inp.key, &mut tuple, Status::Failed)?;
    OutputTesttuple::fill(db, &tuple)
}

pub fn query_testtuple<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    inp: &InputKey,
) -> LedgerResult<OutputTesttuple> {
    inp.validate()?;
    let tuple = db.get_testtuple(&inp.key)?;
    OutputTesttuple::fill(db, &tuple)
}

pub fn query_testtuples<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    inp: &InputBookmark,
) -> LedgerResult<(Vec<OutputTesttuple>, String)> {
    let (keys, bookmark) = db.get_index_keys_with_pagination(
        TESTTUPLE_BY_TRAINTUPLE_INDEX,
        &["testtuple"],
        OUTPUT_PAGE_SIZE,
        &inp.bookmark,
    )?;
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        let tuple = db.get_testtuple(&key)?;
        out.push(OutputTesttuple::fill(db, &tuple)?);
    }
    Ok((out, bookmark))
}

pub(crate) fn get_output_testtuple<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    key: &str,
) -> LedgerResult<OutputTesttuple> {
    let tuple = db.get_testtuple(key)?;
    OutputTesttuple::fill(db, &tuple)
}
