// Copyright (c) 2026 Fedplan Contributors
// SPDX-License-Identifier: Apache-2.0

//! The compute-plan aggregate: the plan record, its split-off state record,
//! per-(plan, worker) counters, intermediary-model tracking, and the
//! create/update/cancel operations.

use sha2::{Digest, Sha256};

use crate::assets::{
    AssetType, ComputePlan, ComputePlanState, ComputePlanStatus, ComputePlanWorkerState, Status,
    TrainTask,
};
use crate::error::{LedgerError, LedgerResult};
use crate::input::{
    InputAggregatetuple, InputBookmark, InputComputePlan, InputCompositeTraintuple, InputKey,
    InputTesttuple, InputTraintuple, InputUpdateComputePlan,
};
use crate::ledger::{LedgerDb, LedgerStore, OUTPUT_PAGE_SIZE};
use crate::output::OutputComputePlan;
use crate::tuple::{self, TUPLE_IN_MODEL_INDEX};
use crate::{aggregatetuple, composite, dag, testtuple, traintuple};

pub const COMPUTE_PLAN_INDEX: &str = "computePlan~key";
pub const COMPUTE_PLAN_TAG_INDEX: &str = "computePlan~tag~key";
/// Uniqueness coordinate of a training task inside its plan.
pub const COMPUTE_PLAN_RANK_INDEX: &str = "computePlan~computeplankey~worker~rank~key";

/// The plan status is stored under a key derived from the plan key, so the
/// frequently-rewritten state stays out of the plan record.
pub fn state_key_for(plan_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plan_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Storage key of the per-(plan, worker) counters.
pub fn worker_state_key(state_key: &str, worker: &str) -> String {
    format!("{state_key}~{worker}")
}

fn get_worker_state_or_default<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    key: &str,
) -> LedgerResult<ComputePlanWorkerState> {
    match db.get_compute_plan_worker_state(key) {
        Ok(state) => Ok(state),
        Err(LedgerError::NotFound(_)) => Ok(ComputePlanWorkerState::default()),
        Err(err) => Err(err),
    }
}

/// Register a newly created training tuple into its plan: key lists,
/// worker set and per-worker counters.
pub fn add_tuple_to_plan<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    plan_key: &str,
    asset_type: AssetType,
    tuple_key: &str,
    status: Status,
    worker: &str,
) -> LedgerResult<()> {
    let mut plan = db.get_compute_plan(plan_key)?;
    match asset_type {
        AssetType::Traintuple => plan.traintuple_keys.push(tuple_key.to_string()),
        AssetType::CompositeTraintuple => {
            plan.composite_traintuple_keys.push(tuple_key.to_string())
        }
        AssetType::Aggregatetuple => plan.aggregatetuple_keys.push(tuple_key.to_string()),
        other => {
            return Err(LedgerError::internal(format!(
                "cannot register a {other} as a training task of plan {plan_key}"
            )))
        }
    }
    if !plan.workers.iter().any(|w| w == worker) {
        plan.workers.push(worker.to_string());
    }
    let state_key = plan.state_key.clone();
    db.put(plan_key, &plan)?;

    let ws_key = worker_state_key(&state_key, worker);
    let mut ws = get_worker_state_or_default(db, &ws_key)?;
    ws.tuple_count += 1;
    if status == Status::Aborted {
        ws.done_count += 1;
    }
    db.put(&ws_key, &ws)?;

    let mut state = db.get_compute_plan_state(&state_key)?;
    if status == Status::Todo && state.status == ComputePlanStatus::Waiting {
        state.status = ComputePlanStatus::Todo;
        db.put(&state_key, &state)?;
    }
    Ok(())
}

/// Resolve the (rank, plan) pair of a new tuple and register it into its
/// plan. Standalone tuples carry neither; a plan member carries both, and
/// the (plan, worker, rank) coordinate must be free when the tuple is
/// created directly rather than through the plan builder.
pub(crate) fn attach_tuple_to_plan<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    rank: Option<u32>,
    compute_plan_key: Option<&str>,
    asset_type: AssetType,
    tuple_key: &str,
    status: Status,
    worker: &str,
    check_availability: bool,
) -> LedgerResult<(u32, Option<String>)> {
    match (rank, compute_plan_key) {
        (None, None) => Ok((0, None)),
        (None, Some(_)) => Err(LedgerError::bad_request(
            "a tuple inside a compute plan needs a rank",
        )),
        (Some(_), None) => Err(LedgerError::bad_request(
            "a rank requires a compute plan key",
        )),
        (Some(rank), Some(plan_key)) => {
            if check_availability {
                let taken = db.get_index_keys(
                    COMPUTE_PLAN_RANK_INDEX,
                    &["computePlan", plan_key, worker, &rank.to_string()],
                )?;
                if !taken.is_empty() {
                    return Err(LedgerError::bad_request(format!(
                        "compute plan {plan_key} already has a tuple for worker {worker} at rank {rank}"
                    )));
                }
            }
            add_tuple_to_plan(db, plan_key, asset_type, tuple_key, status, worker)?;
            Ok((rank, Some(plan_key.to_string())))
        }
    }
}

/// Remember a freshly produced model as in-use when the plan opts into
/// intermediary-model cleanup.
pub fn try_add_intermediary_model<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    compute_plan_key: Option<&str>,
    worker: &str,
    model_keys: &[String],
) -> LedgerResult<()> {
    let Some(plan_key) = compute_plan_key else {
        return Ok(());
    };
    let plan = db.get_compute_plan(plan_key)?;
    if !plan.clean_models {
        return Ok(());
    }
    let ws_key = worker_state_key(&plan.state_key, worker);
    let mut ws = get_worker_state_or_default(db, &ws_key)?;
    for key in model_keys {
        if !ws.intermediary_models_in_use.iter().any(|k| k == key) {
            ws.intermediary_models_in_use.push(key.clone());
        }
    }
    db.put(&ws_key, &ws)
}

/// Drop the in-models of a tuple that just finished from the in-use sets
/// once no still-pending tuple references them, surfacing a cleanup hint.
fn remove_settled_intermediary_models<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    plan: &ComputePlan,
    done_tuple_key: &str,
) -> LedgerResult<()> {
    if !plan.clean_models {
        return Ok(());
    }
    let parents = db.get_generic_tuple(done_tuple_key)?.in_model_keys;
    for parent_key in parents {
        let consumers = db.get_index_keys(TUPLE_IN_MODEL_INDEX, &["tuple", &parent_key])?;
        let mut all_done = true;
        for consumer in &consumers {
            if db.get_generic_tuple(consumer)?.status != Status::Done {
                all_done = false;
                break;
            }
        }
        if !all_done {
            continue;
        }
        let parent = db.get_generic_tuple(&parent_key)?;
        let model_keys = tuple::out_model_keys(db, &parent_key)?;
        let ws_key = worker_state_key(&plan.state_key, &parent.worker);
        let mut ws = get_worker_state_or_default(db, &ws_key)?;
        let mut changed = false;
        for model_key in model_keys {
            if let Some(pos) = ws
                .intermediary_models_in_use
                .iter()
                .position(|k| k == &model_key)
            {
                ws.intermediary_models_in_use.remove(pos);
                db.add_model_cleanup_event(&model_key);
                changed = true;
            }
        }
        if changed {
            db.put(&ws_key, &ws)?;
        }
    }
    Ok(())
}

/// Fold one tuple transition into the plan aggregate. Called from every
/// `commit_status_update`; a standalone tuple (no plan) is a no-op.
pub fn update_compute_plan_state<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    compute_plan_key: Option<&str>,
    tuple_key: &str,
    tuple_status: Status,
    worker: &str,
) -> LedgerResult<()> {
    let Some(plan_key) = compute_plan_key else {
        return Ok(());
    };
    let plan = db.get_compute_plan(plan_key)?;
    let state_key = plan.state_key.clone();
    let mut state = db.get_compute_plan_state(&state_key)?;
    let old_status = state.status;

    match tuple_status {
        Status::Todo => {
            if state.status == ComputePlanStatus::Waiting {
                state.status = ComputePlanStatus::Todo;
            }
        }
        Status::Doing => {
            if matches!(
                state.status,
                ComputePlanStatus::Waiting | ComputePlanStatus::Todo
            ) {
                state.status = ComputePlanStatus::Doing;
            }
        }
        Status::Failed => {
            state.status = ComputePlanStatus::Failed;
        }
        Status::Aborted => {
            // Resolved without running; counts toward completion so a
            // canceled plan can still settle once its last running tuple
            // reports back.
            let ws_key = worker_state_key(&state_key, worker);
            let mut ws = get_worker_state_or_default(db, &ws_key)?;
            ws.done_count += 1;
            db.put(&ws_key, &ws)?;
        }
        Status::Done => {
            let ws_key = worker_state_key(&state_key, worker);
            let mut ws = get_worker_state_or_default(db, &ws_key)?;
            ws.done_count += 1;
            db.put(&ws_key, &ws)?;
            remove_settled_intermediary_models(db, &plan, tuple_key)?;

            let (done, total) = plan_counters(db, &plan)?;
            // A recorded failure outranks completion.
            if total > 0 && done == total && state.status != ComputePlanStatus::Failed {
                state.status = ComputePlanStatus::Done;
            } else if matches!(
                state.status,
                ComputePlanStatus::Waiting | ComputePlanStatus::Todo
            ) {
                state.status = ComputePlanStatus::Doing;
            }
        }
        Status::Waiting => {}
    }

    if state.status != old_status {
        db.put(&state_key, &state)?;
        tracing::info!(
            target: "fedplan.lifecycle",
            plan = plan_key,
            from = %old_status,
            to = %state.status,
            "compute plan status updated"
        );
    }
    Ok(())
}

fn plan_counters<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    plan: &ComputePlan,
) -> LedgerResult<(u32, u32)> {
    let mut done = 0;
    let mut total = 0;
    for worker in &plan.workers {
        let ws = get_worker_state_or_default(db, &worker_state_key(&plan.state_key, worker))?;
        done += ws.done_count;
        total += ws.tuple_count;
    }
    Ok((done, total))
}

pub fn create_compute_plan<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    inp: &InputComputePlan,
) -> LedgerResult<OutputComputePlan> {
    inp.validate()?;
    if db.key_exists(&inp.key) {
        return Err(LedgerError::conflict(
            format!("compute plan with key {} already exists", inp.key),
            &inp.key,
        ));
    }

    let state_key = state_key_for(&inp.key);
    let plan = ComputePlan {
        key: inp.key.clone(),
        asset_type: AssetType::ComputePlan,
        clean_models: inp.clean_models,
        traintuple_keys: vec![],
        composite_traintuple_keys: vec![],
        aggregatetuple_keys: vec![],
        testtuple_keys: vec![],
        id_to_train_task: Default::default(),
        workers: vec![],
        tag: inp.tag.clone(),
        metadata: inp.metadata.clone(),
        state_key: state_key.clone(),
    };
    db.add(&inp.key, &plan)?;
    db.put(
        &state_key,
        &ComputePlanState {
            status: ComputePlanStatus::Waiting,
        },
    )?;
    db.create_index(COMPUTE_PLAN_INDEX, &["computePlan", &inp.key])?;
    if !inp.tag.is_empty() {
        db.create_index(COMPUTE_PLAN_TAG_INDEX, &["computePlan", &inp.tag, &inp.key])?;
    }

    register_plan_tasks(db, &inp.key, inp, 0)?;

    let plan = db.get_compute_plan(&inp.key)?;
    OutputComputePlan::fill(db, &plan)
}

pub fn update_compute_plan<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    inp: &InputUpdateComputePlan,
) -> LedgerResult<OutputComputePlan> {
    inp.validate()?;
    let plan = db.get_compute_plan(&inp.compute_plan_key)?;
    let rank_offset = (plan.traintuple_keys.len()
        + plan.composite_traintuple_keys.len()
        + plan.aggregatetuple_keys.len()) as u32;

    let body = InputComputePlan {
        key: inp.compute_plan_key.clone(),
        traintuples: inp.traintuples.clone(),
        composite_traintuples: inp.composite_traintuples.clone(),
        aggregatetuples: inp.aggregatetuples.clone(),
        testtuples: inp.testtuples.clone(),
        clean_models: plan.clean_models,
        tag: plan.tag.clone(),
        metadata: plan.metadata.clone(),
    };
    register_plan_tasks(db, &inp.compute_plan_key, &body, rank_offset)?;

    let plan = db.get_compute_plan(&inp.compute_plan_key)?;
    OutputComputePlan::fill(db, &plan)
}

/// Create every task of the payload in topological order, then the
/// testtuples. Parent ids resolve through the ids created here and the ids
/// already registered in the plan.
fn register_plan_tasks<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    plan_key: &str,
    inp: &InputComputePlan,
    rank_offset: u32,
) -> LedgerResult<()> {
    let existing = db.get_compute_plan(plan_key)?.id_to_train_task;
    let tasks = dag::build_compute_dag(
        &inp.traintuples,
        &inp.composite_traintuples,
        &inp.aggregatetuples,
        &existing,
    )?;

    let mut id_to_key = existing
        .iter()
        .map(|(id, task)| (id.clone(), task.key.clone()))
        .collect::<std::collections::BTreeMap<String, String>>();
    let mut new_tasks: Vec<(String, TrainTask)> = Vec::with_capacity(tasks.len());

    for (position, task) in tasks.iter().enumerate() {
        let rank = rank_offset + position as u32;
        let key = match task.kind {
            dag::TaskKind::Train => {
                let item = &inp.traintuples[task.input_index];
                let in_models = resolve_parent_ids(&item.in_models_ids, &id_to_key, &item.id)?;
                let tuple_inp = InputTraintuple {
                    key: item.key.clone(),
                    algo_key: item.algo_key.clone(),
                    in_models,
                    data_manager_key: item.data_manager_key.clone(),
                    data_sample_keys: item.data_sample_keys.clone(),
                    compute_plan_key: Some(plan_key.to_string()),
                    rank: Some(rank),
                    tag: item.tag.clone(),
                    metadata: item.metadata.clone(),
                };
                traintuple::create_traintuple_internal(db, &tuple_inp, false).map_err(|err| {
                    LedgerError::bad_request(format!("traintuple id {}: {err}", item.id))
                })?
            }
            dag::TaskKind::Composite => {
                let item = &inp.composite_traintuples[task.input_index];
                let in_head_model_key =
                    resolve_optional_parent_id(&item.in_head_model_id, &id_to_key, &item.id)?;
                let in_trunk_model_key =
                    resolve_optional_parent_id(&item.in_trunk_model_id, &id_to_key, &item.id)?;
                let tuple_inp = InputCompositeTraintuple {
                    key: item.key.clone(),
                    algo_key: item.algo_key.clone(),
                    in_head_model_key,
                    in_trunk_model_key,
                    out_trunk_model_permissions: item.out_trunk_model_permissions.clone(),
                    data_manager_key: item.data_manager_key.clone(),
                    data_sample_keys: item.data_sample_keys.clone(),
                    compute_plan_key: Some(plan_key.to_string()),
                    rank: Some(rank),
                    tag: item.tag.clone(),
                    metadata: item.metadata.clone(),
                };
                composite::create_composite_traintuple_internal(db, &tuple_inp, false).map_err(
                    |err| {
                        LedgerError::bad_request(format!(
                            "composite traintuple id {}: {err}",
                            item.id
                        ))
                    },
                )?
            }
            dag::TaskKind::Aggregate => {
                let item = &inp.aggregatetuples[task.input_index];
                let in_models = resolve_parent_ids(&item.in_models_ids, &id_to_key, &item.id)?;
                let tuple_inp = InputAggregatetuple {
                    key: item.key.clone(),
                    algo_key: item.algo_key.clone(),
                    in_models,
                    worker: item.worker.clone(),
                    compute_plan_key: Some(plan_key.to_string()),
                    rank: Some(rank),
                    tag: item.tag.clone(),
                    metadata: item.metadata.clone(),
                };
                aggregatetuple::create_aggregatetuple_internal(db, &tuple_inp, false).map_err(
                    |err| {
                        LedgerError::bad_request(format!("aggregatetuple id {}: {err}", item.id))
                    },
                )?
            }
        };
        id_to_key.insert(task.id.clone(), key.clone());
        new_tasks.push((
            task.id.clone(),
            TrainTask {
                depth: task.depth,
                key,
            },
        ));
    }

    let mut plan = db.get_compute_plan(plan_key)?;
    for (id, task) in new_tasks {
        plan.id_to_train_task.insert(id, task);
    }
    db.put(plan_key, &plan)?;

    for item in &inp.testtuples {
        let traintuple_key = id_to_key.get(&item.traintuple_id).ok_or_else(|| {
            LedgerError::bad_request(format!(
                "testtuple: traintuple id {} not found",
                item.traintuple_id
            ))
        })?;
        let tuple_inp = InputTesttuple {
            key: item.key.clone(),
            traintuple_key: traintuple_key.clone(),
            objective_key: item.objective_key.clone(),
            data_manager_key: item.data_manager_key.clone(),
            data_sample_keys: item.data_sample_keys.clone(),
            tag: item.tag.clone(),
            metadata: item.metadata.clone(),
        };
        testtuple::create_testtuple_internal(db, &tuple_inp).map_err(|err| {
            LedgerError::bad_request(format!("testtuple id {}: {err}", item.traintuple_id))
        })?;
    }
    Ok(())
}

fn resolve_parent_ids(
    ids: &[String],
    id_to_key: &std::collections::BTreeMap<String, String>,
    task_id: &str,
) -> LedgerResult<Vec<String>> {
    ids.iter()
        .map(|id| {
            id_to_key.get(id).cloned().ok_or_else(|| {
                LedgerError::bad_request(format!(
                    "task id {task_id}: model id {id} not found, check task list order"
                ))
            })
        })
        .collect()
}

fn resolve_optional_parent_id(
    id: &Option<String>,
    id_to_key: &std::collections::BTreeMap<String, String>,
    task_id: &str,
) -> LedgerResult<Option<String>> {
    match id {
        Some(id) => Ok(Some(
            id_to_key
                .get(id)
                .cloned()
                .ok_or_else(|| {
                    LedgerError::bad_request(format!(
                        "task id {task_id}: model id {id} not found, check task list order"
                    ))
                })?,
        )),
        None => Ok(None),
    }
}

/// Mark the plan canceled and abort every tuple that has not started;
/// running tuples finish on their own and settle the plan afterwards.
pub fn cancel_compute_plan<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    inp: &InputKey,
) -> LedgerResult<OutputComputePlan> {
    inp.validate()?;
    let plan = db.get_compute_plan(&inp.key)?;
    let state_key = plan.state_key.clone();
    let mut state = db.get_compute_plan_state(&state_key)?;
    if state.status != ComputePlanStatus::Failed {
        state.status = ComputePlanStatus::Canceled;
        db.put(&state_key, &state)?;
    }

    for (asset_type, tuple_key) in plan.training_tuple_keys() {
        let aborted = match asset_type {
            AssetType::Traintuple => traintuple::abort_if_pending(db, &tuple_key)?,
            AssetType::CompositeTraintuple => composite::abort_if_pending(db, &tuple_key)?,
            AssetType::Aggregatetuple => aggregatetuple::abort_if_pending(db, &tuple_key)?,
            other => {
                return Err(LedgerError::internal(format!(
                    "plan {} references {tuple_key} of unexpected type {other}",
                    inp.key
                )))
            }
        };
        if aborted {
            db.add_tuple_event(&tuple_key);
        }
    }
    for testtuple_key in &plan.testtuple_keys {
        if testtuple::abort_if_pending(db, testtuple_key)? {
            db.add_tuple_event(testtuple_key);
        }
    }

    let plan = db.get_compute_plan(&inp.key)?;
    OutputComputePlan::fill(db, &plan)
}

pub fn query_compute_plan<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    inp: &InputKey,
) -> LedgerResult<OutputComputePlan> {
    inp.validate()?;
    let plan = db.get_compute_plan(&inp.key)?;
    OutputComputePlan::fill(db, &plan)
}

pub fn query_compute_plans<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    inp: &InputBookmark,
) -> LedgerResult<(Vec<OutputComputePlan>, String)> {
    let (keys, bookmark) = db.get_index_keys_with_pagination(
        COMPUTE_PLAN_INDEX,
        &["computePlan"],
        OUTPUT_PAGE_SIZE,
        &inp.bookmark,
    )?;
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        let plan = db.get_compute_plan(&key)?;
        out.push(OutputComputePlan::fill(db, &plan)?);
    }
    Ok((out, bookmark))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_key_is_deterministic_and_distinct() {
        let a = state_key_for("aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee");
        let b = state_key_for("aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeef");
        assert_eq!(a, state_key_for("aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee"));
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }
}
