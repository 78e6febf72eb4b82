// Copyright (c) 2026 Fedplan Contributors
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle rules shared by the three training tuple flavors and by
//! testtuples: status derivation from parents, the transition table, and
//! the propagation of a finished tuple's status to its dependents.

use crate::assets::{AssetType, KeyChecksum, KeyChecksumAddress, Status};
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{LedgerDb, LedgerStore};
use crate::{aggregatetuple, composite, testtuple, traintuple};

/// Index of child training tuples by parent tuple key.
pub const TUPLE_IN_MODEL_INDEX: &str = "tuple~inModel~key";
/// Index of testtuples by the training tuple they evaluate.
pub const TESTTUPLE_BY_TRAINTUPLE_INDEX: &str = "testtuple~traintuple~certified~key";
/// Index of produced models by model key.
pub const MODEL_INDEX: &str = "model~key~traintuple";

/// Status of a new tuple, derived from its parents' statuses.
pub fn determine_status_from_in_models(parent_statuses: &[Status]) -> Status {
    if parent_statuses
        .iter()
        .any(|s| matches!(s, Status::Failed | Status::Aborted))
    {
        return Status::Aborted;
    }
    if parent_statuses.iter().all(|s| *s == Status::Done) {
        return Status::Todo;
    }
    Status::Waiting
}

/// The transition table of §4.4. Terminal states reject every update.
pub fn check_update_tuple(old: Status, new: Status) -> LedgerResult<()> {
    let valid = matches!(
        (old, new),
        (Status::Waiting, Status::Todo)
            | (Status::Todo, Status::Doing)
            | (Status::Doing, Status::Done)
            | (Status::Waiting, Status::Failed)
            | (Status::Todo, Status::Failed)
            | (Status::Doing, Status::Failed)
            | (Status::Waiting, Status::Aborted)
    );
    if valid {
        Ok(())
    } else {
        Err(LedgerError::bad_request(format!(
            "cannot change status from {old} to {new}"
        )))
    }
}

/// Lifecycle log operations may only be issued by the tuple's worker.
pub fn validate_tuple_owner<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    worker: &str,
) -> LedgerResult<()> {
    if db.creator() != worker {
        return Err(LedgerError::forbidden(format!(
            "{} is not allowed to update this tuple, expected worker {worker}",
            db.creator()
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UpdateDecision {
    Skip,
    Apply,
}

/// Common guards of `commit_status_update`: equal statuses are a no-op and
/// an abort of a non-waiting tuple is silently skipped, which keeps parent
/// propagation idempotent.
pub(crate) fn prepare_status_update(old: Status, new: Status) -> LedgerResult<UpdateDecision> {
    if old == new {
        return Ok(UpdateDecision::Skip);
    }
    if new == Status::Aborted && old != Status::Waiting {
        return Ok(UpdateDecision::Skip);
    }
    check_update_tuple(old, new)?;
    Ok(UpdateDecision::Apply)
}

/// True when every parent other than `just_done_key` is already done. The
/// just-updated parent is excluded because its own write is part of the
/// current transaction.
pub fn is_ready<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    in_model_keys: &[String],
    just_done_key: &str,
) -> LedgerResult<bool> {
    for key in in_model_keys {
        if key == just_done_key {
            continue;
        }
        let parent = db.get_generic_tuple(key)?;
        if parent.status != Status::Done {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Walk the training children of a tuple that just reached `done`, `failed`
/// or `aborted`. Waiting children move to `todo` when every parent is done,
/// or inherit the failure; on failure the walk recurses into descendants.
/// `visited` makes each node update at most once per transaction and
/// terminates diamonds.
pub fn update_traintuple_children<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    parent_key: &str,
    parent_status: Status,
    visited: &mut Vec<String>,
) -> LedgerResult<()> {
    let child_keys = db.get_index_keys(TUPLE_IN_MODEL_INDEX, &["tuple", parent_key])?;
    for child_key in child_keys {
        if visited.contains(&child_key) {
            continue;
        }
        let child = db.get_generic_tuple(&child_key)?;
        if matches!(child.status, Status::Failed | Status::Aborted) {
            continue;
        }
        if child.status != Status::Waiting {
            return Err(LedgerError::internal(format!(
                "tuple {child_key} has invalid status {} instead of waiting",
                child.status
            )));
        }

        let child_status = match child.asset_type {
            AssetType::Traintuple => {
                traintuple::update_traintuple_child(db, parent_key, &child_key, parent_status)?
            }
            AssetType::CompositeTraintuple => {
                composite::update_composite_traintuple_child(db, parent_key, &child_key, parent_status)?
            }
            AssetType::Aggregatetuple => {
                aggregatetuple::update_aggregatetuple_child(db, parent_key, &child_key, parent_status)?
            }
            other => {
                return Err(LedgerError::internal(format!(
                    "unknown child tuple type {other} for {child_key}"
                )))
            }
        };

        visited.push(child_key.clone());
        if matches!(parent_status, Status::Failed | Status::Aborted) {
            update_testtuple_children(db, &child_key, child_status)?;
            update_traintuple_children(db, &child_key, child_status, visited)?;
        }
    }
    Ok(())
}

/// Child status implied by the parent's transition: inherit failures and
/// aborts, move to `todo` when this parent was the last one pending.
pub(crate) fn child_status_for<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    parent_key: &str,
    parent_status: Status,
    child_in_models: &[String],
) -> LedgerResult<Option<Status>> {
    match parent_status {
        Status::Failed => Ok(Some(Status::Failed)),
        Status::Aborted => Ok(Some(Status::Aborted)),
        Status::Done => {
            if is_ready(db, child_in_models, parent_key)? {
                Ok(Some(Status::Todo))
            } else {
                Ok(None)
            }
        }
        _ => Ok(None),
    }
}

/// Move the testtuples of a finished training tuple: `done` readies them,
/// `failed`/`aborted` ends them.
pub fn update_testtuple_children<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    parent_key: &str,
    parent_status: Status,
) -> LedgerResult<()> {
    let new_status = match parent_status {
        Status::Done => Status::Todo,
        Status::Failed => Status::Failed,
        Status::Aborted => Status::Aborted,
        _ => return Ok(()),
    };
    let testtuple_keys =
        db.get_index_keys(TESTTUPLE_BY_TRAINTUPLE_INDEX, &["testtuple", parent_key])?;
    for testtuple_key in testtuple_keys {
        let mut tt = db.get_testtuple(&testtuple_key)?;
        if tt.status.is_terminal() {
            continue;
        }
        testtuple::commit_status_update(db, &testtuple_key, &mut tt, new_status)?;
        db.add_tuple_event(&testtuple_key);
    }
    Ok(())
}

/// Out-model of a training tuple, for hydrating child views. For a
/// composite parent this resolves the trunk out-model; the head out-model
/// has its own lookup below.
pub fn get_out_model_key_checksum_address<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    tuple_key: &str,
    allowed: &[AssetType],
) -> LedgerResult<Option<KeyChecksumAddress>> {
    let asset_type = db.asset_type(tuple_key)?;
    if !allowed.contains(&asset_type) {
        return Err(LedgerError::internal(format!(
            "model lookup on {tuple_key}: unexpected asset type {asset_type}"
        )));
    }
    match asset_type {
        AssetType::Traintuple => Ok(db.get_traintuple(tuple_key)?.out_model),
        AssetType::CompositeTraintuple => {
            Ok(db.get_composite_traintuple(tuple_key)?.out_trunk_model.out_model)
        }
        AssetType::Aggregatetuple => Ok(db.get_aggregatetuple(tuple_key)?.out_model),
        other => Err(LedgerError::internal(format!(
            "model lookup on {tuple_key}: {other} produces no model"
        ))),
    }
}

/// Head out-model of a composite traintuple.
pub fn get_out_head_model_key_checksum<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    tuple_key: &str,
) -> LedgerResult<Option<KeyChecksum>> {
    Ok(db.get_composite_traintuple(tuple_key)?.out_head_model.out_model)
}

/// Keys of every model a training tuple has produced so far.
pub fn out_model_keys<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    tuple_key: &str,
) -> LedgerResult<Vec<String>> {
    let mut keys = Vec::new();
    match db.asset_type(tuple_key)? {
        AssetType::Traintuple => {
            if let Some(model) = db.get_traintuple(tuple_key)?.out_model {
                keys.push(model.key);
            }
        }
        AssetType::CompositeTraintuple => {
            let t = db.get_composite_traintuple(tuple_key)?;
            if let Some(model) = t.out_head_model.out_model {
                keys.push(model.key);
            }
            if let Some(model) = t.out_trunk_model.out_model {
                keys.push(model.key);
            }
        }
        AssetType::Aggregatetuple => {
            if let Some(model) = db.get_aggregatetuple(tuple_key)?.out_model {
                keys.push(model.key);
            }
        }
        _ => {}
    }
    Ok(keys)
}

/// Record a produced model key so `queryModel` can find its tuple.
pub fn create_model_index<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    model_key: &str,
    tuple_key: &str,
) -> LedgerResult<()> {
    db.create_index(MODEL_INDEX, &["model", model_key, tuple_key])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_from_parents() {
        assert_eq!(determine_status_from_in_models(&[]), Status::Todo);
        assert_eq!(
            determine_status_from_in_models(&[Status::Done, Status::Done]),
            Status::Todo
        );
        assert_eq!(
            determine_status_from_in_models(&[Status::Done, Status::Doing]),
            Status::Waiting
        );
        assert_eq!(
            determine_status_from_in_models(&[Status::Done, Status::Failed]),
            Status::Aborted
        );
        assert_eq!(
            determine_status_from_in_models(&[Status::Aborted]),
            Status::Aborted
        );
    }

    #[test]
    fn transition_table() {
        assert!(check_update_tuple(Status::Waiting, Status::Todo).is_ok());
        assert!(check_update_tuple(Status::Todo, Status::Doing).is_ok());
        assert!(check_update_tuple(Status::Doing, Status::Done).is_ok());
        assert!(check_update_tuple(Status::Doing, Status::Failed).is_ok());
        assert!(check_update_tuple(Status::Waiting, Status::Aborted).is_ok());

        assert!(check_update_tuple(Status::Waiting, Status::Doing).is_err());
        assert!(check_update_tuple(Status::Todo, Status::Done).is_err());
        assert!(check_update_tuple(Status::Done, Status::Doing).is_err());
        assert!(check_update_tuple(Status::Failed, Status::Todo).is_err());
        assert!(check_update_tuple(Status::Aborted, Status::Todo).is_err());
    }

    #[test]
    fn aborting_a_non_waiting_tuple_is_skipped() {
        assert_eq!(
            prepare_status_update(Status::Doing, Status::Aborted).expect("guard"),
            UpdateDecision::Skip
        );
        assert_eq!(
            prepare_status_update(Status::Waiting, Status::Aborted).expect("guard"),
            UpdateDecision::Apply
        );
        assert_eq!(
            prepare_status_update(Status::Todo, Status::Todo).expect("guard"),
            UpdateDecision::Skip
        );
    }
}
