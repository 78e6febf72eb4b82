// Copyright (c) 2026 Fedplan Contributors
// SPDX-License-Identifier: Apache-2.0

//! Data managers and data samples. Samples are append-only: once
//! registered, only their owner may associate them with further managers.

use crate::assets::{AssetType, ChecksumAddress, DataManager, DataSample};
use crate::error::{LedgerError, LedgerResult};
use crate::input::{
    InputBookmark, InputDataManager, InputDataSample, InputKey, InputUpdateDataManager,
    InputUpdateDataSample,
};
use crate::ledger::{LedgerDb, LedgerStore, OUTPUT_PAGE_SIZE};
use crate::output::{OutputDataManager, OutputDataSample, OutputDataset, OutputKeys};
use crate::permissions::new_permissions;

pub const DATA_MANAGER_OWNER_INDEX: &str = "dataManager~owner~key";
pub const DATA_MANAGER_OBJECTIVE_INDEX: &str = "dataManager~objective~key";
pub const DATA_SAMPLE_MANAGER_INDEX: &str = "dataSample~dataManager~key";
pub const DATA_SAMPLE_TEST_ONLY_INDEX: &str = "dataSample~dataManager~testOnly~key";

pub fn register_data_manager<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    inp: &InputDataManager,
) -> LedgerResult<String> {
    inp.validate()?;
    if let Some(objective_key) = &inp.objective_key {
        db.get_objective(objective_key).map_err(|err| {
            LedgerError::bad_request(format!("error checking associated objective: {err}"))
        })?;
    }
    let owner = db.creator().to_string();
    let permissions = new_permissions(db, &inp.permissions, &owner)?;
    let data_manager = DataManager {
        key: inp.key.clone(),
        name: inp.name.clone(),
        asset_type: AssetType::DataManager,
        opener: ChecksumAddress {
            checksum: inp.opener_checksum.clone(),
            storage_address: inp.opener_storage_address.clone(),
        },
        data_type: inp.data_type.clone(),
        description: ChecksumAddress {
            checksum: inp.description_checksum.clone(),
            storage_address: inp.description_storage_address.clone(),
        },
        owner: owner.clone(),
        objective_key: inp.objective_key.clone(),
        permissions,
        metadata: inp.metadata.clone(),
    };
    db.add(&inp.key, &data_manager)?;
    if let Some(objective_key) = &inp.objective_key {
        db.create_index(
            DATA_MANAGER_OBJECTIVE_INDEX,
            &["dataManager", objective_key, &inp.key],
        )?;
    }
    db.create_index(DATA_MANAGER_OWNER_INDEX, &["dataManager", &owner, &inp.key])?;
    Ok(inp.key.clone())
}

pub fn register_data_sample<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    inp: &InputDataSample,
) -> LedgerResult<OutputKeys> {
    inp.validate()?;
    let existing: Vec<String> = inp
        .keys
        .iter()
        .filter(|key| db.key_exists(key))
        .cloned()
        .collect();
    if !existing.is_empty() {
        return Err(LedgerError::conflict_keys(
            format!("data samples with keys {existing:?} already exist"),
            existing,
        ));
    }
    if !inp.data_manager_keys.is_empty() {
        check_data_manager_owner(db, &inp.data_manager_keys)?;
    }
    let owner = db.creator().to_string();
    let sample = DataSample {
        asset_type: AssetType::DataSample,
        data_manager_keys: inp.data_manager_keys.clone(),
        owner,
        test_only: inp.test_only,
    };
    for sample_key in &inp.keys {
        db.add(sample_key, &sample)?;
        for data_manager_key in &sample.data_manager_keys {
            db.create_index(
                DATA_SAMPLE_MANAGER_INDEX,
                &["dataSample", data_manager_key, sample_key],
            )?;
            db.create_index(
                DATA_SAMPLE_TEST_ONLY_INDEX,
                &[
                    "dataSample",
                    data_manager_key,
                    &sample.test_only.to_string(),
                    sample_key,
                ],
            )?;
        }
    }
    Ok(OutputKeys {
        keys: inp.keys.clone(),
    })
}

/// Associate one or more samples with further data managers. Only the
/// sample owner may do so.
pub fn update_data_sample<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    inp: &InputUpdateDataSample,
) -> LedgerResult<OutputKeys> {
    inp.validate()?;
    check_data_manager_owner(db, &inp.data_manager_keys)?;
    for sample_key in &inp.keys {
        let mut sample = db.get_data_sample(sample_key)?;
        if db.creator() != sample.owner {
            return Err(LedgerError::forbidden(format!(
                "{} is not the owner of data sample {sample_key}",
                db.creator()
            )));
        }
        for data_manager_key in &inp.data_manager_keys {
            if sample.data_manager_keys.iter().any(|k| k == data_manager_key) {
                continue;
            }
            sample.data_manager_keys.push(data_manager_key.clone());
            db.create_index(
                DATA_SAMPLE_MANAGER_INDEX,
                &["dataSample", data_manager_key, sample_key],
            )?;
            db.create_index(
                DATA_SAMPLE_TEST_ONLY_INDEX,
                &[
                    "dataSample",
                    data_manager_key,
                    &sample.test_only.to_string(),
                    sample_key,
                ],
            )?;
        }
        db.put(sample_key, &sample)?;
    }
    Ok(OutputKeys {
        keys: inp.keys.clone(),
    })
}

/// Single-shot assignment of an objective to a data manager.
pub fn update_data_manager<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    inp: &InputUpdateDataManager,
) -> LedgerResult<String> {
    inp.validate()?;
    db.get_objective(&inp.objective_key)?;
    let mut data_manager = db.get_data_manager(&inp.data_manager_key)?;
    if let Some(existing) = &data_manager.objective_key {
        return Err(LedgerError::bad_request(format!(
            "data manager {} already has objective {existing}",
            inp.data_manager_key
        )));
    }
    if db.creator() != data_manager.owner {
        return Err(LedgerError::forbidden(format!(
            "{} is not the owner of data manager {}",
            db.creator(),
            inp.data_manager_key
        )));
    }
    data_manager.objective_key = Some(inp.objective_key.clone());
    db.put(&inp.data_manager_key, &data_manager)?;
    db.create_index(
        DATA_MANAGER_OBJECTIVE_INDEX,
        &["dataManager", &inp.objective_key, &inp.data_manager_key],
    )?;
    Ok(inp.data_manager_key.clone())
}

pub fn query_data_manager<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    inp: &InputKey,
) -> LedgerResult<OutputDataManager> {
    inp.validate()?;
    let data_manager = db.get_data_manager(&inp.key)?;
    Ok(OutputDataManager::fill(&data_manager))
}

pub fn query_data_managers<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    inp: &InputBookmark,
) -> LedgerResult<(Vec<OutputDataManager>, String)> {
    let (keys, bookmark) = db.get_index_keys_with_pagination(
        DATA_MANAGER_OWNER_INDEX,
        &["dataManager"],
        OUTPUT_PAGE_SIZE,
        &inp.bookmark,
    )?;
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        let data_manager = db.get_data_manager(&key)?;
        out.push(OutputDataManager::fill(&data_manager));
    }
    Ok((out, bookmark))
}

/// A data manager together with all its train and test sample keys.
pub fn query_dataset<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    inp: &InputKey,
) -> LedgerResult<OutputDataset> {
    inp.validate()?;
    let data_manager = db.get_data_manager(&inp.key)?;
    let train_keys = get_dataset_sample_keys(db, &inp.key, false)?;
    let test_keys = get_dataset_sample_keys(db, &inp.key, true)?;
    Ok(OutputDataset::fill(&data_manager, train_keys, test_keys))
}

pub fn query_data_samples<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    inp: &InputBookmark,
) -> LedgerResult<(Vec<OutputDataSample>, String)> {
    let (keys, bookmark) = db.get_index_keys_with_pagination(
        DATA_SAMPLE_MANAGER_INDEX,
        &["dataSample"],
        OUTPUT_PAGE_SIZE,
        &inp.bookmark,
    )?;
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        let sample = db.get_data_sample(&key)?;
        out.push(OutputDataSample::fill(&key, &sample));
    }
    Ok((out, bookmark))
}

/// Check that every sample belongs to the data manager; returns whether
/// the samples are all test-only and all train-only respectively.
pub fn check_same_data_manager<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    data_manager_key: &str,
    data_sample_keys: &[String],
) -> LedgerResult<(bool, bool)> {
    let mut test_only = true;
    let mut train_only = true;
    for sample_key in data_sample_keys {
        let sample = db.get_data_sample(sample_key).map_err(|err| {
            LedgerError::bad_request(format!("could not retrieve data sample: {err}"))
        })?;
        if !sample.data_manager_keys.iter().any(|k| k == data_manager_key) {
            return Err(LedgerError::bad_request(format!(
                "data sample {sample_key} does not belong to data manager {data_manager_key}"
            )));
        }
        test_only = test_only && sample.test_only;
        train_only = train_only && !sample.test_only;
    }
    Ok((test_only, train_only))
}

pub fn get_data_manager_owner<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    data_manager_key: &str,
) -> LedgerResult<String> {
    let data_manager = db.get_data_manager(data_manager_key).map_err(|err| {
        LedgerError::bad_request(format!("data manager {data_manager_key} not found: {err}"))
    })?;
    Ok(data_manager.owner)
}

fn check_data_manager_owner<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    data_manager_keys: &[String],
) -> LedgerResult<()> {
    for key in data_manager_keys {
        let data_manager = db.get_data_manager(key).map_err(|err| {
            LedgerError::bad_request(format!("could not retrieve data manager: {err}"))
        })?;
        if db.creator() != data_manager.owner {
            return Err(LedgerError::forbidden(format!(
                "{} is not the owner of the data manager {key}",
                db.creator()
            )));
        }
    }
    Ok(())
}

fn get_dataset_sample_keys<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    data_manager_key: &str,
    test_only: bool,
) -> LedgerResult<Vec<String>> {
    db.get_index_keys(
        DATA_SAMPLE_TEST_ONLY_INDEX,
        &["dataSample", data_manager_key, &test_only.to_string()],
    )
}
