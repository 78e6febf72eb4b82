// Copyright (c) 2026 Fedplan Contributors
// SPDX-License-Identifier: Apache-2.0

//! Objectives: the metric against which testtuples are evaluated, with an
//! optional canonical test dataset that certifies them.

use crate::assets::{AssetType, ChecksumAddress, ChecksumAddressName, Dataset, Objective};
use crate::data::check_same_data_manager;
use crate::error::{LedgerError, LedgerResult};
use crate::input::{InputBookmark, InputKey, InputObjective};
use crate::ledger::{LedgerDb, LedgerStore, OUTPUT_PAGE_SIZE};
use crate::output::OutputObjective;
use crate::permissions::new_permissions;

pub const OBJECTIVE_OWNER_INDEX: &str = "objective~owner~key";

pub fn register_objective<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    inp: &InputObjective,
) -> LedgerResult<String> {
    inp.validate()?;
    let owner = db.creator().to_string();

    let test_dataset = if inp.test_dataset.is_empty() {
        None
    } else {
        let (test_only, _) = check_same_data_manager(
            db,
            &inp.test_dataset.data_manager_key,
            &inp.test_dataset.data_sample_keys,
        )?;
        if !test_only {
            return Err(LedgerError::bad_request(
                "objective test dataset must hold test only data samples",
            ));
        }
        let data_manager = db
            .get_data_manager(&inp.test_dataset.data_manager_key)
            .map_err(|err| {
                LedgerError::bad_request(format!("could not retrieve data manager: {err}"))
            })?;
        Some(Dataset {
            data_manager_key: inp.test_dataset.data_manager_key.clone(),
            data_sample_keys: inp.test_dataset.data_sample_keys.clone(),
            metadata: Default::default(),
            worker: data_manager.owner,
        })
    };

    let permissions = new_permissions(db, &inp.permissions, &owner)?;
    let objective = Objective {
        key: inp.key.clone(),
        name: inp.name.clone(),
        asset_type: AssetType::Objective,
        description: ChecksumAddress {
            checksum: inp.description_checksum.clone(),
            storage_address: inp.description_storage_address.clone(),
        },
        metrics: ChecksumAddressName {
            checksum: inp.metrics_checksum.clone(),
            storage_address: inp.metrics_storage_address.clone(),
            name: inp.metrics_name.clone(),
        },
        owner: owner.clone(),
        test_dataset,
        permissions,
        metadata: inp.metadata.clone(),
    };
    db.add(&inp.key, &objective)?;
    db.create_index(OBJECTIVE_OWNER_INDEX, &["objective", &owner, &inp.key])?;
    Ok(inp.key.clone())
}

pub fn query_objective<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    inp: &InputKey,
) -> LedgerResult<OutputObjective> {
    inp.validate()?;
    Ok(OutputObjective::fill(&db.get_objective(&inp.key)?))
}

pub fn query_objectives<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    inp: &InputBookmark,
) -> LedgerResult<(Vec<OutputObjective>, String)> {
    let (keys, bookmark) = db.get_index_keys_with_pagination(
        OBJECTIVE_OWNER_INDEX,
        &["objective"],
        OUTPUT_PAGE_SIZE,
        &inp.bookmark,
    )?;
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        out.push(OutputObjective::fill(&db.get_objective(&key)?));
    }
    Ok((out, bookmark))
}
