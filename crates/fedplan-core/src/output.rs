// Copyright (c) 2026 Fedplan Contributors
// SPDX-License-Identifier: Apache-2.0

//! Output projections. Queries never return raw records: algo information
//! is inlined, parent out-models are resolved on children, and the data
//! manager's opener checksum is inlined on datasets.

use serde::Serialize;

use crate::assets::{
    Aggregatetuple, Algo, AssetType, ChecksumAddress, ChecksumAddressName, ComputePlan,
    ComputePlanStatus, CompositeTraintuple, DataManager, DataSample, Dataset, KeyChecksum,
    KeyChecksumAddress, KeyChecksumAddressName, Metadata, Model, Objective, Status, Testtuple,
    Traintuple, TrainTask, TtDataset,
};
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{LedgerDb, LedgerStore};
use crate::permissions::Permissions;
use crate::tuple::{get_out_head_model_key_checksum, get_out_model_key_checksum_address};

#[derive(Debug, Clone, Serialize)]
pub struct OutputKey {
    pub key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputKeys {
    pub keys: Vec<String>,
}

/// Listing envelope: one page of results plus the opaque bookmark of the
/// next page.
#[derive(Debug, Clone, Serialize)]
pub struct Listing<T> {
    pub results: Vec<T>,
    pub bookmark: String,
}

impl<T> Listing<T> {
    pub fn new(results: Vec<T>, bookmark: String) -> Self {
        Self { results, bookmark }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputAlgo {
    pub key: String,
    pub name: String,
    pub checksum: String,
    pub storage_address: String,
    pub description: ChecksumAddress,
    pub owner: String,
    pub permissions: Permissions,
    pub metadata: Metadata,
}

impl OutputAlgo {
    pub fn fill(algo: &Algo) -> Self {
        Self {
            key: algo.key.clone(),
            name: algo.name.clone(),
            checksum: algo.checksum.clone(),
            storage_address: algo.storage_address.clone(),
            description: algo.description.clone(),
            owner: algo.owner.clone(),
            permissions: algo.permissions.clone(),
            metadata: algo.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputObjective {
    pub key: String,
    pub name: String,
    pub description: ChecksumAddress,
    pub metrics: ChecksumAddressName,
    pub owner: String,
    pub test_dataset: Option<Dataset>,
    pub permissions: Permissions,
    pub metadata: Metadata,
}

impl OutputObjective {
    pub fn fill(objective: &Objective) -> Self {
        Self {
            key: objective.key.clone(),
            name: objective.name.clone(),
            description: objective.description.clone(),
            metrics: objective.metrics.clone(),
            owner: objective.owner.clone(),
            test_dataset: objective.test_dataset.clone(),
            permissions: objective.permissions.clone(),
            metadata: objective.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputDataManager {
    pub key: String,
    pub name: String,
    pub opener: ChecksumAddress,
    #[serde(rename = "type")]
    pub data_type: String,
    pub description: ChecksumAddress,
    pub owner: String,
    pub objective_key: Option<String>,
    pub permissions: Permissions,
    pub metadata: Metadata,
}

impl OutputDataManager {
    pub fn fill(data_manager: &DataManager) -> Self {
        Self {
            key: data_manager.key.clone(),
            name: data_manager.name.clone(),
            opener: data_manager.opener.clone(),
            data_type: data_manager.data_type.clone(),
            description: data_manager.description.clone(),
            owner: data_manager.owner.clone(),
            objective_key: data_manager.objective_key.clone(),
            permissions: data_manager.permissions.clone(),
            metadata: data_manager.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputDataSample {
    pub key: String,
    pub data_manager_keys: Vec<String>,
    pub owner: String,
    pub test_only: bool,
}

impl OutputDataSample {
    pub fn fill(key: &str, sample: &DataSample) -> Self {
        Self {
            key: key.to_string(),
            data_manager_keys: sample.data_manager_keys.clone(),
            owner: sample.owner.clone(),
            test_only: sample.test_only,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputDataset {
    #[serde(flatten)]
    pub data_manager: OutputDataManager,
    pub train_data_sample_keys: Vec<String>,
    pub test_data_sample_keys: Vec<String>,
}

impl OutputDataset {
    pub fn fill(
        data_manager: &DataManager,
        train_data_sample_keys: Vec<String>,
        test_data_sample_keys: Vec<String>,
    ) -> Self {
        Self {
            data_manager: OutputDataManager::fill(data_manager),
            train_data_sample_keys,
            test_data_sample_keys,
        }
    }
}

/// Dataset view embedded in training tuple projections.
#[derive(Debug, Clone, Serialize)]
pub struct OutputTtDataset {
    pub key: String,
    pub worker: String,
    pub data_sample_keys: Vec<String>,
    pub opener_checksum: String,
    pub metadata: Metadata,
}

fn fill_algo_summary(algo: &Algo) -> KeyChecksumAddressName {
    KeyChecksumAddressName {
        key: algo.key.clone(),
        checksum: algo.checksum.clone(),
        storage_address: algo.storage_address.clone(),
        name: algo.name.clone(),
    }
}

fn fill_tt_dataset<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    dataset: &Dataset,
) -> LedgerResult<OutputTtDataset> {
    let data_manager = db.get_data_manager(&dataset.data_manager_key).map_err(|err| {
        LedgerError::internal(format!(
            "could not retrieve data manager {}: {err}",
            dataset.data_manager_key
        ))
    })?;
    Ok(OutputTtDataset {
        key: data_manager.key,
        worker: dataset.worker.clone(),
        data_sample_keys: dataset.data_sample_keys.clone(),
        opener_checksum: data_manager.opener.checksum,
        metadata: dataset.metadata.clone(),
    })
}

/// Hydrate one parent reference into a model view. The reference stays even
/// when the parent has not produced its model yet.
fn fill_in_model<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    parent_key: &str,
) -> LedgerResult<Model> {
    let out_model = get_out_model_key_checksum_address(
        db,
        parent_key,
        &[
            AssetType::Traintuple,
            AssetType::CompositeTraintuple,
            AssetType::Aggregatetuple,
        ],
    )
    .map_err(|err| {
        LedgerError::internal(format!(
            "could not fill in-model with key {parent_key}: {err}"
        ))
    })?;
    let mut model = Model {
        traintuple_key: parent_key.to_string(),
        ..Default::default()
    };
    if let Some(m) = out_model {
        model.key = m.key;
        model.checksum = m.checksum;
        model.storage_address = m.storage_address;
    }
    Ok(model)
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputTraintuple {
    pub key: String,
    pub algo: KeyChecksumAddressName,
    pub creator: String,
    pub compute_plan_key: Option<String>,
    pub dataset: OutputTtDataset,
    pub in_models: Vec<Model>,
    pub log: String,
    pub metadata: Metadata,
    pub out_model: Option<KeyChecksumAddress>,
    pub permissions: Permissions,
    pub rank: u32,
    pub status: Status,
    pub tag: String,
}

impl OutputTraintuple {
    pub fn fill<S: LedgerStore>(
        db: &LedgerDb<'_, S>,
        tuple: &Traintuple,
    ) -> LedgerResult<Self> {
        let algo = db.get_algo(&tuple.algo_key).map_err(|err| {
            LedgerError::internal(format!(
                "could not retrieve algo {}: {err}",
                tuple.algo_key
            ))
        })?;
        let mut in_models = Vec::with_capacity(tuple.in_model_keys.len());
        for parent_key in &tuple.in_model_keys {
            in_models.push(fill_in_model(db, parent_key)?);
        }
        Ok(Self {
            key: tuple.key.clone(),
            algo: fill_algo_summary(&algo),
            creator: tuple.creator.clone(),
            compute_plan_key: tuple.compute_plan_key.clone(),
            dataset: fill_tt_dataset(db, &tuple.dataset)?,
            in_models,
            log: tuple.log.clone(),
            metadata: tuple.metadata.clone(),
            out_model: tuple.out_model.clone(),
            permissions: tuple.permissions.clone(),
            rank: tuple.rank,
            status: tuple.status,
            tag: tuple.tag.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputCompositeOutHeadModel {
    pub out_model: Option<KeyChecksum>,
    pub permissions: Permissions,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputCompositeOutTrunkModel {
    pub out_model: Option<KeyChecksumAddress>,
    pub permissions: Permissions,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputCompositeTraintuple {
    pub key: String,
    pub algo: KeyChecksumAddressName,
    pub creator: String,
    pub compute_plan_key: Option<String>,
    pub dataset: OutputTtDataset,
    pub in_head_model: Option<Model>,
    pub in_trunk_model: Option<Model>,
    pub log: String,
    pub metadata: Metadata,
    pub out_head_model: OutputCompositeOutHeadModel,
    pub out_trunk_model: OutputCompositeOutTrunkModel,
    pub rank: u32,
    pub status: Status,
    pub tag: String,
}

impl OutputCompositeTraintuple {
    pub fn fill<S: LedgerStore>(
        db: &LedgerDb<'_, S>,
        tuple: &CompositeTraintuple,
    ) -> LedgerResult<Self> {
        let algo = db.get_composite_algo(&tuple.algo_key).map_err(|err| {
            LedgerError::internal(format!(
                "could not retrieve composite algo {}: {err}",
                tuple.algo_key
            ))
        })?;

        // The head parent is always another composite; its head out-model
        // never carries a storage address.
        let in_head_model = match &tuple.in_head_model {
            Some(parent_key) => {
                let out_model =
                    get_out_head_model_key_checksum(db, parent_key).map_err(|err| {
                        LedgerError::internal(format!(
                            "could not fill head in-model with key {parent_key}: {err}"
                        ))
                    })?;
                let mut model = Model {
                    traintuple_key: parent_key.clone(),
                    ..Default::default()
                };
                if let Some(m) = out_model {
                    model.key = m.key;
                    model.checksum = m.checksum;
                }
                Some(model)
            }
            None => None,
        };
        let in_trunk_model = match &tuple.in_trunk_model {
            Some(parent_key) => Some(fill_in_model(db, parent_key)?),
            None => None,
        };

        Ok(Self {
            key: tuple.key.clone(),
            algo: fill_algo_summary(&algo),
            creator: tuple.creator.clone(),
            compute_plan_key: tuple.compute_plan_key.clone(),
            dataset: fill_tt_dataset(db, &tuple.dataset)?,
            in_head_model,
            in_trunk_model,
            log: tuple.log.clone(),
            metadata: tuple.metadata.clone(),
            out_head_model: OutputCompositeOutHeadModel {
                out_model: tuple.out_head_model.out_model.clone(),
                permissions: tuple.out_head_model.permissions.clone(),
            },
            out_trunk_model: OutputCompositeOutTrunkModel {
                out_model: tuple.out_trunk_model.out_model.clone(),
                permissions: tuple.out_trunk_model.permissions.clone(),
            },
            rank: tuple.rank,
            status: tuple.status,
            tag: tuple.tag.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputAggregatetuple {
    pub key: String,
    pub algo: KeyChecksumAddressName,
    pub creator: String,
    pub compute_plan_key: Option<String>,
    pub in_models: Vec<Model>,
    pub log: String,
    pub metadata: Metadata,
    pub out_model: Option<KeyChecksumAddress>,
    pub permissions: Permissions,
    pub rank: u32,
    pub status: Status,
    pub tag: String,
    pub worker: String,
}

impl OutputAggregatetuple {
    pub fn fill<S: LedgerStore>(
        db: &LedgerDb<'_, S>,
        tuple: &Aggregatetuple,
    ) -> LedgerResult<Self> {
        let algo = db.get_aggregate_algo(&tuple.algo_key).map_err(|err| {
            LedgerError::internal(format!(
                "could not retrieve aggregate algo {}: {err}",
                tuple.algo_key
            ))
        })?;
        let mut in_models = Vec::with_capacity(tuple.in_model_keys.len());
        for parent_key in &tuple.in_model_keys {
            in_models.push(fill_in_model(db, parent_key)?);
        }
        Ok(Self {
            key: tuple.key.clone(),
            algo: fill_algo_summary(&algo),
            creator: tuple.creator.clone(),
            compute_plan_key: tuple.compute_plan_key.clone(),
            in_models,
            log: tuple.log.clone(),
            metadata: tuple.metadata.clone(),
            out_model: tuple.out_model.clone(),
            permissions: tuple.permissions.clone(),
            rank: tuple.rank,
            status: tuple.status,
            tag: tuple.tag.clone(),
            worker: tuple.worker.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputTesttupleObjective {
    pub key: String,
    pub metrics: ChecksumAddress,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputTesttuple {
    pub key: String,
    pub algo: KeyChecksumAddressName,
    pub certified: bool,
    pub compute_plan_key: Option<String>,
    pub creator: String,
    pub dataset: TtDataset,
    pub log: String,
    pub metadata: Metadata,
    pub objective: OutputTesttupleObjective,
    pub permissions: Permissions,
    pub rank: u32,
    pub status: Status,
    pub tag: String,
    pub traintuple_key: String,
}

impl OutputTesttuple {
    pub fn fill<S: LedgerStore>(db: &LedgerDb<'_, S>, tuple: &Testtuple) -> LedgerResult<Self> {
        // The parent may be any of the three training kinds, so the algo
        // record is read untyped.
        let algo: Algo = db.get(&tuple.algo_key).map_err(|err| {
            LedgerError::internal(format!(
                "could not retrieve algo {}: {err}",
                tuple.algo_key
            ))
        })?;
        let objective = db.get_objective(&tuple.objective_key).map_err(|err| {
            LedgerError::internal(format!(
                "could not retrieve objective {}: {err}",
                tuple.objective_key
            ))
        })?;
        Ok(Self {
            key: tuple.key.clone(),
            algo: fill_algo_summary(&algo),
            certified: tuple.certified,
            compute_plan_key: tuple.compute_plan_key.clone(),
            creator: tuple.creator.clone(),
            dataset: tuple.dataset.clone(),
            log: tuple.log.clone(),
            metadata: tuple.metadata.clone(),
            objective: OutputTesttupleObjective {
                key: objective.key,
                metrics: ChecksumAddress {
                    checksum: objective.metrics.checksum,
                    storage_address: objective.metrics.storage_address,
                },
            },
            permissions: tuple.permissions.clone(),
            rank: tuple.rank,
            status: tuple.status,
            tag: tuple.tag.clone(),
            traintuple_key: tuple.traintuple_key.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputComputePlan {
    pub key: String,
    pub traintuple_keys: Vec<String>,
    pub composite_traintuple_keys: Vec<String>,
    pub aggregatetuple_keys: Vec<String>,
    pub testtuple_keys: Vec<String>,
    pub id_to_train_task: std::collections::BTreeMap<String, TrainTask>,
    pub workers: Vec<String>,
    pub tag: String,
    pub metadata: Metadata,
    pub clean_models: bool,
    pub status: ComputePlanStatus,
}

impl OutputComputePlan {
    pub fn fill<S: LedgerStore>(db: &LedgerDb<'_, S>, plan: &ComputePlan) -> LedgerResult<Self> {
        let state = db.get_compute_plan_state(&plan.state_key)?;
        Ok(Self {
            key: plan.key.clone(),
            traintuple_keys: plan.traintuple_keys.clone(),
            composite_traintuple_keys: plan.composite_traintuple_keys.clone(),
            aggregatetuple_keys: plan.aggregatetuple_keys.clone(),
            testtuple_keys: plan.testtuple_keys.clone(),
            id_to_train_task: plan.id_to_train_task.clone(),
            workers: plan.workers.clone(),
            tag: plan.tag.clone(),
            metadata: plan.metadata.clone(),
            clean_models: plan.clean_models,
            status: state.status,
        })
    }
}

/// A produced model, as returned by `queryModel`.
#[derive(Debug, Clone, Serialize)]
pub struct OutputModel {
    pub key: String,
    pub checksum: String,
    pub storage_address: Option<String>,
    pub owner: String,
    pub traintuple_key: String,
    pub permissions: Permissions,
}

/// One entry of the `queryModels` listing: the training tuple that
/// produced the model, under its flavor.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OutputModelListItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traintuple: Option<OutputTraintuple>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub composite_traintuple: Option<OutputCompositeTraintuple>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregatetuple: Option<OutputAggregatetuple>,
}

/// `queryModelDetails`: the producing tuple with its testtuples inlined.
#[derive(Debug, Clone, Serialize)]
pub struct OutputModelDetails {
    #[serde(flatten)]
    pub tuple: OutputModelListItem,
    pub testtuples: Vec<OutputTesttuple>,
}
