// Copyright (c) 2026 Fedplan Contributors
// SPDX-License-Identifier: Apache-2.0

//! Request records. Every top-level operation decodes its JSON payload into
//! one of these and calls `validate` before touching the ledger. Unknown
//! fields are rejected by the deserializer.

use serde::Deserialize;

use crate::assets::Metadata;
use crate::error::{LedgerError, LedgerResult};

pub const KEY_LEN: usize = 36;
pub const CHECKSUM_LEN: usize = 64;
pub const TAG_MAX_LEN: usize = 64;
pub const METADATA_MAX_ENTRIES: usize = 100;
pub const METADATA_KEY_MAX_LEN: usize = 50;
pub const METADATA_VALUE_MAX_LEN: usize = 100;

pub fn check_key(field: &str, value: &str) -> LedgerResult<()> {
    if value.len() != KEY_LEN {
        return Err(LedgerError::bad_request(format!(
            "{field}: key must be {KEY_LEN} characters, got {}",
            value.len()
        )));
    }
    Ok(())
}

pub fn check_optional_key(field: &str, value: &Option<String>) -> LedgerResult<()> {
    match value {
        Some(v) => check_key(field, v),
        None => Ok(()),
    }
}

pub fn check_checksum(field: &str, value: &str) -> LedgerResult<()> {
    let decoded = hex::decode(value)
        .map_err(|_| LedgerError::bad_request(format!("{field}: invalid checksum")))?;
    if value.len() != CHECKSUM_LEN || decoded.len() != CHECKSUM_LEN / 2 {
        return Err(LedgerError::bad_request(format!(
            "{field}: checksum must be {CHECKSUM_LEN} hex characters"
        )));
    }
    Ok(())
}

pub fn check_required(field: &str, value: &str) -> LedgerResult<()> {
    if value.is_empty() {
        return Err(LedgerError::bad_request(format!("{field} is required")));
    }
    Ok(())
}

pub fn check_tag(tag: &str) -> LedgerResult<()> {
    if tag.len() > TAG_MAX_LEN {
        return Err(LedgerError::bad_request(format!(
            "tag must be at most {TAG_MAX_LEN} characters"
        )));
    }
    Ok(())
}

pub fn check_metadata(metadata: &Metadata) -> LedgerResult<()> {
    if metadata.len() > METADATA_MAX_ENTRIES {
        return Err(LedgerError::bad_request(format!(
            "metadata must hold at most {METADATA_MAX_ENTRIES} entries"
        )));
    }
    for (key, value) in metadata {
        if key.len() > METADATA_KEY_MAX_LEN {
            return Err(LedgerError::bad_request(format!(
                "metadata key {key} exceeds {METADATA_KEY_MAX_LEN} characters"
            )));
        }
        if value.len() > METADATA_VALUE_MAX_LEN {
            return Err(LedgerError::bad_request(format!(
                "metadata value for {key} exceeds {METADATA_VALUE_MAX_LEN} characters"
            )));
        }
    }
    Ok(())
}

pub fn check_sample_keys(field: &str, keys: &[String]) -> LedgerResult<()> {
    if keys.is_empty() {
        return Err(LedgerError::bad_request(format!(
            "{field} must hold at least one key"
        )));
    }
    for key in keys {
        check_key(field, key)?;
    }
    let mut sorted = keys.to_vec();
    sorted.sort();
    sorted.dedup();
    if sorted.len() != keys.len() {
        return Err(LedgerError::bad_request(format!(
            "{field} holds duplicate keys"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputPermission {
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub authorized_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputPermissions {
    #[serde(default)]
    pub process: InputPermission,
}

impl InputPermissions {
    pub fn open() -> Self {
        Self {
            process: InputPermission {
                public: true,
                authorized_ids: vec![],
            },
        }
    }

    pub fn closed(ids: &[&str]) -> Self {
        Self {
            process: InputPermission {
                public: false,
                authorized_ids: ids.iter().map(|s| s.to_string()).collect(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputKey {
    pub key: String,
}

impl InputKey {
    pub fn validate(&self) -> LedgerResult<()> {
        check_key("key", &self.key)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputBookmark {
    #[serde(default)]
    pub bookmark: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputKeyChecksum {
    pub key: String,
    pub checksum: String,
}

impl InputKeyChecksum {
    pub fn validate(&self, field: &str) -> LedgerResult<()> {
        check_key(field, &self.key)?;
        check_checksum(field, &self.checksum)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputKeyChecksumAddress {
    pub key: String,
    pub checksum: String,
    pub storage_address: String,
}

impl InputKeyChecksumAddress {
    pub fn validate(&self, field: &str) -> LedgerResult<()> {
        check_key(field, &self.key)?;
        check_checksum(field, &self.checksum)?;
        check_required(field, &self.storage_address)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputAlgo {
    pub key: String,
    pub name: String,
    pub checksum: String,
    pub storage_address: String,
    pub description_checksum: String,
    pub description_storage_address: String,
    #[serde(default)]
    pub permissions: InputPermissions,
    #[serde(default)]
    pub metadata: Metadata,
}

impl InputAlgo {
    pub fn validate(&self) -> LedgerResult<()> {
        check_key("key", &self.key)?;
        check_required("name", &self.name)?;
        check_checksum("checksum", &self.checksum)?;
        check_required("storage_address", &self.storage_address)?;
        check_checksum("description_checksum", &self.description_checksum)?;
        check_required(
            "description_storage_address",
            &self.description_storage_address,
        )?;
        check_metadata(&self.metadata)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputDataset {
    #[serde(default)]
    pub data_manager_key: String,
    #[serde(default)]
    pub data_sample_keys: Vec<String>,
}

impl InputDataset {
    pub fn is_empty(&self) -> bool {
        self.data_manager_key.is_empty() && self.data_sample_keys.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputObjective {
    pub key: String,
    pub name: String,
    pub description_checksum: String,
    pub description_storage_address: String,
    pub metrics_name: String,
    pub metrics_checksum: String,
    pub metrics_storage_address: String,
    #[serde(default)]
    pub test_dataset: InputDataset,
    #[serde(default)]
    pub permissions: InputPermissions,
    #[serde(default)]
    pub metadata: Metadata,
}

impl InputObjective {
    pub fn validate(&self) -> LedgerResult<()> {
        check_key("key", &self.key)?;
        check_required("name", &self.name)?;
        check_checksum("description_checksum", &self.description_checksum)?;
        check_required(
            "description_storage_address",
            &self.description_storage_address,
        )?;
        check_required("metrics_name", &self.metrics_name)?;
        check_checksum("metrics_checksum", &self.metrics_checksum)?;
        check_required("metrics_storage_address", &self.metrics_storage_address)?;
        if !self.test_dataset.is_empty() {
            check_key("test_dataset.data_manager_key", &self.test_dataset.data_manager_key)?;
            check_sample_keys(
                "test_dataset.data_sample_keys",
                &self.test_dataset.data_sample_keys,
            )?;
        }
        check_metadata(&self.metadata)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputDataManager {
    pub key: String,
    pub name: String,
    pub opener_checksum: String,
    pub opener_storage_address: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub description_checksum: String,
    pub description_storage_address: String,
    #[serde(default)]
    pub objective_key: Option<String>,
    #[serde(default)]
    pub permissions: InputPermissions,
    #[serde(default)]
    pub metadata: Metadata,
}

impl InputDataManager {
    pub fn validate(&self) -> LedgerResult<()> {
        check_key("key", &self.key)?;
        check_required("name", &self.name)?;
        check_checksum("opener_checksum", &self.opener_checksum)?;
        check_required("opener_storage_address", &self.opener_storage_address)?;
        check_required("type", &self.data_type)?;
        check_checksum("description_checksum", &self.description_checksum)?;
        check_required(
            "description_storage_address",
            &self.description_storage_address,
        )?;
        check_optional_key("objective_key", &self.objective_key)?;
        check_metadata(&self.metadata)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputDataSample {
    pub keys: Vec<String>,
    #[serde(default)]
    pub data_manager_keys: Vec<String>,
    #[serde(default)]
    pub test_only: bool,
}

impl InputDataSample {
    pub fn validate(&self) -> LedgerResult<()> {
        check_sample_keys("keys", &self.keys)?;
        for key in &self.data_manager_keys {
            check_key("data_manager_keys", key)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputUpdateDataSample {
    pub keys: Vec<String>,
    pub data_manager_keys: Vec<String>,
}

impl InputUpdateDataSample {
    pub fn validate(&self) -> LedgerResult<()> {
        check_sample_keys("keys", &self.keys)?;
        check_sample_keys("data_manager_keys", &self.data_manager_keys)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputUpdateDataManager {
    pub data_manager_key: String,
    pub objective_key: String,
}

impl InputUpdateDataManager {
    pub fn validate(&self) -> LedgerResult<()> {
        check_key("data_manager_key", &self.data_manager_key)?;
        check_key("objective_key", &self.objective_key)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputTraintuple {
    pub key: String,
    pub algo_key: String,
    #[serde(default)]
    pub in_models: Vec<String>,
    pub data_manager_key: String,
    pub data_sample_keys: Vec<String>,
    #[serde(default)]
    pub compute_plan_key: Option<String>,
    #[serde(default)]
    pub rank: Option<u32>,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl InputTraintuple {
    pub fn validate(&self) -> LedgerResult<()> {
        check_key("key", &self.key)?;
        check_key("algo_key", &self.algo_key)?;
        for key in &self.in_models {
            check_key("in_models", key)?;
        }
        check_key("data_manager_key", &self.data_manager_key)?;
        check_sample_keys("data_sample_keys", &self.data_sample_keys)?;
        check_optional_key("compute_plan_key", &self.compute_plan_key)?;
        check_tag(&self.tag)?;
        check_metadata(&self.metadata)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputCompositeTraintuple {
    pub key: String,
    pub algo_key: String,
    #[serde(default)]
    pub in_head_model_key: Option<String>,
    #[serde(default)]
    pub in_trunk_model_key: Option<String>,
    #[serde(default)]
    pub out_trunk_model_permissions: InputPermissions,
    pub data_manager_key: String,
    pub data_sample_keys: Vec<String>,
    #[serde(default)]
    pub compute_plan_key: Option<String>,
    #[serde(default)]
    pub rank: Option<u32>,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl InputCompositeTraintuple {
    pub fn validate(&self) -> LedgerResult<()> {
        check_key("key", &self.key)?;
        check_key("algo_key", &self.algo_key)?;
        check_optional_key("in_head_model_key", &self.in_head_model_key)?;
        check_optional_key("in_trunk_model_key", &self.in_trunk_model_key)?;
        if self.in_head_model_key.is_some() != self.in_trunk_model_key.is_some() {
            return Err(LedgerError::bad_request(
                "in_head_model_key and in_trunk_model_key must be supplied together",
            ));
        }
        check_key("data_manager_key", &self.data_manager_key)?;
        check_sample_keys("data_sample_keys", &self.data_sample_keys)?;
        check_optional_key("compute_plan_key", &self.compute_plan_key)?;
        check_tag(&self.tag)?;
        check_metadata(&self.metadata)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputAggregatetuple {
    pub key: String,
    pub algo_key: String,
    #[serde(default)]
    pub in_models: Vec<String>,
    pub worker: String,
    #[serde(default)]
    pub compute_plan_key: Option<String>,
    #[serde(default)]
    pub rank: Option<u32>,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl InputAggregatetuple {
    pub fn validate(&self) -> LedgerResult<()> {
        check_key("key", &self.key)?;
        check_key("algo_key", &self.algo_key)?;
        for key in &self.in_models {
            check_key("in_models", key)?;
        }
        check_required("worker", &self.worker)?;
        check_optional_key("compute_plan_key", &self.compute_plan_key)?;
        check_tag(&self.tag)?;
        check_metadata(&self.metadata)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputTesttuple {
    pub key: String,
    pub traintuple_key: String,
    pub objective_key: String,
    #[serde(default)]
    pub data_manager_key: Option<String>,
    #[serde(default)]
    pub data_sample_keys: Vec<String>,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl InputTesttuple {
    pub fn validate(&self) -> LedgerResult<()> {
        check_key("key", &self.key)?;
        check_key("traintuple_key", &self.traintuple_key)?;
        check_key("objective_key", &self.objective_key)?;
        check_optional_key("data_manager_key", &self.data_manager_key)?;
        if self.data_manager_key.is_some() {
            check_sample_keys("data_sample_keys", &self.data_sample_keys)?;
        } else if !self.data_sample_keys.is_empty() {
            return Err(LedgerError::bad_request(
                "data_sample_keys requires data_manager_key",
            ));
        }
        check_tag(&self.tag)?;
        check_metadata(&self.metadata)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputLog {
    pub key: String,
    #[serde(default)]
    pub log: String,
}

impl InputLog {
    pub fn validate(&self) -> LedgerResult<()> {
        check_key("key", &self.key)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputLogSuccessTrain {
    pub key: String,
    #[serde(default)]
    pub log: String,
    pub out_model: InputKeyChecksumAddress,
}

impl InputLogSuccessTrain {
    pub fn validate(&self) -> LedgerResult<()> {
        check_key("key", &self.key)?;
        self.out_model.validate("out_model")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputLogSuccessCompositeTrain {
    pub key: String,
    #[serde(default)]
    pub log: String,
    pub out_head_model: InputKeyChecksum,
    pub out_trunk_model: InputKeyChecksumAddress,
}

impl InputLogSuccessCompositeTrain {
    pub fn validate(&self) -> LedgerResult<()> {
        check_key("key", &self.key)?;
        self.out_head_model.validate("out_head_model")?;
        self.out_trunk_model.validate("out_trunk_model")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputLogSuccessTest {
    pub key: String,
    #[serde(default)]
    pub log: String,
    pub perf: f32,
}

impl InputLogSuccessTest {
    pub fn validate(&self) -> LedgerResult<()> {
        check_key("key", &self.key)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputComputePlanTraintuple {
    pub key: String,
    pub data_manager_key: String,
    pub data_sample_keys: Vec<String>,
    pub algo_key: String,
    pub id: String,
    #[serde(default)]
    pub in_models_ids: Vec<String>,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputComputePlanCompositeTraintuple {
    pub key: String,
    pub data_manager_key: String,
    pub data_sample_keys: Vec<String>,
    pub algo_key: String,
    pub id: String,
    #[serde(default)]
    pub in_head_model_id: Option<String>,
    #[serde(default)]
    pub in_trunk_model_id: Option<String>,
    #[serde(default)]
    pub out_trunk_model_permissions: InputPermissions,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputComputePlanAggregatetuple {
    pub key: String,
    pub algo_key: String,
    pub id: String,
    #[serde(default)]
    pub in_models_ids: Vec<String>,
    pub worker: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputComputePlanTesttuple {
    pub key: String,
    #[serde(default)]
    pub data_manager_key: Option<String>,
    #[serde(default)]
    pub data_sample_keys: Vec<String>,
    pub objective_key: String,
    pub traintuple_id: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputComputePlan {
    pub key: String,
    #[serde(default)]
    pub traintuples: Vec<InputComputePlanTraintuple>,
    #[serde(default)]
    pub composite_traintuples: Vec<InputComputePlanCompositeTraintuple>,
    #[serde(default)]
    pub aggregatetuples: Vec<InputComputePlanAggregatetuple>,
    #[serde(default)]
    pub testtuples: Vec<InputComputePlanTesttuple>,
    #[serde(default)]
    pub clean_models: bool,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl InputComputePlan {
    pub fn validate(&self) -> LedgerResult<()> {
        check_key("key", &self.key)?;
        check_tag(&self.tag)?;
        check_metadata(&self.metadata)?;
        validate_plan_tasks(
            &self.traintuples,
            &self.composite_traintuples,
            &self.aggregatetuples,
            &self.testtuples,
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputUpdateComputePlan {
    pub compute_plan_key: String,
    #[serde(default)]
    pub traintuples: Vec<InputComputePlanTraintuple>,
    #[serde(default)]
    pub composite_traintuples: Vec<InputComputePlanCompositeTraintuple>,
    #[serde(default)]
    pub aggregatetuples: Vec<InputComputePlanAggregatetuple>,
    #[serde(default)]
    pub testtuples: Vec<InputComputePlanTesttuple>,
}

impl InputUpdateComputePlan {
    pub fn validate(&self) -> LedgerResult<()> {
        check_key("compute_plan_key", &self.compute_plan_key)?;
        validate_plan_tasks(
            &self.traintuples,
            &self.composite_traintuples,
            &self.aggregatetuples,
            &self.testtuples,
        )
    }
}

fn validate_plan_tasks(
    traintuples: &[InputComputePlanTraintuple],
    composite_traintuples: &[InputComputePlanCompositeTraintuple],
    aggregatetuples: &[InputComputePlanAggregatetuple],
    testtuples: &[InputComputePlanTesttuple],
) -> LedgerResult<()> {
    for task in traintuples {
        check_required("traintuples.id", &task.id)?;
        check_key("traintuples.key", &task.key)?;
        check_key("traintuples.algo_key", &task.algo_key)?;
        check_key("traintuples.data_manager_key", &task.data_manager_key)?;
        check_sample_keys("traintuples.data_sample_keys", &task.data_sample_keys)?;
        check_tag(&task.tag)?;
        check_metadata(&task.metadata)?;
    }
    for task in composite_traintuples {
        check_required("composite_traintuples.id", &task.id)?;
        check_key("composite_traintuples.key", &task.key)?;
        check_key("composite_traintuples.algo_key", &task.algo_key)?;
        if task.in_head_model_id.is_some() != task.in_trunk_model_id.is_some() {
            return Err(LedgerError::bad_request(
                "in_head_model_id and in_trunk_model_id must be supplied together",
            ));
        }
        check_key(
            "composite_traintuples.data_manager_key",
            &task.data_manager_key,
        )?;
        check_sample_keys(
            "composite_traintuples.data_sample_keys",
            &task.data_sample_keys,
        )?;
        check_tag(&task.tag)?;
        check_metadata(&task.metadata)?;
    }
    for task in aggregatetuples {
        check_required("aggregatetuples.id", &task.id)?;
        check_key("aggregatetuples.key", &task.key)?;
        check_key("aggregatetuples.algo_key", &task.algo_key)?;
        check_required("aggregatetuples.worker", &task.worker)?;
        check_tag(&task.tag)?;
        check_metadata(&task.metadata)?;
    }
    for task in testtuples {
        check_required("testtuples.traintuple_id", &task.traintuple_id)?;
        check_key("testtuples.key", &task.key)?;
        check_key("testtuples.objective_key", &task.objective_key)?;
        check_optional_key("testtuples.data_manager_key", &task.data_manager_key)?;
        check_tag(&task.tag)?;
        check_metadata(&task.metadata)?;
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputQueryFilter {
    pub index_name: String,
    pub attributes: String,
}
