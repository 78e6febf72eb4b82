// Copyright (c) 2026 Fedplan Contributors
// SPDX-License-Identifier: Apache-2.0

//! Typed representation of every record stored in the ledger, plus the
//! shared value objects (checksum/address pairs, datasets, statuses).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::permissions::Permissions;

/// Metadata is a sorted map so serialization stays deterministic.
pub type Metadata = BTreeMap<String, String>;

/// Tag stored on every record to check the type of an asset on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Objective,
    DataManager,
    DataSample,
    Algo,
    CompositeAlgo,
    AggregateAlgo,
    Traintuple,
    CompositeTraintuple,
    Aggregatetuple,
    Testtuple,
    ComputePlan,
}

impl AssetType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Objective => "objective",
            Self::DataManager => "data_manager",
            Self::DataSample => "data_sample",
            Self::Algo => "algo",
            Self::CompositeAlgo => "composite_algo",
            Self::AggregateAlgo => "aggregate_algo",
            Self::Traintuple => "traintuple",
            Self::CompositeTraintuple => "composite_traintuple",
            Self::Aggregatetuple => "aggregatetuple",
            Self::Testtuple => "testtuple",
            Self::ComputePlan => "compute_plan",
        }
    }

    /// The three task flavors that produce models.
    pub const fn is_training_tuple(self) -> bool {
        matches!(
            self,
            Self::Traintuple | Self::CompositeTraintuple | Self::Aggregatetuple
        )
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a training or test tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Waiting,
    Todo,
    Doing,
    Done,
    Failed,
    Aborted,
}

impl Status {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Todo => "todo",
            Self::Doing => "doing",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Aborted)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a whole compute plan, derived from its tuples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputePlanStatus {
    Waiting,
    Todo,
    Doing,
    Done,
    Failed,
    Canceled,
}

impl ComputePlanStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Todo => "todo",
            Self::Doing => "doing",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for ComputePlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyChecksum {
    pub key: String,
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumAddress {
    pub checksum: String,
    pub storage_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyChecksumAddress {
    pub key: String,
    pub checksum: String,
    pub storage_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumAddressName {
    pub checksum: String,
    pub storage_address: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyChecksumAddressName {
    pub key: String,
    pub checksum: String,
    pub storage_address: String,
    pub name: String,
}

/// A produced model: the training task that led to it, its digest and its
/// off-ledger location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub key: String,
    pub traintuple_key: String,
    pub checksum: String,
    pub storage_address: String,
}

/// A data manager together with the sample keys a task trains on, and the
/// worker that holds them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub data_manager_key: String,
    pub data_sample_keys: Vec<String>,
    #[serde(default)]
    pub metadata: Metadata,
    pub worker: String,
}

/// Test dataset of a testtuple, with the recorded performance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtDataset {
    pub key: String,
    pub worker: String,
    pub data_sample_keys: Vec<String>,
    pub opener_checksum: String,
    pub perf: f32,
}

/// An organization registered on the network; permission authorized-id
/// lists may only reference registered nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Objective {
    pub key: String,
    pub name: String,
    pub asset_type: AssetType,
    pub description: ChecksumAddress,
    pub metrics: ChecksumAddressName,
    pub owner: String,
    pub test_dataset: Option<Dataset>,
    pub permissions: Permissions,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataManager {
    pub key: String,
    pub name: String,
    pub asset_type: AssetType,
    pub opener: ChecksumAddress,
    #[serde(rename = "type")]
    pub data_type: String,
    pub description: ChecksumAddress,
    pub owner: String,
    pub objective_key: Option<String>,
    pub permissions: Permissions,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSample {
    pub asset_type: AssetType,
    pub data_manager_keys: Vec<String>,
    pub owner: String,
    pub test_only: bool,
}

/// One record covers the three algo kinds; `asset_type` tells them apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Algo {
    pub key: String,
    pub name: String,
    pub asset_type: AssetType,
    pub checksum: String,
    pub storage_address: String,
    pub description: ChecksumAddress,
    pub owner: String,
    pub permissions: Permissions,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Traintuple {
    pub key: String,
    pub asset_type: AssetType,
    pub algo_key: String,
    pub compute_plan_key: Option<String>,
    pub creator: String,
    pub log: String,
    pub metadata: Metadata,
    pub rank: u32,
    pub status: Status,
    pub tag: String,
    pub dataset: Dataset,
    pub in_model_keys: Vec<String>,
    pub out_model: Option<KeyChecksumAddress>,
    pub permissions: Permissions,
}

/// Trunk out-model of a composite traintuple, with its own permissions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompositeOutTrunkModel {
    pub out_model: Option<KeyChecksumAddress>,
    pub permissions: Permissions,
}

/// Head out-model of a composite traintuple. It never leaves its worker,
/// so there is no storage address and its permissions stay creator-only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompositeOutHeadModel {
    pub out_model: Option<KeyChecksum>,
    pub permissions: Permissions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeTraintuple {
    pub key: String,
    pub asset_type: AssetType,
    pub algo_key: String,
    pub compute_plan_key: Option<String>,
    pub creator: String,
    pub log: String,
    pub metadata: Metadata,
    pub rank: u32,
    pub status: Status,
    pub tag: String,
    pub dataset: Dataset,
    pub in_head_model: Option<String>,
    pub in_trunk_model: Option<String>,
    pub out_head_model: CompositeOutHeadModel,
    pub out_trunk_model: CompositeOutTrunkModel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregatetuple {
    pub key: String,
    pub asset_type: AssetType,
    pub algo_key: String,
    pub compute_plan_key: Option<String>,
    pub creator: String,
    pub log: String,
    pub metadata: Metadata,
    pub rank: u32,
    pub status: Status,
    pub tag: String,
    pub in_model_keys: Vec<String>,
    pub out_model: Option<KeyChecksumAddress>,
    pub permissions: Permissions,
    pub worker: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Testtuple {
    pub key: String,
    pub algo_key: String,
    pub asset_type: AssetType,
    pub certified: bool,
    pub compute_plan_key: Option<String>,
    pub creator: String,
    pub dataset: TtDataset,
    pub log: String,
    pub metadata: Metadata,
    pub traintuple_key: String,
    pub objective_key: String,
    pub permissions: Permissions,
    pub rank: u32,
    pub status: Status,
    pub tag: String,
}

/// Position of one training task inside a compute plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainTask {
    pub depth: u32,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputePlan {
    pub key: String,
    pub asset_type: AssetType,
    pub clean_models: bool,
    pub traintuple_keys: Vec<String>,
    pub composite_traintuple_keys: Vec<String>,
    pub aggregatetuple_keys: Vec<String>,
    pub testtuple_keys: Vec<String>,
    pub id_to_train_task: BTreeMap<String, TrainTask>,
    pub workers: Vec<String>,
    pub tag: String,
    pub metadata: Metadata,
    /// The plan status lives under this separate key to keep the plan
    /// record itself small; see `ComputePlanState`.
    pub state_key: String,
}

impl ComputePlan {
    /// Keys of every training tuple of the plan, in registration order.
    pub fn training_tuple_keys(&self) -> Vec<(AssetType, String)> {
        let mut keys = Vec::with_capacity(
            self.traintuple_keys.len()
                + self.composite_traintuple_keys.len()
                + self.aggregatetuple_keys.len(),
        );
        for k in &self.traintuple_keys {
            keys.push((AssetType::Traintuple, k.clone()));
        }
        for k in &self.composite_traintuple_keys {
            keys.push((AssetType::CompositeTraintuple, k.clone()));
        }
        for k in &self.aggregatetuple_keys {
            keys.push((AssetType::Aggregatetuple, k.clone()));
        }
        keys
    }
}

/// Stored under `ComputePlan::state_key`, updated on every tuple transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputePlanState {
    pub status: ComputePlanStatus,
}

/// Per-(plan, worker) counters and the set of intermediary model keys still
/// needed as in-models by pending tuples.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputePlanWorkerState {
    pub intermediary_models_in_use: Vec<String>,
    pub done_count: u32,
    pub tuple_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&Status::Waiting).expect("serialize");
        assert_eq!(json, "\"waiting\"");
        let back: Status = serde_json::from_str("\"aborted\"").expect("parse");
        assert_eq!(back, Status::Aborted);
    }

    #[test]
    fn terminal_statuses() {
        assert!(Status::Done.is_terminal());
        assert!(Status::Failed.is_terminal());
        assert!(Status::Aborted.is_terminal());
        assert!(!Status::Waiting.is_terminal());
        assert!(!Status::Todo.is_terminal());
        assert!(!Status::Doing.is_terminal());
    }

    #[test]
    fn asset_type_round_trips() {
        let json = serde_json::to_string(&AssetType::CompositeTraintuple).expect("serialize");
        assert_eq!(json, "\"composite_traintuple\"");
        assert!(AssetType::Aggregatetuple.is_training_tuple());
        assert!(!AssetType::Testtuple.is_training_tuple());
    }
}
