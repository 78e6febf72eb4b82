// Copyright (c) 2026 Fedplan Contributors
// SPDX-License-Identifier: Apache-2.0

//! Transactional access to the replicated key-value store.
//!
//! [`LedgerStore`] is the host-provided state interface. [`LedgerDb`] wraps
//! one transaction over it: it carries the transaction creator identity, an
//! in-transaction cache so the core sees its own writes (the host's raw
//! reads only see committed state), the composite secondary-key encoding,
//! and the outgoing event sink drained after a successful transaction.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::assets::{
    Aggregatetuple, Algo, AssetType, ComputePlan, ComputePlanState, ComputePlanWorkerState,
    CompositeTraintuple, DataManager, DataSample, Objective, Status, Testtuple, Traintuple,
};
use crate::error::{LedgerError, LedgerResult};
use crate::permissions::Permissions;

/// Fixed page size of every paginated listing.
pub const OUTPUT_PAGE_SIZE: usize = 500;

/// Composite-key delimiter, per the host convention.
const DELIM: char = '\u{0}';

/// Committed ledger state. The in-memory [`MemStore`] backs the test
/// environment; production bindings are supplied by the host.
pub trait LedgerStore {
    fn get_state(&self, key: &str) -> Option<Vec<u8>>;
    fn put_state(&mut self, key: &str, value: Vec<u8>);
    fn delete_state(&mut self, key: &str);
    /// All keys starting with `prefix`, in lexicographic order.
    fn keys_with_prefix(&self, prefix: &str) -> Vec<String>;
}

/// Deterministically ordered in-memory store.
#[derive(Debug, Default, Clone)]
pub struct MemStore {
    state: BTreeMap<String, Vec<u8>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemStore {
    fn get_state(&self, key: &str) -> Option<Vec<u8>> {
        self.state.get(key).cloned()
    }

    fn put_state(&mut self, key: &str, value: Vec<u8>) {
        self.state.insert(key.to_string(), value);
    }

    fn delete_state(&mut self, key: &str) {
        self.state.remove(key);
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.state
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect()
    }
}

/// Events accumulated during a transaction, delivered in insertion order
/// after commit for downstream workers to poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct TupleEvents {
    pub tuples: Vec<String>,
    /// Intermediary model keys eligible for off-ledger cleanup.
    pub models_to_delete: Vec<String>,
}

impl TupleEvents {
    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty() && self.models_to_delete.is_empty()
    }
}

/// Lightweight projection shared by the three training tuple flavors,
/// used to traverse parents without loading full records.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericTuple {
    pub asset_type: AssetType,
    pub algo_key: String,
    pub status: Status,
    pub rank: u32,
    pub compute_plan_key: Option<String>,
    pub worker: String,
    pub creator: String,
    pub in_model_keys: Vec<String>,
    pub permissions: Permissions,
}

#[derive(serde::Deserialize)]
struct AssetTag {
    asset_type: AssetType,
}

pub struct LedgerDb<'a, S: LedgerStore> {
    store: &'a mut S,
    creator: String,
    tx_cache: BTreeMap<String, Vec<u8>>,
    events: TupleEvents,
}

impl<'a, S: LedgerStore> LedgerDb<'a, S> {
    pub fn new(store: &'a mut S, creator: &str) -> Self {
        Self {
            store,
            creator: creator.to_string(),
            tx_cache: BTreeMap::new(),
            events: TupleEvents::default(),
        }
    }

    /// Identity of the worker that signed the transaction.
    pub fn creator(&self) -> &str {
        &self.creator
    }

    pub fn add_tuple_event(&mut self, key: &str) {
        self.events.tuples.push(key.to_string());
    }

    pub fn add_model_cleanup_event(&mut self, model_key: &str) {
        self.events.models_to_delete.push(model_key.to_string());
    }

    pub fn take_events(&mut self) -> TupleEvents {
        std::mem::take(&mut self.events)
    }

    // ---- raw state ----

    fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        self.tx_cache
            .get(key)
            .cloned()
            .or_else(|| self.store.get_state(key))
    }

    pub fn key_exists(&self, key: &str) -> bool {
        self.get_raw(key).is_some()
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> LedgerResult<T> {
        let bytes = self
            .get_raw(key)
            .ok_or_else(|| LedgerError::not_found(format!("no element with key {key}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|err| LedgerError::internal(format!("corrupted record {key}: {err}")))
    }

    /// Unconditional write.
    pub fn put<T: Serialize>(&mut self, key: &str, value: &T) -> LedgerResult<()> {
        let bytes = serde_json::to_vec(value)
            .map_err(|err| LedgerError::internal(format!("could not encode {key}: {err}")))?;
        self.tx_cache.insert(key.to_string(), bytes.clone());
        self.store.put_state(key, bytes);
        Ok(())
    }

    /// Create; fails with conflict when the key is already taken.
    pub fn add<T: Serialize>(&mut self, key: &str, value: &T) -> LedgerResult<()> {
        if self.key_exists(key) {
            return Err(LedgerError::conflict(
                format!("element with key {key} already exists"),
                key,
            ));
        }
        self.put(key, value)
    }

    pub fn delete(&mut self, key: &str) {
        self.tx_cache.remove(key);
        self.store.delete_state(key);
    }

    // ---- composite secondary indices ----

    fn composite_key(index_name: &str, attributes: &[&str]) -> String {
        let mut key = String::new();
        key.push(DELIM);
        key.push_str(index_name);
        key.push(DELIM);
        for attr in attributes {
            key.push_str(attr);
            key.push(DELIM);
        }
        key
    }

    pub fn create_index(&mut self, index_name: &str, attributes: &[&str]) -> LedgerResult<()> {
        let key = Self::composite_key(index_name, attributes);
        self.store.put_state(&key, vec![0u8]);
        Ok(())
    }

    pub fn delete_index(&mut self, index_name: &str, attributes: &[&str]) -> LedgerResult<()> {
        let key = Self::composite_key(index_name, attributes);
        self.store.delete_state(&key);
        Ok(())
    }

    pub fn update_index(
        &mut self,
        index_name: &str,
        old_attributes: &[&str],
        new_attributes: &[&str],
    ) -> LedgerResult<()> {
        self.delete_index(index_name, old_attributes)?;
        self.create_index(index_name, new_attributes)
    }

    /// Primary keys (the last attribute) of every index entry matching the
    /// partial attribute list, in index order.
    pub fn get_index_keys(
        &self,
        index_name: &str,
        partial_attributes: &[&str],
    ) -> LedgerResult<Vec<String>> {
        let prefix = Self::composite_key(index_name, partial_attributes);
        let keys = self.store.keys_with_prefix(&prefix);
        keys.iter().map(|k| Self::last_attribute(k)).collect()
    }

    /// One page of index entries after the opaque `bookmark`. Returns the
    /// extracted primary keys and the bookmark for the next page, empty
    /// when the listing is exhausted.
    pub fn get_index_keys_with_pagination(
        &self,
        index_name: &str,
        partial_attributes: &[&str],
        page_size: usize,
        bookmark: &str,
    ) -> LedgerResult<(Vec<String>, String)> {
        let prefix = Self::composite_key(index_name, partial_attributes);
        let all = self.store.keys_with_prefix(&prefix);
        let mut page = Vec::with_capacity(page_size.min(all.len()));
        let mut last_seen = String::new();
        let mut remaining = false;
        for key in all {
            if !bookmark.is_empty() && key.as_str() <= bookmark {
                continue;
            }
            if page.len() == page_size {
                remaining = true;
                break;
            }
            page.push(Self::last_attribute(&key)?);
            last_seen = key;
        }
        let next = if remaining { last_seen } else { String::new() };
        Ok((page, next))
    }

    fn last_attribute(composite_key: &str) -> LedgerResult<String> {
        composite_key
            .split(DELIM)
            .filter(|part| !part.is_empty())
            .next_back()
            .map(str::to_string)
            .ok_or_else(|| LedgerError::internal("malformed composite index key"))
    }

    // ---- typed accessors ----

    fn get_typed<T: DeserializeOwned>(&self, key: &str, expected: AssetType) -> LedgerResult<T> {
        let bytes = self
            .get_raw(key)
            .ok_or_else(|| LedgerError::not_found(format!("no element with key {key}")))?;
        let tag: AssetTag = serde_json::from_slice(&bytes)
            .map_err(|err| LedgerError::internal(format!("corrupted record {key}: {err}")))?;
        if tag.asset_type != expected {
            return Err(LedgerError::not_found(format!(
                "no {expected} with key {key}"
            )));
        }
        serde_json::from_slice(&bytes)
            .map_err(|err| LedgerError::internal(format!("corrupted record {key}: {err}")))
    }

    pub fn asset_type(&self, key: &str) -> LedgerResult<AssetType> {
        let tag: AssetTag = self.get(key)?;
        Ok(tag.asset_type)
    }

    pub fn get_algo(&self, key: &str) -> LedgerResult<Algo> {
        self.get_typed(key, AssetType::Algo)
    }

    pub fn get_composite_algo(&self, key: &str) -> LedgerResult<Algo> {
        self.get_typed(key, AssetType::CompositeAlgo)
    }

    pub fn get_aggregate_algo(&self, key: &str) -> LedgerResult<Algo> {
        self.get_typed(key, AssetType::AggregateAlgo)
    }

    pub fn get_data_manager(&self, key: &str) -> LedgerResult<DataManager> {
        self.get_typed(key, AssetType::DataManager)
    }

    pub fn get_data_sample(&self, key: &str) -> LedgerResult<DataSample> {
        self.get_typed(key, AssetType::DataSample)
    }

    pub fn get_objective(&self, key: &str) -> LedgerResult<Objective> {
        self.get_typed(key, AssetType::Objective)
    }

    pub fn get_traintuple(&self, key: &str) -> LedgerResult<Traintuple> {
        self.get_typed(key, AssetType::Traintuple)
    }

    pub fn get_composite_traintuple(&self, key: &str) -> LedgerResult<CompositeTraintuple> {
        self.get_typed(key, AssetType::CompositeTraintuple)
    }

    pub fn get_aggregatetuple(&self, key: &str) -> LedgerResult<Aggregatetuple> {
        self.get_typed(key, AssetType::Aggregatetuple)
    }

    pub fn get_testtuple(&self, key: &str) -> LedgerResult<Testtuple> {
        self.get_typed(key, AssetType::Testtuple)
    }

    pub fn get_compute_plan(&self, key: &str) -> LedgerResult<ComputePlan> {
        self.get_typed(key, AssetType::ComputePlan)
    }

    pub fn get_compute_plan_state(&self, state_key: &str) -> LedgerResult<ComputePlanState> {
        self.get(state_key)
    }

    pub fn get_compute_plan_worker_state(
        &self,
        worker_state_key: &str,
    ) -> LedgerResult<ComputePlanWorkerState> {
        self.get(worker_state_key)
    }

    /// Projection over the three training tuple flavors; rejects any other
    /// asset type.
    pub fn get_generic_tuple(&self, key: &str) -> LedgerResult<GenericTuple> {
        match self.asset_type(key)? {
            AssetType::Traintuple => {
                let t = self.get_traintuple(key)?;
                Ok(GenericTuple {
                    asset_type: AssetType::Traintuple,
                    algo_key: t.algo_key,
                    status: t.status,
                    rank: t.rank,
                    compute_plan_key: t.compute_plan_key,
                    worker: t.dataset.worker,
                    creator: t.creator,
                    in_model_keys: t.in_model_keys,
                    permissions: t.permissions,
                })
            }
            AssetType::CompositeTraintuple => {
                let t = self.get_composite_traintuple(key)?;
                let mut parents = Vec::new();
                if let Some(head) = &t.in_head_model {
                    parents.push(head.clone());
                }
                if let Some(trunk) = &t.in_trunk_model {
                    parents.push(trunk.clone());
                }
                Ok(GenericTuple {
                    asset_type: AssetType::CompositeTraintuple,
                    algo_key: t.algo_key,
                    status: t.status,
                    rank: t.rank,
                    compute_plan_key: t.compute_plan_key,
                    worker: t.dataset.worker,
                    creator: t.creator,
                    in_model_keys: parents,
                    permissions: t.out_trunk_model.permissions,
                })
            }
            AssetType::Aggregatetuple => {
                let t = self.get_aggregatetuple(key)?;
                Ok(GenericTuple {
                    asset_type: AssetType::Aggregatetuple,
                    algo_key: t.algo_key,
                    status: t.status,
                    rank: t.rank,
                    compute_plan_key: t.compute_plan_key,
                    worker: t.worker,
                    creator: t.creator,
                    in_model_keys: t.in_model_keys,
                    permissions: t.permissions,
                })
            }
            other => Err(LedgerError::bad_request(format!(
                "{key} is a {other}, not a training tuple"
            ))),
        }
    }
}
