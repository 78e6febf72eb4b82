// Copyright (c) 2026 Fedplan Contributors
// SPDX-License-Identifier: Apache-2.0

//! Registration and queries for the three algo kinds. They share one record
//! shape; the asset-type tag and the owner index tell them apart.

use crate::assets::{Algo, AssetType, ChecksumAddress};
use crate::error::LedgerResult;
use crate::input::{InputAlgo, InputBookmark, InputKey};
use crate::ledger::{LedgerDb, LedgerStore, OUTPUT_PAGE_SIZE};
use crate::output::OutputAlgo;
use crate::permissions::new_permissions;

pub const ALGO_OWNER_INDEX: &str = "algo~owner~key";
pub const COMPOSITE_ALGO_OWNER_INDEX: &str = "compositeAlgo~owner~key";
pub const AGGREGATE_ALGO_OWNER_INDEX: &str = "aggregateAlgo~owner~key";

fn owner_index_for(asset_type: AssetType) -> (&'static str, &'static str) {
    match asset_type {
        AssetType::CompositeAlgo => (COMPOSITE_ALGO_OWNER_INDEX, "compositeAlgo"),
        AssetType::AggregateAlgo => (AGGREGATE_ALGO_OWNER_INDEX, "aggregateAlgo"),
        _ => (ALGO_OWNER_INDEX, "algo"),
    }
}

fn register_algo_internal<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    inp: &InputAlgo,
    asset_type: AssetType,
) -> LedgerResult<String> {
    inp.validate()?;
    let owner = db.creator().to_string();
    let permissions = new_permissions(db, &inp.permissions, &owner)?;
    let algo = Algo {
        key: inp.key.clone(),
        name: inp.name.clone(),
        asset_type,
        checksum: inp.checksum.clone(),
        storage_address: inp.storage_address.clone(),
        description: ChecksumAddress {
            checksum: inp.description_checksum.clone(),
            storage_address: inp.description_storage_address.clone(),
        },
        owner: owner.clone(),
        permissions,
        metadata: inp.metadata.clone(),
    };
    db.add(&inp.key, &algo)?;
    let (index, object) = owner_index_for(asset_type);
    db.create_index(index, &[object, &owner, &inp.key])?;
    Ok(inp.key.clone())
}

pub fn register_algo<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    inp: &InputAlgo,
) -> LedgerResult<String> {
    register_algo_internal(db, inp, AssetType::Algo)
}

pub fn register_composite_algo<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    inp: &InputAlgo,
) -> LedgerResult<String> {
    register_algo_internal(db, inp, AssetType::CompositeAlgo)
}

pub fn register_aggregate_algo<S: LedgerStore>(
    db: &mut LedgerDb<'_, S>,
    inp: &InputAlgo,
) -> LedgerResult<String> {
    register_algo_internal(db, inp, AssetType::AggregateAlgo)
}

pub fn query_algo<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    inp: &InputKey,
) -> LedgerResult<OutputAlgo> {
    inp.validate()?;
    Ok(OutputAlgo::fill(&db.get_algo(&inp.key)?))
}

pub fn query_composite_algo<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    inp: &InputKey,
) -> LedgerResult<OutputAlgo> {
    inp.validate()?;
    Ok(OutputAlgo::fill(&db.get_composite_algo(&inp.key)?))
}

pub fn query_aggregate_algo<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    inp: &InputKey,
) -> LedgerResult<OutputAlgo> {
    inp.validate()?;
    Ok(OutputAlgo::fill(&db.get_aggregate_algo(&inp.key)?))
}

fn query_algos_internal<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    inp: &InputBookmark,
    asset_type: AssetType,
) -> LedgerResult<(Vec<OutputAlgo>, String)> {
    let (index, object) = owner_index_for(asset_type);
    let (keys, bookmark) =
        db.get_index_keys_with_pagination(index, &[object], OUTPUT_PAGE_SIZE, &inp.bookmark)?;
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        let algo = match asset_type {
            AssetType::CompositeAlgo => db.get_composite_algo(&key)?,
            AssetType::AggregateAlgo => db.get_aggregate_algo(&key)?,
            _ => db.get_algo(&key)?,
        };
        out.push(OutputAlgo::fill(&algo));
    }
    Ok((out, bookmark))
}

pub fn query_algos<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    inp: &InputBookmark,
) -> LedgerResult<(Vec<OutputAlgo>, String)> {
    query_algos_internal(db, inp, AssetType::Algo)
}

pub fn query_composite_algos<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    inp: &InputBookmark,
) -> LedgerResult<(Vec<OutputAlgo>, String)> {
    query_algos_internal(db, inp, AssetType::CompositeAlgo)
}

pub fn query_aggregate_algos<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    inp: &InputBookmark,
) -> LedgerResult<(Vec<OutputAlgo>, String)> {
    query_algos_internal(db, inp, AssetType::AggregateAlgo)
}
