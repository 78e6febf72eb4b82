// Copyright (c) 2026 Fedplan Contributors
// SPDX-License-Identifier: Apache-2.0

//! Model views across the three training tuple flavors: by model key, as a
//! combined paginated listing, and as a per-tuple detail view with the
//! attached testtuples.

use serde::{Deserialize, Serialize};

use crate::assets::AssetType;
use crate::error::{LedgerError, LedgerResult};
use crate::input::{InputBookmark, InputKey};
use crate::ledger::{LedgerDb, LedgerStore, OUTPUT_PAGE_SIZE};
use crate::output::{OutputModel, OutputModelDetails, OutputModelListItem, OutputTesttuple};
use crate::tuple::{MODEL_INDEX, TESTTUPLE_BY_TRAINTUPLE_INDEX};
use crate::{aggregatetuple, composite, testtuple, traintuple};

/// Resolve a produced model to its producing tuple and permissions.
pub fn query_model<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    inp: &InputKey,
) -> LedgerResult<OutputModel> {
    inp.validate()?;
    let tuple_keys = db.get_index_keys(MODEL_INDEX, &["model", &inp.key])?;
    let tuple_key = tuple_keys
        .first()
        .ok_or_else(|| LedgerError::not_found(format!("no model with key {}", inp.key)))?;

    match db.asset_type(tuple_key)? {
        AssetType::Traintuple => {
            let t = db.get_traintuple(tuple_key)?;
            let model = t
                .out_model
                .filter(|m| m.key == inp.key)
                .ok_or_else(|| LedgerError::internal("model index out of sync"))?;
            Ok(OutputModel {
                key: model.key,
                checksum: model.checksum,
                storage_address: Some(model.storage_address),
                owner: t.dataset.worker,
                traintuple_key: t.key,
                permissions: t.permissions,
            })
        }
        AssetType::CompositeTraintuple => {
            let t = db.get_composite_traintuple(tuple_key)?;
            if let Some(head) = t.out_head_model.out_model.clone().filter(|m| m.key == inp.key) {
                return Ok(OutputModel {
                    key: head.key,
                    checksum: head.checksum,
                    storage_address: None,
                    owner: t.dataset.worker,
                    traintuple_key: t.key,
                    permissions: t.out_head_model.permissions,
                });
            }
            let trunk = t
                .out_trunk_model
                .out_model
                .filter(|m| m.key == inp.key)
                .ok_or_else(|| LedgerError::internal("model index out of sync"))?;
            Ok(OutputModel {
                key: trunk.key,
                checksum: trunk.checksum,
                storage_address: Some(trunk.storage_address),
                owner: t.dataset.worker,
                traintuple_key: t.key,
                permissions: t.out_trunk_model.permissions,
            })
        }
        AssetType::Aggregatetuple => {
            let t = db.get_aggregatetuple(tuple_key)?;
            let model = t
                .out_model
                .filter(|m| m.key == inp.key)
                .ok_or_else(|| LedgerError::internal("model index out of sync"))?;
            Ok(OutputModel {
                key: model.key,
                checksum: model.checksum,
                storage_address: Some(model.storage_address),
                owner: t.worker,
                traintuple_key: t.key,
                permissions: t.permissions,
            })
        }
        other => Err(LedgerError::internal(format!(
            "model {} indexed to a {other}",
            inp.key
        ))),
    }
}

/// Combined bookmark of the three per-flavor listings; opaque to clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ModelsBookmark {
    #[serde(default)]
    traintuple: String,
    #[serde(default)]
    composite_traintuple: String,
    #[serde(default)]
    aggregatetuple: String,
}

/// List produced models: a third of a page from each training tuple
/// flavor.
pub fn query_models<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    inp: &InputBookmark,
) -> LedgerResult<(Vec<OutputModelListItem>, String)> {
    let bookmark: ModelsBookmark = if inp.bookmark.is_empty() {
        ModelsBookmark::default()
    } else {
        serde_json::from_str(&inp.bookmark)
            .map_err(|_| LedgerError::bad_request("malformed bookmark"))?
    };
    let per_family = OUTPUT_PAGE_SIZE / 3;
    let mut items = Vec::new();

    let (train_keys, train_bm) = db.get_index_keys_with_pagination(
        traintuple::TRAINTUPLE_ALGO_INDEX,
        &["traintuple"],
        per_family,
        &bookmark.traintuple,
    )?;
    for key in train_keys {
        items.push(OutputModelListItem {
            traintuple: Some(traintuple::get_output_traintuple(db, &key)?),
            ..Default::default()
        });
    }

    let (composite_keys, composite_bm) = db.get_index_keys_with_pagination(
        composite::COMPOSITE_ALGO_INDEX,
        &["compositeTraintuple"],
        per_family,
        &bookmark.composite_traintuple,
    )?;
    for key in composite_keys {
        items.push(OutputModelListItem {
            composite_traintuple: Some(composite::get_output_composite_traintuple(db, &key)?),
            ..Default::default()
        });
    }

    let (aggregate_keys, aggregate_bm) = db.get_index_keys_with_pagination(
        aggregatetuple::AGGREGATETUPLE_ALGO_INDEX,
        &["aggregatetuple"],
        per_family,
        &bookmark.aggregatetuple,
    )?;
    for key in aggregate_keys {
        items.push(OutputModelListItem {
            aggregatetuple: Some(aggregatetuple::get_output_aggregatetuple(db, &key)?),
            ..Default::default()
        });
    }

    let next = ModelsBookmark {
        traintuple: train_bm,
        composite_traintuple: composite_bm,
        aggregatetuple: aggregate_bm,
    };
    let next_bookmark = if next.traintuple.is_empty()
        && next.composite_traintuple.is_empty()
        && next.aggregatetuple.is_empty()
    {
        String::new()
    } else {
        serde_json::to_string(&next)
            .map_err(|err| LedgerError::internal(format!("could not encode bookmark: {err}")))?
    };
    Ok((items, next_bookmark))
}

/// The producing tuple of a model together with its testtuples.
pub fn query_model_details<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    inp: &InputKey,
) -> LedgerResult<OutputModelDetails> {
    inp.validate()?;
    let mut item = OutputModelListItem::default();
    match db.asset_type(&inp.key)? {
        AssetType::Traintuple => {
            item.traintuple = Some(traintuple::get_output_traintuple(db, &inp.key)?);
        }
        AssetType::CompositeTraintuple => {
            item.composite_traintuple =
                Some(composite::get_output_composite_traintuple(db, &inp.key)?);
        }
        AssetType::Aggregatetuple => {
            item.aggregatetuple = Some(aggregatetuple::get_output_aggregatetuple(db, &inp.key)?);
        }
        other => {
            return Err(LedgerError::not_found(format!(
                "no training tuple with key {} ({other})",
                inp.key
            )))
        }
    }
    let testtuple_keys =
        db.get_index_keys(TESTTUPLE_BY_TRAINTUPLE_INDEX, &["testtuple", &inp.key])?;
    let mut testtuples: Vec<OutputTesttuple> = Vec::with_capacity(testtuple_keys.len());
    for key in testtuple_keys {
        testtuples.push(testtuple::get_output_testtuple(db, &key)?);
    }
    Ok(OutputModelDetails {
        tuple: item,
        testtuples,
    })
}
