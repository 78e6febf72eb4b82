// Copyright (c) 2026 Fedplan Contributors
// SPDX-License-Identifier: Apache-2.0

//! Orders the training tasks of a compute-plan payload.
//!
//! Tasks reference each other by user-chosen string ids. The builder
//! validates the reference graph, assigns each task its depth (longest path
//! from any root) and emits a deterministic topological order; the task's
//! rank is its position in that order. When extending an existing plan, the
//! ids already registered in the plan resolve as parents with their stored
//! depths.

use std::collections::BTreeMap;

use crate::assets::TrainTask;
use crate::error::{LedgerError, LedgerResult};
use crate::input::{
    InputComputePlanAggregatetuple, InputComputePlanCompositeTraintuple,
    InputComputePlanTraintuple,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Train,
    Composite,
    Aggregate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeTask {
    pub kind: TaskKind,
    /// Position in the task's input list, to recover the payload item.
    pub input_index: usize,
    pub id: String,
    pub parent_ids: Vec<String>,
    pub depth: u32,
}

/// Build the ordered task list for a plan payload.
///
/// `existing` maps the ids already registered in the plan (empty for a new
/// plan) to their train tasks; their depths seed the depth pass.
pub fn build_compute_dag(
    traintuples: &[InputComputePlanTraintuple],
    composite_traintuples: &[InputComputePlanCompositeTraintuple],
    aggregatetuples: &[InputComputePlanAggregatetuple],
    existing: &BTreeMap<String, TrainTask>,
) -> LedgerResult<Vec<ComputeTask>> {
    let mut tasks = Vec::with_capacity(
        traintuples.len() + composite_traintuples.len() + aggregatetuples.len(),
    );
    for (i, t) in traintuples.iter().enumerate() {
        tasks.push(ComputeTask {
            kind: TaskKind::Train,
            input_index: i,
            id: t.id.clone(),
            parent_ids: t.in_models_ids.clone(),
            depth: 0,
        });
    }
    for (i, t) in composite_traintuples.iter().enumerate() {
        let mut parents = Vec::new();
        if let Some(head) = &t.in_head_model_id {
            parents.push(head.clone());
        }
        if let Some(trunk) = &t.in_trunk_model_id {
            if !parents.contains(trunk) {
                parents.push(trunk.clone());
            }
        }
        tasks.push(ComputeTask {
            kind: TaskKind::Composite,
            input_index: i,
            id: t.id.clone(),
            parent_ids: parents,
            depth: 0,
        });
    }
    for (i, t) in aggregatetuples.iter().enumerate() {
        tasks.push(ComputeTask {
            kind: TaskKind::Aggregate,
            input_index: i,
            id: t.id.clone(),
            parent_ids: t.in_models_ids.clone(),
            depth: 0,
        });
    }

    validate_references(&tasks, existing)?;
    assign_depths(&mut tasks, existing)?;

    // Stable by construction: ties keep the payload order
    // (traintuples, then composites, then aggregatetuples).
    tasks.sort_by_key(|t| t.depth);
    Ok(tasks)
}

fn validate_references(
    tasks: &[ComputeTask],
    existing: &BTreeMap<String, TrainTask>,
) -> LedgerResult<()> {
    let mut ids = BTreeMap::new();
    for task in tasks {
        if existing.contains_key(&task.id) {
            return Err(LedgerError::bad_request(format!(
                "task id {} is already registered in this compute plan",
                task.id
            )));
        }
        if ids.insert(task.id.clone(), ()).is_some() {
            return Err(LedgerError::bad_request(format!(
                "duplicate task id {}",
                task.id
            )));
        }
    }
    for task in tasks {
        for parent in &task.parent_ids {
            if parent == &task.id {
                return Err(LedgerError::bad_request(format!(
                    "task id {} references itself",
                    task.id
                )));
            }
            if !ids.contains_key(parent) && !existing.contains_key(parent) {
                return Err(LedgerError::bad_request(format!(
                    "task id {} references unknown id {parent}",
                    task.id
                )));
            }
        }
    }
    Ok(())
}

/// Fixed-point pass: a task gets `1 + max(parent depths)` once every parent
/// is assigned. A pass without progress means the references are circular.
fn assign_depths(
    tasks: &mut [ComputeTask],
    existing: &BTreeMap<String, TrainTask>,
) -> LedgerResult<()> {
    let mut depths: BTreeMap<String, u32> = existing
        .iter()
        .map(|(id, task)| (id.clone(), task.depth))
        .collect();
    let mut pending: Vec<usize> = (0..tasks.len()).collect();
    while !pending.is_empty() {
        let mut next = Vec::with_capacity(pending.len());
        for &i in &pending {
            let resolved: Option<Vec<u32>> = tasks[i]
                .parent_ids
                .iter()
                .map(|p| depths.get(p).copied())
                .collect();
            match resolved {
                Some(parent_depths) => {
                    let depth = parent_depths.iter().max().map_or(0, |d| d + 1);
                    tasks[i].depth = depth;
                    depths.insert(tasks[i].id.clone(), depth);
                }
                None => next.push(i),
            }
        }
        if next.len() == pending.len() {
            return Err(LedgerError::bad_request(
                "circular task references in compute plan",
            ));
        }
        pending = next;
    }
    Ok(())
}
