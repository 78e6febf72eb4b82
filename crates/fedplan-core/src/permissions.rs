// Copyright (c) 2026 Fedplan Contributors
// SPDX-License-Identifier: Apache-2.0

//! Asset permissions: who may process an asset and who may download it.
//!
//! Each channel is either public or a closed list of worker identifiers.
//! At registration time the owner is folded into the authorized list, so
//! `merge` stays a plain channel-wise intersection.

use serde::{Deserialize, Serialize};

use crate::assets::Node;
use crate::error::{LedgerError, LedgerResult};
use crate::input::InputPermissions;
use crate::ledger::{LedgerDb, LedgerStore};

pub const NODE_INDEX: &str = "node~key";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub public: bool,
    pub authorized_ids: Vec<String>,
}

impl Permission {
    /// Grant to exactly one worker.
    pub fn restricted_to(id: &str) -> Self {
        Self {
            public: false,
            authorized_ids: vec![id.to_string()],
        }
    }

    pub fn grants(&self, owner: &str, principal: &str) -> bool {
        self.public || principal == owner || self.authorized_ids.iter().any(|id| id == principal)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub process: Permission,
    pub download: Permission,
}

impl Permissions {
    pub fn can_process(&self, owner: &str, principal: &str) -> bool {
        self.process.grants(owner, principal)
    }

    pub fn can_download(&self, owner: &str, principal: &str) -> bool {
        self.download.grants(owner, principal)
    }

    /// Both channels granted to the creator only. Used for composite head
    /// out-models, which never leave their worker.
    pub fn restricted_to(id: &str) -> Self {
        Self {
            process: Permission::restricted_to(id),
            download: Permission::restricted_to(id),
        }
    }
}

/// Build stored permissions from request permissions.
///
/// Every authorized id must be a registered node. The owner is added to the
/// authorized list of each non-public channel, and the download channel
/// mirrors the process channel, as the request only carries the latter.
pub fn new_permissions<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    input: &InputPermissions,
    owner: &str,
) -> LedgerResult<Permissions> {
    let process = new_permission(db, &input.process.authorized_ids, input.process.public, owner)?;
    Ok(Permissions {
        download: process.clone(),
        process,
    })
}

fn new_permission<S: LedgerStore>(
    db: &LedgerDb<'_, S>,
    authorized_ids: &[String],
    public: bool,
    owner: &str,
) -> LedgerResult<Permission> {
    if public {
        return Ok(Permission {
            public: true,
            authorized_ids: vec![],
        });
    }
    let nodes = db.get_index_keys(NODE_INDEX, &["node"])?;
    for id in authorized_ids {
        if !nodes.iter().any(|n| n == id) {
            return Err(LedgerError::bad_request(format!(
                "invalid permission input values: {id} is not a registered node"
            )));
        }
    }
    let mut ids = authorized_ids.to_vec();
    if !ids.iter().any(|id| id == owner) {
        ids.push(owner.to_string());
    }
    ids.sort();
    ids.dedup();
    Ok(Permission {
        public: false,
        authorized_ids: ids,
    })
}

/// Channel-wise composition: public iff both channels are public, otherwise
/// the intersection of the authorized sets.
pub fn merge_permissions(a: &Permissions, b: &Permissions) -> Permissions {
    Permissions {
        process: merge_permission(&a.process, &b.process),
        download: merge_permission(&a.download, &b.download),
    }
}

fn merge_permission(a: &Permission, b: &Permission) -> Permission {
    match (a.public, b.public) {
        (true, true) => Permission {
            public: true,
            authorized_ids: vec![],
        },
        (true, false) => b.clone(),
        (false, true) => a.clone(),
        (false, false) => {
            let mut ids: Vec<String> = a
                .authorized_ids
                .iter()
                .filter(|id| b.authorized_ids.contains(id))
                .cloned()
                .collect();
            ids.sort();
            Permission {
                public: false,
                authorized_ids: ids,
            }
        }
    }
}

/// Register the transaction creator as a node of the network.
pub fn register_node<S: LedgerStore>(db: &mut LedgerDb<'_, S>) -> LedgerResult<Node> {
    let node = Node {
        id: db.creator().to_string(),
    };
    db.add(&node.id, &node)?;
    db.create_index(NODE_INDEX, &["node", &node.id])?;
    Ok(node)
}

pub fn query_nodes<S: LedgerStore>(db: &LedgerDb<'_, S>) -> LedgerResult<Vec<Node>> {
    let ids = db.get_index_keys(NODE_INDEX, &["node"])?;
    Ok(ids.into_iter().map(|id| Node { id }).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemStore;

    fn db_with_nodes<'a>(store: &'a mut MemStore, nodes: &[&str]) -> LedgerDb<'a, MemStore> {
        let mut db = LedgerDb::new(store, nodes[0]);
        for node in nodes {
            let record = Node {
                id: node.to_string(),
            };
            db.add(*node, &record).expect("add node");
            db.create_index(NODE_INDEX, &["node", node]).expect("index");
        }
        db
    }

    fn closed(ids: &[&str]) -> Permissions {
        let p = Permission {
            public: false,
            authorized_ids: ids.iter().map(|s| s.to_string()).collect(),
        };
        Permissions {
            process: p.clone(),
            download: p,
        }
    }

    #[test]
    fn owner_always_processes_own_asset() {
        let perms = closed(&[]);
        assert!(perms.can_process("workerA", "workerA"));
        assert!(!perms.can_process("workerA", "workerB"));
    }

    #[test]
    fn merge_is_intersection_unless_public() {
        let a = closed(&["workerA", "workerB"]);
        let b = closed(&["workerB", "workerC"]);
        let merged = merge_permissions(&a, &b);
        assert_eq!(merged.process.authorized_ids, ["workerB".to_string()]);
        assert!(!merged.process.public);

        let open = Permissions {
            process: Permission {
                public: true,
                authorized_ids: vec![],
            },
            download: Permission {
                public: true,
                authorized_ids: vec![],
            },
        };
        assert!(merge_permissions(&open, &open).process.public);
        let half = merge_permissions(&open, &b);
        assert_eq!(half.process, b.process);
    }

    #[test]
    fn new_permissions_rejects_unregistered_nodes() {
        let mut store = MemStore::default();
        let db = db_with_nodes(&mut store, &["workerA", "workerB"]);
        let input = InputPermissions::closed(&["workerB", "ghost"]);
        let err = new_permissions(&db, &input, "workerA").expect_err("unregistered");
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn new_permissions_folds_in_the_owner() {
        let mut store = MemStore::default();
        let db = db_with_nodes(&mut store, &["workerA", "workerB"]);
        let input = InputPermissions::closed(&["workerB"]);
        let perms = new_permissions(&db, &input, "workerA").expect("permissions");
        assert_eq!(
            perms.process.authorized_ids,
            ["workerA".to_string(), "workerB".to_string()]
        );
        assert_eq!(perms.download, perms.process);
    }
}
