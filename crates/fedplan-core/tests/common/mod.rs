// Copyright (c) 2026 Fedplan Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared fixture: two registered worker nodes, a catalog on each side,
//! and helpers to build tuples against it.

use fedplan_core::input::{
    InputAlgo, InputDataManager, InputDataSample, InputDataset, InputObjective, InputPermissions,
};
use fedplan_core::ledger::{LedgerDb, MemStore};
use fedplan_core::{algo, data, objective, permissions};

pub const WORKER_A: &str = "workerA";
pub const WORKER_B: &str = "workerB";
pub const WORKER_C: &str = "workerC";

pub const DATA_MANAGER_KEY: &str = "0dddddd1-aaaa-bbbb-cccc-000000000001";
pub const DATA_MANAGER_B_KEY: &str = "0dddddd2-aaaa-bbbb-cccc-000000000002";
pub const TRAIN_SAMPLE_1: &str = "05aaaaa1-aaaa-bbbb-cccc-000000000001";
pub const TRAIN_SAMPLE_2: &str = "05aaaaa2-aaaa-bbbb-cccc-000000000002";
pub const TRAIN_SAMPLE_B: &str = "05aaaab1-aaaa-bbbb-cccc-000000000003";
pub const TEST_SAMPLE_1: &str = "07eeeee1-aaaa-bbbb-cccc-000000000001";
pub const TEST_SAMPLE_2: &str = "07eeeee2-aaaa-bbbb-cccc-000000000002";
pub const OBJECTIVE_KEY: &str = "0bbbbbb1-aaaa-bbbb-cccc-000000000001";
pub const ALGO_KEY: &str = "0a111111-aaaa-bbbb-cccc-000000000001";
pub const COMPOSITE_ALGO_KEY: &str = "0a222222-aaaa-bbbb-cccc-000000000002";
pub const AGGREGATE_ALGO_KEY: &str = "0a333333-aaaa-bbbb-cccc-000000000003";

/// Deterministic 36-character key for per-test assets.
pub fn uid(n: u32) -> String {
    format!("{n:08x}-1234-5678-9abc-00000000{n:04x}")
}

pub fn checksum(seed: &str) -> String {
    seed.repeat(64 / seed.len())
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub struct Fixture {
    pub store: MemStore,
}

impl Fixture {
    /// Empty ledger with workers A, B and C registered as nodes.
    pub fn new() -> Self {
        let mut fixture = Self {
            store: MemStore::new(),
        };
        for worker in [WORKER_A, WORKER_B, WORKER_C] {
            let mut db = fixture.db(worker);
            permissions::register_node(&mut db).expect("register node");
        }
        fixture
    }

    /// One transaction issued by `creator`.
    pub fn db(&mut self, creator: &str) -> LedgerDb<'_, MemStore> {
        LedgerDb::new(&mut self.store, creator)
    }

    /// Catalog owned by worker A: data manager with train and test samples,
    /// an objective certified on the test samples, and the three algos.
    /// Worker B gets its own data manager and one train sample.
    pub fn register_catalog(&mut self) {
        self.register_data_manager(WORKER_A, DATA_MANAGER_KEY, "a1");
        self.register_data_manager(WORKER_B, DATA_MANAGER_B_KEY, "b1");

        self.register_samples(WORKER_A, &[TRAIN_SAMPLE_1, TRAIN_SAMPLE_2], DATA_MANAGER_KEY, false);
        self.register_samples(WORKER_A, &[TEST_SAMPLE_1, TEST_SAMPLE_2], DATA_MANAGER_KEY, true);
        self.register_samples(WORKER_B, &[TRAIN_SAMPLE_B], DATA_MANAGER_B_KEY, false);

        let mut db = self.db(WORKER_A);
        objective::register_objective(
            &mut db,
            &InputObjective {
                key: OBJECTIVE_KEY.to_string(),
                name: "MSI classification".to_string(),
                description_checksum: checksum("0b"),
                description_storage_address: "https://assets.test/objective/description"
                    .to_string(),
                metrics_name: "accuracy".to_string(),
                metrics_checksum: checksum("0c"),
                metrics_storage_address: "https://assets.test/objective/metrics".to_string(),
                test_dataset: InputDataset {
                    data_manager_key: DATA_MANAGER_KEY.to_string(),
                    data_sample_keys: strings(&[TEST_SAMPLE_1, TEST_SAMPLE_2]),
                },
                permissions: InputPermissions::open(),
                metadata: Default::default(),
            },
        )
        .expect("register objective");

        self.register_algo_with(WORKER_A, ALGO_KEY, "standard algo", InputPermissions::open());
        let mut db = self.db(WORKER_A);
        algo::register_composite_algo(&mut db, &algo_input(COMPOSITE_ALGO_KEY, "composite algo", InputPermissions::open()))
            .expect("register composite algo");
        algo::register_aggregate_algo(&mut db, &algo_input(AGGREGATE_ALGO_KEY, "aggregate algo", InputPermissions::open()))
            .expect("register aggregate algo");
    }

    pub fn register_data_manager(&mut self, owner: &str, key: &str, seed: &str) {
        let mut db = self.db(owner);
        data::register_data_manager(
            &mut db,
            &InputDataManager {
                key: key.to_string(),
                name: format!("dataset of {owner}"),
                opener_checksum: checksum(seed),
                opener_storage_address: format!("https://assets.test/{key}/opener"),
                data_type: "images".to_string(),
                description_checksum: checksum("d0"),
                description_storage_address: format!("https://assets.test/{key}/description"),
                objective_key: None,
                permissions: InputPermissions::open(),
                metadata: Default::default(),
            },
        )
        .expect("register data manager");
    }

    pub fn register_samples(
        &mut self,
        owner: &str,
        keys: &[&str],
        data_manager_key: &str,
        test_only: bool,
    ) {
        let mut db = self.db(owner);
        data::register_data_sample(
            &mut db,
            &InputDataSample {
                keys: strings(keys),
                data_manager_keys: strings(&[data_manager_key]),
                test_only,
            },
        )
        .expect("register data samples");
    }

    pub fn register_algo_with(
        &mut self,
        owner: &str,
        key: &str,
        name: &str,
        permissions: InputPermissions,
    ) {
        let mut db = self.db(owner);
        algo::register_algo(&mut db, &algo_input(key, name, permissions)).expect("register algo");
    }
}

pub fn algo_input(key: &str, name: &str, permissions: InputPermissions) -> InputAlgo {
    InputAlgo {
        key: key.to_string(),
        name: name.to_string(),
        checksum: checksum("1a"),
        storage_address: format!("https://assets.test/algo/{key}"),
        description_checksum: checksum("1b"),
        description_storage_address: format!("https://assets.test/algo/{key}/description"),
        permissions,
        metadata: Default::default(),
    }
}
