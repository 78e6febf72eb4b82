// Copyright (c) 2026 Fedplan Contributors
// SPDX-License-Identifier: Apache-2.0

//! Whole-plan lifecycle scenarios: creation, readiness propagation,
//! failure handling, cancellation and the plan aggregate counters.

mod common;

use common::*;

use fedplan_core::assets::{ComputePlanStatus, Status};
use fedplan_core::compute_plan::{self, state_key_for, worker_state_key};
use fedplan_core::input::{
    InputComputePlan, InputComputePlanTesttuple, InputComputePlanTraintuple, InputKey,
    InputKeyChecksumAddress, InputLog, InputLogSuccessTrain, InputTraintuple,
};
use fedplan_core::{testtuple, traintuple, tuple};

fn plan_task(key: &str, id: &str, samples: &[&str], parents: &[&str]) -> InputComputePlanTraintuple {
    InputComputePlanTraintuple {
        key: key.to_string(),
        data_manager_key: DATA_MANAGER_KEY.to_string(),
        data_sample_keys: strings(samples),
        algo_key: ALGO_KEY.to_string(),
        id: id.to_string(),
        in_models_ids: strings(parents),
        ..Default::default()
    }
}

fn two_step_plan(plan_key: &str, t1: &str, t2: &str, testtuple_key: &str) -> InputComputePlan {
    InputComputePlan {
        key: plan_key.to_string(),
        traintuples: vec![
            plan_task(t1, "first", &[TRAIN_SAMPLE_1], &[]),
            plan_task(t2, "second", &[TRAIN_SAMPLE_2], &["first"]),
        ],
        testtuples: vec![InputComputePlanTesttuple {
            key: testtuple_key.to_string(),
            objective_key: OBJECTIVE_KEY.to_string(),
            traintuple_id: "second".to_string(),
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn out_model(n: u32) -> InputKeyChecksumAddress {
    InputKeyChecksumAddress {
        key: uid(9000 + n),
        checksum: checksum("9a"),
        storage_address: format!("https://models.test/{n}"),
    }
}

fn log_success(fixture: &mut Fixture, key: &str, model_n: u32) {
    let mut db = fixture.db(WORKER_A);
    traintuple::log_start_train(
        &mut db,
        &InputKey {
            key: key.to_string(),
        },
    )
    .expect("log start");
    traintuple::log_success_train(
        &mut db,
        &InputLogSuccessTrain {
            key: key.to_string(),
            log: String::new(),
            out_model: out_model(model_n),
        },
    )
    .expect("log success");
}

#[test]
fn linear_two_step_plan_moves_child_to_todo() {
    let mut fixture = Fixture::new();
    fixture.register_catalog();
    let (plan_key, t1, t2, tt) = (uid(1), uid(2), uid(3), uid(4));

    let mut db = fixture.db(WORKER_A);
    let out = compute_plan::create_compute_plan(&mut db, &two_step_plan(&plan_key, &t1, &t2, &tt))
        .expect("create plan");
    assert_eq!(out.traintuple_keys, vec![t1.clone(), t2.clone()]);
    assert_eq!(out.testtuple_keys, vec![tt.clone()]);
    assert_eq!(out.status, ComputePlanStatus::Todo);
    assert_eq!(out.id_to_train_task["first"].depth, 0);
    assert_eq!(out.id_to_train_task["second"].depth, 1);
    let events = db.take_events();
    assert_eq!(events.tuples, vec![t1.clone(), t2.clone(), tt.clone()]);

    let first = db.get_traintuple(&t1).expect("t1");
    let second = db.get_traintuple(&t2).expect("t2");
    assert_eq!(first.status, Status::Todo);
    assert_eq!(first.rank, 0);
    assert_eq!(second.status, Status::Waiting);
    assert_eq!(second.rank, 1);
    assert_eq!(second.in_model_keys, vec![t1.clone()]);
    assert_eq!(db.get_testtuple(&tt).expect("tt").status, Status::Waiting);
    drop(db);

    log_success(&mut fixture, &t1, 1);
    let db = fixture.db(WORKER_A);
    assert_eq!(db.get_traintuple(&t2).expect("t2").status, Status::Todo);
    assert_eq!(db.get_testtuple(&tt).expect("tt").status, Status::Waiting);
    drop(db);

    log_success(&mut fixture, &t2, 2);
    let db = fixture.db(WORKER_A);
    assert_eq!(db.get_testtuple(&tt).expect("tt").status, Status::Todo);
    let plan = db.get_compute_plan(&plan_key).expect("plan");
    let state = db.get_compute_plan_state(&plan.state_key).expect("state");
    assert_eq!(state.status, ComputePlanStatus::Done);
}

#[test]
fn failure_inside_a_plan_fails_testtuples_and_the_plan_only() {
    let mut fixture = Fixture::new();
    fixture.register_catalog();
    let (plan_key, t1, t2, tt) = (uid(11), uid(12), uid(13), uid(14));

    let mut db = fixture.db(WORKER_A);
    compute_plan::create_compute_plan(&mut db, &two_step_plan(&plan_key, &t1, &t2, &tt))
        .expect("create plan");
    // A testtuple on the first task, which is about to fail.
    let tt_on_first = uid(15);
    testtuple::create_testtuple(
        &mut db,
        &fedplan_core::input::InputTesttuple {
            key: tt_on_first.clone(),
            traintuple_key: t1.clone(),
            objective_key: OBJECTIVE_KEY.to_string(),
            data_manager_key: None,
            data_sample_keys: vec![],
            tag: String::new(),
            metadata: Default::default(),
        },
    )
    .expect("create testtuple");

    traintuple::log_start_train(&mut db, &InputKey { key: t1.clone() }).expect("start");
    traintuple::log_fail_train(
        &mut db,
        &InputLog {
            key: t1.clone(),
            log: "oom".to_string(),
        },
    )
    .expect("fail");

    assert_eq!(db.get_testtuple(&tt_on_first).expect("tt").status, Status::Failed);
    // Training children keep waiting inside a plan until it is canceled.
    assert_eq!(db.get_traintuple(&t2).expect("t2").status, Status::Waiting);
    assert_eq!(db.get_testtuple(&tt).expect("tt").status, Status::Waiting);
    let state = db
        .get_compute_plan_state(&state_key_for(&plan_key))
        .expect("state");
    assert_eq!(state.status, ComputePlanStatus::Failed);
    drop(db);

    // Canceling afterwards reaps the waiting tuples; the failed plan state
    // is kept.
    let mut db = fixture.db(WORKER_A);
    compute_plan::cancel_compute_plan(&mut db, &InputKey { key: plan_key.clone() })
        .expect("cancel");
    assert_eq!(db.get_traintuple(&t2).expect("t2").status, Status::Aborted);
    assert_eq!(db.get_testtuple(&tt).expect("tt").status, Status::Aborted);
    let state = db
        .get_compute_plan_state(&state_key_for(&plan_key))
        .expect("state");
    assert_eq!(state.status, ComputePlanStatus::Failed);
}

#[test]
fn failure_outside_a_plan_cascades_through_descendants() {
    let mut fixture = Fixture::new();
    fixture.register_catalog();
    let (t1, t2, t3, tt) = (uid(21), uid(22), uid(23), uid(24));

    let mut db = fixture.db(WORKER_A);
    for (key, samples, parents) in [
        (&t1, vec![TRAIN_SAMPLE_1], vec![]),
        (&t2, vec![TRAIN_SAMPLE_2], vec![t1.clone()]),
        (&t3, vec![TRAIN_SAMPLE_1], vec![t2.clone()]),
    ] {
        traintuple::create_traintuple(
            &mut db,
            &InputTraintuple {
                key: key.to_string(),
                algo_key: ALGO_KEY.to_string(),
                in_models: parents,
                data_manager_key: DATA_MANAGER_KEY.to_string(),
                data_sample_keys: strings(&samples),
                compute_plan_key: None,
                rank: None,
                tag: String::new(),
                metadata: Default::default(),
            },
        )
        .expect("create traintuple");
    }
    testtuple::create_testtuple(
        &mut db,
        &fedplan_core::input::InputTesttuple {
            key: tt.clone(),
            traintuple_key: t1.clone(),
            objective_key: OBJECTIVE_KEY.to_string(),
            data_manager_key: None,
            data_sample_keys: vec![],
            tag: String::new(),
            metadata: Default::default(),
        },
    )
    .expect("create testtuple");

    traintuple::log_start_train(&mut db, &InputKey { key: t1.clone() }).expect("start");
    traintuple::log_fail_train(
        &mut db,
        &InputLog {
            key: t1.clone(),
            log: String::new(),
        },
    )
    .expect("fail");

    assert_eq!(db.get_traintuple(&t2).expect("t2").status, Status::Failed);
    assert_eq!(db.get_traintuple(&t3).expect("t3").status, Status::Failed);
    assert_eq!(db.get_testtuple(&tt).expect("tt").status, Status::Failed);
}

#[test]
fn cancel_leaves_running_tuples_and_settles_on_their_completion() {
    let mut fixture = Fixture::new();
    fixture.register_catalog();
    let (plan_key, t1, t2, t3) = (uid(31), uid(32), uid(33), uid(34));

    let mut db = fixture.db(WORKER_A);
    compute_plan::create_compute_plan(
        &mut db,
        &InputComputePlan {
            key: plan_key.clone(),
            traintuples: vec![
                plan_task(&t1, "root", &[TRAIN_SAMPLE_1], &[]),
                plan_task(&t2, "left", &[TRAIN_SAMPLE_2], &["root"]),
                plan_task(&t3, "right", &[TRAIN_SAMPLE_1], &["root"]),
            ],
            ..Default::default()
        },
    )
    .expect("create plan");
    traintuple::log_start_train(&mut db, &InputKey { key: t1.clone() }).expect("start");
    drop(db);

    let mut db = fixture.db(WORKER_A);
    let out = compute_plan::cancel_compute_plan(&mut db, &InputKey { key: plan_key.clone() })
        .expect("cancel");
    assert_eq!(out.status, ComputePlanStatus::Canceled);
    assert_eq!(db.get_traintuple(&t1).expect("t1").status, Status::Doing);
    assert_eq!(db.get_traintuple(&t2).expect("t2").status, Status::Aborted);
    assert_eq!(db.get_traintuple(&t3).expect("t3").status, Status::Aborted);
    drop(db);

    // The still-running root succeeds; every tuple is now resolved and the
    // plan settles as done.
    let mut db = fixture.db(WORKER_A);
    traintuple::log_success_train(
        &mut db,
        &InputLogSuccessTrain {
            key: t1.clone(),
            log: String::new(),
            out_model: out_model(31),
        },
    )
    .expect("success");
    let state = db
        .get_compute_plan_state(&state_key_for(&plan_key))
        .expect("state");
    assert_eq!(state.status, ComputePlanStatus::Done);
}

#[test]
fn worker_rank_pair_is_unique_within_a_plan() {
    let mut fixture = Fixture::new();
    fixture.register_catalog();
    let (plan_key, t1, t2) = (uid(41), uid(42), uid(43));

    let mut db = fixture.db(WORKER_A);
    compute_plan::create_compute_plan(
        &mut db,
        &InputComputePlan {
            key: plan_key.clone(),
            traintuples: vec![plan_task(&t1, "only", &[TRAIN_SAMPLE_1], &[])],
            ..Default::default()
        },
    )
    .expect("create plan");

    let err = traintuple::create_traintuple(
        &mut db,
        &InputTraintuple {
            key: t2,
            algo_key: ALGO_KEY.to_string(),
            in_models: vec![],
            data_manager_key: DATA_MANAGER_KEY.to_string(),
            data_sample_keys: strings(&[TRAIN_SAMPLE_2]),
            compute_plan_key: Some(plan_key),
            rank: Some(0),
            tag: String::new(),
            metadata: Default::default(),
        },
    )
    .expect_err("duplicate (worker, rank)");
    assert_eq!(err.status(), 400);
}

#[test]
fn duplicate_tuple_key_conflicts_with_key_echoed() {
    let mut fixture = Fixture::new();
    fixture.register_catalog();
    let key = uid(51);

    let inp = InputTraintuple {
        key: key.clone(),
        algo_key: ALGO_KEY.to_string(),
        in_models: vec![],
        data_manager_key: DATA_MANAGER_KEY.to_string(),
        data_sample_keys: strings(&[TRAIN_SAMPLE_1]),
        compute_plan_key: None,
        rank: None,
        tag: String::new(),
        metadata: Default::default(),
    };
    let mut db = fixture.db(WORKER_A);
    traintuple::create_traintuple(&mut db, &inp).expect("first create");
    let err = traintuple::create_traintuple(&mut db, &inp).expect_err("second create");
    assert_eq!(err.status(), 409);
    assert_eq!(err.keys(), [key]);
}

#[test]
fn traintuple_rejects_test_only_samples() {
    let mut fixture = Fixture::new();
    fixture.register_catalog();

    let mut db = fixture.db(WORKER_A);
    let err = traintuple::create_traintuple(
        &mut db,
        &InputTraintuple {
            key: uid(61),
            algo_key: ALGO_KEY.to_string(),
            in_models: vec![],
            data_manager_key: DATA_MANAGER_KEY.to_string(),
            data_sample_keys: strings(&[TEST_SAMPLE_1]),
            compute_plan_key: None,
            rank: None,
            tag: String::new(),
            metadata: Default::default(),
        },
    )
    .expect_err("test-only samples");
    assert_eq!(err.status(), 400);
}

#[test]
fn plan_counters_add_up_per_worker() {
    let mut fixture = Fixture::new();
    fixture.register_catalog();
    let (plan_key, t1, t2, tt) = (uid(71), uid(72), uid(73), uid(74));

    let mut db = fixture.db(WORKER_A);
    compute_plan::create_compute_plan(&mut db, &two_step_plan(&plan_key, &t1, &t2, &tt))
        .expect("create plan");
    let plan = db.get_compute_plan(&plan_key).expect("plan");
    assert_eq!(plan.workers, vec![WORKER_A.to_string()]);
    let ws = db
        .get_compute_plan_worker_state(&worker_state_key(&plan.state_key, WORKER_A))
        .expect("worker state");
    assert_eq!(ws.tuple_count, 2);
    assert_eq!(ws.done_count, 0);
    drop(db);

    log_success(&mut fixture, &t1, 71);
    log_success(&mut fixture, &t2, 72);
    let db = fixture.db(WORKER_A);
    let plan = db.get_compute_plan(&plan_key).expect("plan");
    let ws = db
        .get_compute_plan_worker_state(&worker_state_key(&plan.state_key, WORKER_A))
        .expect("worker state");
    assert_eq!(ws.done_count, 2);
    assert_eq!(
        plan.traintuple_keys.len()
            + plan.composite_traintuple_keys.len()
            + plan.aggregatetuple_keys.len(),
        ws.tuple_count as usize
    );
}

#[test]
fn clean_models_tracks_and_releases_intermediary_models() {
    let mut fixture = Fixture::new();
    fixture.register_catalog();
    let (plan_key, t1, t2) = (uid(81), uid(82), uid(83));

    let mut db = fixture.db(WORKER_A);
    compute_plan::create_compute_plan(
        &mut db,
        &InputComputePlan {
            key: plan_key.clone(),
            clean_models: true,
            traintuples: vec![
                plan_task(&t1, "first", &[TRAIN_SAMPLE_1], &[]),
                plan_task(&t2, "second", &[TRAIN_SAMPLE_2], &["first"]),
            ],
            ..Default::default()
        },
    )
    .expect("create plan");
    drop(db);

    let model_1 = out_model(81);
    let mut db = fixture.db(WORKER_A);
    traintuple::log_start_train(&mut db, &InputKey { key: t1.clone() }).expect("start");
    traintuple::log_success_train(
        &mut db,
        &InputLogSuccessTrain {
            key: t1.clone(),
            log: String::new(),
            out_model: model_1.clone(),
        },
    )
    .expect("success");
    let plan = db.get_compute_plan(&plan_key).expect("plan");
    let ws = db
        .get_compute_plan_worker_state(&worker_state_key(&plan.state_key, WORKER_A))
        .expect("worker state");
    assert_eq!(ws.intermediary_models_in_use, vec![model_1.key.clone()]);
    drop(db);

    // Once the only consumer of the first model is done, the model is
    // released and surfaced for off-ledger cleanup.
    let mut db = fixture.db(WORKER_A);
    traintuple::log_start_train(&mut db, &InputKey { key: t2.clone() }).expect("start");
    traintuple::log_success_train(
        &mut db,
        &InputLogSuccessTrain {
            key: t2.clone(),
            log: String::new(),
            out_model: out_model(82),
        },
    )
    .expect("success");
    let ws = db
        .get_compute_plan_worker_state(&worker_state_key(&state_key_for(&plan_key), WORKER_A))
        .expect("worker state");
    assert!(!ws.intermediary_models_in_use.contains(&model_1.key));
    let events = db.take_events();
    assert!(events.models_to_delete.contains(&model_1.key));
}

#[test]
fn update_extends_a_plan_with_parents_resolved_across_batches() {
    let mut fixture = Fixture::new();
    fixture.register_catalog();
    let (plan_key, t1, t2, tt, t3) = (uid(101), uid(102), uid(103), uid(104), uid(105));

    let mut db = fixture.db(WORKER_A);
    compute_plan::create_compute_plan(&mut db, &two_step_plan(&plan_key, &t1, &t2, &tt))
        .expect("create plan");
    let out = compute_plan::update_compute_plan(
        &mut db,
        &fedplan_core::input::InputUpdateComputePlan {
            compute_plan_key: plan_key.clone(),
            traintuples: vec![plan_task(&t3, "third", &[TRAIN_SAMPLE_1], &["second"])],
            ..Default::default()
        },
    )
    .expect("update plan");
    assert_eq!(out.traintuple_keys.len(), 3);
    assert_eq!(out.id_to_train_task["third"].depth, 2);

    let third = db.get_traintuple(&t3).expect("t3");
    assert_eq!(third.rank, 2);
    assert_eq!(third.status, Status::Waiting);
    assert_eq!(third.in_model_keys, vec![t2.clone()]);

    // Reusing an id from the original batch is rejected.
    let err = compute_plan::update_compute_plan(
        &mut db,
        &fedplan_core::input::InputUpdateComputePlan {
            compute_plan_key: plan_key,
            traintuples: vec![plan_task(&uid(106), "first", &[TRAIN_SAMPLE_1], &[])],
            ..Default::default()
        },
    )
    .expect_err("duplicate id across batches");
    assert_eq!(err.status(), 400);
}

#[test]
fn readiness_requires_every_parent_done() {
    let mut fixture = Fixture::new();
    fixture.register_catalog();
    let (t1, t2, t3) = (uid(91), uid(92), uid(93));

    let mut db = fixture.db(WORKER_A);
    for (key, samples) in [(&t1, [TRAIN_SAMPLE_1]), (&t2, [TRAIN_SAMPLE_2])] {
        traintuple::create_traintuple(
            &mut db,
            &InputTraintuple {
                key: key.to_string(),
                algo_key: ALGO_KEY.to_string(),
                in_models: vec![],
                data_manager_key: DATA_MANAGER_KEY.to_string(),
                data_sample_keys: strings(&samples),
                compute_plan_key: None,
                rank: None,
                tag: String::new(),
                metadata: Default::default(),
            },
        )
        .expect("create root");
    }
    traintuple::create_traintuple(
        &mut db,
        &InputTraintuple {
            key: t3.clone(),
            algo_key: ALGO_KEY.to_string(),
            in_models: vec![t1.clone(), t2.clone()],
            data_manager_key: DATA_MANAGER_KEY.to_string(),
            data_sample_keys: strings(&[TRAIN_SAMPLE_1]),
            compute_plan_key: None,
            rank: None,
            tag: String::new(),
            metadata: Default::default(),
        },
    )
    .expect("create child");
    assert!(tuple::is_ready(&db, &[t1.clone()], &t1).expect("ready"));
    drop(db);

    log_success(&mut fixture, &t1, 91);
    let db = fixture.db(WORKER_A);
    assert_eq!(db.get_traintuple(&t3).expect("t3").status, Status::Waiting);
    drop(db);

    log_success(&mut fixture, &t2, 92);
    let db = fixture.db(WORKER_A);
    assert_eq!(db.get_traintuple(&t3).expect("t3").status, Status::Todo);
}
