use std::sync::Arc;
use std::thread;

use warden_rl::{Action, DecisionEngine, EngineConfig, LearnOutcome, RlError, State};

fn ready(config: EngineConfig, seed: u64) -> DecisionEngine {
    let engine = DecisionEngine::with_seed(config, seed);
    assert!(engine.initialize());
    engine
}

fn compact(state_size: usize, action_size: usize) -> EngineConfig {
    EngineConfig {
        hidden_size: 16,
        buffer_capacity: 32,
        batch_size: 4,
        ..EngineConfig::new(state_size, action_size)
    }
}

#[test]
fn greedy_choice_is_stable_without_exploration() {
    let engine = ready(EngineConfig::new(4, 2), 42);
    engine.set_exploration_rate(0.0);
    let state = State::new(vec![0.1, 0.2, 0.3, 0.4], "probe");

    let first = engine.get_action(&state).expect("action");
    for _ in 1..1_000 {
        let next = engine.get_action(&state).expect("action");
        assert_eq!(next.id, first.id);
    }

    let q = engine.q_values(&state).expect("q");
    let best = if q[1] > q[0] { 1 } else { 0 };
    assert_eq!(first.index(), Some(best));
    assert_eq!(first.expected_reward, q[best]);
    assert_eq!(engine.total_steps(), 1_000);
}

#[test]
fn full_exploration_covers_every_action() {
    let engine = ready(compact(3, 4), 9);
    let state = State::new(vec![0.0, 0.5, 1.0], "s");

    let mut counts = [0usize; 4];
    for _ in 0..4_000 {
        let action = engine.get_action(&state).expect("action");
        counts[action.index().expect("discrete")] += 1;
    }
    for c in counts {
        assert!((800..1_200).contains(&c), "counts {counts:?}");
    }
}

#[test]
fn seeded_engines_agree() {
    let a = ready(compact(3, 4), 77);
    let b = ready(compact(3, 4), 77);
    a.set_exploration_rate(0.5);
    b.set_exploration_rate(0.5);
    let state = State::new(vec![0.2, 0.4, 0.6], "s");

    for _ in 0..200 {
        assert_eq!(
            a.get_action(&state).expect("a"),
            b.get_action(&state).expect("b")
        );
    }
}

#[test]
fn terminal_transition_converges_to_reward() {
    let config = EngineConfig {
        learning_rate: 0.05,
        gamma: 0.0,
        update_frequency: 1_000,
        ..compact(2, 2)
    };
    let engine = ready(config, 3);
    let state = State::new(vec![1.0, 0.5], "s");
    for _ in 0..4 {
        engine
            .store_experience(state.clone(), Action::discrete(0), 1.0, state.clone(), true)
            .expect("store");
    }
    let before = engine.q_values(&state).expect("q");

    for _ in 0..200 {
        assert!(matches!(
            engine.learn().expect("learn"),
            LearnOutcome::Trained { .. }
        ));
    }

    let after = engine.q_values(&state).expect("q");
    assert!((after[0] - 1.0).abs() < 0.05, "q {after:?}");
    // The untaken action's label equals its own prediction.
    assert!((after[1] - before[1]).abs() < 1e-9);
}

#[test]
fn target_syncs_after_update_frequency_calls() {
    let config = EngineConfig {
        batch_size: 1,
        update_frequency: 3,
        ..compact(2, 2)
    };
    let engine = ready(config, 4);
    let s = State::new(vec![0.3, 0.7], "s");
    engine
        .store_experience(s.clone(), Action::discrete(1), 2.0, s, true)
        .expect("store");

    let outcomes: Vec<LearnOutcome> = (0..3).map(|_| engine.learn().expect("learn")).collect();
    assert!(matches!(outcomes[0], LearnOutcome::Trained { synced: false, .. }));
    assert!(matches!(outcomes[1], LearnOutcome::Trained { synced: false, .. }));
    assert_ne!(engine.online_snapshot(), engine.target_snapshot());
    assert!(matches!(outcomes[2], LearnOutcome::Trained { synced: true, .. }));

    assert_eq!(engine.target_syncs(), 1);
    assert_eq!(engine.online_snapshot(), engine.target_snapshot());
}

#[test]
fn non_terminal_transitions_bootstrap_from_target() {
    let config = EngineConfig {
        batch_size: 1,
        gamma: 0.99,
        ..compact(2, 2)
    };
    let terminal = ready(config.clone(), 12);
    let ongoing = ready(config, 12);
    let s = State::new(vec![0.4, 0.9], "s");
    let next = State::new(vec![0.9, 0.4], "next");

    for (engine, done) in [(&terminal, true), (&ongoing, false)] {
        engine
            .store_experience(s.clone(), Action::discrete(0), 0.5, next.clone(), done)
            .expect("store");
        engine.learn().expect("learn");
    }

    assert_ne!(terminal.online_snapshot(), ongoing.online_snapshot());
}

#[test]
fn raised_abort_stops_the_batch_before_any_update() {
    let engine = ready(compact(2, 2), 5);
    let s = State::new(vec![0.1, 0.2], "s");
    for _ in 0..4 {
        engine
            .store_experience(s.clone(), Action::discrete(0), 1.0, s.clone(), false)
            .expect("store");
    }
    let before = engine.online_snapshot();
    let handle = engine.abort_handle();

    handle.request_abort();
    assert_eq!(
        engine.learn().expect("learn"),
        LearnOutcome::Aborted { completed: 0 }
    );
    assert_eq!(engine.online_snapshot(), before);
    assert_eq!(engine.exploration_rate(), 1.0);
    assert_eq!(engine.target_syncs(), 0);

    handle.clear();
    assert!(matches!(
        engine.learn().expect("learn"),
        LearnOutcome::Trained { .. }
    ));
}

#[test]
fn emergency_stop_from_another_thread_wins() {
    let config = EngineConfig {
        batch_size: 32,
        buffer_capacity: 64,
        ..EngineConfig::new(4, 4)
    };
    let engine = Arc::new(ready(config, 6));
    let s = State::new(vec![0.1, 0.2, 0.3, 0.4], "s");
    for i in 0..64 {
        engine
            .store_experience(s.clone(), Action::discrete(i % 4), 1.0, s.clone(), false)
            .expect("store");
    }

    let learner = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for _ in 0..50 {
                engine.learn().expect("learn");
            }
        })
    };
    engine.emergency_stop();
    learner.join().expect("learner thread");

    // Later learns find an empty buffer.
    assert_eq!(engine.buffer_len(), 0);
    assert_eq!(engine.exploration_rate(), 1.0);
    assert_eq!(engine.learn().expect("learn"), LearnOutcome::Skipped);
}

#[test]
fn paused_engine_keeps_deciding_but_not_learning() {
    let engine = ready(compact(2, 2), 8);
    let s = State::new(vec![0.5, 0.5], "s");
    for _ in 0..4 {
        engine
            .store_experience(s.clone(), Action::discrete(1), 1.0, s.clone(), false)
            .expect("store");
    }

    engine.pause_learning();
    assert!(engine.is_learning_paused());
    assert_eq!(engine.learn().expect("learn"), LearnOutcome::Paused);
    assert!(engine.get_action(&s).is_ok());
    assert_eq!(engine.exploration_rate(), 1.0);

    engine.emergency_stop();
    assert!(engine.is_learning_paused());

    engine.resume_learning();
    assert_eq!(engine.learn().expect("learn"), LearnOutcome::Skipped);
}

#[test]
fn calls_fail_before_initialize_and_after_shutdown() {
    let engine = DecisionEngine::with_seed(compact(2, 2), 1);
    let s = State::new(vec![0.0, 0.0], "s");

    assert_eq!(engine.get_action(&s), Err(RlError::NotReady));
    assert_eq!(engine.learn(), Err(RlError::NotReady));
    assert_eq!(
        engine.store_experience(s.clone(), Action::discrete(0), 0.0, s.clone(), false),
        Err(RlError::NotReady)
    );

    assert!(engine.initialize());
    assert!(engine.initialize());
    assert!(engine.is_ready());

    engine.shutdown();
    assert!(!engine.is_ready());
    assert!(!engine.initialize());
    assert_eq!(engine.get_action(&s), Err(RlError::NotReady));
}

#[test]
fn invalid_config_leaves_engine_unready() {
    let config = EngineConfig {
        batch_size: 64,
        buffer_capacity: 8,
        ..compact(2, 2)
    };
    let engine = DecisionEngine::with_seed(config, 1);
    assert!(!engine.initialize());
    assert!(!engine.is_ready());
}

#[test]
fn store_rejects_transitions_that_do_not_fit() {
    let engine = ready(compact(3, 2), 2);
    let good = State::new(vec![0.0; 3], "good");
    let short = State::new(vec![0.0; 2], "short");

    assert_eq!(
        engine.store_experience(short.clone(), Action::discrete(0), 0.0, good.clone(), false),
        Err(RlError::DimensionMismatch { expected: 3, actual: 2 })
    );
    assert_eq!(
        engine.store_experience(good.clone(), Action::discrete(0), 0.0, short, false),
        Err(RlError::DimensionMismatch { expected: 3, actual: 2 })
    );
    assert!(matches!(
        engine.store_experience(good.clone(), Action::discrete(2), 0.0, good.clone(), false),
        Err(RlError::InvalidAction { action_count: 2, .. })
    ));
    assert!(matches!(
        engine.store_experience(good.clone(), Action::new("custom", vec![]), 0.0, good, false),
        Err(RlError::InvalidAction { .. })
    ));
    assert_eq!(engine.buffer_len(), 0);
}

#[test]
fn exploit_with_wrong_dimension_is_an_error() {
    let engine = ready(compact(3, 2), 2);
    engine.set_exploration_rate(0.0);
    let wrong = State::new(vec![1.0], "wrong");
    assert_eq!(
        engine.get_action(&wrong),
        Err(RlError::DimensionMismatch { expected: 3, actual: 1 })
    );
    assert_eq!(engine.total_steps(), 0);
}

#[test]
fn explore_with_wrong_dimension_is_an_error() {
    let engine = ready(compact(3, 2), 2);
    engine.set_exploration_rate(1.0);
    let wrong = State::new(vec![1.0], "wrong");
    for _ in 0..20 {
        assert_eq!(
            engine.get_action(&wrong),
            Err(RlError::DimensionMismatch { expected: 3, actual: 1 })
        );
    }
    assert_eq!(engine.total_steps(), 0);

    let good = State::new(vec![0.1, 0.2, 0.3], "good");
    assert!(engine.get_action(&good).is_ok());
    assert_eq!(engine.total_steps(), 1);
}

#[test]
fn restored_snapshot_reproduces_predictions() {
    let source = ready(compact(2, 3), 20);
    let copy = ready(compact(2, 3), 21);
    let s = State::new(vec![0.25, 0.75], "s");
    assert_ne!(source.q_values(&s), copy.q_values(&s));

    copy.restore_snapshot(&source.online_snapshot())
        .expect("restore");
    assert_eq!(source.q_values(&s), copy.q_values(&s));
    assert_eq!(copy.online_snapshot(), copy.target_snapshot());

    let mismatched = ready(compact(4, 3), 22);
    assert!(matches!(
        mismatched.restore_snapshot(&source.online_snapshot()),
        Err(RlError::IncompatibleSnapshot(_))
    ));
}

#[test]
fn telemetry_reflects_counters() {
    let engine = ready(compact(2, 2), 30);
    let s = State::new(vec![0.0, 1.0], "s");
    engine.start_episode();
    let _ = engine.get_action(&s).expect("action");
    engine
        .store_experience(s.clone(), Action::discrete(0), 3.0, s, false)
        .expect("store");

    let t = engine.telemetry();
    assert_eq!(t.total_steps, 1);
    assert_eq!(t.total_episodes, 1);
    assert_eq!(t.buffer_len, 1);
    assert_eq!(t.average_reward, 3.0);
    assert!(!t.learning_paused);

    let json = serde_json::to_value(&t).expect("json");
    assert_eq!(json["total_steps"], 1);
}
