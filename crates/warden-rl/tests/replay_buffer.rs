use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use warden_rl::{Action, DecisionEngine, EngineConfig, Experience, ExperienceBuffer, State};

fn tagged(tag: usize) -> Experience {
    let s = State::new(vec![0.0], format!("s{tag}"));
    Experience::new(s.clone(), Action::discrete(0), tag as f64, s, false)
}

#[test]
fn overflow_keeps_the_most_recent_in_order() {
    let mut buffer = ExperienceBuffer::new(10_000);
    let mut evicted = Vec::new();
    for i in 1..=10_005 {
        if let Some(old) = buffer.store(tagged(i)) {
            evicted.push(old.reward as usize);
        }
    }

    assert_eq!(buffer.len(), 10_000);
    assert_eq!(evicted, vec![1, 2, 3, 4, 5]);
    let kept: Vec<usize> = buffer.iter().map(|e| e.reward as usize).collect();
    let expected: Vec<usize> = (6..=10_005).collect();
    assert_eq!(kept, expected);
}

proptest! {
    #[test]
    fn size_never_exceeds_capacity(capacity in 1usize..64, stores in 0usize..200) {
        let mut buffer = ExperienceBuffer::new(capacity);
        for i in 0..stores {
            buffer.store(tagged(i));
            prop_assert!(buffer.len() <= capacity);
        }
        prop_assert_eq!(buffer.len(), stores.min(capacity));
        if stores > 0 {
            let newest = buffer.iter().last().map(|e| e.reward as usize);
            prop_assert_eq!(newest, Some(stores - 1));
            let oldest = buffer.get(0).map(|e| e.reward as usize);
            prop_assert_eq!(oldest, Some(stores.saturating_sub(capacity)));
        }
    }
}

#[test]
fn zero_capacity_is_raised_to_one() {
    let mut buffer = ExperienceBuffer::new(0);
    buffer.store(tagged(1));
    buffer.store(tagged(2));
    assert_eq!(buffer.capacity(), 1);
    assert_eq!(buffer.get(0).map(|e| e.reward), Some(2.0));
}

#[test]
fn sampling_is_uniform_with_replacement() {
    let mut buffer = ExperienceBuffer::new(4);
    for i in 0..4 {
        buffer.store(tagged(i));
    }
    let mut rng = StdRng::seed_from_u64(11);
    let indices = buffer.sample_indices(&mut rng, 4_000);

    assert_eq!(indices.len(), 4_000);
    assert!(indices.iter().all(|&i| i < 4));
    let mut counts = [0usize; 4];
    for i in &indices {
        counts[*i] += 1;
    }
    for c in counts {
        assert!((800..1_200).contains(&c), "counts {counts:?}");
    }
    // A batch larger than the buffer can only be filled with repeats.
    assert_eq!(buffer.sample_indices(&mut rng, 8).len(), 8);
}

#[test]
fn empty_buffer_samples_nothing_and_averages_zero() {
    let buffer = ExperienceBuffer::new(3);
    let mut rng = StdRng::seed_from_u64(0);
    assert!(buffer.sample_indices(&mut rng, 5).is_empty());
    assert_eq!(buffer.average_reward(), 0.0);
}

#[test]
fn engine_buffer_evicts_through_store_experience() {
    let config = EngineConfig {
        hidden_size: 4,
        buffer_capacity: 3,
        batch_size: 2,
        ..EngineConfig::new(1, 2)
    };
    let engine = DecisionEngine::with_seed(config, 5);
    assert!(engine.initialize());

    for i in 0..5 {
        let s = State::new(vec![i as f64], format!("s{i}"));
        engine
            .store_experience(s.clone(), Action::discrete(1), i as f64, s, false)
            .expect("store");
    }

    let rewards: Vec<f64> = engine.experiences().iter().map(|e| e.reward).collect();
    assert_eq!(rewards, vec![2.0, 3.0, 4.0]);
    assert_eq!(engine.average_reward(), 3.0);
}
