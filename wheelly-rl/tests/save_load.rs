//! Agent persistence round trip: the spec and the binary property map
//! together must reconstruct an identical agent.

use ndarray::array;
use std::collections::BTreeMap;
use std::path::Path;
use wheelly_rl::agent::SPEC_SCHEMA;
use wheelly_rl::processors::ProcessorSpec;
use wheelly_rl::{
    AgentSpec, ExecutionResult, LayerSpec, NetworkSpec, SeedRng, SignalSpec, Signals, TDAgent,
};

fn agent_spec() -> AgentSpec {
    let mut state = BTreeMap::new();
    state.insert(
        "distance".to_string(),
        SignalSpec::Float {
            shape: vec![1],
            min_value: 0.0,
            max_value: 10.0,
        },
    );
    state.insert(
        "sensor".to_string(),
        SignalSpec::Float {
            shape: vec![1],
            min_value: -90.0,
            max_value: 90.0,
        },
    );

    let mut actions = BTreeMap::new();
    actions.insert(
        "direction".to_string(),
        SignalSpec::Int {
            shape: vec![1],
            num_values: 3,
        },
    );

    let mut alphas = BTreeMap::new();
    alphas.insert("critic".to_string(), 0.03);
    alphas.insert("direction".to_string(), 0.03);

    let mut network = NetworkSpec::new();
    network.insert(
        "hidden".to_string(),
        LayerSpec::Dense {
            inputs: vec!["distance.tiles".to_string()],
            input_size: 8,
            output_size: 4,
        },
    );
    network.insert(
        "hidden.act".to_string(),
        LayerSpec::Tanh {
            inputs: vec!["hidden".to_string()],
        },
    );
    network.insert(
        "critic".to_string(),
        LayerSpec::Dense {
            inputs: vec!["hidden.act".to_string()],
            input_size: 4,
            output_size: 1,
        },
    );
    network.insert(
        "direction.logits".to_string(),
        LayerSpec::Dense {
            inputs: vec!["hidden.act".to_string()],
            input_size: 4,
            output_size: 3,
        },
    );
    network.insert(
        "direction".to_string(),
        LayerSpec::Softmax {
            inputs: vec!["direction.logits".to_string()],
            temperature: 0.8,
        },
    );

    AgentSpec {
        schema: SPEC_SCHEMA.to_string(),
        state,
        actions,
        reward_alpha: 0.1,
        alphas,
        lambda: 0.5,
        num_steps: 4,
        num_epochs: 2,
        batch_size: 4,
        network,
        input_process: Some(vec![ProcessorSpec::Partition {
            name: "distance.tiles".to_string(),
            input: "distance".to_string(),
            num_tiles: 8,
        }]),
    }
}

fn observation(i: usize) -> Signals {
    let mut state = Signals::new();
    state.insert("distance".to_string(), array![[(i % 10) as f32]]);
    state.insert("sensor".to_string(), array![[(i as f32) * 7.0 - 30.0]]);
    state
}

fn run_steps(agent: &mut TDAgent, steps: usize) {
    for i in 0..steps {
        let state = observation(i);
        let actions = agent.act(&state).unwrap();
        agent
            .observe(ExecutionResult {
                state,
                actions,
                reward: (i as f32) * 0.1 - 0.2,
                next_state: observation(i + 1),
            })
            .unwrap();
    }
}

#[test]
fn test_save_load_identical_behavior() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model");

    let mut original =
        TDAgent::create(agent_spec(), None, SeedRng::new(1234), &path, usize::MAX).unwrap();
    original.save().unwrap();

    let mut reloaded = TDAgent::load(&path, usize::MAX, SeedRng::new(1234)).unwrap();

    // Same weights bitwise
    let original_props = original.network().props();
    let reloaded_props = reloaded.network().props();
    assert_eq!(original_props.len(), reloaded_props.len());
    for (name, value) in &original_props {
        let other = &reloaded_props[name];
        assert_eq!(value.shape(), other.shape(), "shape of {}", name);
        for (a, b) in value.iter().zip(other.iter()) {
            assert_eq!(a.to_bits(), b.to_bits(), "weights of {}", name);
        }
    }

    // Same behavior over 10 identical transitions
    run_steps(&mut original, 10);
    run_steps(&mut reloaded, 10);
    assert_eq!(original.avg_reward().to_bits(), reloaded.avg_reward().to_bits());
    let state = observation(3);
    let a = original.network().forward(&agent_process(&original, &state)).unwrap();
    let b = reloaded.network().forward(&agent_process(&reloaded, &state)).unwrap();
    assert_eq!(a.values["direction"], b.values["direction"]);
    assert_eq!(a.values["critic"], b.values["critic"]);
}

/// Applies the agent input pipeline the same way act() does.
fn agent_process(agent: &TDAgent, state: &Signals) -> Signals {
    let processor = wheelly_rl::processors::InputProcessor::create(
        agent.spec().input_process.clone().unwrap(),
        &agent.spec().state,
    )
    .unwrap();
    processor.process(state)
}

#[test]
fn test_backup_created_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model");
    let mut agent =
        TDAgent::create(agent_spec(), None, SeedRng::new(1), &path, usize::MAX).unwrap();
    agent.save().unwrap();
    agent.save().unwrap();
    agent.save().unwrap();

    let backups: Vec<_> = std::fs::read_dir(&path)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            name.starts_with("agent-") && name.ends_with(".bin")
        })
        .collect();
    assert_eq!(backups.len(), 1);
}

#[test]
fn test_spec_yaml_round_trip() {
    let spec = agent_spec();
    let text = serde_yaml::to_string(&spec).unwrap();
    assert!(text.contains("$schema"));
    assert!(text.contains("rewardAlpha"));
    let parsed: AgentSpec = serde_yaml::from_str(&text).unwrap();
    assert_eq!(parsed, spec);
}
