use std::time::Duration;

use drover_core::{AgentId, Error, Phase, RunMode, Suite, Weight, WorkUnit, split_phase};

fn ids(names: &[&str]) -> Vec<AgentId> {
    names.iter().map(|n| AgentId::from(*n)).collect()
}

fn count_phase(weights: &[(&str, u64)], run_mode: RunMode) -> Phase {
    let suite = Suite::new(
        weights
            .iter()
            .map(|(n, w)| WorkUnit::new(*n, "noop", Weight::Count(*w)))
            .collect(),
    )
    .unwrap_or_else(|e| panic!("suite: {e}"));
    Phase::new("main", suite, run_mode).unwrap_or_else(|e| panic!("phase: {e}"))
}

fn share(shards: &std::collections::HashMap<AgentId, Phase>, agent: &str, unit: &str) -> u64 {
    shards[&AgentId::from(agent)]
        .suite()
        .get(unit)
        .and_then(|u| u.weight().count())
        .unwrap_or_else(|| panic!("{agent}/{unit} has no count"))
}

#[test]
fn weights_and_workers_are_conserved() {
    let phase = count_phase(&[("a", 10), ("b", 5)], RunMode::constant(7));
    let agents = ids(&["x", "y", "z"]);

    let shards = split_phase(&phase, &agents).unwrap_or_else(|e| panic!("split: {e}"));
    assert_eq!(shards.len(), 3);

    assert_eq!(share(&shards, "x", "a"), 4);
    assert_eq!(share(&shards, "y", "a"), 3);
    assert_eq!(share(&shards, "z", "a"), 3);
    assert_eq!(share(&shards, "x", "b"), 3);
    assert_eq!(share(&shards, "y", "b"), 1);
    assert_eq!(share(&shards, "z", "b"), 1);

    let workers: u64 = shards.values().map(|s| s.run_mode().workers()).sum();
    assert_eq!(workers, 7);

    for shard in shards.values() {
        assert_eq!(&**shard.name(), "main");
        assert_eq!(shard.counters().total(), 0);
        let units: Vec<&str> = shard.suite().units().iter().map(|u| &**u.name()).collect();
        assert_eq!(units, vec!["a", "b"]);
    }
}

#[test]
fn throughput_rate_is_split_exactly() {
    let phase = count_phase(&[("a", 9)], RunMode::throughput(4, 100));
    let shards = split_phase(&phase, &ids(&["x", "y", "z"])).unwrap_or_else(|e| panic!("split: {e}"));

    let rate: u64 = shards.values().filter_map(|s| s.run_mode().rate()).sum();
    let workers: u64 = shards.values().map(|s| s.run_mode().workers()).sum();
    assert_eq!(rate, 100);
    assert_eq!(workers, 4);
}

#[test]
fn duration_and_unbounded_units_are_copied() {
    let suite = Suite::new(vec![
        WorkUnit::new("browse", "noop", Weight::Unbounded),
        WorkUnit::new("buy", "noop", Weight::Count(4)),
    ])
    .unwrap_or_else(|e| panic!("suite: {e}"));
    let phase = Phase::new(
        "soak",
        suite,
        RunMode::constant(2).for_duration(Duration::from_secs(30)),
    )
    .unwrap_or_else(|e| panic!("phase: {e}"));

    let shards = split_phase(&phase, &ids(&["x", "y"])).unwrap_or_else(|e| panic!("split: {e}"));
    for shard in shards.values() {
        assert_eq!(shard.run_mode().duration(), Some(Duration::from_secs(30)));
        assert_eq!(
            shard.suite().get("browse").map(|u| u.weight()),
            Some(Weight::Unbounded)
        );
    }
    assert_eq!(share(&shards, "x", "buy") + share(&shards, "y", "buy"), 4);
}

#[test]
fn invalid_agent_lists_leave_the_phase_alone() {
    let phase = count_phase(&[("a", 10)], RunMode::constant(2));

    assert!(matches!(split_phase(&phase, &[]), Err(Error::NoAgents)));
    assert!(matches!(
        split_phase(&phase, &ids(&["x", "x"])),
        Err(Error::DuplicateAgent(a)) if a == "x"
    ));

    assert_eq!(phase.suite().get("a").map(|u| u.weight()), Some(Weight::Count(10)));
    assert_eq!(phase.counters().total(), 0);
    assert_eq!(phase.run_mode().workers(), 2);
}

#[test]
fn agents_without_workers_get_no_count_share() {
    let phase = count_phase(&[("a", 10), ("b", 5)], RunMode::constant(2));
    let shards = split_phase(&phase, &ids(&["x", "y", "z"])).unwrap_or_else(|e| panic!("split: {e}"));
    assert_eq!(shards.len(), 3);

    assert_eq!(shards[&AgentId::from("x")].run_mode().workers(), 2);
    assert_eq!(share(&shards, "x", "a"), 10);
    assert_eq!(share(&shards, "x", "b"), 5);
    for idle in ["y", "z"] {
        let shard = &shards[&AgentId::from(idle)];
        assert!(shard.run_mode().is_idle());
        assert_eq!(shard.remaining(), 0);
        assert!(shard.next_unit().is_none());
    }
}

#[test]
fn throughput_agents_without_arrivals_get_no_count_share() {
    let phase = count_phase(&[("a", 9)], RunMode::throughput(6, 2));
    let shards = split_phase(&phase, &ids(&["x", "y", "z"])).unwrap_or_else(|e| panic!("split: {e}"));

    assert_eq!(shards[&AgentId::from("x")].run_mode().rate(), Some(2));
    assert_eq!(share(&shards, "x", "a"), 9);
    assert_eq!(share(&shards, "y", "a"), 0);
    assert_eq!(share(&shards, "z", "a"), 0);
}

#[test]
fn count_shards_hand_out_exactly_their_share() {
    let phase = count_phase(&[("a", 10), ("b", 5)], RunMode::constant(3));
    let shards = split_phase(&phase, &ids(&["x", "y", "z"])).unwrap_or_else(|e| panic!("split: {e}"));

    let mut handed = 0;
    for shard in shards.values() {
        let expected = shard.remaining();
        let mut n = 0;
        while shard.next_unit().is_some() {
            n += 1;
        }
        assert_eq!(n, expected);
        handed += n;
    }
    assert_eq!(handed, 15);
}
