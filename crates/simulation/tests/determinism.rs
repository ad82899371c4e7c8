//! The whole point of the simulation: identical seeds replay identically.

use std::time::Duration;

use tracing_test::traced_test;

use vertebra_simulation::{NetworkConfig, SimulationConfig, SimulationRunner};

fn config(seed: u64) -> SimulationConfig {
    SimulationConfig {
        num_validators: 4,
        network: NetworkConfig {
            packet_loss_rate: 0.02,
            ..NetworkConfig::default()
        },
        seed,
        epoch_end: None,
    }
}

/// One scripted run: submissions, a mid-run partition, a heal.
fn scripted_run(seed: u64) -> SimulationRunner {
    let mut runner = SimulationRunner::new(config(seed));
    runner.start();
    for i in 0..8u8 {
        runner.submit_txn((i % 4) as u32, vec![i, 0x5E]);
    }
    runner.run_until(Duration::from_secs(10));
    runner.network_mut().partition_bidirectional(0, 1);
    runner.run_until(Duration::from_secs(15));
    runner.network_mut().heal_all();
    runner.run_until(Duration::from_secs(30));
    runner
}

#[traced_test]
#[test]
fn identical_seeds_replay_identically() {
    let a = scripted_run(7);
    let b = scripted_run(7);

    assert_eq!(a.stats(), b.stats());
    for node in 0..4 {
        assert_eq!(
            a.committed_payloads(node),
            b.committed_payloads(node),
            "node {node} committed differently across replays"
        );
        assert_eq!(a.node(node).current_view(), b.node(node).current_view());
        assert_eq!(
            a.node(node).committed_ledger_header(),
            b.node(node).committed_ledger_header()
        );
    }
}

#[traced_test]
#[test]
fn scripted_runs_make_progress_for_any_seed() {
    for seed in [1u64, 99, 4096] {
        let runner = scripted_run(seed);
        for node in 0..4 {
            assert!(
                runner.node(node).committed_ledger_header().state_version() >= 8,
                "seed {seed}: node {node} did not commit every submission"
            );
        }
    }
}
