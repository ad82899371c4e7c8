//! Crash/restart scenarios: nodes resume from their persisted safety
//! state and vertex store snapshot, never from thin air.

use std::time::Duration;

use tracing_test::traced_test;

use vertebra_simulation::{SimulationConfig, SimulationRunner};

fn assert_prefix_consistent(runner: &SimulationRunner) {
    let logs: Vec<Vec<Vec<u8>>> = (0..runner.num_nodes() as u32)
        .map(|i| runner.committed_payloads(i))
        .collect();
    for (a, log_a) in logs.iter().enumerate() {
        for (b, log_b) in logs.iter().enumerate() {
            let shorter = log_a.len().min(log_b.len());
            assert_eq!(
                &log_a[..shorter],
                &log_b[..shorter],
                "nodes {a} and {b} disagree on the committed prefix"
            );
        }
    }
}

#[traced_test]
#[test]
fn a_restarted_node_rejoins_and_keeps_committing() {
    let mut runner = SimulationRunner::new(SimulationConfig::default());
    runner.start();
    for node in 0..4 {
        runner.submit_txn(node, vec![0x30 + node as u8]);
    }
    runner.run_until(Duration::from_secs(10));

    let before = runner.node(2).committed_ledger_header().state_version();
    assert!(before >= 1, "nothing committed before the crash");

    runner.restart_node(2);
    assert_eq!(
        runner.node(2).committed_ledger_header().state_version(),
        before,
        "recovery must resume exactly from the persisted ledger"
    );

    for node in 0..4 {
        runner.submit_txn(node, vec![0x40 + node as u8]);
    }
    runner.run_until(Duration::from_secs(40));

    let after = runner.node(2).committed_ledger_header().state_version();
    assert!(after > before, "node 2 stopped committing after restart");
    let committed = runner.committed_payloads(2);
    for node in 0..4u8 {
        assert!(
            committed.contains(&vec![0x40 + node]),
            "node 2 missed the post-restart submission from {node}"
        );
    }
    assert_prefix_consistent(&runner);
}

#[traced_test]
#[test]
fn restart_preserves_the_safety_state() {
    let mut runner = SimulationRunner::new(SimulationConfig::default());
    runner.start();
    runner.run_until(Duration::from_secs(10));

    let last_voted = runner.node(1).safety_state().last_voted_view;
    let locked = runner.node(1).safety_state().locked_view;
    assert!(last_voted.number() > 0, "node 1 never voted before the crash");

    runner.restart_node(1);
    assert_eq!(runner.node(1).safety_state().last_voted_view, last_voted);
    assert_eq!(runner.node(1).safety_state().locked_view, locked);
}

#[traced_test]
#[test]
fn the_whole_cluster_restarts_and_resumes() {
    let mut runner = SimulationRunner::new(SimulationConfig::default());
    runner.start();
    for node in 0..4 {
        runner.submit_txn(node, vec![0x50 + node as u8]);
    }
    runner.run_until(Duration::from_secs(10));
    let before = runner.node(0).committed_ledger_header().state_version();
    assert!(before >= 1);

    for node in 0..4 {
        runner.restart_node(node);
    }
    for node in 0..4 {
        runner.submit_txn(node, vec![0x60 + node as u8]);
    }
    runner.run_until(Duration::from_secs(40));

    for node in 0..4 {
        let version = runner.node(node).committed_ledger_header().state_version();
        assert!(
            version > before,
            "node {node} stalled after the full restart"
        );
        let committed = runner.committed_payloads(node);
        for submitted in 0..4u8 {
            assert!(
                committed.contains(&vec![0x60 + submitted]),
                "node {node} missed the post-restart submission from {submitted}"
            );
        }
    }
    assert_prefix_consistent(&runner);
}
