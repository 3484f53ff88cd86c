//! End-to-end reconciliation between two peers.
//!
//! The same scenario runs twice: once by driving two sessions directly,
//! once by two nodes talking over the in-memory transport.

use std::collections::BTreeSet;
use std::time::Duration;

use proptest::prelude::*;

use txrecon::core::{ItemId, PeerId, PeerPair};
use txrecon::store::{ItemStore, MemoryStore};
use txrecon::sync::{MemoryNetwork, MemoryTransport, ReconciliationSession, SyncConfig};
use txrecon::{Node, NodeConfig, ReconciliationConfig, SketchKind, SyncMode};
use txrecon_testkit::{all_scenarios, set_pair, small_config, two_peer_scenario, Scenario};

type TestNode = Node<MemoryStore, MemoryTransport>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn peers() -> (PeerId, PeerId) {
    (PeerId::from_bytes([0x11; 32]), PeerId::from_bytes([0x22; 32]))
}

/// Run two sessions to completion without any transport.
fn reconcile_in_process(
    config: &ReconciliationConfig,
    a_items: Vec<ItemId>,
    b_items: Vec<ItemId>,
) -> (ReconciliationSession, ReconciliationSession) {
    let (p1, p2) = peers();
    let pair = PeerPair::new(p1, p2);
    let mut a = ReconciliationSession::new(pair, a_items, config);
    let mut b = ReconciliationSession::new(pair, b_items, config);

    loop {
        let request = a.digest().unwrap();
        b.mirror(a.round(), &request).unwrap();
        let response = b.digest().unwrap();
        let out_b = b.decode(&request).unwrap();
        let out_a = a.decode(&response).unwrap();
        assert_eq!(out_a.done, out_b.done);

        if out_a.done {
            if !out_a.fallback.is_empty() {
                let from_a = a.fallback_ids();
                let from_b = b.fallback_ids();
                a.absorb_fallback(&from_b).unwrap();
                b.absorb_fallback(&from_a).unwrap();
            }
            return (a, b);
        }
        a.advance().unwrap();
        b.advance().unwrap();
    }
}

async fn node_pair(config: NodeConfig, scenario: &Scenario) -> (TestNode, TestNode) {
    let network = MemoryNetwork::new();
    let (p1, p2) = peers();
    let mut nodes = Vec::new();
    for (id, items) in [(p1, scenario.a_items()), (p2, scenario.b_items())] {
        let transport = network.create_transport(id).await;
        let store = MemoryStore::from_config(&config.reconciliation);
        let node = Node::new(store, transport, config.clone()).unwrap();
        for item in items {
            node.add_item(item).await.unwrap();
        }
        nodes.push(node);
    }
    let b = nodes.pop().unwrap();
    let a = nodes.pop().unwrap();
    (a, b)
}

fn node_config(scenario: &Scenario, mode: SyncMode) -> NodeConfig {
    NodeConfig {
        reconciliation: scenario.config.clone(),
        sync: SyncConfig {
            message_timeout: Duration::from_secs(5),
            ..Default::default()
        },
        mode,
    }
}

async fn assert_converged(a: &TestNode, b: &TestNode) {
    // The responder finishes its side after the initiator returns.
    for _ in 0..50 {
        if a.digest().await.unwrap() == b.digest().await.unwrap() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let result = a
        .verify_convergence(b.len().await.unwrap(), &b.digest().await.unwrap())
        .await
        .unwrap();
    assert!(result.is_converged(), "{:?}", result);
}

#[test]
fn test_two_peer_scenario_in_process() {
    init_tracing();
    let scenario = two_peer_scenario();
    let (a, b) = reconcile_in_process(&scenario.config, scenario.a_items(), scenario.b_items());

    assert!(a.is_done() && b.is_done());
    assert!(a.round() < 3);
    assert_eq!(a.local_only(), scenario.only_a());
    assert_eq!(a.remote_only(), scenario.only_b());
    assert_eq!(b.local_only(), scenario.only_b());
    assert_eq!(b.remote_only(), scenario.only_a());
}

#[test]
fn test_all_scenarios_in_process() {
    for scenario in all_scenarios() {
        let (a, _) = reconcile_in_process(&scenario.config, scenario.a_items(), scenario.b_items());
        assert_eq!(a.local_only(), scenario.only_a(), "{}", scenario.name);
        assert_eq!(a.remote_only(), scenario.only_b(), "{}", scenario.name);
    }
}

#[tokio::test]
async fn test_two_peer_scenario_over_transport() {
    init_tracing();
    let scenario = two_peer_scenario();
    let (a, b) = node_pair(node_config(&scenario, SyncMode::Partitioned), &scenario).await;
    let server = b.spawn_responder();

    let report = a.reconcile_with(&b.peer_id()).await.unwrap();
    assert!(report.rounds <= 3);
    assert!(report.exhaustive);
    assert_eq!(report.local_only, scenario.only_a());
    assert_eq!(report.remote_only, scenario.only_b());
    assert_eq!(report.inserted, 10);

    assert_converged(&a, &b).await;
    assert_eq!(a.len().await.unwrap(), 100);
    server.abort();
}

#[tokio::test]
async fn test_all_scenarios_over_transport() {
    for scenario in all_scenarios() {
        let (a, b) = node_pair(node_config(&scenario, SyncMode::Partitioned), &scenario).await;
        let server = b.spawn_responder();
        a.reconcile_with(&b.peer_id()).await.unwrap();
        assert_converged(&a, &b).await;
        server.abort();
    }
}

#[tokio::test]
async fn test_single_sketch_modes_over_transport() {
    let base = two_peer_scenario();
    for kind in [SketchKind::Invertible, SketchKind::Iblt] {
        let scenario = Scenario {
            config: ReconciliationConfig {
                sketch_kind: kind,
                sketch_size: 32,
                ..base.config.clone()
            },
            ..base.clone()
        };
        let (a, b) = node_pair(node_config(&scenario, SyncMode::SingleSketch), &scenario).await;
        let server = b.spawn_responder();

        let report = a.reconcile_with(&b.peer_id()).await.unwrap();
        assert!(report.exhaustive, "{:?}", kind);
        assert_eq!(report.remote_only, scenario.only_b());
        assert_converged(&a, &b).await;
        server.abort();
    }
}

#[tokio::test]
async fn test_bloom_converges_over_repeated_sessions() {
    let base = two_peer_scenario();
    let scenario = Scenario {
        config: ReconciliationConfig {
            sketch_kind: SketchKind::Bloom,
            bloom_size: 2048,
            bloom_num_func: 3,
            ..base.config.clone()
        },
        ..base
    };
    let (a, b) = node_pair(node_config(&scenario, SyncMode::SingleSketch), &scenario).await;
    let server = b.spawn_responder();

    // Each session rotates the seed, so a false positive does not repeat.
    for _ in 0..4 {
        a.reconcile_with(&b.peer_id()).await.unwrap();
    }
    assert_converged(&a, &b).await;
    server.abort();
}

#[tokio::test]
async fn test_nodes_initiate_while_responding() {
    init_tracing();
    let scenario = Scenario {
        name: "one each way".into(),
        a: (1..=40).chain([77]).collect(),
        b: (1..=40).chain([42]).collect(),
        config: four_cell_config(),
    };
    let (a, b) = node_pair(node_config(&scenario, SyncMode::Partitioned), &scenario).await;
    let a_server = a.spawn_responder();
    let b_server = b.spawn_responder();

    // b has never seen a's clock, so a tick picks it.
    let reports = b.tick().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].0, a.peer_id());
    assert_eq!(reports[0].1.remote_only, vec![ItemId(77)]);
    assert!(b.store().contains(ItemId(77)).await.unwrap());
    assert_converged(&a, &b).await;

    let report = a.reconcile_with(&b.peer_id()).await.unwrap();
    assert!(report.exhaustive);
    assert!(report.local_only.is_empty() && report.remote_only.is_empty());

    a_server.abort();
    b_server.abort();
}

#[tokio::test]
async fn test_tickers_in_both_directions_converge() {
    let base = two_peer_scenario();
    let scenario = Scenario {
        config: ReconciliationConfig {
            recon_freq_ms: 50,
            ..base.config.clone()
        },
        ..base
    };
    let config = node_config(&scenario, SyncMode::Partitioned);
    let (a, b) = node_pair(config, &scenario).await;
    let (stop, shutdown) = tokio::sync::watch::channel(false);
    let handles = vec![
        a.spawn_responder(),
        b.spawn_responder(),
        a.spawn_ticker(shutdown.clone()),
        b.spawn_ticker(shutdown),
    ];

    for _ in 0..200 {
        if a.len().await.unwrap() == 100 && b.len().await.unwrap() == 100 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_converged(&a, &b).await;
    assert_eq!(a.len().await.unwrap(), 100);

    stop.send(true).unwrap();
    for handle in handles {
        handle.abort();
    }
}

#[tokio::test]
async fn test_single_sketch_overflow_is_not_fatal() {
    for kind in [SketchKind::Invertible, SketchKind::Iblt] {
        let scenario = Scenario {
            name: "overflow".into(),
            a: (1..=20).collect(),
            b: (1..=10).collect(),
            config: ReconciliationConfig {
                sketch_kind: kind,
                sketch_size: 4,
                ..Default::default()
            },
        };
        let (a, b) = node_pair(node_config(&scenario, SyncMode::SingleSketch), &scenario).await;
        let server = b.spawn_responder();

        let report = a.reconcile_with(&b.peer_id()).await.unwrap();
        if kind == SketchKind::Invertible {
            assert!(!report.exhaustive);
            assert!(report.local_only.is_empty() && report.remote_only.is_empty());
        }
        // Whatever was recovered is genuine.
        assert!(report.remote_only.is_empty(), "{:?}", kind);
        assert!(report.local_only.iter().all(|i| (11..=20).contains(&i.0)), "{:?}", kind);
        assert_eq!(a.len().await.unwrap(), 20);
        server.abort();
    }
}

fn four_cell_config() -> ReconciliationConfig {
    ReconciliationConfig {
        n_cells: 4,
        sketch_size: 4,
        growth_factor: 2,
        ..Default::default()
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_in_process_sessions_are_exact(pair in set_pair(80, 12), config in small_config()) {
        let (a, b) = reconcile_in_process(&config, pair.a_items(), pair.b_items());
        let only_a: Vec<ItemId> = pair.only_a.iter().copied().collect();
        let only_b: Vec<ItemId> = pair.only_b.iter().copied().collect();
        prop_assert_eq!(a.local_only(), only_a.clone());
        prop_assert_eq!(a.remote_only(), only_b.clone());
        prop_assert_eq!(b.remote_only(), only_a);

        let mut a_final: BTreeSet<ItemId> = pair.a_items().into_iter().collect();
        a_final.extend(a.remote_only());
        let mut b_final: BTreeSet<ItemId> = pair.b_items().into_iter().collect();
        b_final.extend(b.remote_only());
        prop_assert_eq!(a_final, b_final);
    }
}
