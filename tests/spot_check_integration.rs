//! Integration tests for spot checks.

#[allow(dead_code)]
mod common;

use common::*;
use edgeplane::spot_check::Verdict;
use edgeplane::storage::PersistentStore;
use std::collections::HashSet;

fn audited_fleet() -> TestCoordinator {
    let env = TestCoordinator::new();
    env.edge("e1", SHENZHEN, 1000);
    env.edge("e2", SHENZHEN, 1000);
    env.candidate("c1", SHENZHEN);
    env.candidate("c2", SHENZHEN);
    env.coordinator.elect().unwrap();
    env
}

#[tokio::test]
async fn test_validators_sample_distinct_groups() {
    let env = audited_fleet();
    env.store.record_cached_block("e1", &cid(1), 11).unwrap();
    env.store.record_cached_block("e2", &cid(2), 21).unwrap();
    env.rpc.answer("e1", 11, &cid(1));
    env.rpc.answer("e2", 21, &cid(2));

    let outcomes = env.coordinator.spot_check().await.unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.verdict == Verdict::Passed));

    let calls = env.rpc.verify_calls();
    assert_eq!(calls.len(), 2);
    let validators: HashSet<_> = calls.iter().map(|(v, _)| v.clone()).collect();
    assert_eq!(validators.len(), 2);
    let edges: HashSet<_> = calls
        .iter()
        .flat_map(|(_, challenges)| challenges.iter().map(|c| c.device_id.clone()))
        .collect();
    assert_eq!(edges, ["e1", "e2"].iter().map(|s| s.to_string()).collect());
}

#[tokio::test]
async fn test_verdicts() {
    let env = audited_fleet();
    env.store.record_cached_block("e1", &cid(1), 11).unwrap();
    env.store.record_cached_block("e2", &cid(2), 21).unwrap();
    env.rpc.answer("e1", 11, &cid(99));

    let outcomes = env.coordinator.spot_check().await.unwrap();
    let by_edge = |edge: &str| {
        outcomes
            .iter()
            .find(|o| o.edge == edge)
            .map(|o| o.verdict)
            .unwrap()
    };
    assert_eq!(by_edge("e1"), Verdict::Mismatch);
    assert_eq!(by_edge("e2"), Verdict::NoResponse);

    env.rpc.answer("e2", 21, "not-a-cid");
    let outcomes = env.coordinator.spot_check().await.unwrap();
    let e2 = outcomes.iter().find(|o| o.edge == "e2").unwrap();
    assert_eq!(e2.verdict, Verdict::Undecodable);
    assert_eq!(e2.expected, cid(2));
}

#[tokio::test]
async fn test_edges_without_blocks_are_skipped() {
    let env = audited_fleet();
    let outcomes = env.coordinator.spot_check().await.unwrap();
    assert!(outcomes.is_empty());
    assert!(env.rpc.verify_calls().is_empty());
}

#[tokio::test]
async fn test_replicated_blocks_are_audited() {
    let env = TestCoordinator::new();
    env.edge("e1", SHENZHEN, 1000);
    env.candidate("c1", SHENZHEN);
    env.candidate("c2", GUANGZHOU);
    env.coordinator.elect().unwrap();

    // First job lands on a candidate, the second on the edge.
    let root = cid(5);
    env.coordinator.cache_content(&root, 1).await.unwrap();
    let holder = env.rpc.device_for(&root).unwrap();
    env.report(&holder, edgeplane::CacheResultReport::ok(&root, 64)).await;
    env.coordinator.cache_content(&root, 2).await.unwrap();
    assert_eq!(env.rpc.device_for(&root).as_deref(), Some("e1"));
    env.report("e1", edgeplane::CacheResultReport::ok(&root, 64)).await;

    let fid = env.rpc.local_index_for(&root).unwrap();
    assert_eq!(env.store.cached_blocks("e1").unwrap().get(&root), Some(&fid));
    env.rpc.answer("e1", fid, &root);

    let outcomes = env.coordinator.spot_check().await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].verdict, Verdict::Passed);
    assert_eq!(outcomes[0].fid, fid);
}
