//! Integration tests for replication orchestration.

#[allow(dead_code)]
mod common;

use common::*;
use edgeplane::error::EdgeError;
use edgeplane::storage::{FastStore, PersistentStore};
use edgeplane::types::{CacheResultReport, CacheStatus};
use std::collections::HashSet;

#[tokio::test]
async fn test_three_block_content_completes() {
    let env = TestCoordinator::new();
    let first = env.edge("e1", SHENZHEN, 500);
    assert_eq!(env.edge("e2", SHENZHEN, 450), first);
    assert_ne!(env.edge("e3", SHENZHEN, 500), first);
    env.candidate("c1", SHENZHEN);
    env.candidate("c2", GUANGZHOU);
    env.candidate("c3", BEIJING);

    let mut totals: Vec<u64> = env
        .coordinator
        .grouping()
        .groups(SHENZHEN)
        .iter()
        .map(|g| g.total_bandwidth)
        .collect();
    totals.sort();
    assert_eq!(totals, vec![500, 950]);

    let (root, left, right) = (cid(0), cid(1), cid(2));
    let job_id = env.coordinator.cache_content(&root, 1).await.unwrap();
    assert_eq!(job_id, "cache_info_1");

    let holder = env.rpc.device_for(&root).expect("root dispatched");
    assert!(holder.starts_with('c'));
    let processed = env
        .report(
            &holder,
            CacheResultReport::ok(&root, 1000).with_links(vec![left.clone(), right.clone()], 1000),
        )
        .await;
    assert_eq!(processed, 2);

    let left_device = env.rpc.device_for(&left).expect("left dispatched");
    let right_device = env.rpc.device_for(&right).expect("right dispatched");

    env.report(&left_device, CacheResultReport::ok(&left, 600)).await;
    let summary = env.coordinator.job_summary(&root, None).await.unwrap();
    assert_eq!(summary.status, CacheStatus::Created);
    assert_eq!(summary.done_size, 1600);
    assert_eq!(summary.total_size, Some(2000));

    env.report(&right_device, CacheResultReport::ok(&right, 400)).await;
    let summary = env.coordinator.job_summary(&root, Some(&job_id)).await.unwrap();
    assert_eq!(summary.status, CacheStatus::Succeeded);
    assert_eq!(summary.done_size, 2000);
    assert_eq!(summary.blocks, 3);

    for device in [&holder, &left_device, &right_device] {
        assert!(env.store.task(device).unwrap().is_none());
    }
    let stats = env.coordinator.replication().stats();
    assert_eq!(stats.jobs_succeeded, 1);
    assert_eq!(stats.blocks_dispatched, 3);
}

#[tokio::test]
async fn test_repeated_report_is_ignored() {
    let env = TestCoordinator::new();
    env.candidate("c1", SHENZHEN);

    let (root, child) = (cid(10), cid(11));
    env.coordinator.cache_content(&root, 1).await.unwrap();

    let report = CacheResultReport::ok(&root, 1000).with_links(vec![child.clone()], 500);
    env.report("c1", report.clone()).await;
    assert_eq!(env.rpc.dispatch_count(), 2);

    env.report("c1", report).await;
    let summary = env.coordinator.job_summary(&root, None).await.unwrap();
    assert_eq!(summary.done_size, 1000);
    assert_eq!(summary.status, CacheStatus::Created);
    assert_eq!(env.rpc.dispatch_count(), 2);
}

#[tokio::test]
async fn test_cached_content_moves_to_edges() {
    let env = TestCoordinator::new();
    env.edge("e1", SHENZHEN, 500);
    env.candidate("c1", SHENZHEN);

    let root = cid(20);
    let first = env.coordinator.cache_content(&root, 1).await.unwrap();
    let again = env.coordinator.cache_content(&root, 1).await.unwrap();
    assert_eq!(first, again);
    assert_eq!(env.rpc.dispatch_count(), 1);
    assert_eq!(env.rpc.device_for(&root).as_deref(), Some("c1"));

    env.report("c1", CacheResultReport::ok(&root, 10)).await;

    let next = env.coordinator.cache_content(&root, 2).await.unwrap();
    assert_ne!(first, next);

    let (device, request) = env.rpc.dispatched().pop().unwrap();
    assert_eq!(device, "e1");
    assert_eq!(request.job_id, next);
    // The edge fetches from the candidate holding the block.
    assert_eq!(request.source_url.as_deref(), Some("http://10.0.0.1:3456"));
}

#[tokio::test]
async fn test_no_candidates_fails_job() {
    let env = TestCoordinator::new();
    env.edge("e1", SHENZHEN, 500);

    let root = cid(30);
    let result = env.coordinator.cache_content(&root, 1).await;
    assert!(matches!(result, Err(EdgeError::NodeNotFound(_))));

    let summary = env.coordinator.job_summary(&root, None).await.unwrap();
    assert_eq!(summary.status, CacheStatus::Failed);
    assert_eq!(summary.unassigned, 1);
    assert_eq!(env.rpc.dispatch_count(), 0);
}

#[tokio::test]
async fn test_nodes_outside_area_are_not_used() {
    let env = TestCoordinator::new();
    env.candidate("far", "europe-germany-bavaria-munich");

    let result = env.coordinator.cache_content(&cid(40), 1).await;
    assert!(matches!(result, Err(EdgeError::NodeNotFound(_))));
}

#[test]
fn test_find_node_without_candidates() {
    let env = TestCoordinator::new();
    env.edge("e1", SHENZHEN, 500);

    let result = env
        .coordinator
        .replication()
        .find_node(TEST_AREA, false, &HashSet::new());
    assert!(matches!(result, Err(EdgeError::NodeNotFound(_))));
}

#[test]
fn test_find_node_honours_area_and_exclusion() {
    let env = TestCoordinator::new();
    env.edge("e1", SHENZHEN, 500);
    env.edge("e2", GUANGZHOU, 500);
    env.edge("e3", BEIJING, 500);
    env.edge("far", "europe-germany-bavaria-munich", 500);

    let exclude: HashSet<String> = ["e1", "e3"].iter().map(|s| s.to_string()).collect();
    for _ in 0..20 {
        let node = env
            .coordinator
            .replication()
            .find_node(TEST_AREA, true, &exclude)
            .unwrap();
        assert_eq!(node.device_id, "e2");
    }

    let node = env
        .coordinator
        .replication()
        .find_node("asia-china-guangdong", true, &HashSet::new())
        .unwrap();
    assert!(node.device_id == "e1" || node.device_id == "e2");

    let everyone: HashSet<String> = ["e1", "e2", "e3"].iter().map(|s| s.to_string()).collect();
    let result = env
        .coordinator
        .replication()
        .find_node(TEST_AREA, true, &everyone);
    assert!(matches!(result, Err(EdgeError::NodeNotFound(_))));
}

#[tokio::test]
async fn test_busy_node_is_not_reassigned() {
    let env = TestCoordinator::new();
    env.candidate("c1", SHENZHEN);

    env.coordinator.cache_content(&cid(50), 1).await.unwrap();
    let result = env.coordinator.cache_content(&cid(51), 1).await;
    match result {
        Err(EdgeError::AssignmentConflict { device_id, job_id, .. }) => {
            assert_eq!(device_id, "c1");
            assert_eq!(job_id, "cache_info_1");
        }
        other => panic!("expected assignment conflict, got {:?}", other),
    }
}

#[tokio::test]
async fn test_dispatch_failure_unassigns_block() {
    let env = TestCoordinator::new();
    env.candidate("c1", SHENZHEN);
    env.rpc.fail_device("c1");

    let root = cid(60);
    let result = env.coordinator.cache_content(&root, 1).await;
    assert!(matches!(result, Err(EdgeError::DispatchFailure { .. })));

    let summary = env.coordinator.job_summary(&root, None).await.unwrap();
    assert_eq!(summary.status, CacheStatus::Failed);
    assert_eq!(summary.unassigned, 1);
    assert!(env.store.task("c1").unwrap().is_none());

    env.rpc.heal_device("c1");
    let retry = env.coordinator.cache_content(&root, 1).await.unwrap();
    assert_ne!(retry, summary.job_id);
    assert_eq!(env.rpc.device_for(&root).as_deref(), Some("c1"));
}

/// Cache `block` as standalone content on `device`, leaving it as the block's holder.
async fn seed_holder(env: &TestCoordinator, block: &str, device: &str, size: u64) {
    env.coordinator.cache_content(block, 1).await.unwrap();
    env.report(device, CacheResultReport::ok(block, size)).await;
    let summary = env.coordinator.job_summary(block, None).await.unwrap();
    assert_eq!(summary.status, CacheStatus::Succeeded);
}

#[tokio::test]
async fn test_unassigned_block_is_retried() {
    let env = TestCoordinator::new();
    env.candidate("c1", SHENZHEN);

    let (root, held, fresh) = (cid(70), cid(71), cid(72));
    seed_holder(&env, &held, "c1", 600).await;

    env.coordinator.cache_content(&root, 1).await.unwrap();
    env.report(
        "c1",
        CacheResultReport::ok(&root, 1000).with_links(vec![held.clone(), fresh.clone()], 1000),
    )
    .await;

    // c1 already holds `held`, so nobody can take it yet.
    let summary = env.coordinator.job_summary(&root, None).await.unwrap();
    assert_eq!(summary.status, CacheStatus::Created);
    assert_eq!(summary.unassigned, 1);
    assert_eq!(env.rpc.device_for(&fresh).as_deref(), Some("c1"));

    env.candidate("c2", GUANGZHOU);
    let processed = env.report("c1", CacheResultReport::ok(&fresh, 400)).await;
    assert_eq!(processed, 2);
    assert_eq!(env.rpc.device_for(&held).as_deref(), Some("c2"));

    env.report("c2", CacheResultReport::ok(&held, 600)).await;
    let summary = env.coordinator.job_summary(&root, None).await.unwrap();
    assert_eq!(summary.status, CacheStatus::Succeeded);
    assert_eq!(summary.done_size, 2000);
    assert_eq!(summary.unassigned, 0);
}

#[tokio::test]
async fn test_unplaceable_block_fails_job() {
    let env = TestCoordinator::new();
    env.candidate("c1", SHENZHEN);

    let (root, held) = (cid(80), cid(81));
    seed_holder(&env, &held, "c1", 600).await;

    env.coordinator.cache_content(&root, 1).await.unwrap();
    env.report(
        "c1",
        CacheResultReport::ok(&root, 1000).with_links(vec![held.clone()], 600),
    )
    .await;

    let summary = env.coordinator.job_summary(&root, None).await.unwrap();
    assert_eq!(summary.status, CacheStatus::Failed);
    assert_eq!(summary.done_size, 1000);
    assert!(env.store.task("c1").unwrap().is_none());
}

#[tokio::test]
async fn test_failed_report_fails_job() {
    let env = TestCoordinator::new();
    env.candidate("c1", SHENZHEN);

    let root = cid(90);
    env.coordinator.cache_content(&root, 1).await.unwrap();
    env.report("c1", CacheResultReport::failed(&root, "fetch timed out")).await;

    let summary = env.coordinator.job_summary(&root, None).await.unwrap();
    assert_eq!(summary.status, CacheStatus::Failed);
    assert_eq!(env.coordinator.replication().stats().jobs_failed, 1);
}

#[tokio::test]
async fn test_reports_for_other_jobs_are_ignored() {
    let env = TestCoordinator::new();
    env.candidate("c1", SHENZHEN);
    env.candidate("c2", SHENZHEN);

    let root = cid(100);
    env.coordinator.cache_content(&root, 1).await.unwrap();
    let holder = env.rpc.device_for(&root).unwrap();
    let other = if holder == "c1" { "c2" } else { "c1" };

    // No task on this device.
    env.report(other, CacheResultReport::ok(&root, 10)).await;

    let mut stale = CacheResultReport::ok(&root, 10);
    stale.job_id = Some("cache_info_999".to_string());
    env.report(&holder, stale).await;

    let summary = env.coordinator.job_summary(&root, None).await.unwrap();
    assert_eq!(summary.status, CacheStatus::Created);
    assert_eq!(summary.done_size, 0);
}

#[tokio::test]
async fn test_processor_drains_on_wake() {
    let env = TestCoordinator::new();
    env.candidate("c1", SHENZHEN);
    let shutdown = edgeplane::shutdown::ShutdownCoordinator::new();
    let handle = env
        .coordinator
        .replication()
        .start(shutdown.clone())
        .expect("processor starts once");
    assert!(env.coordinator.replication().start(shutdown.clone()).is_none());

    let root = cid(110);
    env.coordinator.cache_content(&root, 1).await.unwrap();
    env.coordinator.cache_result("c1", CacheResultReport::ok(&root, 42));

    let mut finished = false;
    for _ in 0..100 {
        let summary = env.coordinator.job_summary(&root, None).await.unwrap();
        if summary.status == CacheStatus::Succeeded {
            finished = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(finished);
    assert_eq!(env.coordinator.replication().pending(), 0);

    shutdown.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_offline_node_blocks_are_placed_elsewhere() {
    let env = TestCoordinator::new();
    env.candidate("c1", SHENZHEN);

    let root = cid(120);
    let job_id = env.coordinator.cache_content(&root, 1).await.unwrap();
    assert_eq!(env.rpc.device_for(&root).as_deref(), Some("c1"));

    env.coordinator.node_offline("c1").unwrap();
    env.candidate("c2", GUANGZHOU);
    env.coordinator.replication().drain().await;
    assert_eq!(env.rpc.device_for(&root).as_deref(), Some("c2"));
    assert_eq!(env.store.task("c2").unwrap().map(|t| t.job_id), Some(job_id.clone()));

    // A late report from the lost node no longer counts.
    env.candidate("c1", SHENZHEN);
    env.report("c1", CacheResultReport::ok(&root, 100)).await;
    let summary = env.coordinator.job_summary(&root, None).await.unwrap();
    assert_eq!(summary.status, CacheStatus::Created);
    assert_eq!(summary.done_size, 0);

    env.report("c2", CacheResultReport::ok(&root, 100)).await;
    let summary = env.coordinator.job_summary(&root, None).await.unwrap();
    assert_eq!(summary.job_id, job_id);
    assert_eq!(summary.status, CacheStatus::Succeeded);
    assert_eq!(summary.done_size, 100);
}

#[tokio::test]
async fn test_offline_node_without_replacement_fails_job() {
    let env = TestCoordinator::new();
    env.candidate("c1", SHENZHEN);

    let root = cid(121);
    let first = env.coordinator.cache_content(&root, 1).await.unwrap();
    env.coordinator.node_offline("c1").unwrap();
    env.coordinator.replication().drain().await;

    let summary = env.coordinator.job_summary(&root, None).await.unwrap();
    assert_eq!(summary.status, CacheStatus::Failed);
    assert_eq!(summary.unassigned, 1);

    env.candidate("c1", SHENZHEN);
    let second = env.coordinator.cache_content(&root, 1).await.unwrap();
    assert_ne!(first, second);
    assert_eq!(env.rpc.device_for(&root).as_deref(), Some("c1"));
    assert_eq!(env.store.task("c1").unwrap().map(|t| t.job_id), Some(second));
}

#[tokio::test]
async fn test_evicted_content_keeps_local_index() {
    let mut config = edgeplane::config::EdgeplaneConfig::development();
    config.coordinator.area = TEST_AREA.to_string();
    config.replication.content_cache_capacity = 1;
    let env = TestCoordinator::with_config(config);
    env.candidate("c1", SHENZHEN);

    let (first, second) = (cid(130), cid(131));
    env.coordinator.cache_content(&first, 1).await.unwrap();
    let fid = env.rpc.local_index_for(&first).unwrap();

    // c1 is busy, but the second item still pushes the first out of memory.
    assert!(env.coordinator.cache_content(&second, 1).await.is_err());

    let report = CacheResultReport::ok(&first, 256);
    assert!(report.fid.is_none());
    env.report("c1", report).await;

    let summary = env.coordinator.job_summary(&first, None).await.unwrap();
    assert_eq!(summary.status, CacheStatus::Succeeded);
    assert_eq!(env.store.cached_blocks("c1").unwrap().get(&first), Some(&fid));
}
