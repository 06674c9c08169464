//! Integration tests for the fleet orchestrator
//!
//! Workers are real `sleep` processes; only the HTTP readiness probe is
//! mocked. Every test owns its port range so suites can run side by side.

use orchestrator::services::SystemProcessInspector;
use orchestrator::{FailureReason, HealthStatus, ProcessInspector, StateStore};
use shared::{RouteTable, WorkerId, WorkerStatus};
use std::time::Duration;

mod common;
use common::{OrchestratorBuilder, TestFixtures, TestHelpers};

/// Test a started worker is recorded running, routed and monitored
#[tokio::test]
async fn test_start_and_stop_track_desired_state() {
    // Arrange
    let fleet = OrchestratorBuilder::new(42000).build();
    let id = TestFixtures::worker_id();

    // Act
    let outcome = fleet.orchestrator.start_worker(TestFixtures::spec(TestFixtures::WORKER_ID)).await;

    // Assert
    assert!(outcome.is_running());
    assert_eq!(outcome.port, Some(42007));

    let record = fleet.store.get_record(id).await.unwrap().unwrap();
    assert_eq!(record.status, WorkerStatus::Running);
    assert_eq!(record.port, Some(42007));
    assert_eq!(record.pid, outcome.pid);
    assert!(fleet.orchestrator.monitor().is_registered(id).await);

    let routes = RouteTable::load(&fleet.orchestrator.settings().routes_path()).await.unwrap();
    assert_eq!(routes.get(id).and_then(|e| e.port()), Some(42007));

    // Act
    let stopped = fleet.orchestrator.stop_worker(id).await;

    // Assert
    assert_eq!(stopped.status, WorkerStatus::Stopped);
    let record = fleet.store.get_record(id).await.unwrap().unwrap();
    assert_eq!(record.status, WorkerStatus::Stopped);
    assert_eq!(record.port, None);
    assert!(record.stopped_at.is_some());
    assert!(!fleet.orchestrator.monitor().is_registered(id).await);
    assert_eq!(fleet.orchestrator.capacity_info().await.running_workers, 0);
}

/// Test a worker that never becomes ready is recorded with its failure category
#[tokio::test]
async fn test_failed_start_records_reason() {
    let fleet = OrchestratorBuilder::new(42050).with_ready_workers(false).build();

    let outcome = fleet.orchestrator.start_worker(TestFixtures::spec(3)).await;

    assert_eq!(outcome.status, WorkerStatus::Error);
    assert_eq!(outcome.reason, Some(FailureReason::ApiTimeout));

    let record = fleet.store.get_record(WorkerId(3)).await.unwrap().unwrap();
    assert_eq!(record.status, WorkerStatus::Error);
    assert_eq!(record.last_error.as_deref(), Some("api_timeout"));
    assert_eq!(record.pid, None);
    assert_eq!(fleet.orchestrator.port_pool_status().await.allocated, 0);
    assert!(!fleet.orchestrator.monitor().is_registered(WorkerId(3)).await);
}

/// Test the capacity ceiling surfaces as a capacity error
#[tokio::test]
async fn test_capacity_error_outcome() {
    let fleet = OrchestratorBuilder::new(42100).with_max_workers(1).build();

    assert!(fleet.orchestrator.start_worker(TestFixtures::spec(1)).await.is_running());
    let rejected = fleet.orchestrator.start_worker(TestFixtures::spec(2)).await;

    assert_eq!(rejected.reason, Some(FailureReason::CapacityError));
    let capacity = fleet.orchestrator.capacity_info().await;
    assert_eq!(capacity.running_workers, 1);
    assert!(!capacity.can_start_more);

    fleet.orchestrator.shutdown().await;
}

/// Test recovery brings back every worker recorded as running
#[tokio::test]
async fn test_recover_restarts_running_records() {
    let fleet = OrchestratorBuilder::new(42150).build();
    for id in [1, 2] {
        fleet
            .store
            .upsert_record(&TestFixtures::running_record(id, 42150 + id as u16, None))
            .await
            .unwrap();
    }

    let report = fleet.orchestrator.recover().await.unwrap();

    assert_eq!(report.found, 2);
    assert_eq!(report.recovered, 2);
    for id in [WorkerId(1), WorkerId(2)] {
        let record = fleet.store.get_record(id).await.unwrap().unwrap();
        assert_eq!(record.status, WorkerStatus::Running);
        assert!(record.pid.is_some());
        assert!(fleet.orchestrator.manager().is_running(id).await);
    }

    fleet.orchestrator.shutdown().await;
    assert!(fleet.orchestrator.manager().worker_ids().await.is_empty());
}

/// Test disabling auto-recovery resets running records instead
#[tokio::test]
async fn test_recover_disabled_resets_records() {
    let fleet = OrchestratorBuilder::new(42200).with_auto_recover(false).build();
    fleet
        .store
        .upsert_record(&TestFixtures::running_record(4, 42204, Some(123_456)))
        .await
        .unwrap();

    let report = fleet.orchestrator.recover().await.unwrap();

    assert_eq!(report.found, 1);
    assert_eq!(report.reset, 1);
    assert_eq!(report.recovered, 0);
    let record = fleet.store.get_record(WorkerId(4)).await.unwrap().unwrap();
    assert_eq!(record.status, WorkerStatus::Stopped);
    assert!(fleet.orchestrator.manager().worker_ids().await.is_empty());
}

/// Test a worker that died behind the orchestrator's back can be restarted in place
#[tokio::test]
async fn test_restart_replaces_dead_worker() {
    let fleet = OrchestratorBuilder::new(42250).build();
    let id = WorkerId(5);

    let first = fleet.orchestrator.start_worker(TestFixtures::spec(5)).await;
    let old_pid = first.pid.unwrap();

    let inspector = SystemProcessInspector::new();
    inspector.terminate(old_pid, Duration::from_millis(200)).await;
    let status = TestHelpers::wait_for_health(&fleet.orchestrator, id, HealthStatus::ProcessDead).await;
    assert_eq!(status, HealthStatus::ProcessDead);

    let restarted = fleet.orchestrator.restart_worker(id).await;

    assert!(restarted.is_running());
    assert_ne!(restarted.pid, Some(old_pid));
    assert_eq!(restarted.port, first.port);
    let record = fleet.store.get_record(id).await.unwrap().unwrap();
    assert_eq!(record.status, WorkerStatus::Running);
    assert_eq!(record.pid, restarted.pid);
    assert!(fleet.orchestrator.monitor().is_registered(id).await);

    fleet.orchestrator.shutdown().await;
}

/// Test the run loop exits on the shutdown signal and stops every worker
#[tokio::test]
async fn test_run_until_shutdown() {
    let fleet = OrchestratorBuilder::new(42300).build();
    assert!(fleet.orchestrator.start_worker(TestFixtures::spec(9)).await.is_running());

    let sender = fleet.orchestrator.get_shutdown_sender();
    sender.send(()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), fleet.orchestrator.run())
        .await
        .expect("run loop should exit on shutdown")
        .unwrap();

    assert!(fleet.orchestrator.manager().worker_ids().await.is_empty());
    // desired state survives a control-plane shutdown
    let record = fleet.store.get_record(WorkerId(9)).await.unwrap().unwrap();
    assert_eq!(record.status, WorkerStatus::Running);
    assert_eq!(TestHelpers::titles(&fleet.notifications), Vec::<String>::new());
}
