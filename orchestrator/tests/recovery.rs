//! Tests for startup recovery
//!
//! The launcher is mocked and so, mostly, is the process inspector; records
//! live in a real JSON state store so the final desired state can be read back.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use orchestrator::services::JsonStateStore;
use orchestrator::traits::{MockProcessInspector, MockWorkerLauncher};
use orchestrator::{FailureReason, RecoveryCoordinator, StateStore, WorkerOutcome};
use shared::{WorkerId, WorkerStatus};

mod common;
use common::TestFixtures;

fn store(dir: &TempDir) -> Arc<JsonStateStore> {
    Arc::new(JsonStateStore::new(dir.path().join("state")))
}

fn idle_inspector() -> MockProcessInspector {
    let mut inspector = MockProcessInspector::new();
    inspector.expect_command_line().returning(|_| None);
    inspector.expect_terminate().times(0);
    inspector
}

/// Launcher that succeeds only for the given ids, counting attempts per id
fn selective_launcher(healthy: &'static [u32], attempts: Arc<Mutex<Vec<WorkerId>>>) -> MockWorkerLauncher {
    let mut launcher = MockWorkerLauncher::new();
    launcher.expect_launch().returning(move |spec| {
        attempts.lock().unwrap().push(spec.id);
        if healthy.contains(&spec.id.as_u32()) {
            let mut outcome = WorkerOutcome::stopped(spec.id);
            outcome.status = WorkerStatus::Running;
            outcome.port = Some(8081 + spec.id.as_u32() as u16);
            outcome.pid = Some(10_000 + spec.id.as_u32());
            outcome
        } else {
            WorkerOutcome::failed(spec.id, FailureReason::ApiTimeout)
        }
    });
    launcher
}

/// Test every running record ends either running or stopped
#[tokio::test]
async fn test_recovery_converges() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    for id in 1..=4 {
        store
            .upsert_record(&TestFixtures::running_record(id, 8081 + id as u16, None))
            .await
            .unwrap();
    }
    store.upsert_record(&TestFixtures::stopped_record(5)).await.unwrap();

    let attempts = Arc::new(Mutex::new(Vec::new()));
    let launcher = selective_launcher(&[1, 3], Arc::clone(&attempts));
    let coordinator = RecoveryCoordinator::new(store.clone(), Arc::new(idle_inspector()))
        .with_retry_delay(Duration::from_millis(1));

    let report = coordinator.recover(&launcher, 2).await.unwrap();

    assert_eq!(report.found, 4);
    assert_eq!(report.recovered, 2);
    assert_eq!(report.reset, 2);

    // healthy workers are launched once, failing ones exhaust their retries
    let attempts = attempts.lock().unwrap().clone();
    assert_eq!(attempts.iter().filter(|id| **id == WorkerId(1)).count(), 1);
    assert_eq!(attempts.iter().filter(|id| **id == WorkerId(2)).count(), 2);
    assert!(!attempts.contains(&WorkerId(5)), "Stopped records are not launched");

    for id in [2, 4] {
        let record = store.get_record(WorkerId(id)).await.unwrap().unwrap();
        assert_eq!(record.status, WorkerStatus::Stopped);
        assert_eq!(record.port, None);
        assert_eq!(record.last_error.as_deref(), Some("api_timeout"));
    }

    let failed = report.details.iter().find(|d| d.worker_id == WorkerId(2)).unwrap();
    assert!(!failed.recovered);
    assert_eq!(failed.attempts, 2);
    assert_eq!(failed.reason, Some(FailureReason::ApiTimeout));
}

/// Test a leftover process is terminated only when it belongs to the worker
#[tokio::test]
async fn test_orphan_termination_checks_command_line() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    store
        .upsert_record(&TestFixtures::running_record(3, 8084, Some(31_000)))
        .await
        .unwrap();
    store
        .upsert_record(&TestFixtures::running_record(4, 8085, Some(41_000)))
        .await
        .unwrap();

    let mut inspector = MockProcessInspector::new();
    inspector.expect_command_line().returning(|pid| match pid {
        31_000 => Some("freqtrade trade --config data/configs/strategy_3.json".to_string()),
        41_000 => Some("/usr/bin/postgres -D /var/lib/postgres".to_string()),
        _ => None,
    });
    inspector
        .expect_terminate()
        .withf(|pid, _| *pid == 31_000)
        .times(1)
        .returning(|_, _| true);

    let launcher = selective_launcher(&[3, 4], Arc::new(Mutex::new(Vec::new())));
    let coordinator = RecoveryCoordinator::new(store.clone(), Arc::new(inspector));

    let report = coordinator.recover(&launcher, 1).await.unwrap();

    let orphan = report.details.iter().find(|d| d.worker_id == WorkerId(3)).unwrap();
    assert_eq!(orphan.orphan_terminated, Some(31_000));
    let reused = report.details.iter().find(|d| d.worker_id == WorkerId(4)).unwrap();
    assert_eq!(reused.orphan_terminated, None);
    assert_eq!(report.recovered, 2);
}

/// Test a real leftover worker process is found by its command line and killed
#[cfg(unix)]
#[tokio::test]
async fn test_live_orphan_is_terminated() {
    use orchestrator::services::SystemProcessInspector;
    use orchestrator::ProcessInspector;
    use std::process::Stdio;

    let dir = TempDir::new().unwrap();
    let config = dir.path().join("configs").join("strategy_3.json");
    // the shell stays the parent of `sleep`, so the config path stays in its argv
    let mut orphan = tokio::process::Command::new("sh")
        .arg("-c")
        .arg("sleep 300; true")
        .arg("fleet-worker")
        .arg("--config")
        .arg(&config)
        .stdout(Stdio::null())
        .process_group(0)
        .spawn()
        .unwrap();
    let orphan_pid = orphan.id().unwrap();
    let reaper = tokio::spawn(async move { orphan.wait().await });

    let store = store(&dir);
    store
        .upsert_record(&TestFixtures::running_record(3, 8084, Some(orphan_pid)))
        .await
        .unwrap();

    let inspector = Arc::new(SystemProcessInspector::new());
    assert!(inspector.command_line(orphan_pid).unwrap().contains("strategy_3.json"));

    let launcher = selective_launcher(&[3], Arc::new(Mutex::new(Vec::new())));
    let coordinator = RecoveryCoordinator::new(store.clone(), inspector)
        .with_orphan_grace(Duration::from_secs(2));

    let report = coordinator.recover(&launcher, 1).await.unwrap();

    let detail = report.details.iter().find(|d| d.worker_id == WorkerId(3)).unwrap();
    assert_eq!(detail.orphan_terminated, Some(orphan_pid));
    assert!(detail.recovered);
    let status = tokio::time::timeout(Duration::from_secs(5), reaper).await.unwrap().unwrap().unwrap();
    assert!(!status.success());

    let group = nix::unistd::Pid::from_raw(orphan_pid as i32);
    let _ = nix::sys::signal::killpg(group, nix::sys::signal::Signal::SIGKILL);
}

/// Test nothing is launched when no record claims running
#[tokio::test]
async fn test_recovery_with_nothing_to_do() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    store.upsert_record(&TestFixtures::stopped_record(1)).await.unwrap();

    let mut launcher = MockWorkerLauncher::new();
    launcher.expect_launch().times(0);
    let coordinator = RecoveryCoordinator::new(store, Arc::new(idle_inspector()));

    let report = coordinator.recover(&launcher, 3).await.unwrap();

    assert_eq!(report.found, 0);
    assert!(report.details.is_empty());
}

/// Test reset marks every running record stopped without launching
#[tokio::test]
async fn test_reset_all() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    for id in 1..=3 {
        store
            .upsert_record(&TestFixtures::running_record(id, 9000 + id as u16, Some(20_000 + id)))
            .await
            .unwrap();
    }

    let coordinator = RecoveryCoordinator::new(store.clone(), Arc::new(idle_inspector()));
    let reset = coordinator.reset_all().await.unwrap();

    assert_eq!(reset, 3);
    assert!(store.records_with_status(WorkerStatus::Running).await.unwrap().is_empty());
    let stopped = store.records_with_status(WorkerStatus::Stopped).await.unwrap();
    assert_eq!(stopped.len(), 3);
    assert!(stopped.iter().all(|r| r.pid.is_none() && r.stopped_at.is_some()));
}
