//! Tests for JsonStateStore
//!
//! Each test works in its own temporary directory.

use chrono::{Duration as ChronoDuration, Utc};
use tempfile::TempDir;

use shared::{DesiredStateRecord, WorkerId, WorkerSpec, WorkerStatus};

use crate::core::heartbeat::{HeartbeatPolicy, HeartbeatRecord, RestartRecord};
use crate::services::state_store::JsonStateStore;
use crate::traits::StateStore;

fn heartbeat_row(worker_id: u32, pid: u32) -> HeartbeatRecord {
    HeartbeatRecord {
        worker_id: WorkerId(worker_id),
        heartbeat_time: Some(Utc::now()),
        pid: Some(pid),
        version: Some("2024.1".to_string()),
        state: Some("RUNNING".to_string()),
        is_timeout: false,
        time_since_last_secs: Some(0),
        recorded_at: Utc::now(),
    }
}

/// Test records survive a fresh store instance and filter by status
#[tokio::test]
async fn test_records_round_trip_and_filter() {
    let dir = TempDir::new().unwrap();
    let store = JsonStateStore::new(dir.path());

    let mut running = DesiredStateRecord::new(WorkerSpec::new(1, "A"));
    running.mark_running(8082, Some(4242), Utc::now());
    let stopped = DesiredStateRecord::new(WorkerSpec::new(2, "B"));

    store.upsert_record(&running).await.unwrap();
    store.upsert_record(&stopped).await.unwrap();

    let reopened = JsonStateStore::new(dir.path());
    assert_eq!(reopened.get_record(WorkerId(1)).await.unwrap(), Some(running.clone()));
    assert!(reopened.get_record(WorkerId(3)).await.unwrap().is_none());

    let live = reopened.records_with_status(WorkerStatus::Running).await.unwrap();
    assert_eq!(live, vec![running]);
}

/// Test upsert replaces an existing record instead of duplicating it
#[tokio::test]
async fn test_upsert_replaces() {
    let dir = TempDir::new().unwrap();
    let store = JsonStateStore::new(dir.path());

    let mut record = DesiredStateRecord::new(WorkerSpec::new(5, "A"));
    record.mark_running(8086, Some(1), Utc::now());
    store.upsert_record(&record).await.unwrap();

    record.mark_stopped(Utc::now());
    store.upsert_record(&record).await.unwrap();

    let stored = store.get_record(WorkerId(5)).await.unwrap().unwrap();
    assert_eq!(stored.status, WorkerStatus::Stopped);
    assert!(stored.port.is_none());
    assert!(store.records_with_status(WorkerStatus::Running).await.unwrap().is_empty());
}

/// Test a record whose spec belongs to another worker is rejected
#[tokio::test]
async fn test_mismatched_record_rejected() {
    let dir = TempDir::new().unwrap();
    let store = JsonStateStore::new(dir.path());

    let mut record = DesiredStateRecord::new(WorkerSpec::new(1, "A"));
    record.worker_id = WorkerId(2);

    assert!(store.upsert_record(&record).await.is_err());
}

/// Test concurrent upserts of different workers are all kept
#[tokio::test]
async fn test_concurrent_upserts_are_serialised() {
    let dir = TempDir::new().unwrap();
    let store = JsonStateStore::new(dir.path());

    let records: Vec<DesiredStateRecord> = (1..=20)
        .map(|id| DesiredStateRecord::new(WorkerSpec::new(id, "S")))
        .collect();
    let writes = records.iter().map(|r| store.upsert_record(r));
    for result in futures_util::future::join_all(writes).await {
        result.unwrap();
    }

    for id in 1..=20 {
        assert!(store.get_record(WorkerId(id)).await.unwrap().is_some());
    }
}

/// Test policies are stored per worker
#[tokio::test]
async fn test_policy_persistence() {
    let dir = TempDir::new().unwrap();
    let store = JsonStateStore::new(dir.path());

    assert!(store.load_policy(WorkerId(4)).await.unwrap().is_none());

    let mut policy = HeartbeatPolicy::for_worker(WorkerId(4), &HeartbeatPolicy::default());
    policy.timeout_secs = 120;
    store.save_policy(&policy).await.unwrap();

    assert_eq!(store.load_policy(WorkerId(4)).await.unwrap(), Some(policy));
}

/// Test history is returned newest first, per worker, capped by the limit
#[tokio::test]
async fn test_history_newest_first_with_limit() {
    let dir = TempDir::new().unwrap();
    let store = JsonStateStore::new(dir.path());

    for pid in 1..=5 {
        store.append_heartbeat(&heartbeat_row(1, pid)).await.unwrap();
        store.append_heartbeat(&heartbeat_row(2, pid + 100)).await.unwrap();
    }

    let rows = store.heartbeat_history(WorkerId(1), 3).await.unwrap();
    let pids: Vec<Option<u32>> = rows.iter().map(|r| r.pid).collect();
    assert_eq!(pids, vec![Some(5), Some(4), Some(3)]);
    assert!(rows.iter().all(|r| r.worker_id == WorkerId(1)));

    assert!(store.heartbeat_history(WorkerId(9), 10).await.unwrap().is_empty());
}

/// Test restart history is independent of heartbeat history
#[tokio::test]
async fn test_restart_history() {
    let dir = TempDir::new().unwrap();
    let store = JsonStateStore::new(dir.path());
    let now = Utc::now();

    for (offset, success) in [(0, false), (60, true)] {
        store
            .append_restart(&RestartRecord {
                worker_id: WorkerId(3),
                reason: "heartbeat_timeout".to_string(),
                restart_time: now + ChronoDuration::seconds(offset),
                success,
                error_message: (!success).then(|| "boom".to_string()),
                previous_pid: Some(10),
                new_pid: success.then_some(11),
            })
            .await
            .unwrap();
    }

    let rows = store.restart_history(WorkerId(3), 10).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows[0].success, "Newest row first");
    assert_eq!(rows[1].error_message.as_deref(), Some("boom"));
    assert!(store.heartbeat_history(WorkerId(3), 10).await.unwrap().is_empty());
}

/// Test an unreadable history line is skipped rather than failing the query
#[tokio::test]
async fn test_corrupt_history_line_skipped() {
    let dir = TempDir::new().unwrap();
    let store = JsonStateStore::new(dir.path());

    store.append_heartbeat(&heartbeat_row(1, 1)).await.unwrap();
    let path = dir.path().join("heartbeat_history.jsonl");
    let mut raw = tokio::fs::read_to_string(&path).await.unwrap();
    raw.push_str("{not json\n");
    tokio::fs::write(&path, raw).await.unwrap();
    store.append_heartbeat(&heartbeat_row(1, 2)).await.unwrap();

    let rows = store.heartbeat_history(WorkerId(1), 10).await.unwrap();
    assert_eq!(rows.len(), 2);
}
