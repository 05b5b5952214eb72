//! End-to-end lifecycle tests with stand-in shell workers.
//!
//! These drive the public API the way the daemon wires it together:
//! coordinator -> supervisor -> storage/gateway, with `/bin/sh` playing
//! the session worker role.

#![cfg(unix)]
#![allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use hivebot_daemon::gateway::EventGateway;
use hivebot_daemon::launch::{LaunchCoordinator, LaunchSpec};
use hivebot_daemon::quota::{QuotaConfig, QuotaEnforcer};
use hivebot_daemon::storage::Database;
use hivebot_daemon::supervisor::{
    FsSessionIndex, RestartPolicy, SubbotSupervisor, SupervisorConfig,
};

struct Harness {
    coordinator: LaunchCoordinator,
    supervisor: Arc<SubbotSupervisor>,
    db: Database,
    sessions_dir: std::path::PathBuf,
    _tmp: tempfile::TempDir,
}

/// Build the daemon component stack with `/bin/sh -c <script>` as the
/// worker binary.
async fn harness(script: &str, restart: RestartPolicy) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let sessions_dir = tmp.path().join("sessions");
    std::fs::create_dir_all(&sessions_dir).unwrap();

    let db = Database::open_in_memory().await.unwrap();
    let gateway = Arc::new(EventGateway::new());
    let supervisor = Arc::new(SubbotSupervisor::new(
        db.clone(),
        gateway,
        Arc::new(FsSessionIndex::new(sessions_dir.clone())),
        SupervisorConfig {
            worker_bin: "/bin/sh".into(),
            worker_args: vec!["-c".to_string(), script.to_string(), "worker".to_string()],
            sessions_dir: sessions_dir.clone(),
            restart,
            terminate_timeout: Duration::from_millis(500),
        },
    ));
    let coordinator = LaunchCoordinator::new(
        db.clone(),
        QuotaEnforcer::new(db.clone(), QuotaConfig::default()),
        Arc::clone(&supervisor),
        sessions_dir.clone(),
    );

    Harness {
        coordinator,
        supervisor,
        db,
        sessions_dir,
        _tmp: tmp,
    }
}

fn qr_spec() -> LaunchSpec {
    LaunchSpec {
        kind: "qr".to_string(),
        created_by: "u1".to_string(),
        requester_chat: "chat-1".to_string(),
        target_number: None,
        metadata: json!({"note": "integration"}),
    }
}

#[tokio::test]
async fn launch_event_delete_roundtrip() {
    let h = harness("sleep 30", RestartPolicy::default()).await;

    let row = h.coordinator.launch(qr_spec()).await.unwrap();
    assert_eq!(row.status, "launching");
    let code = row.code.clone();

    // The worker reports in through the external endpoint.
    let accepted = h
        .supervisor
        .register_external_event(
            &code,
            &row.event_token,
            "connected",
            &json!({"number": "5551234567"}),
        )
        .await
        .unwrap();
    assert!(accepted);

    let row = h.db.get_subbot(&code).await.unwrap().unwrap();
    assert_eq!(row.status, "connected");

    // Session library writes credentials; the listing now shows online.
    std::fs::write(h.sessions_dir.join(&code).join("creds.json"), b"{}").unwrap();
    let listed = h.supervisor.list_with_live_flag().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].1, "connected subbot with credentials should be online");

    // Delete tears everything down.
    assert!(h.supervisor.delete(&code).await.unwrap());
    assert!(h.db.get_subbot(&code).await.unwrap().is_none());
    assert!(!h.sessions_dir.join(&code).exists());

    // Second delete is a no-op.
    assert!(!h.supervisor.delete(&code).await.unwrap());
}

#[tokio::test]
async fn crashing_worker_exhausts_restart_budget() {
    let h = harness(
        "exit 1",
        RestartPolicy {
            max_restarts: 2,
            base: Duration::from_millis(50),
            ceiling: Duration::from_millis(150),
        },
    )
    .await;

    let row = h.coordinator.launch(qr_spec()).await.unwrap();
    let code = row.code.clone();

    // Initial run plus two respawns, each crashing immediately.
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let row = h.db.get_subbot(&code).await.unwrap().unwrap();
    assert_eq!(row.status, "stopped");
    assert!(h.supervisor.live_status(&code).await.is_none());

    let events = h.db.query_events(Some(&code), 0, 50).await.unwrap();
    let count = |name: &str| events.iter().filter(|e| e.event == name).count();

    assert_eq!(count("restart_scheduled"), 2, "one per allowed cycle");
    assert_eq!(count("launching"), 3, "initial launch plus two respawns");
    assert_eq!(count("stopped"), 3, "every exit is recorded");
}

#[tokio::test]
async fn deletion_cancels_scheduled_restart() {
    let h = harness(
        "exit 1",
        RestartPolicy {
            max_restarts: 5,
            base: Duration::from_secs(60),
            ceiling: Duration::from_secs(120),
        },
    )
    .await;

    let row = h.coordinator.launch(qr_spec()).await.unwrap();
    let code = row.code.clone();

    // Wait for the crash and the scheduled (distant) restart.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.supervisor.restart_count(&code).await, 1);

    assert!(h.supervisor.delete(&code).await.unwrap());
    assert!(h.db.get_subbot(&code).await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(h.supervisor.live_status(&code).await.is_none());

    // Exactly one launching event: the respawn never fired.
    let events = h.db.query_events(Some(&code), 0, 50).await.unwrap();
    assert_eq!(events.iter().filter(|e| e.event == "launching").count(), 1);
}
