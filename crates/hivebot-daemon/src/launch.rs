//! Launch coordination.
//!
//! Validates launch requests, enforces quotas, allocates a collision-free
//! code, prepares the worker's private storage directory, persists the
//! initial record, and hands the spawn to the supervisor. Everything after
//! a successful spawn is reported asynchronously via events.

use std::path::PathBuf;
use std::sync::Arc;

use rand::RngExt;
use serde_json::{Value, json};
use tracing::{error, info};

use hivebot_core::db::unix_timestamp;

use crate::quota::QuotaEnforcer;
use crate::storage::{Database, NewSubbot, SubbotKind, SubbotRow, SubbotStatus};
use crate::supervisor::{LaunchContext, SubbotError, SubbotSupervisor};

/// Minimum digits a pairing target number must contain.
const MIN_TARGET_DIGITS: usize = 7;

/// Attempts at allocating an unused code before giving up.
const CODE_ALLOC_ATTEMPTS: u32 = 5;

/// A launch request as received from the API surface.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub kind: String,
    pub created_by: String,
    pub requester_chat: String,
    pub target_number: Option<String>,
    pub metadata: Value,
}

/// Coordinates validation, quota, persistence and spawn for new subbots.
pub struct LaunchCoordinator {
    db: Database,
    quota: QuotaEnforcer,
    supervisor: Arc<SubbotSupervisor>,
    sessions_dir: PathBuf,
}

impl LaunchCoordinator {
    pub const fn new(
        db: Database,
        quota: QuotaEnforcer,
        supervisor: Arc<SubbotSupervisor>,
        sessions_dir: PathBuf,
    ) -> Self {
        Self {
            db,
            quota,
            supervisor,
            sessions_dir,
        }
    }

    /// Launch a new subbot. Returns the freshly persisted record with
    /// status `launching`; later changes arrive via events only.
    pub async fn launch(&self, spec: LaunchSpec) -> Result<SubbotRow, SubbotError> {
        let kind = SubbotKind::parse(&spec.kind).ok_or_else(|| SubbotError::Validation {
            message: format!("Unknown subbot kind: {}", spec.kind),
        })?;

        let target_number = match kind {
            SubbotKind::PairingCode => Some(normalize_target_number(
                spec.target_number.as_deref().unwrap_or(""),
            )?),
            SubbotKind::Qr => None,
        };

        // Quota comes before any resource allocation.
        self.quota.check(&spec.created_by).await?;

        let code = self.allocate_code().await?;

        // The worker's private credential directory must exist before the
        // session library starts inside it.
        let storage_dir = self.sessions_dir.join(&code);
        std::fs::create_dir_all(&storage_dir).map_err(|e| SubbotError::SpawnFailed {
            reason: format!("Failed to create session storage: {e}"),
        })?;

        let event_token = uuid::Uuid::new_v4().to_string();
        let metadata = spec.metadata.to_string();

        self.db
            .create_subbot(NewSubbot {
                code: &code,
                kind,
                owner_id: &spec.created_by,
                requester_chat: &spec.requester_chat,
                target_number: target_number.as_deref(),
                metadata: &metadata,
                event_token: &event_token,
            })
            .await?;

        self.supervisor
            .record_event(&code, "launching", json!({ "kind": kind.as_str() }))
            .await;

        let ctx = LaunchContext {
            code: code.clone(),
            kind,
            storage_dir,
            target_number,
            metadata,
            event_token,
        };

        if let Err(e) = self.supervisor.spawn_worker(ctx, 0).await {
            error!(code, error = %e, "Worker spawn failed at launch");
            if let Err(db_err) = self.db.update_subbot_status(&code, SubbotStatus::Stopped).await {
                error!(code, error = %db_err, "Failed to mark failed launch as stopped");
            }
            return Err(e);
        }

        info!(
            code,
            owner = %spec.created_by,
            kind = kind.as_str(),
            "Subbot launched"
        );

        self.db
            .get_subbot(&code)
            .await?
            .ok_or(SubbotError::NotFound { code })
    }

    async fn allocate_code(&self) -> Result<String, SubbotError> {
        for _ in 0..CODE_ALLOC_ATTEMPTS {
            let code = generate_code();
            if self.db.get_subbot(&code).await?.is_none() {
                return Ok(code);
            }
        }
        Err(SubbotError::SpawnFailed {
            reason: "Could not allocate an unused subbot code".to_string(),
        })
    }
}

/// Reduce a pairing target to digits and check the minimum length.
fn normalize_target_number(raw: &str) -> Result<String, SubbotError> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < MIN_TARGET_DIGITS {
        return Err(SubbotError::Validation {
            message: format!("Target number must contain at least {MIN_TARGET_DIGITS} digits"),
        });
    }
    Ok(digits)
}

/// Subbot codes combine the launch timestamp with a random suffix.
fn generate_code() -> String {
    const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::rng();
    let suffix: String = (0..4)
        .map(|_| CHARS[rng.random_range(0..CHARS.len())] as char)
        .collect();
    format!("SB-{}{}", to_base36(unix_timestamp()), suffix)
}

fn to_base36(mut value: i64) -> String {
    const DIGITS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    if value <= 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::gateway::EventGateway;
    use crate::quota::QuotaConfig;
    use crate::storage::NewSubbot;
    use crate::supervisor::{FsSessionIndex, RestartPolicy, SupervisorConfig};
    use std::time::Duration;

    struct TestHarness {
        coordinator: LaunchCoordinator,
        db: Database,
        _tmp: tempfile::TempDir,
    }

    async fn harness(quota: QuotaConfig) -> TestHarness {
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
                worker_bin: "hivebot-worker-missing".into(),
                worker_args: vec![],
                sessions_dir: sessions_dir.clone(),
                restart: RestartPolicy::default(),
                terminate_timeout: Duration::from_millis(100),
            },
        ));
        let coordinator = LaunchCoordinator::new(
            db.clone(),
            QuotaEnforcer::new(db.clone(), quota),
            supervisor,
            sessions_dir,
        );

        TestHarness {
            coordinator,
            db,
            _tmp: tmp,
        }
    }

    fn qr_spec(owner: &str) -> LaunchSpec {
        LaunchSpec {
            kind: "qr".to_string(),
            created_by: owner.to_string(),
            requester_chat: "chat-1".to_string(),
            target_number: None,
            metadata: json!({}),
        }
    }

    async fn seed(db: &Database, code: &str, owner: &str) {
        db.create_subbot(NewSubbot {
            code,
            kind: SubbotKind::Qr,
            owner_id: owner,
            requester_chat: "chat-1",
            target_number: None,
            metadata: "{}",
            event_token: "token",
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn unknown_kind_rejected_without_persisting() {
        let h = harness(QuotaConfig::default()).await;
        let mut spec = qr_spec("u1");
        spec.kind = "sms".to_string();

        let err = h.coordinator.launch(spec).await.unwrap_err();
        assert!(matches!(err, SubbotError::Validation { .. }));
        assert_eq!(h.db.count_active().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn short_pairing_number_rejected() {
        let h = harness(QuotaConfig::default()).await;
        let spec = LaunchSpec {
            kind: "pairing-code".to_string(),
            created_by: "u1".to_string(),
            requester_chat: "chat-1".to_string(),
            target_number: Some("+1 (55) 5-12".to_string()),
            metadata: json!({}),
        };

        let err = h.coordinator.launch(spec).await.unwrap_err();
        assert!(matches!(err, SubbotError::Validation { .. }));
        assert_eq!(h.db.count_active().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_pairing_number_rejected() {
        let h = harness(QuotaConfig::default()).await;
        let spec = LaunchSpec {
            kind: "pairing-code".to_string(),
            created_by: "u1".to_string(),
            requester_chat: "chat-1".to_string(),
            target_number: None,
            metadata: json!({}),
        };

        let err = h.coordinator.launch(spec).await.unwrap_err();
        assert!(matches!(err, SubbotError::Validation { .. }));
    }

    #[tokio::test]
    async fn global_quota_rejected_before_any_record() {
        let h = harness(QuotaConfig {
            max_active: 0,
            max_per_owner: 5,
        })
        .await;

        let err = h.coordinator.launch(qr_spec("u1")).await.unwrap_err();
        assert!(matches!(
            err,
            SubbotError::QuotaExceeded { scope: "global", .. }
        ));
        assert_eq!(h.db.count_active().await.unwrap(), 0);
        assert!(h.db.query_events(None, 0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn owner_quota_rejected() {
        let h = harness(QuotaConfig {
            max_active: 50,
            max_per_owner: 1,
        })
        .await;
        seed(&h.db, "SB-OLD", "u1").await;

        let err = h.coordinator.launch(qr_spec("u1")).await.unwrap_err();
        assert!(matches!(
            err,
            SubbotError::QuotaExceeded { scope: "owner", .. }
        ));
    }

    #[tokio::test]
    async fn spawn_failure_marks_record_stopped() {
        // Worker binary does not exist in the harness, so the launch makes
        // it through validation and persistence, then fails the spawn.
        let h = harness(QuotaConfig::default()).await;

        let err = h.coordinator.launch(qr_spec("u1")).await.unwrap_err();
        assert!(matches!(err, SubbotError::SpawnFailed { .. }));

        let rows = h.db.list_subbots(&[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, "stopped");
        // The launching audit event was still appended.
        assert_eq!(h.db.count_events(&rows[0].code).await.unwrap(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn launch_returns_launching_record() {
        let mut h = harness(QuotaConfig::default()).await;
        // A worker that parks: spawn succeeds, launch() returns before the
        // process goes anywhere.
        h.coordinator.supervisor = Arc::new(SubbotSupervisor::new(
            h.db.clone(),
            Arc::new(EventGateway::new()),
            Arc::new(FsSessionIndex::new(h.coordinator.sessions_dir.clone())),
            SupervisorConfig {
                worker_bin: "/bin/sh".into(),
                worker_args: vec!["-c".to_string(), "sleep 30".to_string(), "worker".to_string()],
                sessions_dir: h.coordinator.sessions_dir.clone(),
                restart: RestartPolicy::default(),
                terminate_timeout: Duration::from_millis(100),
            },
        ));

        let row = h.coordinator.launch(qr_spec("u1")).await.unwrap();
        assert_eq!(row.status, "launching");
        assert!(row.code.starts_with("SB-"));
        assert!(h.coordinator.sessions_dir.join(&row.code).is_dir());
        assert!(!row.event_token.is_empty());

        // Tear the parked worker down.
        h.coordinator.supervisor.delete(&row.code).await.unwrap();
    }

    #[test]
    fn normalize_strips_formatting() {
        assert_eq!(
            normalize_target_number("+1 (555) 123-4567").unwrap(),
            "15551234567"
        );
        assert!(normalize_target_number("555-123").is_err());
        assert!(normalize_target_number("").is_err());
    }

    #[test]
    fn generated_codes_have_the_expected_shape() {
        let code = generate_code();
        assert!(code.starts_with("SB-"));
        assert!(code.len() > 7);
        assert!(
            code.chars()
                .skip(3)
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        );
    }

    #[test]
    fn base36_encodes_known_values() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "Z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(1_700_000_000), "S44WE8");
    }
}
