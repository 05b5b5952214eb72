//! Subbot worker lifecycle supervisor.
//!
//! [`SubbotSupervisor`] owns the live worker registry:
//! - spawns one isolated session worker process per subbot
//! - relays worker NDJSON events into status patches, the append-only
//!   event log, and the broadcast gateway
//! - monitors worker exit and schedules backoff respawns
//! - tears workers down on deletion (SIGTERM, then SIGKILL after a grace
//!   period)

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::RwLock;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use hivebot_core::db::unix_timestamp;
use hivebot_core::wire::{self, WorkerEvent};

use crate::gateway::{EventGateway, SubbotEvent};
use crate::storage::{Database, DatabaseError, SubbotKind, SubbotRow, SubbotStatus};

use super::restart::RestartPolicy;
use super::session_index::SessionIndex;

/// Environment variable carrying the subbot's event token into the worker.
pub const EVENT_TOKEN_ENV: &str = "HIVEBOT_EVENT_TOKEN";

/// Everything a worker needs to start a session. Workers inherit no
/// ambient state beyond this context plus `PATH` and `HOME`.
#[derive(Debug, Clone)]
pub struct LaunchContext {
    pub code: String,
    pub kind: SubbotKind,
    pub storage_dir: PathBuf,
    pub target_number: Option<String>,
    pub metadata: String,
    pub event_token: String,
}

impl LaunchContext {
    /// Rebuild the context for a respawn from the persisted record.
    fn from_row(row: &SubbotRow, sessions_dir: &Path) -> Option<Self> {
        let kind = SubbotKind::parse(&row.kind)?;
        Some(Self {
            code: row.code.clone(),
            kind,
            storage_dir: sessions_dir.join(&row.code),
            target_number: row.target_number.clone(),
            metadata: row.metadata.clone(),
            event_token: row.event_token.clone(),
        })
    }
}

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Path to the session worker binary.
    pub worker_bin: PathBuf,
    /// Extra arguments passed to the worker before the launch context.
    pub worker_args: Vec<String>,
    /// Base directory holding one private storage dir per subbot.
    pub sessions_dir: PathBuf,
    /// Restart budget and backoff parameters.
    pub restart: RestartPolicy,
    /// Grace period between SIGTERM and SIGKILL on deletion.
    pub terminate_timeout: Duration,
}

/// Live worker bookkeeping. In-memory only; at most one per code.
struct WorkerHandle {
    pid: Option<u32>,
    status: SubbotStatus,
    last_event: Option<String>,
    last_seen: i64,
    restart_count: u32,
    delete_requested: bool,
}

/// Errors from subbot lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum SubbotError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Subbot quota exceeded ({scope}: {current}/{max})")]
    QuotaExceeded {
        scope: &'static str,
        current: u32,
        max: u32,
    },

    #[error("Subbot not found: {code}")]
    NotFound { code: String },

    #[error("Event token mismatch for subbot: {code}")]
    Unauthorized { code: String },

    #[error("Failed to spawn worker: {reason}")]
    SpawnFailed { reason: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Supervisor for subbot session worker processes.
pub struct SubbotSupervisor {
    db: Database,
    gateway: Arc<EventGateway>,
    session_index: Arc<dyn SessionIndex>,
    config: SupervisorConfig,
    /// Live workers keyed by subbot code.
    workers: Arc<RwLock<HashMap<String, WorkerHandle>>>,
    /// Pending respawn timers keyed by subbot code.
    restart_timers: Arc<RwLock<HashMap<String, AbortHandle>>>,
}

impl SubbotSupervisor {
    /// Create a new supervisor backed by the given database and gateway.
    pub fn new(
        db: Database,
        gateway: Arc<EventGateway>,
        session_index: Arc<dyn SessionIndex>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            db,
            gateway,
            session_index,
            config,
            workers: Arc::new(RwLock::new(HashMap::new())),
            restart_timers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Spawn the worker process for a subbot.
    ///
    /// `restart_count` is zero for a fresh launch and carries the cycle
    /// number on respawns.
    #[allow(clippy::too_many_lines)]
    pub fn spawn_worker(
        self: &Arc<Self>,
        ctx: LaunchContext,
        restart_count: u32,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), SubbotError>> + Send + '_>>
    {
        Box::pin(async move {
        let code = ctx.code.clone();

        let mut cmd = Command::new(&self.config.worker_bin);
        cmd.args(&self.config.worker_args)
            .arg("--code")
            .arg(&ctx.code)
            .arg("--kind")
            .arg(ctx.kind.as_str())
            .arg("--storage-dir")
            .arg(&ctx.storage_dir);
        if let Some(number) = &ctx.target_number {
            cmd.arg("--target-number").arg(number);
        }
        cmd.arg("--metadata").arg(&ctx.metadata);

        // Explicit minimal environment: the launch context, PATH and HOME,
        // nothing else leaks through.
        cmd.env_clear();
        for key in ["PATH", "HOME"] {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }
        cmd.env(EVENT_TOKEN_ENV, &ctx.event_token);

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        info!(
            code = %code,
            worker = %self.config.worker_bin.display(),
            kind = ctx.kind.as_str(),
            restart_count,
            "Spawning subbot worker"
        );

        let mut child = cmd.spawn().map_err(|e| SubbotError::SpawnFailed {
            reason: e.to_string(),
        })?;
        let pid = child.id();

        {
            let mut workers = self.workers.write().await;
            let handle = workers.entry(code.clone()).or_insert_with(|| WorkerHandle {
                pid: None,
                status: SubbotStatus::Launching,
                last_event: None,
                last_seen: unix_timestamp(),
                restart_count,
                delete_requested: false,
            });
            handle.pid = pid;
            handle.status = SubbotStatus::Launching;
            handle.restart_count = restart_count;
            handle.last_seen = unix_timestamp();
        }

        // Worker -> supervisor IPC: one JSON event per stdout line.
        if let Some(stdout) = child.stdout.take() {
            let sup = Arc::clone(self);
            let code_out = code.clone();
            tokio::spawn(async move {
                let reader = BufReader::new(stdout);
                let mut lines = reader.lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    match wire::parse_line(&line) {
                        Ok(event) => sup.handle_worker_event(&code_out, event).await,
                        Err(e) => {
                            debug!(code = %code_out, error = %e, "Ignoring malformed worker line");
                        }
                    }
                }
                debug!(code = %code_out, "stdout reader finished");
            });
        }

        // stderr is diagnostics only.
        if let Some(stderr) = child.stderr.take() {
            let code_err = code.clone();
            tokio::spawn(async move {
                let reader = BufReader::new(stderr);
                let mut lines = reader.lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(code = %code_err, "stderr: {}", line);
                }
            });
        }

        // Exit monitor.
        let sup = Arc::clone(self);
        tokio::spawn(async move {
            let exit_code = match child.wait().await {
                Ok(status) => {
                    info!(code = %code, ?status, "Worker exited");
                    status.code()
                }
                Err(e) => {
                    error!(code = %code, error = %e, "Error waiting for worker");
                    None
                }
            };
            sup.handle_worker_exit(&code, exit_code).await;
        });

        Ok(())
        })
    }

    /// Apply a worker event: mirror update, persisted patch, event-log
    /// append, gateway publish.
    ///
    /// Unrecognized event names are forward-compatible no-ops.
    pub(crate) async fn handle_worker_event(&self, code: &str, event: WorkerEvent) {
        if !event.is_recognized() {
            debug!(code, event = event.name(), "Ignoring unrecognized worker event");
            return;
        }

        let name = event.name().to_string();
        let next_status = status_after(&event);

        {
            let mut workers = self.workers.write().await;
            if let Some(handle) = workers.get_mut(code) {
                if let Some(status) = next_status {
                    handle.status = status;
                }
                handle.last_event = Some(name.clone());
                handle.last_seen = unix_timestamp();
            }
        }

        // Persistence failures are logged and swallowed; the in-memory
        // mirror stays authoritative for this process lifetime.
        if let Some(status) = next_status {
            if let Err(e) = self.db.update_subbot_status(code, status).await {
                error!(code, error = %e, "Failed to persist status patch");
            }
        }
        match &event {
            WorkerEvent::QrReady { qr } => {
                if let Err(e) = self.db.set_qr_payload(code, Some(qr)).await {
                    error!(code, error = %e, "Failed to store QR payload");
                }
            }
            WorkerEvent::Connected { .. } => {
                if let Err(e) = self.db.set_qr_payload(code, None).await {
                    error!(code, error = %e, "Failed to clear QR payload");
                }
            }
            _ => {}
        }
        if let Err(e) = self.db.touch_heartbeat(code).await {
            error!(code, error = %e, "Failed to record heartbeat");
        }

        self.record_event(code, &name, event.payload()).await;
    }

    /// Accept an event reported over the external endpoint by a worker
    /// that cannot share memory with the supervisor.
    ///
    /// Returns `Ok(false)` for unrecognized event names (ignored, not an
    /// error). A token mismatch is rejected before anything is recorded.
    pub async fn register_external_event(
        &self,
        code: &str,
        token: &str,
        name: &str,
        payload: &Value,
    ) -> Result<bool, SubbotError> {
        let row = self
            .db
            .get_subbot(code)
            .await?
            .ok_or_else(|| SubbotError::NotFound {
                code: code.to_string(),
            })?;

        if row.event_token != token {
            warn!(code, "Rejected external event with mismatched token");
            return Err(SubbotError::Unauthorized {
                code: code.to_string(),
            });
        }

        let event = wire::from_parts(name, payload);
        if !event.is_recognized() {
            debug!(code, event = name, "Ignoring unrecognized external event");
            return Ok(false);
        }

        self.handle_worker_event(code, event).await;
        Ok(true)
    }

    /// Worker exit handling: terminal bookkeeping plus restart decision.
    async fn handle_worker_exit(self: &Arc<Self>, code: &str, exit_code: Option<i32>) {
        let outcome = {
            let mut workers = self.workers.write().await;
            match workers.get_mut(code) {
                Some(handle) if handle.delete_requested => {
                    workers.remove(code);
                    None
                }
                Some(handle) => {
                    handle.pid = None;
                    handle.status = SubbotStatus::Stopped;
                    let silent_for = unix_timestamp().saturating_sub(handle.last_seen);
                    handle.last_seen = unix_timestamp();
                    Some((handle.restart_count, handle.last_event.clone(), silent_for))
                }
                None => None,
            }
        };

        let Some((restart_count, last_event, silent_for)) = outcome else {
            debug!(code, "Worker exit after deletion, nothing to schedule");
            return;
        };
        debug!(code, silent_for, "Worker exit bookkeeping");

        if let Err(e) = self.db.update_subbot_status(code, SubbotStatus::Stopped).await {
            error!(code, error = %e, "Failed to persist stopped status");
        }
        self.record_event(
            code,
            "stopped",
            json!({ "exit_code": exit_code, "last_event": last_event }),
        )
        .await;

        if restart_count < self.config.restart.max_restarts {
            self.schedule_restart(code, restart_count).await;
        } else {
            info!(code, restart_count, "Restart budget exhausted, subbot stays stopped");
            self.workers.write().await.remove(code);
        }
    }

    /// Schedule a cancellable respawn after the backoff delay.
    async fn schedule_restart(self: &Arc<Self>, code: &str, restart_count: u32) {
        let attempt = restart_count + 1;
        let delay = self.config.restart.delay_for(restart_count);

        {
            let mut workers = self.workers.write().await;
            if let Some(handle) = workers.get_mut(code) {
                handle.restart_count = attempt;
            }
        }

        #[allow(clippy::cast_possible_truncation)]
        self.record_event(
            code,
            "restart_scheduled",
            json!({ "attempt": attempt, "delay_ms": delay.as_millis() as u64 }),
        )
        .await;
        info!(code, attempt, ?delay, "Restart scheduled");

        let sup = Arc::clone(self);
        let code_owned = code.to_string();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            sup.restart_timers.write().await.remove(&code_owned);

            // Deletion may have landed while we slept.
            if sup.delete_requested(&code_owned).await {
                debug!(code = %code_owned, "Respawn cancelled by deletion");
                return;
            }

            let row = match sup.db.get_subbot(&code_owned).await {
                Ok(Some(row)) => row,
                Ok(None) => {
                    debug!(code = %code_owned, "Record gone before respawn");
                    return;
                }
                Err(e) => {
                    error!(code = %code_owned, error = %e, "Failed to load record for respawn");
                    return;
                }
            };

            let Some(ctx) = LaunchContext::from_row(&row, &sup.config.sessions_dir) else {
                error!(code = %code_owned, kind = %row.kind, "Stored kind is unusable, not respawning");
                return;
            };

            if let Err(e) = sup
                .db
                .update_subbot_status(&code_owned, SubbotStatus::Launching)
                .await
            {
                error!(code = %code_owned, error = %e, "Failed to persist relaunch status");
            }
            sup.record_event(&code_owned, "launching", json!({ "attempt": attempt }))
                .await;

            if let Err(e) = sup.spawn_worker(ctx, attempt).await {
                error!(code = %code_owned, error = %e, "Respawn failed");
                let _ = sup
                    .db
                    .update_subbot_status(&code_owned, SubbotStatus::Stopped)
                    .await;
                sup.workers.write().await.remove(&code_owned);
            }
        });

        self.restart_timers
            .write()
            .await
            .insert(code.to_string(), task.abort_handle());
    }

    /// Delete a subbot: tear down the worker, drop the persisted record
    /// and storage directory, clear the mirror entry.
    ///
    /// Idempotent; returns `Ok(false)` when nothing was left to delete.
    pub async fn delete(&self, code: &str) -> Result<bool, SubbotError> {
        // Cancel any pending respawn first so it cannot fire mid-teardown.
        if let Some(timer) = self.restart_timers.write().await.remove(code) {
            timer.abort();
        }

        let mut deleted = false;
        let pid = {
            let mut workers = self.workers.write().await;
            match workers.get_mut(code) {
                Some(handle) if handle.pid.is_some() => {
                    handle.delete_requested = true;
                    handle.status = SubbotStatus::Deleted;
                    handle.pid
                }
                Some(_) => {
                    // No live process; the entry is just bookkeeping.
                    workers.remove(code);
                    deleted = true;
                    None
                }
                None => None,
            }
        };

        if let Some(pid) = pid {
            deleted = true;
            #[cfg(not(unix))]
            warn!(code, pid, "Signal-based worker stop is unix-only; relying on record teardown");
            #[cfg(unix)]
            {
                send_signal(pid, libc::SIGTERM);

                // Escalate off the caller's back: SIGKILL if the worker is
                // still around once the grace period expires.
                let workers = Arc::clone(&self.workers);
                let grace = self.config.terminate_timeout;
                let code_owned = code.to_string();
                tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    let lingering = workers
                        .read()
                        .await
                        .get(&code_owned)
                        .and_then(|handle| handle.pid);
                    if lingering == Some(pid) {
                        warn!(code = %code_owned, pid, "Grace period expired, sending SIGKILL");
                        send_signal(pid, libc::SIGKILL);
                    }
                });
            }
        }

        if self.db.delete_subbot(code).await? {
            deleted = true;
        }

        let storage_dir = self.config.sessions_dir.join(code);
        if storage_dir.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(&storage_dir).await {
                warn!(code, error = %e, "Failed to remove session storage");
            } else {
                deleted = true;
            }
        }

        if deleted {
            self.record_event(code, "stopped", json!({ "reason": "deleted" }))
                .await;
            info!(code, "Subbot deleted");
        }

        Ok(deleted)
    }

    /// Join persisted records with the online flag: the supervisor sees a
    /// connected worker and the session library still lists the code.
    pub async fn list_with_live_flag(&self) -> Result<Vec<(SubbotRow, bool)>, SubbotError> {
        let rows = self.db.list_subbots(&[]).await?;
        let workers = self.workers.read().await;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let connected = workers
                .get(&row.code)
                .is_some_and(|handle| handle.status == SubbotStatus::Connected);
            let online = connected && self.session_index.has_active_session(&row.code);
            out.push((row, online));
        }
        Ok(out)
    }

    /// Current mirror status for a code, if a live handle exists.
    pub async fn live_status(&self, code: &str) -> Option<SubbotStatus> {
        self.workers.read().await.get(code).map(|handle| handle.status)
    }

    /// Restart cycles spent by a code's current handle.
    pub async fn restart_count(&self, code: &str) -> u32 {
        self.workers
            .read()
            .await
            .get(code)
            .map_or(0, |handle| handle.restart_count)
    }

    async fn delete_requested(&self, code: &str) -> bool {
        self.workers
            .read()
            .await
            .get(code)
            .is_some_and(|handle| handle.delete_requested)
    }

    /// Append an event-log row and publish on the gateway.
    pub(crate) async fn record_event(&self, code: &str, name: &str, payload: Value) {
        let payload_str = payload.to_string();
        if let Err(e) = self.db.insert_event(code, name, &payload_str).await {
            error!(code, event = name, error = %e, "Failed to append event log row");
        }

        self.gateway
            .publish(SubbotEvent {
                code: code.to_string(),
                event: name.to_string(),
                payload,
                at: unix_timestamp(),
            })
            .await;
    }

    /// Get a reference to the database.
    pub const fn db(&self) -> &Database {
        &self.db
    }
}

/// Status a recognized worker event moves the subbot to.
const fn status_after(event: &WorkerEvent) -> Option<SubbotStatus> {
    match event {
        WorkerEvent::QrReady { .. } | WorkerEvent::PairingCode { .. } => {
            Some(SubbotStatus::Pending)
        }
        WorkerEvent::Connected { .. } => Some(SubbotStatus::Connected),
        WorkerEvent::Disconnected { .. } => Some(SubbotStatus::Disconnected),
        WorkerEvent::Error { .. } => Some(SubbotStatus::Error),
        WorkerEvent::Unknown { .. } => None,
    }
}

/// Send a signal to a worker process.
#[cfg(unix)]
fn send_signal(pid: u32, signal: i32) {
    // SAFETY: pid is a valid process ID obtained from our own Child handle.
    // kill(2) is safe to call on any owned subprocess.
    #[allow(unsafe_code)]
    #[allow(clippy::cast_possible_wrap)]
    let ret = unsafe { libc::kill(pid as i32, signal) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        warn!(pid, signal, error = %err, "Failed to signal worker");
    }
}
