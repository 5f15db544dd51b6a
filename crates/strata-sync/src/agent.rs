//! # Sync Agent
//!
//! Drives the pull and push coordinators: on a timer, on demand, and again
//! right away while the server reports more work.
//!
//! ## Agent Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncAgent Loop                                   │
//! │                                                                         │
//! │   interval tick (Auto)   ─┐                                            │
//! │   handle.trigger(..)     ─┼──► run_cycle(trigger)                      │
//! │   handle.shutdown()      ─┘        │                                   │
//! │                                    ├── Pull / Full ─► pull_all()       │
//! │                                    │                  (with retry)     │
//! │                                    └── Push / Full ─► push()           │
//! │                                         while partial, up to           │
//! │                                         max_partial_rounds             │
//! │                                                                         │
//! │  One cycle at a time. Transport errors are retried with exponential    │
//! │  backoff; after that the cycle is abandoned and the app keeps working  │
//! │  from the last synced data.                                            │
//! │                                                                         │
//! │  STATUS EVENTS (SyncEventEmitter):                                     │
//! │  emit_status   - state, timestamps, pending count, revision            │
//! │  emit_progress - rows pulled, changes pushed                           │
//! │  emit_error    - message, retryable                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use strata_db::Database;

use crate::config::{SyncConfig, SyncMode};
use crate::error::{SyncError, SyncResult};
use crate::pull::{PullCoordinator, PullReport};
use crate::push::{PushCoordinator, ReconcileOutcome};
use crate::transport::SyncRpc;

// =============================================================================
// Triggers & Status
// =============================================================================

/// What a cycle should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Pull,
    Push,
    /// Pull, then push.
    Full,
}

impl SyncTrigger {
    fn pulls(&self) -> bool {
        matches!(self, SyncTrigger::Pull | SyncTrigger::Full)
    }

    fn pushes(&self) -> bool {
        matches!(self, SyncTrigger::Push | SyncTrigger::Full)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Pulling,
    Pushing,
    Offline,
    Stopped,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::Idle => write!(f, "idle"),
            SyncState::Pulling => write!(f, "pulling"),
            SyncState::Pushing => write!(f, "pushing"),
            SyncState::Offline => write!(f, "offline"),
            SyncState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Current sync status for external queries.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub state: SyncState,

    pub mode: SyncMode,

    pub last_pull_at: Option<DateTime<Utc>>,

    pub last_push_at: Option<DateTime<Utc>>,

    /// Journal entries waiting to be pushed.
    pub pending_changes: i64,

    pub last_revision: Option<String>,

    /// Last cycle error (cleared by a successful cycle).
    pub last_error: Option<String>,

    /// Tables that failed in the last pull.
    pub failed_tables: Vec<String>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        SyncStatus {
            state: SyncState::Idle,
            mode: SyncMode::Auto,
            last_pull_at: None,
            last_push_at: None,
            pending_changes: 0,
            last_revision: None,
            last_error: None,
            failed_tables: Vec::new(),
        }
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub pull: Option<PullReport>,
    /// One entry per push round.
    pub pushes: Vec<ReconcileOutcome>,
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Receives status changes, e.g. to forward them to a UI.
pub trait SyncEventEmitter: Send + Sync {
    fn emit_status(&self, status: &SyncStatus);

    fn emit_progress(&self, rows_pulled: usize, changes_pushed: usize);

    fn emit_error(&self, message: &str, retryable: bool);
}

/// No-op event emitter for testing.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_status(&self, _status: &SyncStatus) {}
    fn emit_progress(&self, _rows_pulled: usize, _changes_pushed: usize) {}
    fn emit_error(&self, _message: &str, _retryable: bool) {}
}

// =============================================================================
// Sync Agent
// =============================================================================

pub struct SyncAgent {
    config: Arc<SyncConfig>,
    db: Database,
    pull: PullCoordinator,
    push: PushCoordinator,
    status: Arc<RwLock<SyncStatus>>,
    emitter: Arc<dyn SyncEventEmitter>,
    /// Held for the length of a cycle.
    cycle: Mutex<()>,
}

impl SyncAgent {
    pub fn new(config: SyncConfig, db: Database, rpc: Arc<dyn SyncRpc>) -> SyncResult<Self> {
        Self::with_emitter(config, db, rpc, Arc::new(NoOpEmitter))
    }

    pub fn with_emitter(
        config: SyncConfig,
        db: Database,
        rpc: Arc<dyn SyncRpc>,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> SyncResult<Self> {
        config.validate()?;

        let registry = Arc::new(config.registry()?);
        let pull = PullCoordinator::new(db.clone(), rpc.clone(), registry.clone());
        let push = PushCoordinator::new(db.clone(), rpc, registry, &config);

        let status = SyncStatus {
            mode: config.sync.mode,
            state: if config.is_sync_enabled() {
                SyncState::Idle
            } else {
                SyncState::Offline
            },
            ..Default::default()
        };

        Ok(SyncAgent {
            config: Arc::new(config),
            db,
            pull,
            push,
            status: Arc::new(RwLock::new(status)),
            emitter,
            cycle: Mutex::new(()),
        })
    }

    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// Reloads the stored bookkeeping into the status.
    pub async fn refresh_status(&self) -> SyncResult<SyncStatus> {
        let state = self.db.sync_state();
        let pending_changes = self.db.changes().count_pending().await?;
        let last_revision = state.last_revision().await?;
        let last_pull_at = state.last_pull_at().await?;
        let last_push_at = state.last_push_at().await?;

        let mut status = self.status.write().await;
        status.pending_changes = pending_changes;
        status.last_revision = last_revision;
        status.last_pull_at = last_pull_at;
        status.last_push_at = last_push_at;
        Ok(status.clone())
    }

    /// Runs one cycle now, waiting for any cycle already in progress.
    pub async fn run_cycle(&self, trigger: SyncTrigger) -> SyncResult<CycleReport> {
        let _guard = self.cycle.lock().await;
        debug!(?trigger, "Sync cycle starting");

        let result = self.cycle_inner(trigger).await;

        if let Err(e) = &result {
            error!(error = %e, ?trigger, "Sync cycle failed");
            self.status.write().await.last_error = Some(e.to_string());
            self.emitter.emit_error(&e.to_string(), e.is_retryable());
        }

        self.set_state(SyncState::Idle).await;
        if let Err(e) = self.refresh_status().await {
            warn!(error = %e, "Could not refresh sync status");
        }
        let status = self.status().await;
        self.emitter.emit_status(&status);

        result
    }

    async fn cycle_inner(&self, trigger: SyncTrigger) -> SyncResult<CycleReport> {
        let mut report = CycleReport::default();

        if trigger.pulls() {
            self.set_state(SyncState::Pulling).await;
            let pulled = self.with_retry("pull", || self.pull.pull_all()).await?;

            {
                let mut status = self.status.write().await;
                status.failed_tables = pulled.failed_tables().iter().map(|t| t.to_string()).collect();
                status.last_error = None;
            }
            self.emitter.emit_progress(pulled.rows_written(), 0);
            report.pull = Some(pulled);
        }

        if trigger.pushes() {
            self.set_state(SyncState::Pushing).await;

            let max_rounds = self.config.sync.max_partial_rounds.saturating_add(1);
            for round in 1..=max_rounds {
                let outcome = self.with_retry("push", || self.push.push()).await?;
                let partial = outcome.partial;

                self.status.write().await.last_error = None;
                self.emitter.emit_progress(0, outcome.sent);
                report.pushes.push(outcome);

                if !partial {
                    break;
                }
                if round == max_rounds {
                    warn!(rounds = round, "Server still partial, continuing next cycle");
                } else {
                    debug!(round, "Server reported partial, pushing again");
                }
            }
        }

        Ok(report)
    }

    /// Runs `op`, retrying transient errors with exponential backoff.
    async fn with_retry<T, F, Fut>(&self, name: &str, op: F) -> SyncResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let max_retries = self.config.sync.max_retries;
        let mut attempt = 0u32;

        backoff::future::retry(self.backoff_policy(), || {
            attempt += 1;
            let current = attempt;
            let fut = op();
            async move {
                match fut.await {
                    Ok(value) => Ok(value),
                    Err(e) if e.is_retryable() && (max_retries == 0 || current < max_retries) => {
                        warn!(operation = name, attempt = current, error = %e, "Transient sync error, retrying");
                        Err(backoff::Error::transient(e))
                    }
                    Err(e) => Err(backoff::Error::permanent(e)),
                }
            }
        })
        .await
    }

    fn backoff_policy(&self) -> ExponentialBackoff {
        let settings = &self.config.sync;
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(settings.initial_backoff_ms))
            .with_max_interval(Duration::from_secs(settings.max_backoff_secs))
            .with_max_elapsed_time(Some(Duration::from_secs(settings.max_retry_elapsed_secs)))
            .build()
    }

    async fn set_state(&self, state: SyncState) {
        let status = {
            let mut s = self.status.write().await;
            s.state = state;
            s.clone()
        };
        self.emitter.emit_status(&status);
    }

    /// Starts the background loop and returns its control handle.
    pub fn spawn(self) -> SyncAgentHandle {
        let (trigger_tx, trigger_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let status = self.status.clone();

        tokio::spawn(self.run(trigger_rx, shutdown_rx));

        SyncAgentHandle::new(trigger_tx, shutdown_tx, status)
    }

    async fn run(self, mut triggers: mpsc::Receiver<SyncTrigger>, mut shutdown: mpsc::Receiver<()>) {
        let mode = self.config.mode();
        info!(
            device_id = %self.config.device_id(),
            mode = %mode,
            interval_secs = self.config.sync.pull_interval_secs,
            "Sync agent started"
        );

        if let Err(e) = self.refresh_status().await {
            warn!(error = %e, "Could not load sync status");
        }

        let mut ticker = tokio::time::interval(self.config.pull_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick(), if mode.is_periodic() => {
                    let _ = self.run_cycle(SyncTrigger::Full).await;
                }

                received = triggers.recv() => match received {
                    Some(trigger) if mode.is_sync_enabled() => {
                        let _ = self.run_cycle(trigger).await;
                    }
                    Some(trigger) => {
                        warn!(?trigger, "Sync is offline, ignoring trigger");
                    }
                    None => break,
                },

                _ = shutdown.recv() => {
                    info!("Sync agent received shutdown");
                    break;
                }
            }
        }

        self.set_state(SyncState::Stopped).await;
        info!("Sync agent stopped");
    }
}

// =============================================================================
// Agent Handle (for external control)
// =============================================================================

/// Handle for controlling a spawned [`SyncAgent`].
#[derive(Clone)]
pub struct SyncAgentHandle {
    trigger_tx: mpsc::Sender<SyncTrigger>,
    shutdown_tx: mpsc::Sender<()>,
    status: Arc<RwLock<SyncStatus>>,
}

impl SyncAgentHandle {
    pub(crate) fn new(
        trigger_tx: mpsc::Sender<SyncTrigger>,
        shutdown_tx: mpsc::Sender<()>,
        status: Arc<RwLock<SyncStatus>>,
    ) -> Self {
        SyncAgentHandle {
            trigger_tx,
            shutdown_tx,
            status,
        }
    }

    /// Queues a cycle. Returns once queued, not once it ran.
    pub async fn trigger(&self, trigger: SyncTrigger) -> SyncResult<()> {
        self.trigger_tx
            .send(trigger)
            .await
            .map_err(|_| SyncError::ShuttingDown)
    }

    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// Signals the agent to stop after the current cycle.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PullResponse, PushResponse};
    use crate::transport::MockRpc;
    use strata_db::DbConfig;

    fn fast_config() -> SyncConfig {
        let mut config = SyncConfig::default();
        config.sync.initial_backoff_ms = 1;
        config.sync.max_backoff_secs = 1;
        config.sync.max_retries = 3;
        config
    }

    async fn agent(config: SyncConfig) -> (SyncAgent, Arc<MockRpc>) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let rpc = Arc::new(MockRpc::new());
        let agent = SyncAgent::new(config, db, rpc.clone()).unwrap();
        (agent, rpc)
    }

    #[test]
    fn test_sync_status_default() {
        let status = SyncStatus::default();
        assert_eq!(status.state, SyncState::Idle);
        assert_eq!(status.pending_changes, 0);
        assert!(status.last_error.is_none());
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let (agent, rpc) = agent(fast_config()).await;
        rpc.fail_pull(SyncError::ConnectionFailed("down".into()));
        rpc.fail_pull(SyncError::Timeout(5));
        rpc.queue_pull(PullResponse::default());

        let report = agent.run_cycle(SyncTrigger::Pull).await.unwrap();
        assert!(report.pull.is_some());
        assert_eq!(rpc.pull_requests().len(), 3);
        assert!(agent.status().await.last_error.is_none());
    }

    #[tokio::test]
    async fn test_permanent_error_abandons_cycle() {
        let (agent, rpc) = agent(fast_config()).await;
        rpc.fail_push(SyncError::HttpStatus {
            status: 401,
            body: "bad token".into(),
        });

        let err = agent.run_cycle(SyncTrigger::Push).await.unwrap_err();
        assert!(matches!(err, SyncError::HttpStatus { status: 401, .. }));
        assert_eq!(rpc.push_requests().len(), 1);

        let status = agent.status().await;
        assert_eq!(status.state, SyncState::Idle);
        assert!(status.last_error.unwrap().contains("401"));
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let (agent, rpc) = agent(fast_config()).await;
        for _ in 0..5 {
            rpc.fail_pull(SyncError::ConnectionFailed("down".into()));
        }

        assert!(agent.run_cycle(SyncTrigger::Pull).await.is_err());
        assert_eq!(rpc.pull_requests().len(), 3);
    }

    #[tokio::test]
    async fn test_partial_push_repeats_up_to_limit() {
        let mut config = fast_config();
        config.sync.max_partial_rounds = 2;
        let (agent, rpc) = agent(config).await;

        for revision in ["1", "2", "3", "4"] {
            rpc.queue_push(PushResponse {
                current_revision: Some(revision.into()),
                partial: true,
                ..Default::default()
            });
        }

        let report = agent.run_cycle(SyncTrigger::Push).await.unwrap();
        assert_eq!(report.pushes.len(), 3);
        assert_eq!(agent.status().await.last_revision.as_deref(), Some("3"));

        let requests = rpc.push_requests();
        assert_eq!(requests[1].last_revision.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_spawned_agent_handles_triggers() {
        let mut config = fast_config();
        config.sync.mode = SyncMode::Manual;
        let (agent, rpc) = agent(config).await;

        let handle = agent.spawn();
        handle.trigger(SyncTrigger::Pull).await.unwrap();

        for _ in 0..100 {
            if !rpc.pull_requests().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(rpc.pull_requests().len(), 1);
        assert!(rpc.push_requests().is_empty());

        handle.shutdown().await;
    }
}
