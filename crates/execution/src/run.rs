//! Per-run phase and abort flag.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use arbor_core::RunId;

use crate::error::ExecutionError;
use crate::status::RunStatus;
use crate::transition::validate_run_transition;

/// Shared state of a single run: its phase and its abort flag.
///
/// The abort flag is a [`CancellationToken`], so it is monotonic and every
/// intentional sleep in the engine can wait on it.
#[derive(Debug)]
pub struct RunState {
    run_id: RunId,
    status: RwLock<RunStatus>,
    /// Before `abort` the run was in this phase; `None` until aborted.
    aborted_from: RwLock<Option<RunStatus>>,
    cancellation: CancellationToken,
    started_at: DateTime<Utc>,
}

impl RunState {
    /// A run in `Initializing`.
    #[must_use]
    pub fn new(run_id: RunId) -> Self {
        Self::with_token(run_id, CancellationToken::new())
    }

    /// A run whose abort flag is `token`.
    #[must_use]
    pub fn with_token(run_id: RunId, token: CancellationToken) -> Self {
        Self {
            run_id,
            status: RwLock::new(RunStatus::Initializing),
            aborted_from: RwLock::new(None),
            cancellation: token,
            started_at: Utc::now(),
        }
    }

    /// Run id.
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Current phase.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        *self.status.read()
    }

    /// When the run state was created.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// The abort token. Cancelled exactly when the run is aborted.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Whether an abort was requested.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Move to `to`, validating the transition.
    ///
    /// While aborting, requests to move to a normal phase are folded into the
    /// drain: `Running` stays `Aborting`, `Exporting` and `Ended` proceed.
    pub fn transition(&self, to: RunStatus) -> Result<(), ExecutionError> {
        let mut status = self.status.write();
        if *status == RunStatus::Aborting && matches!(to, RunStatus::Importing | RunStatus::Running) {
            return Ok(());
        }
        validate_run_transition(*status, to)?;
        tracing::info!(run_id = %self.run_id, from = %*status, to = %to, "run transition");
        *status = to;
        Ok(())
    }

    /// Request an abort.
    ///
    /// Returns `false` when the run already ended or is already aborting;
    /// the call is then a no-op.
    pub fn abort(&self) -> bool {
        let mut status = self.status.write();
        if matches!(*status, RunStatus::Ended | RunStatus::Aborting) {
            return false;
        }
        *self.aborted_from.write() = Some(*status);
        tracing::info!(run_id = %self.run_id, from = %*status, "run aborting");
        *status = RunStatus::Aborting;
        self.cancellation.cancel();
        true
    }

    /// The phase the run was in when it was aborted.
    #[must_use]
    pub fn aborted_from(&self) -> Option<RunStatus> {
        *self.aborted_from.read()
    }
}
