//! [`FileStreamService`] — public entry points of the agent.
//!
//! A thin handle over the control actor: every call is a command on the
//! actor's queue plus a oneshot reply. Cloning is cheap; the actor and its
//! push schedule live until the last clone is dropped or `stop` is called.

use std::path::PathBuf;
use std::sync::Arc;

// ---

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

// ---

use filestream_domain::{
    // ---
    BackoffTrigger,
    FileStreamError,
    FileStreamSessionPtr,
    ManifestCodec,
    ManifestService,
    Result,
    ScheduledHandle,
    SchedulerPtr,
};

// ---

use super::control::{ControlActor, ControlCmd, ControlDeps};
use super::{AdmissionGate, FileStreamConfig, TransferRegistry};

// ---------------------------------------------------------------------------
// FileStreamDeps
// ---------------------------------------------------------------------------

/// External collaborators of the service.
pub struct FileStreamDeps {
    // ---
    pub session: FileStreamSessionPtr,
    pub manifest: Arc<dyn ManifestService>,
    pub codec: Arc<dyn ManifestCodec>,
    pub scheduler: SchedulerPtr,
}

// ---------------------------------------------------------------------------
// FileStreamService
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct FileStreamService {
    // ---
    cmd_tx: mpsc::Sender<ControlCmd>,
    trigger: Arc<BackoffTrigger>,
    gate: Arc<AdmissionGate>,
    registry: Arc<TransferRegistry>,
}

// ---

impl FileStreamService {
    // ---
    /// Validate `config` and spawn the control actor on the current runtime.
    /// Nothing is pushed until [`FileStreamService::start`].
    pub fn new(config: FileStreamConfig, deps: FileStreamDeps) -> Result<Self> {
        // ---
        config.validate()?;
        Handle::try_current().map_err(|e| FileStreamError::Scheduler(e.to_string()))?;

        let trigger = Arc::new(BackoffTrigger::new(config.push_backoff.clone()));
        let gate = Arc::new(AdmissionGate::new(
            config.max_concurrent_transfers,
            config.drain_poll_interval,
        ));
        let registry = TransferRegistry::new();

        let cmd_tx = ControlActor::spawn(
            config,
            ControlDeps {
                session: deps.session,
                manifest: deps.manifest,
                codec: deps.codec,
                scheduler: deps.scheduler,
                trigger: Arc::clone(&trigger),
                gate: Arc::clone(&gate),
                registry: Arc::clone(&registry),
            },
        );

        Ok(Self {
            cmd_tx,
            trigger,
            gate,
            registry,
        })
    }

    // ---

    /// Begin pushing manifests of `root` for `job_id`.
    ///
    /// Fails with [`FileStreamError::InvalidState`] on every call after the
    /// first; a failed call schedules nothing.
    pub async fn start(&self, job_id: impl Into<String>, root: impl Into<PathBuf>) -> Result<()> {
        // ---
        let (reply, rx) = oneshot::channel();
        self.send(ControlCmd::Start {
            job_id: job_id.into(),
            root: root.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| FileStreamError::ChannelClosed)?
    }

    // ---

    /// Shut down: drain transfers (bounded by the drain timeout), cancel the
    /// push schedule, close the control channel and force-complete whatever
    /// is still running.
    ///
    /// Returns `true` for the call that performed the shutdown; `false` if
    /// the service was not running.
    pub async fn stop(&self) -> bool {
        // ---
        let (reply, rx) = oneshot::channel();
        if self.send(ControlCmd::Stop { reply }).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    // ---

    /// Drop the cached manifest and push immediately.
    ///
    /// `None` when the service is not running or scheduling failed.
    pub async fn force_server_sync(&self) -> Option<ScheduledHandle> {
        // ---
        let (reply, rx) = oneshot::channel();
        self.send(ControlCmd::ForceSync { reply }).await.ok()?;
        rx.await.ok().flatten()
    }

    // ---

    /// Transfers currently in the active set.
    pub fn active_transfers(&self) -> usize {
        self.registry.len()
    }

    // ---

    pub fn available_permits(&self) -> usize {
        self.gate.available()
    }

    // ---

    /// The push/reconnect backoff shared with the scheduler.
    pub fn backoff(&self) -> &BackoffTrigger {
        &self.trigger
    }

    // ---

    async fn send(&self, cmd: ControlCmd) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| FileStreamError::ChannelClosed)
    }
}
