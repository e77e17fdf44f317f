//! [`ControlActor`] — owns the control channel and the service lifecycle.
//!
//! Every operation that touches the control channel, the lifecycle state or
//! the push schedule runs on this one task, in command order. That is the
//! whole mutual-exclusion story: there are no locks on the control path.
//!
//! # Commands
//!
//! ```text
//! FileStreamService ──Start/Stop/ForceSync──┐
//! scheduler task ────────Push───────────────┼──► ControlActor
//! inbound forwarder ─────Inbound────────────┘
//! ```
//!
//! The scheduler task and the forwarder hold only a weak sender, so the
//! actor exits once the last service handle is dropped.
//!
//! # Channel generations
//!
//! Each opened control channel gets a generation number. Inbound events are
//! tagged with it; a terminal event from a channel that was already
//! discarded cannot tear down its replacement.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

// ---

use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio::time::Instant;

// ---

use filestream_domain::{
    // ---
    BackoffTrigger,
    ChannelEvent,
    ControlChannel,
    ControlSinkPtr,
    FileFetchRequest,
    FileStreamError,
    FileStreamSessionPtr,
    ManifestCodec,
    ManifestService,
    Result,
    ScheduledHandle,
    ScheduledTask,
    SchedulerPtr,
    ServerControlMsg,
};

// ---

use super::{AdmissionGate, FileStreamConfig, TransferEngine, TransferRegistry, TransferRequest};

/// Depth of the actor's command queue.
pub(crate) const COMMAND_QUEUE_DEPTH: usize = 64;

// ---------------------------------------------------------------------------
// ControlCmd
// ---------------------------------------------------------------------------

pub(crate) enum ControlCmd {
    // ---
    Start {
        job_id: String,
        root: PathBuf,
        reply: oneshot::Sender<Result<()>>,
    },

    /// Reply is `true` when this call performed the shutdown.
    Stop { reply: oneshot::Sender<bool> },

    ForceSync {
        reply: oneshot::Sender<Option<ScheduledHandle>>,
    },

    /// Scheduled manifest push.
    Push,

    Inbound {
        generation: u64,
        event: ChannelEvent<ServerControlMsg>,
    },
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    // ---
    Unstarted,
    Started,
    Stopped,
}

// ---

struct Job {
    // ---
    id: String,
    root: PathBuf,
}

// ---

/// The live control channel.
struct OpenControl {
    // ---
    generation: u64,
    sink: ControlSinkPtr,

    /// Task relaying inbound events into the command queue.
    forwarder: AbortHandle,
}

// ---------------------------------------------------------------------------
// ControlActor
// ---------------------------------------------------------------------------

/// Collaborators handed to the actor at construction.
pub(crate) struct ControlDeps {
    // ---
    pub session: FileStreamSessionPtr,
    pub manifest: Arc<dyn ManifestService>,
    pub codec: Arc<dyn ManifestCodec>,
    pub scheduler: SchedulerPtr,
    pub trigger: Arc<BackoffTrigger>,
    pub gate: Arc<AdmissionGate>,
    pub registry: Arc<TransferRegistry>,
}

// ---

pub(crate) struct ControlActor {
    // ---
    config: FileStreamConfig,
    deps: ControlDeps,

    cmd_rx: mpsc::Receiver<ControlCmd>,
    cmd_tx: mpsc::WeakSender<ControlCmd>,

    lifecycle: Lifecycle,
    job: Option<Job>,

    /// Recurring manifest push.
    schedule: Option<ScheduledHandle>,

    channel: Option<OpenControl>,
    next_generation: u64,
}

// ---

impl ControlActor {
    // ---
    /// Spawn the actor on the current runtime and return its command queue.
    pub(crate) fn spawn(config: FileStreamConfig, deps: ControlDeps) -> mpsc::Sender<ControlCmd> {
        // ---
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let actor = Self {
            config,
            deps,
            cmd_rx,
            cmd_tx: cmd_tx.downgrade(),
            lifecycle: Lifecycle::Unstarted,
            job: None,
            schedule: None,
            channel: None,
            next_generation: 0,
        };
        tokio::spawn(actor.run());
        cmd_tx
    }

    // ---

    async fn run(mut self) {
        // ---
        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                ControlCmd::Start {
                    job_id,
                    root,
                    reply,
                } => {
                    let _ = reply.send(self.start(job_id, root));
                }
                ControlCmd::Stop { reply } => {
                    let stopped = self.stop().await;
                    let _ = reply.send(stopped);
                }
                ControlCmd::ForceSync { reply } => {
                    let handle = self.force_server_sync().await;
                    let _ = reply.send(handle);
                }
                ControlCmd::Push => self.push_manifest().await,
                ControlCmd::Inbound { generation, event } => {
                    self.on_inbound(generation, event).await;
                }
            }
        }

        // Every service handle is gone.
        if let Some(schedule) = self.schedule.take() {
            schedule.cancel();
        }
        self.discard_current_stream(true).await;
        tracing::debug!("control: actor exiting");
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    fn start(&mut self, job_id: String, root: PathBuf) -> Result<()> {
        // ---
        match self.lifecycle {
            Lifecycle::Unstarted => {}
            Lifecycle::Started => return Err(FileStreamError::InvalidState("service already started")),
            Lifecycle::Stopped => return Err(FileStreamError::InvalidState("service already stopped")),
        }

        self.reschedule()?;

        tracing::info!(%job_id, root = %root.display(), "filestream service started");
        self.job = Some(Job { id: job_id, root });
        self.lifecycle = Lifecycle::Started;
        Ok(())
    }

    // ---

    async fn stop(&mut self) -> bool {
        // ---
        if self.lifecycle != Lifecycle::Started {
            return false;
        }
        self.lifecycle = Lifecycle::Stopped;

        let active = self.deps.registry.len();
        tracing::info!(active, "filestream service stopping");

        if active > 0 {
            let outcome = self.deps.gate.drain_all(self.config.drain_timeout).await;
            if outcome.is_complete() {
                tracing::info!("all transfers drained");
            } else {
                tracing::warn!(
                    outstanding = outcome.outstanding(),
                    "drain timed out, forcing remaining transfers",
                );
            }
        }

        if let Some(schedule) = self.schedule.take() {
            schedule.cancel();
        }

        self.discard_current_stream(true).await;

        // A transfer may finish and leave the set while we sweep; skip those.
        for handle in self.deps.registry.snapshot() {
            if self.deps.registry.remove(&handle.id()).is_none() {
                continue;
            }
            handle.complete(
                true,
                Some(FileStreamError::Interrupted("agent shutting down".into())),
            );
        }

        tracing::info!("filestream service stopped");
        true
    }

    // ---

    async fn force_server_sync(&mut self) -> Option<ScheduledHandle> {
        // ---
        if self.lifecycle != Lifecycle::Started {
            return None;
        }
        if let Some(job) = &self.job {
            self.deps.manifest.invalidate(&job.root).await;
        }

        match self.deps.scheduler.schedule_at(Instant::now(), self.push_task()) {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!("control: failed to schedule forced sync: {e}");
                None
            }
        }
    }

    // ---

    /// (Re)arm the recurring push. The first run comes after the trigger's
    /// current delay.
    fn reschedule(&mut self) -> Result<()> {
        // ---
        if let Some(old) = self.schedule.take() {
            old.cancel();
        }
        let trigger = Arc::clone(&self.deps.trigger);
        let handle = self
            .deps
            .scheduler
            .schedule_with_trigger(trigger, self.push_task())?;
        self.schedule = Some(handle);
        Ok(())
    }

    // ---

    fn push_task(&self) -> ScheduledTask {
        // ---
        let cmd_tx = self.cmd_tx.clone();
        Arc::new(move || {
            let Some(tx) = cmd_tx.upgrade() else {
                return;
            };
            if tx.try_send(ControlCmd::Push).is_err() {
                tracing::debug!("control: command queue busy, skipping push");
            }
        })
    }

    // -----------------------------------------------------------------------
    // Control channel
    // -----------------------------------------------------------------------

    async fn push_manifest(&mut self) {
        // ---
        if self.lifecycle != Lifecycle::Started {
            tracing::trace!("control: not started, skipping push");
            return;
        }
        let Some(job) = &self.job else {
            return;
        };

        let snapshot = match self.deps.manifest.snapshot(&job.root).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!(root = %job.root.display(), "control: manifest snapshot failed: {e}");
                return;
            }
        };
        let push = match self.deps.codec.encode(&job.id, &job.root, &snapshot) {
            Ok(push) => push,
            Err(e) => {
                tracing::error!("control: manifest encode failed: {e}");
                return;
            }
        };

        if self.channel.is_none() {
            if let Err(e) = self.open_channel().await {
                tracing::warn!("control: failed to open control channel: {e}");
                return;
            }
        }
        let Some(open) = self.channel.as_mut() else {
            return;
        };

        let bytes = push.manifest.len();
        let sent = open.sink.send(push).await;
        match sent {
            Ok(()) => {
                tracing::debug!(generation = open.generation, bytes, "control: manifest pushed");
            }
            Err(e) => {
                tracing::warn!(generation = open.generation, "control: manifest send failed: {e}");
                self.on_channel_error().await;
            }
        }
    }

    // ---

    async fn open_channel(&mut self) -> Result<()> {
        // ---
        let ControlChannel { sink, mut inbound } = self
            .deps
            .session
            .open_control(self.config.enable_compression)
            .await?;

        self.next_generation += 1;
        let generation = self.next_generation;
        let cmd_tx = self.cmd_tx.clone();

        let forwarder = tokio::spawn(async move {
            loop {
                let event = inbound.recv().await.unwrap_or_else(|| {
                    ChannelEvent::Error("control channel closed by transport".into())
                });
                let terminal = event.is_terminal();

                let Some(tx) = cmd_tx.upgrade() else {
                    return;
                };
                if tx.send(ControlCmd::Inbound { generation, event }).await.is_err() || terminal {
                    return;
                }
            }
        });

        tracing::info!(generation, "control: channel opened");
        self.channel = Some(OpenControl {
            generation,
            sink,
            forwarder: forwarder.abort_handle(),
        });
        Ok(())
    }

    // ---

    async fn on_inbound(&mut self, generation: u64, event: ChannelEvent<ServerControlMsg>) {
        // ---
        let current = self.channel.as_ref().map(|c| c.generation) == Some(generation);

        match event {
            ChannelEvent::Message(ServerControlMsg::FileRequest(request)) => {
                self.admit(request).await;
            }
            ChannelEvent::Message(ServerControlMsg::Unknown) => {
                tracing::debug!(generation, "control: ignoring unrecognized message");
            }
            ChannelEvent::Error(reason) if current => {
                tracing::warn!(generation, %reason, "control: channel error");
                self.on_channel_error().await;
            }
            ChannelEvent::Completed if current => {
                tracing::info!(generation, "control: channel closed by peer");
                self.discard_current_stream(false).await;
            }
            ChannelEvent::Error(_) | ChannelEvent::Completed => {
                tracing::debug!(generation, "control: terminal event from a discarded channel");
            }
        }
    }

    // ---

    /// Reset the backoff so the next reconnect attempt comes after the
    /// initial delay, then drop the broken channel.
    async fn on_channel_error(&mut self) {
        // ---
        self.deps.trigger.reset();
        if self.lifecycle == Lifecycle::Started {
            if let Err(e) = self.reschedule() {
                tracing::warn!("control: failed to reschedule push: {e}");
            }
        }
        self.discard_current_stream(false).await;
    }

    // ---

    /// Drop the control channel, if any. With `send_completion` the peer is
    /// told the channel is done; otherwise it is already broken.
    async fn discard_current_stream(&mut self, send_completion: bool) {
        // ---
        let Some(mut open) = self.channel.take() else {
            return;
        };
        open.forwarder.abort();

        if send_completion {
            if let Err(e) = open.sink.complete().await {
                tracing::debug!(generation = open.generation, "control: completion not delivered: {e}");
            }
        }
        tracing::debug!(generation = open.generation, send_completion, "control: channel discarded");
    }

    // -----------------------------------------------------------------------
    // Request admission
    // -----------------------------------------------------------------------

    async fn admit(&mut self, request: FileFetchRequest) {
        // ---
        let stream_id = request.stream_id.as_str();

        if self.lifecycle != Lifecycle::Started {
            tracing::info!(%stream_id, "control: not running, dropping file request");
            return;
        }
        let Some(job) = &self.job else {
            return;
        };

        if request.range_len().is_none() {
            tracing::warn!(
                %stream_id,
                start = request.start_offset,
                end = request.end_offset,
                "control: inverted range, dropping file request",
            );
            return;
        }

        let Some(candidate) = resolve(&job.root, &request.relative_path) else {
            tracing::warn!(%stream_id, path = %request.relative_path, "control: path escapes job root, dropping");
            return;
        };

        let absolute_path = match confine(&job.root, &candidate).await {
            Ok(path) => path,
            Err(reason) => {
                tracing::warn!(%stream_id, path = %candidate.display(), "control: {reason}, dropping");
                return;
            }
        };

        let Some(permit) = self.deps.gate.try_acquire() else {
            tracing::warn!(
                %stream_id,
                max = self.deps.gate.capacity(),
                "control: too many concurrent transfers, dropping file request",
            );
            return;
        };

        tracing::info!(
            %stream_id,
            path = %absolute_path.display(),
            start = request.start_offset,
            end = request.end_offset,
            "control: transfer accepted",
        );

        TransferEngine::spawn(
            Arc::clone(&self.deps.session),
            TransferRequest {
                stream_id: request.stream_id.clone(),
                absolute_path,
                start_offset: request.start_offset,
                end_offset: request.end_offset,
            },
            permit,
            &self.deps.registry,
            self.config.chunk_max_bytes,
        );
    }
}

// ---------------------------------------------------------------------------
// Path resolution
// ---------------------------------------------------------------------------

/// Join `relative` onto `root`, refusing anything that could leave `root`.
fn resolve(root: &Path, relative: &str) -> Option<PathBuf> {
    // ---
    let relative = Path::new(relative);
    let mut normal = false;
    for component in relative.components() {
        match component {
            Component::Normal(_) => normal = true,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    normal.then(|| root.join(relative))
}

// ---

/// Follow symlinks from `candidate` and accept the result only if it is a
/// regular file under the real `root`.
async fn confine(root: &Path, candidate: &Path) -> std::result::Result<PathBuf, &'static str> {
    // ---
    let real = tokio::fs::canonicalize(candidate)
        .await
        .map_err(|_| "no such file")?;
    let root = tokio::fs::canonicalize(root)
        .await
        .map_err(|_| "job root unavailable")?;

    if !real.starts_with(&root) {
        return Err("path resolves outside job root");
    }
    match tokio::fs::metadata(&real).await {
        Ok(meta) if meta.is_file() => Ok(real),
        Ok(_) => Err("not a regular file"),
        Err(_) => Err("no such file"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn resolve_stays_under_root() {
        // ---
        let root = Path::new("/jobs/7");
        assert_eq!(resolve(root, "out/a.txt"), Some(PathBuf::from("/jobs/7/out/a.txt")));
        assert_eq!(resolve(root, "./a.txt"), Some(PathBuf::from("/jobs/7/./a.txt")));
        assert_eq!(resolve(root, "../etc/passwd"), None);
        assert_eq!(resolve(root, "out/../../x"), None);
        assert_eq!(resolve(root, "/etc/passwd"), None);
        assert_eq!(resolve(root, ""), None);
        assert_eq!(resolve(root, "."), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn confine_follows_symlinks() {
        // ---
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("a.txt"), b"abc").unwrap();
        std::fs::write(outside.path().join("secret"), b"xyz").unwrap();
        std::fs::create_dir(root.path().join("sub")).unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret"), root.path().join("leak")).unwrap();
        std::os::unix::fs::symlink(root.path().join("a.txt"), root.path().join("alias")).unwrap();

        let real_a = std::fs::canonicalize(root.path().join("a.txt")).unwrap();
        assert_eq!(confine(root.path(), &root.path().join("a.txt")).await, Ok(real_a.clone()));
        assert_eq!(confine(root.path(), &root.path().join("alias")).await, Ok(real_a));
        assert_eq!(
            confine(root.path(), &root.path().join("leak")).await,
            Err("path resolves outside job root")
        );
        assert_eq!(confine(root.path(), &root.path().join("sub")).await, Err("not a regular file"));
        assert_eq!(confine(root.path(), &root.path().join("nope")).await, Err("no such file"));
    }
}
