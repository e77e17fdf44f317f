//! Shared fixtures for the service tests: a hand-cranked scheduler, a
//! manifest service that can be told to fail, and a job directory wired to
//! a link-sim peer.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use filestream_agent::{
    DirectoryManifestService, FileStreamConfig, FileStreamDeps, FileStreamService,
    JsonManifestCodec,
};
use filestream_domain::{
    BackoffConfig, DelayType, FileStreamError, ManifestService, ManifestSnapshot, Result,
    ScheduledHandle, ScheduledTask, Scheduler, Trigger,
};
use filestream_link_sim::{LinkSimConfig, LinkSimPeer, LinkSimSession};

pub const TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// ManualScheduler
// ---------------------------------------------------------------------------

struct Recurring {
    // ---
    trigger: Arc<dyn Trigger>,
    task: ScheduledTask,
    handle: ScheduledHandle,

    /// Every delay drawn from the trigger, in order. The first is the delay
    /// before the first run.
    delays: Vec<Duration>,
}

struct OneShot {
    // ---
    task: ScheduledTask,
    handle: ScheduledHandle,
}

/// Scheduler that runs nothing on its own; tests fire schedules by hand.
#[derive(Default)]
pub struct ManualScheduler {
    // ---
    recurring: Mutex<Vec<Recurring>>,
    one_shots: Mutex<Vec<OneShot>>,
}

impl ManualScheduler {
    // ---
    /// Run the newest live recurring schedule once and draw its next delay.
    /// Returns `false` if there is none.
    pub fn fire(&self) -> bool {
        // ---
        let task = {
            let mut recurring = self.recurring.lock().unwrap();
            let Some(entry) = recurring.iter_mut().rev().find(|r| !r.handle.is_cancelled()) else {
                return false;
            };
            let delay = entry.trigger.next_delay();
            entry.delays.push(delay);
            Arc::clone(&entry.task)
        };
        task();
        true
    }

    // ---

    /// Run every recurring task, cancelled or not, as a late timer would.
    pub fn fire_stale(&self) {
        // ---
        let tasks: Vec<ScheduledTask> = self
            .recurring
            .lock()
            .unwrap()
            .iter()
            .map(|r| Arc::clone(&r.task))
            .collect();
        for task in tasks {
            task();
        }
    }

    // ---

    /// Run and forget every pending one-shot.
    pub fn fire_one_shots(&self) -> usize {
        // ---
        let due: Vec<OneShot> = self.one_shots.lock().unwrap().drain(..).collect();
        let mut ran = 0;
        for shot in due.into_iter().filter(|s| !s.handle.is_cancelled()) {
            (shot.task)();
            ran += 1;
        }
        ran
    }

    // ---

    pub fn recurring_count(&self) -> usize {
        self.recurring.lock().unwrap().len()
    }

    // ---

    pub fn live_recurring_count(&self) -> usize {
        self.recurring
            .lock()
            .unwrap()
            .iter()
            .filter(|r| !r.handle.is_cancelled())
            .count()
    }

    // ---

    /// Delays drawn by the schedule created `index`-th.
    pub fn delays(&self, index: usize) -> Vec<Duration> {
        self.recurring.lock().unwrap()[index].delays.clone()
    }
}

impl Scheduler for ManualScheduler {
    // ---
    fn schedule_at(&self, _at: Instant, task: ScheduledTask) -> Result<ScheduledHandle> {
        // ---
        let handle = ScheduledHandle::detached();
        self.one_shots.lock().unwrap().push(OneShot {
            task,
            handle: handle.clone(),
        });
        Ok(handle)
    }

    fn schedule_with_trigger(
        &self,
        trigger: Arc<dyn Trigger>,
        task: ScheduledTask,
    ) -> Result<ScheduledHandle> {
        // ---
        let handle = ScheduledHandle::detached();
        let first = trigger.next_delay();
        self.recurring.lock().unwrap().push(Recurring {
            trigger,
            task,
            handle: handle.clone(),
            delays: vec![first],
        });
        Ok(handle)
    }
}

// ---------------------------------------------------------------------------
// FlakyManifest
// ---------------------------------------------------------------------------

/// Directory manifest service whose first `failures` snapshots fail.
pub struct FlakyManifest {
    // ---
    inner: DirectoryManifestService,
    failures: AtomicUsize,
    pub invalidations: AtomicUsize,
}

impl FlakyManifest {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: DirectoryManifestService::new(Duration::ZERO, false),
            failures: AtomicUsize::new(failures),
            invalidations: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ManifestService for FlakyManifest {
    // ---
    async fn snapshot(&self, root: &Path) -> Result<Arc<ManifestSnapshot>> {
        // ---
        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(FileStreamError::Manifest("simulated read failure".into()));
        }
        self.inner.snapshot(root).await
    }

    async fn invalidate(&self, root: &Path) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        self.inner.invalidate(root).await;
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    // ---
    pub service: FileStreamService,
    pub peer: LinkSimPeer,
    pub scheduler: Arc<ManualScheduler>,
    pub manifest: Arc<FlakyManifest>,
    pub dir: tempfile::TempDir,
}

impl Harness {
    // ---
    pub fn root(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    pub fn write(&self, name: &str, contents: &[u8]) {
        std::fs::write(self.dir.path().join(name), contents).unwrap();
    }

    pub async fn start(&self) {
        self.service.start("job-1", self.root()).await.unwrap();
    }

    /// Poll until no transfer is active and every permit is back.
    pub async fn settle_transfers(&self, capacity: usize) {
        // ---
        tokio::time::timeout(TIMEOUT, async {
            while self.service.active_transfers() != 0 || self.service.available_permits() != capacity {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("transfers did not settle");
    }
}

// ---

pub fn config(max_transfers: usize, chunk: usize) -> FileStreamConfig {
    // ---
    FileStreamConfig {
        push_backoff: BackoffConfig {
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            factor: 2.0,
            delay_type: DelayType::FromPreviousExecutionBegin,
        },
        max_concurrent_transfers: max_transfers,
        chunk_max_bytes: chunk,
        drain_timeout: Duration::from_millis(200),
        drain_poll_interval: Duration::from_millis(10),
        enable_compression: true,
    }
}

// ---

pub fn harness(config: FileStreamConfig) -> Harness {
    harness_with(config, 0)
}

pub fn harness_with(config: FileStreamConfig, manifest_failures: usize) -> Harness {
    build(config, LinkSimConfig::perfect(), manifest_failures)
}

pub fn harness_on(config: FileStreamConfig, link: LinkSimConfig) -> Harness {
    build(config, link, 0)
}

fn build(config: FileStreamConfig, link: LinkSimConfig, manifest_failures: usize) -> Harness {
    // ---
    let (session, peer) = LinkSimSession::pair(link);
    let scheduler = Arc::new(ManualScheduler::default());
    let manifest = Arc::new(FlakyManifest::new(manifest_failures));

    let service = FileStreamService::new(
        config,
        FileStreamDeps {
            session: Arc::new(session),
            manifest: manifest.clone(),
            codec: Arc::new(JsonManifestCodec),
            scheduler: scheduler.clone(),
        },
    )
    .unwrap();

    Harness {
        service,
        peer,
        scheduler,
        manifest,
        dir: tempfile::tempdir().unwrap(),
    }
}
