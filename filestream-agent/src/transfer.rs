//! Transfer engine: one file-fetch request, start to finish, on its own
//! transfer channel.
//!
//! # Lifecycle
//!
//! ```text
//! Created ──open_transfer──► Streaming ──complete_transfer──► Completed
//! ```
//!
//! Each engine runs as a tokio task that exclusively owns its channel sink,
//! inbound ack receiver and file handle. The only state visible outside the
//! task is [`TransferHandle`]: the one-shot `completed` flag and the recorded
//! terminal outcome.
//!
//! # Completion
//!
//! [`TransferHandle::complete`] may be called from any task (the engine on
//! ack or I/O failure, the control actor on shutdown). The first caller wins
//! an atomic compare-and-set; it records the outcome, removes the transfer
//! from the [`TransferRegistry`], releases the admission permit and wakes the
//! engine. The engine then performs the channel-side signal (normal or
//! error completion) and exits. Every later call is a no-op.
//!
//! The completed flag is re-checked immediately before every chunk send, so
//! once a completion is recorded no further chunk goes out.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

// ---

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Notify;
use uuid::Uuid;

// ---

use filestream_domain::{
    // ---
    ChannelEvent,
    ChunkAck,
    FileChunk,
    FileStreamError,
    FileStreamSessionPtr,
    InboundRx,
    Result,
    TransferChannel,
    TransferSinkPtr,
};

// ---

use super::TransferPermit;

// ---------------------------------------------------------------------------
// TransferRequest
// ---------------------------------------------------------------------------

/// An admitted file-fetch request, already resolved against the job root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    // ---
    pub stream_id: String,
    pub absolute_path: PathBuf,
    pub start_offset: u64,

    /// Exclusive.
    pub end_offset: u64,
}

// ---------------------------------------------------------------------------
// Terminal outcome
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Terminal {
    // ---
    /// Signal completion on the channel. `false` when the peer already tore
    /// its side down.
    close_channel: bool,

    /// `Some` selects error completion.
    error: Option<String>,
}

// ---------------------------------------------------------------------------
// TransferShared
// ---------------------------------------------------------------------------

struct TransferShared {
    // ---
    id: Uuid,
    stream_id: String,

    completed: AtomicBool,

    /// Written once by the completion winner, taken once by the engine.
    terminal: Mutex<Option<Terminal>>,

    permit: Mutex<Option<TransferPermit>>,
    registry: Weak<TransferRegistry>,

    /// Wakes the engine task after a completion recorded elsewhere.
    wake: Notify,
}

// ---------------------------------------------------------------------------
// TransferHandle
// ---------------------------------------------------------------------------

/// Shared view of one running transfer.
#[derive(Clone)]
pub struct TransferHandle {
    // ---
    shared: Arc<TransferShared>,
}

// ---

impl TransferHandle {
    // ---
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    // ---

    pub fn stream_id(&self) -> &str {
        &self.shared.stream_id
    }

    // ---

    pub fn is_completed(&self) -> bool {
        self.shared.completed.load(Ordering::Acquire)
    }

    // ---

    /// Terminal transition. Returns `true` only for the call that won.
    ///
    /// With `close_channel` the engine signals normal completion (no error)
    /// or error completion (error present) to the peer. Without it nothing
    /// further is sent; the channel is assumed gone.
    pub fn complete(&self, close_channel: bool, error: Option<FileStreamError>) -> bool {
        // ---
        let shared = &self.shared;
        if shared
            .completed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        match &error {
            None => tracing::debug!(stream_id = %shared.stream_id, close_channel, "transfer: completed"),
            Some(e) => tracing::warn!(stream_id = %shared.stream_id, close_channel, "transfer: failed: {e}"),
        }

        *shared.terminal.lock().unwrap_or_else(PoisonError::into_inner) = Some(Terminal {
            close_channel,
            error: error.map(|e| e.to_string()),
        });

        if let Some(registry) = shared.registry.upgrade() {
            registry.remove(&shared.id);
        }
        drop(shared.permit.lock().unwrap_or_else(PoisonError::into_inner).take());

        shared.wake.notify_one();
        true
    }

    // ---

    fn take_terminal(&self) -> Option<Terminal> {
        self.shared
            .terminal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

// ---------------------------------------------------------------------------
// TransferRegistry
// ---------------------------------------------------------------------------

/// The active transfer set.
///
/// A transfer is a member from the moment its engine is spawned until its
/// terminal transition. Used for shutdown enumeration only; the engines do
/// not consult it.
#[derive(Default)]
pub struct TransferRegistry {
    // ---
    inner: Mutex<HashMap<Uuid, TransferHandle>>,
}

// ---

impl TransferRegistry {
    // ---
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    // ---

    fn insert(&self, handle: TransferHandle) {
        self.lock().insert(handle.id(), handle);
    }

    // ---

    /// Remove `id`; `None` if it already left the set.
    pub fn remove(&self, id: &Uuid) -> Option<TransferHandle> {
        self.lock().remove(id)
    }

    // ---

    /// Point-in-time copy of the members.
    pub fn snapshot(&self) -> Vec<TransferHandle> {
        self.lock().values().cloned().collect()
    }

    // ---

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    // ---

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // ---

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, TransferHandle>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// TransferEngine
// ---------------------------------------------------------------------------

pub struct TransferEngine {
    // ---
    handle: TransferHandle,
    request: TransferRequest,

    /// Next unread byte offset. Starts at `start_offset`.
    watermark: u64,

    sink: TransferSinkPtr,
    inbound: InboundRx<ChunkAck>,

    /// Opened on the first read, positioned at the watermark thereafter.
    file: Option<File>,

    /// Reused for every chunk of this transfer.
    buf: Vec<u8>,
}

// ---

impl TransferEngine {
    // ---
    /// Register the transfer and run it to completion on a new task.
    ///
    /// The transfer is in `registry` before this returns. Its transfer
    /// channel is opened on the spawned task; an open failure completes the
    /// transfer with that error and nothing is sent. A transfer completed
    /// before its open finishes never gets a channel.
    pub fn spawn(
        session: FileStreamSessionPtr,
        request: TransferRequest,
        permit: TransferPermit,
        registry: &Arc<TransferRegistry>,
        chunk_max_bytes: usize,
    ) -> TransferHandle {
        // ---
        let handle = TransferHandle {
            shared: Arc::new(TransferShared {
                id: Uuid::new_v4(),
                stream_id: request.stream_id.clone(),
                completed: AtomicBool::new(false),
                terminal: Mutex::new(None),
                permit: Mutex::new(Some(permit)),
                registry: Arc::downgrade(registry),
                wake: Notify::new(),
            }),
        };
        registry.insert(handle.clone());

        let task_handle = handle.clone();
        tokio::spawn(async move {
            // ---
            // Completed before the channel exists: never open one.
            if task_handle.is_completed() {
                return;
            }
            let opened = tokio::select! {
                biased;
                _ = task_handle.shared.wake.notified() => None,
                opened = session.open_transfer() => Some(opened),
            };
            let Some(opened) = opened else {
                tracing::debug!(stream_id = %request.stream_id, "transfer: completed while opening");
                return;
            };

            let channel = match opened {
                Ok(channel) => channel,
                Err(e) => {
                    tracing::warn!(stream_id = %request.stream_id, "transfer: open failed: {e}");
                    task_handle.complete(false, Some(e));
                    return;
                }
            };
            TransferEngine::new(task_handle, request, channel, chunk_max_bytes)
                .run()
                .await;
        });

        handle
    }

    // ---

    fn new(
        handle: TransferHandle,
        request: TransferRequest,
        channel: TransferChannel,
        chunk_max_bytes: usize,
    ) -> Self {
        // ---
        let range_len = request.end_offset.saturating_sub(request.start_offset);
        let buf_len = (chunk_max_bytes as u64).min(range_len) as usize;

        Self {
            handle,
            watermark: request.start_offset,
            request,
            sink: channel.sink,
            inbound: channel.inbound,
            file: None,
            buf: vec![0; buf_len],
        }
    }

    // ---

    async fn run(mut self) {
        // ---
        tracing::debug!(
            stream_id = %self.request.stream_id,
            start = self.request.start_offset,
            end = self.request.end_offset,
            "transfer: streaming",
        );

        self.send_chunk().await;

        loop {
            if self.handle.is_completed() {
                match self.handle.take_terminal() {
                    Some(terminal) => {
                        self.finish(terminal).await;
                        return;
                    }
                    // Completion recorded but the outcome is not stored yet;
                    // the winner notifies right after storing it.
                    None => {
                        self.handle.shared.wake.notified().await;
                        continue;
                    }
                }
            }

            tokio::select! {
                event = self.inbound.recv() => match event {
                    Some(ChannelEvent::Message(ChunkAck {})) => self.on_acknowledgement().await,
                    Some(ChannelEvent::Error(reason)) => {
                        tracing::warn!(stream_id = %self.request.stream_id, %reason, "transfer: peer error");
                        self.handle.complete(false, Some(FileStreamError::Transport(reason)));
                    }
                    Some(ChannelEvent::Completed) => {
                        tracing::debug!(stream_id = %self.request.stream_id, "transfer: peer closed channel");
                        self.handle.complete(false, None);
                    }
                    None => {
                        self.handle.complete(false, Some(FileStreamError::ChannelClosed));
                    }
                },
                _ = self.handle.shared.wake.notified() => {}
            }
        }
    }

    // ---

    async fn on_acknowledgement(&mut self) {
        // ---
        tracing::trace!(stream_id = %self.request.stream_id, watermark = self.watermark, "transfer: ack");
        self.send_chunk().await;
    }

    // ---

    /// Send the next chunk of the range, or complete normally when the
    /// watermark has reached `end_offset`.
    async fn send_chunk(&mut self) {
        // ---
        if self.handle.is_completed() {
            return;
        }

        if self.watermark >= self.request.end_offset {
            self.handle.complete(true, None);
            return;
        }

        let bytes = match self.read_next().await {
            Ok(n) => n,
            Err(e) => {
                self.handle.complete(true, Some(e));
                return;
            }
        };

        if self.handle.is_completed() {
            return;
        }

        let chunk = FileChunk {
            stream_id: self.request.stream_id.clone(),
            data: self.buf[..bytes].to_vec(),
        };

        match self.sink.send(chunk).await {
            Ok(()) => {
                tracing::debug!(
                    stream_id = %self.request.stream_id,
                    offset = self.watermark,
                    bytes,
                    "transfer: chunk sent",
                );
                self.watermark += bytes as u64;
            }
            Err(e) => {
                self.handle.complete(true, Some(e));
            }
        }
    }

    // ---

    /// Fill the buffer with up to `min(buf.len(), end_offset - watermark)`
    /// bytes starting at the watermark. Returns how many were read.
    async fn read_next(&mut self) -> Result<usize> {
        // ---
        let remaining = self.request.end_offset - self.watermark;
        let want = (self.buf.len() as u64).min(remaining) as usize;

        let mut file = match self.file.take() {
            Some(file) => file,
            None => {
                let mut file = File::open(&self.request.absolute_path).await?;
                file.seek(SeekFrom::Start(self.watermark)).await?;
                file
            }
        };

        let mut filled = 0;
        while filled < want {
            let n = file.read(&mut self.buf[filled..want]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        self.file = Some(file);

        if filled == 0 {
            return Err(FileStreamError::UnexpectedEof {
                path: self.request.absolute_path.clone(),
                offset: self.watermark,
            });
        }
        Ok(filled)
    }

    // ---

    async fn finish(mut self, terminal: Terminal) {
        // ---
        if terminal.close_channel {
            let result = match &terminal.error {
                None => self.sink.complete().await,
                Some(reason) => self.sink.fail(reason).await,
            };
            if let Err(e) = result {
                tracing::debug!(stream_id = %self.request.stream_id, "transfer: close signal not delivered: {e}");
            }
        }

        tracing::debug!(
            stream_id = %self.request.stream_id,
            bytes = self.watermark - self.request.start_offset,
            "transfer: exit",
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use filestream_domain::FileStreamSession;
    use filestream_link_sim::{LinkSimConfig, LinkSimSession, PeerTransferChannel, TransferOutcome};

    use super::super::AdmissionGate;
    use super::*;

    struct Fixture {
        // ---
        _dir: tempfile::TempDir,
        path: PathBuf,
        session: FileStreamSessionPtr,
        peer: filestream_link_sim::LinkSimPeer,
        gate: AdmissionGate,
        registry: Arc<TransferRegistry>,
    }

    fn fixture(contents: &[u8]) -> Fixture {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, contents).unwrap();

        let (session, peer) = LinkSimSession::pair(LinkSimConfig::perfect());
        Fixture {
            _dir: dir,
            path,
            session: Arc::new(session),
            peer,
            gate: AdmissionGate::new(1, Duration::from_millis(10)),
            registry: TransferRegistry::new(),
        }
    }

    fn start(fx: &Fixture, start: u64, end: u64, chunk: usize) -> TransferHandle {
        // ---
        let request = TransferRequest {
            stream_id: "s1".into(),
            absolute_path: fx.path.clone(),
            start_offset: start,
            end_offset: end,
        };
        let permit = fx.gate.try_acquire().unwrap();
        TransferEngine::spawn(fx.session.clone(), request, permit, &fx.registry, chunk)
    }

    async fn expect_chunk(peer: &mut PeerTransferChannel) -> Vec<u8> {
        match peer.recv().await {
            Some(ChannelEvent::Message(chunk)) => {
                assert_eq!(chunk.stream_id, "s1");
                chunk.data
            }
            other => panic!("expected chunk, got {other:?}"),
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // ---

    #[tokio::test]
    async fn ten_bytes_in_chunks_of_four_are_ack_gated() {
        // ---
        let mut fx = fixture(b"0123456789");
        let handle = start(&fx, 0, 10, 4);
        assert_eq!(fx.registry.len(), 1);

        let mut peer = fx.peer.next_transfer().await.unwrap();

        assert_eq!(expect_chunk(&mut peer).await, b"0123");
        settle().await;
        assert!(peer.try_recv().is_none(), "second chunk must wait for an ack");

        peer.ack();
        assert_eq!(expect_chunk(&mut peer).await, b"4567");
        settle().await;
        assert!(peer.try_recv().is_none());

        peer.ack();
        assert_eq!(expect_chunk(&mut peer).await, b"89");

        peer.ack();
        assert_eq!(peer.recv().await, Some(ChannelEvent::Completed));

        assert!(handle.is_completed());
        assert!(fx.registry.is_empty());
        assert_eq!(fx.gate.available(), 1);
    }

    // ---

    #[tokio::test]
    async fn sub_range_is_delivered_byte_exact() {
        // ---
        let contents: Vec<u8> = (0u8..=255).cycle().take(1000).collect();
        let mut fx = fixture(&contents);
        start(&fx, 17, 1000, 64);

        let mut peer = fx.peer.next_transfer().await.unwrap();
        let (chunks, outcome) = peer.receive_all().await;

        assert_eq!(outcome, TransferOutcome::Completed);
        assert!(chunks.iter().all(|c| c.data.len() <= 64));
        let delivered: Vec<u8> = chunks.into_iter().flat_map(|c| c.data).collect();
        assert_eq!(delivered, contents[17..1000]);
    }

    // ---

    #[tokio::test]
    async fn empty_range_completes_without_chunks() {
        // ---
        let mut fx = fixture(b"0123456789");
        start(&fx, 5, 5, 4);

        let mut peer = fx.peer.next_transfer().await.unwrap();
        assert_eq!(peer.recv().await, Some(ChannelEvent::Completed));
        assert!(fx.registry.is_empty());
        assert_eq!(fx.gate.available(), 1);
    }

    // ---

    #[tokio::test]
    async fn range_past_end_of_file_fails_after_last_byte() {
        // ---
        let mut fx = fixture(b"0123456789");
        start(&fx, 0, 20, 4);

        let mut peer = fx.peer.next_transfer().await.unwrap();
        let (chunks, outcome) = peer.receive_all().await;

        let delivered: Vec<u8> = chunks.into_iter().flat_map(|c| c.data).collect();
        assert_eq!(delivered, b"0123456789");
        match outcome {
            TransferOutcome::Failed(reason) => assert!(reason.contains("unexpected end of file")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    // ---

    #[tokio::test]
    async fn peer_error_completes_without_close_signal() {
        // ---
        let mut fx = fixture(b"0123456789");
        let handle = start(&fx, 0, 10, 4);

        let mut peer = fx.peer.next_transfer().await.unwrap();
        expect_chunk(&mut peer).await;
        peer.fail("disk full");

        assert_eq!(peer.recv().await, None, "no signal after a peer error");
        assert!(handle.is_completed());
        assert!(fx.registry.is_empty());
        assert_eq!(fx.gate.available(), 1);
    }

    // ---

    #[tokio::test]
    async fn forced_completion_wins_once_and_stops_sending() {
        // ---
        let mut fx = fixture(b"0123456789");
        let handle = start(&fx, 0, 10, 4);

        let mut peer = fx.peer.next_transfer().await.unwrap();
        expect_chunk(&mut peer).await;

        assert!(handle.complete(true, Some(FileStreamError::Interrupted("stopping".into()))));
        assert!(!handle.complete(true, None), "second completion must lose");
        assert!(fx.registry.is_empty());
        assert_eq!(fx.gate.available(), 1);

        match peer.recv().await {
            Some(ChannelEvent::Error(reason)) => assert!(reason.contains("stopping")),
            other => panic!("expected error completion, got {other:?}"),
        }

        peer.ack();
        settle().await;
        assert_eq!(peer.try_recv(), None);
    }

    // ---

    /// Session whose transfer opens never finish. Counts opens started and
    /// opens abandoned.
    #[derive(Default)]
    struct StallingSession {
        // ---
        started: AtomicUsize,
        abandoned: Arc<AtomicUsize>,
    }

    struct AbandonGuard(Arc<AtomicUsize>);

    impl Drop for AbandonGuard {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl FileStreamSession for StallingSession {
        // ---
        async fn open_control(&self, _compression: bool) -> Result<filestream_domain::ControlChannel> {
            Err(FileStreamError::Transport("unused".into()))
        }

        async fn open_transfer(&self) -> Result<TransferChannel> {
            // ---
            self.started.fetch_add(1, Ordering::SeqCst);
            let _guard = AbandonGuard(Arc::clone(&self.abandoned));
            std::future::pending().await
        }
    }

    fn stalled_request() -> TransferRequest {
        TransferRequest {
            stream_id: "s1".into(),
            absolute_path: PathBuf::from("/nonexistent"),
            start_offset: 0,
            end_offset: 3,
        }
    }

    #[tokio::test]
    async fn completed_before_open_never_opens() {
        // ---
        let session = Arc::new(StallingSession::default());
        let gate = AdmissionGate::new(1, Duration::from_millis(10));
        let registry = TransferRegistry::new();

        let handle = TransferEngine::spawn(
            session.clone(),
            stalled_request(),
            gate.try_acquire().unwrap(),
            &registry,
            4,
        );
        assert!(handle.complete(true, Some(FileStreamError::Interrupted("stopping".into()))));

        settle().await;
        assert_eq!(session.started.load(Ordering::SeqCst), 0);
        assert!(registry.is_empty());
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn completion_abandons_an_open_in_flight() {
        // ---
        let session = Arc::new(StallingSession::default());
        let gate = AdmissionGate::new(1, Duration::from_millis(10));
        let registry = TransferRegistry::new();

        let handle = TransferEngine::spawn(
            session.clone(),
            stalled_request(),
            gate.try_acquire().unwrap(),
            &registry,
            4,
        );
        settle().await;
        assert_eq!(session.started.load(Ordering::SeqCst), 1);

        assert!(handle.complete(true, Some(FileStreamError::Interrupted("stopping".into()))));
        settle().await;
        assert_eq!(session.abandoned.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
        assert_eq!(gate.available(), 1);
    }

    // ---

    #[tokio::test]
    async fn refused_transfer_channel_releases_permit() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"abc").unwrap();

        let (session, _peer) = LinkSimSession::pair(LinkSimConfig::refusing_transfers());
        let gate = AdmissionGate::new(1, Duration::from_millis(10));
        let registry = TransferRegistry::new();

        let request = TransferRequest {
            stream_id: "s1".into(),
            absolute_path: path,
            start_offset: 0,
            end_offset: 3,
        };
        let handle = TransferEngine::spawn(
            Arc::new(session),
            request,
            gate.try_acquire().unwrap(),
            &registry,
            4,
        );

        settle().await;
        assert!(handle.is_completed());
        assert!(registry.is_empty());
        assert_eq!(gate.available(), 1);
    }
}
