use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Control channel messages
// ---------------------------------------------------------------------------

/// Agent → peer on the control channel: one encoded directory manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestPush {
    // ---
    pub job_id: String,

    /// Codec output; opaque to the transport.
    pub manifest: Vec<u8>,
}

// ---

/// Peer → agent: stream the half-open byte range `[start_offset, end_offset)`
/// of `relative_path` on a fresh transfer channel tagged `stream_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFetchRequest {
    // ---
    /// Peer-assigned, unique per transfer.
    pub stream_id: String,

    /// Relative to the job root.
    pub relative_path: String,

    pub start_offset: u64,

    /// Exclusive.
    pub end_offset: u64,
}

// ---

impl FileFetchRequest {
    // ---
    /// Number of bytes the peer asked for, or `None` for an inverted range.
    pub fn range_len(&self) -> Option<u64> {
        self.end_offset.checked_sub(self.start_offset)
    }
}

// ---

/// Everything the peer may send on the control channel.
///
/// Variants this agent does not understand decode as [`ServerControlMsg::Unknown`]
/// and are logged and ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerControlMsg {
    // ---
    FileRequest(FileFetchRequest),

    #[serde(other)]
    Unknown,
}

// ---------------------------------------------------------------------------
// Transfer channel messages
// ---------------------------------------------------------------------------

/// Agent → peer on a transfer channel: the next slice of the requested range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChunk {
    // ---
    pub stream_id: String,
    pub data: Vec<u8>,
}

// ---

/// Peer → agent on a transfer channel: the previous chunk was accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkAck {}

// ---------------------------------------------------------------------------
// ChannelEvent
// ---------------------------------------------------------------------------

/// One notification delivered by either side of a channel.
///
/// `Error` and `Completed` are terminal: nothing follows them on the same
/// channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent<T> {
    // ---
    Message(T),
    Error(String),
    Completed,
}

// ---

impl<T> ChannelEvent<T> {
    // ---
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChannelEvent::Message(_))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
