//! Wire framing for filestream channels.
//!
//! Every channel is one bidirectional QUIC stream. Both directions carry a
//! sequence of frames with a fixed binary header:
//!
//! ```text
//! +-------+-------+-------+-------------------+-----------------------------+
//! | magic | ver   | kind  | payload_len (u32) | payload (payload_len bytes) |
//! | 0x46  | 0x01  |       | big-endian        |                             |
//! +-------+-------+-------+-------------------+-----------------------------+
//!   1 byte  1 byte  1 byte      4 bytes          variable
//!                 ← fixed 7 bytes →
//! ```
//!
//! The opener's first frame is a `HEADER` frame whose JSON payload names the
//! channel kind ([`ChannelHeader`]). After that, `MESSAGE` frames carry one
//! encoded message each. An `ERROR` frame (UTF-8 reason) followed by FIN is
//! error completion; FIN on a frame boundary alone is normal completion.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

// ---

use filestream_domain::{ChunkAck, FileChunk, ManifestPush, ServerControlMsg};

use crate::error::QuicError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic byte, 'F'. Lets the receiver detect misaligned reads.
pub const MAGIC: u8 = 0x46;

/// Wire format version. Bump when the fixed header layout changes.
pub const VERSION: u8 = 0x01;

/// magic(1) + ver(1) + kind(1) + payload_len(4).
pub const FIXED_HEADER_LEN: usize = 7;

/// Largest accepted payload. A chunk plus its stream id must fit.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

pub const KIND_HEADER: u8 = 0x00;
pub const KIND_MESSAGE: u8 = 0x01;
pub const KIND_ERROR: u8 = 0x02;

// ---------------------------------------------------------------------------
// ChannelHeader
// ---------------------------------------------------------------------------

/// First frame of every channel, written by the opener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum ChannelHeader {
    // ---
    Control { compression: bool },
    Transfer,
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    // ---
    pub kind: u8,
    pub payload: Vec<u8>,
}

// ---

/// Write one frame.
pub async fn write_frame<W>(stream: &mut W, kind: u8, payload: &[u8]) -> Result<(), QuicError>
where
    W: AsyncWrite + Unpin,
{
    // ---
    if payload.len() > MAX_FRAME_LEN {
        return Err(QuicError::Framing(format!(
            "payload of {} bytes exceeds {MAX_FRAME_LEN}",
            payload.len()
        )));
    }
    let payload_len = payload.len() as u32;

    let mut fixed = [0u8; FIXED_HEADER_LEN];
    fixed[0] = MAGIC;
    fixed[1] = VERSION;
    fixed[2] = kind;
    fixed[3..7].copy_from_slice(&payload_len.to_be_bytes());

    stream.write_all(&fixed).await?;
    stream.write_all(payload).await?;
    Ok(())
}

// ---

/// Read one frame. `Ok(None)` on a clean end of stream at a frame boundary.
pub async fn read_frame<R>(stream: &mut R) -> Result<Option<Frame>, QuicError>
where
    R: AsyncRead + Unpin,
{
    // ---
    let mut fixed = [0u8; FIXED_HEADER_LEN];
    let mut filled = 0;
    while filled < FIXED_HEADER_LEN {
        let n = stream.read(&mut fixed[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(QuicError::Framing("stream ended inside a frame header".into()));
        }
        filled += n;
    }

    if fixed[0] != MAGIC {
        return Err(QuicError::Framing(format!(
            "bad magic: expected 0x{MAGIC:02X}, got 0x{:02X}",
            fixed[0]
        )));
    }
    if fixed[1] != VERSION {
        return Err(QuicError::Framing(format!(
            "unsupported version: expected {VERSION}, got {}",
            fixed[1]
        )));
    }

    let payload_len = u32::from_be_bytes([fixed[3], fixed[4], fixed[5], fixed[6]]) as usize;
    if payload_len > MAX_FRAME_LEN {
        return Err(QuicError::Framing(format!(
            "frame of {payload_len} bytes exceeds {MAX_FRAME_LEN}"
        )));
    }

    let mut payload = vec![0u8; payload_len];
    stream.read_exact(&mut payload).await?;

    Ok(Some(Frame {
        kind: fixed[2],
        payload,
    }))
}

// ---

pub async fn write_header<W>(stream: &mut W, header: ChannelHeader) -> Result<(), QuicError>
where
    W: AsyncWrite + Unpin,
{
    // ---
    let payload = serde_json::to_vec(&header).map_err(|e| QuicError::Framing(e.to_string()))?;
    write_frame(stream, KIND_HEADER, &payload).await
}

// ---

pub async fn read_header<R>(stream: &mut R) -> Result<ChannelHeader, QuicError>
where
    R: AsyncRead + Unpin,
{
    // ---
    match read_frame(stream).await? {
        Some(Frame {
            kind: KIND_HEADER,
            payload,
        }) => serde_json::from_slice(&payload).map_err(|e| QuicError::Framing(e.to_string())),
        Some(frame) => Err(QuicError::Framing(format!(
            "expected channel header, got frame kind {}",
            frame.kind
        ))),
        None => Err(QuicError::Framing("stream ended before channel header".into())),
    }
}

// ---------------------------------------------------------------------------
// WireMessage
// ---------------------------------------------------------------------------

/// Payload encoding of one message type inside a `MESSAGE` frame.
///
/// Chunk and manifest payloads are binary (`u16` big-endian id length, id
/// bytes, then the raw data) so file bytes travel unescaped. Control
/// messages from the server are JSON.
pub trait WireMessage: Sized + Send + 'static {
    // ---
    fn encode(&self) -> Result<Vec<u8>, QuicError>;
    fn decode(payload: &[u8]) -> Result<Self, QuicError>;
}

// ---

fn encode_prefixed(id: &str, data: &[u8]) -> Result<Vec<u8>, QuicError> {
    // ---
    let id_len = u16::try_from(id.len())
        .map_err(|_| QuicError::Framing(format!("id of {} bytes is too long", id.len())))?;

    let mut out = Vec::with_capacity(2 + id.len() + data.len());
    out.extend_from_slice(&id_len.to_be_bytes());
    out.extend_from_slice(id.as_bytes());
    out.extend_from_slice(data);
    Ok(out)
}

// ---

fn decode_prefixed(payload: &[u8]) -> Result<(String, Vec<u8>), QuicError> {
    // ---
    let [hi, lo, rest @ ..] = payload else {
        return Err(QuicError::Framing("payload shorter than id length".into()));
    };
    let id_len = u16::from_be_bytes([*hi, *lo]) as usize;
    if rest.len() < id_len {
        return Err(QuicError::Framing("payload shorter than its id".into()));
    }
    let (id, data) = rest.split_at(id_len);
    let id = String::from_utf8(id.to_vec()).map_err(|e| QuicError::Framing(e.to_string()))?;
    Ok((id, data.to_vec()))
}

// ---

impl WireMessage for ManifestPush {
    // ---
    fn encode(&self) -> Result<Vec<u8>, QuicError> {
        encode_prefixed(&self.job_id, &self.manifest)
    }

    fn decode(payload: &[u8]) -> Result<Self, QuicError> {
        let (job_id, manifest) = decode_prefixed(payload)?;
        Ok(Self { job_id, manifest })
    }
}

// ---

impl WireMessage for FileChunk {
    // ---
    fn encode(&self) -> Result<Vec<u8>, QuicError> {
        encode_prefixed(&self.stream_id, &self.data)
    }

    fn decode(payload: &[u8]) -> Result<Self, QuicError> {
        let (stream_id, data) = decode_prefixed(payload)?;
        Ok(Self { stream_id, data })
    }
}

// ---

impl WireMessage for ChunkAck {
    // ---
    fn encode(&self) -> Result<Vec<u8>, QuicError> {
        Ok(Vec::new())
    }

    fn decode(_payload: &[u8]) -> Result<Self, QuicError> {
        Ok(ChunkAck {})
    }
}

// ---

impl WireMessage for ServerControlMsg {
    // ---
    fn encode(&self) -> Result<Vec<u8>, QuicError> {
        serde_json::to_vec(self).map_err(|e| QuicError::Framing(e.to_string()))
    }

    fn decode(payload: &[u8]) -> Result<Self, QuicError> {
        serde_json::from_slice(payload).map_err(|e| QuicError::Framing(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use filestream_domain::FileFetchRequest;

    use super::*;

    #[tokio::test]
    async fn frames_survive_a_byte_pipe_and_end_cleanly() {
        // ---
        let (mut a, mut b) = tokio::io::duplex(64);

        let writer = tokio::spawn(async move {
            write_header(&mut a, ChannelHeader::Control { compression: true })
                .await
                .unwrap();
            let chunk = FileChunk {
                stream_id: "s1".into(),
                data: vec![0, 159, 146, 150],
            };
            write_frame(&mut a, KIND_MESSAGE, &chunk.encode().unwrap())
                .await
                .unwrap();
            write_frame(&mut a, KIND_ERROR, b"disk gone").await.unwrap();
        });

        assert_eq!(
            read_header(&mut b).await.unwrap(),
            ChannelHeader::Control { compression: true }
        );

        let frame = read_frame(&mut b).await.unwrap().unwrap();
        assert_eq!(frame.kind, KIND_MESSAGE);
        let chunk = FileChunk::decode(&frame.payload).unwrap();
        assert_eq!(chunk.stream_id, "s1");
        assert_eq!(chunk.data, vec![0, 159, 146, 150]);

        let frame = read_frame(&mut b).await.unwrap().unwrap();
        assert_eq!(frame, Frame { kind: KIND_ERROR, payload: b"disk gone".to_vec() });

        writer.await.unwrap();
        assert_eq!(read_frame(&mut b).await.unwrap(), None);
    }

    // ---

    #[tokio::test]
    async fn bad_magic_is_rejected() {
        // ---
        let raw = [0x51u8, VERSION, KIND_MESSAGE, 0, 0, 0, 0];
        let err = read_frame(&mut &raw[..]).await.unwrap_err();
        assert!(err.to_string().contains("bad magic"), "got {err}");
    }

    // ---

    #[tokio::test]
    async fn truncated_header_is_an_error() {
        // ---
        let raw = [MAGIC, VERSION, KIND_MESSAGE];
        assert!(read_frame(&mut &raw[..]).await.is_err());
    }

    // ---

    #[test]
    fn control_messages_are_tagged_json() {
        // ---
        let msg = ServerControlMsg::FileRequest(FileFetchRequest {
            stream_id: "s9".into(),
            relative_path: "logs/out.txt".into(),
            start_offset: 0,
            end_offset: 100,
        });
        let payload = msg.encode().unwrap();
        let text = String::from_utf8(payload.clone()).unwrap();
        assert!(text.contains(r#""type":"FileRequest""#), "got {text}");
        assert_eq!(ServerControlMsg::decode(&payload).unwrap(), msg);
    }

    // ---

    #[test]
    fn short_prefixed_payload_is_rejected() {
        // ---
        assert!(FileChunk::decode(&[0]).is_err());
        assert!(FileChunk::decode(&[0, 5, b'a']).is_err());
    }
}
