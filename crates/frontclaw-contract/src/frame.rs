//! Length-prefixed frame codec for the sandbox stream.
//!
//! Wire format:
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │ 4 bytes: u32 big-endian length       │
//! ├──────────────────────────────────────┤
//! │ N bytes: JSON-encoded Envelope       │
//! └──────────────────────────────────────┘
//! ```

use crate::envelope::Envelope;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default per-frame ceiling. Chat payloads are small; anything near this is
/// a runaway plugin.
pub const DEFAULT_MAX_FRAME: usize = 4 * 1024 * 1024;

/// Hard ceiling regardless of configuration, to bound memory on a hostile
/// length prefix.
const MAX_FRAME_HARD_LIMIT: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("frame too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("invalid envelope: {0}")]
    Invalid(String),

    #[error("unexpected end of stream")]
    UnexpectedEof,
}

/// Reads envelopes from the worker side of the stream.
pub struct FrameReader<R> {
    reader: R,
    max_frame: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            max_frame: DEFAULT_MAX_FRAME,
        }
    }

    pub fn with_max_frame(reader: R, max_frame: usize) -> Self {
        Self { reader, max_frame }
    }

    /// Read the next envelope. Returns `Ok(None)` on clean EOF (stream closed
    /// between frames) and `Err(UnexpectedEof)` on a truncated frame.
    pub async fn read(&mut self) -> Result<Option<Envelope>, FrameError> {
        let mut len_buf = [0u8; 4];
        match self.reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(FrameError::Io(e)),
        }

        let length = u32::from_be_bytes(len_buf) as usize;
        if length > self.max_frame || length > MAX_FRAME_HARD_LIMIT {
            return Err(FrameError::TooLarge {
                size: length,
                max: self.max_frame.min(MAX_FRAME_HARD_LIMIT),
            });
        }

        let mut payload = vec![0u8; length];
        if let Err(e) = self.reader.read_exact(&mut payload).await {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                return Err(FrameError::UnexpectedEof);
            }
            return Err(FrameError::Io(e));
        }

        let envelope =
            serde_json::from_slice(&payload).map_err(|e| FrameError::Invalid(e.to_string()))?;
        Ok(Some(envelope))
    }
}

/// Writes envelopes to the worker side of the stream.
pub struct FrameWriter<W> {
    writer: W,
    max_frame: usize,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            max_frame: DEFAULT_MAX_FRAME,
        }
    }

    pub fn with_max_frame(writer: W, max_frame: usize) -> Self {
        Self { writer, max_frame }
    }

    pub async fn write(&mut self, envelope: &Envelope) -> Result<(), FrameError> {
        let bytes =
            serde_json::to_vec(envelope).map_err(|e| FrameError::Invalid(e.to_string()))?;

        if bytes.len() > self.max_frame || bytes.len() > MAX_FRAME_HARD_LIMIT {
            return Err(FrameError::TooLarge {
                size: bytes.len(),
                max: self.max_frame.min(MAX_FRAME_HARD_LIMIT),
            });
        }

        let len = bytes.len() as u32;
        self.writer.write_all(&len.to_be_bytes()).await?;
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
