//! Wire protocol between the process pool and its worker processes.
//!
//! Every message is a frame: a little-endian `u32` payload length followed
//! by a bincode-encoded [`WorkerMessage`].

use crate::error::{BenchError, Result};
use crate::task::{TaskOutcome, TaskSpec};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted frame payload (10 MiB).
pub const MAX_FRAME_LEN: usize = 10 * 1024 * 1024;

/// Messages exchanged with a worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerMessage {
    /// Run a task. `seq` is unique per connection.
    Submit {
        /// Connection-local sequence number.
        seq: u64,
        /// The task to run.
        task: TaskSpec,
    },
    /// Outcome of the task submitted with `seq`.
    Completed {
        /// Sequence number of the matching `Submit`.
        seq: u64,
        /// Task outcome.
        outcome: TaskOutcome,
    },
    /// Cancel running tasks and exit.
    Shutdown,
}

/// Writes one length-prefixed frame and flushes.
///
/// # Errors
///
/// Returns an error if encoding fails, the payload exceeds
/// [`MAX_FRAME_LEN`], or the writer fails.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let encoded = bincode::serialize(message)?;
    if encoded.len() > MAX_FRAME_LEN {
        return Err(BenchError::Protocol(format!(
            "Frame too large: {} bytes",
            encoded.len()
        )));
    }
    let len = u32::try_from(encoded.len())
        .map_err(|_| BenchError::Protocol("Frame length overflows u32".to_string()))?;

    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame.
///
/// Returns `Ok(None)` on a clean end of stream before a new frame starts.
///
/// # Errors
///
/// Returns an error on a truncated frame, an oversized length prefix, or an
/// undecodable payload.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(BenchError::Io(e)),
    }

    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(BenchError::Protocol(format!(
            "Frame too large: {len} bytes"
        )));
    }

    let mut buffer = vec![0u8; len];
    reader.read_exact(&mut buffer).await?;
    Ok(Some(bincode::deserialize(&buffer)?))
}
