//! Length-Prefixed Frame Encoding
//!
//! Provides message boundaries over the worker pipes. Decoding is two-staged:
//! rkyv validates the archived bytes, then the typed message validates its fields.

use crate::messages::{ProtocolError, WorkerMessage, WorkerRequest};
use rkyv::ser::serializers::AllocSerializer;
use rkyv::validation::validators::DefaultValidator;
use rkyv::{Archive, CheckBytes, Deserialize, Infallible, Serialize};
use std::io::{BufReader, BufWriter, Read, Write};
use thiserror::Error;

/// Maximum frame size (16 MB) to prevent memory exhaustion
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Errors that can occur during frame encoding/decoding
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Frame too large: {size} bytes (max {max} bytes)")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// The peer closed its end; for a worker pipe this means the process is gone.
    #[error("End of stream")]
    EndOfStream,
}

/// Write a message with length prefix to a writer
///
/// Frame format:
/// ```text
/// +----------------+------------------+
/// | length (4 LE)  | rkyv payload     |
/// +----------------+------------------+
/// ```
pub fn write_frame<W, T>(writer: &mut BufWriter<W>, message: &T) -> Result<(), FrameError>
where
    W: Write,
    T: Serialize<AllocSerializer<256>>,
{
    let bytes =
        rkyv::to_bytes::<_, 256>(message).map_err(|e| FrameError::Serialization(e.to_string()))?;

    let len = bytes.len();
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    writer.write_all(&(len as u32).to_le_bytes())?;
    writer.write_all(&bytes)?;
    // A frame sitting in the buffer is invisible to the peer
    writer.flush()?;

    Ok(())
}

/// Read a message with length prefix from a reader
pub fn read_frame<R, T>(reader: &mut BufReader<R>) -> Result<T, FrameError>
where
    R: Read,
    T: Archive,
    T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::EndOfStream);
        }
        Err(e) => return Err(FrameError::Io(e)),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }
    if len == 0 {
        return Err(FrameError::InvalidFrame("zero-length frame".to_string()));
    }

    let mut buf = rkyv::AlignedVec::with_capacity(len);
    buf.resize(len, 0);
    match reader.read_exact(&mut buf) {
        Ok(()) => {}
        // Peer died halfway through a frame
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::EndOfStream);
        }
        Err(e) => return Err(FrameError::Io(e)),
    }

    let archived = rkyv::check_archived_root::<T>(&buf)
        .map_err(|e| FrameError::Deserialization(e.to_string()))?;

    archived
        .deserialize(&mut Infallible)
        .map_err(|_| FrameError::Deserialization("archived value rejected".to_string()))
}

/// Frame writer wrapper for convenient message sending
pub struct FrameWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> FrameWriter<W> {
    /// Create a new frame writer
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(64 * 1024, writer),
        }
    }

    /// Write a message
    pub fn write<T>(&mut self, message: &T) -> Result<(), FrameError>
    where
        T: Serialize<AllocSerializer<256>>,
    {
        write_frame(&mut self.writer, message)
    }
}

/// Frame reader wrapper for convenient message receiving
pub struct FrameReader<R: Read> {
    reader: BufReader<R>,
}

impl<R: Read> FrameReader<R> {
    /// Create a new frame reader
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::with_capacity(64 * 1024, reader),
        }
    }

    /// Read a raw message without field validation
    pub fn read<T>(&mut self) -> Result<T, FrameError>
    where
        T: Archive,
        T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, Infallible>,
    {
        read_frame(&mut self.reader)
    }

    /// Read and validate the next request (worker side).
    pub fn read_request(&mut self) -> Result<WorkerRequest, FrameError> {
        let request: WorkerRequest = self.read()?;
        request.validate()?;
        Ok(request)
    }

    /// Read and validate the next worker message (supervisor side).
    pub fn read_message(&mut self) -> Result<WorkerMessage, FrameError> {
        let message: WorkerMessage = self.read()?;
        message.validate()?;
        Ok(message)
    }
}
