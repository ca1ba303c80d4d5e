//! Frame codec
//!
//! Every persistent stream in the lake (data object rows, seek indexes,
//! journal payloads, index objects) is a sequence of frames:
//!
//! ```text
//! ┌───────────────┬───────────────┬──────────────────────────┐
//! │ Length: u32LE │ CRC32: u32LE  │ bincode payload (Length) │
//! └───────────────┴───────────────┴──────────────────────────┘
//! ```
//!
//! The CRC covers the payload only. A stream ends cleanly only on a frame
//! boundary; anything else is reported as corruption.

use std::io::{self, Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{LakeError, Result};

/// Length (4) + CRC (4)
pub const FRAME_HEADER_SIZE: usize = 8;

/// Upper bound on a single frame payload
pub const MAX_FRAME_SIZE: usize = 256 * 1024 * 1024;

/// Append one framed value to `buf`
pub fn encode_frame<T: Serialize>(value: &T, buf: &mut Vec<u8>) -> Result<usize> {
    let payload = bincode::serialize(value)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(LakeError::Serialization(format!(
            "frame of {} bytes exceeds limit",
            payload.len()
        )));
    }
    let crc = crc32fast::hash(&payload);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(&payload);
    Ok(FRAME_HEADER_SIZE + payload.len())
}

/// Frame a sequence of values into one buffer
pub fn encode_all<'a, T, I>(values: I) -> Result<Vec<u8>>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut buf = Vec::new();
    for v in values {
        encode_frame(v, &mut buf)?;
    }
    Ok(buf)
}

/// Decode every frame in `bytes`
pub fn decode_all<T: DeserializeOwned>(bytes: &[u8]) -> Result<Vec<T>> {
    let mut reader = FrameReader::new(bytes);
    let mut out = Vec::new();
    while let Some(v) = reader.read()? {
        out.push(v);
    }
    Ok(out)
}

// =============================================================================
// Writer
// =============================================================================

/// Writes framed values to an underlying stream, tracking the byte offset
pub struct FrameWriter<W: Write> {
    inner: W,
    position: u64,
    scratch: Vec<u8>,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            position: 0,
            scratch: Vec::new(),
        }
    }

    /// Write one value; returns the frame's size in bytes
    pub fn write<T: Serialize>(&mut self, value: &T) -> Result<usize> {
        self.scratch.clear();
        let n = encode_frame(value, &mut self.scratch)?;
        self.inner.write_all(&self.scratch)?;
        self.position += n as u64;
        Ok(n)
    }

    /// Bytes written so far
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

// =============================================================================
// Reader
// =============================================================================

/// Reads framed values until a clean end of stream
pub struct FrameReader<R: Read> {
    inner: R,
    position: u64,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, position: 0 }
    }

    /// Offset of the next frame relative to where reading started
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read the next raw payload, `None` at end of stream
    pub fn read_raw(&mut self) -> Result<Option<Vec<u8>>> {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        let got = read_full(&mut self.inner, &mut header)?;
        if got == 0 {
            return Ok(None);
        }
        if got < FRAME_HEADER_SIZE {
            return Err(LakeError::Corruption(format!(
                "truncated frame header at offset {}",
                self.position
            )));
        }

        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if len > MAX_FRAME_SIZE {
            return Err(LakeError::Corruption(format!(
                "frame length {} at offset {} exceeds limit",
                len, self.position
            )));
        }

        let mut payload = vec![0u8; len];
        if read_full(&mut self.inner, &mut payload)? < len {
            return Err(LakeError::Corruption(format!(
                "truncated frame at offset {}",
                self.position
            )));
        }
        if crc32fast::hash(&payload) != crc {
            return Err(LakeError::Corruption(format!(
                "checksum mismatch at offset {}",
                self.position
            )));
        }

        self.position += (FRAME_HEADER_SIZE + len) as u64;
        Ok(Some(payload))
    }

    /// Read and decode the next value, `None` at end of stream
    pub fn read<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        match self.read_raw()? {
            Some(payload) => Ok(Some(bincode::deserialize(&payload)?)),
            None => Ok(None),
        }
    }
}

/// Fill `buf` as far as the stream allows; returns the bytes read
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
