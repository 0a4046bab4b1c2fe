//! Capture file format.
//!
//! ```text
//! u16 LE   max pixels per string
//! repeated:
//!   u32 LE   milliseconds since the first non-empty packet
//!   [u8]     strings * max_pixels * 3 bytes of RGB data
//! ```

use std::fs::File;
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use crate::error::{CaptureError, RecordingError, Result};
use crate::ranges::CHANNELS_PER_PIXEL;

/// Size of the file header.
pub const FILE_HEADER_LEN: usize = 2;

/// Size of the per-frame timestamp.
pub const TIMESTAMP_LEN: usize = 4;

/// Writes the capture header and frame records to any byte sink.
pub struct RecordingWriter<W: Write> {
    inner: W,
    header_written: bool,
    frames: u64,
}

impl RecordingWriter<BufWriter<File>> {
    /// Creates (or truncates) the output file and keeps it open for the session.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| CaptureError::output(path, e))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> RecordingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            header_written: false,
            frames: 0,
        }
    }

    /// Writes the 2-byte header. Later calls are no-ops.
    pub fn write_header(&mut self, max_pixels_per_string: u16) -> Result<()> {
        if self.header_written {
            return Ok(());
        }
        self.inner.write_all(&max_pixels_per_string.to_le_bytes())?;
        self.header_written = true;
        Ok(())
    }

    /// Appends one frame record.
    pub fn write_frame(&mut self, timestamp_ms: u32, payload: &[u8]) -> Result<()> {
        self.inner.write_all(&timestamp_ms.to_le_bytes())?;
        self.inner.write_all(payload)?;
        self.frames += 1;
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    /// Flushes buffered records and hands back the sink.
    pub fn finish(mut self) -> Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// One frame record read back from a capture file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRecord {
    pub timestamp_ms: u32,
    pub payload: Vec<u8>,
}

/// Reads a capture file. The string count is not stored in the file, so the
/// caller has to know it.
pub struct RecordingReader<R: Read> {
    inner: R,
    max_pixels_per_string: u16,
    frame_len: usize,
}

impl<R: Read> RecordingReader<R> {
    pub fn new(mut inner: R, strings: usize) -> Result<Self, RecordingError> {
        let mut header = [0u8; FILE_HEADER_LEN];
        inner.read_exact(&mut header).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => RecordingError::MissingHeader,
            _ => RecordingError::Io(e),
        })?;
        let max_pixels_per_string = u16::from_le_bytes(header);
        Ok(Self {
            inner,
            max_pixels_per_string,
            frame_len: strings * max_pixels_per_string as usize * CHANNELS_PER_PIXEL,
        })
    }

    pub fn max_pixels_per_string(&self) -> u16 {
        self.max_pixels_per_string
    }

    /// Payload bytes per frame record.
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Reads the next record, or `None` at a clean end of file.
    pub fn next_frame(&mut self) -> Result<Option<FrameRecord>, RecordingError> {
        let mut record = vec![0u8; TIMESTAMP_LEN + self.frame_len];
        let read = read_full(&mut self.inner, &mut record)?;
        if read == 0 {
            return Ok(None);
        }
        if read < record.len() {
            return Err(RecordingError::TruncatedRecord {
                expected: record.len(),
                actual: read,
            });
        }

        let payload = record.split_off(TIMESTAMP_LEN);
        let timestamp_ms = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
        Ok(Some(FrameRecord {
            timestamp_ms,
            payload,
        }))
    }
}

impl<R: Read> Iterator for RecordingReader<R> {
    type Item = Result<FrameRecord, RecordingError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}

/// Like `read_exact`, but reports how much was read before EOF.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}
