use tracing::warn;

use crate::ranges::{StringLayout, StringRange};

/// Pixel data for one string within the frame being assembled.
#[derive(Debug)]
pub struct StringBuffer {
    pub range: StringRange,
    data: Vec<u8>,
    /// Bytes written so far. Counts every accepted write, so a duplicate
    /// chunk can complete a frame early (leaving unsent bytes zero) or push
    /// the count past `data.len()`.
    filled: usize,
}

impl StringBuffer {
    fn new(range: StringRange) -> Self {
        Self {
            range,
            data: vec![0; range.len()],
            filled: 0,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn is_full(&self) -> bool {
        self.filled == self.data.len()
    }

    fn reset(&mut self) {
        self.data.fill(0);
        self.filled = 0;
    }
}

/// Result of handing one packet to the assembler.
#[derive(Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// No string range fully contains the packet; nothing was written.
    Unmatched,
    /// Written into the given string; the frame is still incomplete.
    Buffered { string_id: u32 },
    /// This write completed the frame. Holds the padded, concatenated payload.
    Completed(Vec<u8>),
}

/// Reassembles per-string fragments into whole frames.
///
/// # Frame Layout
/// A completed frame is every string's buffer in ascending id order, each
/// zero-padded or truncated to `max_bytes_per_string`.
#[derive(Debug)]
pub struct FrameAssembler {
    buffers: Vec<StringBuffer>,
    max_bytes_per_string: usize,
}

impl FrameAssembler {
    /// Allocates one zeroed buffer per learned string, sized to that string.
    pub fn new(layout: &StringLayout) -> Self {
        let mut buffers: Vec<StringBuffer> =
            layout.ranges.iter().copied().map(StringBuffer::new).collect();
        buffers.sort_by_key(|b| b.range.id);
        Self {
            buffers,
            max_bytes_per_string: layout.max_bytes_per_string,
        }
    }

    pub fn buffers(&self) -> &[StringBuffer] {
        &self.buffers
    }

    /// Copies `payload` into the first string whose range holds
    /// `[offset, offset + payload.len())` entirely.
    ///
    /// # Returns
    /// * `Unmatched` if the packet falls outside every range or straddles two
    /// * `Buffered` after a write that leaves some string incomplete
    /// * `Completed` after the write that fills every string; all buffers are
    ///   zeroed before returning
    pub fn write(&mut self, offset: u32, payload: &[u8]) -> WriteOutcome {
        let Some(buffer) = self
            .buffers
            .iter_mut()
            .find(|b| b.range.contains(offset, payload.len()))
        else {
            warn!(
                offset,
                length = payload.len(),
                "packet does not fit any string range; ignoring"
            );
            return WriteOutcome::Unmatched;
        };

        let rel = (offset - buffer.range.start) as usize;
        buffer.data[rel..rel + payload.len()].copy_from_slice(payload);
        buffer.filled += payload.len();
        let string_id = buffer.range.id;

        if !self.buffers.iter().all(StringBuffer::is_full) {
            return WriteOutcome::Buffered { string_id };
        }

        let frame = self.concat_padded();
        for buffer in &mut self.buffers {
            buffer.reset();
        }
        WriteOutcome::Completed(frame)
    }

    fn concat_padded(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(self.buffers.len() * self.max_bytes_per_string);
        for buffer in &self.buffers {
            frame.extend_from_slice(&pad_to(&buffer.data, self.max_bytes_per_string));
        }
        frame
    }
}

/// Zero-extends or truncates `data` to exactly `width` bytes.
pub fn pad_to(data: &[u8], width: usize) -> Vec<u8> {
    let mut out = data[..data.len().min(width)].to_vec();
    out.resize(width, 0);
    out
}
