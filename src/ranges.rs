//! Passive discovery of LED string byte ranges.
//!
//! Senders flush each string with a push-flagged packet. Every push closes
//! the range that started at the previous push's end, so after `S` pushes the
//! address space `[0, total)` is split into `S` contiguous strings. The id a
//! sender reports in its header is ignored; ids are handed out in arrival
//! order starting at 1.

use tracing::{info, warn};

use crate::error::{CaptureError, Result};
use crate::packet::DdpHeader;

/// Bytes per pixel. Only RGB is supported.
pub const CHANNELS_PER_PIXEL: usize = 3;

/// One learned string: `[start, end)` in the packet offset space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringRange {
    pub id: u32,
    pub start: u32,
    pub end: u32,
}

impl StringRange {
    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// True if `[offset, offset + length)` lies entirely inside this range.
    pub fn contains(&self, offset: u32, length: usize) -> bool {
        offset >= self.start && offset as u64 + length as u64 <= self.end as u64
    }
}

/// Finalized discovery result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringLayout {
    pub ranges: Vec<StringRange>,
    pub max_pixels_per_string: u16,
    /// Padding/truncation width for every string in every frame.
    pub max_bytes_per_string: usize,
}

impl StringLayout {
    /// Size of one frame record payload, without the timestamp.
    pub fn frame_len(&self) -> usize {
        self.ranges.len() * self.max_bytes_per_string
    }
}

/// Assigns string ranges from push packets until `target` strings are known.
#[derive(Debug)]
pub struct RangeLearner {
    target: usize,
    next_start: u32,
    next_id: u32,
    ranges: Vec<StringRange>,
}

impl RangeLearner {
    pub fn new(target: usize) -> Self {
        Self {
            target,
            next_start: 0,
            next_id: 1,
            ranges: Vec::with_capacity(target),
        }
    }

    /// Feeds one decoded header. Returns the range assigned by it, if any.
    ///
    /// Non-push packets are ignored. A push ending exactly at the cursor
    /// assigns a zero-length range. A push ending before the cursor (an
    /// out-of-order flush) cannot form a range and is skipped.
    pub fn observe(&mut self, header: &DdpHeader) -> Option<StringRange> {
        if !header.is_push() || self.is_complete() {
            return None;
        }

        let end = match u32::try_from(header.end_offset()) {
            Ok(end) => end,
            Err(_) => {
                warn!(
                    offset = header.offset,
                    length = header.length,
                    "push packet ends past the 32-bit offset space; ignoring"
                );
                return None;
            }
        };
        if end < self.next_start {
            warn!(
                end,
                cursor = self.next_start,
                "push packet ends before the last string; ignoring"
            );
            return None;
        }

        let range = StringRange {
            id: self.next_id,
            start: self.next_start,
            end,
        };
        info!(
            id = range.id,
            start = range.start,
            end = range.end,
            length = range.len(),
            "assigned string range"
        );
        if range.len() % CHANNELS_PER_PIXEL != 0 {
            warn!(
                id = range.id,
                length = range.len(),
                "string length is not a whole number of RGB pixels"
            );
        }

        self.ranges.push(range);
        self.next_start = end;
        self.next_id += 1;
        Some(range)
    }

    pub fn is_complete(&self) -> bool {
        self.ranges.len() >= self.target
    }

    pub fn ranges(&self) -> &[StringRange] {
        &self.ranges
    }

    /// Computes the padding width from the widest string.
    ///
    /// Fails if the widest string holds more pixels than the 2-byte file
    /// header can express.
    pub fn finish(self) -> Result<StringLayout> {
        let max_len = self.ranges.iter().map(StringRange::len).max().unwrap_or(0);
        let max_pixels = max_len / CHANNELS_PER_PIXEL;
        let max_pixels_per_string = u16::try_from(max_pixels)
            .map_err(|_| CaptureError::LayoutTooWide { max_pixels })?;

        info!(strings = self.ranges.len(), "learned string ranges");
        for range in &self.ranges {
            info!(
                "  string {}: range=({},{}) length={}",
                range.id,
                range.start,
                range.end,
                range.len()
            );
        }

        Ok(StringLayout {
            ranges: self.ranges,
            max_pixels_per_string,
            max_bytes_per_string: max_pixels * CHANNELS_PER_PIXEL,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn push(offset: u32, length: u16) -> DdpHeader {
        DdpHeader::data(offset, length, true, 1)
    }

    #[test]
    fn test_single_push_learns_whole_string() {
        let mut learner = RangeLearner::new(1);
        let range = learner.observe(&push(0, 30)).unwrap();
        assert_eq!(range, StringRange { id: 1, start: 0, end: 30 });
        assert!(learner.is_complete());

        let layout = learner.finish().unwrap();
        assert_eq!(layout.max_pixels_per_string, 10);
        assert_eq!(layout.max_bytes_per_string, 30);
        assert_eq!(layout.frame_len(), 30);
    }

    #[test]
    fn test_ranges_chain_from_previous_push() {
        let mut learner = RangeLearner::new(2);
        // A non-push chunk inside string 1 does not close anything.
        assert!(learner.observe(&DdpHeader::data(0, 9, false, 1)).is_none());
        learner.observe(&push(9, 6));
        learner.observe(&push(15, 30));

        assert_eq!(
            learner.ranges(),
            &[
                StringRange { id: 1, start: 0, end: 15 },
                StringRange { id: 2, start: 15, end: 45 },
            ]
        );
    }

    #[test]
    fn test_reported_source_id_is_ignored() {
        let mut learner = RangeLearner::new(2);
        let mut first = push(0, 3);
        first.source_id = 9;
        let mut second = push(3, 3);
        second.source_id = 9;
        assert_eq!(learner.observe(&first).unwrap().id, 1);
        assert_eq!(learner.observe(&second).unwrap().id, 2);
    }

    #[test]
    fn test_push_ending_at_cursor_assigns_empty_range() {
        let mut learner = RangeLearner::new(2);
        learner.observe(&push(0, 45));
        let repeat = learner.observe(&push(0, 45)).unwrap();
        assert_eq!(repeat, StringRange { id: 2, start: 45, end: 45 });
        assert!(repeat.is_empty());
        assert!(learner.is_complete(), "two pushes must learn two strings");

        let layout = learner.finish().unwrap();
        assert_eq!(layout.ranges.len(), 2);
        assert_eq!(layout.max_pixels_per_string, 15);
    }

    #[test]
    fn test_push_ending_before_cursor_is_skipped() {
        let mut learner = RangeLearner::new(2);
        learner.observe(&push(0, 30));
        assert!(learner.observe(&push(0, 12)).is_none());
        assert_eq!(learner.ranges().len(), 1);
        assert!(!learner.is_complete());
    }

    #[test]
    fn test_padding_width_floors_to_whole_pixels() {
        let mut learner = RangeLearner::new(2);
        learner.observe(&push(0, 10));
        learner.observe(&push(10, 32));
        let layout = learner.finish().unwrap();
        assert_eq!(layout.max_pixels_per_string, 10);
        assert_eq!(layout.max_bytes_per_string, 30);
    }

    #[test]
    fn test_too_wide_layout_is_rejected() {
        let mut learner = RangeLearner::new(1);
        learner.observe(&DdpHeader::data(300_000, 1, true, 1));
        assert!(matches!(
            learner.finish(),
            Err(CaptureError::LayoutTooWide { max_pixels: 100_000 })
        ));
    }

    #[test]
    fn test_contains_requires_full_fit() {
        let range = StringRange { id: 2, start: 15, end: 45 };
        assert!(range.contains(15, 30));
        assert!(range.contains(20, 0));
        assert!(!range.contains(10, 10));
        assert!(!range.contains(40, 6));
        assert!(!range.contains(u32::MAX, 10));
    }

    proptest! {
        #[test]
        fn prop_learned_ranges_partition_the_stream(
            lengths in proptest::collection::vec(1u16..2000, 1..12)
        ) {
            let mut learner = RangeLearner::new(lengths.len());
            let mut offset = 0u32;
            for len in &lengths {
                learner.observe(&push(offset, *len));
                offset += *len as u32;
            }
            prop_assert!(learner.is_complete());

            let ranges = learner.ranges();
            prop_assert_eq!(ranges[0].start, 0);
            for pair in ranges.windows(2) {
                prop_assert_eq!(pair[1].start, pair[0].end);
                prop_assert_eq!(pair[1].id, pair[0].id + 1);
            }
            prop_assert_eq!(ranges[ranges.len() - 1].end, offset);
        }
    }
}
