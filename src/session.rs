//! Capture session: discovery, leading-empty skip, then frame capture.
//!
//! The session is a pure reducer over datagrams plus the recording sink.
//! It never reads the clock or the network; callers pass `now` with every
//! datagram so each phase can be driven deterministically in tests.

use std::fmt;
use std::io::Write;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::assembler::{FrameAssembler, WriteOutcome};
use crate::config::PROGRESS_EVERY_FRAMES;
use crate::error::{DecodeError, Result};
use crate::packet::{DdpHeader, DdpPacket};
use crate::ranges::{RangeLearner, StringLayout, StringRange};
use crate::recording::RecordingWriter;

/// Externally visible phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Discovering,
    LeadingEmptySkip,
    Capturing,
    Terminated,
}

enum State {
    Discovering(RangeLearner),
    LeadingEmptySkip(FrameAssembler),
    Capturing(FrameAssembler),
    Terminated,
}

/// Why a session ended. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    IdleTimeout,
    DurationLimit,
    Interrupted,
}

/// What a single datagram did to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketOutcome {
    /// Not a decodable DDP packet; discarded.
    Rejected(DecodeError),
    /// Seen during discovery without assigning a range.
    Learning,
    RangeAssigned(StringRange),
    /// All-zero payload before capture started.
    SkippedEmpty,
    Unmatched,
    Buffered { string_id: u32 },
    FrameCompleted { index: u64, timestamp_ms: u32 },
    /// Arrived after the session terminated.
    Ignored,
}

/// Per-session packet counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub packets: u64,
    pub rejected: u64,
    pub unmatched: u64,
    pub skipped_empty: u64,
}

/// End-of-session report.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSummary {
    pub reason: TerminationReason,
    pub frames: u64,
    pub elapsed: Duration,
    pub stats: SessionStats,
}

impl CaptureSummary {
    pub fn frames_per_second(&self) -> f64 {
        frames_per_second(self.frames, self.elapsed)
    }
}

impl fmt::Display for CaptureSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "captured {} frames in {:.1}ms",
            self.frames,
            self.elapsed.as_secs_f64() * 1_000.0
        )?;
        if self.frames > 0 {
            write!(f, " (average frame rate: {:.1} fps)", self.frames_per_second())?;
        }
        Ok(())
    }
}

fn frames_per_second(frames: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if frames == 0 || secs == 0.0 {
        0.0
    } else {
        frames as f64 / secs
    }
}

/// One capture run, from the first datagram to termination.
pub struct CaptureSession<W: Write> {
    state: State,
    writer: RecordingWriter<W>,
    layout: Option<StringLayout>,
    started_at: Option<Instant>,
    last_frame_at: Option<Instant>,
    stats: SessionStats,
}

impl<W: Write> CaptureSession<W> {
    pub fn new(number_of_strings: NonZeroUsize, writer: RecordingWriter<W>) -> Self {
        Self {
            state: State::Discovering(RangeLearner::new(number_of_strings.get())),
            writer,
            layout: None,
            started_at: None,
            last_frame_at: None,
            stats: SessionStats::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        match self.state {
            State::Discovering(_) => Phase::Discovering,
            State::LeadingEmptySkip(_) => Phase::LeadingEmptySkip,
            State::Capturing(_) => Phase::Capturing,
            State::Terminated => Phase::Terminated,
        }
    }

    /// Learned layout, once discovery has finished.
    pub fn layout(&self) -> Option<&StringLayout> {
        self.layout.as_ref()
    }

    /// When the first non-empty packet arrived.
    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn last_frame_at(&self) -> Option<Instant> {
        self.last_frame_at
    }

    pub fn frames_written(&self) -> u64 {
        self.writer.frames_written()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Processes one raw datagram received at `now`.
    ///
    /// Decode failures and unmatched packets are counted and reported in the
    /// outcome. Only output failures and an unrepresentable layout return
    /// `Err`.
    pub fn handle_datagram(&mut self, datagram: &[u8], now: Instant) -> Result<PacketOutcome> {
        if matches!(self.state, State::Terminated) {
            return Ok(PacketOutcome::Ignored);
        }

        let packet = match DdpPacket::parse(datagram) {
            Ok(packet) => packet,
            Err(err) => {
                self.stats.rejected += 1;
                warn!(%err, "skipping datagram");
                return Ok(PacketOutcome::Rejected(err));
            }
        };
        self.stats.packets += 1;

        if let State::Discovering(learner) = &mut self.state {
            log_header(self.stats.packets, &packet.header);
            let assigned = learner.observe(&packet.header);
            if !learner.is_complete() {
                return Ok(assigned.map_or(PacketOutcome::Learning, PacketOutcome::RangeAssigned));
            }
            self.finish_discovery()?;
        }

        if let State::LeadingEmptySkip(_) = self.state {
            if packet.payload.iter().all(|&b| b == 0) {
                self.stats.skipped_empty += 1;
                return Ok(PacketOutcome::SkippedEmpty);
            }
            info!(
                skipped = self.stats.skipped_empty,
                "skipped empty packets, starting real capture"
            );
            self.started_at = Some(now);
            self.last_frame_at = Some(now);
            if let State::LeadingEmptySkip(assembler) =
                std::mem::replace(&mut self.state, State::Terminated)
            {
                self.state = State::Capturing(assembler);
            }
        }

        let State::Capturing(assembler) = &mut self.state else {
            return Ok(PacketOutcome::Ignored);
        };

        match assembler.write(packet.header.offset, packet.payload) {
            WriteOutcome::Unmatched => {
                self.stats.unmatched += 1;
                Ok(PacketOutcome::Unmatched)
            }
            WriteOutcome::Buffered { string_id } => Ok(PacketOutcome::Buffered { string_id }),
            WriteOutcome::Completed(frame) => self.emit_frame(&frame, now),
        }
    }

    fn finish_discovery(&mut self) -> Result<()> {
        let State::Discovering(learner) = std::mem::replace(&mut self.state, State::Terminated)
        else {
            return Ok(());
        };
        let layout = learner.finish()?;
        self.writer.write_header(layout.max_pixels_per_string)?;
        info!(
            max_pixels_per_string = layout.max_pixels_per_string,
            max_bytes_per_string = layout.max_bytes_per_string,
            "waiting for non-empty packets to start capturing frames"
        );
        self.state = State::LeadingEmptySkip(FrameAssembler::new(&layout));
        self.layout = Some(layout);
        Ok(())
    }

    fn emit_frame(&mut self, frame: &[u8], now: Instant) -> Result<PacketOutcome> {
        let elapsed = self.elapsed_since_start(now);
        let timestamp_ms = u32::try_from(elapsed.as_millis()).unwrap_or(u32::MAX);
        self.writer.write_frame(timestamp_ms, frame)?;
        self.last_frame_at = Some(now);

        let index = self.writer.frames_written();
        trace!(index, elapsed_ms = timestamp_ms, "frame completed");
        if index % PROGRESS_EVERY_FRAMES == 0 {
            info!(
                "captured {} frames in {:.1}ms ({:.1} fps)",
                index,
                elapsed.as_secs_f64() * 1_000.0,
                frames_per_second(index, elapsed)
            );
        }
        Ok(PacketOutcome::FrameCompleted {
            index,
            timestamp_ms,
        })
    }

    fn elapsed_since_start(&self, now: Instant) -> Duration {
        self.started_at
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default()
    }

    /// Moves to `Terminated` and reports what was captured.
    ///
    /// For an idle timeout, elapsed time runs to the last completed frame so
    /// the idle wait does not dilute the frame rate.
    pub fn terminate(&mut self, reason: TerminationReason, now: Instant) -> CaptureSummary {
        self.state = State::Terminated;
        let end = match reason {
            TerminationReason::IdleTimeout => self.last_frame_at.unwrap_or(now),
            TerminationReason::DurationLimit | TerminationReason::Interrupted => now,
        };
        CaptureSummary {
            reason,
            frames: self.writer.frames_written(),
            elapsed: self.elapsed_since_start(end),
            stats: self.stats,
        }
    }

    /// Flushes the recording and returns the underlying sink.
    pub fn finish(self) -> Result<W> {
        self.writer.finish()
    }
}

fn log_header(seen: u64, header: &DdpHeader) {
    debug!(
        packet = seen,
        flags1 = header.flags1,
        version = header.version(),
        timecode_flag = header.has_timecode(),
        store = header.is_store(),
        reply = header.is_reply(),
        query = header.is_query(),
        push = header.is_push(),
        sequence = header.sequence(),
        data_type = header.data_type,
        id = header.source_id,
        offset = header.offset,
        length = header.length,
        timecode = ?header.timecode,
        "discovery packet"
    );
}
