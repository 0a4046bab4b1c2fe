//! Passive DDP capture.
//!
//! Listens to Distributed Display Protocol traffic, learns how many LED
//! strings are being driven and where each sits in the offset space, then
//! reassembles per-packet fragments into whole frames and records them with
//! millisecond timestamps.

pub mod assembler;
pub mod config;
pub mod driver;
pub mod error;
pub mod packet;
pub mod ranges;
pub mod recording;
pub mod session;

pub use config::{CaptureConfig, CaptureLimits};
pub use driver::{capture, capture_from, run_capture, DatagramSource};
pub use error::{CaptureError, DecodeError, RecordingError, Result};
pub use session::{CaptureSession, CaptureSummary, Phase, TerminationReason};
