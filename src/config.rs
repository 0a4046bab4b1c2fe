use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use crate::packet::DDP_PORT;

/// Capture ends after this long without input once a frame has been written.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Log a progress line every this many frames.
pub const PROGRESS_EVERY_FRAMES: u64 = 40;

/// Largest datagram we accept.
pub const MAX_DATAGRAM_LEN: usize = 65535;

/// Parameters for one capture session.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Number of strings to learn before capturing.
    pub number_of_strings: NonZeroUsize,
    pub output: PathBuf,
    /// Stop after this long since the first non-empty packet.
    pub max_duration: Option<Duration>,
    pub idle_timeout: Duration,
    pub bind: SocketAddr,
}

impl CaptureConfig {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            number_of_strings: NonZeroUsize::MIN,
            output: output.into(),
            max_duration: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DDP_PORT),
        }
    }

    /// The timing part of the config, as consumed by the receive loop.
    pub fn limits(&self) -> CaptureLimits {
        CaptureLimits {
            max_duration: self.max_duration,
            idle_timeout: self.idle_timeout,
        }
    }
}

/// Exit conditions checked by the receive loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureLimits {
    pub max_duration: Option<Duration>,
    pub idle_timeout: Duration,
}

impl Default for CaptureLimits {
    fn default() -> Self {
        Self {
            max_duration: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CaptureConfig::new("out.bin");
        assert_eq!(config.number_of_strings.get(), 1);
        assert_eq!(config.bind.port(), 4048);
        assert!(config.bind.ip().is_unspecified());
        assert_eq!(config.limits(), CaptureLimits::default());
    }
}
