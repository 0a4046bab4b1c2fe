//! Receive loop.
//!
//! One task reads datagrams in arrival order and feeds them to a
//! [`CaptureSession`]. The wait for the next datagram races the cancellation
//! token and the nearest deadline (idle timeout or duration limit), so
//! shutdown is prompt without polling the socket on a timer.

use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::Path;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{CaptureConfig, CaptureLimits, MAX_DATAGRAM_LEN};
use crate::error::{CaptureError, Result};
use crate::recording::RecordingWriter;
use crate::session::{CaptureSession, CaptureSummary, TerminationReason};

/// Anything that yields datagrams one at a time.
#[async_trait]
pub trait DatagramSource: Send {
    /// Waits for the next datagram and copies it into `buf`.
    async fn recv_datagram(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

#[async_trait]
impl DatagramSource for UdpSocket {
    async fn recv_datagram(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (len, _peer) = self.recv_from(buf).await?;
        Ok(len)
    }
}

/// In-process feed. A closed channel behaves like a silent network.
#[async_trait]
impl DatagramSource for mpsc::Receiver<Vec<u8>> {
    async fn recv_datagram(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.recv().await {
            Some(datagram) => {
                let len = datagram.len().min(buf.len());
                buf[..len].copy_from_slice(&datagram[..len]);
                Ok(len)
            }
            None => std::future::pending().await,
        }
    }
}

enum Event {
    Cancelled,
    Deadline(TerminationReason),
    Received(io::Result<usize>),
}

/// Binds the UDP listener.
pub async fn bind_socket(addr: SocketAddr) -> Result<UdpSocket> {
    UdpSocket::bind(addr)
        .await
        .map_err(|source| CaptureError::Bind { addr, source })
}

/// Feeds datagrams from `source` into `session` until a termination condition.
///
/// # Returns
/// * `Ok(reason)` for an interrupt, idle timeout or duration limit
/// * `Err` for receive failures and fatal session errors
///
/// The session is left as is; call [`CaptureSession::terminate`] afterwards.
pub async fn run_capture<S, W>(
    source: &mut S,
    session: &mut CaptureSession<W>,
    limits: CaptureLimits,
    cancel: &CancellationToken,
) -> Result<TerminationReason>
where
    S: DatagramSource + ?Sized,
    W: Write,
{
    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
    let mut last_input = Instant::now();

    loop {
        let deadline = next_deadline(session, &limits, last_input);

        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => Event::Cancelled,
            reason = wait_for(deadline) => Event::Deadline(reason),
            received = source.recv_datagram(&mut buf) => Event::Received(received),
        };

        match event {
            Event::Cancelled => {
                info!("received interrupt, stopping capture");
                return Ok(TerminationReason::Interrupted);
            }
            Event::Deadline(reason) => {
                log_deadline(reason, &limits);
                return Ok(reason);
            }
            Event::Received(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
            Event::Received(Err(e)) => return Err(CaptureError::Receive(e)),
            Event::Received(Ok(len)) => {
                let now = Instant::now();
                last_input = now;
                session.handle_datagram(&buf[..len], now.into_std())?;

                if duration_limit(session, &limits).is_some_and(|at| now >= at) {
                    log_deadline(TerminationReason::DurationLimit, &limits);
                    return Ok(TerminationReason::DurationLimit);
                }
            }
        }
    }
}

fn duration_limit<W: Write>(session: &CaptureSession<W>, limits: &CaptureLimits) -> Option<Instant> {
    let started = session.started_at()?;
    let max = limits.max_duration?;
    Some(Instant::from_std(started) + max)
}

/// The idle timeout only runs once at least one frame is on disk.
fn next_deadline<W: Write>(
    session: &CaptureSession<W>,
    limits: &CaptureLimits,
    last_input: Instant,
) -> Option<(Instant, TerminationReason)> {
    let idle = (session.frames_written() > 0)
        .then(|| (last_input + limits.idle_timeout, TerminationReason::IdleTimeout));
    let limit = duration_limit(session, limits).map(|at| (at, TerminationReason::DurationLimit));

    match (idle, limit) {
        (Some(idle), Some(limit)) => Some(if limit.0 <= idle.0 { limit } else { idle }),
        (idle, limit) => idle.or(limit),
    }
}

async fn wait_for(deadline: Option<(Instant, TerminationReason)>) -> TerminationReason {
    match deadline {
        Some((at, reason)) => {
            sleep_until(at).await;
            reason
        }
        None => std::future::pending().await,
    }
}

fn log_deadline(reason: TerminationReason, limits: &CaptureLimits) {
    match reason {
        TerminationReason::IdleTimeout => info!(
            "no frames received for {}s, exiting",
            limits.idle_timeout.as_secs_f64()
        ),
        TerminationReason::DurationLimit => info!(
            "capture duration limit of {}s reached",
            limits.max_duration.unwrap_or_default().as_secs_f64()
        ),
        TerminationReason::Interrupted => {}
    }
}

/// Runs a whole capture: bind, record until a termination condition, flush.
pub async fn capture(config: &CaptureConfig, cancel: &CancellationToken) -> Result<CaptureSummary> {
    let mut socket = bind_socket(config.bind).await?;
    info!("listening for DDP packets on {} ...", config.bind);
    capture_from(&mut socket, config, cancel).await
}

/// Records from an already open source into `config.output`.
///
/// The output is flushed on every exit path, including errors, so frames
/// already written stay on disk.
pub async fn capture_from<S>(
    source: &mut S,
    config: &CaptureConfig,
    cancel: &CancellationToken,
) -> Result<CaptureSummary>
where
    S: DatagramSource + ?Sized,
{
    let writer = RecordingWriter::create(&config.output)?;
    info!(
        "will stop after learning string_len for {} LED string(s) (detected via PUSH packets)",
        config.number_of_strings
    );

    let mut session = CaptureSession::new(config.number_of_strings, writer);
    let reason = match run_capture(source, &mut session, config.limits(), cancel).await {
        Ok(reason) => reason,
        Err(e) => {
            if let Err(flush_err) = session.finish() {
                warn!(%flush_err, "failed to flush output after error");
            }
            return Err(with_output_path(e, &config.output));
        }
    };

    let summary = session.terminate(reason, Instant::now().into_std());
    session
        .finish()
        .map_err(|e| with_output_path(e, &config.output))?;
    Ok(summary)
}

/// Only the recording writes to a bare `Io` error, so attach its path.
fn with_output_path(err: CaptureError, path: &Path) -> CaptureError {
    match err {
        CaptureError::Io(source) => CaptureError::output(path, source),
        other => other,
    }
}
