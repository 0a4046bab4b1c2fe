//! End-to-end captures through the receive loop, read back from the file bytes.

use std::io::Cursor;
use std::num::NonZeroUsize;
use std::time::Duration;

use ddp_capture::packet::{encode_packet, DdpHeader};
use ddp_capture::recording::{FrameRecord, RecordingReader, RecordingWriter};
use ddp_capture::{run_capture, CaptureLimits, CaptureSession, Phase, TerminationReason};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn packet(offset: u32, payload: &[u8], push: bool) -> Vec<u8> {
    encode_packet(
        &DdpHeader::data(offset, payload.len() as u16, push, 1),
        payload,
    )
}

fn new_session(strings: usize) -> CaptureSession<Vec<u8>> {
    CaptureSession::new(
        NonZeroUsize::new(strings).unwrap(),
        RecordingWriter::new(Vec::new()),
    )
}

async fn run(
    session: &mut CaptureSession<Vec<u8>>,
    datagrams: Vec<Vec<u8>>,
    limits: CaptureLimits,
) -> TerminationReason {
    let (tx, mut rx) = mpsc::channel(datagrams.len().max(1));
    for datagram in datagrams {
        tx.send(datagram).await.unwrap();
    }
    let reason = run_capture(&mut rx, session, limits, &CancellationToken::new())
        .await
        .unwrap();
    drop(tx);
    reason
}

fn read_back(bytes: Vec<u8>, strings: usize) -> (u16, Vec<FrameRecord>) {
    let reader = RecordingReader::new(Cursor::new(bytes), strings).unwrap();
    let max_pixels = reader.max_pixels_per_string();
    let frames = reader.collect::<Result<Vec<_>, _>>().unwrap();
    (max_pixels, frames)
}

#[tokio::test(start_paused = true)]
async fn single_string_completes_on_full_packet() {
    let mut session = new_session(1);
    let reason = run(
        &mut session,
        vec![
            packet(0, &[0; 30], true),
            packet(0, &[4; 30], true),
        ],
        CaptureLimits::default(),
    )
    .await;
    assert_eq!(reason, TerminationReason::IdleTimeout);

    let (max_pixels, frames) = read_back(session.finish().unwrap(), 1);
    assert_eq!(max_pixels, 10);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].timestamp_ms, 0);
    assert_eq!(frames[0].payload, vec![4; 30]);
}

#[tokio::test(start_paused = true)]
async fn two_strings_reject_boundary_spanning_packet() {
    let mut session = new_session(2);
    let reason = run(
        &mut session,
        vec![
            packet(0, &[0; 15], true),
            packet(15, &[0; 30], true),
            packet(10, &[9; 10], false),
            packet(0, &[1; 15], true),
            packet(15, &[2; 30], true),
        ],
        CaptureLimits::default(),
    )
    .await;
    assert_eq!(reason, TerminationReason::IdleTimeout);
    assert_eq!(session.stats().unmatched, 1);

    let (max_pixels, frames) = read_back(session.finish().unwrap(), 2);
    assert_eq!(max_pixels, 10);
    assert_eq!(frames.len(), 1);

    let mut expected = vec![1u8; 15];
    expected.extend_from_slice(&[0; 15]);
    expected.extend_from_slice(&[2; 30]);
    assert_eq!(frames[0].payload, expected, "spanning packet must not leak into either string");
}

#[tokio::test(start_paused = true)]
async fn leading_empty_packets_do_not_start_the_clock() {
    let (tx, mut rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let mut session = new_session(1);

    let feeder = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tx.send(packet(0, &[0; 6], true)).await.unwrap();
            for _ in 0..3 {
                tokio::time::sleep(Duration::from_millis(100)).await;
                tx.send(packet(0, &[0; 6], true)).await.unwrap();
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            tx.send(packet(0, &[1; 6], true)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(40)).await;
            tx.send(packet(0, &[2; 6], true)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
            tx
        })
    };

    let reason = run_capture(&mut rx, &mut session, CaptureLimits::default(), &cancel)
        .await
        .unwrap();
    assert_eq!(reason, TerminationReason::Interrupted);
    assert_eq!(session.stats().skipped_empty, 4);
    drop(feeder.await.unwrap());

    let (_, frames) = read_back(session.finish().unwrap(), 1);
    let stamps: Vec<u32> = frames.iter().map(|f| f.timestamp_ms).collect();
    assert_eq!(stamps, vec![0, 40]);
}

#[tokio::test(start_paused = true)]
async fn idle_timeout_waits_five_seconds_after_last_input() {
    let (tx, mut rx) = mpsc::channel(16);
    let mut session = new_session(1);

    let feeder = tokio::spawn(async move {
        tx.send(packet(0, &[3; 3], true)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        tx.send(packet(0, &[4; 3], true)).await.unwrap();
        tx
    });

    let started = Instant::now();
    let reason = run_capture(
        &mut rx,
        &mut session,
        CaptureLimits::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    let waited = started.elapsed();
    drop(feeder.await.unwrap());

    assert_eq!(reason, TerminationReason::IdleTimeout);
    assert!(waited >= Duration::from_secs(8), "idle clock restarts on input, waited {waited:?}");

    let summary = session.terminate(reason, Instant::now().into_std());
    assert_eq!(summary.frames, 2);
    assert_eq!(summary.elapsed, Duration::from_secs(3));
    assert_eq!(session.phase(), Phase::Terminated);
}

#[tokio::test(start_paused = true)]
async fn duration_limit_wins_when_reached_first() {
    let mut session = new_session(1);
    let limits = CaptureLimits {
        max_duration: Some(Duration::from_secs(1)),
        ..CaptureLimits::default()
    };
    let reason = run(&mut session, vec![packet(0, &[5; 3], true)], limits).await;
    assert_eq!(reason, TerminationReason::DurationLimit);
}

#[tokio::test(start_paused = true)]
async fn short_payload_is_discarded_without_touching_buffers() {
    let mut truncated = packet(0, &[7; 20], false);
    truncated.truncate(truncated.len() - 5);

    let mut session = new_session(1);
    let reason = run(
        &mut session,
        vec![
            packet(0, &[0; 20], true),
            packet(0, &[1; 10], false),
            truncated,
            packet(10, &[2; 10], true),
        ],
        CaptureLimits::default(),
    )
    .await;
    assert_eq!(reason, TerminationReason::IdleTimeout);
    assert_eq!(session.stats().rejected, 1);

    let (_, frames) = read_back(session.finish().unwrap(), 1);
    assert_eq!(frames.len(), 1);
    let mut expected = vec![1u8; 10];
    expected.extend_from_slice(&[2; 8]);
    assert_eq!(frames[0].payload, expected, "20-byte string floors to 6 pixels");
}

#[tokio::test(start_paused = true)]
async fn malformed_datagrams_never_stop_the_loop() {
    let mut session = new_session(1);
    let reason = run(
        &mut session,
        vec![
            vec![],
            vec![0x41; 5],
            vec![0x51, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
            packet(0, &[8; 3], true),
        ],
        CaptureLimits::default(),
    )
    .await;
    assert_eq!(reason, TerminationReason::IdleTimeout);
    assert_eq!(session.stats().rejected, 3);
    assert_eq!(session.frames_written(), 1);
}
