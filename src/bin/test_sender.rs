use std::net::{IpAddr, SocketAddr};
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use ddp_capture::packet::{DdpSender, DDP_PORT};

#[derive(Parser)]
#[command(
    name = "test-sender",
    about = "Send a moving test pattern over DDP to exercise ddp-capture"
)]
struct Args {
    /// Receiver IP address
    #[arg(short = 't', long = "target", default_value = "127.0.0.1")]
    target: IpAddr,

    /// UDP port
    #[arg(short, long, default_value_t = DDP_PORT)]
    port: u16,

    /// Pixels per string; repeat for several strings (e.g. -l 50 -l 75)
    #[arg(short = 'l', long = "pixels", default_value = "50")]
    pixels: Vec<u32>,

    /// Frames per second
    #[arg(short, long, default_value_t = 40)]
    fps: u32,

    /// Number of frames to send
    #[arg(short = 'n', long, default_value_t = 200)]
    frames: u32,

    /// All-zero frames to send before the pattern
    #[arg(long, default_value_t = 5)]
    blank: u32,
}

fn main() {
    let args = Args::parse();

    let mut sender = DdpSender::new(SocketAddr::new(args.target, args.port))
        .expect("Failed to create UDP socket");
    println!(
        "Sending {} frames for {} string(s) to {}:{}",
        args.frames,
        args.pixels.len(),
        args.target,
        args.port
    );

    let frame_interval = Duration::from_secs_f64(1.0 / args.fps.max(1) as f64);
    let started = Instant::now();

    for i in 0..args.blank + args.frames {
        let blank = i < args.blank;
        let mut offset = 0u32;
        for (string, &pixels) in args.pixels.iter().enumerate() {
            let data = pattern(i, string, pixels, blank);
            if let Err(e) = sender.send_string(offset, &data) {
                eprintln!("UDP send error: {e}");
            }
            offset += pixels * 3;
        }
        thread::sleep(frame_interval);
    }

    let elapsed = started.elapsed();
    println!(
        "Sent {} frames in {:.1}ms",
        args.blank + args.frames,
        elapsed.as_secs_f64() * 1_000.0
    );
}

/// One lit pixel walking along each string, tinted per string.
fn pattern(frame: u32, string: usize, pixels: u32, blank: bool) -> Vec<u8> {
    let mut data = vec![0u8; pixels as usize * 3];
    if blank || pixels == 0 {
        return data;
    }
    let lit = (frame % pixels) as usize * 3;
    data[lit + string % 3] = 255;
    data
}
