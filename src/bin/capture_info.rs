use std::fs::File;
use std::io::BufReader;
use std::num::NonZeroUsize;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use ddp_capture::recording::RecordingReader;

#[derive(Parser)]
#[command(name = "capture-info", about = "Summarize a ddp-capture output file")]
struct Args {
    /// Capture file to read
    input: PathBuf,

    /// Number of strings the capture was taken with
    #[arg(short, long = "strings", default_value = "1")]
    strings: NonZeroUsize,

    /// Print every frame's timestamp
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let file = File::open(&args.input)
        .with_context(|| format!("failed to open {}", args.input.display()))?;
    let reader = RecordingReader::new(BufReader::new(file), args.strings.get())
        .context("failed to read capture header")?;

    println!("File:             {}", args.input.display());
    println!("Pixels/string:    {}", reader.max_pixels_per_string());
    println!("Bytes/frame:      {}", reader.frame_len());

    let mut frames = 0u64;
    let mut first_ms = None;
    let mut last_ms = 0u32;
    for (i, record) in reader.enumerate() {
        let record = record.with_context(|| format!("failed to read frame {}", i + 1))?;
        if args.verbose {
            let lit = record.payload.iter().filter(|&&b| b != 0).count();
            println!("  frame {:>6} @ {:>8}ms  {} non-zero bytes", i + 1, record.timestamp_ms, lit);
        }
        first_ms.get_or_insert(record.timestamp_ms);
        last_ms = record.timestamp_ms;
        frames += 1;
    }

    let span_ms = last_ms.saturating_sub(first_ms.unwrap_or(0));
    println!("Frames:           {frames}");
    println!("Duration:         {span_ms}ms");
    if span_ms > 0 {
        println!("Average rate:     {:.1} fps", 1_000.0 * frames as f64 / span_ms as f64);
    }
    Ok(())
}
