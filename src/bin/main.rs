use std::io::IsTerminal;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::{NonZeroU64, NonZeroUsize};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::Confirm;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ddp_capture::packet::DDP_PORT;
use ddp_capture::{CaptureConfig, TerminationReason};

#[derive(Parser)]
#[command(
    name = "ddp-capture",
    about = "Listen for DDP packets, learn the string layout and capture frames of pixel data"
)]
struct Args {
    /// Number of LED strings to learn ranges for and capture
    #[arg(short, long = "strings", default_value = "1")]
    strings: NonZeroUsize,

    /// Output file for the capture
    #[arg(short, long)]
    output: PathBuf,

    /// Stop after capturing for this many seconds
    #[arg(short = 't', long = "seconds-to-capture")]
    seconds_to_capture: Option<NonZeroU64>,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,

    /// Address to listen on
    #[arg(short, long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    bind: IpAddr,

    /// UDP port
    #[arg(short, long, default_value_t = DDP_PORT)]
    port: u16,

    /// Overwrite the output file without asking
    #[arg(short, long)]
    force: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_target(false)
        .init();

    if args.output.exists() && !args.force && std::io::stdin().is_terminal() {
        let overwrite = Confirm::new()
            .with_prompt(format!("{} exists. Overwrite?", args.output.display()))
            .default(false)
            .interact()
            .context("failed to read confirmation")?;
        if !overwrite {
            println!("Aborted.");
            return Ok(());
        }
    }

    let mut config = CaptureConfig::new(args.output);
    config.number_of_strings = args.strings;
    config.max_duration = args.seconds_to_capture.map(|s| Duration::from_secs(s.get()));
    config.bind = SocketAddr::new(args.bind, args.port);

    list_local_addresses(&config);

    // Ctrl+C handler
    let cancel = CancellationToken::new();
    let c = cancel.clone();
    ctrlc::set_handler(move || c.cancel()).context("failed to set Ctrl+C handler")?;

    let summary = ddp_capture::capture(&config, &cancel)
        .await
        .with_context(|| format!("capture to {} failed", config.output.display()))?;

    match summary.reason {
        TerminationReason::IdleTimeout => info!("idle timeout: {summary}"),
        TerminationReason::DurationLimit => info!("finished: {summary}"),
        TerminationReason::Interrupted => info!("interrupted: {summary}"),
    }
    info!(
        packets = summary.stats.packets,
        rejected = summary.stats.rejected,
        unmatched = summary.stats.unmatched,
        skipped_empty = summary.stats.skipped_empty,
        "packet statistics"
    );
    Ok(())
}

/// Shows where a controller can send DDP so it reaches this capture.
fn list_local_addresses(config: &CaptureConfig) {
    if !config.bind.ip().is_unspecified() {
        return;
    }
    match if_addrs::get_if_addrs() {
        Ok(interfaces) => {
            for iface in interfaces.iter().filter(|i| !i.is_loopback()) {
                info!("  reachable on {} ({})", iface.ip(), iface.name);
            }
        }
        Err(e) => warn!("could not list network interfaces: {e}"),
    }
}
