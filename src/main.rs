use std::process::exit;

use anyhow::{Context, Result};
use clap::Parser;

use hackeeg_rs::{
    audit, init_logging, locate_port, open_port, AcquisitionSession, DecodedSample, Deframer,
    FrameCodec, FrameConsumer, FrameLayout, FramePolicy, JsonLinesControl, SerialStream,
    DEFAULT_BAUD,
};

#[derive(Parser, Debug)]
#[command(
    name = "hackeeg-acquire",
    about = "Acquire framed samples from a HackEEG board over serial"
)]
struct Args {
    /// Serial port path (autodetected when omitted)
    #[arg(short, long)]
    port: Option<String>,
    /// Serial baud rate
    #[arg(long, default_value_t = DEFAULT_BAUD)]
    baud: u32,
    /// Maximum number of samples to collect (0 = unbounded)
    #[arg(short = 'n', long, default_value_t = 100_000)]
    max_samples: u64,
    /// Acquisition duration in seconds (0 = unbounded)
    #[arg(short, long, default_value_t = 1.0)]
    duration: f64,
    /// Device sample rate in samples per second
    #[arg(short = 'r', long, default_value_t = 16_000.0)]
    sample_rate: f64,
    /// Skip malformed frames instead of aborting
    #[arg(long)]
    skip_malformed: bool,
    /// Print every Nth sample while acquiring (0 = silent)
    #[arg(long, default_value_t = 0)]
    echo_every: u64,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        exit(1);
    }
}

fn run() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let path = match args.port {
        Some(p) => p,
        None => locate_port()?,
    };
    println!("Using serial port {path} at {} baud", args.baud);

    let data_port = open_port(&path, args.baud)?;
    let command_port = data_port
        .try_clone()
        .context("cloning serial handle for the command channel")?;

    let codec = FrameCodec::new(FrameLayout::hackeeg())?;
    let policy = if args.skip_malformed {
        FramePolicy::SkipMalformed
    } else {
        FramePolicy::Strict
    };
    let deframer = Deframer::new(SerialStream::new(data_port), codec).with_policy(policy);
    let mut session = AcquisitionSession::new(deframer, JsonLinesControl::new(command_port));

    println!("Acquiring data...");
    let echo_every = args.echo_every;
    let mut echo = move |sample: &DecodedSample| {
        if sample.sequence_number % echo_every == 0 {
            println!(
                "sample {:>8}: {} payload bytes",
                sample.sequence_number,
                sample.payload().len()
            );
        }
    };
    let consumer: Option<&mut dyn FrameConsumer> = if echo_every > 0 {
        Some(&mut echo)
    } else {
        None
    };

    let capture = match session.acquire(args.max_samples, args.duration, args.sample_rate, consumer)
    {
        Ok(capture) => capture,
        Err(failure) => {
            eprintln!("acquisition aborted: {}", failure.error);
            failure.partial
        }
    };

    println!(
        "Collected {} samples in {:.3} s",
        capture.sample_count,
        capture.elapsed.as_secs_f64()
    );
    if let Some(rate) = capture.observed_rate() {
        println!("Observed sample rate: {rate:.1} sps");
    }

    let report = audit(&capture, capture.sample_count);
    if report.is_complete() {
        println!("No dropped samples");
    } else if report.dropped_count() <= 20 {
        println!(
            "Dropped {} samples: {:?}",
            report.dropped_count(),
            report.missing
        );
    } else {
        println!("Dropped {} samples", report.dropped_count());
    }
    Ok(())
}
