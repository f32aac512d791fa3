//! Demo pipeline for the delay probe: stamps a batch of synthetic packets
//! into an in-memory recorder, pushes them through the probe from one or
//! more worker threads, then walks the query catalogue and prints the
//! statistics.

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
#[allow(unused_imports)]
use log::*;

use tsdiff::{respond, DelayProbe, InMemoryRecorder};

#[derive(Parser, Debug)]
#[command(name = "tsdiff", about = "Synthetic latency measurement demo")]
struct Args {
    /// Number of synthetic packets to push through the probe.
    #[arg(long, default_value_t = 100_000)]
    packets: u64,

    /// Ingestion worker threads. More than one requires a fixed capacity.
    #[arg(long, default_value_t = 2)]
    workers: usize,

    /// Fixed sample-store capacity; defaults to the packet count when more
    /// than one worker is configured.
    #[arg(long)]
    capacity: Option<usize>,

    /// Byte offset of the sequence number in the payload.
    #[arg(long, default_value_t = tsdiff::DEFAULT_SEQUENCE_OFFSET)]
    offset: usize,

    /// Maximum acceptable delay in milliseconds before a sample is dropped.
    #[arg(long, default_value_t = tsdiff::DEFAULT_MAX_DELAY_MS)]
    max_delay_ms: u64,

    /// Record delays in nanoseconds instead of microseconds.
    #[arg(long)]
    nano: bool,

    /// Record only every Nth sequence number.
    #[arg(long, default_value_t = 1)]
    sample: u64,

    /// Log a line for every discarded outlier.
    #[arg(long)]
    verbose: bool,

    /// Byte offset of the traffic-class tag in the payload.
    #[arg(long)]
    tc_offset: Option<usize>,

    /// Bitmask applied to the traffic-class byte.
    #[arg(long, default_value_t = 0xff)]
    tc_mask: u8,

    #[arg(long, default_value = "info")]
    loglevel: String,
}

/// Small deterministic generator for the synthetic stamp jitter.
fn xorshift(state: &mut u64) -> u64 {
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    *state = x;
    x
}

fn main() {
    let args = Args::parse();
    if let Err(e) = tsdiff::init_logging(&args.loglevel) {
        eprintln!("Warning: logger initialization failed with {:?}. There will be no logging.", e);
    }

    let capacity = args.capacity.or_else(|| {
        if args.workers > 1 {
            Some(args.packets as usize)
        } else {
            None
        }
    });

    let recorder = Arc::new(InMemoryRecorder::with_net_order(true));
    let mut builder = DelayProbe::builder()
        .with_offset(args.offset)
        .with_max_delay_ms(args.max_delay_ms)
        .with_sample_rate(args.sample)
        .with_tc_mask(args.tc_mask);
    if let Some(n) = capacity {
        builder = builder.with_capacity(n);
    }
    if args.nano {
        builder = builder.with_nanoseconds();
    }
    if args.verbose {
        builder = builder.with_verbose();
    }
    if let Some(off) = args.tc_offset {
        builder = builder.with_tc_offset(off);
    }

    let probe = match builder.build(Arc::clone(&recorder) as _, args.workers) {
        Ok(p) => p,
        Err(e) => {
            error!("configuration rejected: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "pushing {} packets through {} worker(s), capacity {:?}, sample rate {}",
        args.packets, args.workers, capacity, args.sample
    );

    // Stamp each sequence number a pseudo-random few hundred milliseconds in
    // the past so the delay distribution has some spread to query.
    let start = Instant::now();
    let mut rng_state = 0x9e37_79b9_7f4a_7c15u64;
    let payload_len = (args.offset + 8).max(args.tc_offset.map_or(0, |o| o + 1));
    let payloads: Vec<Vec<u8>> = (0..args.packets)
        .map(|seq| {
            let jitter = Duration::from_micros(xorshift(&mut rng_state) % 900_000);
            recorder.record(seq, start.checked_sub(jitter).unwrap_or(start));
            let mut payload = vec![0u8; payload_len];
            payload[args.offset..args.offset + 8].copy_from_slice(&seq.to_be_bytes());
            if let Some(off) = args.tc_offset {
                payload[off] = (seq % 4) as u8;
            }
            payload
        })
        .collect();

    std::thread::scope(|scope| {
        let probe = &probe;
        let chunk = payloads.len().div_ceil(args.workers.max(1)).max(1);
        for slice in payloads.chunks(chunk) {
            scope.spawn(move || {
                for payload in slice {
                    probe.measure(payload);
                }
            });
        }
    });

    info!(
        "recorded {} samples in {:?}",
        probe.store().len(),
        start.elapsed()
    );

    let store = probe.store();
    for name in [
        "min", "perc01", "perc25", "median", "avg", "perc75", "perc90", "perc99", "max",
        "stddev", "last", "index",
    ] {
        println!("{:>8}: {}", name, respond(store, name, ""));
    }
    if args.tc_offset.is_some() {
        println!("{:>8}: {}", "avg_tc", respond(store, "avg_tc", "1"));
    }
}
