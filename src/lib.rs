//! Passive per-packet latency measurement for packet-processing pipelines.
//!
//! A numbering element stamps each packet's sequence number into its payload
//! and a recorder peer keeps the instant it did so. This crate's
//! [`DelayProbe`] sits further down the pipeline: for every packet it reads
//! the sequence number back, asks the recorder for the original instant and
//! records `now - then` as one latency sample. Packets pass through
//! untouched; measurement is purely a side effect.
//!
//! Samples accumulate in an append-only [`SampleStore`] with two backings:
//! a preallocated bounded store whose slots are claimed with an atomic
//! fetch-and-increment (safe under any number of ingestion workers), or an
//! unbounded growable store for single-worker setups. A fixed catalogue of
//! named queries ([`StatQuery`], [`respond`]) answers live min/mean/max,
//! population standard deviation, arbitrary percentiles (in-place
//! selection, no full sort), last value and raw dumps over the store while
//! ingestion keeps running.
//!
//! ```
//! use std::sync::Arc;
//! use std::time::{Duration, Instant};
//! use tsdiff::{DelayProbe, InMemoryRecorder, respond};
//!
//! let recorder = Arc::new(InMemoryRecorder::new());
//! let now = Instant::now();
//! recorder.record(0, now - Duration::from_micros(250));
//!
//! let probe = DelayProbe::builder()
//!     .with_offset(0)
//!     .with_capacity(1024)
//!     .build(recorder, 1)
//!     .expect("valid config");
//!
//! let mut payload = [0u8; 8];
//! payload.copy_from_slice(&0u64.to_ne_bytes());
//! probe.process(&payload, now);
//!
//! assert_eq!(respond(probe.store(), "last", ""), "250");
//! assert_eq!(respond(probe.store(), "median", ""), "250");
//! ```

pub mod logging_util;
pub mod probe;
pub mod query;
pub mod recorder;
pub mod sample_store;
mod stats;

pub use probe::{read_sequence, ConfigError, DelayProbe, DelayProbeBuilder};
pub use probe::{DEFAULT_MAX_DELAY_MS, DEFAULT_SEQUENCE_OFFSET};
pub use query::{respond, QueryError, StatQuery, ERROR_TOKEN, HANDLER_NAMES};
pub use recorder::{InMemoryRecorder, TimestampRecorder};
pub use sample_store::{Sample, SampleStore};
pub use stats::DumpLines;

use std::error::Error;

/// Initialize logging for the crate. A convenience wrapper meant to be
/// called once at the beginning of main; `loglevel` is one of `off`,
/// `error`, `warn`, `info`, `debug`, `trace`.
pub fn init_logging(loglevel: &str) -> Result<(), Box<dyn Error>> {
    let level = loglevel
        .parse::<log::LevelFilter>()
        .map_err(|_| format!("unknown log level: {}", loglevel))?;
    logging_util::steady_logger::initialize_with_level(level)
}
