//! The ingestion hot path: compute a packet's delay against its recorded
//! timestamp and file the sample, without ever failing the packet itself.

use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
#[allow(unused_imports)]
use log::*;

use crate::recorder::TimestampRecorder;
use crate::sample_store::{Sample, SampleStore};

/// Default byte offset of the sequence number in the payload.
pub const DEFAULT_SEQUENCE_OFFSET: usize = 40;
/// Default outlier threshold in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 1000;

/// Rejected probe configurations, reported once at build time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// More than one ingestion worker without a fixed capacity: a growing
    /// store cannot take concurrent appends.
    NotThreadSafe,
    ZeroCapacity,
    ZeroSampleRate,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NotThreadSafe => {
                write!(f, "probe is only thread safe if a fixed capacity is set")
            }
            ConfigError::ZeroCapacity => write!(f, "fixed capacity must be greater than 0"),
            ConfigError::ZeroSampleRate => write!(f, "sample rate must be greater than 0"),
        }
    }
}

impl Error for ConfigError {}

/// Reads the 64-bit sequence number a numbering element wrote at `offset`.
/// `None` when the payload is too short; the measurement is skipped then.
pub fn read_sequence(payload: &[u8], offset: usize, net_order: bool) -> Option<u64> {
    let bytes = payload.get(offset..offset.checked_add(8)?)?;
    let raw: [u8; 8] = bytes.try_into().ok()?;
    Some(if net_order {
        u64::from_be_bytes(raw)
    } else {
        u64::from_ne_bytes(raw)
    })
}

/// Measures, per packet, the time elapsed since the recorder peer stamped
/// it, and stores the delay for the query surface. Packets always pass
/// through untouched; measurement is a side effect.
pub struct DelayProbe {
    recorder: Arc<dyn TimestampRecorder>,
    store: SampleStore,
    offset: usize,
    net_order: bool,
    max_delay_ms: u64,
    /// Threshold in the configured unit, saturated at build time so the
    /// hot-path comparison never overflows.
    max_delay_units: u64,
    nano: bool,
    sample: u64,
    verbose: bool,
    tc_offset: Option<usize>,
    tc_mask: u8,
}

impl DelayProbe {
    pub fn builder() -> DelayProbeBuilder {
        DelayProbeBuilder::default()
    }

    /// The live sample store; queries run against this.
    pub fn store(&self) -> &SampleStore {
        &self.store
    }

    /// Hot path. Looks up the packet's recorded timestamp, applies the
    /// sampling and outlier filters and appends one `(delay, tag)` sample.
    /// Never blocks in bounded mode and never fails the packet: any missing
    /// precondition just skips the measurement.
    pub fn process(&self, payload: &[u8], now: Instant) {
        let Some(seq) = read_sequence(payload, self.offset, self.net_order) else {
            return;
        };
        let Some(recorded) = self.recorder.lookup(seq) else {
            // normal case: the original stamp was dropped or not yet taken
            return;
        };
        if self.sample != 1 && seq % self.sample != 0 {
            return;
        }

        let diff = now.saturating_duration_since(recorded);
        let units_per_ms: u64 = if self.nano { 1_000_000 } else { 1_000 };
        let delay = if self.nano {
            diff.as_nanos() as u64
        } else {
            diff.as_micros() as u64
        };

        if delay > self.max_delay_units {
            // outliers would poison the percentiles; drop, don't store
            if self.verbose {
                warn!(
                    "Packet {} experienced delay {} ms > {} ms",
                    seq,
                    delay / units_per_ms,
                    self.max_delay_ms
                );
            }
            return;
        }

        let tc = match self.tc_offset {
            Some(off) => payload.get(off).map(|b| b & self.tc_mask).unwrap_or(0),
            None => 0,
        };
        self.store.record(Sample::new(delay, tc));
    }

    /// Convenience wrapper capturing `now` from the steady clock.
    pub fn measure(&self, payload: &[u8]) {
        self.process(payload, Instant::now());
    }
}

/// Builder for [`DelayProbe`]. Defaults mirror the element's classic
/// configuration: offset 40, unbounded store, 1000 ms outlier threshold,
/// microsecond units, every packet sampled, no class tag.
#[derive(Clone, Debug)]
pub struct DelayProbeBuilder {
    offset: usize,
    capacity: Option<usize>,
    max_delay_ms: u64,
    nano: bool,
    sample: u64,
    verbose: bool,
    tc_offset: Option<usize>,
    tc_mask: u8,
}

impl Default for DelayProbeBuilder {
    fn default() -> Self {
        DelayProbeBuilder {
            offset: DEFAULT_SEQUENCE_OFFSET,
            capacity: None,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            nano: false,
            sample: 1,
            verbose: false,
            tc_offset: None,
            tc_mask: 0xff,
        }
    }
}

impl DelayProbeBuilder {
    /// Byte offset of the sequence number in the payload.
    pub fn with_offset(&self, offset: usize) -> Self {
        let mut next = self.clone();
        next.offset = offset;
        next
    }

    /// Fixes the store capacity, enabling bounded mode and with it
    /// multi-worker ingestion.
    pub fn with_capacity(&self, capacity: usize) -> Self {
        let mut next = self.clone();
        next.capacity = Some(capacity);
        next
    }

    /// Outlier threshold in milliseconds; larger delays are discarded.
    pub fn with_max_delay_ms(&self, max_delay_ms: u64) -> Self {
        let mut next = self.clone();
        next.max_delay_ms = max_delay_ms;
        next
    }

    /// Record delays in nanoseconds instead of microseconds.
    pub fn with_nanoseconds(&self) -> Self {
        let mut next = self.clone();
        next.nano = true;
        next
    }

    /// Record only sequence numbers that are multiples of `rate`.
    pub fn with_sample_rate(&self, rate: u64) -> Self {
        let mut next = self.clone();
        next.sample = rate;
        next
    }

    /// Log one line per discarded outlier.
    pub fn with_verbose(&self) -> Self {
        let mut next = self.clone();
        next.verbose = true;
        next
    }

    /// Byte offset of the traffic-class tag in the payload.
    pub fn with_tc_offset(&self, offset: usize) -> Self {
        let mut next = self.clone();
        next.tc_offset = Some(offset);
        next
    }

    /// Bitmask applied to the traffic-class byte.
    pub fn with_tc_mask(&self, mask: u8) -> Self {
        let mut next = self.clone();
        next.tc_mask = mask;
        next
    }

    /// Validates the configuration against the number of ingestion workers
    /// that will feed the probe and builds it. The byte order of sequence
    /// numbers comes from the recorder peer.
    pub fn build(
        &self,
        recorder: Arc<dyn TimestampRecorder>,
        workers: usize,
    ) -> Result<DelayProbe, ConfigError> {
        if self.sample == 0 {
            return Err(ConfigError::ZeroSampleRate);
        }
        if self.capacity == Some(0) {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.capacity.is_none() && workers > 1 {
            return Err(ConfigError::NotThreadSafe);
        }

        let store = match self.capacity {
            Some(n) => SampleStore::with_capacity(n),
            None => SampleStore::growable(),
        };
        let net_order = recorder.has_net_order();
        let units_per_ms: u64 = if self.nano { 1_000_000 } else { 1_000 };

        Ok(DelayProbe {
            recorder,
            store,
            offset: self.offset,
            net_order,
            max_delay_ms: self.max_delay_ms,
            max_delay_units: self.max_delay_ms.saturating_mul(units_per_ms),
            nano: self.nano,
            sample: self.sample,
            verbose: self.verbose,
            tc_offset: self.tc_offset,
            tc_mask: self.tc_mask,
        })
    }
}
