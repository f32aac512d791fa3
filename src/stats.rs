//! Read-side statistics over the live sample store.
//!
//! Every range-scoped operation works on `[begin, len)` where `len` is the
//! claim counter's value at the start of the call. Ingestion keeps appending
//! while these run; that snapshot-free read is accepted for a monitoring
//! surface. Only [`SampleStore::percentile`] mutates (it reorders the range
//! through the in-place selection primitive).

use crate::sample_store::SampleStore;

/// A dump of the store, one sample per line, optionally index-prefixed.
/// Finite, lazy and non-restartable.
pub struct DumpLines<'a> {
    store: &'a SampleStore,
    next: usize,
    len: usize,
    indexed: bool,
}

impl Iterator for DumpLines<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.next >= self.len {
            return None;
        }
        let delay = self.store.get(self.next).map(|s| s.delay).unwrap_or(0);
        let mut buf = itoa::Buffer::new();
        let mut line = String::new();
        if self.indexed {
            line.push_str(buf.format(self.next));
            line.push_str(": ");
        }
        line.push_str(buf.format(delay));
        self.next += 1;
        Some(line)
    }
}

impl SampleStore {
    /// Single scan over `[begin, len)` producing `(min, mean, max)`. With a
    /// class filter only samples whose tag matches are considered, and the
    /// mean divides by the number considered, not the range length. An empty
    /// consideration leaves max at 0, collapses min to 0 and yields mean 0.
    pub fn min_mean_max(&self, begin: usize, tc: Option<u8>) -> (u64, f64, u64) {
        let mut min = u64::MAX;
        let mut max = 0u64;
        let mut sum = 0.0f64;
        let mut considered = 0u64;

        self.scan(begin, |s| {
            if let Some(filter) = tc {
                if s.tc != filter {
                    return;
                }
            }
            sum += s.delay as f64;
            if s.delay < min {
                min = s.delay;
            }
            if s.delay > max {
                max = s.delay;
            }
            considered += 1;
        });

        if min == u64::MAX {
            min = 0;
        }
        let mean = if considered == 0 { 0.0 } else { sum / considered as f64 };
        (min, mean, max)
    }

    /// Population standard deviation of `[begin, len)` against a
    /// caller-supplied mean. The divisor is the full store length, not the
    /// scanned count; historical behavior, kept on purpose and pinned by
    /// tests.
    pub fn standard_deviation(&self, mean: f64, begin: usize) -> f64 {
        let len = self.len();
        let mut var = 0.0f64;
        self.scan(begin, |s| {
            let d = s.delay as f64 - mean;
            var += d * d;
        });
        if var == 0.0 {
            return 0.0;
        }
        (var / len as f64).sqrt()
    }

    /// The delay that a full ascending sort of `[begin, len)` would place at
    /// index `begin + floor(percent * n / 100)`. Percentiles that floor to
    /// the first index return the range minimum, those that land at or past
    /// the end return the maximum; everything between runs the in-place
    /// selection (a mutating read, see [`SampleStore::select_delay_at`]).
    /// Empty range or out-of-range `begin` yields 0.
    pub fn percentile(&self, percent: f64, begin: usize) -> f64 {
        let len = self.len();
        if len == 0 || begin >= len {
            return 0.0;
        }

        let idx = ((percent * (len - begin) as f64) / 100.0) as usize + begin;

        if idx <= begin {
            let (min, _, _) = self.min_mean_max(begin, None);
            return min as f64;
        }
        if idx >= len {
            let (_, _, max) = self.min_mean_max(begin, None);
            return max as f64;
        }
        self.select_delay_at(begin, idx, len) as f64
    }

    /// Delay of the most recently claimed slot, 0 when nothing was recorded.
    pub fn last_value_seen(&self) -> u64 {
        let len = self.len();
        if len == 0 {
            return 0;
        }
        self.get(len - 1).map(|s| s.delay).unwrap_or(0)
    }

    /// Lazy line-by-line dump of `[0, len)`: `"<index>: <delay>"` when
    /// `indexed`, bare `"<delay>"` otherwise.
    pub fn dump_lines(&self, indexed: bool) -> DumpLines<'_> {
        DumpLines {
            store: self,
            next: 0,
            len: self.len(),
            indexed,
        }
    }
}
