//! Append-only storage for latency samples.
//!
//! Two backings share one `record`/`scan`/`select_delay_at` surface:
//!
//! * [`SampleStore::Fixed`] preallocates its capacity and hands out write
//!   slots with an atomic fetch-and-increment, so any number of ingestion
//!   threads can record without a lock. This is the only backing that is
//!   safe under concurrent writers.
//! * [`SampleStore::Growable`] appends to a vector behind a `RwLock` and is
//!   meant for single-worker setups with an unbounded history.
//!
//! The claim counter, not the backing size, is the authoritative length seen
//! by every read-side operation.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use parking_lot::{Mutex, RwLock};

/// Bits of a packed slot holding the delay; the class tag lives above them.
const DELAY_BITS: u32 = 56;
const DELAY_MASK: u64 = (1u64 << DELAY_BITS) - 1;

/// One recorded measurement: a delay in the configured time unit plus the
/// optional traffic-class byte it was tagged with.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Sample {
    pub delay: u64,
    pub tc: u8,
}

impl Sample {
    /// Builds a sample, truncating the delay to the 56 bits a packed slot
    /// can hold. The outlier filter keeps real delays far below this.
    pub fn new(delay: u64, tc: u8) -> Self {
        Sample { delay: delay & DELAY_MASK, tc }
    }

    fn pack(self) -> u64 {
        ((self.tc as u64) << DELAY_BITS) | (self.delay & DELAY_MASK)
    }

    fn unpack(raw: u64) -> Self {
        Sample {
            delay: raw & DELAY_MASK,
            tc: (raw >> DELAY_BITS) as u8,
        }
    }
}

/// Preallocated slots plus the claim counter. Samples are packed into a
/// single `AtomicU64` per slot so a claimed slot can be published with one
/// release store and read without tearing.
pub struct FixedStore {
    slots: Box<[AtomicU64]>,
    next: AtomicUsize,
    /// Serializes in-place selection; scans and appends never take it.
    select_lock: Mutex<()>,
}

impl FixedStore {
    fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || AtomicU64::new(0));
        FixedStore {
            slots: slots.into_boxed_slice(),
            next: AtomicUsize::new(0),
            select_lock: Mutex::new(()),
        }
    }

    fn len(&self) -> usize {
        self.next.load(Ordering::Acquire).min(self.slots.len())
    }

    /// Claims the next slot and writes the sample. Returns false when the
    /// store is full; the sample is dropped rather than indexing past the
    /// preallocated backing.
    fn record(&self, sample: Sample) -> bool {
        let claim = self.next.fetch_add(1, Ordering::AcqRel);
        if claim >= self.slots.len() {
            return false;
        }
        self.slots[claim].store(sample.pack(), Ordering::Release);
        true
    }

    fn get(&self, index: usize) -> Option<Sample> {
        if index < self.len() {
            Some(Sample::unpack(self.slots[index].load(Ordering::Acquire)))
        } else {
            None
        }
    }

    fn scan<F: FnMut(Sample)>(&self, begin: usize, mut f: F) {
        let len = self.len();
        for slot in self.slots.iter().take(len).skip(begin) {
            f(Sample::unpack(slot.load(Ordering::Relaxed)));
        }
    }

    /// Quickselect over the packed slots, ordered by delay. Reorders
    /// `[begin, len)` in place; the internal lock keeps overlapping
    /// selections from interleaving their swaps. `len` is the length the
    /// caller captured, never the live claim counter: slots claimed after
    /// the capture may still be mid-write and must stay out of the
    /// partition.
    fn select_delay_at(&self, begin: usize, rank: usize, len: usize) -> u64 {
        let _guard = self.select_lock.lock();
        let slots = &self.slots;
        let key = |i: usize| Sample::unpack(slots[i].load(Ordering::Relaxed)).delay;
        let swap = |a: usize, b: usize| {
            if a != b {
                let va = slots[a].load(Ordering::Relaxed);
                let vb = slots[b].load(Ordering::Relaxed);
                slots[a].store(vb, Ordering::Relaxed);
                slots[b].store(va, Ordering::Relaxed);
            }
        };

        let mut lo = begin;
        let mut hi = len - 1;
        loop {
            if lo == hi {
                return key(lo);
            }
            // middle element as pivot, moved to the end for the partition
            swap(lo + (hi - lo) / 2, hi);
            let pivot = key(hi);
            let mut boundary = lo;
            for i in lo..hi {
                if key(i) < pivot {
                    swap(i, boundary);
                    boundary += 1;
                }
            }
            swap(boundary, hi);
            if rank == boundary {
                return key(boundary);
            } else if rank < boundary {
                hi = boundary - 1;
            } else {
                lo = boundary + 1;
            }
        }
    }
}

/// Unbounded history. Appends take a brief write lock, scans a read lock;
/// only a single ingestion worker may feed it (enforced at build time).
pub struct GrowableStore {
    samples: RwLock<Vec<Sample>>,
}

impl GrowableStore {
    fn new() -> Self {
        GrowableStore { samples: RwLock::new(Vec::new()) }
    }

    fn len(&self) -> usize {
        self.samples.read().len()
    }

    fn record(&self, sample: Sample) -> bool {
        self.samples.write().push(sample);
        true
    }

    fn get(&self, index: usize) -> Option<Sample> {
        self.samples.read().get(index).copied()
    }

    fn scan<F: FnMut(Sample)>(&self, begin: usize, mut f: F) {
        let samples = self.samples.read();
        if begin >= samples.len() {
            return;
        }
        for s in &samples[begin..] {
            f(*s);
        }
    }

    fn select_delay_at(&self, begin: usize, rank: usize, len: usize) -> u64 {
        let mut samples = self.samples.write();
        let (_, nth, _) = samples[begin..len].select_nth_unstable_by_key(rank - begin, |s| s.delay);
        nth.delay
    }
}

/// The append-only sample history behind the statistics engine.
pub enum SampleStore {
    Fixed(FixedStore),
    Growable(GrowableStore),
}

impl SampleStore {
    /// Bounded mode: preallocated capacity, lock-free multi-writer claims.
    pub fn with_capacity(capacity: usize) -> Self {
        SampleStore::Fixed(FixedStore::new(capacity))
    }

    /// Unbounded mode: grows by append, single ingestion worker only.
    pub fn growable() -> Self {
        SampleStore::Growable(GrowableStore::new())
    }

    /// Current logical length: the claim counter's value, capped at the
    /// backing's capacity in bounded mode.
    pub fn len(&self) -> usize {
        match self {
            SampleStore::Fixed(s) => s.len(),
            SampleStore::Growable(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Preallocated capacity, or `None` in growable mode.
    pub fn capacity(&self) -> Option<usize> {
        match self {
            SampleStore::Fixed(s) => Some(s.slots.len()),
            SampleStore::Growable(_) => None,
        }
    }

    /// Appends one sample, claiming the next slot. Returns false when a
    /// bounded store is already full and the sample was dropped.
    pub fn record(&self, sample: Sample) -> bool {
        match self {
            SampleStore::Fixed(s) => s.record(sample),
            SampleStore::Growable(s) => s.record(sample),
        }
    }

    pub fn get(&self, index: usize) -> Option<Sample> {
        match self {
            SampleStore::Fixed(s) => s.get(index),
            SampleStore::Growable(s) => s.get(index),
        }
    }

    /// Visits every published sample in `[begin, len)` in claim order.
    pub fn scan<F: FnMut(Sample)>(&self, begin: usize, f: F) {
        match self {
            SampleStore::Fixed(s) => s.scan(begin, f),
            SampleStore::Growable(s) => s.scan(begin, f),
        }
    }

    /// Places the sample that a full ascending sort of `[begin, len)` by
    /// delay would put at `rank`, reordering that range in place, and
    /// returns its delay. Not a pure read: overlapping calls are serialized
    /// internally. `len` is the length the caller captured before computing
    /// `rank`; slots claimed since then stay outside the reordered range.
    /// Caller must hold `begin < rank < len <= self.len()`.
    pub fn select_delay_at(&self, begin: usize, rank: usize, len: usize) -> u64 {
        debug_assert!(begin < rank && rank < len && len <= self.len());
        match self {
            SampleStore::Fixed(s) => s.select_delay_at(begin, rank, len),
            SampleStore::Growable(s) => s.select_delay_at(begin, rank, len),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;

    #[test]
    fn sample_packs_delay_and_tag() {
        let s = Sample::new(123_456, 0xab);
        let round = Sample::unpack(s.pack());
        assert_eq!(round.delay, 123_456);
        assert_eq!(round.tc, 0xab);
    }

    #[test]
    fn sample_truncates_oversized_delay() {
        let s = Sample::new(u64::MAX, 7);
        assert_eq!(s.delay, DELAY_MASK);
        assert_eq!(Sample::unpack(s.pack()).tc, 7);
    }

    #[test]
    fn fixed_store_records_in_claim_order() {
        let store = SampleStore::with_capacity(4);
        assert!(store.is_empty());
        assert!(store.record(Sample::new(10, 0)));
        assert!(store.record(Sample::new(20, 1)));
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(0), Some(Sample::new(10, 0)));
        assert_eq!(store.get(1), Some(Sample::new(20, 1)));
        assert_eq!(store.get(2), None);
        assert_eq!(store.capacity(), Some(4));
    }

    #[test]
    fn fixed_store_drops_when_full() {
        let store = SampleStore::with_capacity(2);
        assert!(store.record(Sample::new(1, 0)));
        assert!(store.record(Sample::new(2, 0)));
        assert!(!store.record(Sample::new(3, 0)));
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(1), Some(Sample::new(2, 0)));
    }

    #[test]
    fn growable_store_appends_without_bound() {
        let store = SampleStore::growable();
        for i in 0..100u64 {
            assert!(store.record(Sample::new(i, 0)));
        }
        assert_eq!(store.len(), 100);
        assert_eq!(store.capacity(), None);
        assert_eq!(store.get(99), Some(Sample::new(99, 0)));
    }

    /// N concurrent claims against capacity N land on distinct slots with
    /// no duplicate and no gap.
    #[test]
    fn concurrent_claims_cover_every_slot_once() {
        const THREADS: u64 = 4;
        const PER_THREAD: u64 = 250;
        let store = Arc::new(SampleStore::with_capacity((THREADS * PER_THREAD) as usize));

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        assert!(store.record(Sample::new(t * PER_THREAD + i, 0)));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("worker");
        }

        assert_eq!(store.len(), (THREADS * PER_THREAD) as usize);
        let mut seen = vec![0u32; (THREADS * PER_THREAD) as usize];
        store.scan(0, |s| seen[s.delay as usize] += 1);
        assert!(seen.iter().all(|&c| c == 1), "every claimed value exactly once");
    }

    #[test]
    fn selection_matches_full_sort_fixed() {
        let mut rng = StdRng::seed_from_u64(42);
        let delays: Vec<u64> = (0..257).map(|_| rng.gen_range(0..10_000)).collect();
        let store = SampleStore::with_capacity(delays.len());
        for &d in &delays {
            store.record(Sample::new(d, 0));
        }
        let mut sorted = delays.clone();
        sorted.sort_unstable();
        for rank in [1, 7, 128, 200, 255] {
            assert_eq!(store.select_delay_at(0, rank, delays.len()), sorted[rank]);
        }
    }

    #[test]
    fn selection_matches_full_sort_growable() {
        let mut rng = StdRng::seed_from_u64(7);
        let delays: Vec<u64> = (0..101).map(|_| rng.gen_range(0..1_000)).collect();
        let store = SampleStore::growable();
        for &d in &delays {
            store.record(Sample::new(d, 0));
        }
        let mut sorted = delays.clone();
        sorted.sort_unstable();
        for rank in [1, 25, 50, 99] {
            assert_eq!(store.select_delay_at(0, rank, delays.len()), sorted[rank]);
        }
    }

    #[test]
    fn selection_respects_begin_offset() {
        let store = SampleStore::with_capacity(8);
        for d in [90, 80, 10, 40, 30, 20, 60, 50] {
            store.record(Sample::new(d, 0));
        }
        // absolute rank 4 within [2, 8) sorted -> [10,20,30,40,50,60] -> 30
        assert_eq!(store.select_delay_at(2, 4, 8), 30);
        // first two slots were never part of the reordered range
        let first = store.get(0).expect("slot 0");
        let second = store.get(1).expect("slot 1");
        assert!(first.delay == 90 || first.delay == 80);
        assert!(second.delay == 90 || second.delay == 80);
    }

    /// A slot claimed after the caller captured its length must not be
    /// drawn into the partition: its write may still be in flight, and a
    /// selection swap could clobber it with a stale value.
    #[test]
    fn selection_leaves_slots_claimed_after_the_capture_alone() {
        let store = SampleStore::with_capacity(4);
        for d in [30, 10, 20] {
            store.record(Sample::new(d, 0));
        }
        let len = store.len();
        // a late claim, smaller than everything already published
        store.record(Sample::new(1, 0));

        // rank 1 over the captured [0, 3): sorted [10,20,30] -> 20
        assert_eq!(store.select_delay_at(0, 1, len), 20);
        assert_eq!(store.get(3), Some(Sample::new(1, 0)));
    }

    #[test]
    fn selection_preserves_membership() {
        let store = SampleStore::with_capacity(16);
        for d in [5, 9, 1, 7, 3, 8, 2, 6, 4, 0] {
            store.record(Sample::new(d, 0));
        }
        store.select_delay_at(0, 5, 10);
        let mut seen: Vec<u64> = Vec::new();
        store.scan(0, |s| seen.push(s.delay));
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }
}
