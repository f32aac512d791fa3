//! Contract with the peer that recorded the original timestamps.
//!
//! The probe never owns the first timestamp of a packet; a companion
//! recorder element stamped it when the packet was numbered. All the probe
//! needs from that peer is a point lookup by sequence number, with "never
//! recorded" as ordinary control flow.

use std::time::Instant;
use parking_lot::RwLock;

/// Read-only view of a timestamp-recording peer.
pub trait TimestampRecorder: Send + Sync {
    /// Returns the instant recorded for `seq`, or `None` when no entry
    /// exists. The absent case is normal, not an error.
    fn lookup(&self, seq: u64) -> Option<Instant>;

    /// True when the peer wrote sequence numbers into payloads in network
    /// byte order; the probe reads them back the same way.
    fn has_net_order(&self) -> bool {
        false
    }
}

/// Simple recorder keeping one slot per sequence number. Used by the demo
/// binary and the tests; a production pipeline wires in its own peer.
pub struct InMemoryRecorder {
    stamps: RwLock<Vec<Option<Instant>>>,
    net_order: bool,
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self::with_net_order(false)
    }

    pub fn with_net_order(net_order: bool) -> Self {
        InMemoryRecorder {
            stamps: RwLock::new(Vec::new()),
            net_order,
        }
    }

    /// Records (or overwrites) the timestamp for `seq`.
    pub fn record(&self, seq: u64, at: Instant) {
        let mut stamps = self.stamps.write();
        let index = seq as usize;
        if index >= stamps.len() {
            stamps.resize(index + 1, None);
        }
        stamps[index] = Some(at);
    }
}

impl Default for InMemoryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl TimestampRecorder for InMemoryRecorder {
    fn lookup(&self, seq: u64) -> Option<Instant> {
        self.stamps.read().get(seq as usize).copied().flatten()
    }

    fn has_net_order(&self) -> bool {
        self.net_order
    }
}
