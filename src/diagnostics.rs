//! Error counters and the crash record ring.
//!
//! Non-fatal conditions are logged and counted per kind; the counts are
//! what a post-dive download shows.  Fatal conditions are written to a
//! 4-slot ring in the `crash` storage namespace before the device resets.

use log::{error, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::StoragePort;
use crate::error::{FatalError, NonFatalError};

// ───────────────────────────────────────────────────────────────
// Non-fatal counters
// ───────────────────────────────────────────────────────────────

/// Saturating occurrence count per [`NonFatalError`] kind.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ErrorCounters {
    counts: [u32; NonFatalError::COUNT],
}

impl ErrorCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log and count one occurrence.
    pub fn record(&mut self, kind: NonFatalError) {
        let slot = &mut self.counts[kind.index()];
        *slot = slot.saturating_add(1);
        warn!("non-fatal: {kind} (#{})", *slot);
    }

    pub fn count(&self, kind: NonFatalError) -> u32 {
        self.counts[kind.index()]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|c| u64::from(*c)).sum()
    }

    /// Kinds seen at least once, with their counts.
    pub fn nonzero(&self) -> impl Iterator<Item = (NonFatalError, u32)> + '_ {
        NonFatalError::ALL
            .into_iter()
            .map(|k| (k, self.count(k)))
            .filter(|(_, n)| *n > 0)
    }

    pub fn clear(&mut self) {
        self.counts = [0; NonFatalError::COUNT];
    }
}

// ───────────────────────────────────────────────────────────────
// Crash ring
// ───────────────────────────────────────────────────────────────

const CRASH_RING_SLOTS: usize = 4;
const CRASH_NAMESPACE: &str = "crash";
const CRASH_INDEX_KEY: &str = "crash_idx";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashEntry {
    pub uptime_ms: u32,
    /// [`FatalError::code`].
    pub code: u8,
    pub reason: heapless::String<32>,
}

impl CrashEntry {
    pub fn new(uptime_ms: u32, fatal: FatalError) -> Self {
        let mut reason = heapless::String::new();
        let _ = core::fmt::Write::write_fmt(&mut reason, format_args!("{fatal}"));
        Self {
            uptime_ms,
            code: fatal.code(),
            reason,
        }
    }
}

/// Storage-backed ring of [`CrashEntry`]s.
#[derive(Default)]
pub struct CrashLog {
    write_index: usize,
}

impl CrashLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the write index, or start at 0.
    pub fn init(&mut self, store: &dyn StoragePort) {
        let mut buf = [0u8; 4];
        if let Ok(4) = store.read(CRASH_NAMESPACE, CRASH_INDEX_KEY, &mut buf) {
            self.write_index = u32::from_le_bytes(buf) as usize % CRASH_RING_SLOTS;
        }
    }

    /// Write to the next slot and advance.  Failures are logged and
    /// swallowed: the device is about to reset either way.
    pub fn write_entry(&mut self, store: &mut dyn StoragePort, entry: &CrashEntry) {
        error!("fatal: {} at {} ms", entry.reason, entry.uptime_ms);
        let slot_key = Self::slot_key(self.write_index);
        match postcard::to_allocvec(entry) {
            Ok(bytes) => {
                if let Err(e) = store.write(CRASH_NAMESPACE, &slot_key, &bytes) {
                    error!("crash log: write failed ({e})");
                }
            }
            Err(_) => error!("crash log: encode failed"),
        }

        self.write_index = (self.write_index + 1) % CRASH_RING_SLOTS;
        let idx_bytes = (self.write_index as u32).to_le_bytes();
        let _ = store.write(CRASH_NAMESPACE, CRASH_INDEX_KEY, &idx_bytes);
    }

    /// Every decodable entry, slot order.
    pub fn read_all(&self, store: &dyn StoragePort) -> heapless::Vec<CrashEntry, CRASH_RING_SLOTS> {
        let mut entries = heapless::Vec::new();
        for i in 0..CRASH_RING_SLOTS {
            let mut buf = [0u8; 64];
            if let Ok(len) = store.read(CRASH_NAMESPACE, &Self::slot_key(i), &mut buf) {
                if let Ok(entry) = postcard::from_bytes::<CrashEntry>(&buf[..len]) {
                    let _ = entries.push(entry);
                }
            }
        }
        entries
    }

    pub fn clear(&mut self, store: &mut dyn StoragePort) {
        for i in 0..CRASH_RING_SLOTS {
            let _ = store.delete(CRASH_NAMESPACE, &Self::slot_key(i));
        }
        let _ = store.delete(CRASH_NAMESPACE, CRASH_INDEX_KEY);
        self.write_index = 0;
    }

    pub fn count(&self, store: &dyn StoragePort) -> usize {
        (0..CRASH_RING_SLOTS)
            .filter(|i| store.exists(CRASH_NAMESPACE, &Self::slot_key(*i)))
            .count()
    }

    fn slot_key(index: usize) -> heapless::String<8> {
        let mut s = heapless::String::new();
        let _ = core::fmt::Write::write_fmt(&mut s, format_args!("e{}", index));
        s
    }
}
