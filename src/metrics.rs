use crate::wire::{DropReason, FlushReason};
use std::array;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Lock-free ingest counters shared between transports, consumer and operator
/// surfaces.
#[derive(Debug)]
pub struct IngestMetrics {
    frames_total: [AtomicU64; FlushReason::ALL.len()],
    drops_total: [AtomicU64; DropReason::ALL.len()],
    packets_total: AtomicU64,
    bytes_total: AtomicU64,
    checksum_flags_total: AtomicU64,
    resync_bytes_total: AtomicU64,
    last_frame_ts_ms: AtomicU64,
}

impl Default for IngestMetrics {
    fn default() -> Self {
        Self {
            frames_total: array::from_fn(|_| AtomicU64::new(0)),
            drops_total: array::from_fn(|_| AtomicU64::new(0)),
            packets_total: AtomicU64::new(0),
            bytes_total: AtomicU64::new(0),
            checksum_flags_total: AtomicU64::new(0),
            resync_bytes_total: AtomicU64::new(0),
            last_frame_ts_ms: AtomicU64::new(0),
        }
    }
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_packet(&self, bytes: usize) {
        self.packets_total.fetch_add(1, Ordering::Relaxed);
        self.bytes_total.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_frame(&self, reason: FlushReason) {
        self.frames_total[reason.index()].fetch_add(1, Ordering::Relaxed);
        self.last_frame_ts_ms.store(unix_now_ms(), Ordering::Relaxed);
    }

    pub fn record_drop(&self, reason: DropReason) {
        self.drops_total[reason.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Checksum mismatch: flagged, not dropped.
    pub fn record_checksum_flag(&self) {
        self.checksum_flags_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resync_bytes(&self, bytes: usize) {
        self.resync_bytes_total.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn packets_total(&self) -> u64 {
        self.packets_total.load(Ordering::Relaxed)
    }

    pub fn bytes_total(&self) -> u64 {
        self.bytes_total.load(Ordering::Relaxed)
    }

    pub fn checksum_flags_total(&self) -> u64 {
        self.checksum_flags_total.load(Ordering::Relaxed)
    }

    pub fn resync_bytes_total(&self) -> u64 {
        self.resync_bytes_total.load(Ordering::Relaxed)
    }

    pub fn last_frame_ts_ms(&self) -> Option<u64> {
        match self.last_frame_ts_ms.load(Ordering::Relaxed) {
            0 => None,
            ts => Some(ts),
        }
    }

    pub fn frames_snapshot(&self) -> Vec<(&'static str, u64)> {
        FlushReason::ALL
            .iter()
            .enumerate()
            .map(|(idx, reason)| (reason.as_str(), self.frames_total[idx].load(Ordering::Relaxed)))
            .collect()
    }

    pub fn drops_snapshot(&self) -> Vec<(&'static str, u64)> {
        DropReason::ALL
            .iter()
            .enumerate()
            .map(|(idx, reason)| (reason.as_str(), self.drops_total[idx].load(Ordering::Relaxed)))
            .collect()
    }
}

fn unix_now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}
