use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time counters of a [`crate::Session`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub packets_written: u64,
    pub write_errors: u64,
    pub packets_received: u64,
    pub frames_completed: u64,
    pub checksum_errors: u64,
    /// Frames that completed while no request was awaiting an answer.
    pub orphan_frames: u64,
    pub requests_dispatched: u64,
    pub requests_answered: u64,
    pub requests_timed_out: u64,
    pub requests_cancelled: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub packets_written: AtomicU64,
    pub write_errors: AtomicU64,
    pub packets_received: AtomicU64,
    pub frames_completed: AtomicU64,
    pub checksum_errors: AtomicU64,
    pub orphan_frames: AtomicU64,
    pub requests_dispatched: AtomicU64,
    pub requests_answered: AtomicU64,
    pub requests_timed_out: AtomicU64,
    pub requests_cancelled: AtomicU64,
}

impl StatsCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SessionStats {
        SessionStats {
            packets_written: self.packets_written.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            frames_completed: self.frames_completed.load(Ordering::Relaxed),
            checksum_errors: self.checksum_errors.load(Ordering::Relaxed),
            orphan_frames: self.orphan_frames.load(Ordering::Relaxed),
            requests_dispatched: self.requests_dispatched.load(Ordering::Relaxed),
            requests_answered: self.requests_answered.load(Ordering::Relaxed),
            requests_timed_out: self.requests_timed_out.load(Ordering::Relaxed),
            requests_cancelled: self.requests_cancelled.load(Ordering::Relaxed),
        }
    }
}
