//! Process-wide link counters.
//!
//! Cheap atomics bumped from the read loop and the RC simulator; the CLI prints a
//! snapshot on exit.
use std::sync::atomic::{AtomicU64, Ordering};

static FRAMES_DECODED: AtomicU64 = AtomicU64::new(0);
static PROTOCOL_ERRORS: AtomicU64 = AtomicU64::new(0);
static CHECKSUM_ERRORS: AtomicU64 = AtomicU64::new(0);
static OUT_OF_BAND_BYTES: AtomicU64 = AtomicU64::new(0);
static RECONNECTS: AtomicU64 = AtomicU64::new(0);
static RC_FRAMES_SENT: AtomicU64 = AtomicU64::new(0);

pub fn inc_frames_decoded() {
    FRAMES_DECODED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_protocol_errors() {
    PROTOCOL_ERRORS.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_checksum_errors() {
    CHECKSUM_ERRORS.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_out_of_band() {
    OUT_OF_BAND_BYTES.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_reconnects() {
    RECONNECTS.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_rc_frames_sent() {
    RC_FRAMES_SENT.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub frames_decoded: u64,
    pub protocol_errors: u64,
    pub checksum_errors: u64,
    pub out_of_band_bytes: u64,
    pub reconnects: u64,
    pub rc_frames_sent: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        frames_decoded: FRAMES_DECODED.load(Ordering::Relaxed),
        protocol_errors: PROTOCOL_ERRORS.load(Ordering::Relaxed),
        checksum_errors: CHECKSUM_ERRORS.load(Ordering::Relaxed),
        out_of_band_bytes: OUT_OF_BAND_BYTES.load(Ordering::Relaxed),
        reconnects: RECONNECTS.load(Ordering::Relaxed),
        rc_frames_sent: RC_FRAMES_SENT.load(Ordering::Relaxed),
    }
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "frames={} protocol_errors={} checksum_errors={} oob_bytes={} reconnects={} rc_sent={}",
            self.frames_decoded,
            self.protocol_errors,
            self.checksum_errors,
            self.out_of_band_bytes,
            self.reconnects,
            self.rc_frames_sent
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_only_grow() {
        let before = snapshot();
        inc_frames_decoded();
        inc_checksum_errors();
        inc_protocol_errors();
        let after = snapshot();
        assert!(after.frames_decoded > before.frames_decoded);
        assert!(after.checksum_errors > before.checksum_errors);
        assert!(after.protocol_errors > before.protocol_errors);
        assert!(after.to_string().contains("frames="));
    }
}
