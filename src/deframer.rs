//! Turns the raw receive byte stream into discrete 11-byte packets.
//!
//! The protocol has no length or checksum fields; frame boundaries are pure
//! timing. A gap longer than [`INTER_BYTE_GAP_MS`] between bytes marks the
//! end of a frame, and a complete frame is always exactly
//! [`FRAME_LEN`](crate::packet::FRAME_LEN) bytes.

use log::warn;

use crate::packet::{FRAME_LEN, Packet, SYNC};

/// Millisecond instant on the monotonic bus clock.
pub type Instant = fugit::Instant<u64, 1, 1000>;
/// Millisecond duration on the monotonic bus clock.
pub type Duration = fugit::Duration<u64, 1, 1000>;

/// Silence on the wire longer than this ends the in-flight frame.
pub const INTER_BYTE_GAP_MS: u64 = 8;

/// Accumulates one frame at a time from a timed byte stream.
///
/// One instance per bus; all state is owned here so a second bus gets its own
/// deframer rather than sharing hidden buffers.
pub struct Deframer {
    buffer: heapless::Vec<u8, FRAME_LEN>,
    last_byte_at: Option<Instant>,
}

impl Deframer {
    pub fn new() -> Self {
        Self {
            buffer: heapless::Vec::new(),
            last_byte_at: None,
        }
    }

    /// Discard any partially accumulated frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.last_byte_at = None;
    }

    /// Feed one received byte, stamped with its arrival time.
    ///
    /// Returns a packet as soon as the eleventh byte of a frame arrives. A
    /// sync byte seen mid-frame resynchronizes: whatever was buffered is
    /// discarded and a new frame starts at that byte.
    pub fn feed(&mut self, byte: u8, now: Instant) -> Option<Packet> {
        // A long-enough pause means whatever was buffered belonged to a
        // previous (necessarily incomplete) frame.
        if self.gap_expired(now) && !self.buffer.is_empty() {
            warn!(
                "discarding {} stale byte(s) after inter-frame gap",
                self.buffer.len()
            );
            self.buffer.clear();
        }

        if byte == SYNC && !self.buffer.is_empty() {
            warn!(
                "sync byte mid-frame, discarding {} byte(s) and resyncing",
                self.buffer.len()
            );
            self.buffer.clear();
        }

        self.last_byte_at = Some(now);
        if self.buffer.push(byte).is_err() {
            // Cannot happen while frames are emitted at FRAME_LEN, but a
            // full buffer must never wedge the stream.
            self.buffer.clear();
            let _ = self.buffer.push(byte);
        }

        if self.buffer.len() == FRAME_LEN {
            let mut data = [0u8; FRAME_LEN];
            data.copy_from_slice(&self.buffer);
            self.buffer.clear();
            self.last_byte_at = None;
            return Some(Packet::from_raw(data));
        }
        None
    }

    /// Check whether the inter-byte gap has expired with a partial frame
    /// buffered, and if so discard it. Called while the line is idle.
    pub fn poll_gap(&mut self, now: Instant) {
        if self.gap_expired(now) && !self.buffer.is_empty() {
            warn!(
                "discarding incomplete {}-byte frame after inter-frame gap",
                self.buffer.len()
            );
            self.buffer.clear();
            self.last_byte_at = None;
        }
    }

    fn gap_expired(&self, now: Instant) -> bool {
        match self.last_byte_at {
            Some(at) => now > at && (now - at) > Duration::millis(INTER_BYTE_GAP_MS),
            None => false,
        }
    }
}

impl Default for Deframer {
    fn default() -> Self {
        Self::new()
    }
}
