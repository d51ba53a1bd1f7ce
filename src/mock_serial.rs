//! Mock collaborators used in unit tests: a scripted RS-485 transceiver, a
//! manually advanced clock, and an in-memory settings store.

use crate::bus::{Clock, SettingsStore, Transceiver};
use crate::deframer::Instant;
use crate::packet::{FRAME_LEN, Packet};

/// Emulates one half-duplex transceiver with direction and power pins.
///
/// Reads come from a pre-queued buffer one call at a time; writes are
/// captured for byte-exact assertions.
pub struct MockTransceiver {
    /// Everything the controller wrote, in order.
    write_buffer: heapless::Vec<u8, 1024>,
    /// Scripted bytes handed out by `read()`.
    read_buffer: heapless::Vec<u8, 1024>,
    read_position: usize,
    /// Current state of the direction pin (true = transmit).
    pub transmitting: bool,
    /// Current state of the power rail pin.
    pub powered: bool,
    /// Fail the next write/flush calls.
    pub fail_write: bool,
    /// Fail direction pin changes.
    pub fail_direction: bool,
    /// Fail power pin changes.
    pub fail_power: bool,
}

#[derive(Debug)]
pub enum MockTransceiverError {
    /// No data available right now.
    WouldBlock,
    /// A mock buffer filled up.
    BufferOverflow,
    /// Injected fault.
    Simulated,
}

impl core::fmt::Display for MockTransceiverError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(self, f)
    }
}

impl core::error::Error for MockTransceiverError {}

impl embedded_io::Error for MockTransceiverError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            MockTransceiverError::WouldBlock => embedded_io::ErrorKind::Other,
            MockTransceiverError::BufferOverflow => embedded_io::ErrorKind::OutOfMemory,
            MockTransceiverError::Simulated => embedded_io::ErrorKind::InvalidData,
        }
    }
}

impl embedded_io::ErrorType for MockTransceiver {
    type Error = MockTransceiverError;
}

impl embedded_io::Write for MockTransceiver {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if self.fail_write {
            return Err(MockTransceiverError::Simulated);
        }
        for &byte in buf {
            self.write_buffer
                .push(byte)
                .map_err(|_| MockTransceiverError::BufferOverflow)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        if self.fail_write {
            return Err(MockTransceiverError::Simulated);
        }
        Ok(())
    }
}

impl embedded_io::Read for MockTransceiver {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.read_position >= self.read_buffer.len() {
            return Err(MockTransceiverError::WouldBlock);
        }

        let available = self.read_buffer.len() - self.read_position;
        let count = core::cmp::min(buf.len(), available);
        buf[..count]
            .copy_from_slice(&self.read_buffer[self.read_position..self.read_position + count]);
        self.read_position += count;
        Ok(count)
    }
}

impl Transceiver for MockTransceiver {
    fn set_direction(&mut self, transmit: bool) -> Result<(), Self::Error> {
        if self.fail_direction {
            return Err(MockTransceiverError::Simulated);
        }
        self.transmitting = transmit;
        Ok(())
    }

    fn set_power(&mut self, on: bool) -> Result<(), Self::Error> {
        if self.fail_power {
            return Err(MockTransceiverError::Simulated);
        }
        self.powered = on;
        Ok(())
    }
}

impl MockTransceiver {
    pub fn new() -> Self {
        Self {
            write_buffer: heapless::Vec::new(),
            read_buffer: heapless::Vec::new(),
            read_position: 0,
            transmitting: false,
            powered: false,
            fail_write: false,
            fail_direction: false,
            fail_power: false,
        }
    }

    /// Append bytes to be handed out by subsequent `read()` calls.
    pub fn queue_read(&mut self, data: &[u8]) {
        for &byte in data {
            self.read_buffer
                .push(byte)
                .unwrap_or_else(|_| panic!("mock read buffer overflow"));
        }
    }

    /// Everything written so far, as raw bytes.
    pub fn written_data(&self) -> &[u8] {
        &self.write_buffer
    }

    /// Everything written so far, split into whole frames.
    pub fn written_frames(&self) -> impl Iterator<Item = Packet> + '_ {
        self.write_buffer.chunks_exact(FRAME_LEN).map(|chunk| {
            let mut data = [0u8; FRAME_LEN];
            data.copy_from_slice(chunk);
            Packet::from_raw(data)
        })
    }

    pub fn clear_written_data(&mut self) {
        self.write_buffer.clear();
    }
}

/// Manually advanced millisecond clock. Delays move time forward, so
/// timeouts expire without real waiting.
pub struct MockClock {
    now_us: u64,
}

impl MockClock {
    pub fn new() -> Self {
        Self { now_us: 0 }
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        Instant::from_ticks(self.now_us / 1000)
    }

    fn delay_ms(&mut self, ms: u32) {
        self.now_us += u64::from(ms) * 1000;
    }

    fn delay_us(&mut self, us: u32) {
        self.now_us += u64::from(us);
    }
}

/// In-memory settings store holding at most one record.
pub struct MemStore {
    pub record: Option<heapless::Vec<u8, 32>>,
    /// Number of `save` calls, for asserting persistence is skipped when
    /// nothing changed.
    pub saves: usize,
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            record: None,
            saves: 0,
        }
    }
}

impl SettingsStore for MemStore {
    fn load(&mut self, _bus_id: u8, buf: &mut [u8]) -> usize {
        match &self.record {
            Some(record) => {
                let count = record.len().min(buf.len());
                buf[..count].copy_from_slice(&record[..count]);
                count
            }
            None => 0,
        }
    }

    fn save(&mut self, _bus_id: u8, record: &[u8]) {
        let mut stored = heapless::Vec::new();
        stored
            .extend_from_slice(record)
            .unwrap_or_else(|_| panic!("mock store overflow"));
        self.record = Some(stored);
        self.saves += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::{Read, Write};

    #[test]
    fn writes_are_captured_in_order() {
        let mut mock = MockTransceiver::new();
        mock.write(&[0xAA, 0x82]).unwrap();
        mock.write(&[0x07]).unwrap();
        assert_eq!(mock.written_data(), &[0xAA, 0x82, 0x07]);
    }

    #[test]
    fn read_blocks_once_the_queue_is_exhausted() {
        let mut mock = MockTransceiver::new();
        mock.queue_read(&[0x01, 0x02]);

        let mut buf = [0u8; 8];
        assert_eq!(mock.read(&mut buf).unwrap(), 2);
        assert!(matches!(
            mock.read(&mut buf),
            Err(MockTransceiverError::WouldBlock)
        ));
    }

    #[test]
    fn queued_reads_accumulate() {
        let mut mock = MockTransceiver::new();
        mock.queue_read(&[0x01]);
        mock.queue_read(&[0x02]);

        let mut buf = [0u8; 1];
        assert_eq!(mock.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 0x01);
        assert_eq!(mock.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 0x02);
    }

    #[test]
    fn direction_and_power_pins_track_state() {
        let mut mock = MockTransceiver::new();
        mock.set_direction(true).unwrap();
        mock.set_power(true).unwrap();
        assert!(mock.transmitting);
        assert!(mock.powered);

        mock.fail_direction = true;
        assert!(mock.set_direction(false).is_err());
        // A failed pin change leaves the state untouched.
        assert!(mock.transmitting);
    }

    #[test]
    fn write_error_injection_captures_nothing() {
        let mut mock = MockTransceiver::new();
        mock.fail_write = true;
        assert!(mock.write(&[0x01]).is_err());
        assert!(mock.flush().is_err());
        assert!(mock.written_data().is_empty());
    }

    #[test]
    fn clock_advances_only_through_delays() {
        let mut clock = MockClock::new();
        let start = clock.now();
        clock.delay_ms(5);
        clock.delay_us(2000);
        assert_eq!((clock.now() - start).to_millis(), 7);
    }

    #[test]
    fn store_round_trips_a_record() {
        let mut store = MemStore::new();
        let mut buf = [0u8; 4];
        assert_eq!(store.load(0, &mut buf), 0);

        store.save(0, &[1, 2, 3]);
        assert_eq!(store.load(0, &mut buf), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
        assert_eq!(store.saves, 1);
    }
}
