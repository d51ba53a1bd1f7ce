//! The 11-byte packet format spoken on the repeller bus, with builders for
//! every known request and a single prioritized classifier for everything
//! observed on the wire.

use strum_macros::Display;

/// Every frame on the bus is exactly this long.
pub const FRAME_LEN: usize = 11;

/// Every valid frame starts with this sync byte.
pub const SYNC: u8 = 0xAA;

/// Highest byte-1 value that still means "addressed to a device".
pub const MAX_ADDRESSED: u8 = 0x7E;

/// Byte 1 of every device-to-controller response.
const RESPONSE: u8 = 0x80;
/// Byte 1 of broadcast color/power packets.
const BROADCAST: u8 = 0x8E;
/// Byte 1 of discovery/addressing packets.
const DISCOVERY: u8 = 0x82;

// Fixed templates for the system-level packets. These are compared whole.
const DISCOVER: [u8; FRAME_LEN] = [SYNC, DISCOVERY, 0x07, 0, 0, 0, 0, 0, 0, 0, 0];
const POWER_UP: [u8; FRAME_LEN] = [SYNC, BROADCAST, 0x09, 0x01, 0, 0, 0, 0, 0, 0, 0];
// Never captured on the wire; assumed to be the power-up shape with the flag
// byte cleared.
const POWER_DOWN: [u8; FRAME_LEN] = [SYNC, BROADCAST, 0x09, 0x00, 0, 0, 0, 0, 0, 0, 0];
const LED_ON_ACK: [u8; FRAME_LEN] = [SYNC, RESPONSE, 0x03, 0x08, 0, 0, 0, 0, 0, 0, 0];
const WARMUP_COMPLETE_ACK: [u8; FRAME_LEN] = [SYNC, RESPONSE, 0x0C, 0, 0, 0, 0, 0, 0, 0, 0];
const STARTUP_COMPLETE_ACK: [u8; FRAME_LEN] = [SYNC, RESPONSE, 0x0A, 0x01, 0, 0, 0, 0, 0, 0, 0];
// Trailer bytes 4..11 of a startup acknowledgement (byte 3 is the address).
const STARTUP_ACK_TAIL: [u8; 7] = [0x05, 0x03, 0xF2, 0x00, 0x0A, 0x03, 0x89];

/// Everything a received or transmitted frame can mean.
///
/// One wire shape maps to exactly one kind; [`Packet::classify`] checks the
/// most specific shapes first, so the declaration order here mirrors the
/// match order.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "snake_case")]
pub enum PacketKind {
    // Controller -> device requests.
    /// `AA 82 07 ..` broadcast enumeration request.
    Discover,
    /// `AA 8E 09 01 ..` broadcast power-up.
    PowerUp,
    /// `AA 8E 09 00 ..` broadcast power-down.
    PowerDown,
    /// `AA 82 04 aa ..` assign address `aa` to the unaddressed device.
    SetAddress,
    /// `AA aa 01 ..` liveness/state query.
    Heartbeat,
    /// `AA aa 03 08 ..` latch the most recent LED parameters.
    LedOnConfirm,
    /// `AA aa AF 01 ..` first serial-number fragment request.
    SerialRequest1,
    /// `AA aa B7 01 ..` second serial-number fragment request.
    SerialRequest2,
    /// `AA aa BF 01 ..` begin warm-up.
    Warmup,
    /// `AA aa 0C ..` end warm-up.
    WarmupComplete,
    /// `AA aa 0A 01 ..` startup sequence finished.
    StartupComplete,
    /// `AA aa 05 bb ..` LED brightness 0-100.
    LedBrightness,
    /// `AA aa 05 bb 00 FF ..` LED brightness during startup.
    LedBrightnessStartup,
    /// `AA 8E 06 rr gg bb ..` broadcast LED color.
    Color,
    /// `AA aa 06 rr gg bb ..` per-device LED color during startup.
    ColorStartup,
    /// `AA 8E 03 08 gg bb ..` color confirmation (red absent by protocol).
    ColorConfirm,

    // Device -> controller responses.
    /// `AA 80 07 aa 05 03 F2 00 0A 03 89` startup acknowledgement.
    StartupAck,
    /// Same shape with address `00`: the device has no address yet.
    StartupAckUnaddressed,
    /// `AA 80 AF ..` serial fragment 1.
    SerialReply1,
    /// `AA 80 B7 ..` serial fragment 2.
    SerialReply2,
    /// `AA 80 BF ..` warm-up ack, or `AA 80 01 02 ..` heartbeat: warming up.
    WarmupAck,
    /// `AA 80 0C ..` warm-up-complete ack, or `AA 80 01 05 ..` heartbeat:
    /// warmed up.
    WarmupCompleteAck,
    /// `AA 80 01 04 03 ..` heartbeat: running.
    HeartbeatRunning,
    /// `AA 80 05 bb ..` brightness ack.
    LedBrightnessAck,
    /// `AA 80 05 bb 00 FF ..` startup brightness ack.
    LedBrightnessStartupAck,
    /// `AA 80 06 rr gg bb ..` startup color ack.
    ColorStartupAck,
    /// `AA 80 03 08 ..` LED-on ack.
    LedOnAck,
    /// `AA 80 0A 01 ..` startup-complete ack.
    StartupCompleteAck,

    /// Anything that matched no known shape (or did not start with `0xAA`).
    Unknown,
}

/// One fixed 11-byte frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    data: [u8; FRAME_LEN],
}

/// True when every byte from `start` to the end of the frame is zero.
fn rest_zero(data: &[u8; FRAME_LEN], start: usize) -> bool {
    data[start..].iter().all(|&b| b == 0x00)
}

impl Packet {
    /// Wrap a raw 11-byte frame. No validation happens here; classification
    /// decides what the frame means.
    pub fn from_raw(data: [u8; FRAME_LEN]) -> Self {
        Self { data }
    }

    /// The raw frame bytes.
    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.data
    }

    /// Whether the frame carries the mandatory sync byte.
    pub fn is_valid(&self) -> bool {
        self.data[0] == SYNC
    }

    fn addressed(address: u8, rest: &[u8]) -> Self {
        let mut data = [0u8; FRAME_LEN];
        data[0] = SYNC;
        data[1] = address;
        data[2..2 + rest.len()].copy_from_slice(rest);
        Self { data }
    }

    /// Broadcast enumeration request.
    pub fn discover() -> Self {
        Self { data: DISCOVER }
    }

    /// Broadcast power-up for all devices on the bus.
    pub fn power_up() -> Self {
        Self { data: POWER_UP }
    }

    /// Broadcast power-down for all devices on the bus.
    pub fn power_down() -> Self {
        Self { data: POWER_DOWN }
    }

    /// Assign `address` to the one device currently answering unaddressed.
    pub fn set_address(address: u8) -> Self {
        Self::addressed(DISCOVERY, &[0x04, address])
    }

    /// Liveness/state query for one device.
    pub fn heartbeat(address: u8) -> Self {
        Self::addressed(address, &[0x01])
    }

    /// Latch the most recently sent LED parameters.
    pub fn led_on_confirm(address: u8) -> Self {
        Self::addressed(address, &[0x03, 0x08])
    }

    /// Request the first 8 bytes of the device serial number.
    pub fn serial_request_1(address: u8) -> Self {
        Self::addressed(address, &[0xAF, 0x01])
    }

    /// Request the second 8 bytes of the device serial number.
    pub fn serial_request_2(address: u8) -> Self {
        Self::addressed(address, &[0xB7, 0x01])
    }

    /// Begin warming up one device.
    pub fn warmup(address: u8) -> Self {
        Self::addressed(address, &[0xBF, 0x01])
    }

    /// End warm-up for one device.
    pub fn warmup_complete(address: u8) -> Self {
        Self::addressed(address, &[0x0C])
    }

    /// Tell one device its startup sequence is finished.
    pub fn startup_complete(address: u8) -> Self {
        Self::addressed(address, &[0x0A, 0x01])
    }

    /// Set LED brightness (0-100) on one device.
    pub fn led_brightness(address: u8, brightness_pct: u8) -> Self {
        Self::addressed(address, &[0x05, brightness_pct])
    }

    /// Set LED brightness (0-100) during the startup sequence.
    pub fn led_brightness_startup(address: u8, brightness_pct: u8) -> Self {
        Self::addressed(address, &[0x05, brightness_pct, 0x00, 0xFF])
    }

    /// Broadcast an LED color to every device.
    pub fn color(red: u8, green: u8, blue: u8) -> Self {
        Self::addressed(BROADCAST, &[0x06, red, green, blue])
    }

    /// Set the LED color on one device during the startup sequence.
    pub fn color_startup(address: u8, red: u8, green: u8, blue: u8) -> Self {
        Self::addressed(address, &[0x06, red, green, blue])
    }

    /// Broadcast color confirmation. Only green and blue are echoed; the red
    /// channel is simply absent from this shape.
    pub fn color_confirm(green: u8, blue: u8) -> Self {
        Self::addressed(BROADCAST, &[0x03, 0x08, green, blue])
    }

    /// Identify this frame. First matching shape wins; shapes with more
    /// payload structure are checked before broader address-range matches,
    /// which is load-bearing (e.g. the startup brightness ack would
    /// otherwise be swallowed by the plain brightness ack).
    pub fn classify(&self) -> PacketKind {
        use PacketKind::*;

        let d = &self.data;
        if d[0] != SYNC {
            return Unknown;
        }
        let cat = d[1];
        let to_device = cat <= MAX_ADDRESSED;

        // LED brightness, plain then startup flavor.
        if d[2] == 0x05 && rest_zero(d, 4) {
            if to_device {
                return LedBrightness;
            }
            if cat == RESPONSE {
                return LedBrightnessAck;
            }
        }
        if d[2] == 0x05 && d[4] == 0x00 && d[5] == 0xFF && rest_zero(d, 6) {
            if to_device {
                return LedBrightnessStartup;
            }
            if cat == RESPONSE {
                return LedBrightnessStartupAck;
            }
        }

        // Heartbeat status responses.
        if cat == RESPONSE && d[2] == 0x01 && d[3] == 0x04 && d[4] == 0x03 && rest_zero(d, 6) {
            return HeartbeatRunning;
        }
        if cat == RESPONSE && d[2] == 0x01 && d[3] == 0x02 && rest_zero(d, 6) {
            return WarmupAck;
        }
        if cat == RESPONSE && d[2] == 0x01 && d[3] == 0x05 && rest_zero(d, 6) {
            return WarmupCompleteAck;
        }

        // Color family.
        if cat == BROADCAST && d[2] == 0x06 && rest_zero(d, 6) {
            return Color;
        }
        if cat == BROADCAST && d[2] == 0x03 && d[3] == 0x08 && rest_zero(d, 6) {
            return ColorConfirm;
        }
        if to_device && d[2] == 0x06 && rest_zero(d, 6) {
            return ColorStartup;
        }
        if cat == RESPONSE && d[2] == 0x06 && rest_zero(d, 6) {
            return ColorStartupAck;
        }

        // Addressed requests.
        if to_device && d[2] == 0x01 && rest_zero(d, 3) {
            return Heartbeat;
        }
        if to_device && d[2] == 0x03 && d[3] == 0x08 && rest_zero(d, 4) {
            return LedOnConfirm;
        }
        if to_device && d[2] == 0xAF && d[3] == 0x01 && rest_zero(d, 4) {
            return SerialRequest1;
        }
        if to_device && d[2] == 0xB7 && d[3] == 0x01 && rest_zero(d, 4) {
            return SerialRequest2;
        }
        if to_device && d[2] == 0xBF && d[3] == 0x01 && rest_zero(d, 4) {
            return Warmup;
        }
        if to_device && d[2] == 0x0C && rest_zero(d, 3) {
            return WarmupComplete;
        }
        if to_device && d[2] == 0x0A && d[3] == 0x01 && rest_zero(d, 4) {
            return StartupComplete;
        }

        // System-level packets, compared as whole templates.
        if *d == DISCOVER {
            return Discover;
        }
        if *d == POWER_UP {
            return PowerUp;
        }
        if *d == POWER_DOWN {
            return PowerDown;
        }
        if cat == DISCOVERY && d[2] == 0x04 && rest_zero(d, 4) {
            return SetAddress;
        }

        // Startup acknowledgement; the zero-address form means the device
        // still needs an address and must be handled differently, so it is
        // split out here rather than left to the caller.
        if cat == RESPONSE && d[2] == 0x07 && d[4..] == STARTUP_ACK_TAIL {
            if d[3] == 0x00 {
                return StartupAckUnaddressed;
            }
            return StartupAck;
        }

        // Serial fragments and the warm-up ack carry arbitrary payloads.
        if cat == RESPONSE && d[2] == 0xAF {
            return SerialReply1;
        }
        if cat == RESPONSE && d[2] == 0xB7 {
            return SerialReply2;
        }
        if cat == RESPONSE && d[2] == 0xBF {
            return WarmupAck;
        }

        if *d == LED_ON_ACK {
            return LedOnAck;
        }
        if *d == WARMUP_COMPLETE_ACK {
            return WarmupCompleteAck;
        }
        if *d == STARTUP_COMPLETE_ACK {
            return StartupCompleteAck;
        }

        Unknown
    }

    /// The device address this frame concerns, if any.
    ///
    /// Addressed requests carry it in byte 1; startup acknowledgements carry
    /// it in byte 3. Broadcast and system frames have none.
    pub fn address(&self) -> Option<u8> {
        if self.data[0] != SYNC {
            return None;
        }
        if self.data[1] <= MAX_ADDRESSED {
            return Some(self.data[1]);
        }
        if self.data[1] == RESPONSE && self.data[2] == 0x07 {
            return Some(self.data[3]);
        }
        None
    }

    /// Brightness payload of an LED brightness frame (byte 3).
    pub fn brightness(&self) -> u8 {
        self.data[3]
    }

    /// RGB payload of a color frame (bytes 3-5).
    pub fn rgb(&self) -> (u8, u8, u8) {
        (self.data[3], self.data[4], self.data[5])
    }

    /// The 8-byte serial-number fragment of a serial reply, with anything
    /// outside printable ASCII replaced by `.`.
    pub fn serial_fragment(&self) -> heapless::String<8> {
        let mut fragment = heapless::String::new();
        for &b in &self.data[3..FRAME_LEN] {
            let c = if (32..=126).contains(&b) { b as char } else { '.' };
            // Cannot overflow: exactly 8 payload bytes.
            let _ = fragment.push(c);
        }
        fragment
    }
}

impl core::fmt::Display for Packet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for b in &self.data {
            write!(f, "{b:02X} ")?;
        }
        write!(f, "({})", self.classify())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(bytes: &[u8]) -> Packet {
        let mut data = [0u8; FRAME_LEN];
        data[..bytes.len()].copy_from_slice(bytes);
        Packet::from_raw(data)
    }

    #[test]
    fn discover_template_matches_capture() {
        let expected = [0xAA, 0x82, 0x07, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(Packet::discover().as_bytes(), &expected);
        assert_eq!(Packet::discover().classify(), PacketKind::Discover);
    }

    #[test]
    fn startup_ack_extracts_address() {
        let p = frame(&[0xAA, 0x80, 0x07, 0x05, 0x05, 0x03, 0xF2, 0x00, 0x0A, 0x03, 0x89]);
        assert_eq!(p.classify(), PacketKind::StartupAck);
        assert_eq!(p.address(), Some(0x05));
    }

    #[test]
    fn zero_address_startup_ack_is_the_unaddressed_variant() {
        let p = frame(&[0xAA, 0x80, 0x07, 0x00, 0x05, 0x03, 0xF2, 0x00, 0x0A, 0x03, 0x89]);
        assert_eq!(p.classify(), PacketKind::StartupAckUnaddressed);
    }

    #[test]
    fn startup_ack_with_wrong_tail_is_unknown() {
        let p = frame(&[0xAA, 0x80, 0x07, 0x05, 0x05, 0x03, 0xF2, 0x00, 0x0A, 0x03, 0x00]);
        assert_eq!(p.classify(), PacketKind::Unknown);
    }

    #[test]
    fn brightness_round_trips() {
        let p = Packet::led_brightness(0x05, 72);
        assert_eq!(p.classify(), PacketKind::LedBrightness);
        assert_eq!(p.address(), Some(0x05));
        assert_eq!(p.brightness(), 72);
    }

    #[test]
    fn startup_brightness_wins_over_plain_brightness() {
        let p = Packet::led_brightness_startup(0x02, 55);
        assert_eq!(p.classify(), PacketKind::LedBrightnessStartup);
        assert_eq!(p.brightness(), 55);

        let ack = frame(&[0xAA, 0x80, 0x05, 55, 0x00, 0xFF, 0, 0, 0, 0, 0]);
        assert_eq!(ack.classify(), PacketKind::LedBrightnessStartupAck);
    }

    #[test]
    fn color_round_trips() {
        let p = Packet::color(0x03, 0xD5, 0xFF);
        assert_eq!(p.classify(), PacketKind::Color);
        assert_eq!(p.rgb(), (0x03, 0xD5, 0xFF));

        let p = Packet::color_startup(0x07, 1, 2, 3);
        assert_eq!(p.classify(), PacketKind::ColorStartup);
        assert_eq!(p.address(), Some(0x07));
        assert_eq!(p.rgb(), (1, 2, 3));
    }

    #[test]
    fn color_confirm_echoes_green_and_blue_only() {
        let p = Packet::color_confirm(0xD5, 0xFF);
        assert_eq!(
            p.as_bytes(),
            &[0xAA, 0x8E, 0x03, 0x08, 0xD5, 0xFF, 0, 0, 0, 0, 0]
        );
        assert_eq!(p.classify(), PacketKind::ColorConfirm);
    }

    #[test]
    fn addressed_requests_classify_and_round_trip_addresses() {
        let cases = [
            (Packet::heartbeat(0x11), PacketKind::Heartbeat),
            (Packet::led_on_confirm(0x11), PacketKind::LedOnConfirm),
            (Packet::serial_request_1(0x11), PacketKind::SerialRequest1),
            (Packet::serial_request_2(0x11), PacketKind::SerialRequest2),
            (Packet::warmup(0x11), PacketKind::Warmup),
            (Packet::warmup_complete(0x11), PacketKind::WarmupComplete),
            (Packet::startup_complete(0x11), PacketKind::StartupComplete),
        ];
        for (packet, kind) in cases {
            assert_eq!(packet.classify(), kind, "{packet}");
            assert_eq!(packet.address(), Some(0x11));
        }
    }

    #[test]
    fn heartbeat_status_responses_classify() {
        let warming = frame(&[0xAA, 0x80, 0x01, 0x02, 0x12, 0x34, 0, 0, 0, 0, 0]);
        assert_eq!(warming.classify(), PacketKind::WarmupAck);

        let warmed = frame(&[0xAA, 0x80, 0x01, 0x05, 0x12, 0x34, 0, 0, 0, 0, 0]);
        assert_eq!(warmed.classify(), PacketKind::WarmupCompleteAck);

        let running = frame(&[0xAA, 0x80, 0x01, 0x04, 0x03, 0x22, 0, 0, 0, 0, 0]);
        assert_eq!(running.classify(), PacketKind::HeartbeatRunning);
    }

    #[test]
    fn warmup_ack_matches_regardless_of_payload() {
        let p = frame(&[0xAA, 0x80, 0xBF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(p.classify(), PacketKind::WarmupAck);
    }

    #[test]
    fn serial_fragment_filters_non_printable_bytes() {
        // Capture: AA 80 B7 42 41 41 37 33 30 33 00 -> "BAA7303."
        let p = frame(&[0xAA, 0x80, 0xB7, 0x42, 0x41, 0x41, 0x37, 0x33, 0x30, 0x33, 0x00]);
        assert_eq!(p.classify(), PacketKind::SerialReply2);
        assert_eq!(p.serial_fragment().as_str(), "BAA7303.");
    }

    #[test]
    fn missing_sync_byte_is_unknown() {
        let p = frame(&[0x00, 0x82, 0x07, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(p.classify(), PacketKind::Unknown);
        assert!(!p.is_valid());
        assert_eq!(p.address(), None);
    }

    #[test]
    fn classify_is_total_over_arbitrary_frames() {
        // Not exhaustive, but sweeps the category byte and a payload byte to
        // make sure every input lands on exactly one kind without panicking.
        for cat in 0..=0xFFu8 {
            for b2 in [0x00, 0x01, 0x05, 0x06, 0x07, 0x0C, 0xAF, 0xBF, 0xFF] {
                let p = frame(&[0xAA, cat, b2, 0x01, 0, 0, 0, 0, 0, 0, 0]);
                let _ = p.classify();
            }
        }
    }

    #[test]
    fn set_address_uses_discovery_category() {
        let p = Packet::set_address(0x03);
        assert_eq!(p.as_bytes(), &[0xAA, 0x82, 0x04, 0x03, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(p.classify(), PacketKind::SetAddress);
    }

    #[test]
    fn power_templates_differ_only_in_flag_byte() {
        assert_eq!(Packet::power_up().classify(), PacketKind::PowerUp);
        assert_eq!(Packet::power_down().classify(), PacketKind::PowerDown);
        assert_eq!(Packet::power_up().as_bytes()[3], 0x01);
        assert_eq!(Packet::power_down().as_bytes()[3], 0x00);
    }
}
