//! Per-bus settings persisted through the host's settings store.
//!
//! The store sees a flat ordered byte record; this module owns the layout,
//! the compiled-in defaults, and range clamping of loaded values.

/// Length of the serialized settings record:
/// `r, g, b, brightness, active_seconds: u32, warn_at: u32, auto_shutoff: u16`.
pub const RECORD_LEN: usize = 14;

/// Brightness arrives on the Zigbee 0-254 scale.
pub const MAX_ZIGBEE_BRIGHTNESS: u8 = 254;
/// Auto-shutoff ceiling in seconds (16 h).
pub const MAX_AUTO_SHUT_OFF_SECONDS: u16 = 57_600;

const DEFAULT_RED: u8 = 0x03;
const DEFAULT_GREEN: u8 = 0xD5;
const DEFAULT_BLUE: u8 = 0xFF;
const DEFAULT_BRIGHTNESS: u8 = 100;
const DEFAULT_WARN_AT_SECONDS: u32 = 349_200;
const DEFAULT_AUTO_SHUT_OFF_SECONDS: u16 = 18_000;

/// Externally persisted bus settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusSettings {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    /// Zigbee scale, 0-254.
    pub brightness: u8,
    /// Cumulative seconds the bus has spent warming up or repelling.
    pub cartridge_active_seconds: u32,
    /// Active-seconds threshold at which the cartridge counts as spent;
    /// 0 disables the feature.
    pub cartridge_warn_at_seconds: u32,
    /// Seconds of continuous operation before automatic shutoff; 0 disables.
    pub auto_shut_off_after_seconds: u16,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            red: DEFAULT_RED,
            green: DEFAULT_GREEN,
            blue: DEFAULT_BLUE,
            brightness: DEFAULT_BRIGHTNESS,
            cartridge_active_seconds: 0,
            cartridge_warn_at_seconds: DEFAULT_WARN_AT_SECONDS,
            auto_shut_off_after_seconds: DEFAULT_AUTO_SHUT_OFF_SECONDS,
        }
    }
}

impl BusSettings {
    /// Decode a persisted record. Fields are read in order for as long as
    /// bytes remain, so short or missing records fall back to defaults
    /// field-by-field. Out-of-range loaded values are clamped.
    pub fn from_record(record: &[u8]) -> Self {
        let mut settings = Self::default();

        if let Some(&b) = record.get(0) {
            settings.red = b;
        }
        if let Some(&b) = record.get(1) {
            settings.green = b;
        }
        if let Some(&b) = record.get(2) {
            settings.blue = b;
        }
        if let Some(&b) = record.get(3) {
            settings.brightness = b.min(MAX_ZIGBEE_BRIGHTNESS);
        }
        if record.len() >= 8 {
            settings.cartridge_active_seconds =
                u32::from_le_bytes([record[4], record[5], record[6], record[7]]);
        }
        if record.len() >= 12 {
            settings.cartridge_warn_at_seconds =
                u32::from_le_bytes([record[8], record[9], record[10], record[11]]);
        }
        if record.len() >= 14 {
            let value = u16::from_le_bytes([record[12], record[13]]);
            settings.auto_shut_off_after_seconds = if value > MAX_AUTO_SHUT_OFF_SECONDS {
                DEFAULT_AUTO_SHUT_OFF_SECONDS
            } else {
                value
            };
        }

        settings
    }

    /// Encode for the settings store. Field order is the load order.
    pub fn to_record(&self) -> [u8; RECORD_LEN] {
        let mut record = [0u8; RECORD_LEN];
        record[0] = self.red;
        record[1] = self.green;
        record[2] = self.blue;
        record[3] = self.brightness;
        record[4..8].copy_from_slice(&self.cartridge_active_seconds.to_le_bytes());
        record[8..12].copy_from_slice(&self.cartridge_warn_at_seconds.to_le_bytes());
        record[12..14].copy_from_slice(&self.auto_shut_off_after_seconds.to_le_bytes());
        record
    }

    /// Brightness on the device's 0-100 scale, rounded from the Zigbee
    /// 0-254 value.
    pub fn device_brightness(&self) -> u8 {
        let scaled = (u32::from(self.brightness) * 100 * 2 + 254) / 508;
        scaled as u8
    }
}
