//! The bus controller: owns one RS-485 channel and drives discovery,
//! warm-up, heartbeat polling and shutdown for every repeller on it.
//!
//! The controller is strictly half-duplex and cooperative: exactly one
//! request is ever in flight, and every "send then wait" step blocks the
//! caller for at most its timeout. Hardware access goes through the
//! [`Transceiver`], [`Clock`] and [`SettingsStore`] traits so the core holds
//! no pin, timer or filesystem code of its own.

use embedded_io::Error as _;
use log::{debug, info, warn};
use strum_macros::Display;

use crate::{
    deframer::{Deframer, Duration, Instant},
    error::{Error, Result},
    packet::{Packet, PacketKind},
    repeller::{ADDRESS_EXHAUSTED, Registry, RepellerState},
    settings::{BusSettings, MAX_AUTO_SHUT_OFF_SECONDS, MAX_ZIGBEE_BRIGHTNESS, RECORD_LEN},
};

/// How often [`Bus::poll`] runs a heartbeat sweep.
pub const POLL_INTERVAL_MS: u64 = 15_000;

/// Wait for a discovery response.
const DISCOVERY_TIMEOUT_MS: u32 = 100;
/// Wait for the (uninterpreted) reply to a set-address command.
const SET_ADDRESS_DRAIN_MS: u32 = 500;
/// Wait for any other per-device response.
const RESPONSE_TIMEOUT_MS: u32 = 1_000;
/// Collective settle time between the warm-up pass and the LED pass.
const WARMUP_SETTLE_MS: u32 = 4_000;
/// Power rail settle time after raising it.
const POWER_RAIL_SETTLE_MS: u32 = 1_000;
/// Quiet period after every transmission.
const POST_TX_QUIET_MS: u32 = 100;
/// Transceiver DE/RE settle time around a write.
const DIRECTION_SETTLE_US: u32 = 20;
/// Consecutive non-productive discovery rounds before giving up.
const DISCOVERY_STRIKE_LIMIT: u32 = 3;

/// One RS-485 transceiver with direction and power control.
///
/// `read` must be non-blocking: return whatever is buffered, or signal "no
/// data yet" with an error of kind `Other` or `TimedOut`.
pub trait Transceiver: embedded_io::Read + embedded_io::Write {
    /// Switch between transmit (`true`) and receive (`false`) mode.
    fn set_direction(&mut self, transmit: bool) -> core::result::Result<(), Self::Error>;
    /// Drive the power rail feeding the repeller string.
    fn set_power(&mut self, on: bool) -> core::result::Result<(), Self::Error>;
}

/// Monotonic time source and delay provider for one bus.
pub trait Clock {
    fn now(&self) -> Instant;
    fn delay_ms(&mut self, ms: u32);
    fn delay_us(&mut self, us: u32);
}

/// Persistence collaborator for [`BusSettings`] records.
pub trait SettingsStore {
    /// Read the record for `bus_id` into `buf`; returns the number of bytes
    /// read, 0 when no record exists.
    fn load(&mut self, bus_id: u8, buf: &mut [u8]) -> usize;
    /// Persist the record for `bus_id`.
    fn save(&mut self, bus_id: u8, record: &[u8]);
}

/// Lifecycle state of the bus as a whole.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum BusState {
    Offline,
    /// Power rail up, no warm-up started.
    Powered,
    WarmingUp,
    Repelling,
    /// Transceiver/pin failure. Terminal until [`Bus::init`] runs again.
    Error,
}

/// Controller for one repeller bus.
pub struct Bus<T: Transceiver, C: Clock, S: SettingsStore> {
    bus_id: u8,
    transceiver: T,
    clock: C,
    store: S,
    deframer: Deframer,
    registry: Registry,
    state: BusState,
    settings: BusSettings,
    /// When warm-up last began, for auto-shutoff tracking.
    warm_on_at: Option<Instant>,
    /// Save point for cartridge active-seconds accounting.
    active_seconds_save_at: Option<Instant>,
    last_polled: Option<Instant>,
}

impl<T: Transceiver, C: Clock, S: SettingsStore> Bus<T, C, S> {
    /// Create a controller. No hardware is touched until [`Bus::init`].
    pub fn new(bus_id: u8, transceiver: T, clock: C, store: S) -> Self {
        Self {
            bus_id,
            transceiver,
            clock,
            store,
            deframer: Deframer::new(),
            registry: Registry::new(),
            state: BusState::Offline,
            settings: BusSettings::default(),
            warm_on_at: None,
            active_seconds_save_at: None,
            last_polled: None,
        }
    }

    /// Put the transceiver into a known state (receive mode, rail off) and
    /// load persisted settings. A transceiver failure here marks the bus
    /// faulted; it stays faulted until `init` succeeds again.
    pub fn init(&mut self) {
        self.state = BusState::Offline;

        if self.transceiver.set_direction(false).is_err()
            || self.transceiver.set_power(false).is_err()
        {
            warn!("bus {}: transceiver configuration failed", self.bus_id);
            self.state = BusState::Error;
            return;
        }

        self.load_settings();
    }

    fn load_settings(&mut self) {
        let mut record = [0u8; RECORD_LEN];
        let n = self.store.load(self.bus_id, &mut record);
        if n == 0 {
            info!("bus {}: no stored settings, using defaults", self.bus_id);
        }
        self.settings = BusSettings::from_record(&record[..n]);
    }

    fn save_settings(&mut self) {
        self.store.save(self.bus_id, &self.settings.to_record());
    }

    /// Bring the bus up for traffic: receive mode, rail powered. Fails (and
    /// attempts a powerdown) while the bus is faulted. Receive bytes queued
    /// before the rail came up are discarded.
    pub fn activate(&mut self) -> Result<(), T::Error> {
        if self.state == BusState::Error {
            self.powerdown();
            warn!("bus {}: cannot activate while faulted", self.bus_id);
            return Err(Error::Faulted);
        }

        if let Err(e) = self.transceiver.set_direction(false) {
            self.state = BusState::Error;
            return Err(Error::Serial(e));
        }

        if self.state == BusState::Offline {
            if let Err(e) = self.transceiver.set_power(true) {
                self.state = BusState::Error;
                return Err(Error::Serial(e));
            }
            self.clock.delay_ms(POWER_RAIL_SETTLE_MS);
            self.state = BusState::Powered;
            self.drain_receive();
            self.deframer.reset();
            info!("bus {}: powered", self.bus_id);
        }

        Ok(())
    }

    /// Drop the power rail. Does not message the repellers first; see
    /// [`Bus::shutdown_all`] for the orderly path. A faulted bus stays
    /// faulted.
    pub fn powerdown(&mut self) {
        if self.state == BusState::Offline {
            debug!("bus {}: already offline", self.bus_id);
            return;
        }
        if self.transceiver.set_power(false).is_err() {
            warn!("bus {}: power pin failed during powerdown", self.bus_id);
        }
        if self.state != BusState::Error {
            self.state = BusState::Offline;
        }
        info!("bus {}: powered down", self.bus_id);
    }

    /// Transmit one packet, handling the direction-pin turnaround.
    ///
    /// Receive mode is restored unconditionally, also when the write fails:
    /// a transceiver stuck in transmit mode would blind the bus to every
    /// later response.
    pub fn transmit(&mut self, packet: &Packet) -> Result<(), T::Error> {
        self.activate()?;

        self.transceiver.set_direction(true).map_err(Error::Serial)?;
        self.clock.delay_us(DIRECTION_SETTLE_US);

        let io = self
            .transceiver
            .write_all(packet.as_bytes())
            .and_then(|()| self.transceiver.flush());

        self.clock.delay_us(DIRECTION_SETTLE_US);
        let restore = self.transceiver.set_direction(false);

        io.map_err(Error::Serial)?;
        restore.map_err(Error::Serial)?;

        debug!("bus {}: tx {}", self.bus_id, packet);
        self.clock.delay_ms(POST_TX_QUIET_MS);
        Ok(())
    }

    /// Wait up to `timeout_ms` for one complete frame. A zero timeout is a
    /// non-blocking poll: buffered bytes are consumed and the call returns
    /// immediately.
    pub fn receive_packet(&mut self, timeout_ms: u32) -> Option<Packet> {
        if self.activate().is_err() {
            return None;
        }

        let start = self.clock.now();
        loop {
            let now = self.clock.now();
            if timeout_ms > 0 && now - start >= Duration::millis(u64::from(timeout_ms)) {
                return None;
            }
            self.deframer.poll_gap(now);

            // Single-byte reads: a frame boundary must not swallow the first
            // bytes of the next frame.
            let mut byte = [0u8; 1];
            let mut got_data = false;
            match self.transceiver.read(&mut byte) {
                Ok(n) if n > 0 => {
                    got_data = true;
                    if let Some(packet) = self.deframer.feed(byte[0], self.clock.now()) {
                        debug!("bus {}: rx {}", self.bus_id, packet);
                        return Some(packet);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    // "Nothing buffered yet" arrives as Other/TimedOut;
                    // everything else is a real receive fault.
                    if !matches!(
                        e.kind(),
                        embedded_io::ErrorKind::Other | embedded_io::ErrorKind::TimedOut
                    ) {
                        warn!("bus {}: receive error", self.bus_id);
                        return None;
                    }
                }
            }

            if !got_data {
                if timeout_ms == 0 {
                    return None;
                }
                self.clock.delay_ms(1);
            }
        }
    }

    /// One request/response round trip.
    fn exchange(&mut self, request: &Packet, timeout_ms: u32) -> Result<Packet, T::Error> {
        self.transmit(request)?;
        self.receive_packet(timeout_ms).ok_or(Error::Timeout)
    }

    /// Exchange and check the response kind. Mismatches and timeouts are
    /// logged and reported as `false`, never escalated.
    fn expect_ack(&mut self, request: &Packet, want: PacketKind, timeout_ms: u32) -> bool {
        match self.exchange(request, timeout_ms) {
            Ok(response) if response.classify() == want => true,
            Ok(response) => {
                warn!("bus {}: expected {want}, got {response}", self.bus_id);
                false
            }
            Err(_) => {
                warn!("bus {}: no {want} response", self.bus_id);
                false
            }
        }
    }

    fn drain_receive(&mut self) {
        let mut scratch = [0u8; 16];
        loop {
            match self.transceiver.read(&mut scratch) {
                Ok(n) if n > 0 => continue,
                _ => break,
            }
        }
    }

    /// Enumerate the bus by broadcasting discovery requests until three
    /// consecutive rounds produce nothing.
    ///
    /// A device that answers with a normal startup acknowledgement is
    /// registered at its embedded address. A device answering unaddressed
    /// gets the lowest free address assigned first; address exhaustion
    /// counts as a non-productive round rather than an error, so discovery
    /// still terminates.
    pub fn discover_repellers(&mut self) {
        info!("bus {}: discovering repellers", self.bus_id);

        let mut strikes = 0u32;
        let mut found = 0u32;

        while strikes < DISCOVERY_STRIKE_LIMIT {
            if self.transmit(&Packet::discover()).is_err() {
                strikes += 1;
                continue;
            }

            let Some(response) = self.receive_packet(DISCOVERY_TIMEOUT_MS) else {
                debug!("bus {}: no response to discover", self.bus_id);
                strikes += 1;
                continue;
            };

            match response.classify() {
                PacketKind::StartupAck => {
                    let address = response.address().unwrap_or(0);
                    info!(
                        "bus {}: discovered repeller at 0x{address:02X}",
                        self.bus_id
                    );
                    if let Some(r) = self.registry.get_or_create(address) {
                        r.state = RepellerState::Inactive;
                    }
                    found += 1;
                    strikes = 0;
                }
                PacketKind::StartupAckUnaddressed => {
                    let address = self.registry.first_free_address();
                    if address == ADDRESS_EXHAUSTED {
                        warn!("bus {}: no free address for new repeller", self.bus_id);
                        strikes += 1;
                        continue;
                    }

                    info!(
                        "bus {}: assigning address 0x{address:02X} to unaddressed repeller",
                        self.bus_id
                    );
                    if self.transmit(&Packet::set_address(address)).is_err() {
                        strikes += 1;
                        continue;
                    }
                    // The reply to set-address has never been decoded; drain
                    // it so it cannot be mistaken for the next discovery
                    // response, then register the device regardless.
                    if let Some(reply) = self.receive_packet(SET_ADDRESS_DRAIN_MS) {
                        debug!("bus {}: set-address reply {reply}", self.bus_id);
                    }
                    if let Some(r) = self.registry.get_or_create(address) {
                        r.state = RepellerState::Inactive;
                    }
                    found += 1;
                    strikes = 0;
                }
                _ => {
                    debug!(
                        "bus {}: unexpected discovery response {response}",
                        self.bus_id
                    );
                    strikes += 1;
                }
            }
        }

        info!(
            "bus {}: discovery complete, {found} new, {} known",
            self.bus_id,
            self.registry.len()
        );
    }

    /// Fetch the two serial-number fragments of one repeller.
    pub fn retrieve_serial(&mut self, address: u8) {
        let part1 = match self.exchange(&Packet::serial_request_1(address), RESPONSE_TIMEOUT_MS) {
            Ok(r) if r.classify() == PacketKind::SerialReply1 => r.serial_fragment(),
            Ok(r) => {
                warn!("bus {}: unexpected serial reply {r}", self.bus_id);
                return;
            }
            Err(_) => {
                warn!(
                    "bus {}: no serial reply 1 from 0x{address:02X}",
                    self.bus_id
                );
                return;
            }
        };

        let part2 = match self.exchange(&Packet::serial_request_2(address), RESPONSE_TIMEOUT_MS) {
            Ok(r) if r.classify() == PacketKind::SerialReply2 => r.serial_fragment(),
            Ok(r) => {
                warn!("bus {}: unexpected serial reply {r}", self.bus_id);
                return;
            }
            Err(_) => {
                warn!(
                    "bus {}: no serial reply 2 from 0x{address:02X}",
                    self.bus_id
                );
                return;
            }
        };

        if let Some(repeller) = self.registry.find_mut(address) {
            repeller.set_serial(&part1, &part2);
            info!(
                "bus {}: repeller 0x{address:02X} serial {}",
                self.bus_id, repeller.serial
            );
        }
    }

    /// Fetch serials for every repeller that does not have one yet. Records
    /// outlive warm-up cycles, so this runs at most once per device.
    pub fn retrieve_serial_for_all(&mut self) {
        for address in self.registry.addresses() {
            let already_known = self
                .registry
                .find(address)
                .is_some_and(|r| !r.serial.is_empty());
            if already_known {
                debug!(
                    "bus {}: repeller 0x{address:02X} serial already known",
                    self.bus_id
                );
                continue;
            }
            self.retrieve_serial(address);
        }
    }

    /// Start warm-up on every registered repeller: broadcast power-up, send
    /// each device its warm-up request, wait the settle delay, then push
    /// startup LED parameters. Each exchange is best-effort; a device that
    /// misses one still gets the rest.
    pub fn warm_up_all(&mut self) {
        info!("bus {}: warming up all repellers", self.bus_id);

        if self.transmit(&Packet::power_up()).is_err() {
            warn!("bus {}: power-up broadcast failed", self.bus_id);
            return;
        }

        let now = self.clock.now();
        self.warm_on_at = Some(now);
        self.active_seconds_save_at = Some(now);
        self.state = BusState::WarmingUp;

        for address in self.registry.addresses() {
            if let Some(r) = self.registry.find_mut(address) {
                r.state = RepellerState::WarmingUp;
            }
            self.expect_ack(
                &Packet::warmup(address),
                PacketKind::WarmupAck,
                RESPONSE_TIMEOUT_MS,
            );
        }

        self.clock.delay_ms(WARMUP_SETTLE_MS);

        for address in self.registry.addresses() {
            self.send_startup_led_params(address);
        }
    }

    /// Push startup color, startup brightness and startup-complete to one
    /// device: three independent exchanges with their own timeouts.
    fn send_startup_led_params(&mut self, address: u8) {
        let (red, green, blue) = (self.settings.red, self.settings.green, self.settings.blue);
        let brightness = self.settings.device_brightness();

        self.expect_ack(
            &Packet::color_startup(address, red, green, blue),
            PacketKind::ColorStartupAck,
            RESPONSE_TIMEOUT_MS,
        );
        self.expect_ack(
            &Packet::led_brightness_startup(address, brightness),
            PacketKind::LedBrightnessStartupAck,
            RESPONSE_TIMEOUT_MS,
        );
        self.expect_ack(
            &Packet::startup_complete(address),
            PacketKind::StartupCompleteAck,
            RESPONSE_TIMEOUT_MS,
        );
    }

    /// Promote every repeller out of warm-up: re-broadcast power-up, then
    /// per device confirm warm-up completion and LED-on. The bus is
    /// repelling afterwards.
    pub fn end_warm_up_all(&mut self) {
        info!("bus {}: ending warm-up, activating repellers", self.bus_id);

        if self.transmit(&Packet::power_up()).is_err() {
            warn!("bus {}: power-up broadcast failed", self.bus_id);
        }

        for address in self.registry.addresses() {
            self.expect_ack(
                &Packet::warmup_complete(address),
                PacketKind::WarmupCompleteAck,
                RESPONSE_TIMEOUT_MS,
            );
            self.expect_ack(
                &Packet::led_on_confirm(address),
                PacketKind::LedOnAck,
                RESPONSE_TIMEOUT_MS,
            );
            if let Some(r) = self.registry.find_mut(address) {
                r.state = RepellerState::Active;
            }
        }

        self.state = BusState::Repelling;
    }

    /// Heartbeat every repeller and fold the responses into device states.
    ///
    /// Returns `true` when nothing is warming up or waiting ("all
    /// settled"). When the last device has finished warming but is not yet
    /// active, [`Bus::end_warm_up_all`] runs as a side effect and the sweep
    /// reports `false` for this round.
    pub fn heartbeat_poll(&mut self) -> bool {
        debug!("bus {}: heartbeat poll", self.bus_id);

        for address in self.registry.addresses() {
            match self.exchange(&Packet::heartbeat(address), RESPONSE_TIMEOUT_MS) {
                Ok(response) => {
                    let new_state = match response.classify() {
                        PacketKind::WarmupAck => Some(RepellerState::WarmingUp),
                        PacketKind::WarmupCompleteAck => Some(RepellerState::WarmedUp),
                        PacketKind::HeartbeatRunning => Some(RepellerState::Active),
                        _ => {
                            debug!(
                                "bus {}: repeller 0x{address:02X} unexpected heartbeat \
                                 response {response}",
                                self.bus_id
                            );
                            None
                        }
                    };
                    if let Some(state) = new_state {
                        if let Some(r) = self.registry.find_mut(address) {
                            r.state = state;
                        }
                    }
                }
                // No response leaves the recorded state untouched.
                Err(_) => debug!(
                    "bus {}: no heartbeat response from 0x{address:02X}",
                    self.bus_id
                ),
            }
        }

        let any_warming = self
            .registry
            .iter()
            .any(|r| r.state == RepellerState::WarmingUp);
        let any_warmed = self
            .registry
            .iter()
            .any(|r| r.state == RepellerState::WarmedUp);

        if !any_warming && !any_warmed {
            return true;
        }
        if !any_warming && any_warmed {
            info!("bus {}: all repellers warmed up, activating", self.bus_id);
            self.end_warm_up_all();
        }
        false
    }

    /// Periodic tick for the orchestrating caller: runs a heartbeat sweep
    /// every [`POLL_INTERVAL_MS`] and enforces the auto-shutoff duration.
    /// The bus holds only the interval and the last-polled timestamp; the
    /// caller owns the schedule.
    pub fn poll(&mut self) {
        let now = self.clock.now();
        let due = match self.last_polled {
            Some(at) => now - at > Duration::millis(POLL_INTERVAL_MS),
            None => true,
        };

        if due {
            if matches!(
                self.state,
                BusState::Powered | BusState::WarmingUp | BusState::Repelling
            ) {
                self.heartbeat_poll();
            }
            self.last_polled = Some(now);
        }

        if self.past_automatic_shutoff() {
            info!("bus {}: automatic shutoff reached", self.bus_id);
            self.power_off();
        }
    }

    /// Change LED brightness (device 0-100 scale) on every active repeller,
    /// latching each with an LED-on confirmation.
    pub fn change_led_brightness(&mut self, brightness_pct: u8) {
        info!(
            "bus {}: changing LED brightness to {brightness_pct}%",
            self.bus_id
        );

        for address in self.registry.addresses() {
            let active = self
                .registry
                .find(address)
                .is_some_and(|r| r.state == RepellerState::Active);
            if !active {
                debug!(
                    "bus {}: skipping repeller 0x{address:02X} (not active)",
                    self.bus_id
                );
                continue;
            }

            if self.expect_ack(
                &Packet::led_brightness(address, brightness_pct),
                PacketKind::LedBrightnessAck,
                RESPONSE_TIMEOUT_MS,
            ) {
                self.expect_ack(
                    &Packet::led_on_confirm(address),
                    PacketKind::LedOnAck,
                    RESPONSE_TIMEOUT_MS,
                );
            }
        }
    }

    /// Broadcast a new LED color to the whole bus. No per-device acks; the
    /// confirmation frame echoes green and blue only.
    pub fn change_led_color(&mut self, red: u8, green: u8, blue: u8) {
        info!(
            "bus {}: changing LED color to {red:02X}{green:02X}{blue:02X}",
            self.bus_id
        );
        if self.transmit(&Packet::color(red, green, blue)).is_err() {
            warn!("bus {}: color broadcast failed", self.bus_id);
            return;
        }
        if self.transmit(&Packet::color_confirm(green, blue)).is_err() {
            warn!("bus {}: color confirm failed", self.bus_id);
        }
    }

    /// Broadcast power-down, mark every repeller offline and drop the rail.
    pub fn shutdown_all(&mut self) {
        info!("bus {}: shutting down all repellers", self.bus_id);

        if self.transmit(&Packet::power_down()).is_err() {
            warn!("bus {}: power-down broadcast failed", self.bus_id);
        }
        for repeller in self.registry.iter_mut() {
            repeller.state = RepellerState::Offline;
        }
        self.powerdown();
    }

    /// Upstream power-on: bring the rail up, then run discovery, serial
    /// retrieval and warm-up. Always completes; devices that failed a step
    /// are visible through their lifecycle state.
    pub fn power_on(&mut self) {
        info!("bus {}: power on requested", self.bus_id);

        if self.state == BusState::Offline && self.activate().is_err() {
            return;
        }
        if self.state == BusState::Powered {
            self.discover_repellers();
            self.retrieve_serial_for_all();
            self.warm_up_all();
        }
    }

    /// Upstream power-off: bank the elapsed active seconds, then shut
    /// everything down.
    pub fn power_off(&mut self) {
        info!("bus {}: power off requested", self.bus_id);
        self.save_active_seconds();
        self.shutdown_all();
    }

    /// Set the stored LED color. Returns whether anything changed; an
    /// unchanged value writes nothing to the store.
    pub fn set_rgb(&mut self, red: u8, green: u8, blue: u8) -> bool {
        if (red, green, blue) == (self.settings.red, self.settings.green, self.settings.blue) {
            debug!("bus {}: rgb unchanged", self.bus_id);
            return false;
        }
        self.settings.red = red;
        self.settings.green = green;
        self.settings.blue = blue;
        self.save_settings();
        info!(
            "bus {}: rgb set to {red:02X}{green:02X}{blue:02X}",
            self.bus_id
        );
        true
    }

    /// Set the stored brightness (Zigbee 0-254 scale). Out-of-range values
    /// are rejected; an unchanged value writes nothing.
    pub fn set_brightness(&mut self, brightness: u8) -> bool {
        if brightness > MAX_ZIGBEE_BRIGHTNESS {
            warn!(
                "bus {}: brightness {brightness} out of range 0-254",
                self.bus_id
            );
            return false;
        }
        if self.settings.brightness == brightness {
            debug!("bus {}: brightness unchanged", self.bus_id);
            return false;
        }
        self.settings.brightness = brightness;
        self.save_settings();
        info!("bus {}: brightness set to {brightness}", self.bus_id);
        true
    }

    /// Zero the cartridge active-seconds counter (new cartridge installed).
    pub fn reset_cartridge(&mut self) {
        self.settings.cartridge_active_seconds = 0;
        self.save_settings();
        info!("bus {}: cartridge counter reset", self.bus_id);
    }

    /// Set the cartridge-spent threshold; 0 disables tracking.
    pub fn set_cartridge_warn_at_seconds(&mut self, seconds: u32) -> bool {
        if self.settings.cartridge_warn_at_seconds == seconds {
            debug!("bus {}: cartridge warn threshold unchanged", self.bus_id);
            return false;
        }
        self.settings.cartridge_warn_at_seconds = seconds;
        self.save_settings();
        true
    }

    /// Set the auto-shutoff duration; 0 disables, values past the ceiling
    /// are rejected.
    pub fn set_auto_shut_off_after_seconds(&mut self, seconds: u16) -> bool {
        if seconds > MAX_AUTO_SHUT_OFF_SECONDS {
            warn!(
                "bus {}: auto-shutoff {seconds}s out of range 0-{MAX_AUTO_SHUT_OFF_SECONDS}",
                self.bus_id
            );
            return false;
        }
        if self.settings.auto_shut_off_after_seconds == seconds {
            debug!("bus {}: auto-shutoff unchanged", self.bus_id);
            return false;
        }
        self.settings.auto_shut_off_after_seconds = seconds;
        self.save_settings();
        true
    }

    /// Seconds of the current session not yet banked into the counter.
    fn session_seconds(&self) -> u32 {
        match (self.state, self.active_seconds_save_at) {
            (BusState::WarmingUp | BusState::Repelling, Some(at)) => {
                ((self.clock.now() - at).to_millis() / 1000) as u32
            }
            _ => 0,
        }
    }

    /// Bank the elapsed session time into the persisted counter and advance
    /// the save point. Must run before any transition that would lose the
    /// in-flight session (shutdown does this itself).
    pub fn save_active_seconds(&mut self) {
        if !matches!(self.state, BusState::WarmingUp | BusState::Repelling) {
            return;
        }
        let elapsed = self.session_seconds();
        self.settings.cartridge_active_seconds += elapsed;
        self.active_seconds_save_at = Some(self.clock.now());
        self.save_settings();
        info!(
            "bus {}: {} active second(s) total",
            self.bus_id, self.settings.cartridge_active_seconds
        );
    }

    /// Total runtime in whole hours, including the in-flight session.
    pub fn cartridge_runtime_hours(&self) -> u16 {
        ((self.settings.cartridge_active_seconds + self.session_seconds()) / 3600) as u16
    }

    /// Percent of cartridge life remaining: 100 when tracking is disabled,
    /// 0 at or past the threshold.
    pub fn cartridge_percent_left(&self) -> u8 {
        let warn_at = self.settings.cartridge_warn_at_seconds;
        if warn_at == 0 {
            return 100;
        }
        let total = self.settings.cartridge_active_seconds + self.session_seconds();
        if total >= warn_at {
            return 0;
        }
        (u64::from(warn_at - total) * 100 / u64::from(warn_at)) as u8
    }

    /// Whether the configured auto-shutoff duration has elapsed since
    /// warm-up began.
    pub fn past_automatic_shutoff(&self) -> bool {
        if !matches!(self.state, BusState::WarmingUp | BusState::Repelling) {
            return false;
        }
        let limit = self.settings.auto_shut_off_after_seconds;
        if limit == 0 {
            return false;
        }
        match self.warm_on_at {
            Some(at) => self.clock.now() - at >= Duration::secs(u64::from(limit)),
            None => false,
        }
    }

    pub fn bus_id(&self) -> u8 {
        self.bus_id
    }

    pub fn state(&self) -> BusState {
        self.state
    }

    pub fn settings(&self) -> &BusSettings {
        &self.settings
    }

    pub fn repellers(&self) -> &Registry {
        &self.registry
    }

    /// Lifecycle state of one device, for display surfaces.
    pub fn repeller_state(&self, address: u8) -> Option<RepellerState> {
        self.registry.find(address).map(|r| r.state)
    }
}
