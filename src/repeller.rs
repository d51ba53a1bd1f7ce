//! Repeller device records and the address-keyed registry.

use strum_macros::Display;

/// First address handed out during discovery.
pub const FIRST_ASSIGNABLE_ADDRESS: u8 = 0x01;
/// Last address handed out during discovery.
pub const LAST_ASSIGNABLE_ADDRESS: u8 = 0x1F;
/// Returned by [`Registry::first_free_address`] when every slot is taken.
/// One past the assignable range, never a real device address.
pub const ADDRESS_EXHAUSTED: u8 = 0x20;

/// Lifecycle state of one repeller.
///
/// Driven only by classified responses; a missing response leaves the state
/// untouched.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RepellerState {
    /// Powered down or never heard from since shutdown.
    Offline,
    /// Discovered but not yet told to warm up.
    Inactive,
    /// Warm-up in progress.
    WarmingUp,
    /// Warm-up finished, waiting for activation.
    WarmedUp,
    /// Running and repelling.
    Active,
}

/// One addressable device on the bus.
///
/// Records persist for the life of the bus session: state resets across
/// shutdown/warm-up cycles but the record (and its serial number) remains,
/// so serials are only fetched once.
#[derive(Debug, Clone)]
pub struct Repeller {
    pub address: u8,
    /// Two 8-character fragments concatenated; empty until retrieved.
    pub serial: heapless::String<16>,
    pub state: RepellerState,
}

impl Repeller {
    pub fn new(address: u8) -> Self {
        Self {
            address,
            serial: heapless::String::new(),
            state: RepellerState::Inactive,
        }
    }

    /// Store the serial number from its two wire fragments.
    pub fn set_serial(&mut self, part1: &str, part2: &str) {
        self.serial.clear();
        let _ = self.serial.push_str(part1);
        let _ = self.serial.push_str(part2);
    }
}

/// All repellers known on one bus, keyed by address.
#[derive(Debug, Default)]
pub struct Registry {
    repellers: heapless::Vec<Repeller, 32>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            repellers: heapless::Vec::new(),
        }
    }

    pub fn find(&self, address: u8) -> Option<&Repeller> {
        self.repellers.iter().find(|r| r.address == address)
    }

    pub fn find_mut(&mut self, address: u8) -> Option<&mut Repeller> {
        self.repellers.iter_mut().find(|r| r.address == address)
    }

    /// Look up a record, creating it if the address is new. Idempotent:
    /// calling twice with the same address returns the same record.
    ///
    /// Returns `None` only when the registry is full, which cannot happen
    /// for addresses inside the assignable range.
    pub fn get_or_create(&mut self, address: u8) -> Option<&mut Repeller> {
        if let Some(i) = self.repellers.iter().position(|r| r.address == address) {
            return self.repellers.get_mut(i);
        }
        self.repellers.push(Repeller::new(address)).ok()?;
        self.repellers.last_mut()
    }

    /// Lowest address in the assignable range with no record yet, or
    /// [`ADDRESS_EXHAUSTED`] when all 31 slots are taken. Callers treat
    /// exhaustion as a recoverable condition, not an error.
    pub fn first_free_address(&self) -> u8 {
        for address in FIRST_ASSIGNABLE_ADDRESS..=LAST_ASSIGNABLE_ADDRESS {
            if self.find(address).is_none() {
                return address;
            }
        }
        ADDRESS_EXHAUSTED
    }

    pub fn len(&self) -> usize {
        self.repellers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repellers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Repeller> {
        self.repellers.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Repeller> {
        self.repellers.iter_mut()
    }

    /// Addresses of all known repellers, in discovery order. Lets callers
    /// drive per-device exchanges without holding a borrow on the registry.
    pub fn addresses(&self) -> heapless::Vec<u8, 32> {
        self.repellers.iter().map(|r| r.address).collect()
    }
}
