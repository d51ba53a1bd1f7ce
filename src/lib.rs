//! This crate provides a controller for strings of addressable Liv mosquito
//! repellers daisy-chained on a half-duplex RS-485 bus.
//!
//! It speaks the repellers' proprietary 11-byte packet protocol and drives
//! the whole lifecycle: powering the string, discovering and addressing
//! devices, warming them up, heartbeat-polling them while they run, and
//! shutting them down. Cartridge usage accounting and persisted per-bus
//! settings (LED color/brightness, auto-shutoff) are included.
//!
//! It supports `no-std` environments by use of the `no-std` feature flag.
//! Hardware access is abstracted behind the [`bus::Transceiver`],
//! [`bus::Clock`] and [`bus::SettingsStore`] traits, so the controller runs
//! against any RS-485 transceiver with a direction pin and a switchable
//! power rail.
//!
//! The serial port used for repeller comms should be configured like so:
//! * Baud rate: 19200
//! * Data bits: 8
//! * Stop bits: 1
//! * Parity: None
//!
//! Frame boundaries are timing-based: the protocol has no length or checksum
//! fields, and a pause longer than 8 ms ends the frame in flight.

#![cfg_attr(feature = "no-std", no_std)]

pub mod bus;
pub mod deframer;
pub mod error;
pub mod packet;
pub mod repeller;
pub mod settings;

#[cfg(test)]
mod mock_serial;
