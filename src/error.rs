//! Error types for repeller bus communications.

use thiserror::Error;

pub type Result<T, I> = core::result::Result<T, Error<I>>;

/// Errors surfaced by the bus controller.
///
/// Only the caller of a single exchange sees these; the lifecycle procedures
/// (discovery, warm-up, heartbeat) log them and carry on, per the protocol's
/// best-effort design.
#[derive(Error, Debug)]
pub enum Error<I: embedded_io::Error> {
    /// The underlying transceiver failed.
    #[error("serial communication error")]
    Serial(I),
    /// No response arrived within the per-call window.
    #[error("response timeout")]
    Timeout,
    /// The bus is in the error state and refuses to operate until
    /// re-initialized.
    #[error("bus is faulted")]
    Faulted,
}
