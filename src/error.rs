// Copyright (c) 2026 guidecane contributors
// Licensed under the MIT License. See LICENSE file in the project root.

//! Error taxonomy shared by the sensing, feedback and connectivity layers

use thiserror::Error;

/// Errors surfaced by guidecane components.
///
/// Sensor timeouts are not errors: the range finder reports them as
/// [`DistanceSample::Timeout`](crate::sensors::DistanceSample::Timeout).
#[derive(Debug, Error)]
pub enum Error {
    /// A required peripheral is missing or its I/O failed
    #[error("hardware unavailable: {0}")]
    HardwareUnavailable(String),

    /// An inbound frame could not be decoded as a command envelope
    #[error("invalid frame: {0}")]
    ProtocolDecode(String),

    /// Read or write failure on a transport connection
    #[error("transport I/O error: {0}")]
    TransportIo(#[from] std::io::Error),

    /// Command name absent from the command table
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// Configuration rejected by validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Build a hardware error from any displayable cause
    pub fn hardware(cause: impl std::fmt::Display) -> Self {
        Self::HardwareUnavailable(cause.to_string())
    }
}

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, Error>;
