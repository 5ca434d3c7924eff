// SPDX-FileCopyrightText: Copyright (c) 2023-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Library Error type

/// A specialized [`Result`](std::result::Result) type for engine
/// entry points.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported synchronously by [`Modbus`](crate::Modbus) entry
/// points.
///
/// Frame-level failures (checksum mismatches, timeouts, transport
/// faults) are never reported here; on a client they surface exactly
/// once through the completion callback as a synthetic exception
/// frame, and a server absorbs them silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A transfer is already in flight (servers are permanently busy).
    #[error("transfer already in flight")]
    Busy,

    /// The function code maps to no packet shape in the required
    /// direction.
    #[error("unsupported function code 0x{0:02X}")]
    UnsupportedFunction(u8),

    /// Read-multiple and write-multiple requests require a nonzero
    /// item count.
    #[error("zero register/coil count")]
    ZeroCount,

    /// A variable-length frame was submitted without payload bytes.
    #[error("variable-length frame without payload")]
    MissingPayload,

    /// The payload does not fit into the configured buffer.
    #[error("payload length {len} exceeds buffer capacity {capacity}")]
    PayloadOverrun {
        /// Submitted payload length.
        len: usize,
        /// Usable capacity of the configured payload buffer.
        capacity: usize,
    },

    /// The configuration is unusable (empty payload buffer).
    #[error("invalid configuration")]
    InvalidConfig,

    /// The operation requires server mode (linked endpoints).
    #[error("instance is not in server mode")]
    NotServer,
}
