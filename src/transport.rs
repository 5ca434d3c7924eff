// SPDX-FileCopyrightText: Copyright (c) 2023-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The injected transport interface

/// A fatal transport failure.
///
/// Returning this from [`Transport::read`] or [`Transport::write`]
/// aborts the frame in flight. On a client the pending request is
/// completed with a synthetic gateway exception; a server drops the
/// frame and keeps listening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("fatal transport error")]
pub struct TransportError;

/// Byte I/O and time source injected into a [`Modbus`](crate::Modbus)
/// instance.
///
/// All three methods must be nonblocking: the engine calls them from
/// [`step`](crate::Modbus::step) and relies on short or empty
/// transfers to suspend and resume its frame state machines.
pub trait Transport {
    /// Reads up to `buf.len()` bytes from the line.
    ///
    /// Returns the number of bytes placed into `buf`; `Ok(0)` means
    /// no data is available right now.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Writes up to `buf.len()` bytes to the line.
    ///
    /// Returns the number of bytes accepted; `Ok(0)` means the line
    /// is saturated and the engine will retry on a later step.
    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError>;

    /// Returns a monotonic tick count.
    ///
    /// The engine compares timestamps modulo 2^16, so any tick width
    /// works as long as the configured timeouts fit into 16 bit.
    fn now(&mut self) -> u32;
}
