// SPDX-FileCopyrightText: Copyright (c) 2023-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Server-side address bindings and request handlers

use std::fmt;

use crate::frame::{DeviceAddress, Frame, FunctionCode, BROADCAST};

/// A request handler bound to one function code.
///
/// The handler mutates the received frame in place to produce the
/// response: typically it fills the payload buffer, updates
/// `length_code` and leaves the function code untouched, or calls
/// [`Frame::set_exception`] to reject the request. The payload slice
/// is the instance's whole buffer; its length is the response
/// capacity.
pub struct Handler<'a> {
    /// The function code this handler serves.
    pub function: FunctionCode,
    /// Invoked for every matching request.
    pub on_request: Box<dyn FnMut(&mut Frame, &mut [u8]) + 'a>,
}

impl<'a> Handler<'a> {
    /// Binds `on_request` to `function`.
    pub fn new<F>(function: FunctionCode, on_request: F) -> Self
    where
        F: FnMut(&mut Frame, &mut [u8]) + 'a,
    {
        Self {
            function,
            on_request: Box::new(on_request),
        }
    }
}

impl fmt::Debug for Handler<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("function", &self.function)
            .finish_non_exhaustive()
    }
}

/// A server-side address binding.
///
/// An endpoint matches an incoming frame when
/// `incoming.address & address_mask == address`. A mask of `0xFF`
/// is an exact match; address `0` with mask `0` catches everything
/// including broadcasts. Handler lookup is linear and the first
/// match wins.
pub struct Endpoint<'a> {
    /// Address this endpoint answers to.
    pub address: DeviceAddress,
    /// Mask applied to the incoming address before comparison.
    pub address_mask: u8,
    /// Handlers, one per served function code.
    pub handlers: Vec<Handler<'a>>,
}

impl<'a> Endpoint<'a> {
    /// An endpoint answering exactly to `address`.
    #[must_use]
    pub fn new(address: DeviceAddress) -> Self {
        Self {
            address,
            address_mask: 0xFF,
            handlers: Vec::new(),
        }
    }

    /// An endpoint with a masked address range.
    #[must_use]
    pub fn with_mask(address: DeviceAddress, address_mask: u8) -> Self {
        Self {
            address,
            address_mask,
            handlers: Vec::new(),
        }
    }

    /// An endpoint matching every address, broadcasts included.
    #[must_use]
    pub fn catch_all() -> Self {
        Self::with_mask(BROADCAST, 0x00)
    }

    /// Adds a handler for `function`.
    #[must_use]
    pub fn handler<F>(mut self, function: FunctionCode, on_request: F) -> Self
    where
        F: FnMut(&mut Frame, &mut [u8]) + 'a,
    {
        self.handlers.push(Handler::new(function, on_request));
        self
    }

    pub(crate) fn matches(&self, address: DeviceAddress) -> bool {
        address & self.address_mask == self.address
    }
}

impl fmt::Debug for Endpoint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("address", &self.address)
            .field("address_mask", &self.address_mask)
            .field("handlers", &self.handlers)
            .finish()
    }
}
