// SPDX-FileCopyrightText: Copyright (c) 2023-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared test harness: a scriptable in-memory transport

#![allow(dead_code)]

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use modbus_engine::{Frame, Transport, TransportError};

#[derive(Debug)]
struct Inner {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    clock: u32,
    read_chunk: usize,
    write_chunk: usize,
    fail_reads: bool,
    fail_writes: bool,
}

/// A deterministic loopback transport.
///
/// Cloning yields a handle onto the same line, so tests keep one
/// handle while the engine owns the other. Chunk limits simulate
/// short reads/writes; the clock only moves when a test advances it.
#[derive(Debug, Clone)]
pub struct SimTransport(Rc<RefCell<Inner>>);

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SimTransport {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(Inner {
            rx: VecDeque::new(),
            tx: Vec::new(),
            clock: 0,
            read_chunk: usize::MAX,
            write_chunk: usize::MAX,
            fail_reads: false,
            fail_writes: false,
        })))
    }

    /// Bytes the engine will receive.
    pub fn push_rx(&self, bytes: &[u8]) {
        self.0.borrow_mut().rx.extend(bytes.iter().copied());
    }

    /// Bytes the engine has transmitted so far.
    pub fn take_tx(&self) -> Vec<u8> {
        std::mem::take(&mut self.0.borrow_mut().tx)
    }

    pub fn tx_is_empty(&self) -> bool {
        self.0.borrow().tx.is_empty()
    }

    pub fn rx_is_empty(&self) -> bool {
        self.0.borrow().rx.is_empty()
    }

    /// Limits how many bytes a single `read` call may return.
    pub fn set_read_chunk(&self, chunk: usize) {
        self.0.borrow_mut().read_chunk = chunk;
    }

    /// Limits how many bytes a single `write` call may accept.
    pub fn set_write_chunk(&self, chunk: usize) {
        self.0.borrow_mut().write_chunk = chunk;
    }

    pub fn fail_reads(&self) {
        self.0.borrow_mut().fail_reads = true;
    }

    pub fn fail_writes(&self) {
        self.0.borrow_mut().fail_writes = true;
    }

    /// Advances the monotonic clock.
    pub fn advance(&self, ticks: u32) {
        let mut inner = self.0.borrow_mut();
        inner.clock = inner.clock.wrapping_add(ticks);
    }
}

impl Transport for SimTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut inner = self.0.borrow_mut();
        if inner.fail_reads {
            return Err(TransportError);
        }
        let n = buf.len().min(inner.read_chunk).min(inner.rx.len());
        for slot in &mut buf[..n] {
            *slot = inner.rx.pop_front().expect("rx byte");
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, TransportError> {
        let mut inner = self.0.borrow_mut();
        if inner.fail_writes {
            return Err(TransportError);
        }
        let n = buf.len().min(inner.write_chunk);
        inner.tx.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn now(&mut self) -> u32 {
        self.0.borrow().clock
    }
}

/// Moves everything `from` has transmitted into `to`'s receiver.
pub fn pump(from: &SimTransport, to: &SimTransport) {
    let bytes = from.take_tx();
    to.push_rx(&bytes);
}

/// The frame and payload delivered to a completion callback.
pub type Completion = Rc<RefCell<Option<(Frame, Vec<u8>)>>>;

/// A completion slot plus a callback that fills it exactly once.
pub fn completion() -> (Completion, impl FnMut(&Frame, &mut [u8])) {
    let slot: Completion = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&slot);
    let callback = move |frame: &Frame, payload: &mut [u8]| {
        let previous = sink.borrow_mut().replace((*frame, payload.to_vec()));
        assert!(previous.is_none(), "callback fired more than once");
    };
    (slot, callback)
}
