// SPDX-FileCopyrightText: Copyright (c) 2023-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The Modbus instance and its client/server session control
//!
//! One instance drives exactly one transfer at a time. A client
//! sequences Tx → Rx and reports the outcome through its completion
//! callback; a server sequences Rx → dispatch → Tx indefinitely.
//! [`Modbus::step`] never blocks: it advances the resumable frame
//! state machines as far as the injected transport allows and
//! returns.

mod rx;
mod tx;
mod xfer;

use std::{fmt, num::NonZeroU32};

use smallvec::SmallVec;

use crate::{
    codec::{Checksum, Encoding, LineCodec},
    error::Error,
    frame::{Direction, Exception, Frame, Shape, EXCEPTION_FLAG},
    server::Endpoint,
    transport::Transport,
};

use self::xfer::Block;

/// A monotonically incrementing, non-zero transfer identifier.
///
/// Minted by [`Modbus::request`] and consumed by
/// [`Modbus::cancel`]; the zero value is skipped on wraparound so
/// that callers may use it as a sentinel.
pub type RequestId = NonZeroU32;

// [Modbus over Serial Line Specification and Implementation Guide V1.02](http://modbus.org/docs/Modbus_over_serial_line_V1_02.pdf), page 13
// "The maximum size of a Modbus RTU frame is 256 bytes."
const MAX_FRAME_LEN: usize = 256;

// Upper bound on bytes discarded from the receiver before a request
// is transmitted.
const DRAIN_LIMIT: usize = 256;

/// Outcome of one framer step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Progress {
    /// The frame is not finished; state is retained for resumption.
    Pending,
    /// The frame has been fully transferred.
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum TxStage {
    #[default]
    Start,
    Address,
    Function,
    RegAddr,
    RegCount,
    LengthCode,
    Payload,
    Checksum,
    Terminator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum RxStage {
    #[default]
    Start,
    Address,
    Function,
    RegAddr,
    RegCount,
    LengthCode,
    Payload,
    Checksum,
    Terminator,
    Resync,
}

/// Configuration passed to [`Modbus::new`].
#[derive(Debug)]
pub struct Config<'a> {
    /// Caller-owned storage for inbound payloads and outbound
    /// variable-length payload copies. At most 255 bytes are usable.
    pub payload_buffer: &'a mut [u8],
    /// Receive timeout in transport tick units.
    pub rx_timeout: u16,
    /// Transmit timeout in transport tick units; also the server's
    /// inter-frame silence after a transmitted response.
    pub tx_timeout: u16,
    /// Select the ASCII encoding (`':'` / hex / LRC / `CR LF`).
    pub ascii: bool,
    /// Select bare PDU framing (no address, no checksum). Ignored
    /// when `ascii` is also set.
    pub pdu: bool,
}

/// A Modbus protocol engine instance.
///
/// Created in client mode; [`link_endpoints`](Self::link_endpoints)
/// turns it into a server. The owner must call [`step`](Self::step)
/// repeatedly, e.g. from a main loop or a cooperative task.
pub struct Modbus<'a, T> {
    transport: T,
    codec: LineCodec,
    check: Checksum,
    block: Block,
    payload: &'a mut [u8],
    capacity: u8,
    frame: Frame,
    tx_shape: Shape,
    rx_shape: Shape,
    tx_stage: TxStage,
    rx_stage: RxStage,
    scratch: [u8; 2],
    scan_prev: u8,
    scan_len: u8,
    dropped: SmallVec<[u8; MAX_FRAME_LEN]>,
    timer: u16,
    rx_timeout: u16,
    tx_timeout: u16,
    processing: bool,
    transmit_phase: bool,
    rx_pristine: bool,
    silence_guard: bool,
    expect_address: u8,
    expect_function: u8,
    last_request_id: Option<RequestId>,
    on_complete: Option<Box<dyn FnMut(&Frame, &mut [u8]) + 'a>>,
    endpoints: Vec<Endpoint<'a>>,
}

impl<T> fmt::Debug for Modbus<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Modbus")
            .field("frame", &self.frame)
            .field("tx_stage", &self.tx_stage)
            .field("rx_stage", &self.rx_stage)
            .field("processing", &self.processing)
            .field("transmit_phase", &self.transmit_phase)
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

fn next_request_id(last: Option<RequestId>) -> RequestId {
    let next = last.map_or(1, |id| id.get().wrapping_add(1));
    // Zero is skipped on wraparound.
    RequestId::new(next).unwrap_or(RequestId::MIN)
}

impl<'a, T> Modbus<'a, T>
where
    T: Transport,
{
    /// Initializes an instance over `transport`.
    ///
    /// Fails with [`Error::InvalidConfig`] if the payload buffer is
    /// empty.
    pub fn new(transport: T, config: Config<'a>) -> Result<Self, Error> {
        let Config {
            payload_buffer,
            rx_timeout,
            tx_timeout,
            ascii,
            pdu,
        } = config;
        if payload_buffer.is_empty() {
            return Err(Error::InvalidConfig);
        }
        // ASCII wins when both mode flags are set.
        let encoding = if ascii {
            Encoding::Ascii
        } else if pdu {
            Encoding::Pdu
        } else {
            Encoding::Rtu
        };
        let capacity = payload_buffer.len().min(usize::from(u8::MAX)) as u8;
        let mut engine = Self {
            transport,
            codec: LineCodec::new(encoding),
            check: Checksum::for_encoding(encoding),
            block: Block::default(),
            payload: payload_buffer,
            capacity,
            frame: Frame::default(),
            tx_shape: Shape::None,
            rx_shape: Shape::None,
            tx_stage: TxStage::default(),
            rx_stage: RxStage::default(),
            scratch: [0; 2],
            scan_prev: 0,
            scan_len: 0,
            dropped: SmallVec::new(),
            timer: 0,
            rx_timeout,
            tx_timeout,
            processing: false,
            transmit_phase: false,
            rx_pristine: true,
            silence_guard: false,
            expect_address: 0,
            expect_function: 0,
            last_request_id: None,
            on_complete: None,
            endpoints: Vec::new(),
        };
        engine.reset();
        Ok(engine)
    }

    /// Whether a transfer is in flight. Servers are permanently busy.
    #[must_use]
    pub fn busy(&self) -> bool {
        self.processing
    }

    /// Binds server endpoints and starts serving; an empty list
    /// unbinds and returns the instance to idle client mode.
    pub fn link_endpoints(&mut self, endpoints: Vec<Endpoint<'a>>) {
        self.reset();
        self.endpoints = endpoints;
        if !self.endpoints.is_empty() {
            self.processing = true;
        }
    }

    /// Submits a client request and arms the transmitter.
    ///
    /// For variable-length shapes the payload bytes are copied into
    /// the instance's buffer, so `payload` may be dropped
    /// immediately. `on_complete` fires exactly once: with the
    /// decoded response, or with a synthetic gateway exception frame
    /// on timeout or decode failure. Broadcast requests complete
    /// right after transmission.
    pub fn request<F>(
        &mut self,
        mut frame: Frame,
        payload: &[u8],
        on_complete: F,
    ) -> Result<RequestId, Error>
    where
        F: FnMut(&Frame, &mut [u8]) + 'a,
    {
        if self.processing {
            // Server mode is always processing.
            return Err(Error::Busy);
        }
        let tx_shape = Shape::for_function(frame.function, Direction::Request);
        if tx_shape == Shape::None {
            return Err(Error::UnsupportedFunction(frame.function));
        }
        if matches!(frame.function, 0x01..=0x04 | 0x0F | 0x10) && frame.reg_value_count == 0 {
            return Err(Error::ZeroCount);
        }
        if tx_shape.has_payload() {
            self.load_payload(&mut frame, payload)?;
        }
        self.drain_input();
        self.frame = frame;
        self.tx_shape = tx_shape;
        self.rx_shape = Shape::for_function(frame.function, Direction::Response);
        self.expect_address = frame.address;
        self.expect_function = frame.function & !EXCEPTION_FLAG;
        self.on_complete = Some(Box::new(on_complete));
        self.tx_reset();
        self.transmit_phase = true;
        self.processing = true;
        self.timer = self.tick_now();
        let id = next_request_id(self.last_request_id);
        self.last_request_id = Some(id);
        Ok(id)
    }

    /// Loads a frame as a server response and arms the transmitter.
    ///
    /// The engine does this implicitly after a handler returns; the
    /// entry point exists for responses produced out of band. Valid
    /// only in server mode while no transmission is in progress.
    pub fn response(&mut self, mut frame: Frame, payload: &[u8]) -> Result<(), Error> {
        if self.endpoints.is_empty() {
            return Err(Error::NotServer);
        }
        if self.transmit_phase {
            return Err(Error::Busy);
        }
        let tx_shape = Shape::for_function(frame.function, Direction::Response);
        if tx_shape == Shape::None {
            return Err(Error::UnsupportedFunction(frame.function));
        }
        if tx_shape.has_payload() {
            self.load_payload(&mut frame, payload)?;
        }
        self.frame = frame;
        self.tx_shape = tx_shape;
        self.tx_reset();
        self.transmit_phase = true;
        self.timer = self.tick_now();
        Ok(())
    }

    /// Cancels the in-flight request without firing its callback.
    ///
    /// Succeeds only in client mode and only when `request_id` is
    /// the one most recently minted by [`request`](Self::request).
    pub fn cancel(&mut self, request_id: RequestId) -> bool {
        if !self.endpoints.is_empty() || self.last_request_id != Some(request_id) {
            return false;
        }
        self.processing = false;
        self.on_complete = None;
        true
    }

    /// Advances the engine by one cooperative tick.
    ///
    /// Pulls and pushes as many bytes as the transport allows and
    /// returns promptly; never blocks.
    pub fn step(&mut self) {
        if !self.processing {
            return;
        }
        if self.endpoints.is_empty() {
            self.client_step();
        } else {
            self.server_step();
        }
    }

    fn client_step(&mut self) {
        let now = self.tick_now();
        let mut failure = None;

        if self.transmit_phase {
            match self.tx_frame() {
                Ok(Progress::Complete) => {
                    self.transmit_phase = false;
                    self.timer = now;
                    self.rx_reset();
                    if self.sent_broadcast() || self.rx_shape == Shape::None {
                        // Nothing to wait for.
                        self.finish_client(None, self.tx_shape);
                    }
                    return;
                }
                Ok(Progress::Pending) => {
                    if self.elapsed(now) >= self.tx_timeout {
                        failure = Some(Exception::GatewayPathUnavailable);
                    }
                }
                Err(err) => {
                    log::warn!("Aborting request transmission: {err}");
                    failure = Some(Exception::GatewayPathUnavailable);
                }
            }
        } else {
            match self.rx_frame(Direction::Response) {
                Ok(Progress::Complete) => {
                    if self.frame.address == self.expect_address
                        && self.frame.function & !EXCEPTION_FLAG == self.expect_function
                    {
                        self.finish_client(None, self.rx_shape);
                        return;
                    }
                    // A frame meant for somebody else; keep listening.
                    log::debug!(
                        "Ignoring frame from 0x{:02X} (function 0x{:02X})",
                        self.frame.address,
                        self.frame.function
                    );
                    self.rx_reset();
                }
                Ok(Progress::Pending) => {}
                Err(err) => {
                    log::warn!("Aborting response reception: {err}");
                    failure = Some(Exception::GatewayTargetDevice);
                }
            }
            if failure.is_none() && self.elapsed(now) >= self.rx_timeout {
                failure = Some(Exception::GatewayTargetDevice);
            }
        }

        if failure.is_some() {
            self.finish_client(failure, Shape::None);
        }
    }

    fn server_step(&mut self) {
        let now = self.tick_now();
        if self.transmit_phase {
            let done = match self.tx_frame() {
                Ok(Progress::Complete) => true,
                // A saturated or dead line must not wedge the server.
                Ok(Progress::Pending) => self.elapsed(now) >= self.tx_timeout,
                Err(err) => {
                    log::warn!("Aborting response transmission: {err}");
                    true
                }
            };
            if done {
                self.transmit_phase = false;
                self.timer = now;
                self.silence_guard = true;
                self.rx_reset();
            }
            return;
        }

        if self.silence_guard {
            // Inter-frame silence after a transmitted response.
            if self.elapsed(now) < self.tx_timeout {
                return;
            }
            self.silence_guard = false;
        }
        if self.rx_pristine {
            // Idle: keep re-stamping until the first byte arrives.
            self.timer = now;
        }
        match self.rx_frame(Direction::Request) {
            Ok(Progress::Complete) => self.server_dispatch(now),
            Ok(Progress::Pending) => {
                if !self.rx_pristine && self.elapsed(now) >= self.rx_timeout {
                    log::debug!("Request frame timed out mid-frame");
                    self.rx_reset();
                }
            }
            Err(err) => {
                // Servers absorb frame errors; the client will retry.
                log::debug!("Dropping request frame: {err}");
                self.rx_reset();
            }
        }
    }

    fn server_dispatch(&mut self, now: u16) {
        self.timer = now;
        let address = self.frame.address;
        let capacity = usize::from(self.capacity);
        let Some(selected) = self.endpoints.iter().position(|ep| ep.matches(address)) else {
            log::debug!("No endpoint for address 0x{address:02X}; discarding");
            self.rx_reset();
            return;
        };
        let Self {
            endpoints,
            frame,
            payload,
            ..
        } = self;
        match endpoints[selected]
            .handlers
            .iter_mut()
            .find(|handler| handler.function == frame.function)
        {
            Some(handler) => (handler.on_request)(frame, &mut payload[..capacity]),
            None => frame.set_exception(Exception::IllegalFunction),
        }

        // Broadcasts and responseless functions leave the line
        // silent.
        let tx_shape = if self.sent_broadcast() {
            Shape::None
        } else {
            Shape::for_function(self.frame.function, Direction::Response)
        };
        if tx_shape == Shape::None {
            self.rx_reset();
            return;
        }
        if tx_shape.has_payload() && usize::from(self.frame.length_code) > capacity {
            log::warn!(
                "Handler response of {} byte(s) exceeds the payload buffer; discarding",
                self.frame.length_code
            );
            self.rx_reset();
            return;
        }
        self.tx_shape = tx_shape;
        self.tx_reset();
        self.transmit_phase = true;
    }

    fn finish_client(&mut self, failure: Option<Exception>, shape: Shape) {
        if let Some(code) = failure {
            self.frame.function = self.expect_function | EXCEPTION_FLAG;
            self.frame.length_code = code as u8;
        }
        let frame = self.frame;
        let len = if failure.is_none() && !frame.is_exception() && shape.has_payload() {
            usize::from(frame.length_code)
        } else {
            0
        };
        if let Some(mut on_complete) = self.on_complete.take() {
            on_complete(&frame, &mut self.payload[..len]);
        }
        self.processing = false;
    }

    fn load_payload(&mut self, frame: &mut Frame, payload: &[u8]) -> Result<(), Error> {
        if payload.is_empty() {
            return Err(Error::MissingPayload);
        }
        let capacity = usize::from(self.capacity);
        if payload.len() > capacity {
            return Err(Error::PayloadOverrun {
                len: payload.len(),
                capacity,
            });
        }
        self.payload[..payload.len()].copy_from_slice(payload);
        frame.length_code = payload.len() as u8;
        Ok(())
    }

    fn drain_input(&mut self) {
        let mut sink = [0u8; 16];
        let mut drained = 0;
        while drained < DRAIN_LIMIT {
            match self.transport.read(&mut sink) {
                Ok(0) | Err(_) => break,
                Ok(n) => drained += n,
            }
        }
    }

    fn reset(&mut self) {
        self.processing = false;
        self.transmit_phase = false;
        self.silence_guard = false;
        self.on_complete = None;
        self.endpoints.clear();
        self.dropped.clear();
        self.tx_reset();
        self.rx_reset();
    }

    fn tx_reset(&mut self) {
        self.tx_stage = TxStage::Start;
        self.block = Block::default();
        self.codec.reset();
        self.check = Checksum::for_encoding(self.codec.encoding());
    }

    fn rx_reset(&mut self) {
        self.rx_stage = RxStage::Start;
        self.rx_pristine = true;
        self.block = Block::default();
        self.codec.reset();
        self.check = Checksum::for_encoding(self.codec.encoding());
        self.scan_len = 0;
        self.scan_prev = 0;
    }

    fn sent_broadcast(&self) -> bool {
        // PDU framing has no address on the wire, hence no
        // broadcasts.
        self.codec.encoding() != Encoding::Pdu && self.frame.is_broadcast()
    }

    fn tick_now(&mut self) -> u16 {
        // Tick counts are compared modulo 2^16.
        (self.transport.now() & 0xFFFF) as u16
    }

    fn elapsed(&self, now: u16) -> u16 {
        now.wrapping_sub(self.timer)
    }
}
