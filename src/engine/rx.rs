// SPDX-FileCopyrightText: Copyright (c) 2023-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The resumable frame decoder
//!
//! Mirror of the encoder, plus the RTU resynchronization scan. The
//! packet shape for the stages after the function code is chosen by
//! direction: servers expect requests, clients expect responses.
//! Framing failures are hard errors on the delimited encodings
//! (ASCII, PDU); on RTU they degrade into a blind scan for the end
//! of the damaged frame, bounded by the maximum frame length and the
//! session controller's receive timeout.

use byteorder::{BigEndian, ByteOrder as _, LittleEndian};

use crate::{
    codec::{Encoding, FrameError},
    frame::{Direction, Shape},
    transport::Transport,
};

use super::{Modbus, Progress, RxStage, MAX_FRAME_LEN};

// Scan bound: 256 bytes minus the frame header and CRC.
const RESYNC_SCAN_LIMIT: u8 = 251;

impl<T> Modbus<'_, T>
where
    T: Transport,
{
    pub(crate) fn rx_frame(&mut self, direction: Direction) -> Result<Progress, FrameError> {
        loop {
            match self.rx_stage {
                RxStage::Start => {
                    if self.codec.encoding() == Encoding::Ascii {
                        // Hunt for the frame start, discarding noise.
                        loop {
                            let mut byte = [0u8; 1];
                            let n = self
                                .transport
                                .read(&mut byte)
                                .map_err(|_| FrameError::Transport)?;
                            if n == 0 {
                                return Ok(Progress::Pending);
                            }
                            if byte[0] == b':' {
                                break;
                            }
                        }
                        self.rx_pristine = false;
                    }
                    self.rx_stage = RxStage::Address;
                }
                RxStage::Address => {
                    if self.codec.encoding() != Encoding::Pdu {
                        let Self {
                            transport,
                            codec,
                            scratch,
                            ..
                        } = self;
                        if codec.read(transport, &mut scratch[..1])? == 0 {
                            return Ok(Progress::Pending);
                        }
                        self.rx_pristine = false;
                        self.frame.address = self.scratch[0];
                        self.check.update(&[self.scratch[0]]);
                    }
                    self.rx_stage = RxStage::Function;
                }
                RxStage::Function => {
                    let Self {
                        transport,
                        codec,
                        scratch,
                        ..
                    } = self;
                    if codec.read(transport, &mut scratch[..1])? == 0 {
                        return Ok(Progress::Pending);
                    }
                    self.rx_pristine = false;
                    let function = self.scratch[0];
                    self.frame.function = function;
                    self.check.update(&[function]);
                    self.rx_shape = Shape::for_function(function, direction);
                    if self.rx_shape == Shape::None {
                        if self.codec.encoding() == Encoding::Rtu {
                            self.enter_resync();
                            continue;
                        }
                        return Err(FrameError::UnknownFunction);
                    }
                    self.rx_stage = RxStage::RegAddr;
                }
                RxStage::RegAddr => {
                    if self.rx_shape.has_register_fields() {
                        let Self {
                            transport,
                            codec,
                            block,
                            scratch,
                            ..
                        } = self;
                        if !block.run(2, |at| codec.read(transport, &mut scratch[at..2]))? {
                            return Ok(Progress::Pending);
                        }
                        self.check.update(&self.scratch);
                        self.frame.reg_addr = BigEndian::read_u16(&self.scratch);
                    }
                    self.rx_stage = RxStage::RegCount;
                }
                RxStage::RegCount => {
                    if self.rx_shape.has_register_fields() {
                        let Self {
                            transport,
                            codec,
                            block,
                            scratch,
                            ..
                        } = self;
                        if !block.run(2, |at| codec.read(transport, &mut scratch[at..2]))? {
                            return Ok(Progress::Pending);
                        }
                        self.check.update(&self.scratch);
                        self.frame.reg_value_count = BigEndian::read_u16(&self.scratch);
                    }
                    self.rx_stage = RxStage::LengthCode;
                }
                RxStage::LengthCode => {
                    if self.rx_shape.has_length() {
                        let Self {
                            transport,
                            codec,
                            scratch,
                            ..
                        } = self;
                        if codec.read(transport, &mut scratch[..1])? == 0 {
                            return Ok(Progress::Pending);
                        }
                        self.frame.length_code = self.scratch[0];
                        self.check.update(&[self.scratch[0]]);
                    }
                    // A payload must fit the buffer and be non-empty.
                    if self.rx_shape.has_payload()
                        && (self.frame.length_code == 0 || self.frame.length_code > self.capacity)
                    {
                        if self.codec.encoding() == Encoding::Rtu {
                            self.enter_resync();
                            continue;
                        }
                        return Err(FrameError::InvalidLength);
                    }
                    self.rx_stage = RxStage::Payload;
                }
                RxStage::Payload => {
                    if self.rx_shape.has_payload() {
                        let len = usize::from(self.frame.length_code);
                        let Self {
                            transport,
                            codec,
                            block,
                            payload,
                            ..
                        } = self;
                        if !block.run(len, |at| codec.read(transport, &mut payload[at..len]))? {
                            return Ok(Progress::Pending);
                        }
                        self.check.update(&self.payload[..len]);
                    }
                    self.rx_stage = RxStage::Checksum;
                }
                RxStage::Checksum => {
                    match self.codec.encoding() {
                        Encoding::Pdu => {}
                        Encoding::Ascii => {
                            let Self {
                                transport,
                                codec,
                                scratch,
                                ..
                            } = self;
                            if codec.read(transport, &mut scratch[..1])? == 0 {
                                return Ok(Progress::Pending);
                            }
                            if self.scratch[0] != self.check.lrc() {
                                return Err(FrameError::Checksum);
                            }
                        }
                        Encoding::Rtu => {
                            // The CRC tail is raw and little-endian.
                            let Self {
                                transport,
                                block,
                                scratch,
                                ..
                            } = self;
                            if !block.run(2, |at| {
                                transport
                                    .read(&mut scratch[at..2])
                                    .map_err(|_| FrameError::Transport)
                            })? {
                                return Ok(Progress::Pending);
                            }
                            let received = LittleEndian::read_u16(&self.scratch);
                            if received != self.check.crc() {
                                log::warn!(
                                    "CRC mismatch: expected = 0x{:04X}, actual = 0x{:04X}; scanning for frame end",
                                    self.check.crc(),
                                    received,
                                );
                                self.enter_resync();
                                continue;
                            }
                        }
                    }
                    self.rx_stage = RxStage::Terminator;
                }
                RxStage::Terminator => {
                    if self.codec.encoding() == Encoding::Ascii {
                        let Self {
                            transport,
                            block,
                            scratch,
                            ..
                        } = self;
                        if !block.run(2, |at| {
                            transport
                                .read(&mut scratch[at..2])
                                .map_err(|_| FrameError::Transport)
                        })? {
                            return Ok(Progress::Pending);
                        }
                        if self.scratch != [b'\r', b'\n'] {
                            return Err(FrameError::Terminator);
                        }
                    }
                    if !self.dropped.is_empty() {
                        log::warn!(
                            "Decoded frame after dropping {} byte(s): {:X?}",
                            self.dropped.len(),
                            self.dropped
                        );
                        self.dropped.clear();
                    }
                    return Ok(Progress::Complete);
                }
                RxStage::Resync => {
                    // Slide a two-byte window over the incoming bytes
                    // until it matches the running CRC of everything
                    // before it, or the scan outgrows any legal frame.
                    // The receive timeout breaks a scan that never
                    // terminates on its own.
                    loop {
                        let mut byte = [0u8; 1];
                        let n = self
                            .transport
                            .read(&mut byte)
                            .map_err(|_| FrameError::Transport)?;
                        if n == 0 {
                            return Ok(Progress::Pending);
                        }
                        let byte = byte[0];
                        if self.scan_len > 0 {
                            let candidate = u16::from_be_bytes([self.scan_prev, byte]);
                            if candidate == self.check.crc() || self.scan_len >= RESYNC_SCAN_LIMIT {
                                log::error!(
                                    "Giving up on damaged frame after scanning {} byte(s)",
                                    self.scan_len
                                );
                                return Err(FrameError::Desync);
                            }
                            let prev = self.scan_prev;
                            self.check.update(&[prev]);
                        }
                        self.push_dropped(byte);
                        self.scan_len += 1;
                        self.scan_prev = byte;
                    }
                }
            }
        }
    }

    fn enter_resync(&mut self) {
        self.scan_len = 0;
        self.scan_prev = 0;
        self.rx_stage = RxStage::Resync;
    }

    fn push_dropped(&mut self, byte: u8) {
        if self.dropped.len() >= MAX_FRAME_LEN {
            log::error!(
                "Giving up tracking dropped bytes after {}: {:X?}",
                self.dropped.len(),
                self.dropped
            );
            self.dropped.clear();
        }
        self.dropped.push(byte);
    }
}
