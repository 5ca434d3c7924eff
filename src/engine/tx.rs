// SPDX-FileCopyrightText: Copyright (c) 2023-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The resumable frame encoder
//!
//! Nine ordered stages; a stage that cannot finish leaves its state
//! behind and the encoder resumes there on the next step. Stage
//! transitions happen only on completion.

use byteorder::{BigEndian, ByteOrder as _, LittleEndian};

use crate::{
    codec::{Encoding, FrameError},
    frame::Shape,
    transport::Transport,
};

use super::{Modbus, Progress, TxStage};

impl<T> Modbus<'_, T>
where
    T: Transport,
{
    pub(crate) fn tx_frame(&mut self) -> Result<Progress, FrameError> {
        if self.tx_shape == Shape::None {
            return Err(FrameError::UnknownFunction);
        }
        loop {
            match self.tx_stage {
                TxStage::Start => {
                    if self.codec.encoding() == Encoding::Ascii {
                        // The frame start is raw, not hex-expanded.
                        let n = self
                            .transport
                            .write(b":")
                            .map_err(|_| FrameError::Transport)?;
                        if n == 0 {
                            return Ok(Progress::Pending);
                        }
                    }
                    self.tx_stage = TxStage::Address;
                }
                TxStage::Address => {
                    if self.codec.encoding() != Encoding::Pdu {
                        let Self {
                            transport,
                            codec,
                            frame,
                            ..
                        } = self;
                        if codec.write(transport, &[frame.address])? == 0 {
                            return Ok(Progress::Pending);
                        }
                        self.check.update(&[self.frame.address]);
                    }
                    self.tx_stage = TxStage::Function;
                }
                TxStage::Function => {
                    let Self {
                        transport,
                        codec,
                        frame,
                        ..
                    } = self;
                    if codec.write(transport, &[frame.function])? == 0 {
                        return Ok(Progress::Pending);
                    }
                    self.check.update(&[self.frame.function]);
                    self.tx_stage = TxStage::RegAddr;
                }
                TxStage::RegAddr => {
                    // Exception responses carry no register fields.
                    if self.tx_shape.has_register_fields() && !self.frame.is_exception() {
                        BigEndian::write_u16(&mut self.scratch, self.frame.reg_addr);
                        let Self {
                            transport,
                            codec,
                            block,
                            scratch,
                            ..
                        } = self;
                        if !block.run(2, |at| codec.write(transport, &scratch[at..2]))? {
                            return Ok(Progress::Pending);
                        }
                        self.check.update(&self.scratch);
                    }
                    self.tx_stage = TxStage::RegCount;
                }
                TxStage::RegCount => {
                    if self.tx_shape.has_register_fields() && !self.frame.is_exception() {
                        BigEndian::write_u16(&mut self.scratch, self.frame.reg_value_count);
                        let Self {
                            transport,
                            codec,
                            block,
                            scratch,
                            ..
                        } = self;
                        if !block.run(2, |at| codec.write(transport, &scratch[at..2]))? {
                            return Ok(Progress::Pending);
                        }
                        self.check.update(&self.scratch);
                    }
                    self.tx_stage = TxStage::LengthCode;
                }
                TxStage::LengthCode => {
                    if self.tx_shape.has_length() {
                        let Self {
                            transport,
                            codec,
                            frame,
                            ..
                        } = self;
                        if codec.write(transport, &[frame.length_code])? == 0 {
                            return Ok(Progress::Pending);
                        }
                        self.check.update(&[self.frame.length_code]);
                    }
                    self.tx_stage = TxStage::Payload;
                }
                TxStage::Payload => {
                    if self.tx_shape.has_payload() {
                        let len = usize::from(self.frame.length_code);
                        let Self {
                            transport,
                            codec,
                            block,
                            payload,
                            ..
                        } = self;
                        if !block.run(len, |at| codec.write(transport, &payload[at..len]))? {
                            return Ok(Progress::Pending);
                        }
                        self.check.update(&self.payload[..len]);
                    }
                    self.tx_stage = TxStage::Checksum;
                }
                TxStage::Checksum => {
                    match self.codec.encoding() {
                        Encoding::Ascii => {
                            let lrc = self.check.lrc();
                            let Self {
                                transport, codec, ..
                            } = self;
                            if codec.write(transport, &[lrc])? == 0 {
                                return Ok(Progress::Pending);
                            }
                        }
                        Encoding::Rtu => {
                            LittleEndian::write_u16(&mut self.scratch, self.check.crc());
                            let Self {
                                transport,
                                block,
                                scratch,
                                ..
                            } = self;
                            if !block.run(2, |at| {
                                transport
                                    .write(&scratch[at..2])
                                    .map_err(|_| FrameError::Transport)
                            })? {
                                return Ok(Progress::Pending);
                            }
                        }
                        Encoding::Pdu => {}
                    }
                    self.tx_stage = TxStage::Terminator;
                }
                TxStage::Terminator => {
                    if self.codec.encoding() == Encoding::Ascii {
                        let Self {
                            transport, block, ..
                        } = self;
                        if !block.run(2, |at| {
                            transport
                                .write(&b"\r\n"[at..2])
                                .map_err(|_| FrameError::Transport)
                        })? {
                            return Ok(Progress::Pending);
                        }
                    }
                    return Ok(Progress::Complete);
                }
            }
        }
    }
}
