// SPDX-FileCopyrightText: Copyright (c) 2023-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire codec: logical-byte I/O over the raw transport
//!
//! RTU and PDU move logical bytes through unchanged. ASCII expands
//! every logical byte into two uppercase hex characters on the way
//! out and contracts character pairs on the way in, staging partial
//! pairs so that transfers resume cleanly across short reads and
//! writes. Frame delimiters (`':'`, `CR`, `LF`) never pass through
//! the codec; the framer moves them on the raw path.

pub(crate) mod crc;

use crate::transport::Transport;

/// Frame-level failure while encoding or decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub(crate) enum FrameError {
    #[error("fatal transport error")]
    Transport,
    #[error("invalid hex character")]
    InvalidHex,
    #[error("checksum mismatch")]
    Checksum,
    #[error("missing CR LF terminator")]
    Terminator,
    #[error("function code without a packet shape")]
    UnknownFunction,
    #[error("payload length out of range")]
    InvalidLength,
    #[error("frame abandoned while scanning for resynchronization")]
    Desync,
}

/// Per-instance wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Encoding {
    #[default]
    Rtu,
    Ascii,
    Pdu,
}

/// Running checksum over the logical bytes of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Checksum {
    Crc(u16),
    Lrc(u8),
    None,
}

impl Checksum {
    pub(crate) fn for_encoding(encoding: Encoding) -> Self {
        match encoding {
            Encoding::Rtu => Checksum::Crc(crc::SEED),
            Encoding::Ascii => Checksum::Lrc(0),
            Encoding::Pdu => Checksum::None,
        }
    }

    pub(crate) fn update(&mut self, data: &[u8]) {
        match self {
            Checksum::Crc(value) => {
                for &b in data {
                    *value = crc::update(*value, b);
                }
            }
            Checksum::Lrc(value) => {
                // Two's complement of the byte sum, accumulated by
                // subtraction.
                for &b in data {
                    *value = value.wrapping_sub(b);
                }
            }
            Checksum::None => {}
        }
    }

    pub(crate) fn crc(&self) -> u16 {
        match *self {
            Checksum::Crc(value) => value,
            _ => 0,
        }
    }

    pub(crate) fn lrc(&self) -> u8 {
        match *self {
            Checksum::Lrc(value) => value,
            _ => 0,
        }
    }
}

const HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'F' => Some(c - b'A' + 10),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}

/// Resumable logical-byte reader/writer.
///
/// The two-character staging register is shared between directions;
/// the engine is half-duplex and resets the codec on every phase
/// change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LineCodec {
    encoding: Encoding,
    hold: [u8; 2],
    // Rx: characters staged so far. Tx: characters to drain.
    hold_len: u8,
    // Tx: characters already drained.
    hold_pos: u8,
}

impl LineCodec {
    pub(crate) fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            hold: [0; 2],
            hold_len: 0,
            hold_pos: 0,
        }
    }

    pub(crate) fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Discards any partially staged character pair.
    pub(crate) fn reset(&mut self) {
        self.hold_len = 0;
        self.hold_pos = 0;
    }

    /// Reads up to `buf.len()` logical bytes.
    ///
    /// Returns the number of complete logical bytes produced; a
    /// partial ASCII pair stays staged for the next call.
    pub(crate) fn read<T: Transport>(
        &mut self,
        transport: &mut T,
        buf: &mut [u8],
    ) -> Result<usize, FrameError> {
        match self.encoding {
            Encoding::Rtu | Encoding::Pdu => {
                transport.read(buf).map_err(|_| FrameError::Transport)
            }
            Encoding::Ascii => {
                let mut filled = 0;
                while filled < buf.len() {
                    let staged = usize::from(self.hold_len);
                    let n = transport
                        .read(&mut self.hold[staged..2])
                        .map_err(|_| FrameError::Transport)?;
                    self.hold_len += n as u8;
                    if self.hold_len < 2 {
                        break;
                    }
                    let hi = hex_value(self.hold[0]).ok_or(FrameError::InvalidHex)?;
                    let lo = hex_value(self.hold[1]).ok_or(FrameError::InvalidHex)?;
                    buf[filled] = hi << 4 | lo;
                    filled += 1;
                    self.hold_len = 0;
                }
                Ok(filled)
            }
        }
    }

    /// Writes up to `buf.len()` logical bytes.
    ///
    /// Returns the number of logical bytes fully accepted by the
    /// transport; a partially drained ASCII pair stays staged and the
    /// caller re-offers the same byte on the next call.
    pub(crate) fn write<T: Transport>(
        &mut self,
        transport: &mut T,
        buf: &[u8],
    ) -> Result<usize, FrameError> {
        match self.encoding {
            Encoding::Rtu | Encoding::Pdu => {
                transport.write(buf).map_err(|_| FrameError::Transport)
            }
            Encoding::Ascii => {
                let mut sent = 0;
                for &b in buf {
                    if self.hold_len == 0 {
                        self.hold = [
                            HEX_UPPER[usize::from(b >> 4)],
                            HEX_UPPER[usize::from(b & 0x0F)],
                        ];
                        self.hold_len = 2;
                        self.hold_pos = 0;
                    }
                    let pending = &self.hold[usize::from(self.hold_pos)..usize::from(self.hold_len)];
                    let n = transport.write(pending).map_err(|_| FrameError::Transport)?;
                    self.hold_pos += n as u8;
                    if self.hold_pos < self.hold_len {
                        // Line saturated mid-byte; resume here later.
                        break;
                    }
                    self.hold_len = 0;
                    self.hold_pos = 0;
                    sent += 1;
                }
                Ok(sent)
            }
        }
    }
}
