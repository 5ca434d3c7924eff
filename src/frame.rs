// SPDX-FileCopyrightText: Copyright (c) 2023-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus frames, packet shapes and exception codes

use std::{error, fmt};

use byteorder::{BigEndian, ByteOrder as _};

/// A Modbus function code is represented by an unsigned 8 bit integer.
pub type FunctionCode = u8;

/// A Modbus register/coil address is represented by 16 bit (from `0`
/// to `65535`).
pub type Address = u16;

/// Modbus uses 16 bit for its data items (big-endian representation).
pub type Word = u16;

/// Number of items to process (`0` - `65535`).
pub type Quantity = u16;

/// A single byte addressing a device on the bus.
pub type DeviceAddress = u8;

/// The special device address for one-way broadcast requests.
pub const BROADCAST: DeviceAddress = 0;

/// Set in the function code of an exception response.
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Well-known public function codes.
pub mod function {
    /// Read discrete outputs (coils).
    pub const READ_COILS: u8 = 0x01;
    /// Read discrete inputs.
    pub const READ_DISCRETE_INPUTS: u8 = 0x02;
    /// Read analog outputs (holding registers).
    pub const READ_HOLDING_REGISTERS: u8 = 0x03;
    /// Read analog inputs (input registers).
    pub const READ_INPUT_REGISTERS: u8 = 0x04;
    /// Write a single coil.
    pub const WRITE_SINGLE_COIL: u8 = 0x05;
    /// Write a single holding register.
    pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
    /// Read the exception status byte.
    pub const READ_EXCEPTION_STATUS: u8 = 0x07;
    /// Get the communication event counter.
    pub const GET_COMM_EVENT_COUNTER: u8 = 0x0B;
    /// Get the communication event log.
    pub const GET_COMM_EVENT_LOG: u8 = 0x0C;
    /// Write multiple coils.
    pub const WRITE_MULTIPLE_COILS: u8 = 0x0F;
    /// Write multiple holding registers.
    pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
    /// Report server (slave) id.
    pub const REPORT_SERVER_ID: u8 = 0x11;
    /// Read a file record.
    pub const READ_FILE_RECORD: u8 = 0x14;
    /// Write a file record.
    pub const WRITE_FILE_RECORD: u8 = 0x15;
}

/// A server (slave) exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    /// The function code is not an allowable action for the server.
    IllegalFunction = 0x01,
    /// The data address is not an allowable address for the server.
    IllegalDataAddress = 0x02,
    /// A value in the query data field is not allowable.
    IllegalDataValue = 0x03,
    /// An unrecoverable error occurred on the server.
    ServerDeviceFailure = 0x04,
    /// Long-running request accepted, poll for completion.
    Acknowledge = 0x05,
    /// The server is busy with a long-duration command.
    ServerDeviceBusy = 0x06,
    /// The server cannot perform the program function.
    NegativeAcknowledge = 0x07,
    /// Parity error in the extended file area.
    MemoryParityError = 0x08,
    /// The gateway could not allocate an internal path.
    GatewayPathUnavailable = 0x0A,
    /// No response was obtained from the target device.
    GatewayTargetDevice = 0x0B,
}

impl Exception {
    pub(crate) fn description(&self) -> &str {
        use Exception::*;

        match *self {
            IllegalFunction => "Illegal function",
            IllegalDataAddress => "Illegal data address",
            IllegalDataValue => "Illegal data value",
            ServerDeviceFailure => "Server device failure",
            Acknowledge => "Acknowledge",
            ServerDeviceBusy => "Server device busy",
            NegativeAcknowledge => "Negative acknowledge",
            MemoryParityError => "Memory parity error",
            GatewayPathUnavailable => "Gateway path unavailable",
            GatewayTargetDevice => "Gateway target device failed to respond",
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl error::Error for Exception {}

impl TryFrom<u8> for Exception {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, u8> {
        use Exception::*;
        let ex = match code {
            0x01 => IllegalFunction,
            0x02 => IllegalDataAddress,
            0x03 => IllegalDataValue,
            0x04 => ServerDeviceFailure,
            0x05 => Acknowledge,
            0x06 => ServerDeviceBusy,
            0x07 => NegativeAcknowledge,
            0x08 => MemoryParityError,
            0x0A => GatewayPathUnavailable,
            0x0B => GatewayTargetDevice,
            _ => return Err(code),
        };
        Ok(ex)
    }
}

/// Direction of a frame relative to the conversation.
///
/// Most function codes use different packet shapes for their request
/// and their response, so every shape lookup is direction-qualified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to server.
    Request,
    /// Server to client.
    Response,
}

/// The on-wire layout of a frame between the function code and the
/// checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Shape {
    /// Unrecognized function; servers reject it, clients refuse to
    /// send it.
    #[default]
    None,
    /// `REG_ADDR(2), REG_VALUE_COUNT(2)`
    Base,
    /// `LENGTH, DATA[LENGTH]`
    VariableLen,
    /// `REG_ADDR(2), REG_VALUE_COUNT(2), LENGTH, DATA[LENGTH]`
    Full,
    /// `CODE`
    Code,
    /// No body at all.
    Call,
}

impl Shape {
    /// Looks up the packet shape of `function` in the given direction.
    ///
    /// A function code with the exception flag set always collapses to
    /// [`Shape::Code`].
    #[must_use]
    pub fn for_function(function: FunctionCode, direction: Direction) -> Self {
        if function & EXCEPTION_FLAG != 0 {
            return Shape::Code;
        }
        let request = direction == Direction::Request;
        match function {
            0x01 /* Read coils */
            | 0x02 /* Read discrete inputs */
            | 0x03 /* Read holding registers */
            | 0x04 /* Read input registers */ => {
                if request { Shape::Base } else { Shape::VariableLen }
            }
            0x05 /* Write single coil */
            | 0x06 /* Write single register */ => Shape::Base,
            0x07 /* Read exception status */ => {
                if request { Shape::Call } else { Shape::Code }
            }
            0x0B /* Get comm event counter */ => {
                if request { Shape::Call } else { Shape::Base }
            }
            0x0C /* Get comm event log */ => {
                if request { Shape::Call } else { Shape::VariableLen }
            }
            0x0F /* Write multiple coils */
            | 0x10 /* Write multiple registers */ => {
                if request { Shape::Full } else { Shape::Base }
            }
            0x11 /* Report server id */ => {
                if request { Shape::Call } else { Shape::VariableLen }
            }
            0x14 /* Read file record */
            | 0x15 /* Write file record */ => Shape::VariableLen,
            _ => Shape::None,
        }
    }

    /// The frame carries `REG_ADDR` and `REG_VALUE_COUNT` fields.
    #[must_use]
    pub fn has_register_fields(self) -> bool {
        matches!(self, Shape::Base | Shape::Full)
    }

    /// The frame carries a `LENGTH`/`CODE` byte.
    #[must_use]
    pub fn has_length(self) -> bool {
        matches!(self, Shape::VariableLen | Shape::Full | Shape::Code)
    }

    /// The frame carries a variable-length payload.
    #[must_use]
    pub fn has_payload(self) -> bool {
        matches!(self, Shape::VariableLen | Shape::Full)
    }
}

/// The logical unit the engine produces and consumes.
///
/// Payload bytes are not part of the frame header: requests submit
/// them as a separate slice and completion callbacks or server
/// handlers receive a view into the instance's payload buffer, whose
/// length carries the capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Frame {
    /// Device address on the bus; `0` broadcasts.
    pub address: DeviceAddress,
    /// Function code; the high bit flags an exception response.
    pub function: FunctionCode,
    /// Register/coil starting address.
    pub reg_addr: Address,
    /// Item count, or the literal value for single-write functions.
    pub reg_value_count: Quantity,
    /// Payload length, exception code or function sub-code,
    /// depending on the packet shape.
    pub length_code: u8,
}

impl Frame {
    /// Read discrete outputs (coils), function `0x01`.
    #[must_use]
    pub fn read_coils(address: DeviceAddress, reg_addr: Address, count: Quantity) -> Self {
        Self {
            address,
            function: function::READ_COILS,
            reg_addr,
            reg_value_count: count,
            length_code: 0,
        }
    }

    /// Read discrete inputs, function `0x02`.
    #[must_use]
    pub fn read_discrete_inputs(address: DeviceAddress, reg_addr: Address, count: Quantity) -> Self {
        Self {
            function: function::READ_DISCRETE_INPUTS,
            ..Self::read_coils(address, reg_addr, count)
        }
    }

    /// Read holding registers, function `0x03`.
    #[must_use]
    pub fn read_holding_registers(
        address: DeviceAddress,
        reg_addr: Address,
        count: Quantity,
    ) -> Self {
        Self {
            function: function::READ_HOLDING_REGISTERS,
            ..Self::read_coils(address, reg_addr, count)
        }
    }

    /// Read input registers, function `0x04`.
    #[must_use]
    pub fn read_input_registers(
        address: DeviceAddress,
        reg_addr: Address,
        count: Quantity,
    ) -> Self {
        Self {
            function: function::READ_INPUT_REGISTERS,
            ..Self::read_coils(address, reg_addr, count)
        }
    }

    /// Write a single coil, function `0x05`.
    ///
    /// The wire value is `0xFF00` for on and `0x0000` for off.
    #[must_use]
    pub fn write_single_coil(address: DeviceAddress, reg_addr: Address, on: bool) -> Self {
        Self {
            function: function::WRITE_SINGLE_COIL,
            ..Self::read_coils(address, reg_addr, if on { 0xFF00 } else { 0x0000 })
        }
    }

    /// Write a single holding register, function `0x06`.
    #[must_use]
    pub fn write_single_register(address: DeviceAddress, reg_addr: Address, value: Word) -> Self {
        Self {
            function: function::WRITE_SINGLE_REGISTER,
            ..Self::read_coils(address, reg_addr, value)
        }
    }

    /// Read the exception status byte, function `0x07`.
    #[must_use]
    pub fn read_exception_status(address: DeviceAddress) -> Self {
        Self {
            address,
            function: function::READ_EXCEPTION_STATUS,
            ..Self::default()
        }
    }

    /// Get the communication event counter, function `0x0B`.
    #[must_use]
    pub fn comm_event_counter(address: DeviceAddress) -> Self {
        Self {
            address,
            function: function::GET_COMM_EVENT_COUNTER,
            ..Self::default()
        }
    }

    /// Get the communication event log, function `0x0C`.
    #[must_use]
    pub fn comm_event_log(address: DeviceAddress) -> Self {
        Self {
            address,
            function: function::GET_COMM_EVENT_LOG,
            ..Self::default()
        }
    }

    /// Write multiple coils, function `0x0F`.
    ///
    /// The packed coil bytes are submitted separately to
    /// [`request`](crate::Modbus::request); see [`pack_coils`].
    #[must_use]
    pub fn write_multiple_coils(address: DeviceAddress, reg_addr: Address, count: Quantity) -> Self {
        Self {
            function: function::WRITE_MULTIPLE_COILS,
            ..Self::read_coils(address, reg_addr, count)
        }
    }

    /// Write multiple holding registers, function `0x10`.
    ///
    /// The big-endian register bytes are submitted separately to
    /// [`request`](crate::Modbus::request).
    #[must_use]
    pub fn write_multiple_registers(
        address: DeviceAddress,
        reg_addr: Address,
        count: Quantity,
    ) -> Self {
        Self {
            function: function::WRITE_MULTIPLE_REGISTERS,
            ..Self::read_coils(address, reg_addr, count)
        }
    }

    /// Report server id, function `0x11`.
    #[must_use]
    pub fn report_server_id(address: DeviceAddress) -> Self {
        Self {
            address,
            function: function::REPORT_SERVER_ID,
            ..Self::default()
        }
    }

    /// Read a file record, function `0x14`.
    ///
    /// The sub-request bytes are submitted separately to
    /// [`request`](crate::Modbus::request).
    #[must_use]
    pub fn read_file_record(address: DeviceAddress) -> Self {
        Self {
            address,
            function: function::READ_FILE_RECORD,
            ..Self::default()
        }
    }

    /// Write a file record, function `0x15`.
    #[must_use]
    pub fn write_file_record(address: DeviceAddress) -> Self {
        Self {
            address,
            function: function::WRITE_FILE_RECORD,
            ..Self::default()
        }
    }

    /// An exception response for `function` carrying `code`.
    #[must_use]
    pub fn exception(address: DeviceAddress, function: FunctionCode, code: Exception) -> Self {
        Self {
            address,
            function: function | EXCEPTION_FLAG,
            reg_addr: 0,
            reg_value_count: 0,
            length_code: code as u8,
        }
    }

    /// Whether this frame is addressed to all devices.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.address == BROADCAST
    }

    /// Whether the exception flag is set in the function code.
    #[must_use]
    pub fn is_exception(&self) -> bool {
        self.function & EXCEPTION_FLAG != 0
    }

    /// The exception code of an exception response, if any.
    #[must_use]
    pub fn exception_code(&self) -> Option<Exception> {
        if !self.is_exception() {
            return None;
        }
        Exception::try_from(self.length_code).ok()
    }

    /// Turns this frame into an exception response in place.
    ///
    /// Server handlers use this to reject a request they cannot
    /// serve.
    pub fn set_exception(&mut self, code: Exception) {
        self.function |= EXCEPTION_FLAG;
        self.length_code = code as u8;
    }
}

/// Classified data of a completed response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseData<'p> {
    /// No data is associated with this response.
    None,
    /// Packed single-bit items, 8 per byte (functions `0x01`/`0x02`).
    Bits {
        /// Payload bytes carrying the packed bits.
        data: &'p [u8],
        /// Number of payload bytes.
        count: u8,
    },
    /// 16-bit registers, big-endian pairs in the payload.
    Registers {
        /// Raw big-endian payload bytes.
        data: &'p [u8],
        /// Number of registers (`length_code / 2`).
        count: u8,
    },
    /// The echoed value/count of a fixed-shape response.
    Echo {
        /// `reg_value_count` of the response frame.
        value: Word,
    },
    /// A function sub-code (e.g. the `0x07` status byte).
    Status(u8),
    /// The server answered with an exception.
    Exception(Exception),
}

impl<'p> ResponseData<'p> {
    /// Size of one item in bytes (1 for bits, 2 for registers and
    /// echoes).
    #[must_use]
    pub fn item_size(&self) -> u8 {
        match self {
            ResponseData::Bits { .. } => 1,
            ResponseData::Registers { .. } | ResponseData::Echo { .. } => 2,
            _ => 0,
        }
    }

    /// Iterates over register values in host byte order.
    pub fn registers(&self) -> impl Iterator<Item = Word> + 'p {
        let data = match *self {
            ResponseData::Registers { data, .. } => data,
            _ => &[],
        };
        data.chunks_exact(2).map(BigEndian::read_u16)
    }
}

/// Classifies the data carried by a completed response frame.
///
/// `payload` is the buffer slice handed to the completion callback;
/// only `frame.length_code` bytes of it are significant for
/// variable-length shapes.
#[must_use]
pub fn response_data<'p>(frame: &Frame, payload: &'p [u8]) -> ResponseData<'p> {
    if frame.is_exception() {
        return match Exception::try_from(frame.length_code) {
            Ok(code) => ResponseData::Exception(code),
            Err(_) => ResponseData::None,
        };
    }
    match Shape::for_function(frame.function, Direction::Response) {
        Shape::VariableLen | Shape::Full => {
            let len = usize::from(frame.length_code).min(payload.len());
            let data = &payload[..len];
            match frame.function {
                function::READ_COILS | function::READ_DISCRETE_INPUTS => ResponseData::Bits {
                    data,
                    count: frame.length_code,
                },
                _ => ResponseData::Registers {
                    data,
                    count: frame.length_code >> 1,
                },
            }
        }
        Shape::Base => ResponseData::Echo {
            value: frame.reg_value_count,
        },
        Shape::Code => ResponseData::Status(frame.length_code),
        Shape::Call | Shape::None => ResponseData::None,
    }
}

/// Packs coil states into bytes, 8 coils per byte, LSB first.
///
/// Returns the number of bytes used in `out`.
pub fn pack_coils(coils: &[bool], out: &mut [u8]) -> usize {
    let len = (coils.len() + 7) / 8;
    for b in &mut out[..len] {
        *b = 0;
    }
    for (i, on) in coils.iter().enumerate() {
        if *on {
            out[i / 8] |= 1 << (i % 8);
        }
    }
    len
}

/// Unpacks `count` coil states from packed bytes.
pub fn unpack_coils<'p>(data: &'p [u8], count: u16) -> impl Iterator<Item = bool> + 'p {
    (0..count).map(|i| (data[usize::from(i) / 8] >> (i % 8)) & 0b1 > 0)
}
