// SPDX-FileCopyrightText: Copyright (c) 2023-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common imports

pub use crate::{
    frame::{self, Direction, Exception, Frame, ResponseData, Shape},
    server::{Endpoint, Handler},
    Config, Error, Modbus, RequestId, Transport, TransportError,
};
