// SPDX-FileCopyrightText: Copyright (c) 2023-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(missing_debug_implementations)]
#![warn(unreachable_pub)]
#![cfg_attr(not(test), warn(unsafe_code))]
#![warn(clippy::all)]
#![warn(clippy::cast_lossless)]
#![warn(clippy::explicit_deref_methods)]
#![warn(clippy::explicit_into_iter_loop)]
#![warn(clippy::explicit_iter_loop)]
#![cfg_attr(not(test), warn(clippy::panic_in_result_fn))]
#![warn(rustdoc::broken_intra_doc_links)]
#![doc = include_str!("../README.md")]

pub mod prelude;

pub mod frame;

pub mod server;

mod codec;
mod engine;
mod error;
mod transport;

pub use self::{
    engine::{Config, Modbus, RequestId},
    error::{Error, Result},
    frame::{Direction, Exception, Frame, ResponseData, Shape},
    server::{Endpoint, Handler},
    transport::{Transport, TransportError},
};
