// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A [Modbus TCP](https://en.wikipedia.org/wiki/Modbus) master and a
//! process image slave based on [tokio](https://tokio.rs).
//!
//! Modbus is based on a [master/slave](https://en.wikipedia.org/wiki/Master/slave_(technology))
//! model.
//! To avoid confusions with the tokio terminology the master is called *client*
//! and the slave is called *server* at the module level.
//!
//! The slave side serves one [`RegisterBank`] per unit identifier from a
//! [`ProcessImage`]. The master side multiplexes concurrent requests over a
//! single connection and correlates responses by their transaction id.
//!
//! ## Installation
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! tokio-modbus-image = "*"
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use tokio_modbus_image::{prelude::*, server::slave::TcpSlave};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut slave = TcpSlave::new(1502, 1);
//! slave.add_process_image(Slave(15), RegisterBank::from(vec![42]))?;
//! let socket_addr = slave.open().await?;
//!
//! let mut ctx = tcp::connect_slave(socket_addr, Slave(15)).await?;
//! let words = ctx.read_holding_registers(0, 1).await??;
//! assert_eq!(words, [42]);
//!
//! ctx.disconnect().await?;
//! slave.close().await?;
//! # Ok(())
//! # }
//! ```

#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(missing_debug_implementations)]
#![warn(unreachable_pub)]
#![warn(unsafe_code)]
#![warn(clippy::pedantic)]
// Additional restrictions
#![warn(clippy::clone_on_ref_ptr)]
#![warn(clippy::self_named_module_files)]
// Exceptions
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod prelude;

pub mod client;

pub mod image;
pub use self::image::{ImageError, ProcessImage, RegisterBank};

pub mod slave;
pub use self::slave::{Slave, SlaveId};

mod codec;

mod error;
pub use self::error::{Error, FrameError, ProtocolError};

mod frame;
pub use self::frame::{
    Address, ExceptionCode, ExceptionResponse, FunctionCode, Quantity, Request, Response,
    SlaveRequest, Word, MAX_READ_QUANTITY, MAX_WRITE_QUANTITY,
};

mod service;

#[cfg(feature = "server")]
pub mod server;

/// Default TCP port of both the slave and the master.
///
/// Deliberately distinct from the registered Modbus port 502 which
/// requires elevated privileges on most systems.
pub const DEFAULT_PORT: u16 = 1502;

/// Specialized [`std::result::Result`] type for type-checked responses of the _Modbus_ client API.
///
/// The payload is generic over the response type.
///
/// This [`Result`] type contains 2 layers of errors.
///
/// 1. [`Error`]: An unexpected protocol or network error that occurred during client-server communication,
///    or no response arrived in time.
/// 2. [`ExceptionCode`]: An error occurred on the _Modbus_ server.
pub type Result<T> = std::result::Result<std::result::Result<T, ExceptionCode>, Error>;
