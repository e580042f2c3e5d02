// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus servers

pub mod image;
pub mod slave;
pub mod tcp;

mod service;
pub use self::service::Service;

/// Cause for termination of a server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminated {
    /// The server has terminated on its own.
    Finished,

    /// The server has been aborted by a signal.
    Aborted,
}
