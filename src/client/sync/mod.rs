// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Synchronous Modbus context access

pub mod tcp;

use std::{io, time::Duration};

use crate::{frame::*, slave::*, Result};

use super::{
    Client as AsyncClient, Context as AsyncContext, Reader as AsyncReader, SlaveContext,
    Writer as AsyncWriter,
};

/// A transport independent synchronous client trait.
pub trait Client: SlaveContext {
    /// Invokes a _Modbus_ function on the currently selected slave.
    fn call(&mut self, req: Request<'_>) -> Result<Response>;

    /// Invokes a _Modbus_ function on any slave.
    fn execute(&mut self, req: SlaveRequest<'_>, timeout: Duration) -> Result<Response>;

    /// Disconnects the client.
    fn disconnect(&mut self) -> io::Result<()>;
}

/// A transport independent synchronous reader trait.
pub trait Reader: Client {
    fn read_holding_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>>;
}

/// A transport independent synchronous writer trait.
pub trait Writer: Client {
    fn write_single_register(&mut self, addr: Address, word: Word) -> Result<()>;
    fn write_multiple_registers(&mut self, addr: Address, words: &[Word]) -> Result<()>;
}

/// A synchronous Modbus client context.
///
/// Drives an asynchronous [`AsyncContext`] on its own single-threaded
/// runtime and must not be used from within another tokio runtime.
#[derive(Debug)]
pub struct Context {
    // Dropped before the runtime.
    async_ctx: AsyncContext,
    runtime: tokio::runtime::Runtime,
}

impl Client for Context {
    fn call(&mut self, req: Request<'_>) -> Result<Response> {
        self.runtime.block_on(self.async_ctx.call(req))
    }

    fn execute(&mut self, req: SlaveRequest<'_>, timeout: Duration) -> Result<Response> {
        self.runtime.block_on(self.async_ctx.execute(req, timeout))
    }

    fn disconnect(&mut self) -> io::Result<()> {
        self.runtime.block_on(self.async_ctx.disconnect())
    }
}

impl SlaveContext for Context {
    fn set_slave(&mut self, slave: Slave) {
        self.async_ctx.set_slave(slave);
    }
}

impl Reader for Context {
    fn read_holding_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>> {
        self.runtime.block_on(self.async_ctx.read_holding_registers(addr, cnt))
    }
}

impl Writer for Context {
    fn write_single_register(&mut self, addr: Address, word: Word) -> Result<()> {
        self.runtime.block_on(self.async_ctx.write_single_register(addr, word))
    }

    fn write_multiple_registers(&mut self, addr: Address, words: &[Word]) -> Result<()> {
        self.runtime.block_on(self.async_ctx.write_multiple_registers(addr, words))
    }
}
