// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus clients

use std::{borrow::Cow, fmt::Debug, io, time::Duration};

use async_trait::async_trait;

use crate::{error::ProtocolError, frame::*, slave::*, Result};

pub mod tcp;

#[cfg(feature = "sync")]
pub mod sync;

/// Transport independent asynchronous client trait
#[async_trait]
pub trait Client: SlaveContext + Send + Sync + Debug {
    /// Invokes a _Modbus_ function on the currently selected slave
    /// with the default timeout of the client.
    async fn call(&mut self, request: Request<'_>) -> Result<Response>;

    /// Invokes a _Modbus_ function on any slave.
    ///
    /// Multiple requests may be executed concurrently on a single
    /// connection, each one waiting at most `timeout` for its response.
    async fn execute(&self, request: SlaveRequest<'_>, timeout: Duration) -> Result<Response>;

    /// Disconnects the client.
    ///
    /// Permanently disconnects the client by shutting down the
    /// underlying stream in a graceful manner (`AsyncDrop`).
    /// Outstanding and subsequent requests fail with a transport error.
    ///
    /// Dropping the client without explicitly disconnecting it
    /// beforehand should also work and free all resources.
    async fn disconnect(&mut self) -> io::Result<()>;
}

/// Asynchronous _Modbus_ reader
#[async_trait]
pub trait Reader: Client {
    /// Read multiple holding registers (0x03)
    async fn read_holding_registers(&mut self, addr: Address, cnt: Quantity) -> Result<Vec<Word>>;
}

/// Asynchronous Modbus writer
#[async_trait]
pub trait Writer: Client {
    /// Write a single holding register (0x06)
    async fn write_single_register(&mut self, addr: Address, word: Word) -> Result<()>;

    /// Write multiple holding registers (0x10)
    async fn write_multiple_registers(&mut self, addr: Address, words: &[Word]) -> Result<()>;
}

/// Asynchronous Modbus client context
#[derive(Debug)]
pub struct Context {
    client: Box<dyn Client>,
}

impl From<Box<dyn Client>> for Context {
    fn from(client: Box<dyn Client>) -> Self {
        Self { client }
    }
}

impl From<Context> for Box<dyn Client> {
    fn from(val: Context) -> Self {
        val.client
    }
}

fn unexpected_response(msg: &'static str) -> crate::Error {
    ProtocolError::Pdu(io::Error::new(io::ErrorKind::InvalidData, msg)).into()
}

#[async_trait]
impl Client for Context {
    async fn call(&mut self, request: Request<'_>) -> Result<Response> {
        self.client.call(request).await
    }

    async fn execute(&self, request: SlaveRequest<'_>, timeout: Duration) -> Result<Response> {
        self.client.execute(request, timeout).await
    }

    async fn disconnect(&mut self) -> io::Result<()> {
        self.client.disconnect().await
    }
}

impl SlaveContext for Context {
    fn set_slave(&mut self, slave: Slave) {
        self.client.set_slave(slave);
    }
}

#[async_trait]
impl Reader for Context {
    async fn read_holding_registers<'a>(
        &'a mut self,
        addr: Address,
        cnt: Quantity,
    ) -> Result<Vec<Word>> {
        let rsp = self
            .client
            .call(Request::ReadHoldingRegisters(addr, cnt))
            .await?;
        match rsp {
            Ok(Response::ReadHoldingRegisters(words)) => {
                if words.len() != usize::from(cnt) {
                    return Err(unexpected_response("unexpected number of registers"));
                }
                Ok(Ok(words))
            }
            Ok(_) => unreachable!("call() should reject mismatching responses"),
            Err(exception) => Ok(Err(exception)),
        }
    }
}

#[async_trait]
impl Writer for Context {
    async fn write_single_register<'a>(&'a mut self, addr: Address, word: Word) -> Result<()> {
        let rsp = self
            .client
            .call(Request::WriteSingleRegister(addr, word))
            .await?;
        match rsp {
            Ok(Response::WriteSingleRegister(rsp_addr, rsp_word)) => {
                if (rsp_addr, rsp_word) != (addr, word) {
                    return Err(unexpected_response("unexpected register or value echoed"));
                }
                Ok(Ok(()))
            }
            Ok(_) => unreachable!("call() should reject mismatching responses"),
            Err(exception) => Ok(Err(exception)),
        }
    }

    async fn write_multiple_registers<'a>(
        &'a mut self,
        addr: Address,
        data: &[Word],
    ) -> Result<()> {
        let cnt = data.len();
        let rsp = self
            .client
            .call(Request::WriteMultipleRegisters(addr, Cow::Borrowed(data)))
            .await?;
        match rsp {
            Ok(Response::WriteMultipleRegisters(rsp_addr, rsp_cnt)) => {
                if rsp_addr != addr || usize::from(rsp_cnt) != cnt {
                    return Err(unexpected_response(
                        "unexpected address or quantity echoed",
                    ));
                }
                Ok(Ok(()))
            }
            Ok(_) => unreachable!("call() should reject mismatching responses"),
            Err(exception) => Ok(Err(exception)),
        }
    }
}
