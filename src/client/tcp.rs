// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! TCP client connections

use std::{io, net::SocketAddr, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

use super::*;

pub use crate::service::UnitIdMismatch;

/// Default timeout for establishing a connection and for every request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Connection settings of a TCP client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Maximum time for establishing the connection.
    pub connect_timeout: Duration,

    /// Maximum time [`Client::call`] waits for a response.
    pub request_timeout: Duration,

    /// Treatment of responses from a different unit than addressed.
    pub unit_id_mismatch: UnitIdMismatch,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_TIMEOUT,
            request_timeout: DEFAULT_TIMEOUT,
            unit_id_mismatch: UnitIdMismatch::default(),
        }
    }
}

/// Establish a direct connection to a Modbus TCP coupler.
pub async fn connect(socket_addr: SocketAddr) -> io::Result<Context> {
    connect_slave(socket_addr, Slave::tcp_device()).await
}

/// Connect to a physical, broadcast, or custom Modbus device,
/// probably through a Modbus TCP gateway that is forwarding
/// messages to/from the corresponding slave device.
pub async fn connect_slave(socket_addr: SocketAddr, slave: Slave) -> io::Result<Context> {
    connect_with_config(socket_addr, slave, Config::default()).await
}

/// Connect to a Modbus device with custom timeouts.
pub async fn connect_with_config(
    socket_addr: SocketAddr,
    slave: Slave,
    config: Config,
) -> io::Result<Context> {
    let transport = tokio::time::timeout(config.connect_timeout, TcpStream::connect(socket_addr))
        .await
        .map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connecting to {socket_addr} timed out"),
            )
        })??;
    transport.set_nodelay(true)?;
    log::debug!("Connected to {socket_addr}");
    Ok(attach_with_config(transport, slave, config))
}

/// Attach a new client context to a direct transport connection.
///
/// Must be invoked from within a tokio runtime.
pub fn attach<T>(transport: T) -> Context
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    attach_slave(transport, Slave::tcp_device())
}

/// Attach a new client context to a transport connection.
///
/// Must be invoked from within a tokio runtime.
pub fn attach_slave<T>(transport: T, slave: Slave) -> Context
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    attach_with_config(transport, slave, Config::default())
}

fn attach_with_config<T>(transport: T, slave: Slave, config: Config) -> Context
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let client = crate::service::tcp::Client::new(
        transport,
        slave,
        config.request_timeout,
        config.unit_id_mismatch,
    );
    Context {
        client: Box::new(client),
    }
}
