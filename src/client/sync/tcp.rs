// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Synchronous TCP client connections

use std::{io, net::SocketAddr};

use super::Context;

use crate::{
    client::tcp::{connect_with_config as async_connect_with_config, Config},
    slave::Slave,
};

/// Establish a direct connection to a Modbus TCP coupler.
pub fn connect(socket_addr: SocketAddr) -> io::Result<Context> {
    connect_slave(socket_addr, Slave::tcp_device())
}

/// Connect to any kind of Modbus slave device, probably through a Modbus TCP
/// gateway that is forwarding messages to/from the corresponding unit identified
/// by the slave parameter.
pub fn connect_slave(socket_addr: SocketAddr, slave: Slave) -> io::Result<Context> {
    connect_with_config(socket_addr, slave, Config::default())
}

/// Connect to a Modbus device with custom timeouts.
pub fn connect_with_config(
    socket_addr: SocketAddr,
    slave: Slave,
    config: Config,
) -> io::Result<Context> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let async_ctx = runtime.block_on(async_connect_with_config(socket_addr, slave, config))?;
    Ok(Context { async_ctx, runtime })
}
