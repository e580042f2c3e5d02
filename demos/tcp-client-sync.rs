// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Synchronous TCP client example

use tokio_modbus_image::prelude::*;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let socket_addr = "127.0.0.1:1502".parse()?;
    let mut ctx = sync::tcp::connect_slave(socket_addr, Slave(15))?;
    let words = ctx.read_holding_registers(0x00, 1)??;
    println!("Response is '{words:?}'");
    ctx.disconnect()?;
    Ok(())
}
