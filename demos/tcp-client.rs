// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Asynchronous TCP client example
//!
//! Expects the `tcp-slave` example to be running. An alternative slave
//! address may be passed as the first argument.

use std::net::SocketAddr;

use tokio_modbus_image::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let socket_addr: SocketAddr = std::env::args()
        .nth(1)
        .as_deref()
        .unwrap_or("127.0.0.1:1502")
        .parse()?;
    let mut ctx = tcp::connect_slave(socket_addr, Slave(15)).await?;

    println!("CLIENT: Reading 1 holding register...");
    let words = ctx.read_holding_registers(0x00, 1).await??;
    println!("CLIENT: The result is '{words:?}'");

    // Unit 15 only has a single register.
    println!("CLIENT: Reading a register out of range...");
    let response = ctx.read_holding_registers(0x01, 1).await?;
    println!("CLIENT: The result is '{response:?}'");
    assert_eq!(response, Err(ExceptionCode::IllegalDataAddress));

    println!("CLIENT: Writing 1 holding register...");
    ctx.write_single_register(0x00, 4711).await??;
    let words = ctx.read_holding_registers(0x00, 1).await??;
    println!("CLIENT: The result is '{words:?}'");

    println!("CLIENT: Done.");
    ctx.disconnect().await?;
    Ok(())
}
