// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # TCP slave example
//!
//! Serves a single holding register with the value 42 as unit 15 on
//! port 1502 until Ctrl-C is pressed.
//!
//! ```sh
//! RUST_LOG=debug cargo run --example tcp-slave
//! ```

use tokio_modbus_image::{prelude::*, server::slave::TcpSlave, DEFAULT_PORT};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut slave = TcpSlave::new(DEFAULT_PORT, 5);
    slave.add_process_image(Slave(15), RegisterBank::from(vec![42]))?;
    let socket_addr = slave.open().await?;
    println!("SLAVE: Listening on {socket_addr}, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;

    println!("SLAVE: Shutting down");
    slave.close().await?;
    Ok(())
}
