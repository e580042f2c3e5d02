// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The blocking client must be used outside of any tokio runtime.

#![cfg(all(feature = "server", feature = "sync"))]

use std::{sync::mpsc, thread};

use tokio_modbus_image::{
    prelude::*,
    server::slave::{Config, TcpSlave},
};

#[test]
fn sync_client_reads_and_writes() -> anyhow::Result<()> {
    let (addr_tx, addr_rx) = mpsc::channel();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let slave_thread = thread::spawn(move || -> anyhow::Result<()> {
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(async move {
            let mut slave = TcpSlave::with_config(Config {
                bind_addr: "127.0.0.1:0".parse()?,
                max_connections: 1,
            });
            slave.add_process_image(Slave(15), RegisterBank::from(vec![42, 0]))?;
            addr_tx.send(slave.open().await?)?;
            stop_rx.await.ok();
            slave.close().await?;
            Ok::<_, anyhow::Error>(())
        })
    });

    let socket_addr = addr_rx.recv()?;
    let mut ctx = sync::tcp::connect_slave(socket_addr, Slave(15))?;
    assert_eq!(ctx.read_holding_registers(0, 1)??, [42]);
    ctx.write_single_register(1, 7)??;
    assert_eq!(ctx.read_holding_registers(0, 2)??, [42, 7]);
    assert_eq!(
        ctx.read_holding_registers(2, 1)?,
        Err(ExceptionCode::IllegalDataAddress)
    );
    ctx.disconnect()?;

    let _ = stop_tx.send(());
    slave_thread.join().expect("slave thread panicked")?;
    Ok(())
}
