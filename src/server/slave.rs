// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A Modbus TCP slave serving a [`ProcessImage`]

use std::{
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

use tokio::{sync::oneshot, task::JoinHandle};

use crate::{
    image::{ImageError, ProcessImage, RegisterBank},
    slave::Slave,
    DEFAULT_PORT,
};

use super::{
    image::ImageService,
    tcp::{accept_tcp_connection, bind, Server},
    Terminated,
};

/// Listener settings of a [`TcpSlave`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// The local address to listen on.
    pub bind_addr: SocketAddr,

    /// Maximum number of connections served at the same time.
    pub max_connections: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_connections: 5,
        }
    }
}

#[derive(Debug)]
struct Running {
    local_addr: SocketAddr,
    abort_tx: oneshot::Sender<()>,
    task: JoinHandle<io::Result<Terminated>>,
}

/// A Modbus TCP slave that serves one [`RegisterBank`] per unit.
///
/// All process images have to be added before the slave is opened.
/// Dropping an open slave stops listening without waiting for the
/// listener to shut down, use [`TcpSlave::close`] for a graceful shutdown.
#[derive(Debug)]
pub struct TcpSlave {
    config: Config,
    image: Arc<ProcessImage>,
    running: Option<Running>,
}

impl TcpSlave {
    /// A slave that will listen on all IPv4 interfaces.
    #[must_use]
    pub fn new(port: u16, max_connections: usize) -> Self {
        Self::with_config(Config {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            max_connections,
        })
    }

    #[must_use]
    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            image: Arc::default(),
            running: None,
        }
    }

    /// Registers the register bank of a unit.
    ///
    /// Fails if the unit is already registered or if the slave is open.
    pub fn add_process_image(&mut self, slave: Slave, bank: RegisterBank) -> Result<(), ImageError> {
        if self.is_open() {
            return Err(ImageError::InUse);
        }
        Arc::make_mut(&mut self.image).insert(slave, bank)
    }

    /// The registered banks, shared with all connections.
    #[must_use]
    pub fn process_image(&self) -> &ProcessImage {
        &self.image
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.running.is_some()
    }

    /// The address the slave is listening on, while it is open.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.local_addr)
    }

    /// Binds the listener and starts accepting connections.
    ///
    /// Returns the bound address, which differs from the configured one
    /// when listening on port `0`. Opening an open slave has no effect.
    pub async fn open(&mut self) -> io::Result<SocketAddr> {
        if let Some(running) = &self.running {
            return Ok(running.local_addr);
        }

        let listener = bind(self.config.bind_addr)?;
        let local_addr = listener.local_addr()?;
        let server = Server::new(listener).max_connections(self.config.max_connections);
        let service = ImageService::new(Arc::clone(&self.image));
        let (abort_tx, abort_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let new_service = |_socket_addr| Ok(Some(service.clone()));
            let on_connected = |stream, socket_addr| async move {
                accept_tcp_connection(stream, socket_addr, new_service)
            };
            let on_process_error = |err| {
                log::warn!("Connection failed: {err}");
            };
            let abort_signal = async move {
                abort_rx.await.ok();
            };
            server
                .serve_until(&on_connected, on_process_error, abort_signal)
                .await
        });
        log::info!(
            "Listening on {local_addr} for units {:?}",
            self.image.units()
        );

        self.running = Some(Running {
            local_addr,
            abort_tx,
            task,
        });
        Ok(local_addr)
    }

    /// Stops listening and drops all connections.
    ///
    /// Closing a closed slave has no effect.
    pub async fn close(&mut self) -> io::Result<()> {
        let Some(Running {
            local_addr,
            abort_tx,
            task,
        }) = self.running.take()
        else {
            return Ok(());
        };
        // The server might have terminated already.
        let _ = abort_tx.send(());
        let terminated = task
            .await
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))??;
        log::info!("Stopped listening on {local_addr}: {terminated:?}");
        Ok(())
    }
}

impl Drop for TcpSlave {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.task.abort();
        }
    }
}
