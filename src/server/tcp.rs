// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus TCP server skeleton

use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use futures_util::{SinkExt as _, StreamExt as _};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    sync::Semaphore,
    task::JoinSet,
};
use tokio_util::codec::Framed;

use crate::{
    codec::tcp::ServerCodec,
    error::Error,
    frame::{tcp::ResponseAdu, ExceptionCode, ExceptionResponse, Response, ResponsePdu, SlaveRequest},
};

use super::{Service, Terminated};

const ACCEPT_ERROR_DELAY: Duration = Duration::from_millis(100);

/// Build the service of an accepted connection.
///
/// Connections for which `new_service` returns `None` are closed
/// immediately.
pub fn accept_tcp_connection<S, NewService>(
    stream: TcpStream,
    socket_addr: SocketAddr,
    new_service: NewService,
) -> io::Result<Option<(S, TcpStream)>>
where
    S: Service + Send + Sync + 'static,
    S::Request: From<SlaveRequest<'static>> + Send,
    NewService: Fn(SocketAddr) -> io::Result<Option<S>>,
{
    let Some(service) = new_service(socket_addr)? else {
        return Ok(None);
    };
    stream.set_nodelay(true)?;
    Ok(Some((service, stream)))
}

/// Open a listening socket with `SO_REUSEADDR`.
///
/// Must be invoked from within a tokio runtime.
pub fn bind(socket_addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(
        Domain::for_address(socket_addr),
        Type::STREAM,
        Some(Protocol::TCP),
    )?;
    configure_socket(&socket)?;
    socket.set_nonblocking(true)?;
    socket.bind(&socket_addr.into())?;
    socket.listen(1024)?;
    TcpListener::from_std(socket.into())
}

#[cfg(unix)]
fn configure_socket(socket: &Socket) -> io::Result<()> {
    socket.set_reuse_address(true)
}

#[cfg(not(unix))]
fn configure_socket(_socket: &Socket) -> io::Result<()> {
    Ok(())
}

#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    limit: Option<Arc<Semaphore>>,
}

impl Server {
    /// Attach the Modbus server to a TCP socket server.
    #[must_use]
    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            limit: None,
        }
    }

    /// Limit the number of connections that are served concurrently.
    ///
    /// Connections that exceed the limit are closed right after they
    /// have been accepted.
    #[must_use]
    pub fn max_connections(mut self, max_connections: usize) -> Self {
        self.limit = Some(Arc::new(Semaphore::new(max_connections)));
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Listens for incoming connections and starts a Modbus TCP server task for
    /// each connection.
    ///
    /// `OnConnected` is responsible for creating both the service and the
    /// transport layer for the underlying TCP stream. If `OnConnected` returns
    /// with `Err` or `Ok(None)` then the connection is closed but
    /// [`Self::serve()`] continues listening for new connections. Failing
    /// to accept a connection doesn't stop the server either, it only pauses
    /// accepting for a moment if the process has run out of resources.
    ///
    /// All connection tasks are aborted when the returned future is dropped.
    pub async fn serve<S, T, F, OnConnected, OnProcessError>(
        &self,
        on_connected: &OnConnected,
        on_process_error: OnProcessError,
    ) -> io::Result<()>
    where
        S: Service + Send + Sync + 'static,
        S::Request: From<SlaveRequest<'static>> + Send,
        S::Response: Into<Response> + Send,
        S::Exception: Into<ExceptionCode> + Send,
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
        F: Future<Output = io::Result<Option<(S, T)>>>,
        OnConnected: Fn(TcpStream, SocketAddr) -> F,
        OnProcessError: FnOnce(Error) + Clone + Send + 'static,
    {
        let mut connections = JoinSet::new();
        loop {
            let (stream, socket_addr) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        if let Some(delay) = accept_error_delay(&err) {
                            log::error!("Failed to accept connection: {err}");
                            tokio::time::sleep(delay).await;
                        } else {
                            log::debug!("Failed to accept connection: {err}");
                        }
                        continue;
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(err) = joined {
                        log::error!("Connection task failed: {err}");
                    }
                    continue;
                }
            };
            log::debug!("Accepted connection from {socket_addr}");

            let permit = match &self.limit {
                Some(limit) => {
                    let Ok(permit) = Arc::clone(limit).try_acquire_owned() else {
                        log::warn!("Rejecting connection from {socket_addr}: too many connections");
                        continue;
                    };
                    Some(permit)
                }
                None => None,
            };

            let (service, transport) = match on_connected(stream, socket_addr).await {
                Ok(Some(connected)) => connected,
                Ok(None) => {
                    log::debug!("No service for connection from {socket_addr}");
                    continue;
                }
                Err(err) => {
                    log::warn!("Failed to set up connection from {socket_addr}: {err}");
                    continue;
                }
            };
            let on_process_error = on_process_error.clone();
            let framed = Framed::new(transport, ServerCodec);

            connections.spawn(async move {
                log::debug!("Processing requests from {socket_addr}");
                if let Err(err) = process(framed, service).await {
                    on_process_error(err);
                }
                log::debug!("Closing connection from {socket_addr}");
                drop(permit);
            });
        }
    }

    /// Start an abortable Modbus TCP server task.
    ///
    /// Warning: Request processing is not scoped and could be aborted at any internal await point!
    /// See also: <https://rust-lang.github.io/wg-async/vision/roadmap/scopes.html#cancellation>
    pub async fn serve_until<S, T, F, X, OnConnected, OnProcessError>(
        &self,
        on_connected: &OnConnected,
        on_process_error: OnProcessError,
        abort_signal: X,
    ) -> io::Result<Terminated>
    where
        S: Service + Send + Sync + 'static,
        S::Request: From<SlaveRequest<'static>> + Send,
        S::Response: Into<Response> + Send,
        S::Exception: Into<ExceptionCode> + Send,
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
        X: Future<Output = ()>,
        F: Future<Output = io::Result<Option<(S, T)>>>,
        OnConnected: Fn(TcpStream, SocketAddr) -> F,
        OnProcessError: FnOnce(Error) + Clone + Send + 'static,
    {
        tokio::select! {
            res = self.serve(on_connected, on_process_error) => res.map(|()| Terminated::Finished),
            () = abort_signal => {
                log::info!("Server aborted");
                Ok(Terminated::Aborted)
            }
        }
    }
}

/// Pause before accepting again after `err`.
///
/// Errors that only concern the connection being accepted are skipped
/// immediately. Anything else, like running out of file descriptors,
/// would fail again right away.
fn accept_error_delay(err: &io::Error) -> Option<Duration> {
    match err.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => None,
        _ => Some(ACCEPT_ERROR_DELAY),
    }
}

/// The request-response loop spawned by [`Server::serve`] for each client.
///
/// Exception responses keep the connection alive, only transport and
/// framing errors end it.
async fn process<S, T>(mut framed: Framed<T, ServerCodec>, service: S) -> Result<(), Error>
where
    S: Service + Send + Sync + 'static,
    S::Request: From<SlaveRequest<'static>> + Send,
    S::Response: Into<Response> + Send,
    S::Exception: Into<ExceptionCode> + Send,
    T: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let Some(request_adu) = framed.next().await.transpose()? else {
            log::debug!("TCP socket has been closed");
            break;
        };

        let hdr = request_adu.hdr;
        let function = request_adu.pdu.0.function_code();
        log::debug!("Received {:?} ({hdr:?})", request_adu.pdu.0);
        let request = SlaveRequest::from(request_adu);
        let result = service.call(request.into()).await;
        let pdu = match result {
            Ok(response) => ResponsePdu(Ok(response.into())),
            Err(exception) => ResponsePdu(Err(ExceptionResponse {
                function,
                exception: exception.into(),
            })),
        };
        framed.send(ResponseAdu { hdr, pdu }).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{
        future,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

    use crate::{
        client::{tcp, Reader as _},
        Request,
    };

    use super::*;

    #[derive(Clone)]
    struct EchoService;

    impl Service for EchoService {
        type Request = Request<'static>;
        type Response = Response;
        type Exception = ExceptionCode;
        type Future = future::Ready<Result<Self::Response, Self::Exception>>;

        fn call(&self, req: Self::Request) -> Self::Future {
            let res = match req {
                Request::ReadHoldingRegisters(address, _) => {
                    Ok(Response::ReadHoldingRegisters(vec![address]))
                }
                _ => Err(ExceptionCode::IllegalFunction),
            };
            future::ready(res)
        }
    }

    #[tokio::test]
    async fn process_answers_with_the_request_header() {
        let (client_side, server_side) = tokio::io::duplex(64);
        let task = tokio::spawn(process(Framed::new(server_side, ServerCodec), EchoService));
        let mut client = client_side;

        client
            .write_all(&[0x12, 0x34, 0x00, 0x00, 0x00, 0x06, 0x0F, 0x03, 0x00, 0x2A, 0x00, 0x01])
            .await
            .unwrap();
        let mut buf = [0; 11];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(
            buf,
            [0x12, 0x34, 0x00, 0x00, 0x00, 0x05, 0x0F, 0x03, 0x02, 0x00, 0x2A]
        );

        // Exceptions keep the connection alive.
        client
            .write_all(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x0F, 0x41])
            .await
            .unwrap();
        let mut buf = [0; 9];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x0F, 0xC1, 0x01]);

        drop(client);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn process_ends_on_protocol_mismatch() {
        let (mut client, server_side) = tokio::io::duplex(64);
        let task = tokio::spawn(process(Framed::new(server_side, ServerCodec), EchoService));
        client
            .write_all(&[0x00, 0x01, 0x00, 0x01, 0x00, 0x06, 0x0F, 0x03, 0x00, 0x00, 0x00, 0x01])
            .await
            .unwrap();
        let err = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid protocol id: 0x0001");
    }

    #[tokio::test]
    async fn failed_connection_setup_keeps_serving() {
        let server = Server::new(bind("127.0.0.1:0".parse().unwrap()).unwrap());
        let socket_addr = server.local_addr().unwrap();
        let server_task = tokio::spawn(async move {
            let attempts = AtomicUsize::new(0);
            let new_service = |_socket_addr| {
                if attempts.fetch_add(1, Ordering::SeqCst) == 1 {
                    return Err(io::Error::new(io::ErrorKind::Other, "no service"));
                }
                Ok(Some(EchoService))
            };
            let on_connected = |stream, socket_addr| async move {
                accept_tcp_connection(stream, socket_addr, new_service)
            };
            let on_process_error = |err| {
                eprintln!("{err}");
            };
            server.serve(&on_connected, on_process_error).await
        });

        let mut first = tcp::connect(socket_addr).await.unwrap();
        assert_eq!(first.read_holding_registers(1, 1).await.unwrap(), Ok(vec![1]));

        let mut second = tcp::connect(socket_addr).await.unwrap();
        assert!(second.read_holding_registers(2, 1).await.is_err());

        assert_eq!(first.read_holding_registers(3, 1).await.unwrap(), Ok(vec![3]));
        let mut third = tcp::connect(socket_addr).await.unwrap();
        assert_eq!(third.read_holding_registers(4, 1).await.unwrap(), Ok(vec![4]));

        assert!(!server_task.is_finished());
        server_task.abort();
    }

    #[test]
    fn pause_accepting_only_on_resource_errors() {
        for kind in [
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::Interrupted,
        ] {
            assert_eq!(accept_error_delay(&kind.into()), None);
        }
        assert_eq!(
            accept_error_delay(&io::ErrorKind::OutOfMemory.into()),
            Some(ACCEPT_ERROR_DELAY)
        );
        // EMFILE
        #[cfg(unix)]
        assert_eq!(
            accept_error_delay(&io::Error::from_raw_os_error(24)),
            Some(ACCEPT_ERROR_DELAY)
        );
    }

    #[tokio::test]
    async fn bind_to_an_ephemeral_port() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let server = Server::new(listener);
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }
}
