// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{fmt, io, sync::Arc, time::Duration};

use futures_util::{SinkExt as _, StreamExt as _};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt as _, ReadHalf, WriteHalf},
    sync::Mutex,
    task::JoinHandle,
};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::{
    codec::{self, tcp::ClientCodec},
    error::{Error, ProtocolError},
    frame::{tcp::*, *},
    slave::*,
    Result,
};

use super::{transaction::Transactions, verify_function_code, verify_unit_id, UnitIdMismatch};

/// Modbus TCP client
///
/// Any number of requests may be outstanding on the connection at the
/// same time. A background task reads all responses and hands each one
/// over to the caller with the matching transaction id.
pub(crate) struct Client<T> {
    writer: Mutex<FramedWrite<WriteHalf<T>, ClientCodec>>,
    transactions: Arc<Transactions>,
    reader: JoinHandle<()>,
    unit_id: UnitId,
    timeout: Duration,
    unit_id_mismatch: UnitIdMismatch,
}

impl<T> fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("unit_id", &self.unit_id)
            .field("timeout", &self.timeout)
            .field("unit_id_mismatch", &self.unit_id_mismatch)
            .finish_non_exhaustive()
    }
}

impl<T> Client<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Takes over the transport and spawns the response reader.
    ///
    /// Must be invoked from within a tokio runtime.
    pub(crate) fn new(
        transport: T,
        slave: Slave,
        timeout: Duration,
        unit_id_mismatch: UnitIdMismatch,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(transport);
        let transactions = Arc::new(Transactions::new());
        let reader = tokio::spawn(read_responses(
            FramedRead::new(read_half, ClientCodec),
            Arc::clone(&transactions),
        ));
        Self {
            writer: Mutex::new(FramedWrite::new(write_half, ClientCodec)),
            transactions,
            reader,
            unit_id: slave.into(),
            timeout,
            unit_id_mismatch,
        }
    }
}

impl<T> Client<T>
where
    T: AsyncWrite,
{
    /// Sends a request and waits for its response.
    ///
    /// A single timeout covers waiting for the connection, writing the
    /// request and receiving the response.
    pub(crate) async fn call(&self, req: SlaveRequest<'_>, timeout: Duration) -> Result<Response> {
        let SlaveRequest { slave, request } = req;
        let function = request.function_code();
        codec::request_pdu_size(&request).map_err(ProtocolError::Pdu)?;

        let mut ticket = self.transactions.allocate()?;
        let req_hdr = Header {
            transaction_id: ticket.id(),
            unit_id: slave,
        };
        log::debug!("Call {request:?} ({req_hdr:?})");

        let exchange = async {
            {
                let mut writer = self.writer.lock().await;
                writer
                    .feed(RequestAdu {
                        hdr: req_hdr,
                        pdu: request.into(),
                    })
                    .await?;
                // Buffered frames are written by any later flush.
                ticket.mark_sent();
                writer.flush().await?;
            }
            ticket.response().await
        };
        let Ok(rsp_frame) = tokio::time::timeout(timeout, exchange).await else {
            log::debug!("Transaction {} timed out", req_hdr.transaction_id);
            return Err(Error::Timeout(timeout));
        };
        let ResponseFrame { hdr: rsp_hdr, pdu } = rsp_frame?;

        verify_unit_id(req_hdr.unit_id, rsp_hdr.unit_id, self.unit_id_mismatch)?;
        let rsp_pdu = ResponsePdu::try_from(pdu).map_err(ProtocolError::Pdu)?;
        verify_function_code(function, rsp_pdu.function_code())?;
        match rsp_pdu {
            ResponsePdu(Ok(rsp)) => Ok(Ok(rsp)),
            ResponsePdu(Err(err)) => Ok(Err(err.exception)),
        }
    }

    /// Shuts down the writing side and fails all outstanding requests.
    pub(crate) async fn disconnect(&self) -> io::Result<()> {
        self.transactions
            .close(io::ErrorKind::NotConnected, "disconnected");
        self.reader.abort();
        let mut writer = self.writer.lock().await;
        match writer.get_mut().shutdown().await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err),
        }
    }
}

impl<T> Drop for Client<T> {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// The response-reading loop of a connection.
async fn read_responses<T>(
    mut framed: FramedRead<ReadHalf<T>, ClientCodec>,
    transactions: Arc<Transactions>,
) where
    T: AsyncRead,
{
    loop {
        match framed.next().await {
            Some(Ok(frame)) => transactions.resolve(frame),
            Some(Err(err)) => {
                log::warn!("Closing connection: {err}");
                transactions.close(err.kind(), err.to_string());
                break;
            }
            None => {
                log::debug!("Connection closed by peer");
                transactions.close(io::ErrorKind::UnexpectedEof, "connection closed by peer");
                break;
            }
        }
    }
}

impl<T> SlaveContext for Client<T> {
    fn set_slave(&mut self, slave: Slave) {
        self.unit_id = slave.into();
    }
}

#[async_trait::async_trait]
impl<T> crate::client::Client for Client<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn call(&mut self, request: Request<'_>) -> Result<Response> {
        let req = SlaveRequest {
            slave: self.unit_id,
            request,
        };
        Client::call(self, req, self.timeout).await
    }

    async fn execute(&self, request: SlaveRequest<'_>, timeout: Duration) -> Result<Response> {
        Client::call(self, request, timeout).await
    }

    async fn disconnect(&mut self) -> io::Result<()> {
        Client::disconnect(self).await
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use tokio::io::DuplexStream;
    use tokio_util::codec::Framed;

    use crate::codec::tcp::ServerCodec;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn connect() -> (Client<DuplexStream>, Framed<DuplexStream, ServerCodec>) {
        let (client_side, server_side) = tokio::io::duplex(1024);
        let client = Client::new(client_side, Slave(15), TIMEOUT, UnitIdMismatch::Warn);
        (client, Framed::new(server_side, ServerCodec))
    }

    fn read_request(slave: SlaveId, address: Address, count: Quantity) -> SlaveRequest<'static> {
        SlaveRequest {
            slave,
            request: Request::ReadHoldingRegisters(address, count),
        }
    }

    async fn respond(
        server: &mut Framed<DuplexStream, ServerCodec>,
        hdr: Header,
        pdu: impl Into<ResponsePdu>,
    ) {
        server
            .send(ResponseAdu {
                hdr,
                pdu: pdu.into(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn read_holding_registers() {
        let (client, mut server) = connect();
        let slave = async {
            let req = server.next().await.unwrap().unwrap();
            assert_eq!(req.hdr.unit_id, 15);
            assert_eq!(req.pdu.0, Request::ReadHoldingRegisters(0, 1));
            respond(&mut server, req.hdr, Response::ReadHoldingRegisters(vec![42])).await;
        };
        let (rsp, ()) = tokio::join!(client.call(read_request(15, 0, 1), TIMEOUT), slave);
        assert_eq!(rsp.unwrap(), Ok(Response::ReadHoldingRegisters(vec![42])));
    }

    #[tokio::test]
    async fn exception_response() {
        let (client, mut server) = connect();
        let slave = async {
            let req = server.next().await.unwrap().unwrap();
            respond(
                &mut server,
                req.hdr,
                ExceptionResponse {
                    function: FunctionCode::ReadHoldingRegisters,
                    exception: ExceptionCode::IllegalDataAddress,
                },
            )
            .await;
        };
        let (rsp, ()) = tokio::join!(client.call(read_request(15, 1, 1), TIMEOUT), slave);
        assert_eq!(rsp.unwrap(), Err(ExceptionCode::IllegalDataAddress));
    }

    #[tokio::test]
    async fn responses_in_reverse_order() {
        let (client, mut server) = connect();
        let slave = async {
            let first = server.next().await.unwrap().unwrap();
            let second = server.next().await.unwrap().unwrap();
            for req in [second, first] {
                let Request::ReadHoldingRegisters(address, _) = req.pdu.0 else {
                    panic!("unexpected request");
                };
                respond(
                    &mut server,
                    req.hdr,
                    Response::ReadHoldingRegisters(vec![address]),
                )
                .await;
            }
        };
        let (first, second, ()) = tokio::join!(
            client.call(read_request(15, 100, 1), TIMEOUT),
            client.call(read_request(15, 200, 1), TIMEOUT),
            slave
        );
        assert_eq!(first.unwrap(), Ok(Response::ReadHoldingRegisters(vec![100])));
        assert_eq!(
            second.unwrap(),
            Ok(Response::ReadHoldingRegisters(vec![200]))
        );
    }

    #[tokio::test]
    async fn late_response_is_not_delivered_to_a_reused_id() {
        let (client, mut server) = connect();

        let rsp = client
            .call(read_request(15, 0, 1), Duration::from_millis(50))
            .await;
        assert!(matches!(rsp, Err(Error::Timeout(_))));
        let stale = server.next().await.unwrap().unwrap();
        assert_eq!(stale.hdr.transaction_id, 0);

        // Force the counter to wrap around onto the abandoned id.
        client.transactions.set_next_id(0);
        let slave = async {
            let req = server.next().await.unwrap().unwrap();
            assert_eq!(req.hdr.transaction_id, 1);
            respond(
                &mut server,
                stale.hdr,
                Response::ReadHoldingRegisters(vec![0xDEAD]),
            )
            .await;
            respond(&mut server, req.hdr, Response::ReadHoldingRegisters(vec![42])).await;
        };
        let (rsp, ()) = tokio::join!(client.call(read_request(15, 0, 1), TIMEOUT), slave);
        assert_eq!(rsp.unwrap(), Ok(Response::ReadHoldingRegisters(vec![42])));
    }

    #[tokio::test]
    async fn wait_without_a_deadline() {
        let (client, mut server) = connect();
        let slave = async {
            let req = server.next().await.unwrap().unwrap();
            respond(&mut server, req.hdr, Response::ReadHoldingRegisters(vec![7])).await;
        };
        let (rsp, ()) = tokio::join!(client.call(read_request(15, 0, 1), Duration::MAX), slave);
        assert_eq!(rsp.unwrap(), Ok(Response::ReadHoldingRegisters(vec![7])));
    }

    #[tokio::test]
    async fn timeout_before_sending_frees_the_id() {
        // The peer never reads, so the first request gets stuck while
        // flushing and keeps the writer locked.
        let (client_side, _server_side) = tokio::io::duplex(8);
        let client = Client::new(client_side, Slave(15), TIMEOUT, UnitIdMismatch::Warn);

        let (first, second) = tokio::join!(
            client.call(read_request(15, 0, 1), Duration::from_millis(100)),
            client.call(read_request(15, 1, 1), Duration::from_millis(50)),
        );
        assert!(matches!(first, Err(Error::Timeout(_))));
        assert!(matches!(second, Err(Error::Timeout(_))));

        // Only the request that has been handed over keeps its id.
        assert_eq!(client.transactions.len(), 1);
    }

    #[tokio::test]
    async fn mismatching_function_code() {
        let (client, mut server) = connect();
        let slave = async {
            let req = server.next().await.unwrap().unwrap();
            respond(&mut server, req.hdr, Response::WriteSingleRegister(0, 0)).await;
        };
        let (rsp, ()) = tokio::join!(client.call(read_request(15, 0, 1), TIMEOUT), slave);
        assert!(matches!(
            rsp,
            Err(Error::Protocol(ProtocolError::FunctionCodeMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn mismatching_unit_id() {
        let (mut client, mut server) = connect();
        for policy in [UnitIdMismatch::Warn, UnitIdMismatch::Reject] {
            client.unit_id_mismatch = policy;
            let slave = async {
                let req = server.next().await.unwrap().unwrap();
                let hdr = Header {
                    unit_id: 16,
                    ..req.hdr
                };
                respond(&mut server, hdr, Response::ReadHoldingRegisters(vec![1])).await;
            };
            let (rsp, ()) = tokio::join!(client.call(read_request(15, 0, 1), TIMEOUT), slave);
            match policy {
                UnitIdMismatch::Warn => {
                    assert_eq!(rsp.unwrap(), Ok(Response::ReadHoldingRegisters(vec![1])));
                }
                UnitIdMismatch::Reject => {
                    assert!(matches!(
                        rsp,
                        Err(Error::Protocol(ProtocolError::UnitMismatch {
                            request: 15,
                            response: 16
                        }))
                    ));
                }
            }
        }
    }

    #[tokio::test]
    async fn oversized_request_is_rejected_before_sending() {
        let (client, _server) = connect();
        let req = SlaveRequest {
            slave: 15,
            request: Request::WriteMultipleRegisters(0, Cow::Owned(vec![0; 124])),
        };
        let rsp = client.call(req, TIMEOUT).await;
        assert!(matches!(rsp, Err(Error::Protocol(ProtocolError::Pdu(_)))));
        assert_eq!(client.transactions.allocate().unwrap().id(), 0);
    }

    #[tokio::test]
    async fn connection_closed_by_peer() {
        let (client, server) = connect();
        let slave = async {
            let mut server = server;
            let _ = server.next().await;
            drop(server);
        };
        let (rsp, ()) = tokio::join!(client.call(read_request(15, 0, 1), TIMEOUT), slave);
        let err = rsp.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        // Later calls fail fast.
        let err = client.call(read_request(15, 0, 1), TIMEOUT).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn disconnect_fails_later_calls() {
        let (client, _server) = connect();
        client.disconnect().await.unwrap();
        let err = client.call(read_request(15, 0, 1), TIMEOUT).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }
}
