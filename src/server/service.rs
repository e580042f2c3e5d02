// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{future::Future, ops::Deref};

/// A Modbus server service.
///
/// The TCP server hands every decoded request over to the service of
/// its connection, see [`crate::server::tcp::Server`]. A service that
/// needs to know the addressed unit uses [`crate::SlaveRequest`] as its
/// request type, otherwise [`crate::Request`] suffices.
pub trait Service {
    /// Requests handled by the service.
    type Request;

    /// Responses sent by the service.
    type Response;

    /// Exception codes sent by the service instead of a response.
    type Exception;

    /// The future response value.
    type Future: Future<Output = Result<Self::Response, Self::Exception>> + Send;

    /// Process the request and return the response asynchronously.
    fn call(&self, req: Self::Request) -> Self::Future;
}

impl<D> Service for D
where
    D: Deref + ?Sized,
    D::Target: Service,
{
    type Request = <D::Target as Service>::Request;
    type Response = <D::Target as Service>::Response;
    type Exception = <D::Target as Service>::Exception;
    type Future = <D::Target as Service>::Future;

    /// A forwarding blanket impl to support smart pointers around [`Service`].
    fn call(&self, req: Self::Request) -> Self::Future {
        self.deref().call(req)
    }
}

#[cfg(test)]
mod tests {
    use std::{future, sync::Arc};

    use crate::{ExceptionCode, Request, Response};

    use super::*;

    struct EchoService;

    impl Service for EchoService {
        type Request = Request<'static>;
        type Response = Response;
        type Exception = ExceptionCode;
        type Future = future::Ready<Result<Self::Response, Self::Exception>>;

        fn call(&self, req: Self::Request) -> Self::Future {
            let res = match req {
                Request::WriteSingleRegister(address, word) => {
                    Ok(Response::WriteSingleRegister(address, word))
                }
                _ => Err(ExceptionCode::IllegalFunction),
            };
            future::ready(res)
        }
    }

    #[tokio::test]
    async fn call_through_smart_pointers() {
        let service = Arc::new(Box::new(EchoService));
        let rsp = service.call(Request::WriteSingleRegister(1, 2)).await;
        assert_eq!(rsp, Ok(Response::WriteSingleRegister(1, 2)));
        let rsp = service.call(Request::ReadHoldingRegisters(0, 1)).await;
        assert_eq!(rsp, Err(ExceptionCode::IllegalFunction));
    }
}
