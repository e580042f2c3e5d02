// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{borrow::Cow, future};

use tokio_modbus_image::{
    client::{Client as _, Context, Reader as _, Writer as _},
    server::Service,
    Address, ExceptionCode, Request, Response,
};

/// Answers every request with the exception code that equals its address.
pub struct TestService {}

impl TestService {
    fn handle(&self, req: Request<'static>) -> Result<Response, ExceptionCode> {
        use Request::*;

        match req {
            ReadHoldingRegisters(addr, _)
            | WriteSingleRegister(addr, _)
            | WriteMultipleRegisters(addr, _) => Err(exception_at(addr)),
            Custom(_, _) => Err(ExceptionCode::IllegalFunction),
        }
    }
}

impl Service for TestService {
    type Request = Request<'static>;

    type Response = Response;

    type Exception = ExceptionCode;

    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        future::ready(self.handle(req))
    }
}

#[allow(clippy::cast_possible_truncation)]
fn exception_at(addr: Address) -> ExceptionCode {
    ExceptionCode::new(addr as u8)
}

const EXCEPTIONS: [ExceptionCode; 10] = [
    ExceptionCode::IllegalFunction,
    ExceptionCode::IllegalDataAddress,
    ExceptionCode::IllegalDataValue,
    ExceptionCode::SlaveDeviceFailure,
    ExceptionCode::Acknowledge,
    ExceptionCode::SlaveDeviceBusy,
    ExceptionCode::MemoryParityError,
    ExceptionCode::GatewayPathUnavailable,
    ExceptionCode::GatewayTargetDevice,
    ExceptionCode::Custom(0x42),
];

pub async fn check_client_context(mut ctx: Context) {
    for exception in EXCEPTIONS {
        let addr = Address::from(u8::from(exception));

        let response = ctx
            .read_holding_registers(addr, 2)
            .await
            .expect("communication failed");
        assert_eq!(response, Err(exception));

        let response = ctx
            .write_single_register(addr, 42)
            .await
            .expect("communication failed");
        assert_eq!(response, Err(exception));

        let response = ctx
            .write_multiple_registers(addr, &[42])
            .await
            .expect("communication failed");
        assert_eq!(response, Err(exception));
    }

    let response = ctx
        .call(Request::Custom(70, Cow::Owned(vec![42])))
        .await
        .expect("communication failed");
    assert_eq!(response, Err(ExceptionCode::IllegalFunction));
}
