// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Serving a [`ProcessImage`]

use std::{future, sync::Arc};

use crate::{
    frame::{
        ExceptionCode, Quantity, Request, Response, SlaveRequest, MAX_READ_QUANTITY,
        MAX_WRITE_QUANTITY,
    },
    image::ProcessImage,
    slave::Slave,
};

use super::Service;

/// Executes register requests against the banks of a [`ProcessImage`].
///
/// Failed requests are answered with an exception code and never
/// affect the connection.
#[derive(Debug, Clone)]
pub struct ImageService {
    image: Arc<ProcessImage>,
}

impl ImageService {
    #[must_use]
    pub fn new(image: Arc<ProcessImage>) -> Self {
        Self { image }
    }

    fn handle(&self, req: SlaveRequest<'static>) -> Result<Response, ExceptionCode> {
        let SlaveRequest { slave, request } = req;
        let slave = Slave(slave);
        match request {
            Request::ReadHoldingRegisters(address, cnt) => {
                check_quantity(cnt, MAX_READ_QUANTITY)?;
                let words = self.image.read(slave, address, cnt)?;
                Ok(Response::ReadHoldingRegisters(words))
            }
            Request::WriteSingleRegister(address, word) => {
                self.image.write(slave, address, &[word])?;
                Ok(Response::WriteSingleRegister(address, word))
            }
            Request::WriteMultipleRegisters(address, words) => {
                let cnt = Quantity::try_from(words.len())
                    .map_err(|_| ExceptionCode::IllegalDataValue)?;
                check_quantity(cnt, MAX_WRITE_QUANTITY)?;
                self.image.write(slave, address, &words)?;
                Ok(Response::WriteMultipleRegisters(address, cnt))
            }
            Request::Custom(function, _) => {
                log::debug!("Unsupported function code 0x{function:02X} for unit {slave}");
                Err(ExceptionCode::IllegalFunction)
            }
        }
    }
}

fn check_quantity(cnt: Quantity, max: Quantity) -> Result<(), ExceptionCode> {
    if cnt == 0 || cnt > max {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok(())
}

impl Service for ImageService {
    type Request = SlaveRequest<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let res = self.handle(req);
        if let Err(exception) = &res {
            log::debug!("Answering with exception: {exception}");
        }
        future::ready(res)
    }
}
