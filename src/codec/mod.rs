// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{
    convert::TryFrom,
    io::{self, Cursor, Error, ErrorKind},
};

use byteorder::{BigEndian, ReadBytesExt as _};
use bytes::{BufMut as _, Bytes, BytesMut};

use crate::{
    frame::{RequestPdu, ResponsePdu},
    ExceptionCode, ExceptionResponse, FunctionCode, Request, Response,
};

pub(crate) mod tcp;

/// Maximum request/response PDU size of the Modbus application protocol.
pub(crate) const MAX_PDU_SIZE: usize = 253;

#[allow(clippy::cast_possible_truncation)]
fn u16_len(len: usize) -> u16 {
    // This type conversion should always be safe, because either
    // the caller is responsible to pass a valid usize or the
    // possible values are limited by the protocol.
    debug_assert!(len <= u16::MAX.into());
    len as u16
}

#[allow(clippy::cast_possible_truncation)]
fn u8_len(len: usize) -> u8 {
    // This type conversion should always be safe, because either
    // the caller is responsible to pass a valid usize or the
    // possible values are limited by the protocol.
    debug_assert!(len <= u8::MAX.into());
    len as u8
}

pub(crate) fn encode_request_pdu(buf: &mut BytesMut, request: &Request<'_>) {
    use crate::frame::Request::*;
    buf.put_u8(request.function_code().value());
    match request {
        ReadHoldingRegisters(address, quantity) => {
            buf.put_u16(*address);
            buf.put_u16(*quantity);
        }
        WriteSingleRegister(address, word) => {
            buf.put_u16(*address);
            buf.put_u16(*word);
        }
        WriteMultipleRegisters(address, words) => {
            buf.put_u16(*address);
            let len = words.len();
            buf.put_u16(u16_len(len));
            buf.put_u8(u8_len(len * 2));
            for w in words.as_ref() {
                buf.put_u16(*w);
            }
        }
        Custom(_, custom_data) => {
            buf.put_slice(custom_data.as_ref());
        }
    }
}

pub(crate) fn encode_response_pdu(buf: &mut BytesMut, response: &Response) {
    use crate::frame::Response::*;
    buf.put_u8(response.function_code().value());
    match response {
        ReadHoldingRegisters(registers) => {
            buf.put_u8(u8_len(registers.len() * 2));
            for r in registers {
                buf.put_u16(*r);
            }
        }
        WriteSingleRegister(address, word) => {
            buf.put_u16(*address);
            buf.put_u16(*word);
        }
        WriteMultipleRegisters(address, quantity) => {
            buf.put_u16(*address);
            buf.put_u16(*quantity);
        }
        Custom(_, custom_data) => {
            buf.put_slice(custom_data);
        }
    }
}

pub(crate) fn encode_exception_response_pdu(buf: &mut BytesMut, rsp: ExceptionResponse) {
    debug_assert!(rsp.function.value() < 0x80);
    buf.put_u8(rsp.function.value() | 0x80);
    buf.put_u8(rsp.exception.into());
}

pub(crate) fn encode_response_result_pdu(
    buf: &mut BytesMut,
    res: &Result<Response, ExceptionResponse>,
) {
    match res {
        Ok(rsp) => encode_response_pdu(buf, rsp),
        Err(rsp) => encode_exception_response_pdu(buf, *rsp),
    }
}

pub(crate) fn request_pdu_size(req: &Request<'_>) -> io::Result<usize> {
    use crate::frame::Request::*;
    let size = match req {
        ReadHoldingRegisters(_, _) | WriteSingleRegister(_, _) => 5,
        WriteMultipleRegisters(_, data) => 6 + data.len() * 2,
        Custom(_, data) => 1 + data.len(),
    };
    if size > MAX_PDU_SIZE {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            "request PDU size exceeded",
        ));
    }
    Ok(size)
}

pub(crate) fn response_pdu_size(response: &Response) -> io::Result<usize> {
    use crate::frame::Response::*;
    let size = match response {
        WriteMultipleRegisters(_, _) | WriteSingleRegister(_, _) => 5,
        ReadHoldingRegisters(data) => 2 + data.len() * 2,
        Custom(_, data) => 1 + data.len(),
    };
    if size > MAX_PDU_SIZE {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            "response PDU size exceeded",
        ));
    }
    Ok(size)
}

pub(crate) fn response_result_pdu_size(
    res: &Result<Response, ExceptionResponse>,
) -> io::Result<usize> {
    match res {
        Ok(rsp) => response_pdu_size(rsp),
        Err(_) => Ok(2),
    }
}

fn read_u16_be(reader: &mut impl io::Read) -> io::Result<u16> {
    reader.read_u16::<BigEndian>()
}

fn has_remaining(rdr: &Cursor<&Bytes>) -> bool {
    usize::try_from(rdr.position()).map_or(true, |pos| pos < rdr.get_ref().len())
}

fn read_words(rdr: &mut Cursor<&Bytes>, byte_count: u8) -> io::Result<Vec<u16>> {
    if byte_count % 2 != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "invalid quantity",
        ));
    }
    let quantity = byte_count / 2;
    let mut data = Vec::with_capacity(quantity.into());
    for _ in 0..quantity {
        data.push(read_u16_be(rdr)?);
    }
    Ok(data)
}

impl TryFrom<Bytes> for Request<'static> {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        use crate::frame::Request::*;
        if bytes.len() > MAX_PDU_SIZE {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                "request PDU size exceeded",
            ));
        }
        let rdr = &mut Cursor::new(&bytes);
        let fn_code = rdr.read_u8()?;
        let req = match fn_code {
            0x03 => ReadHoldingRegisters(read_u16_be(rdr)?, read_u16_be(rdr)?),
            0x06 => WriteSingleRegister(read_u16_be(rdr)?, read_u16_be(rdr)?),
            0x10 => {
                let address = read_u16_be(rdr)?;
                let quantity = read_u16_be(rdr)?;
                let byte_count = rdr.read_u8()?;
                if u32::from(byte_count) != u32::from(quantity) * 2 {
                    return Err(io::Error::new(ErrorKind::InvalidData, "invalid quantity"));
                }
                let data = read_words(rdr, byte_count)?;
                WriteMultipleRegisters(address, data.into())
            }
            fn_code if fn_code < 0x80 => {
                // Consume all remaining bytes as custom data.
                return Ok(Custom(fn_code, bytes[1..].to_vec().into()));
            }
            fn_code => {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("invalid function code: 0x{fn_code:02X}"),
                ));
            }
        };
        // Verify that all data has been consumed and decoded.
        if has_remaining(rdr) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "undecoded request data",
            ));
        }
        Ok(req)
    }
}

impl TryFrom<Bytes> for RequestPdu<'static> {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        let pdu = Request::try_from(bytes)?.into();
        Ok(pdu)
    }
}

impl TryFrom<Bytes> for Response {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        use crate::frame::Response::*;
        if bytes.len() > MAX_PDU_SIZE {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                "response PDU size exceeded",
            ));
        }
        let rdr = &mut Cursor::new(&bytes);
        let fn_code = rdr.read_u8()?;
        let rsp = match fn_code {
            0x03 => {
                let byte_count = rdr.read_u8()?;
                ReadHoldingRegisters(read_words(rdr, byte_count)?)
            }
            0x06 => WriteSingleRegister(read_u16_be(rdr)?, read_u16_be(rdr)?),
            0x10 => WriteMultipleRegisters(read_u16_be(rdr)?, read_u16_be(rdr)?),
            fn_code if fn_code < 0x80 => {
                // Consume all remaining bytes as custom data.
                let mut bytes = bytes;
                return Ok(Custom(fn_code, bytes.split_off(1)));
            }
            fn_code => {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    format!("invalid function code: 0x{fn_code:02X}"),
                ));
            }
        };
        // Verify that all data has been consumed and decoded.
        if has_remaining(rdr) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "undecoded response data",
            ));
        }
        Ok(rsp)
    }
}

impl TryFrom<Bytes> for ExceptionResponse {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        let rdr = &mut Cursor::new(&bytes);
        let fn_err_code = rdr.read_u8()?;
        if fn_err_code < 0x80 {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "Invalid exception function code",
            ));
        }
        let function = fn_err_code - 0x80;
        let exception = ExceptionCode::new(rdr.read_u8()?);
        if has_remaining(rdr) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "undecoded exception data",
            ));
        }
        Ok(ExceptionResponse {
            function: FunctionCode::new(function),
            exception,
        })
    }
}

impl TryFrom<Bytes> for ResponsePdu {
    type Error = Error;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        let fn_code = Cursor::new(&bytes).read_u8()?;
        let pdu = if fn_code < 0x80 {
            Response::try_from(bytes)?.into()
        } else {
            ExceptionResponse::try_from(bytes)?.into()
        };
        Ok(pdu)
    }
}
