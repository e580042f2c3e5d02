// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use byteorder::{BigEndian, ByteOrder as _};
use bytes::{BufMut as _, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::{Error, FrameError, ProtocolError},
    frame::{tcp::*, *},
};

use super::*;

pub(crate) const HEADER_LEN: usize = 7;

const PROTOCOL_ID: u16 = 0x0000; // TCP

/// The length field counts the unit id and at least a function code.
const MIN_LENGTH: u16 = 2;

#[allow(clippy::cast_possible_truncation)]
const MAX_LENGTH: u16 = MAX_PDU_SIZE as u16 + 1;

pub(crate) fn encode_header(buf: &mut BytesMut, hdr: Header, pdu_len: usize) {
    buf.put_u16(hdr.transaction_id);
    buf.put_u16(PROTOCOL_ID);
    buf.put_u16(u16_len(pdu_len + 1));
    buf.put_u8(hdr.unit_id);
}

/// Splits the next complete MBAP frame off the front of `buf`.
///
/// Returns `Ok(None)` and leaves `buf` untouched until the whole frame
/// has been buffered.
pub(crate) fn decode_frame(buf: &mut BytesMut) -> Result<Option<(Header, Bytes)>, FrameError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let protocol_id = BigEndian::read_u16(&buf[2..4]);
    if protocol_id != PROTOCOL_ID {
        return Err(FrameError::ProtocolMismatch(protocol_id));
    }

    // len = bytes of PDU + one byte (unit ID)
    let len = BigEndian::read_u16(&buf[4..6]);
    if !(MIN_LENGTH..=MAX_LENGTH).contains(&len) {
        return Err(FrameError::InvalidLength(len));
    }
    let pdu_len = usize::from(len) - 1;
    let frame_len = HEADER_LEN + pdu_len;
    if buf.len() < frame_len {
        buf.reserve(frame_len - buf.len());
        return Ok(None);
    }

    let header_data = buf.split_to(HEADER_LEN);
    let pdu = buf.split_to(pdu_len).freeze();
    let hdr = Header {
        transaction_id: BigEndian::read_u16(&header_data[0..2]),
        unit_id: header_data[6],
    };
    Ok(Some((hdr, pdu)))
}

/// Decodes the remaining frames when the stream has ended.
///
/// Leftover bytes that do not form a complete frame are reported
/// as [`FrameError::TruncatedFrame`].
fn decode_frame_eof(buf: &mut BytesMut) -> Result<Option<(Header, Bytes)>, FrameError> {
    if let Some(frame) = decode_frame(buf)? {
        return Ok(Some(frame));
    }
    if buf.is_empty() {
        return Ok(None);
    }
    let expected = if buf.len() >= 6 {
        HEADER_LEN - 1 + usize::from(BigEndian::read_u16(&buf[4..6]))
    } else {
        HEADER_LEN
    };
    Err(FrameError::TruncatedFrame {
        expected,
        received: buf.len(),
    })
}

#[derive(Debug, Default)]
pub(crate) struct ClientCodec;

#[derive(Debug, Default)]
pub(crate) struct ServerCodec;

impl Decoder for ClientCodec {
    type Item = ResponseFrame;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ResponseFrame>, Error> {
        Ok(decode_frame(buf)?.map(|(hdr, pdu)| ResponseFrame { hdr, pdu }))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<ResponseFrame>, Error> {
        Ok(decode_frame_eof(buf)?.map(|(hdr, pdu)| ResponseFrame { hdr, pdu }))
    }
}

impl ServerCodec {
    fn decode_adu(frame: Option<(Header, Bytes)>) -> Result<Option<RequestAdu<'static>>, Error> {
        let Some((hdr, pdu_data)) = frame else {
            return Ok(None);
        };
        let pdu = RequestPdu::try_from(pdu_data).map_err(ProtocolError::Pdu)?;
        Ok(Some(RequestAdu { hdr, pdu }))
    }
}

impl Decoder for ServerCodec {
    type Item = RequestAdu<'static>;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RequestAdu<'static>>, Error> {
        Self::decode_adu(decode_frame(buf)?)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<RequestAdu<'static>>, Error> {
        Self::decode_adu(decode_frame_eof(buf)?)
    }
}

impl<'a> Encoder<RequestAdu<'a>> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, adu: RequestAdu<'a>, buf: &mut BytesMut) -> Result<(), Error> {
        let RequestAdu {
            hdr,
            pdu: RequestPdu(request),
        } = adu;
        let pdu_len = request_pdu_size(&request).map_err(ProtocolError::Pdu)?;
        buf.reserve(HEADER_LEN + pdu_len);
        encode_header(buf, hdr, pdu_len);
        encode_request_pdu(buf, &request);
        Ok(())
    }
}

impl Encoder<ResponseAdu> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, adu: ResponseAdu, buf: &mut BytesMut) -> Result<(), Error> {
        let ResponseAdu {
            hdr,
            pdu: ResponsePdu(result),
        } = adu;
        let pdu_len = response_result_pdu_size(&result).map_err(ProtocolError::Pdu)?;
        buf.reserve(HEADER_LEN + pdu_len);
        encode_header(buf, hdr, pdu_len);
        encode_response_result_pdu(buf, &result);
        Ok(())
    }
}
