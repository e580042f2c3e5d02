// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use bytes::Bytes;

use super::*;

pub(crate) type TransactionId = u16;
pub(crate) type UnitId = u8;

/// The variable part of the MBAP header.
///
/// Protocol id and length are implied by the framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub(crate) transaction_id: TransactionId,
    pub(crate) unit_id: UnitId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RequestAdu<'a> {
    pub(crate) hdr: Header,
    pub(crate) pdu: RequestPdu<'a>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResponseAdu {
    pub(crate) hdr: Header,
    pub(crate) pdu: ResponsePdu,
}

/// A response frame whose PDU has not been decoded yet.
///
/// The client decodes the PDU only after the frame has been matched
/// with its request, so that a malformed PDU fails the right caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResponseFrame {
    pub(crate) hdr: Header,
    pub(crate) pdu: Bytes,
}

impl<'a> From<RequestAdu<'a>> for SlaveRequest<'a> {
    fn from(from: RequestAdu<'a>) -> Self {
        Self {
            slave: from.hdr.unit_id,
            request: from.pdu.into(),
        }
    }
}
