// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types.

use std::{io, time::Duration};

use thiserror::Error;

use crate::{FunctionCode, SlaveId};

/// _Modbus_ protocol or transport error.
///
/// Exception responses of the slave are not errors at this level, see [`crate::Result`].
#[derive(Debug, Error)]
pub enum Error {
    /// _Modbus_ protocol error.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// I/O and network error, including an unexpectedly closed connection.
    #[error(transparent)]
    Transport(#[from] io::Error),

    /// No matching response arrived within the given time.
    #[error("no response within {0:?}")]
    Timeout(Duration),
}

impl From<FrameError> for Error {
    fn from(from: FrameError) -> Self {
        Self::Protocol(from.into())
    }
}

/// _Modbus_ protocol error.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The byte stream could not be split into MBAP frames.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// A PDU could neither be encoded nor decoded.
    #[error("invalid PDU: {0}")]
    Pdu(#[source] io::Error),

    /// The response has been sent by a different unit than the request was addressed to.
    #[error("mismatching unit ids: request = {request}, response = {response}")]
    UnitMismatch { request: SlaveId, response: SlaveId },

    /// The function codes of the request and the response differ.
    #[error("mismatching function codes: request = {request}, response = {response}")]
    FunctionCodeMismatch {
        request: FunctionCode,
        response: FunctionCode,
    },

    /// Every transaction id of the connection is occupied.
    #[error("no free transaction id")]
    TransactionIdsExhausted,
}

/// Error of the MBAP framing layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The protocol id of the MBAP header is not `0x0000`.
    #[error("invalid protocol id: 0x{0:04X}")]
    ProtocolMismatch(u16),

    /// The length field of the MBAP header is out of range.
    #[error("invalid length field: {0}")]
    InvalidLength(u16),

    /// The stream ended in the middle of a frame.
    #[error("truncated frame: received {received} of {expected} bytes")]
    TruncatedFrame { expected: usize, received: usize },
}

impl Error {
    /// The [`io::ErrorKind`] that best describes this error.
    #[must_use]
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            Self::Protocol(_) => io::ErrorKind::InvalidData,
            Self::Transport(err) => err.kind(),
            Self::Timeout(_) => io::ErrorKind::TimedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_errors_are_protocol_errors() {
        let err = Error::from(FrameError::ProtocolMismatch(0x3312));
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::Frame(FrameError::ProtocolMismatch(0x3312)))
        ));
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(err.to_string(), "invalid protocol id: 0x3312");
    }

    #[test]
    fn timeout_is_distinguished_from_transport() {
        let timeout = Error::Timeout(Duration::from_millis(100));
        let transport = Error::from(io::Error::new(io::ErrorKind::TimedOut, "connect"));
        assert!(matches!(timeout, Error::Timeout(_)));
        assert!(matches!(transport, Error::Transport(_)));
        assert_eq!(timeout.kind(), transport.kind());
    }
}
