// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

pub(crate) mod tcp;

mod transaction;

use crate::{
    error::ProtocolError,
    frame::{tcp::UnitId, FunctionCode},
};

/// Treatment of a response that carries a different unit id than its request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnitIdMismatch {
    /// Log a warning and deliver the response anyway.
    #[default]
    Warn,

    /// Fail the request with [`ProtocolError::UnitMismatch`].
    Reject,
}

/// Check that the response has been sent by the addressed unit.
fn verify_unit_id(
    request: UnitId,
    response: UnitId,
    policy: UnitIdMismatch,
) -> Result<(), ProtocolError> {
    if request == response {
        return Ok(());
    }
    match policy {
        UnitIdMismatch::Warn => {
            log::warn!("Mismatching unit ids: request = {request}, response = {response}");
            Ok(())
        }
        UnitIdMismatch::Reject => Err(ProtocolError::UnitMismatch { request, response }),
    }
}

/// Check that the response answers the requested function.
///
/// Exception responses carry the requested function code without the
/// exception bit and are checked the same way.
fn verify_function_code(
    request: FunctionCode,
    response: FunctionCode,
) -> Result<(), ProtocolError> {
    if request != response {
        return Err(ProtocolError::FunctionCodeMismatch { request, response });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_unit_ids() {
        assert!(verify_unit_id(15, 15, UnitIdMismatch::Reject).is_ok());
    }

    #[test]
    fn warn_about_mismatching_unit_ids() {
        assert!(verify_unit_id(15, 16, UnitIdMismatch::Warn).is_ok());
    }

    #[test]
    fn reject_mismatching_unit_ids() {
        let err = verify_unit_id(15, 16, UnitIdMismatch::Reject).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::UnitMismatch {
                request: 15,
                response: 16
            }
        ));
    }

    #[test]
    fn reject_mismatching_function_codes() {
        assert!(verify_function_code(
            FunctionCode::ReadHoldingRegisters,
            FunctionCode::ReadHoldingRegisters
        )
        .is_ok());
        let err = verify_function_code(
            FunctionCode::ReadHoldingRegisters,
            FunctionCode::WriteSingleRegister,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "mismatching function codes: request = 0x03, response = 0x06"
        );
    }
}
