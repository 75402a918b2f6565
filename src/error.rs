// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! Error types for the CDAP runtime and the RIB
//!
//! Each failure domain gets its own structured error enum; `CdapError`
//! is the umbrella type returned by the public entry points.

use crate::message::CdapOpCode;
use crate::state_machine::ConnectionState;
use thiserror::Error;

/// Top-level error type for CDAP/RIB operations
#[derive(Error, Debug)]
pub enum CdapError {
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("RIB error: {0}")]
    Rib(#[from] RibError),

    #[error("session on port {0} aborted")]
    SessionAborted(u32),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("transport error on port {port_id}: {source}")]
    Transport {
        port_id: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

/// Errors produced by the wire codec
#[derive(Error, Debug)]
pub enum WireError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("unknown operation code: {0}")]
    UnknownOpCode(i32),

    #[error("message of {size} bytes exceeds the {max} byte limit")]
    Oversize { size: usize, max: usize },
}

impl From<prost::DecodeError> for WireError {
    fn from(e: prost::DecodeError) -> Self {
        WireError::Malformed(e.to_string())
    }
}

/// CDAP protocol violations: bad session state, invoke-id misuse or a
/// message whose fields do not match its opcode
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("cannot process {op_code} while the session is in {state} state")]
    BadState {
        state: ConnectionState,
        op_code: CdapOpCode,
    },

    #[error("invoke id {0} is already in use")]
    DuplicateInvokeId(u32),

    #[error("no pending {op_code} request matches invoke id {invoke_id}")]
    OrphanResponse { op_code: CdapOpCode, invoke_id: u32 },

    #[error("response {got} does not match the pending {expected} request for invoke id {invoke_id}")]
    OpcodeMismatch {
        expected: CdapOpCode,
        got: CdapOpCode,
        invoke_id: u32,
    },

    #[error("{field} must be set for {op_code} messages")]
    FieldMissing {
        field: &'static str,
        op_code: CdapOpCode,
    },

    #[error("{field} cannot be set for {op_code} messages")]
    FieldForbidden {
        field: &'static str,
        op_code: CdapOpCode,
    },

    #[error("no open CDAP session on port {0}")]
    NoSession(u32),
}

/// RIB-specific errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RibError {
    #[error("object already exists: {0}")]
    ObjectExists(String),

    #[error("object does not exist: {0}")]
    ObjectDoesNotExist(String),

    #[error("object has children: {0}")]
    ObjectHasChildren(String),

    #[error("invalid object: {0}")]
    ObjectInvalid(String),

    #[error("object class mismatch: expected {expected}, got {got}")]
    ObjectClassMismatch { expected: String, got: String },

    #[error("no schema registered for version {0}")]
    SchemaNotFound(u64),

    #[error("schema for version {0} already exists")]
    SchemaExists(u64),

    #[error("a create callback for class '{class}' and path '{path}' is already registered")]
    CallbackAlreadyRegistered { class: String, path: String },

    #[error("operation not supported by the target object")]
    OperationNotSupported,
}

impl RibError {
    /// Result code carried on the `_R` message when this error is
    /// reported back to the peer. 0 is reserved for success.
    pub fn result_code(&self) -> i32 {
        match self {
            RibError::ObjectExists(_) => -2,
            RibError::ObjectDoesNotExist(_) => -3,
            RibError::ObjectHasChildren(_) => -4,
            RibError::ObjectInvalid(_) => -5,
            RibError::ObjectClassMismatch { .. } => -6,
            RibError::SchemaNotFound(_) => -7,
            RibError::SchemaExists(_) => -8,
            RibError::CallbackAlreadyRegistered { .. } => -9,
            RibError::OperationNotSupported => -10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::DuplicateInvokeId(5);
        assert_eq!(err.to_string(), "invoke id 5 is already in use");

        let err = ProtocolError::NoSession(9);
        assert_eq!(err.to_string(), "no open CDAP session on port 9");
    }

    #[test]
    fn test_rib_error_result_codes_are_distinct() {
        let errors = [
            RibError::ObjectExists("/a".to_string()),
            RibError::ObjectDoesNotExist("/a".to_string()),
            RibError::ObjectHasChildren("/a".to_string()),
            RibError::ObjectInvalid("/a".to_string()),
            RibError::ObjectClassMismatch {
                expected: "x".to_string(),
                got: "y".to_string(),
            },
            RibError::SchemaNotFound(1),
            RibError::SchemaExists(1),
            RibError::CallbackAlreadyRegistered {
                class: "x".to_string(),
                path: String::new(),
            },
            RibError::OperationNotSupported,
        ];

        let mut codes: Vec<i32> = errors.iter().map(|e| e.result_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(codes.iter().all(|&c| c != 0));
    }

    #[test]
    fn test_wire_error_into_cdap_error() {
        let err: CdapError = WireError::UnknownOpCode(42).into();
        assert!(matches!(err, CdapError::Wire(WireError::UnknownOpCode(42))));
    }
}
