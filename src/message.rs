// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! CDAP message model
//!
//! A CDAP message carries every field the protocol knows about; which
//! fields may (or must) be present depends on the operation code. The
//! presence rules are enforced by [`CdapMessage::validate`], which runs
//! on every send and every receive.

use crate::error::ProtocolError;
use std::fmt;

/// Abstract syntax identifier carried on `M_CONNECT{,_R}` messages.
pub const ABSTRACT_SYNTAX: i32 = 0x0073;

/// CDAP operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CdapOpCode {
    Connect,
    ConnectR,
    Release,
    ReleaseR,
    Create,
    CreateR,
    Delete,
    DeleteR,
    Read,
    ReadR,
    CancelRead,
    CancelReadR,
    Write,
    WriteR,
    Start,
    StartR,
    Stop,
    StopR,
}

impl fmt::Display for CdapOpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CdapOpCode::Connect => "M_CONNECT",
            CdapOpCode::ConnectR => "M_CONNECT_R",
            CdapOpCode::Release => "M_RELEASE",
            CdapOpCode::ReleaseR => "M_RELEASE_R",
            CdapOpCode::Create => "M_CREATE",
            CdapOpCode::CreateR => "M_CREATE_R",
            CdapOpCode::Delete => "M_DELETE",
            CdapOpCode::DeleteR => "M_DELETE_R",
            CdapOpCode::Read => "M_READ",
            CdapOpCode::ReadR => "M_READ_R",
            CdapOpCode::CancelRead => "M_CANCELREAD",
            CdapOpCode::CancelReadR => "M_CANCELREAD_R",
            CdapOpCode::Write => "M_WRITE",
            CdapOpCode::WriteR => "M_WRITE_R",
            CdapOpCode::Start => "M_START",
            CdapOpCode::StartR => "M_START_R",
            CdapOpCode::Stop => "M_STOP",
            CdapOpCode::StopR => "M_STOP_R",
        };
        write!(f, "{}", name)
    }
}

impl CdapOpCode {
    /// True for connection management opcodes (`M_CONNECT{,_R}`).
    pub fn is_connect_op(&self) -> bool {
        matches!(self, CdapOpCode::Connect | CdapOpCode::ConnectR)
    }

    /// True for every `_R` opcode.
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            CdapOpCode::ConnectR
                | CdapOpCode::ReleaseR
                | CdapOpCode::CreateR
                | CdapOpCode::DeleteR
                | CdapOpCode::ReadR
                | CdapOpCode::CancelReadR
                | CdapOpCode::WriteR
                | CdapOpCode::StartR
                | CdapOpCode::StopR
        )
    }

    /// The six object-manipulation requests.
    pub fn is_object_request(&self) -> bool {
        matches!(
            self,
            CdapOpCode::Create
                | CdapOpCode::Delete
                | CdapOpCode::Read
                | CdapOpCode::Write
                | CdapOpCode::Start
                | CdapOpCode::Stop
        )
    }

    /// Object-bearing opcodes: the six object requests and their responses.
    pub fn is_object_op(&self) -> bool {
        self.is_object_request() || self.request_opcode().is_some_and(|op| op.is_object_request())
    }

    /// For a response opcode, the request opcode it answers.
    pub fn request_opcode(&self) -> Option<CdapOpCode> {
        match self {
            CdapOpCode::ConnectR => Some(CdapOpCode::Connect),
            CdapOpCode::ReleaseR => Some(CdapOpCode::Release),
            CdapOpCode::CreateR => Some(CdapOpCode::Create),
            CdapOpCode::DeleteR => Some(CdapOpCode::Delete),
            CdapOpCode::ReadR => Some(CdapOpCode::Read),
            CdapOpCode::CancelReadR => Some(CdapOpCode::CancelRead),
            CdapOpCode::WriteR => Some(CdapOpCode::Write),
            CdapOpCode::StartR => Some(CdapOpCode::Start),
            CdapOpCode::StopR => Some(CdapOpCode::Stop),
            _ => None,
        }
    }
}

/// CDAP message flags. `Sync` is carried opaquely; the runtime only
/// interprets `RdIncomplete` (partial read responses).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CdapFlags {
    #[default]
    None,
    Sync,
    RdIncomplete,
}

/// One endpoint of a CDAP connection: application process and
/// application entity names plus their instance ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointInfo {
    pub ap_name: String,
    pub ap_inst: String,
    pub ae_name: String,
    pub ae_inst: String,
}

impl EndpointInfo {
    pub fn new(ap_name: impl Into<String>, ae_name: impl Into<String>) -> Self {
        Self {
            ap_name: ap_name.into(),
            ae_name: ae_name.into(),
            ..Default::default()
        }
    }

    fn is_empty(&self) -> bool {
        self.ap_name.is_empty()
            && self.ap_inst.is_empty()
            && self.ae_name.is_empty()
            && self.ae_inst.is_empty()
    }
}

/// Authentication policy negotiated at connection setup. Opaque to the
/// runtime; interpreted by the security collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthPolicy {
    pub name: String,
    pub versions: Vec<String>,
    pub options: Vec<u8>,
}

impl AuthPolicy {
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.versions.is_empty() && self.options.is_empty()
    }
}

/// The object triple plus its serialized value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjInfo {
    pub class: String,
    pub name: String,
    pub inst: i64,
    pub value: Vec<u8>,
}

impl ObjInfo {
    pub fn new(class: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Filter predicate and scope for object operations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FiltInfo {
    pub filter: Vec<u8>,
    pub scope: i32,
}

/// Operation result: 0 means success, anything else is a failure with
/// an optional human-readable reason.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResInfo {
    pub code: i32,
    pub reason: String,
}

impl ResInfo {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn failure(code: i32, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// A CDAP message. All fields are optional on the wire; absent fields
/// decode to their zero value (empty string/buffer, 0, `Flags::None`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CdapMessage {
    pub abs_syntax: i32,
    pub op_code: CdapOpCode,
    pub invoke_id: u32,
    pub flags: CdapFlags,
    pub obj_class: String,
    pub obj_name: String,
    pub obj_inst: i64,
    pub obj_value: Vec<u8>,
    pub result: i32,
    pub result_reason: String,
    pub scope: i32,
    pub filter: Vec<u8>,
    pub dest: EndpointInfo,
    pub src: EndpointInfo,
    pub auth_policy: AuthPolicy,
    pub version: i64,
}

impl Default for CdapOpCode {
    fn default() -> Self {
        CdapOpCode::Connect
    }
}

impl CdapMessage {
    pub fn new(op_code: CdapOpCode) -> Self {
        Self {
            op_code,
            ..Default::default()
        }
    }

    /// Builds an `M_CONNECT` request.
    pub fn connect_request(
        src: EndpointInfo,
        dest: EndpointInfo,
        auth_policy: AuthPolicy,
        version: i64,
        invoke_id: u32,
    ) -> Self {
        Self {
            abs_syntax: ABSTRACT_SYNTAX,
            op_code: CdapOpCode::Connect,
            invoke_id,
            src,
            dest,
            auth_policy,
            version,
            ..Default::default()
        }
    }

    /// Builds an `M_CONNECT_R` response. `src`/`dest` are from the
    /// responder's perspective.
    pub fn connect_response(
        src: EndpointInfo,
        dest: EndpointInfo,
        auth_policy: AuthPolicy,
        version: i64,
        res: &ResInfo,
        invoke_id: u32,
    ) -> Self {
        Self {
            abs_syntax: ABSTRACT_SYNTAX,
            op_code: CdapOpCode::ConnectR,
            invoke_id,
            src,
            dest,
            auth_policy,
            version,
            result: res.code,
            result_reason: res.reason.clone(),
            ..Default::default()
        }
    }

    /// Builds an `M_RELEASE` request. Invoke id 0 means fire-and-forget.
    pub fn release_request(invoke_id: u32) -> Self {
        Self {
            op_code: CdapOpCode::Release,
            invoke_id,
            ..Default::default()
        }
    }

    pub fn release_response(res: &ResInfo, invoke_id: u32) -> Self {
        Self {
            op_code: CdapOpCode::ReleaseR,
            invoke_id,
            result: res.code,
            result_reason: res.reason.clone(),
            ..Default::default()
        }
    }

    /// Builds one of the six object-manipulation requests.
    pub fn object_request(
        op_code: CdapOpCode,
        obj: &ObjInfo,
        filt: &FiltInfo,
        flags: CdapFlags,
        invoke_id: u32,
    ) -> Self {
        debug_assert!(op_code.is_object_request());
        Self {
            op_code,
            invoke_id,
            flags,
            obj_class: obj.class.clone(),
            obj_name: obj.name.clone(),
            obj_inst: obj.inst,
            obj_value: obj.value.clone(),
            filter: filt.filter.clone(),
            scope: filt.scope,
            ..Default::default()
        }
    }

    /// Builds the response to an object-manipulation request. `obj` is
    /// omitted for `M_WRITE_R`, `M_STOP_R` and friends that carry no
    /// object back.
    pub fn object_response(
        op_code: CdapOpCode,
        obj: Option<&ObjInfo>,
        res: &ResInfo,
        flags: CdapFlags,
        invoke_id: u32,
    ) -> Self {
        debug_assert!(op_code.is_response());
        let mut msg = Self {
            op_code,
            invoke_id,
            flags,
            result: res.code,
            result_reason: res.reason.clone(),
            ..Default::default()
        };
        if let Some(obj) = obj {
            msg.obj_class = obj.class.clone();
            msg.obj_name = obj.name.clone();
            msg.obj_inst = obj.inst;
            msg.obj_value = obj.value.clone();
        }
        msg
    }

    pub fn cancel_read_request(flags: CdapFlags, invoke_id: u32) -> Self {
        Self {
            op_code: CdapOpCode::CancelRead,
            invoke_id,
            flags,
            ..Default::default()
        }
    }

    pub fn cancel_read_response(res: &ResInfo, invoke_id: u32) -> Self {
        Self {
            op_code: CdapOpCode::CancelReadR,
            invoke_id,
            result: res.code,
            result_reason: res.reason.clone(),
            ..Default::default()
        }
    }

    /// The object information carried by this message.
    pub fn obj_info(&self) -> ObjInfo {
        ObjInfo {
            class: self.obj_class.clone(),
            name: self.obj_name.clone(),
            inst: self.obj_inst,
            value: self.obj_value.clone(),
        }
    }

    pub fn filt_info(&self) -> FiltInfo {
        FiltInfo {
            filter: self.filter.clone(),
            scope: self.scope,
        }
    }

    pub fn res_info(&self) -> ResInfo {
        ResInfo {
            code: self.result,
            reason: self.result_reason.clone(),
        }
    }

    /// Checks the opcode/field presence matrix. Called by the session
    /// for every outgoing and incoming message.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let op = self.op_code;
        let connect_op = op.is_connect_op();
        let object_op = op.is_object_op();
        let object_request = op.is_object_request();
        let response = op.is_response();

        // abs_syntax and version travel on connect messages only
        if self.abs_syntax == 0 && connect_op {
            return Err(ProtocolError::FieldMissing {
                field: "abs_syntax",
                op_code: op,
            });
        }
        if self.abs_syntax != 0 && !connect_op {
            return Err(ProtocolError::FieldForbidden {
                field: "abs_syntax",
                op_code: op,
            });
        }
        if self.version == 0 && connect_op {
            return Err(ProtocolError::FieldMissing {
                field: "version",
                op_code: op,
            });
        }
        if self.version != 0 && !connect_op {
            return Err(ProtocolError::FieldForbidden {
                field: "version",
                op_code: op,
            });
        }

        // endpoint naming
        if op == CdapOpCode::Connect {
            if self.dest.ap_name.is_empty() {
                return Err(ProtocolError::FieldMissing {
                    field: "dest_ap_name",
                    op_code: op,
                });
            }
            if self.src.ap_name.is_empty() {
                return Err(ProtocolError::FieldMissing {
                    field: "src_ap_name",
                    op_code: op,
                });
            }
        }
        if !connect_op {
            if !self.dest.is_empty() {
                return Err(ProtocolError::FieldForbidden {
                    field: "dest",
                    op_code: op,
                });
            }
            if !self.src.is_empty() {
                return Err(ProtocolError::FieldForbidden {
                    field: "src",
                    op_code: op,
                });
            }
        }

        // invoke id is mandatory for everything that pairs with a
        // response, except M_RELEASE which may be fire-and-forget
        let invoke_id_required = connect_op
            || response
            || matches!(op, CdapOpCode::CancelRead);
        if self.invoke_id == 0 && invoke_id_required {
            return Err(ProtocolError::FieldMissing {
                field: "invoke_id",
                op_code: op,
            });
        }

        // object triple
        if !self.obj_class.is_empty() && !object_op {
            return Err(ProtocolError::FieldForbidden {
                field: "obj_class",
                op_code: op,
            });
        }
        if !self.obj_name.is_empty() {
            if self.obj_class.is_empty() {
                return Err(ProtocolError::FieldMissing {
                    field: "obj_class",
                    op_code: op,
                });
            }
            if !object_op {
                return Err(ProtocolError::FieldForbidden {
                    field: "obj_name",
                    op_code: op,
                });
            }
        }
        if self.obj_inst != 0 && !object_op {
            return Err(ProtocolError::FieldForbidden {
                field: "obj_inst",
                op_code: op,
            });
        }

        // object value
        if self.obj_value.is_empty() && op == CdapOpCode::Write {
            return Err(ProtocolError::FieldMissing {
                field: "obj_value",
                op_code: op,
            });
        }
        if !self.obj_value.is_empty() && !object_op {
            return Err(ProtocolError::FieldForbidden {
                field: "obj_value",
                op_code: op,
            });
        }

        // results only flow backwards
        let result_ok = response || matches!(op, CdapOpCode::CancelRead);
        if self.result != 0 && !result_ok {
            return Err(ProtocolError::FieldForbidden {
                field: "result",
                op_code: op,
            });
        }
        if !self.result_reason.is_empty() && !result_ok {
            return Err(ProtocolError::FieldForbidden {
                field: "result_reason",
                op_code: op,
            });
        }

        // filtering applies to object requests only
        if self.scope != 0 && !object_request {
            return Err(ProtocolError::FieldForbidden {
                field: "scope",
                op_code: op,
            });
        }
        if !self.filter.is_empty() && !object_request {
            return Err(ProtocolError::FieldForbidden {
                field: "filter",
                op_code: op,
            });
        }

        Ok(())
    }
}
