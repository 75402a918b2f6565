// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! CDAP wire codec
//!
//! The single mandatory concrete syntax is the Google Protocol Buffers
//! wire format. The message mirror below is written by hand rather than
//! generated: the CDAP message is small and its tag layout is frozen.
//! Absent tags decode to the model's zero values; zero values encode to
//! absent tags, so `decode(encode(m)) == m` for any normalized message.

use crate::error::WireError;
use crate::message::{AuthPolicy, CdapFlags, CdapMessage, CdapOpCode, EndpointInfo};
use prost::Message;

/// Concrete syntax selector. Exactly one syntax is mandatory; the enum
/// exists so a second syntax can be negotiated without touching callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConcreteSyntax {
    #[default]
    Gpb,
}

#[derive(Clone, PartialEq, Message)]
struct WireEndpoint {
    #[prost(string, optional, tag = "1")]
    ae_inst: Option<String>,
    #[prost(string, optional, tag = "2")]
    ae_name: Option<String>,
    #[prost(string, optional, tag = "3")]
    ap_inst: Option<String>,
    #[prost(string, optional, tag = "4")]
    ap_name: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
struct WireAuthPolicy {
    #[prost(string, optional, tag = "1")]
    name: Option<String>,
    #[prost(string, repeated, tag = "2")]
    versions: Vec<String>,
    #[prost(bytes = "vec", optional, tag = "3")]
    options: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
struct WireMessage {
    #[prost(int32, optional, tag = "1")]
    abs_syntax: Option<i32>,
    #[prost(int32, optional, tag = "2")]
    op_code: Option<i32>,
    #[prost(int32, optional, tag = "3")]
    invoke_id: Option<i32>,
    #[prost(int32, optional, tag = "4")]
    flags: Option<i32>,
    #[prost(string, optional, tag = "5")]
    obj_class: Option<String>,
    #[prost(string, optional, tag = "6")]
    obj_name: Option<String>,
    #[prost(int64, optional, tag = "7")]
    obj_inst: Option<i64>,
    #[prost(bytes = "vec", optional, tag = "8")]
    obj_value: Option<Vec<u8>>,
    #[prost(int32, optional, tag = "9")]
    result: Option<i32>,
    #[prost(string, optional, tag = "10")]
    result_reason: Option<String>,
    #[prost(int32, optional, tag = "11")]
    scope: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "12")]
    filter: Option<Vec<u8>>,
    #[prost(message, optional, tag = "13")]
    dest: Option<WireEndpoint>,
    #[prost(message, optional, tag = "14")]
    src: Option<WireEndpoint>,
    #[prost(message, optional, tag = "15")]
    auth_policy: Option<WireAuthPolicy>,
    #[prost(int64, optional, tag = "16")]
    version: Option<i64>,
}

const OPCODES: [CdapOpCode; 18] = [
    CdapOpCode::Connect,
    CdapOpCode::ConnectR,
    CdapOpCode::Release,
    CdapOpCode::ReleaseR,
    CdapOpCode::Create,
    CdapOpCode::CreateR,
    CdapOpCode::Delete,
    CdapOpCode::DeleteR,
    CdapOpCode::Read,
    CdapOpCode::ReadR,
    CdapOpCode::CancelRead,
    CdapOpCode::CancelReadR,
    CdapOpCode::Write,
    CdapOpCode::WriteR,
    CdapOpCode::Start,
    CdapOpCode::StartR,
    CdapOpCode::Stop,
    CdapOpCode::StopR,
];

fn opcode_to_wire(op: CdapOpCode) -> i32 {
    OPCODES.iter().position(|&o| o == op).unwrap_or(0) as i32
}

fn opcode_from_wire(raw: i32) -> Result<CdapOpCode, WireError> {
    usize::try_from(raw)
        .ok()
        .and_then(|i| OPCODES.get(i).copied())
        .ok_or(WireError::UnknownOpCode(raw))
}

fn flags_to_wire(flags: CdapFlags) -> Option<i32> {
    match flags {
        CdapFlags::None => None,
        CdapFlags::Sync => Some(1),
        CdapFlags::RdIncomplete => Some(2),
    }
}

fn flags_from_wire(raw: i32) -> Result<CdapFlags, WireError> {
    match raw {
        0 => Ok(CdapFlags::None),
        1 => Ok(CdapFlags::Sync),
        2 => Ok(CdapFlags::RdIncomplete),
        other => Err(WireError::Malformed(format!("unknown flags value {}", other))),
    }
}

fn opt_string(s: &str) -> Option<String> {
    if s.is_empty() { None } else { Some(s.to_string()) }
}

fn opt_bytes(b: &[u8]) -> Option<Vec<u8>> {
    if b.is_empty() { None } else { Some(b.to_vec()) }
}

fn opt_i32(v: i32) -> Option<i32> {
    if v == 0 { None } else { Some(v) }
}

fn opt_i64(v: i64) -> Option<i64> {
    if v == 0 { None } else { Some(v) }
}

fn endpoint_to_wire(ep: &EndpointInfo) -> Option<WireEndpoint> {
    let wire = WireEndpoint {
        ae_inst: opt_string(&ep.ae_inst),
        ae_name: opt_string(&ep.ae_name),
        ap_inst: opt_string(&ep.ap_inst),
        ap_name: opt_string(&ep.ap_name),
    };
    if wire == WireEndpoint::default() {
        None
    } else {
        Some(wire)
    }
}

fn endpoint_from_wire(ep: Option<WireEndpoint>) -> EndpointInfo {
    let ep = ep.unwrap_or_default();
    EndpointInfo {
        ae_inst: ep.ae_inst.unwrap_or_default(),
        ae_name: ep.ae_name.unwrap_or_default(),
        ap_inst: ep.ap_inst.unwrap_or_default(),
        ap_name: ep.ap_name.unwrap_or_default(),
    }
}

fn auth_to_wire(auth: &AuthPolicy) -> Option<WireAuthPolicy> {
    if auth.is_empty() {
        return None;
    }
    Some(WireAuthPolicy {
        name: opt_string(&auth.name),
        versions: auth.versions.clone(),
        options: opt_bytes(&auth.options),
    })
}

fn auth_from_wire(auth: Option<WireAuthPolicy>) -> AuthPolicy {
    let auth = auth.unwrap_or_default();
    AuthPolicy {
        name: auth.name.unwrap_or_default(),
        versions: auth.versions,
        options: auth.options.unwrap_or_default(),
    }
}

/// Encodes and decodes one CDAP message to/from a length-bounded byte
/// buffer.
#[derive(Debug, Clone)]
pub struct WireCodec {
    syntax: ConcreteSyntax,
    max_message_size: usize,
}

impl WireCodec {
    pub fn new(syntax: ConcreteSyntax, max_message_size: usize) -> Self {
        Self {
            syntax,
            max_message_size,
        }
    }

    pub fn syntax(&self) -> ConcreteSyntax {
        self.syntax
    }

    pub fn encode(&self, msg: &CdapMessage) -> Result<Vec<u8>, WireError> {
        let wire = WireMessage {
            abs_syntax: opt_i32(msg.abs_syntax),
            op_code: Some(opcode_to_wire(msg.op_code)),
            invoke_id: opt_i32(msg.invoke_id as i32),
            flags: flags_to_wire(msg.flags),
            obj_class: opt_string(&msg.obj_class),
            obj_name: opt_string(&msg.obj_name),
            obj_inst: opt_i64(msg.obj_inst),
            obj_value: opt_bytes(&msg.obj_value),
            result: opt_i32(msg.result),
            result_reason: opt_string(&msg.result_reason),
            scope: opt_i32(msg.scope),
            filter: opt_bytes(&msg.filter),
            dest: endpoint_to_wire(&msg.dest),
            src: endpoint_to_wire(&msg.src),
            auth_policy: auth_to_wire(&msg.auth_policy),
            version: opt_i64(msg.version),
        };

        let encoded = wire.encode_to_vec();
        if encoded.len() > self.max_message_size {
            return Err(WireError::Oversize {
                size: encoded.len(),
                max: self.max_message_size,
            });
        }
        Ok(encoded)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<CdapMessage, WireError> {
        if bytes.len() > self.max_message_size {
            return Err(WireError::Oversize {
                size: bytes.len(),
                max: self.max_message_size,
            });
        }
        let wire = WireMessage::decode(bytes)?;

        let raw_op = wire
            .op_code
            .ok_or_else(|| WireError::Malformed("missing operation code".to_string()))?;
        let op_code = opcode_from_wire(raw_op)?;

        let invoke_id = wire.invoke_id.unwrap_or(0);
        if invoke_id < 0 {
            return Err(WireError::Malformed(format!(
                "negative invoke id {}",
                invoke_id
            )));
        }

        Ok(CdapMessage {
            abs_syntax: wire.abs_syntax.unwrap_or(0),
            op_code,
            invoke_id: invoke_id as u32,
            flags: flags_from_wire(wire.flags.unwrap_or(0))?,
            obj_class: wire.obj_class.unwrap_or_default(),
            obj_name: wire.obj_name.unwrap_or_default(),
            obj_inst: wire.obj_inst.unwrap_or(0),
            obj_value: wire.obj_value.unwrap_or_default(),
            result: wire.result.unwrap_or(0),
            result_reason: wire.result_reason.unwrap_or_default(),
            scope: wire.scope.unwrap_or(0),
            filter: wire.filter.unwrap_or_default(),
            dest: endpoint_from_wire(wire.dest),
            src: endpoint_from_wire(wire.src),
            auth_policy: auth_from_wire(wire.auth_policy),
            version: wire.version.unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{FiltInfo, ObjInfo, ResInfo};

    fn codec() -> WireCodec {
        WireCodec::new(ConcreteSyntax::Gpb, 65536)
    }

    #[test]
    fn test_connect_round_trip() {
        let msg = CdapMessage::connect_request(
            EndpointInfo {
                ap_name: "client.example".to_string(),
                ap_inst: "1".to_string(),
                ae_name: "mgmt".to_string(),
                ae_inst: String::new(),
            },
            EndpointInfo::new("server.example", "mgmt"),
            AuthPolicy {
                name: "PSOC_authentication-none".to_string(),
                versions: vec!["1".to_string()],
                options: vec![],
            },
            1,
            1,
        );

        let bytes = codec().encode(&msg).unwrap();
        let decoded = codec().decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_object_request_round_trip() {
        let mut obj = ObjInfo::new("SysInfo", "/sys/info");
        obj.value = vec![0xde, 0xad, 0xbe, 0xef];
        obj.inst = 7;
        let msg = CdapMessage::object_request(
            CdapOpCode::Write,
            &obj,
            &FiltInfo {
                filter: vec![1, 2, 3],
                scope: 2,
            },
            CdapFlags::Sync,
            42,
        );

        let bytes = codec().encode(&msg).unwrap();
        let decoded = codec().decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_response_round_trip() {
        let msg = CdapMessage::object_response(
            CdapOpCode::ReadR,
            Some(&ObjInfo {
                class: "SysInfo".to_string(),
                name: "/sys/info".to_string(),
                inst: 3,
                value: b"payload".to_vec(),
            }),
            &ResInfo::failure(-3, "object does not exist: /sys/info"),
            CdapFlags::RdIncomplete,
            9,
        );

        let bytes = codec().encode(&msg).unwrap();
        let decoded = codec().decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_absent_fields_decode_to_zero_values() {
        let msg = CdapMessage::release_request(0);
        let bytes = codec().encode(&msg).unwrap();
        let decoded = codec().decode(&bytes).unwrap();
        assert_eq!(decoded.invoke_id, 0);
        assert!(decoded.obj_class.is_empty());
        assert!(decoded.obj_value.is_empty());
        assert_eq!(decoded.flags, CdapFlags::None);
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_unknown_opcode_is_rejected() {
        let wire = WireMessage {
            op_code: Some(99),
            ..Default::default()
        };
        let bytes = wire.encode_to_vec();
        assert!(matches!(
            codec().decode(&bytes),
            Err(WireError::UnknownOpCode(99))
        ));
    }

    #[test]
    fn test_missing_opcode_is_rejected() {
        let wire = WireMessage::default();
        let bytes = wire.encode_to_vec();
        assert!(matches!(codec().decode(&bytes), Err(WireError::Malformed(_))));
    }

    #[test]
    fn test_garbage_bytes_are_rejected() {
        let bytes = [0xff, 0xff, 0xff, 0xff, 0x01];
        assert!(matches!(codec().decode(&bytes), Err(WireError::Malformed(_))));
    }

    #[test]
    fn test_oversize_buffers_are_rejected() {
        let small = WireCodec::new(ConcreteSyntax::Gpb, 16);
        let mut obj = ObjInfo::new("Blob", "/blob");
        obj.value = vec![0u8; 64];
        let msg = CdapMessage::object_request(
            CdapOpCode::Write,
            &obj,
            &FiltInfo::default(),
            CdapFlags::None,
            1,
        );
        assert!(matches!(small.encode(&msg), Err(WireError::Oversize { .. })));

        let bytes = codec().encode(&msg).unwrap();
        assert!(matches!(small.decode(&bytes), Err(WireError::Oversize { .. })));
    }
}
