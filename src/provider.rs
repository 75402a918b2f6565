// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! CDAP provider
//!
//! The public request/response façade. Every `remote_*` operation builds
//! the message, allocates a fresh sent-direction invoke id where one is
//! needed, pushes it through the I/O handler and returns the invoke id
//! so the caller can pair up the eventual result callback. The
//! `send_*_result` family answers a previously received request with the
//! invoke id that request carried.

use crate::error::CdapError;
use crate::invoke_id::Direction;
use crate::io_handler::IoHandler;
use crate::message::{
    AuthPolicy, CdapFlags, CdapMessage, CdapOpCode, EndpointInfo, FiltInfo, ObjInfo, ResInfo,
};
use crate::session::ConnectionHandle;
use crate::session_manager::SessionManager;
use std::sync::Arc;

pub struct CdapProvider {
    io: Arc<IoHandler>,
}

impl CdapProvider {
    pub fn new(io: Arc<IoHandler>) -> Arc<Self> {
        Arc::new(Self { io })
    }

    pub fn io_handler(&self) -> &Arc<IoHandler> {
        &self.io
    }

    fn manager(&self) -> &Arc<SessionManager> {
        self.io.session_manager()
    }

    /// Opens (or re-opens) a CDAP connection on `port_id`. A repeated
    /// open on the same port discards whatever session the port had and
    /// renegotiates the handle from scratch.
    pub fn remote_open_connection(
        &self,
        version: i64,
        src: EndpointInfo,
        dest: EndpointInfo,
        auth_policy: AuthPolicy,
        port_id: u32,
    ) -> Result<ConnectionHandle, CdapError> {
        if self.manager().get_session(port_id).is_some() {
            log::debug!(
                "re-opening connection on port {}, discarding the previous session",
                port_id
            );
            self.manager().reset_session(port_id);
        }

        let invoke_id = self.new_invoke_id()?;
        let msg = CdapMessage::connect_request(src, dest, auth_policy, version, invoke_id);
        self.send_request(port_id, &msg)?;

        let session = self
            .manager()
            .get_session(port_id)
            .ok_or(crate::error::ProtocolError::NoSession(port_id))?;
        let mut handle = session.connection_handle();
        handle.port_id = port_id;
        Ok(handle)
    }

    /// Releases the connection. With `needs_response` the release waits
    /// for `M_RELEASE_R` under the release timer; without it the session
    /// closes immediately (invoke id 0). Returns the invoke id used.
    pub fn remote_close_connection(
        &self,
        port_id: u32,
        needs_response: bool,
    ) -> Result<u32, CdapError> {
        let invoke_id = if needs_response { self.new_invoke_id()? } else { 0 };
        let msg = CdapMessage::release_request(invoke_id);
        self.send_request(port_id, &msg)?;
        Ok(invoke_id)
    }

    pub fn remote_create(
        &self,
        port_id: u32,
        obj: &ObjInfo,
        flags: CdapFlags,
        filt: &FiltInfo,
    ) -> Result<u32, CdapError> {
        self.object_request(port_id, CdapOpCode::Create, obj, flags, filt)
    }

    pub fn remote_delete(
        &self,
        port_id: u32,
        obj: &ObjInfo,
        flags: CdapFlags,
        filt: &FiltInfo,
    ) -> Result<u32, CdapError> {
        self.object_request(port_id, CdapOpCode::Delete, obj, flags, filt)
    }

    pub fn remote_read(
        &self,
        port_id: u32,
        obj: &ObjInfo,
        flags: CdapFlags,
        filt: &FiltInfo,
    ) -> Result<u32, CdapError> {
        self.object_request(port_id, CdapOpCode::Read, obj, flags, filt)
    }

    /// Cancels an outstanding read. `invoke_id` is the id the `M_READ`
    /// was sent with.
    pub fn remote_cancel_read(
        &self,
        port_id: u32,
        flags: CdapFlags,
        invoke_id: u32,
    ) -> Result<(), CdapError> {
        let msg = CdapMessage::cancel_read_request(flags, invoke_id);
        self.io.send(port_id, &msg)
    }

    pub fn remote_write(
        &self,
        port_id: u32,
        obj: &ObjInfo,
        flags: CdapFlags,
        filt: &FiltInfo,
    ) -> Result<u32, CdapError> {
        self.object_request(port_id, CdapOpCode::Write, obj, flags, filt)
    }

    pub fn remote_start(
        &self,
        port_id: u32,
        obj: &ObjInfo,
        flags: CdapFlags,
        filt: &FiltInfo,
    ) -> Result<u32, CdapError> {
        self.object_request(port_id, CdapOpCode::Start, obj, flags, filt)
    }

    pub fn remote_stop(
        &self,
        port_id: u32,
        obj: &ObjInfo,
        flags: CdapFlags,
        filt: &FiltInfo,
    ) -> Result<u32, CdapError> {
        self.object_request(port_id, CdapOpCode::Stop, obj, flags, filt)
    }

    /// Answers an inbound `M_CONNECT`. `con` is the handle recorded by
    /// the session, so `src` is this process.
    pub fn send_open_connection_result(
        &self,
        con: &ConnectionHandle,
        res: &ResInfo,
        invoke_id: u32,
    ) -> Result<(), CdapError> {
        let msg = CdapMessage::connect_response(
            con.src.clone(),
            con.dest.clone(),
            con.auth_policy.clone(),
            con.version,
            res,
            invoke_id,
        );
        self.io.send(con.port_id, &msg)
    }

    pub fn send_close_connection_result(
        &self,
        port_id: u32,
        res: &ResInfo,
        invoke_id: u32,
    ) -> Result<(), CdapError> {
        let msg = CdapMessage::release_response(res, invoke_id);
        self.io.send(port_id, &msg)
    }

    pub fn send_create_result(
        &self,
        port_id: u32,
        obj: &ObjInfo,
        res: &ResInfo,
        invoke_id: u32,
    ) -> Result<(), CdapError> {
        let msg =
            CdapMessage::object_response(CdapOpCode::CreateR, Some(obj), res, CdapFlags::None, invoke_id);
        self.io.send(port_id, &msg)
    }

    pub fn send_delete_result(
        &self,
        port_id: u32,
        obj: &ObjInfo,
        res: &ResInfo,
        invoke_id: u32,
    ) -> Result<(), CdapError> {
        let msg =
            CdapMessage::object_response(CdapOpCode::DeleteR, Some(obj), res, CdapFlags::None, invoke_id);
        self.io.send(port_id, &msg)
    }

    pub fn send_read_result(
        &self,
        port_id: u32,
        obj: &ObjInfo,
        res: &ResInfo,
        flags: CdapFlags,
        invoke_id: u32,
    ) -> Result<(), CdapError> {
        let msg = CdapMessage::object_response(CdapOpCode::ReadR, Some(obj), res, flags, invoke_id);
        self.io.send(port_id, &msg)
    }

    pub fn send_cancel_read_result(
        &self,
        port_id: u32,
        res: &ResInfo,
        invoke_id: u32,
    ) -> Result<(), CdapError> {
        let msg = CdapMessage::cancel_read_response(res, invoke_id);
        self.io.send(port_id, &msg)
    }

    /// `M_WRITE_R` carries no object back, only the result.
    pub fn send_write_result(
        &self,
        port_id: u32,
        res: &ResInfo,
        invoke_id: u32,
    ) -> Result<(), CdapError> {
        let msg =
            CdapMessage::object_response(CdapOpCode::WriteR, None, res, CdapFlags::None, invoke_id);
        self.io.send(port_id, &msg)
    }

    pub fn send_start_result(
        &self,
        port_id: u32,
        obj: &ObjInfo,
        res: &ResInfo,
        invoke_id: u32,
    ) -> Result<(), CdapError> {
        let msg =
            CdapMessage::object_response(CdapOpCode::StartR, Some(obj), res, CdapFlags::None, invoke_id);
        self.io.send(port_id, &msg)
    }

    pub fn send_stop_result(
        &self,
        port_id: u32,
        res: &ResInfo,
        invoke_id: u32,
    ) -> Result<(), CdapError> {
        let msg =
            CdapMessage::object_response(CdapOpCode::StopR, None, res, CdapFlags::None, invoke_id);
        self.io.send(port_id, &msg)
    }

    fn object_request(
        &self,
        port_id: u32,
        op_code: CdapOpCode,
        obj: &ObjInfo,
        flags: CdapFlags,
        filt: &FiltInfo,
    ) -> Result<u32, CdapError> {
        let invoke_id = self.new_invoke_id()?;
        let msg = CdapMessage::object_request(op_code, obj, filt, flags, invoke_id);
        self.send_request(port_id, &msg)?;
        Ok(invoke_id)
    }

    fn new_invoke_id(&self) -> Result<u32, CdapError> {
        self.manager()
            .invoke_id_allocator()
            .new_invoke_id(Direction::Sent)
    }

    /// Sends a request, giving its invoke id back to the allocator when
    /// the message never made it into the session. Ids of messages that
    /// were registered but failed on the wire stay reserved; the abort
    /// path reclaims them.
    fn send_request(&self, port_id: u32, msg: &CdapMessage) -> Result<(), CdapError> {
        match self.io.send(port_id, msg) {
            Ok(()) => Ok(()),
            Err(err) => {
                if msg.invoke_id != 0 && !matches!(err, CdapError::Transport { .. }) {
                    self.manager()
                        .invoke_id_allocator()
                        .free_invoke_id(msg.invoke_id, Direction::Sent);
                }
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for CdapProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdapProvider").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CdapConfig;
    use crate::error::ProtocolError;
    use crate::io_handler::Transport;
    use std::collections::{HashMap, VecDeque};
    use std::io;
    use std::sync::Mutex;

    #[derive(Default)]
    struct QueueTransport {
        queues: Mutex<HashMap<u32, VecDeque<Vec<u8>>>>,
    }

    impl QueueTransport {
        fn pop(&self, port_id: u32) -> Option<Vec<u8>> {
            self.queues
                .lock()
                .unwrap()
                .get_mut(&port_id)
                .and_then(|q| q.pop_front())
        }
    }

    impl Transport for QueueTransport {
        fn write(&self, port_id: u32, bytes: &[u8]) -> io::Result<usize> {
            self.queues
                .lock()
                .unwrap()
                .entry(port_id)
                .or_default()
                .push_back(bytes.to_vec());
            Ok(bytes.len())
        }

        fn read(&self, port_id: u32) -> io::Result<Vec<u8>> {
            self.pop(port_id)
                .ok_or_else(|| io::Error::new(io::ErrorKind::WouldBlock, "empty"))
        }
    }

    fn setup() -> (Arc<CdapProvider>, Arc<QueueTransport>) {
        let manager = SessionManager::new(&CdapConfig::default());
        let transport = Arc::new(QueueTransport::default());
        let io = IoHandler::new(manager, transport.clone());
        (CdapProvider::new(io), transport)
    }

    fn open(provider: &CdapProvider, port_id: u32) -> ConnectionHandle {
        provider
            .remote_open_connection(
                1,
                EndpointInfo::new("client.example", "mgmt"),
                EndpointInfo::new("server.example", "mgmt"),
                AuthPolicy::default(),
                port_id,
            )
            .unwrap()
    }

    #[tokio::test]
    async fn test_open_connection_returns_populated_handle() {
        let (provider, transport) = setup();
        let handle = open(&provider, 8);
        assert_eq!(handle.port_id, 8);
        assert_eq!(handle.src.ap_name, "client.example");
        assert_eq!(handle.dest.ap_name, "server.example");
        assert!(transport.pop(8).is_some());
    }

    #[tokio::test]
    async fn test_remote_operations_allocate_distinct_invoke_ids() {
        let (provider, _transport) = setup();
        open(&provider, 8);

        let obj = ObjInfo::new("Flow", "/flows/1");
        let a = provider
            .remote_create(8, &obj, CdapFlags::None, &FiltInfo::default())
            .unwrap();
        let b = provider
            .remote_read(8, &ObjInfo::new("Flow", "/flows/1"), CdapFlags::None, &FiltInfo::default())
            .unwrap();
        assert_ne!(a, b);
        assert_ne!(a, 0);
        assert_ne!(b, 0);
    }

    #[tokio::test]
    async fn test_failed_request_returns_invoke_id_to_allocator() {
        let (provider, _transport) = setup();
        // no session: the read is refused and its id must be freed again
        let err = provider
            .remote_read(5, &ObjInfo::new("Flow", "/flows/1"), CdapFlags::None, &FiltInfo::default())
            .unwrap_err();
        assert!(matches!(
            err,
            CdapError::Protocol(ProtocolError::NoSession(5))
        ));
        assert_eq!(
            provider
                .manager()
                .invoke_id_allocator()
                .in_flight(Direction::Sent),
            0
        );
    }

    #[tokio::test]
    async fn test_fire_and_forget_release_uses_invoke_id_zero() {
        let (provider, _transport) = setup();
        open(&provider, 8);
        let invoke_id = provider.remote_close_connection(8, false).unwrap();
        assert_eq!(invoke_id, 0);
    }

    #[tokio::test]
    async fn test_reopen_on_same_port_overwrites_the_session() {
        let (provider, _transport) = setup();
        open(&provider, 8);

        // the first handshake never completes; a second open must win
        // the port instead of tripping over the stale session
        let handle = provider
            .remote_open_connection(
                2,
                EndpointInfo::new("client.example", "mgmt"),
                EndpointInfo::new("other.example", "mgmt"),
                AuthPolicy::default(),
                8,
            )
            .unwrap();
        assert_eq!(handle.dest.ap_name, "other.example");
        assert_eq!(handle.version, 2);

        // the discarded connect id was reclaimed, so only the new
        // handshake holds an id
        assert_eq!(
            provider
                .manager()
                .invoke_id_allocator()
                .in_flight(Direction::Sent),
            1
        );
    }
}
