// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! CDAP I/O handling
//!
//! The I/O handler sits between the session manager and an opaque byte
//! transport. Outbound: encode (which also registers pending state),
//! apply SDU protection, write, all serialized under a send lock so the
//! peer can never observe a message whose pending entry does not exist
//! yet. Inbound: unprotect, decode through the session, then dispatch to
//! the registered callback. While a session is still in `AWAITCON`,
//! every non-`M_CONNECT` message is an authentication exchange and is
//! handed to the auth hook unclassified.

use crate::error::CdapError;
use crate::message::{CdapFlags, CdapMessage, CdapOpCode, FiltInfo, ObjInfo, ResInfo};
use crate::pending::PendingOp;
use crate::session::ConnectionHandle;
use crate::session_manager::{SessionManager, SessionObserver};
use std::io;
use std::sync::{Arc, Mutex, OnceLock};

/// The byte transport collaborator. One bidirectional stream per port
/// id; reads are driven externally and fed to
/// [`IoHandler::process_incoming`].
pub trait Transport: Send + Sync {
    fn write(&self, port_id: u32, bytes: &[u8]) -> io::Result<usize>;
    fn read(&self, port_id: u32) -> io::Result<Vec<u8>>;
}

/// Optional per-port SDU protection (integrity, encryption). The
/// default is the identity.
pub trait SduProtection: Send + Sync {
    fn protect(&self, port_id: u32, sdu: Vec<u8>) -> Result<Vec<u8>, CdapError>;
    fn unprotect(&self, port_id: u32, sdu: Vec<u8>) -> Result<Vec<u8>, CdapError>;
}

/// Identity SDU protection.
#[derive(Debug, Default)]
pub struct NoSduProtection;

impl SduProtection for NoSduProtection {
    fn protect(&self, _port_id: u32, sdu: Vec<u8>) -> Result<Vec<u8>, CdapError> {
        Ok(sdu)
    }

    fn unprotect(&self, _port_id: u32, sdu: Vec<u8>) -> Result<Vec<u8>, CdapError> {
        Ok(sdu)
    }
}

/// Where decoded messages end up. One method per opcode family, plus the
/// authentication hook and the session-abort notification. All defaults
/// are no-ops so implementors only write what they route.
#[allow(unused_variables)]
pub trait CdapCallback: Send + Sync {
    /// Non-`M_CONNECT` message delivered while the session was still in
    /// `AWAITCON`.
    fn process_authentication_message(&self, con: &ConnectionHandle, msg: &CdapMessage) {}

    fn open_connection(&self, con: &ConnectionHandle, msg: &CdapMessage) {}
    fn close_connection(&self, con: &ConnectionHandle, flags: CdapFlags, invoke_id: u32) {}

    fn create_request(&self, con: &ConnectionHandle, obj: &ObjInfo, filt: &FiltInfo, invoke_id: u32) {}
    fn delete_request(&self, con: &ConnectionHandle, obj: &ObjInfo, filt: &FiltInfo, invoke_id: u32) {}
    fn read_request(
        &self,
        con: &ConnectionHandle,
        obj: &ObjInfo,
        filt: &FiltInfo,
        flags: CdapFlags,
        invoke_id: u32,
    ) {
    }
    fn cancel_read_request(&self, con: &ConnectionHandle, obj: &ObjInfo, invoke_id: u32) {}
    fn write_request(&self, con: &ConnectionHandle, obj: &ObjInfo, filt: &FiltInfo, invoke_id: u32) {}
    fn start_request(&self, con: &ConnectionHandle, obj: &ObjInfo, filt: &FiltInfo, invoke_id: u32) {}
    fn stop_request(&self, con: &ConnectionHandle, obj: &ObjInfo, filt: &FiltInfo, invoke_id: u32) {}

    fn remote_open_connection_result(&self, con: &ConnectionHandle, msg: &CdapMessage) {}
    fn remote_close_connection_result(&self, con: &ConnectionHandle, res: &ResInfo) {}
    fn remote_create_result(&self, con: &ConnectionHandle, obj: &ObjInfo, res: &ResInfo, invoke_id: u32) {}
    fn remote_delete_result(&self, con: &ConnectionHandle, obj: &ObjInfo, res: &ResInfo, invoke_id: u32) {}
    fn remote_read_result(
        &self,
        con: &ConnectionHandle,
        obj: &ObjInfo,
        res: &ResInfo,
        flags: CdapFlags,
        invoke_id: u32,
    ) {
    }
    fn remote_cancel_read_result(&self, con: &ConnectionHandle, res: &ResInfo, invoke_id: u32) {}
    fn remote_write_result(&self, con: &ConnectionHandle, obj: &ObjInfo, res: &ResInfo, invoke_id: u32) {}
    fn remote_start_result(&self, con: &ConnectionHandle, obj: &ObjInfo, res: &ResInfo, invoke_id: u32) {}
    fn remote_stop_result(&self, con: &ConnectionHandle, obj: &ObjInfo, res: &ResInfo, invoke_id: u32) {}

    /// A timer or transport failure tore the session down; `pending`
    /// lists every operation that will never complete.
    fn session_aborted(&self, port_id: u32, pending: &[(u32, PendingOp)]) {}
}

/// Forwards manager abort notifications into the dispatch callback.
struct AbortBridge {
    callback: Arc<dyn CdapCallback>,
}

impl SessionObserver for AbortBridge {
    fn session_aborted(&self, port_id: u32, pending: Vec<(u32, PendingOp)>) {
        self.callback.session_aborted(port_id, &pending);
    }
}

/// Bridges the session manager and the transport.
pub struct IoHandler {
    manager: Arc<SessionManager>,
    transport: Arc<dyn Transport>,
    sdup: Arc<dyn SduProtection>,
    callback: OnceLock<Arc<dyn CdapCallback>>,
    send_lock: Mutex<()>,
}

/// `EAGAIN` has no dedicated `io::ErrorKind`; `EMSGSIZE` maps to none
/// at all, so it is matched on the raw errno.
fn is_retryable(err: &io::Error) -> bool {
    const EMSGSIZE: i32 = 90;
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    ) || err.raw_os_error() == Some(EMSGSIZE)
}

impl IoHandler {
    pub fn new(manager: Arc<SessionManager>, transport: Arc<dyn Transport>) -> Arc<Self> {
        Self::with_sdu_protection(manager, transport, Arc::new(NoSduProtection))
    }

    pub fn with_sdu_protection(
        manager: Arc<SessionManager>,
        transport: Arc<dyn Transport>,
        sdup: Arc<dyn SduProtection>,
    ) -> Arc<Self> {
        Arc::new(Self {
            manager,
            transport,
            sdup,
            callback: OnceLock::new(),
            send_lock: Mutex::new(()),
        })
    }

    /// Registers the dispatch callback and wires session aborts to it.
    /// Effective once.
    pub fn set_callback(&self, callback: Arc<dyn CdapCallback>) {
        self.manager.set_observer(Arc::new(AbortBridge {
            callback: callback.clone(),
        }));
        let _ = self.callback.set(callback);
    }

    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Encodes `msg`, registers its pending state and puts it on the
    /// wire, atomically with respect to other senders on the session.
    pub fn send(&self, port_id: u32, msg: &CdapMessage) -> Result<(), CdapError> {
        let _guard = self.send_lock.lock().unwrap();

        let bytes = self.manager.encode_next(port_id, msg)?;
        let bytes = self.sdup.protect(port_id, bytes)?;

        match self.transport.write(port_id, &bytes) {
            Ok(_) => Ok(()),
            Err(e) if is_retryable(&e) => {
                log::warn!("transient write failure on port {}: {}", port_id, e);
                Err(CdapError::Transport { port_id, source: e })
            }
            Err(e) => {
                log::error!("write failure on port {}, removing session: {}", port_id, e);
                self.manager.abort_session(port_id);
                Err(CdapError::Transport { port_id, source: e })
            }
        }
    }

    /// Entry point for bytes read off the transport by the embedder.
    pub fn process_incoming(&self, port_id: u32, bytes: Vec<u8>) -> Result<(), CdapError> {
        let bytes = self.sdup.unprotect(port_id, bytes)?;
        let msg = self.manager.on_bytes(port_id, &bytes)?;

        let session = self
            .manager
            .get_session(port_id)
            .ok_or(crate::error::ProtocolError::NoSession(port_id))?;
        let con = session.connection_handle();
        // a connect handshake still in flight means any other opcode is
        // authentication traffic
        let is_auth = session.in_await_con() && msg.op_code != CdapOpCode::Connect;

        log::debug!("received {} on port {}", msg.op_code, port_id);
        self.invoke_callback(&con, &msg, is_auth);
        Ok(())
    }

    fn invoke_callback(&self, con: &ConnectionHandle, msg: &CdapMessage, is_auth: bool) {
        let Some(callback) = self.callback.get() else {
            log::warn!("no CDAP callback registered, dropping {}", msg.op_code);
            return;
        };

        if is_auth {
            callback.process_authentication_message(con, msg);
            return;
        }

        let obj = msg.obj_info();
        let filt = msg.filt_info();
        let res = msg.res_info();
        let invoke_id = msg.invoke_id;

        match msg.op_code {
            CdapOpCode::Connect => callback.open_connection(con, msg),
            CdapOpCode::Release => callback.close_connection(con, msg.flags, invoke_id),
            CdapOpCode::Create => callback.create_request(con, &obj, &filt, invoke_id),
            CdapOpCode::Delete => callback.delete_request(con, &obj, &filt, invoke_id),
            CdapOpCode::Read => callback.read_request(con, &obj, &filt, msg.flags, invoke_id),
            CdapOpCode::CancelRead => callback.cancel_read_request(con, &obj, invoke_id),
            CdapOpCode::Write => callback.write_request(con, &obj, &filt, invoke_id),
            CdapOpCode::Start => callback.start_request(con, &obj, &filt, invoke_id),
            CdapOpCode::Stop => callback.stop_request(con, &obj, &filt, invoke_id),

            CdapOpCode::ConnectR => callback.remote_open_connection_result(con, msg),
            CdapOpCode::ReleaseR => callback.remote_close_connection_result(con, &res),
            CdapOpCode::CreateR => callback.remote_create_result(con, &obj, &res, invoke_id),
            CdapOpCode::DeleteR => callback.remote_delete_result(con, &obj, &res, invoke_id),
            CdapOpCode::ReadR => {
                callback.remote_read_result(con, &obj, &res, msg.flags, invoke_id)
            }
            CdapOpCode::CancelReadR => callback.remote_cancel_read_result(con, &res, invoke_id),
            CdapOpCode::WriteR => callback.remote_write_result(con, &obj, &res, invoke_id),
            CdapOpCode::StartR => callback.remote_start_result(con, &obj, &res, invoke_id),
            CdapOpCode::StopR => callback.remote_stop_result(con, &obj, &res, invoke_id),
        }
    }
}

impl std::fmt::Debug for IoHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoHandler").finish_non_exhaustive()
    }
}
