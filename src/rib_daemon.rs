// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! RIB daemon
//!
//! Owns every schema and RIB instance of the process, associates RIBs to
//! application entities, and routes CDAP traffic: inbound requests go to
//! the RIB associated with the arrival port, responses to locally
//! initiated operations go to that RIB's response handler, and the
//! connect/release family goes to the application-connection handler.
//! The daemon is also the place where RIB errors become result codes on
//! the corresponding `_R` message.

use crate::config::CdapConfig;
use crate::error::{CdapError, RibError};
use crate::io_handler::{CdapCallback, IoHandler, SduProtection, Transport};
use crate::message::{
    AuthPolicy, CdapFlags, CdapMessage, EndpointInfo, FiltInfo, ObjInfo, ResInfo,
};
use crate::pending::PendingOp;
use crate::provider::CdapProvider;
use crate::rib::{Rib, RibHandle, RibObj, RibOpsResponseHandler};
use crate::schema::{CreateCallback, RibSchema};
use crate::session::ConnectionHandle;
use crate::session_manager::SessionManager;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Application-level handling of connection management. The values the
/// handler returns are what the daemon answers with on the wire.
#[allow(unused_variables)]
pub trait AppConnectionHandler: Send + Sync {
    /// A remote connect request arrived.
    fn connect(&self, invoke_id: u32, con: &ConnectionHandle, msg: &CdapMessage) -> ResInfo {
        ResInfo::success()
    }

    /// The peer answered our connect request.
    fn connect_result(&self, con: &ConnectionHandle, res: &ResInfo) {}

    /// A remote release request arrived.
    fn release(&self, invoke_id: u32, con: &ConnectionHandle) -> ResInfo {
        ResInfo::success()
    }

    /// The peer answered our release request.
    fn release_result(&self, con: &ConnectionHandle, res: &ResInfo) {}
}

/// Receives the raw messages exchanged while a session authenticates
/// (any non-`M_CONNECT` traffic in `AWAITCON`).
pub trait AuthMessageHandler: Send + Sync {
    fn process_authentication_message(&self, con: &ConnectionHandle, msg: &CdapMessage);
}

struct DaemonState {
    schemas: HashMap<u64, Arc<RibSchema>>,
    ribs: HashMap<RibHandle, Arc<Rib>>,
    /// (version, ae-name) → RIB; each RIB appears at most once here.
    associations: HashMap<(u64, String), RibHandle>,
    ports: HashMap<u32, RibHandle>,
    next_handle: RibHandle,
}

/// Multiplexes CDAP events across the RIB instances of this process.
pub struct RibDaemon {
    provider: Arc<CdapProvider>,
    app_con: Arc<dyn AppConnectionHandler>,
    auth: Option<Arc<dyn AuthMessageHandler>>,
    state: RwLock<DaemonState>,
}

impl RibDaemon {
    /// Builds the whole runtime: session manager, I/O handler, provider
    /// and daemon, wired together. Must run inside a tokio runtime.
    pub fn new(
        config: &CdapConfig,
        transport: Arc<dyn Transport>,
        app_con: Arc<dyn AppConnectionHandler>,
        auth: Option<Arc<dyn AuthMessageHandler>>,
    ) -> Arc<Self> {
        let manager = SessionManager::new(config);
        let io = IoHandler::new(manager, transport);
        Self::wire(io, app_con, auth)
    }

    /// Like [`RibDaemon::new`] but with explicit SDU protection.
    pub fn with_sdu_protection(
        config: &CdapConfig,
        transport: Arc<dyn Transport>,
        sdup: Arc<dyn SduProtection>,
        app_con: Arc<dyn AppConnectionHandler>,
        auth: Option<Arc<dyn AuthMessageHandler>>,
    ) -> Arc<Self> {
        let manager = SessionManager::new(config);
        let io = IoHandler::with_sdu_protection(manager, transport, sdup);
        Self::wire(io, app_con, auth)
    }

    fn wire(
        io: Arc<IoHandler>,
        app_con: Arc<dyn AppConnectionHandler>,
        auth: Option<Arc<dyn AuthMessageHandler>>,
    ) -> Arc<Self> {
        let provider = CdapProvider::new(io.clone());
        let daemon = Arc::new(Self {
            provider,
            app_con,
            auth,
            state: RwLock::new(DaemonState {
                schemas: HashMap::new(),
                ribs: HashMap::new(),
                associations: HashMap::new(),
                ports: HashMap::new(),
                next_handle: 1,
            }),
        });
        io.set_callback(daemon.clone());
        daemon
    }

    pub fn provider(&self) -> &Arc<CdapProvider> {
        &self.provider
    }

    pub fn io_handler(&self) -> &Arc<IoHandler> {
        self.provider.io_handler()
    }

    //
    // Schema lifecycle
    //

    pub fn create_schema(&self, version: u64) -> Result<(), RibError> {
        let mut state = self.state.write().unwrap();
        if state.schemas.contains_key(&version) {
            return Err(RibError::SchemaExists(version));
        }
        state.schemas.insert(version, Arc::new(RibSchema::new(version)));
        Ok(())
    }

    pub fn destroy_schema(&self, version: u64) -> Result<(), RibError> {
        let mut state = self.state.write().unwrap();
        if !state.schemas.contains_key(&version) {
            return Err(RibError::SchemaNotFound(version));
        }
        if state.ribs.values().any(|rib| rib.version() == version) {
            return Err(RibError::ObjectInvalid(format!(
                "schema {} is still in use",
                version
            )));
        }
        state.schemas.remove(&version);
        Ok(())
    }

    pub fn list_versions(&self) -> Vec<u64> {
        let mut versions: Vec<u64> = self.state.read().unwrap().schemas.keys().copied().collect();
        versions.sort_unstable();
        versions
    }

    /// Registers a create callback against an existing schema version.
    pub fn add_create_callback(
        &self,
        version: u64,
        class: &str,
        path: &str,
        callback: CreateCallback,
    ) -> Result<(), RibError> {
        let schema = {
            let state = self.state.read().unwrap();
            state
                .schemas
                .get(&version)
                .cloned()
                .ok_or(RibError::SchemaNotFound(version))?
        };
        schema.add_create_callback(class, path, callback)
    }

    //
    // RIB lifecycle
    //

    /// Creates a RIB against an existing schema version and returns its
    /// handle.
    pub fn create_rib(
        &self,
        version: u64,
        resp_handler: Arc<dyn RibOpsResponseHandler>,
    ) -> Result<RibHandle, RibError> {
        let mut state = self.state.write().unwrap();
        let schema = state
            .schemas
            .get(&version)
            .cloned()
            .ok_or(RibError::SchemaNotFound(version))?;
        let handle = state.next_handle;
        state.next_handle += 1;
        state
            .ribs
            .insert(handle, Arc::new(Rib::new(handle, schema, resp_handler)));
        log::debug!("created RIB {} for version {}", handle, version);
        Ok(handle)
    }

    pub fn destroy_rib(&self, handle: RibHandle) -> Result<(), RibError> {
        let mut state = self.state.write().unwrap();
        if state.ribs.remove(&handle).is_none() {
            return Err(RibError::ObjectDoesNotExist(format!("RIB {}", handle)));
        }
        state.associations.retain(|_, h| *h != handle);
        state.ports.retain(|_, h| *h != handle);
        Ok(())
    }

    pub fn get_rib(&self, handle: RibHandle) -> Option<Arc<Rib>> {
        self.state.read().unwrap().ribs.get(&handle).cloned()
    }

    /// Makes the RIB reachable under `(its version, ae_name)`. A RIB is
    /// associated with at most one AE at a time.
    pub fn associate_rib_to_ae(&self, handle: RibHandle, ae_name: &str) -> Result<(), RibError> {
        let mut state = self.state.write().unwrap();
        let rib = state
            .ribs
            .get(&handle)
            .cloned()
            .ok_or_else(|| RibError::ObjectDoesNotExist(format!("RIB {}", handle)))?;

        let key = (rib.version(), ae_name.to_string());
        if state.associations.contains_key(&key) {
            return Err(RibError::ObjectExists(format!(
                "version {} is already served on AE '{}'",
                key.0, key.1
            )));
        }
        if state.associations.values().any(|h| *h == handle) {
            return Err(RibError::ObjectExists(format!(
                "RIB {} is already associated with an AE",
                handle
            )));
        }
        state.associations.insert(key, handle);
        Ok(())
    }

    pub fn deassociate_rib_from_ae(&self, handle: RibHandle) -> Result<(), RibError> {
        let mut state = self.state.write().unwrap();
        let before = state.associations.len();
        state.associations.retain(|_, h| *h != handle);
        if state.associations.len() == before {
            return Err(RibError::ObjectDoesNotExist(format!(
                "RIB {} has no AE association",
                handle
            )));
        }
        Ok(())
    }

    fn rib_for(&self, version: u64, ae_name: &str) -> Option<Arc<Rib>> {
        let state = self.state.read().unwrap();
        let handle = state.associations.get(&(version, ae_name.to_string()))?;
        state.ribs.get(handle).cloned()
    }

    fn rib_by_port(&self, port_id: u32) -> Option<Arc<Rib>> {
        let state = self.state.read().unwrap();
        let handle = state.ports.get(&port_id)?;
        state.ribs.get(handle).cloned()
    }

    /// Re-opening a port overwrites its previous association.
    fn bind_port(&self, port_id: u32, handle: RibHandle) {
        self.state.write().unwrap().ports.insert(port_id, handle);
    }

    fn unbind_port(&self, port_id: u32) {
        self.state.write().unwrap().ports.remove(&port_id);
    }

    //
    // Object surface (forwarded to the addressed RIB)
    //

    pub fn add_object(
        &self,
        handle: RibHandle,
        fqn: &str,
        obj: Arc<dyn RibObj>,
    ) -> Result<i64, RibError> {
        self.addressed(handle)?.add_object(fqn, obj)
    }

    pub fn remove_object(&self, handle: RibHandle, inst_id: i64) -> Result<(), RibError> {
        self.addressed(handle)?.remove_object_by_instance_id(inst_id)
    }

    pub fn remove_object_by_fqn(&self, handle: RibHandle, fqn: &str) -> Result<(), RibError> {
        self.addressed(handle)?.remove_object_by_fqn(fqn)
    }

    pub fn get_parent_fqn(&self, handle: RibHandle, fqn: &str) -> Result<String, RibError> {
        self.addressed(handle)?.get_parent_fqn(fqn)
    }

    pub fn get_obj_class(&self, handle: RibHandle, fqn: &str) -> Result<String, RibError> {
        self.addressed(handle)?.get_object_class(fqn)
    }

    pub fn get_obj_inst_id(&self, handle: RibHandle, fqn: &str) -> Result<i64, RibError> {
        self.addressed(handle)?.get_instance_id(fqn)
    }

    pub fn fqn_is_present(&self, handle: RibHandle, fqn: &str) -> Result<bool, RibError> {
        Ok(self.addressed(handle)?.fqn_is_present(fqn))
    }

    fn addressed(&self, handle: RibHandle) -> Result<Arc<Rib>, RibError> {
        self.get_rib(handle)
            .ok_or_else(|| RibError::ObjectDoesNotExist(format!("RIB {}", handle)))
    }

    //
    // Client surface
    //

    /// Opens a CDAP connection on `port_id` against the RIB registered
    /// for `(version, src ae)` and binds the port to it.
    pub fn remote_open_connection(
        &self,
        version: u64,
        src: EndpointInfo,
        dest: EndpointInfo,
        auth_policy: AuthPolicy,
        port_id: u32,
    ) -> Result<ConnectionHandle, CdapError> {
        let rib = self.rib_for(version, &src.ae_name).ok_or_else(|| {
            RibError::ObjectDoesNotExist(format!(
                "no RIB for version {} on AE '{}'",
                version, src.ae_name
            ))
        })?;

        let handle = self.provider.remote_open_connection(
            version as i64,
            src,
            dest,
            auth_policy,
            port_id,
        )?;
        self.bind_port(port_id, rib.handle());
        Ok(handle)
    }

    pub fn remote_close_connection(
        &self,
        port_id: u32,
        needs_response: bool,
    ) -> Result<u32, CdapError> {
        let invoke_id = self.provider.remote_close_connection(port_id, needs_response)?;
        if !needs_response {
            // no M_RELEASE_R will arrive to unbind the port
            self.unbind_port(port_id);
        }
        Ok(invoke_id)
    }

    pub fn remote_create(
        &self,
        port_id: u32,
        obj: &ObjInfo,
        flags: CdapFlags,
        filt: &FiltInfo,
    ) -> Result<u32, CdapError> {
        self.provider.remote_create(port_id, obj, flags, filt)
    }

    pub fn remote_delete(
        &self,
        port_id: u32,
        obj: &ObjInfo,
        flags: CdapFlags,
        filt: &FiltInfo,
    ) -> Result<u32, CdapError> {
        self.provider.remote_delete(port_id, obj, flags, filt)
    }

    pub fn remote_read(
        &self,
        port_id: u32,
        obj: &ObjInfo,
        flags: CdapFlags,
        filt: &FiltInfo,
    ) -> Result<u32, CdapError> {
        self.provider.remote_read(port_id, obj, flags, filt)
    }

    pub fn remote_cancel_read(
        &self,
        port_id: u32,
        flags: CdapFlags,
        invoke_id: u32,
    ) -> Result<(), CdapError> {
        self.provider.remote_cancel_read(port_id, flags, invoke_id)
    }

    pub fn remote_write(
        &self,
        port_id: u32,
        obj: &ObjInfo,
        flags: CdapFlags,
        filt: &FiltInfo,
    ) -> Result<u32, CdapError> {
        self.provider.remote_write(port_id, obj, flags, filt)
    }

    pub fn remote_start(
        &self,
        port_id: u32,
        obj: &ObjInfo,
        flags: CdapFlags,
        filt: &FiltInfo,
    ) -> Result<u32, CdapError> {
        self.provider.remote_start(port_id, obj, flags, filt)
    }

    pub fn remote_stop(
        &self,
        port_id: u32,
        obj: &ObjInfo,
        flags: CdapFlags,
        filt: &FiltInfo,
    ) -> Result<u32, CdapError> {
        self.provider.remote_stop(port_id, obj, flags, filt)
    }
}

/// A response is only owed when the request carried an invoke id.
fn respond(invoke_id: u32, send: impl FnOnce() -> Result<(), CdapError>) {
    if invoke_id == 0 {
        return;
    }
    if let Err(e) = send() {
        log::error!("unable to send the response: {}", e);
    }
}

impl CdapCallback for RibDaemon {
    fn process_authentication_message(&self, con: &ConnectionHandle, msg: &CdapMessage) {
        match &self.auth {
            Some(auth) => auth.process_authentication_message(con, msg),
            None => log::warn!(
                "authentication message {} on port {} but no auth handler installed",
                msg.op_code,
                con.port_id
            ),
        }
    }

    fn open_connection(&self, con: &ConnectionHandle, msg: &CdapMessage) {
        let version = u64::try_from(msg.version).unwrap_or(0);
        // con.src is the local side, so its AE names the target RIB
        let res = match self.rib_for(version, &con.src.ae_name) {
            Some(rib) => {
                self.bind_port(con.port_id, rib.handle());
                self.app_con.connect(msg.invoke_id, con, msg)
            }
            None => {
                let err = RibError::ObjectDoesNotExist(format!(
                    "no RIB for version {} on AE '{}'",
                    version, con.src.ae_name
                ));
                log::warn!("rejecting connect on port {}: {}", con.port_id, err);
                ResInfo::failure(err.result_code(), err.to_string())
            }
        };
        respond(msg.invoke_id, || {
            self.provider.send_open_connection_result(con, &res, msg.invoke_id)
        });
    }

    fn close_connection(&self, con: &ConnectionHandle, _flags: CdapFlags, invoke_id: u32) {
        let res = self.app_con.release(invoke_id, con);
        respond(invoke_id, || {
            self.provider
                .send_close_connection_result(con.port_id, &res, invoke_id)
        });
        self.unbind_port(con.port_id);
    }

    fn create_request(&self, con: &ConnectionHandle, obj: &ObjInfo, filt: &FiltInfo, invoke_id: u32) {
        let (reply, res) = match self.rib_by_port(con.port_id) {
            Some(rib) => rib.remote_create_request(con, obj, filt, invoke_id),
            None => no_rib_reply(con.port_id, obj),
        };
        respond(invoke_id, || {
            self.provider
                .send_create_result(con.port_id, &reply, &res, invoke_id)
        });
    }

    fn delete_request(&self, con: &ConnectionHandle, obj: &ObjInfo, _filt: &FiltInfo, invoke_id: u32) {
        let (reply, res) = match self.rib_by_port(con.port_id) {
            Some(rib) => rib.remote_delete_request(obj),
            None => no_rib_reply(con.port_id, obj),
        };
        respond(invoke_id, || {
            self.provider
                .send_delete_result(con.port_id, &reply, &res, invoke_id)
        });
    }

    fn read_request(
        &self,
        con: &ConnectionHandle,
        obj: &ObjInfo,
        _filt: &FiltInfo,
        _flags: CdapFlags,
        invoke_id: u32,
    ) {
        let (reply, res) = match self.rib_by_port(con.port_id) {
            Some(rib) => rib.remote_read_request(obj),
            None => no_rib_reply(con.port_id, obj),
        };
        respond(invoke_id, || {
            self.provider
                .send_read_result(con.port_id, &reply, &res, CdapFlags::None, invoke_id)
        });
    }

    fn cancel_read_request(&self, con: &ConnectionHandle, obj: &ObjInfo, invoke_id: u32) {
        let (_, res) = match self.rib_by_port(con.port_id) {
            Some(rib) => rib.remote_cancel_read_request(obj),
            None => no_rib_reply(con.port_id, obj),
        };
        respond(invoke_id, || {
            self.provider
                .send_cancel_read_result(con.port_id, &res, invoke_id)
        });
    }

    fn write_request(&self, con: &ConnectionHandle, obj: &ObjInfo, _filt: &FiltInfo, invoke_id: u32) {
        let (_, res) = match self.rib_by_port(con.port_id) {
            Some(rib) => rib.remote_write_request(obj),
            None => no_rib_reply(con.port_id, obj),
        };
        respond(invoke_id, || {
            self.provider.send_write_result(con.port_id, &res, invoke_id)
        });
    }

    fn start_request(&self, con: &ConnectionHandle, obj: &ObjInfo, _filt: &FiltInfo, invoke_id: u32) {
        let (reply, res) = match self.rib_by_port(con.port_id) {
            Some(rib) => rib.remote_start_request(obj),
            None => no_rib_reply(con.port_id, obj),
        };
        respond(invoke_id, || {
            self.provider
                .send_start_result(con.port_id, &reply, &res, invoke_id)
        });
    }

    fn stop_request(&self, con: &ConnectionHandle, obj: &ObjInfo, _filt: &FiltInfo, invoke_id: u32) {
        let (_, res) = match self.rib_by_port(con.port_id) {
            Some(rib) => rib.remote_stop_request(obj),
            None => no_rib_reply(con.port_id, obj),
        };
        respond(invoke_id, || {
            self.provider.send_stop_result(con.port_id, &res, invoke_id)
        });
    }

    fn remote_open_connection_result(&self, con: &ConnectionHandle, msg: &CdapMessage) {
        self.app_con.connect_result(con, &msg.res_info());
    }

    fn remote_close_connection_result(&self, con: &ConnectionHandle, res: &ResInfo) {
        self.app_con.release_result(con, res);
        self.unbind_port(con.port_id);
    }

    fn remote_create_result(&self, con: &ConnectionHandle, obj: &ObjInfo, res: &ResInfo, _invoke_id: u32) {
        if let Some(rib) = self.rib_by_port(con.port_id) {
            rib.remote_create_result(con, obj, res);
        }
    }

    fn remote_delete_result(&self, con: &ConnectionHandle, _obj: &ObjInfo, res: &ResInfo, _invoke_id: u32) {
        if let Some(rib) = self.rib_by_port(con.port_id) {
            rib.remote_delete_result(con, res);
        }
    }

    fn remote_read_result(
        &self,
        con: &ConnectionHandle,
        obj: &ObjInfo,
        res: &ResInfo,
        flags: CdapFlags,
        _invoke_id: u32,
    ) {
        if let Some(rib) = self.rib_by_port(con.port_id) {
            rib.remote_read_result(con, obj, res, flags);
        }
    }

    fn remote_cancel_read_result(&self, con: &ConnectionHandle, res: &ResInfo, _invoke_id: u32) {
        if let Some(rib) = self.rib_by_port(con.port_id) {
            rib.remote_cancel_read_result(con, res);
        }
    }

    fn remote_write_result(&self, con: &ConnectionHandle, obj: &ObjInfo, res: &ResInfo, _invoke_id: u32) {
        if let Some(rib) = self.rib_by_port(con.port_id) {
            rib.remote_write_result(con, obj, res);
        }
    }

    fn remote_start_result(&self, con: &ConnectionHandle, obj: &ObjInfo, res: &ResInfo, _invoke_id: u32) {
        if let Some(rib) = self.rib_by_port(con.port_id) {
            rib.remote_start_result(con, obj, res);
        }
    }

    fn remote_stop_result(&self, con: &ConnectionHandle, obj: &ObjInfo, res: &ResInfo, _invoke_id: u32) {
        if let Some(rib) = self.rib_by_port(con.port_id) {
            rib.remote_stop_result(con, obj, res);
        }
    }

    fn session_aborted(&self, port_id: u32, pending: &[(u32, PendingOp)]) {
        log::warn!(
            "session on port {} aborted, {} operations will never complete",
            port_id,
            pending.len()
        );
        self.unbind_port(port_id);
    }
}

fn no_rib_reply(port_id: u32, obj: &ObjInfo) -> (ObjInfo, ResInfo) {
    let err = RibError::ObjectDoesNotExist(format!("no RIB bound to port {}", port_id));
    log::warn!("dropping request for {}: {}", obj.name, err);
    (
        ObjInfo {
            class: obj.class.clone(),
            name: obj.name.clone(),
            inst: obj.inst,
            value: Vec::new(),
        },
        ResInfo::failure(err.result_code(), err.to_string()),
    )
}

impl std::fmt::Debug for RibDaemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().unwrap();
        f.debug_struct("RibDaemon")
            .field("schemas", &state.schemas.len())
            .field("ribs", &state.ribs.len())
            .field("ports", &state.ports.len())
            .finish()
    }
}
