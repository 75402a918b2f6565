// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! CDAP runtime and RIB object store for the ARI implementation.
//!
//! This crate is the management-plane messaging substrate of the RINA
//! stack: per-port-id CDAP sessions (connection state machine, invoke-id
//! bookkeeping, request/response pairing, GPB wire codec) and the
//! hierarchical Resource Information Base that managed objects live in,
//! accessed over CDAP.
//!
//! The crate owns no I/O: the embedder supplies a [`Transport`] per
//! established byte stream and feeds received SDUs to the
//! [`IoHandler`]. Everything else (enrollment, security policies, flow
//! allocation) lives in collaborating crates and talks to this one
//! through the handler traits re-exported below.

// Public module declarations
pub mod codec;
pub mod config;
pub mod error;
pub mod invoke_id;
pub mod io_handler;
pub mod message;
pub mod pending;
pub mod provider;
pub mod rib;
pub mod rib_daemon;
pub mod schema;
pub mod session;
pub mod session_manager;
pub mod state_machine;
pub mod timer;

// Re-export commonly used types
pub use codec::{ConcreteSyntax, WireCodec};
pub use config::CdapConfig;
pub use error::{CdapError, ProtocolError, RibError, WireError};
pub use invoke_id::{Direction, InvokeIdAllocator};
pub use io_handler::{CdapCallback, IoHandler, NoSduProtection, SduProtection, Transport};
pub use message::{
    ABSTRACT_SYNTAX, AuthPolicy, CdapFlags, CdapMessage, CdapOpCode, EndpointInfo, FiltInfo,
    ObjInfo, ResInfo,
};
pub use pending::{PendingOp, PendingTables};
pub use provider::CdapProvider;
pub use rib::{ROOT_INSTANCE_ID, Rib, RibHandle, RibObj, RibOpsResponseHandler};
pub use rib_daemon::{AppConnectionHandler, AuthMessageHandler, RibDaemon};
pub use schema::{CreateCallback, CreateRequest, RibSchema};
pub use session::{CdapSession, ConnectionHandle};
pub use session_manager::{SessionEvent, SessionManager, SessionObserver};
pub use state_machine::{ConnectionState, ConnectionStateMachine};
pub use timer::{Timer, TimerHandle};
