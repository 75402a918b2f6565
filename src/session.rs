// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! One CDAP session per port id
//!
//! A session bundles the connection state machine, the pending-operation
//! tables and the shared invoke-id allocator behind a single lock, and
//! runs every outgoing and incoming message through the same pipeline:
//! field validation and state checks first, state updates and the wire
//! codec only once everything passed. A message that fails any check
//! leaves the session exactly as it was.

use crate::codec::WireCodec;
use crate::error::CdapError;
use crate::invoke_id::{Direction, InvokeIdAllocator};
use crate::message::{AuthPolicy, CdapFlags, CdapMessage, CdapOpCode, EndpointInfo};
use crate::pending::{PendingOp, PendingTables};
use crate::session_manager::SessionEvent;
use crate::state_machine::{ConnectionState, ConnectionStateMachine};
use crate::timer::Timer;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Identifies one end-to-end CDAP connection. Populated from the
/// `M_CONNECT` exchange and immutable afterwards; always expressed from
/// the local perspective (`src` is this process).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionHandle {
    pub port_id: u32,
    pub version: i64,
    pub src: EndpointInfo,
    pub dest: EndpointInfo,
    pub auth_policy: AuthPolicy,
}

struct SessionInner {
    machine: ConnectionStateMachine,
    pending: PendingTables,
    handle: ConnectionHandle,
    /// Connect/release invoke ids reserved but not yet answered. They
    /// live outside the pending tables, so teardown must reclaim them
    /// separately.
    handshake_ids: Vec<(u32, Direction)>,
}

/// A CDAP session over one port id.
pub struct CdapSession {
    port_id: u32,
    codec: WireCodec,
    allocator: Arc<InvokeIdAllocator>,
    events: mpsc::UnboundedSender<SessionEvent>,
    inner: Arc<Mutex<SessionInner>>,
}

impl CdapSession {
    pub fn new(
        port_id: u32,
        timer: Timer,
        timeout: Duration,
        codec: WireCodec,
        allocator: Arc<InvokeIdAllocator>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            port_id,
            codec,
            allocator,
            events,
            inner: Arc::new(Mutex::new(SessionInner {
                machine: ConnectionStateMachine::new(timer, timeout),
                pending: PendingTables::new(),
                handle: ConnectionHandle {
                    port_id,
                    ..Default::default()
                },
                handshake_ids: Vec::new(),
            })),
        }
    }

    pub fn port_id(&self) -> u32 {
        self.port_id
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().unwrap().machine.state()
    }

    pub fn is_closed(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::None | ConnectionState::Closed
        )
    }

    /// True while the connect handshake (and any authentication
    /// exchange) is still in progress.
    pub fn in_await_con(&self) -> bool {
        self.state() == ConnectionState::AwaitCon
    }

    pub fn connection_handle(&self) -> ConnectionHandle {
        self.inner.lock().unwrap().handle.clone()
    }

    pub fn invoke_id_allocator(&self) -> &Arc<InvokeIdAllocator> {
        &self.allocator
    }

    /// Validates and applies an outgoing message, returning the encoded
    /// bytes to put on the wire.
    pub fn encode_outgoing(&self, msg: &CdapMessage) -> Result<Vec<u8>, CdapError> {
        msg.validate()?;
        // encoding is pure, so wire failures surface before any update
        let bytes = self.codec.encode(msg)?;

        let mut inner = self.inner.lock().unwrap();
        Self::check(&inner, msg, Direction::Sent)?;
        self.apply(&mut inner, msg, Direction::Sent);
        Ok(bytes)
    }

    /// Decodes, validates and applies an incoming message.
    pub fn process_incoming(&self, bytes: &[u8]) -> Result<CdapMessage, CdapError> {
        let msg = self.codec.decode(bytes)?;
        msg.validate()?;

        let mut inner = self.inner.lock().unwrap();
        Self::check(&inner, &msg, Direction::Received)?;
        self.apply(&mut inner, &msg, Direction::Received);
        Ok(msg)
    }

    /// Tears down the session's in-flight state: every invoke id the
    /// session reserved (pending operations and unanswered
    /// connect/release handshakes) goes back to the allocator, and the
    /// drained pending operations are returned so their callbacks can be
    /// failed.
    pub(crate) fn abort(&self) -> Vec<(u32, PendingOp)> {
        let (pending, handshake_ids) = {
            let mut inner = self.inner.lock().unwrap();
            (
                inner.pending.drain(),
                std::mem::take(&mut inner.handshake_ids),
            )
        };
        for (invoke_id, op) in &pending {
            self.allocator.free_invoke_id(*invoke_id, op.direction);
        }
        for (invoke_id, direction) in handshake_ids {
            self.allocator.free_invoke_id(invoke_id, direction);
        }
        pending
    }

    #[cfg(test)]
    pub(crate) fn pending_sizes(&self) -> (usize, usize, usize) {
        let inner = self.inner.lock().unwrap();
        (
            inner.pending.sent_len(),
            inner.pending.received_len(),
            inner.pending.cancel_read_len(),
        )
    }

    fn check(
        inner: &SessionInner,
        msg: &CdapMessage,
        direction: Direction,
    ) -> Result<(), CdapError> {
        let op = msg.op_code;
        inner.machine.check(op, direction, msg.invoke_id)?;

        if op.is_object_request() {
            inner.pending.check_request(msg.invoke_id, direction)?;
        } else if op.is_object_op() {
            inner.pending.check_response(op, msg.invoke_id, direction)?;
        } else if op == CdapOpCode::CancelRead {
            inner.pending.check_cancel_read(msg.invoke_id, direction)?;
        } else if op == CdapOpCode::CancelReadR {
            inner
                .pending
                .check_cancel_read_response(msg.invoke_id, direction)?;
        }

        Ok(())
    }

    fn apply(&self, inner: &mut SessionInner, msg: &CdapMessage, direction: Direction) {
        let op = msg.op_code;

        let new_state =
            inner
                .machine
                .apply(op, direction, msg.invoke_id, self.timeout_task(op));

        match op {
            CdapOpCode::Connect => {
                Self::populate_handle(&mut inner.handle, msg, direction);
            }
            op if op.is_object_request() => {
                inner.pending.apply_request(op, msg.invoke_id, direction);
            }
            op if op.is_object_op() => {
                inner
                    .pending
                    .apply_response(op, msg.invoke_id, direction, msg.flags);
            }
            CdapOpCode::CancelRead => {
                inner.pending.apply_cancel_read(msg.invoke_id, direction);
            }
            CdapOpCode::CancelReadR => {
                inner.pending.apply_cancel_read_response(msg.invoke_id);
            }
            _ => {}
        }

        match op {
            CdapOpCode::Connect | CdapOpCode::Release if msg.invoke_id != 0 => {
                inner.handshake_ids.push((msg.invoke_id, direction));
            }
            CdapOpCode::ConnectR | CdapOpCode::ReleaseR => {
                inner
                    .handshake_ids
                    .retain(|&(id, dir)| id != msg.invoke_id || dir != direction.opposite());
            }
            _ => {}
        }

        self.track_invoke_id(msg, direction);

        if new_state == ConnectionState::Closed {
            // the manager gives in-flight dispatch a moment to finish,
            // then tears the session down
            let _ = self.events.send(SessionEvent::Closed(self.port_id));
        }
    }

    /// A request reserves its id in its own direction; a response frees
    /// the id the request reserved. Partial read responses keep the
    /// exchange (and the id) alive.
    fn track_invoke_id(&self, msg: &CdapMessage, direction: Direction) {
        if msg.invoke_id == 0 {
            return;
        }
        let op = msg.op_code;
        if op.is_response() {
            let incomplete = op == CdapOpCode::ReadR && msg.flags == CdapFlags::RdIncomplete;
            if !incomplete {
                self.allocator
                    .free_invoke_id(msg.invoke_id, direction.opposite());
            }
        } else {
            self.allocator.reserve_invoke_id(msg.invoke_id, direction);
        }
    }

    fn populate_handle(handle: &mut ConnectionHandle, msg: &CdapMessage, direction: Direction) {
        match direction {
            Direction::Sent => {
                handle.src = msg.src.clone();
                handle.dest = msg.dest.clone();
            }
            Direction::Received => {
                handle.src = msg.dest.clone();
                handle.dest = msg.src.clone();
            }
        }
        handle.version = msg.version;
        handle.auth_policy = msg.auth_policy.clone();
    }

    /// Task run when the peer never answers a connect or release. The
    /// closure holds no strong reference to the session, so a destroyed
    /// session cannot be resurrected by a stale timer.
    fn timeout_task(&self, op: CdapOpCode) -> impl FnOnce() + Send + 'static {
        let weak = Arc::downgrade(&self.inner);
        let events = self.events.clone();
        let port_id = self.port_id;
        let is_connect = op == CdapOpCode::Connect;
        move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let expired = {
                let mut inner = inner.lock().unwrap();
                if is_connect {
                    inner.machine.expire_connect()
                } else {
                    inner.machine.expire_release()
                }
            };
            if expired {
                let _ = events.send(SessionEvent::Aborted(port_id));
            }
        }
    }
}

impl std::fmt::Debug for CdapSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdapSession")
            .field("port_id", &self.port_id)
            .field("state", &self.state())
            .finish()
    }
}
