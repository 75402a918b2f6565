// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! Session management
//!
//! Maps port ids to sessions and routes raw bytes in and out. Sessions
//! are created implicitly by `M_CONNECT` in either direction and die in
//! one of two ways: a clean close (scheduled destruction on a short-fuse
//! timer, so in-flight dispatch on the port finishes first) or an abort
//! (timer expiry, transport failure). Sessions never hold a reference
//! back to the manager; teardown is requested by posting the port id on
//! the event channel.

use crate::codec::{ConcreteSyntax, WireCodec};
use crate::config::CdapConfig;
use crate::error::{CdapError, ProtocolError};
use crate::invoke_id::InvokeIdAllocator;
use crate::message::{CdapMessage, CdapOpCode};
use crate::pending::PendingOp;
use crate::session::CdapSession;
use crate::timer::Timer;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;

/// Grace period between a session reaching `CLOSED` and its entry being
/// dropped from the port-id map.
const SESSION_DESTROY_DELAY: Duration = Duration::from_millis(20);

/// Lifecycle notifications posted by sessions and timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A connect/release timer expired or the transport failed; tear the
    /// session down immediately and fail its outstanding operations.
    Aborted(u32),
    /// The state machine reached `CLOSED`; schedule destruction.
    Closed(u32),
    /// The destruction fuse burned down.
    Destroy(u32),
}

/// Receives the fallout of an aborted session: every operation that was
/// still pending when the session died.
pub trait SessionObserver: Send + Sync {
    fn session_aborted(&self, port_id: u32, pending: Vec<(u32, PendingOp)>);
}

type SessionMap = Arc<RwLock<HashMap<u32, Arc<CdapSession>>>>;

/// Owns every CDAP session, keyed by port id.
pub struct SessionManager {
    timeout: Duration,
    codec: WireCodec,
    timer: Timer,
    allocator: Arc<InvokeIdAllocator>,
    sessions: SessionMap,
    events: mpsc::UnboundedSender<SessionEvent>,
    observer: Arc<OnceLock<Arc<dyn SessionObserver>>>,
}

impl SessionManager {
    /// Spawns the reaper task on the current runtime.
    pub fn new(config: &CdapConfig) -> Arc<Self> {
        let (events, rx) = mpsc::unbounded_channel();
        let sessions: SessionMap = Arc::new(RwLock::new(HashMap::new()));
        let observer: Arc<OnceLock<Arc<dyn SessionObserver>>> = Arc::new(OnceLock::new());
        let timer = Timer::new();

        tokio::spawn(Self::reap(
            rx,
            events.clone(),
            sessions.clone(),
            observer.clone(),
            timer.clone(),
        ));

        Arc::new(Self {
            timeout: Duration::from_millis(config.connect_timeout_ms),
            codec: WireCodec::new(ConcreteSyntax::Gpb, config.max_message_size),
            timer,
            allocator: Arc::new(InvokeIdAllocator::new()),
            sessions,
            events,
            observer,
        })
    }

    /// Registers the observer told about aborted sessions. Effective
    /// once; later calls are ignored.
    pub fn set_observer(&self, observer: Arc<dyn SessionObserver>) {
        let _ = self.observer.set(observer);
    }

    pub fn invoke_id_allocator(&self) -> Arc<InvokeIdAllocator> {
        self.allocator.clone()
    }

    pub fn codec(&self) -> &WireCodec {
        &self.codec
    }

    /// Returns the session for `port_id`, creating it if absent.
    pub fn ensure_session(&self, port_id: u32) -> Arc<CdapSession> {
        if let Some(session) = self.get_session(port_id) {
            return session;
        }
        let mut sessions = self.sessions.write().unwrap();
        sessions
            .entry(port_id)
            .or_insert_with(|| {
                log::debug!("created CDAP session for port {}", port_id);
                Arc::new(CdapSession::new(
                    port_id,
                    self.timer.clone(),
                    self.timeout,
                    self.codec.clone(),
                    self.allocator.clone(),
                    self.events.clone(),
                ))
            })
            .clone()
    }

    pub fn get_session(&self, port_id: u32) -> Option<Arc<CdapSession>> {
        self.sessions.read().unwrap().get(&port_id).cloned()
    }

    pub fn session_ids(&self) -> Vec<u32> {
        self.sessions.read().unwrap().keys().copied().collect()
    }

    /// Schedules the session for destruction after the grace period.
    pub fn remove_session(&self, port_id: u32) {
        let _ = self.events.send(SessionEvent::Closed(port_id));
    }

    /// Tears the session down immediately, failing whatever it had
    /// outstanding. Used on non-retryable transport errors.
    pub fn abort_session(&self, port_id: u32) {
        let _ = self.events.send(SessionEvent::Aborted(port_id));
    }

    /// Synchronously discards any session on `port_id` so the port can
    /// be reconnected. Reserved invoke ids go back to the allocator; if
    /// the old session still had operations in flight the observer is
    /// told they will never complete.
    pub fn reset_session(&self, port_id: u32) {
        let old = self.sessions.write().unwrap().remove(&port_id);
        if let Some(old) = old {
            let pending = old.abort();
            log::debug!("discarded previous CDAP session on port {}", port_id);
            if !pending.is_empty() {
                if let Some(observer) = self.observer.get() {
                    observer.session_aborted(port_id, pending);
                }
            }
        }
    }

    /// Validates and encodes the next outgoing message on `port_id`.
    /// An outbound `M_CONNECT` creates the session; anything else on an
    /// unknown port is refused.
    pub fn encode_next(&self, port_id: u32, msg: &CdapMessage) -> Result<Vec<u8>, CdapError> {
        let session = match self.get_session(port_id) {
            Some(session) => session,
            None if msg.op_code == CdapOpCode::Connect => self.ensure_session(port_id),
            None => return Err(ProtocolError::NoSession(port_id).into()),
        };
        session.encode_outgoing(msg)
    }

    /// Decodes and validates bytes that arrived on `port_id`. An inbound
    /// `M_CONNECT` creates the session; anything else on an unknown port
    /// is refused.
    pub fn on_bytes(&self, port_id: u32, bytes: &[u8]) -> Result<CdapMessage, CdapError> {
        let session = match self.get_session(port_id) {
            Some(session) => session,
            None => {
                // peek at the opcode before committing to a new session
                let msg = self.codec.decode(bytes)?;
                if msg.op_code != CdapOpCode::Connect {
                    log::warn!(
                        "received {} on port {} with no open session",
                        msg.op_code,
                        port_id
                    );
                    return Err(ProtocolError::NoSession(port_id).into());
                }
                self.ensure_session(port_id)
            }
        };
        session.process_incoming(bytes)
    }

    async fn reap(
        mut rx: mpsc::UnboundedReceiver<SessionEvent>,
        events: mpsc::UnboundedSender<SessionEvent>,
        sessions: SessionMap,
        observer: Arc<OnceLock<Arc<dyn SessionObserver>>>,
        timer: Timer,
    ) {
        while let Some(event) = rx.recv().await {
            match event {
                SessionEvent::Aborted(port_id) => {
                    let session = sessions.write().unwrap().remove(&port_id);
                    if let Some(session) = session {
                        // hand the session's invoke ids back before the
                        // observer learns about the failed operations
                        let pending = session.abort();
                        log::warn!(
                            "session on port {} aborted with {} pending operations",
                            port_id,
                            pending.len()
                        );
                        if let Some(observer) = observer.get() {
                            observer.session_aborted(port_id, pending);
                        }
                    }
                }
                SessionEvent::Closed(port_id) => {
                    let events = events.clone();
                    timer.schedule(SESSION_DESTROY_DELAY, move || {
                        let _ = events.send(SessionEvent::Destroy(port_id));
                    });
                }
                SessionEvent::Destroy(port_id) => {
                    if sessions.write().unwrap().remove(&port_id).is_some() {
                        log::debug!("destroyed CDAP session for port {}", port_id);
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.session_ids())
            .finish()
    }
}
