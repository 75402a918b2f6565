// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! CDAP connection state machine
//!
//! Drives one session through
//! `NONE → AWAITCON → CONNECTED → AWAITCLOSE → CLOSED` and is the sole
//! arbiter of whether non-connect messages may be exchanged. Checking
//! and applying a transition are separate steps so a failed validation
//! never mutates the state.

use crate::error::ProtocolError;
use crate::invoke_id::Direction;
use crate::message::CdapOpCode;
use crate::timer::{Timer, TimerHandle};
use std::fmt;
use std::time::Duration;

/// Connection establishment state of one CDAP session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    None,
    AwaitCon,
    Connected,
    AwaitClose,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::None => "NONE",
            ConnectionState::AwaitCon => "AWAITCON",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::AwaitClose => "AWAITCLOSE",
            ConnectionState::Closed => "CLOSED",
        };
        write!(f, "{}", name)
    }
}

/// The state machine proper. Owned by a session and protected by the
/// session lock; the timer callbacks it arms re-enter through
/// [`ConnectionStateMachine::expire_connect`] / `expire_release` after
/// reacquiring that lock.
#[derive(Debug)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    timer: Timer,
    timeout: Duration,
    armed: Option<TimerHandle>,
}

impl ConnectionStateMachine {
    pub fn new(timer: Timer, timeout: Duration) -> Self {
        Self {
            state: ConnectionState::None,
            timer,
            timeout,
            armed: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Authentication exchanges run in `AWAITCON`, so object traffic is
    /// legal both there and in `CONNECTED`.
    pub fn can_send_or_receive_messages(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::AwaitCon | ConnectionState::Connected
        )
    }

    /// Validates that `op_code` is legal in the current state for the
    /// given direction, without mutating anything.
    pub fn check(
        &self,
        op_code: CdapOpCode,
        direction: Direction,
        invoke_id: u32,
    ) -> Result<(), ProtocolError> {
        let _ = invoke_id;
        let ok = match op_code {
            CdapOpCode::Connect => self.state == ConnectionState::None,
            CdapOpCode::ConnectR => self.state == ConnectionState::AwaitCon,
            CdapOpCode::Release => match direction {
                Direction::Sent => matches!(
                    self.state,
                    ConnectionState::Connected | ConnectionState::AwaitCon
                ),
                // the peer may release while we already await a close
                Direction::Received => matches!(
                    self.state,
                    ConnectionState::Connected
                        | ConnectionState::AwaitCon
                        | ConnectionState::AwaitClose
                ),
            },
            CdapOpCode::ReleaseR => self.state == ConnectionState::AwaitClose,
            CdapOpCode::CancelRead | CdapOpCode::CancelReadR => self.is_connected(),
            _ => self.can_send_or_receive_messages(),
        };

        if ok {
            Ok(())
        } else {
            Err(ProtocolError::BadState {
                state: self.state,
                op_code,
            })
        }
    }

    /// Applies the transition for a message that passed [`check`]. For
    /// transitions that start waiting on the peer (`M_CONNECT` sent,
    /// `M_RELEASE` sent with a non-zero invoke id) `on_timeout` is armed
    /// with the configured timeout. Returns the new state.
    ///
    /// [`check`]: ConnectionStateMachine::check
    pub fn apply<F>(
        &mut self,
        op_code: CdapOpCode,
        direction: Direction,
        invoke_id: u32,
        on_timeout: F,
    ) -> ConnectionState
    where
        F: FnOnce() + Send + 'static,
    {
        debug_assert!(self.check(op_code, direction, invoke_id).is_ok());

        match (op_code, direction) {
            (CdapOpCode::Connect, Direction::Sent) => {
                self.state = ConnectionState::AwaitCon;
                log::debug!("waiting {:?} for a connection response", self.timeout);
                self.arm(on_timeout);
            }
            (CdapOpCode::Connect, Direction::Received) => {
                self.state = ConnectionState::AwaitCon;
            }
            (CdapOpCode::ConnectR, Direction::Sent) => {
                self.state = ConnectionState::Connected;
            }
            (CdapOpCode::ConnectR, Direction::Received) => {
                self.disarm();
                self.state = ConnectionState::Connected;
            }
            (CdapOpCode::Release, Direction::Sent) => {
                if invoke_id != 0 {
                    self.state = ConnectionState::AwaitClose;
                    log::debug!("waiting {:?} for a release response", self.timeout);
                    self.arm(on_timeout);
                } else {
                    self.state = ConnectionState::Closed;
                }
            }
            (CdapOpCode::Release, Direction::Received) => {
                self.state = if invoke_id != 0 {
                    ConnectionState::AwaitClose
                } else {
                    ConnectionState::Closed
                };
            }
            (CdapOpCode::ReleaseR, _) => {
                self.disarm();
                self.state = ConnectionState::Closed;
            }
            _ => {}
        }

        self.state
    }

    /// Called by the connect timer task. Returns true when the timeout
    /// was still relevant and the session must be aborted.
    pub fn expire_connect(&mut self) -> bool {
        if self.state == ConnectionState::AwaitCon {
            log::warn!("connection response timed out");
            self.state = ConnectionState::None;
            self.armed = None;
            true
        } else {
            false
        }
    }

    /// Called by the release timer task.
    pub fn expire_release(&mut self) -> bool {
        if self.state == ConnectionState::AwaitClose {
            log::warn!("release response timed out");
            self.state = ConnectionState::None;
            self.armed = None;
            true
        } else {
            false
        }
    }

    fn arm<F>(&mut self, on_timeout: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.disarm();
        self.armed = Some(self.timer.schedule(self.timeout, on_timeout));
    }

    fn disarm(&mut self) {
        if let Some(handle) = self.armed.take() {
            handle.cancel();
        }
    }
}

impl Drop for ConnectionStateMachine {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn machine(timeout_ms: u64) -> ConnectionStateMachine {
        ConnectionStateMachine::new(Timer::new(), Duration::from_millis(timeout_ms))
    }

    fn noop() {}

    #[tokio::test]
    async fn test_full_connect_release_cycle() {
        let mut sm = machine(10_000);
        assert_eq!(sm.state(), ConnectionState::None);

        sm.check(CdapOpCode::Connect, Direction::Sent, 1).unwrap();
        sm.apply(CdapOpCode::Connect, Direction::Sent, 1, noop);
        assert_eq!(sm.state(), ConnectionState::AwaitCon);

        sm.check(CdapOpCode::ConnectR, Direction::Received, 1).unwrap();
        sm.apply(CdapOpCode::ConnectR, Direction::Received, 1, noop);
        assert_eq!(sm.state(), ConnectionState::Connected);

        sm.check(CdapOpCode::Release, Direction::Sent, 3).unwrap();
        sm.apply(CdapOpCode::Release, Direction::Sent, 3, noop);
        assert_eq!(sm.state(), ConnectionState::AwaitClose);

        sm.check(CdapOpCode::ReleaseR, Direction::Received, 3).unwrap();
        sm.apply(CdapOpCode::ReleaseR, Direction::Received, 3, noop);
        assert_eq!(sm.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_passive_side_transitions() {
        let mut sm = machine(10_000);

        sm.apply(CdapOpCode::Connect, Direction::Received, 1, noop);
        assert_eq!(sm.state(), ConnectionState::AwaitCon);

        sm.apply(CdapOpCode::ConnectR, Direction::Sent, 1, noop);
        assert_eq!(sm.state(), ConnectionState::Connected);

        sm.apply(CdapOpCode::Release, Direction::Received, 5, noop);
        assert_eq!(sm.state(), ConnectionState::AwaitClose);

        sm.apply(CdapOpCode::ReleaseR, Direction::Sent, 5, noop);
        assert_eq!(sm.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_fire_and_forget_release_closes_immediately() {
        let mut sm = machine(10_000);
        sm.apply(CdapOpCode::Connect, Direction::Received, 1, noop);
        sm.apply(CdapOpCode::ConnectR, Direction::Sent, 1, noop);

        sm.apply(CdapOpCode::Release, Direction::Received, 0, noop);
        assert_eq!(sm.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_release_during_awaitcon_is_legal() {
        let mut sm = machine(10_000);
        sm.apply(CdapOpCode::Connect, Direction::Sent, 1, noop);
        assert!(sm.check(CdapOpCode::Release, Direction::Sent, 2).is_ok());
    }

    #[tokio::test]
    async fn test_illegal_transitions_keep_state() {
        let mut sm = machine(10_000);

        let err = sm.check(CdapOpCode::ConnectR, Direction::Sent, 1).unwrap_err();
        assert!(matches!(err, ProtocolError::BadState { .. }));
        assert_eq!(sm.state(), ConnectionState::None);

        let err = sm.check(CdapOpCode::Read, Direction::Sent, 1).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::BadState {
                state: ConnectionState::None,
                op_code: CdapOpCode::Read,
            }
        ));

        sm.apply(CdapOpCode::Connect, Direction::Sent, 1, noop);
        let err = sm.check(CdapOpCode::Connect, Direction::Sent, 1).unwrap_err();
        assert!(matches!(err, ProtocolError::BadState { .. }));
        assert_eq!(sm.state(), ConnectionState::AwaitCon);
    }

    #[tokio::test]
    async fn test_object_traffic_allowed_in_awaitcon_and_connected_only() {
        let mut sm = machine(10_000);
        assert!(sm.check(CdapOpCode::Write, Direction::Received, 1).is_err());

        sm.apply(CdapOpCode::Connect, Direction::Sent, 1, noop);
        assert!(sm.check(CdapOpCode::Write, Direction::Received, 1).is_ok());

        sm.apply(CdapOpCode::ConnectR, Direction::Received, 1, noop);
        assert!(sm.check(CdapOpCode::Write, Direction::Received, 1).is_ok());

        sm.apply(CdapOpCode::Release, Direction::Sent, 2, noop);
        assert!(sm.check(CdapOpCode::Write, Direction::Received, 1).is_err());
    }

    #[tokio::test]
    async fn test_cancel_read_needs_connected() {
        let mut sm = machine(10_000);
        sm.apply(CdapOpCode::Connect, Direction::Sent, 1, noop);
        assert!(sm.check(CdapOpCode::CancelRead, Direction::Sent, 2).is_err());

        sm.apply(CdapOpCode::ConnectR, Direction::Received, 1, noop);
        assert!(sm.check(CdapOpCode::CancelRead, Direction::Sent, 2).is_ok());
    }

    #[tokio::test]
    async fn test_connect_timer_fires_and_expire_resets() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut sm = machine(10);

        let fired_clone = fired.clone();
        sm.apply(CdapOpCode::Connect, Direction::Sent, 1, move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        assert!(sm.expire_connect());
        assert_eq!(sm.state(), ConnectionState::None);
        // a second expiry is stale
        assert!(!sm.expire_connect());
    }

    #[tokio::test]
    async fn test_connect_response_cancels_timer() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut sm = machine(10);

        let fired_clone = fired.clone();
        sm.apply(CdapOpCode::Connect, Direction::Sent, 1, move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        sm.apply(CdapOpCode::ConnectR, Direction::Received, 1, noop);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(sm.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_stale_release_expiry_is_ignored() {
        let mut sm = machine(10_000);
        sm.apply(CdapOpCode::Connect, Direction::Sent, 1, noop);
        sm.apply(CdapOpCode::ConnectR, Direction::Received, 1, noop);
        sm.apply(CdapOpCode::Release, Direction::Sent, 2, noop);
        sm.apply(CdapOpCode::ReleaseR, Direction::Received, 2, noop);

        assert!(!sm.expire_release());
        assert_eq!(sm.state(), ConnectionState::Closed);
    }
}
