// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! Pending-operation tracking
//!
//! Three disjoint maps per session, keyed by invoke id: requests we
//! sent, requests we received, and cancel-read exchanges. An entry lives
//! from the moment a request passes validation until its response
//! completes. Invoke id 0 is fire-and-forget and never creates an entry.

use crate::error::ProtocolError;
use crate::invoke_id::Direction;
use crate::message::{CdapFlags, CdapOpCode};
use std::collections::HashMap;

/// One outstanding request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingOp {
    pub op_code: CdapOpCode,
    pub direction: Direction,
}

/// The per-session request/response pairing state
#[derive(Debug, Default)]
pub struct PendingTables {
    sent: HashMap<u32, PendingOp>,
    received: HashMap<u32, PendingOp>,
    cancel_read: HashMap<u32, PendingOp>,
}

impl PendingTables {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, direction: Direction) -> &HashMap<u32, PendingOp> {
        match direction {
            Direction::Sent => &self.sent,
            Direction::Received => &self.received,
        }
    }

    fn map_mut(&mut self, direction: Direction) -> &mut HashMap<u32, PendingOp> {
        match direction {
            Direction::Sent => &mut self.sent,
            Direction::Received => &mut self.received,
        }
    }

    /// A new request must not reuse an invoke id that is still pending
    /// in its direction.
    pub fn check_request(
        &self,
        invoke_id: u32,
        direction: Direction,
    ) -> Result<(), ProtocolError> {
        if invoke_id != 0 && self.map(direction).contains_key(&invoke_id) {
            return Err(ProtocolError::DuplicateInvokeId(invoke_id));
        }
        Ok(())
    }

    pub fn apply_request(&mut self, op_code: CdapOpCode, invoke_id: u32, direction: Direction) {
        if invoke_id != 0 {
            self.map_mut(direction)
                .insert(invoke_id, PendingOp { op_code, direction });
        }
    }

    /// A response must match a pending request of the paired opcode in
    /// the opposite direction (we answer what we received, the peer
    /// answers what we sent).
    pub fn check_response(
        &self,
        response_op: CdapOpCode,
        invoke_id: u32,
        direction: Direction,
    ) -> Result<(), ProtocolError> {
        let request_op = response_op
            .request_opcode()
            .expect("check_response called with a request opcode");

        match self.map(direction.opposite()).get(&invoke_id) {
            None => Err(ProtocolError::OrphanResponse {
                op_code: response_op,
                invoke_id,
            }),
            Some(entry) if entry.op_code != request_op => Err(ProtocolError::OpcodeMismatch {
                expected: entry.op_code,
                got: response_op,
                invoke_id,
            }),
            Some(_) => Ok(()),
        }
    }

    /// Completes a request/response pair. `M_READ_R` flagged
    /// `F_RD_INCOMPLETE` leaves the entry open for further instalments.
    pub fn apply_response(
        &mut self,
        response_op: CdapOpCode,
        invoke_id: u32,
        direction: Direction,
        flags: CdapFlags,
    ) {
        let incomplete =
            response_op == CdapOpCode::ReadR && flags == CdapFlags::RdIncomplete;
        if !incomplete {
            self.map_mut(direction.opposite()).remove(&invoke_id);
        }
    }

    /// An `M_CANCELREAD` is only meaningful against an outstanding
    /// `M_READ` issued from the same side.
    pub fn check_cancel_read(
        &self,
        invoke_id: u32,
        direction: Direction,
    ) -> Result<(), ProtocolError> {
        match self.map(direction).get(&invoke_id) {
            None => Err(ProtocolError::OrphanResponse {
                op_code: CdapOpCode::CancelRead,
                invoke_id,
            }),
            Some(entry) if entry.op_code != CdapOpCode::Read => {
                Err(ProtocolError::OpcodeMismatch {
                    expected: entry.op_code,
                    got: CdapOpCode::CancelRead,
                    invoke_id,
                })
            }
            Some(_) => Ok(()),
        }
    }

    pub fn apply_cancel_read(&mut self, invoke_id: u32, direction: Direction) {
        self.cancel_read.insert(
            invoke_id,
            PendingOp {
                op_code: CdapOpCode::CancelRead,
                direction,
            },
        );
    }

    pub fn check_cancel_read_response(
        &self,
        invoke_id: u32,
        direction: Direction,
    ) -> Result<(), ProtocolError> {
        match self.cancel_read.get(&invoke_id) {
            None => Err(ProtocolError::OrphanResponse {
                op_code: CdapOpCode::CancelReadR,
                invoke_id,
            }),
            Some(entry) if entry.direction != direction.opposite() => {
                Err(ProtocolError::OrphanResponse {
                    op_code: CdapOpCode::CancelReadR,
                    invoke_id,
                })
            }
            Some(_) => Ok(()),
        }
    }

    /// The cancel-read entry is dropped by the `M_CANCELREAD_R`; the
    /// read itself stays pending until the final `M_READ_R` arrives.
    pub fn apply_cancel_read_response(&mut self, invoke_id: u32) {
        self.cancel_read.remove(&invoke_id);
    }

    pub fn sent_len(&self) -> usize {
        self.sent.len()
    }

    pub fn received_len(&self) -> usize {
        self.received.len()
    }

    pub fn cancel_read_len(&self) -> usize {
        self.cancel_read.len()
    }

    /// Empties all three maps, returning what was outstanding. Used when
    /// a session is aborted.
    pub fn drain(&mut self) -> Vec<(u32, PendingOp)> {
        let mut out: Vec<(u32, PendingOp)> = self
            .sent
            .drain()
            .chain(self.received.drain())
            .chain(self.cancel_read.drain())
            .collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_response_balance() {
        let mut tables = PendingTables::new();

        for id in 1..=4u32 {
            tables.check_request(id, Direction::Sent).unwrap();
            tables.apply_request(CdapOpCode::Create, id, Direction::Sent);
        }
        assert_eq!(tables.sent_len(), 4);

        for id in 1..=4u32 {
            tables
                .check_response(CdapOpCode::CreateR, id, Direction::Received)
                .unwrap();
            tables.apply_response(CdapOpCode::CreateR, id, Direction::Received, CdapFlags::None);
        }
        assert_eq!(tables.sent_len(), 0);
        assert_eq!(tables.received_len(), 0);
    }

    #[test]
    fn test_fire_and_forget_creates_no_entry() {
        let mut tables = PendingTables::new();
        tables.check_request(0, Direction::Sent).unwrap();
        tables.apply_request(CdapOpCode::Write, 0, Direction::Sent);
        assert_eq!(tables.sent_len(), 0);
    }

    #[test]
    fn test_duplicate_invoke_id_rejected_per_direction() {
        let mut tables = PendingTables::new();
        tables.apply_request(CdapOpCode::Create, 5, Direction::Sent);

        assert_eq!(
            tables.check_request(5, Direction::Sent),
            Err(ProtocolError::DuplicateInvokeId(5))
        );
        // the received direction is independent
        assert!(tables.check_request(5, Direction::Received).is_ok());
    }

    #[test]
    fn test_orphan_response() {
        let tables = PendingTables::new();
        assert_eq!(
            tables.check_response(CdapOpCode::WriteR, 17, Direction::Received),
            Err(ProtocolError::OrphanResponse {
                op_code: CdapOpCode::WriteR,
                invoke_id: 17,
            })
        );
    }

    #[test]
    fn test_opcode_mismatch_on_response() {
        let mut tables = PendingTables::new();
        tables.apply_request(CdapOpCode::Read, 3, Direction::Sent);

        assert_eq!(
            tables.check_response(CdapOpCode::WriteR, 3, Direction::Received),
            Err(ProtocolError::OpcodeMismatch {
                expected: CdapOpCode::Read,
                got: CdapOpCode::WriteR,
                invoke_id: 3,
            })
        );
    }

    #[test]
    fn test_response_direction_matters() {
        let mut tables = PendingTables::new();
        tables.apply_request(CdapOpCode::Read, 3, Direction::Sent);

        // we issued the read, so *sending* a M_READ_R for it is an orphan
        assert!(matches!(
            tables.check_response(CdapOpCode::ReadR, 3, Direction::Sent),
            Err(ProtocolError::OrphanResponse { .. })
        ));
    }

    #[test]
    fn test_incomplete_read_keeps_entry_open() {
        let mut tables = PendingTables::new();
        tables.apply_request(CdapOpCode::Read, 9, Direction::Sent);

        tables.apply_response(
            CdapOpCode::ReadR,
            9,
            Direction::Received,
            CdapFlags::RdIncomplete,
        );
        assert_eq!(tables.sent_len(), 1);

        tables.apply_response(CdapOpCode::ReadR, 9, Direction::Received, CdapFlags::None);
        assert_eq!(tables.sent_len(), 0);
    }

    #[test]
    fn test_cancel_read_requires_matching_read() {
        let mut tables = PendingTables::new();

        assert!(matches!(
            tables.check_cancel_read(9, Direction::Sent),
            Err(ProtocolError::OrphanResponse { .. })
        ));

        tables.apply_request(CdapOpCode::Write, 9, Direction::Sent);
        assert!(matches!(
            tables.check_cancel_read(9, Direction::Sent),
            Err(ProtocolError::OpcodeMismatch { .. })
        ));

        let mut tables = PendingTables::new();
        tables.apply_request(CdapOpCode::Read, 9, Direction::Sent);
        assert!(tables.check_cancel_read(9, Direction::Sent).is_ok());
        // the read belongs to us, the peer cannot cancel it
        assert!(tables.check_cancel_read(9, Direction::Received).is_err());
    }

    #[test]
    fn test_cancel_read_race() {
        let mut tables = PendingTables::new();
        tables.apply_request(CdapOpCode::Read, 9, Direction::Sent);

        // incomplete instalment arrives, then we cancel
        tables.apply_response(
            CdapOpCode::ReadR,
            9,
            Direction::Received,
            CdapFlags::RdIncomplete,
        );
        tables.check_cancel_read(9, Direction::Sent).unwrap();
        tables.apply_cancel_read(9, Direction::Sent);
        assert_eq!(tables.cancel_read_len(), 1);

        // peer acknowledges the cancel
        tables
            .check_cancel_read_response(9, Direction::Received)
            .unwrap();
        tables.apply_cancel_read_response(9);
        assert_eq!(tables.cancel_read_len(), 0);
        assert_eq!(tables.sent_len(), 1);

        // the final (post-cancel) read response still pairs up
        tables
            .check_response(CdapOpCode::ReadR, 9, Direction::Received)
            .unwrap();
        tables.apply_response(CdapOpCode::ReadR, 9, Direction::Received, CdapFlags::None);
        assert_eq!(tables.sent_len(), 0);
    }

    #[test]
    fn test_drain_returns_everything_outstanding() {
        let mut tables = PendingTables::new();
        tables.apply_request(CdapOpCode::Read, 1, Direction::Sent);
        tables.apply_request(CdapOpCode::Write, 2, Direction::Received);
        tables.apply_cancel_read(1, Direction::Sent);

        let drained = tables.drain();
        assert_eq!(drained.len(), 3);
        assert_eq!(tables.sent_len() + tables.received_len() + tables.cancel_read_len(), 0);
    }
}
