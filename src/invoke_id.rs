// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! Invoke-id allocation
//!
//! Invoke ids correlate a request with its response within one direction
//! of a session. The sent and received sets are disjoint: the same id may
//! be in flight in both directions at once. The allocator always hands
//! out the smallest unused positive id.

use crate::error::CdapError;
use std::collections::BTreeSet;
use std::sync::Mutex;

/// Direction of a message relative to this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

impl Direction {
    /// The opposite direction; responses free the id their request
    /// reserved on the other side of the exchange.
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Sent => Direction::Received,
            Direction::Received => Direction::Sent,
        }
    }
}

#[derive(Debug, Default)]
struct Sets {
    sent: BTreeSet<u32>,
    received: BTreeSet<u32>,
}

impl Sets {
    fn for_direction(&mut self, direction: Direction) -> &mut BTreeSet<u32> {
        match direction {
            Direction::Sent => &mut self.sent,
            Direction::Received => &mut self.received,
        }
    }
}

/// Mints, reserves and frees invoke ids. Shared by every session of a
/// session manager; all three operations are mutually excluded.
#[derive(Debug, Default)]
pub struct InvokeIdAllocator {
    sets: Mutex<Sets>,
}

impl InvokeIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the smallest positive id not currently in use in
    /// `direction` and marks it used.
    pub fn new_invoke_id(&self, direction: Direction) -> Result<u32, CdapError> {
        let mut sets = self.sets.lock().unwrap();
        let set = sets.for_direction(direction);

        let mut candidate: u32 = 1;
        for &used in set.iter() {
            if used != candidate {
                break;
            }
            candidate = candidate.checked_add(1).ok_or_else(|| {
                CdapError::ResourceExhausted("invoke id space".to_string())
            })?;
        }
        set.insert(candidate);
        Ok(candidate)
    }

    /// Removes `invoke_id` from the direction's set. A no-op when the id
    /// is not present.
    pub fn free_invoke_id(&self, invoke_id: u32, direction: Direction) {
        let mut sets = self.sets.lock().unwrap();
        sets.for_direction(direction).remove(&invoke_id);
    }

    /// Marks a peer-supplied id as used, unconditionally.
    pub fn reserve_invoke_id(&self, invoke_id: u32, direction: Direction) {
        let mut sets = self.sets.lock().unwrap();
        sets.for_direction(direction).insert(invoke_id);
    }

    /// True when `invoke_id` is currently in use in `direction`.
    pub fn is_in_use(&self, invoke_id: u32, direction: Direction) -> bool {
        let mut sets = self.sets.lock().unwrap();
        sets.for_direction(direction).contains(&invoke_id)
    }

    /// Number of ids in flight in `direction`.
    pub fn in_flight(&self, direction: Direction) -> usize {
        let mut sets = self.sets.lock().unwrap();
        sets.for_direction(direction).len()
    }
}
