// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Error kinds surfaced to callers. Emit, Unregister and Destroy never
// surface errors to the caller (they are best-effort / idempotent); only
// Join/Register can fail.

use std::io;

use thiserror::Error;

/// Errors a [`crate::Participant`] can report to its caller.
#[derive(Debug, Error)]
pub enum BusError {
    /// The roster was already at `MaxListeners` on Register.
    #[error("roster is full")]
    CapacityExhausted,

    /// A freshly allocated SlotId's wait objects were already claimed by a
    /// concurrent registrant reading the same roster snapshot.
    #[error("slot {0} was claimed by a concurrent registrant")]
    SlotCollision(u32),

    /// The Registration Lock, Roster Segment or Payload Segment could not
    /// be opened or created.
    #[error("shared infrastructure unavailable: {0}")]
    InfrastructureUnavailable(#[source] io::Error),
}

impl From<io::Error> for BusError {
    fn from(e: io::Error) -> Self {
        BusError::InfrastructureUnavailable(e)
    }
}

pub type BusResult<T> = Result<T, BusError>;
