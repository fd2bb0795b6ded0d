// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Cross-process shared event bus: a fixed-capacity roster of participants
// held in shared memory, fanned out to every live listener through a pair
// of per-slot named wait objects, serialized by one host-global named
// mutex.

pub mod shm_name;

mod platform;

mod shm;
pub use shm::{ShmHandle, ShmOpenMode};

mod mutex;
pub use mutex::IpcMutex;

#[cfg(unix)]
mod condition;
#[cfg(unix)]
pub use condition::IpcCondition;

mod channel_name;
pub use channel_name::ChannelNames;

mod registration_lock;
pub use registration_lock::{RegistrationLock, RegistrationLockGuard};

mod wait_object;
pub use wait_object::{WaitKind, WaitObject};

mod roster;

mod payload;
pub use payload::{Codec, EventKind, TransactionEvent, TransactionEventCodec, TRANSACTION_EVENT_WIRE_SIZE};

mod error;
pub use error::{BusError, BusResult};

mod listener;
mod publisher;

mod participant;
pub use participant::{ChannelConfig, Participant, DEFAULT_MAX_LISTENERS};
