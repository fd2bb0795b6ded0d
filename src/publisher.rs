// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Emit protocol: lock, drain reads, write payload, notify, evict dead.
// The whole algorithm runs under the Registration Lock, held for the
// duration of one emit.

use std::time::Duration;

use log::debug;

use crate::channel_name::ChannelNames;
use crate::payload::Codec;
use crate::registration_lock::RegistrationLock;
use crate::roster;
use crate::wait_object::{WaitKind, WaitObject};
use crate::ShmHandle;

struct PeerSlot {
    id: u32,
    read_complete: Option<WaitObject>,
    dead: bool,
}

/// Broadcast `message` to every currently-registered participant.
///
/// `own_slot` identifies the caller if it is itself registered;
/// `suppress_self` skips waking that slot's reader. `read_timeout`, when
/// set, bounds how long the emit waits on any single live peer's
/// read-complete-signal before evicting it.
pub(crate) fn emit<C: Codec>(
    names: &ChannelNames,
    lock: &RegistrationLock,
    roster_shm: &ShmHandle,
    payload_shm: &ShmHandle,
    own_slot: Option<u32>,
    suppress_self: bool,
    message: &C::Value,
    read_timeout: Option<Duration>,
) {
    let guard = match lock.lock() {
        Ok(g) => g,
        Err(_) => return,
    };

    let ids = roster::read_slot_ids(roster_shm);

    // Step 2: open every slot's read-complete-signal; absent ones are
    // already-dead peers.
    let mut peers: Vec<PeerSlot> = ids
        .into_iter()
        .map(|id| {
            let read_name = names.read_complete_signal(id);
            match WaitObject::open(&read_name, WaitKind::ManualReset) {
                Ok(Some(wo)) => PeerSlot {
                    id,
                    read_complete: Some(wo),
                    dead: false,
                },
                _ => PeerSlot {
                    id,
                    read_complete: None,
                    dead: true,
                },
            }
        })
        .collect();

    // Step 3: wait for every live peer's read-complete-signal, so this
    // emit never overwrites a payload a prior emit's listener hasn't
    // consumed yet.
    for peer in &mut peers {
        let Some(read) = &peer.read_complete else { continue };
        let signaled = match read_timeout {
            Some(timeout) => read.wait_timeout(timeout).unwrap_or(false),
            None => read.wait().is_ok(),
        };
        if !signaled {
            debug!("slot {} did not complete its read in time, evicting", peer.id);
            peer.dead = true;
        }
    }

    // Step 4: write the payload.
    {
        let buf = unsafe { std::slice::from_raw_parts_mut(payload_shm.as_mut_ptr(), payload_shm.user_size()) };
        C::serialize(message, buf);
    }

    // Step 5: wake every live, non-suppressed peer.
    for peer in &mut peers {
        if peer.dead {
            continue;
        }
        if suppress_self && Some(peer.id) == own_slot {
            // Leave the read-complete-signal signaled rather than resetting
            // it: this slot's own reader is never woken to re-signal it, so
            // resetting here would strand it at 0 and hang every later
            // emit's step-3 wait on this slot.
            continue;
        }

        let publish_name = names.publish_signal(peer.id);
        let publish = match WaitObject::open(&publish_name, WaitKind::AutoReset) {
            Ok(Some(wo)) => wo,
            _ => {
                peer.dead = true;
                continue;
            }
        };

        if let Some(read) = &peer.read_complete {
            let _ = read.reset();
        }
        let _ = publish.set();
    }

    // Step 6: prune dead peers from the roster.
    if peers.iter().any(|p| p.dead) {
        let survivors: Vec<u32> = peers.iter().filter(|p| !p.dead).map(|p| p.id).collect();
        roster::write_slot_ids(roster_shm, &survivors);
    }

    // Step 7: release the Registration Lock.
    drop(guard);
}
