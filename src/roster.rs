// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Slot-id list held in the Roster Segment: a 32-bit little-endian count
// followed by that many ascending 32-bit little-endian slot ids. Callers
// always hold the Registration Lock around these functions; none of them
// do their own locking.

use crate::ShmHandle;

/// Bytes needed for a roster segment sized for `max_listeners` slots.
pub fn segment_size(max_listeners: u32) -> usize {
    4 + 4 * max_listeners as usize
}

/// Decode the current slot-id list out of the roster segment.
pub fn read_slot_ids(shm: &ShmHandle) -> Vec<u32> {
    let buf = unsafe { std::slice::from_raw_parts(shm.as_ptr(), shm.user_size()) };
    if buf.len() < 4 {
        return Vec::new();
    }
    let max_slots = (buf.len() - 4) / 4;
    let count = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    let count = count.min(max_slots);

    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let off = 4 + i * 4;
        ids.push(u32::from_le_bytes(buf[off..off + 4].try_into().unwrap()));
    }
    ids
}

/// Write `ids` (must already be ascending, deduplicated) back into the
/// roster segment, overwriting any previous contents.
pub fn write_slot_ids(shm: &ShmHandle, ids: &[u32]) {
    let buf = unsafe { std::slice::from_raw_parts_mut(shm.as_mut_ptr(), shm.user_size()) };
    debug_assert!(buf.len() >= 4 + 4 * ids.len(), "roster segment too small for slot list");

    buf[0..4].copy_from_slice(&(ids.len() as u32).to_le_bytes());
    for (i, id) in ids.iter().enumerate() {
        let off = 4 + i * 4;
        buf[off..off + 4].copy_from_slice(&id.to_le_bytes());
    }
}

/// Smallest non-negative slot id not present in `ids`. `ids` is assumed
/// sorted ascending and free of duplicates, so this is the first gap (or
/// `ids.len()` if the prefix `0..ids.len()` is fully dense).
pub fn allocate_slot_id(ids: &[u32]) -> u32 {
    for (i, &id) in ids.iter().enumerate() {
        if id != i as u32 {
            return i as u32;
        }
    }
    ids.len() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ShmOpenMode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn temp_roster(max_listeners: u32) -> ShmHandle {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let name = format!("roster_test_{n}_{}", std::process::id());
        ShmHandle::clear_storage(&name);
        ShmHandle::acquire(&name, segment_size(max_listeners), ShmOpenMode::CreateOrOpen).unwrap()
    }

    #[test]
    fn fresh_segment_is_empty() {
        let shm = temp_roster(8);
        assert_eq!(read_slot_ids(&shm), Vec::<u32>::new());
    }

    #[test]
    fn round_trips_an_ascending_list() {
        let shm = temp_roster(8);
        write_slot_ids(&shm, &[0, 1, 3, 7]);
        assert_eq!(read_slot_ids(&shm), vec![0, 1, 3, 7]);
    }

    #[test]
    fn allocate_picks_first_gap() {
        assert_eq!(allocate_slot_id(&[]), 0);
        assert_eq!(allocate_slot_id(&[0, 1, 2]), 3);
        assert_eq!(allocate_slot_id(&[0, 2, 3]), 1);
        assert_eq!(allocate_slot_id(&[1, 2, 3]), 0);
    }
}
