// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Payload Segment codec. The protocol in publisher.rs/listener.rs is
// generic over any Codec; TransactionEventCodec is the concrete reference
// schema from the external interfaces table, kept for wire compatibility
// with existing deployments.

/// Converts a value to and from the flat byte image stored in the Payload
/// Segment. Implementations carry no state of their own: they describe a
/// wire layout, not an instance, so a `Participant<C>` can be built purely
/// from the type `C`.
pub trait Codec {
    type Value: Clone + Send + 'static;

    /// Size in bytes of the Payload Segment this codec requires.
    fn fixed_size() -> usize;

    /// Encode `value` into `out`. `out.len() == fixed_size()`.
    fn serialize(value: &Self::Value, out: &mut [u8]);

    /// Decode a value out of `bytes`. `bytes.len() == fixed_size()`.
    fn deserialize(bytes: &[u8]) -> Self::Value;
}

/// `type` field of a [`TransactionEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Added = 0,
    Cleared = 1,
    Removed = 2,
}

impl EventKind {
    fn from_u32(v: u32) -> Self {
        match v {
            0 => EventKind::Added,
            2 => EventKind::Removed,
            // Cleared is the fallback for any value outside {0, 2}: the
            // record is a flat byte image and a corrupt/foreign writer
            // must not be able to produce an EventKind this match can't
            // return.
            _ => EventKind::Cleared,
        }
    }
}

/// The reference payload record from the external interfaces table: a
/// half-open (or closed, via the exclusive flags) date range plus what
/// happened to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionEvent {
    pub kind: EventKind,
    pub start_date: i64,
    pub start_exclusive: bool,
    pub end_date: i64,
    pub end_exclusive: bool,
}

/// Wire size: `type`(4) + `startDate`(8) + `startExclusive`(1) +
/// `endDate`(8) + `endExclusive`(1), no padding.
pub const TRANSACTION_EVENT_WIRE_SIZE: usize = 4 + 8 + 1 + 8 + 1;

/// The default [`Codec`] instantiation, matching the existing deployment's
/// on-wire layout byte for byte.
pub struct TransactionEventCodec;

impl Codec for TransactionEventCodec {
    type Value = TransactionEvent;

    fn fixed_size() -> usize {
        TRANSACTION_EVENT_WIRE_SIZE
    }

    fn serialize(value: &TransactionEvent, out: &mut [u8]) {
        debug_assert!(out.len() >= TRANSACTION_EVENT_WIRE_SIZE);
        out[0..4].copy_from_slice(&(value.kind as u32).to_le_bytes());
        out[4..12].copy_from_slice(&value.start_date.to_le_bytes());
        out[12] = value.start_exclusive as u8;
        out[13..21].copy_from_slice(&value.end_date.to_le_bytes());
        out[21] = value.end_exclusive as u8;
    }

    fn deserialize(bytes: &[u8]) -> TransactionEvent {
        debug_assert!(bytes.len() >= TRANSACTION_EVENT_WIRE_SIZE);
        let kind = EventKind::from_u32(u32::from_le_bytes(bytes[0..4].try_into().unwrap()));
        let start_date = i64::from_le_bytes(bytes[4..12].try_into().unwrap());
        let start_exclusive = bytes[12] != 0;
        let end_date = i64::from_le_bytes(bytes[13..21].try_into().unwrap());
        let end_exclusive = bytes[21] != 0;
        TransactionEvent {
            kind,
            start_date,
            start_exclusive,
            end_date,
            end_exclusive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_kind() {
        for kind in [EventKind::Added, EventKind::Cleared, EventKind::Removed] {
            let ev = TransactionEvent {
                kind,
                start_date: 1,
                start_exclusive: false,
                end_date: 2,
                end_exclusive: true,
            };
            let mut buf = [0u8; TRANSACTION_EVENT_WIRE_SIZE];
            TransactionEventCodec::serialize(&ev, &mut buf);
            assert_eq!(TransactionEventCodec::deserialize(&buf), ev);
        }
    }

    #[test]
    fn fixed_size_matches_external_interface_table() {
        assert_eq!(TransactionEventCodec::fixed_size(), 22);
    }
}
