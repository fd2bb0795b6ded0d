// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Integration tests for the Join/Register/Emit/Leave lifecycle, driven
// entirely through the public Participant API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use eventbus::{BusError, ChannelConfig, EventKind, Participant, TransactionEvent, TransactionEventCodec};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_channel(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{n}_{}", std::process::id())
}

fn event(n: i64) -> TransactionEvent {
    TransactionEvent {
        kind: EventKind::Added,
        start_date: n,
        start_exclusive: false,
        end_date: n + 1,
        end_exclusive: true,
    }
}

// ========== Basic fan-out ==========

#[test]
fn solo_echo() {
    let name = unique_channel("solo_echo");
    let p = Participant::<TransactionEventCodec>::join(&name).expect("join");

    let (tx, rx) = mpsc::channel();
    p.register_callback(move |ev: &TransactionEvent| tx.send(*ev).unwrap());

    p.emit(&event(1), false);

    let received = rx.recv_timeout(Duration::from_secs(2)).expect("callback should fire");
    assert_eq!(received, event(1));
}

#[test]
fn multi_listener_fan_out() {
    let name = unique_channel("fan_out");
    let publisher = Participant::<TransactionEventCodec>::join(&name).expect("join publisher");

    let num_listeners = 4;
    let mut receivers = Vec::new();
    let mut listeners = Vec::new();
    for _ in 0..num_listeners {
        let l = Participant::<TransactionEventCodec>::join(&name).expect("join listener");
        let (tx, rx) = mpsc::channel();
        l.register_callback(move |ev: &TransactionEvent| tx.send(*ev).unwrap());
        listeners.push(l);
        receivers.push(rx);
    }

    publisher.emit(&event(7), false);

    for rx in receivers {
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).expect("listener should receive"), event(7));
    }
}

// ========== Self-suppression ==========

#[test]
fn self_suppression_skips_own_callbacks() {
    let name = unique_channel("self_suppress");
    let p = Participant::<TransactionEventCodec>::join(&name).expect("join");

    let (tx, rx) = mpsc::channel::<()>();
    p.register_callback(move |_ev: &TransactionEvent| tx.send(()).unwrap());

    p.emit(&event(1), true);

    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err(), "suppressed emit must not invoke own callback");
}

// A publisher that suppresses itself on every emit is the primary use of
// suppress_self (it emits events it never wants to handle); a second and
// third suppressed emit must not hang.
#[test]
fn repeated_self_suppressed_emits_do_not_hang() {
    let name = unique_channel("self_suppress_repeat");
    let p = Participant::<TransactionEventCodec>::join(&name).expect("join");

    for i in 0..5 {
        p.emit(&event(i), true);
    }
}

// ========== Ordering ==========

#[test]
fn sequential_emits_are_delivered_in_order() {
    let name = unique_channel("ordering");
    let publisher = Participant::<TransactionEventCodec>::join(&name).expect("join publisher");
    let listener = Participant::<TransactionEventCodec>::join(&name).expect("join listener");

    let received = Arc::new(Mutex::new(Vec::new()));
    let received2 = Arc::clone(&received);
    listener.register_callback(move |ev: &TransactionEvent| {
        received2.lock().unwrap().push(ev.start_date);
    });

    for i in 0..5 {
        publisher.emit(&event(i), false);
    }

    // Each emit blocks on the prior one's read-complete-signal before
    // overwriting the payload, so delivery order must match emit order.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    loop {
        if received.lock().unwrap().len() >= 5 || std::time::Instant::now() >= deadline {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }

    assert_eq!(*received.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

// ========== Capacity ==========

#[test]
fn capacity_exhausted_on_full_roster() {
    let name = unique_channel("capacity");
    let config = ChannelConfig::new(2);

    let a = Participant::<TransactionEventCodec>::join_with_config(&name, config.clone()).expect("join a");
    let b = Participant::<TransactionEventCodec>::join_with_config(&name, config.clone()).expect("join b");

    let c = Participant::<TransactionEventCodec>::with_config(&name, config).expect("open c");
    let err = c.register().expect_err("third participant should not fit");
    assert!(matches!(err, BusError::CapacityExhausted));

    drop(a);
    drop(b);
}

// ========== Leave and rejoin ==========

#[test]
fn slot_freed_on_leave_is_reusable() {
    let name = unique_channel("leave_rejoin");
    let config = ChannelConfig::new(2);

    let a = Participant::<TransactionEventCodec>::join_with_config(&name, config.clone()).expect("join a");
    let b = Participant::<TransactionEventCodec>::join_with_config(&name, config.clone()).expect("join b");
    drop(b);

    let c = Participant::<TransactionEventCodec>::join_with_config(&name, config).expect("join c after leave");
    assert!(c.is_registered());
    drop(a);
    drop(c);
}

// ========== Crash tolerance ==========

// Liveness is PID-based (see wait_object.rs), so this has to be a real
// process death to mean anything: a forgotten handle in the same process
// leaves owner_pid pointing at a pid that is still alive.
#[cfg(unix)]
#[test]
fn crashed_peer_frees_its_slot_for_a_new_participant() {
    let name = unique_channel("crash_evict");
    let config = ChannelConfig::new(2);
    let a = Participant::<TransactionEventCodec>::join_with_config(&name, config.clone()).expect("join a");

    let child_pid = unsafe { libc::fork() };
    assert!(child_pid >= 0, "fork failed");
    if child_pid == 0 {
        let b = Participant::<TransactionEventCodec>::join_with_config(&name, config.clone()).expect("join b in child");
        std::mem::forget(b);
        unsafe { libc::_exit(0) };
    }

    let mut status = 0i32;
    unsafe { libc::waitpid(child_pid, &mut status, 0) };

    // The roster still lists the crashed peer until an emit prunes it.
    let full = Participant::<TransactionEventCodec>::with_config(&name, config.clone()).expect("open full");
    assert!(matches!(full.register(), Err(BusError::CapacityExhausted)));

    a.emit(&event(0), false);

    let c = Participant::<TransactionEventCodec>::join_with_config(&name, config).expect("join c after eviction");
    assert!(c.is_registered());
    drop(a);
    drop(c);
}
