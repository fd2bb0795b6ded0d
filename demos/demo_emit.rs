// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Emits transaction-range events onto a named channel at a fixed interval
// until interrupted.
//
// Usage:
//   demo_emit <channel> <interval_ms>

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use eventbus::{EventKind, Participant, TransactionEvent, TransactionEventCodec};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("usage: demo_emit <channel> <interval_ms>");
        std::process::exit(1);
    }
    let channel = &args[1];
    let interval: u64 = args[2].parse().expect("interval_ms");

    env_logger::init();

    let quit = Arc::new(AtomicBool::new(false));
    {
        let q = Arc::clone(&quit);
        ctrlc_or_sigterm(move || q.store(true, Ordering::Release));
    }

    let participant = Participant::<TransactionEventCodec>::join(channel).expect("join channel");
    println!("emit: joined {channel} as slot {:?}", participant.slot_id());

    let mut n: i64 = 0;
    while !quit.load(Ordering::Acquire) {
        let event = TransactionEvent {
            kind: EventKind::Added,
            start_date: n,
            start_exclusive: false,
            end_date: n + 1,
            end_exclusive: true,
        };
        participant.emit(&event, false);
        println!("emit: sent range [{}, {})", event.start_date, event.end_date);
        n += 1;
        thread::sleep(Duration::from_millis(interval));
    }
}

fn ctrlc_or_sigterm(f: impl Fn() + Send + 'static) {
    #[cfg(unix)]
    {
        use std::sync::Mutex;
        static CB: std::sync::OnceLock<Mutex<Box<dyn Fn() + Send>>> = std::sync::OnceLock::new();
        CB.get_or_init(|| Mutex::new(Box::new(f)));
        extern "C" fn handler(_: libc::c_int) {
            if let Some(cb) = CB.get() {
                if let Ok(g) = cb.lock() {
                    g();
                }
            }
        }
        unsafe {
            libc::signal(libc::SIGINT, handler as *const () as libc::sighandler_t);
            libc::signal(libc::SIGTERM, handler as *const () as libc::sighandler_t);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = f;
    }
}
