// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Joins a named channel and prints every transaction-range event it
// receives until interrupted.
//
// Usage:
//   demo_listen <channel>

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use eventbus::{Participant, TransactionEvent, TransactionEventCodec};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("usage: demo_listen <channel>");
        std::process::exit(1);
    }
    let channel = &args[1];

    env_logger::init();

    let quit = Arc::new(AtomicBool::new(false));
    {
        let q = Arc::clone(&quit);
        ctrlc_or_sigterm(move || q.store(true, Ordering::Release));
    }

    let participant = Participant::<TransactionEventCodec>::join(channel).expect("join channel");
    println!("listen: joined {channel} as slot {:?}", participant.slot_id());

    participant.register_callback(|event: &TransactionEvent| {
        println!(
            "listen: {:?} range [{}, {}) start_exclusive={} end_exclusive={}",
            event.kind, event.start_date, event.end_date, event.start_exclusive, event.end_exclusive
        );
    });

    while !quit.load(Ordering::Acquire) {
        thread::sleep(Duration::from_millis(200));
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
