// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Reader loop: one thread per registered Participant, consuming its own
// publish-signal and dispatching callbacks on its own thread, never the
// publisher's.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use log::warn;

use crate::channel_name::ChannelNames;
use crate::payload::Codec;
use crate::wait_object::{WaitKind, WaitObject};
use crate::ShmHandle;

pub(crate) type CallbackList<V> = Arc<Mutex<Vec<Box<dyn Fn(&V) + Send + 'static>>>>;

/// Owns the running reader thread for one registered slot. Dropping it
/// does not stop the thread; callers must call [`ReaderHandle::stop`]
/// first (Unregister does this explicitly under the Registration Lock).
pub(crate) struct ReaderHandle {
    running: Arc<AtomicBool>,
    own_publish: Arc<WaitObject>,
    thread: Option<JoinHandle<()>>,
}

impl ReaderHandle {
    pub(crate) fn spawn<C: Codec>(
        names: ChannelNames,
        slot_id: u32,
        payload_shm: Arc<ShmHandle>,
        own_publish: Arc<WaitObject>,
        callbacks: CallbackList<C::Value>,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let thread_publish = Arc::clone(&own_publish);

        let thread = std::thread::Builder::new()
            .name(format!("eventbus-reader-{slot_id}"))
            .spawn(move || {
                reader_loop::<C>(names, slot_id, payload_shm, thread_publish, thread_running, callbacks);
            })
            .expect("failed to spawn reader thread");

        Self {
            running,
            own_publish,
            thread: Some(thread),
        }
    }

    /// Clear the running flag, wake the reader out of its wait, and join it.
    pub(crate) fn stop(mut self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.own_publish.set();
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

fn reader_loop<C: Codec>(
    names: ChannelNames,
    slot_id: u32,
    payload_shm: Arc<ShmHandle>,
    own_publish: Arc<WaitObject>,
    running: Arc<AtomicBool>,
    callbacks: CallbackList<C::Value>,
) {
    while running.load(Ordering::SeqCst) {
        if own_publish.wait().is_err() {
            break;
        }
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let value = {
            let buf = unsafe { std::slice::from_raw_parts(payload_shm.as_ptr(), payload_shm.user_size()) };
            C::deserialize(buf)
        };

        let handlers = callbacks.lock().unwrap();
        for cb in handlers.iter() {
            let outcome = catch_unwind(AssertUnwindSafe(|| cb(&value)));
            if outcome.is_err() {
                warn!("event callback panicked on slot {slot_id}, continuing with remaining callbacks");
            }
        }
        drop(handlers);

        let read_name = names.read_complete_signal(slot_id);
        if let Ok(Some(read_complete)) = WaitObject::open(&read_name, WaitKind::ManualReset) {
            let _ = read_complete.set();
        }
    }
}
