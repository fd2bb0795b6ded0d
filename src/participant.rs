// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Participant lifecycle: joining, leaving, crash-tolerant cleanup, and the
// public Join/Emit/Leave surface applications use.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{info, warn};

use crate::channel_name::ChannelNames;
use crate::error::{BusError, BusResult};
use crate::listener::{CallbackList, ReaderHandle};
use crate::payload::Codec;
use crate::publisher;
use crate::registration_lock::RegistrationLock;
use crate::roster;
use crate::wait_object::{WaitKind, WaitObject};
use crate::{ShmHandle, ShmOpenMode};

/// Default capacity when a caller does not pick one explicitly.
pub const DEFAULT_MAX_LISTENERS: u32 = 1024;

/// Per-channel tuning. `read_timeout` and `max_register_retries` are
/// reimplementation enrichments with defaults that preserve the original
/// unbounded, non-retrying behavior.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Roster capacity, fixed for the lifetime of the channel.
    pub max_listeners: u32,
    /// Bound on how long Emit waits for one live peer's read-complete
    /// signal before evicting it. `None` preserves the original unbounded
    /// wait.
    pub read_timeout: Option<Duration>,
    /// How many times Join retries SlotId allocation after a SlotCollision
    /// before surfacing the error to the caller.
    pub max_register_retries: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_listeners: DEFAULT_MAX_LISTENERS,
            read_timeout: None,
            max_register_retries: 4,
        }
    }
}

impl ChannelConfig {
    pub fn new(max_listeners: u32) -> Self {
        Self {
            max_listeners,
            ..Self::default()
        }
    }
}

struct RegisteredState {
    slot_id: u32,
    own_publish: Arc<WaitObject>,
    own_read_complete: WaitObject,
    reader: Option<ReaderHandle>,
}

/// One process's attachment to a named channel.
pub struct Participant<C: Codec> {
    names: ChannelNames,
    lock: RegistrationLock,
    roster_shm: ShmHandle,
    payload_shm: Arc<ShmHandle>,
    config: ChannelConfig,
    state: Mutex<Option<RegisteredState>>,
    callbacks: CallbackList<C::Value>,
    disposed: AtomicBool,
    _codec: PhantomData<C>,
}

impl<C: Codec> Participant<C> {
    /// Open or create the shared infrastructure for `channel_name` with
    /// default configuration, without registering.
    pub fn new(channel_name: &str) -> BusResult<Self> {
        Self::with_config(channel_name, ChannelConfig::default())
    }

    pub fn with_config(channel_name: &str, config: ChannelConfig) -> BusResult<Self> {
        let names = ChannelNames::new(channel_name);
        let lock = RegistrationLock::open(&names.registration_lock())?;
        let roster_shm = ShmHandle::acquire(
            &names.roster_segment(),
            roster::segment_size(config.max_listeners),
            ShmOpenMode::CreateOrOpen,
        )?;
        let payload_shm = Arc::new(ShmHandle::acquire(
            &names.payload_segment(),
            C::fixed_size(),
            ShmOpenMode::CreateOrOpen,
        )?);

        Ok(Self {
            names,
            lock,
            roster_shm,
            payload_shm,
            config,
            state: Mutex::new(None),
            callbacks: Arc::new(Mutex::new(Vec::new())),
            disposed: AtomicBool::new(false),
            _codec: PhantomData,
        })
    }

    /// Create a Participant and immediately join the channel.
    pub fn join(channel_name: &str) -> BusResult<Self> {
        let p = Self::new(channel_name)?;
        p.register()?;
        Ok(p)
    }

    pub fn join_with_config(channel_name: &str, config: ChannelConfig) -> BusResult<Self> {
        let p = Self::with_config(channel_name, config)?;
        p.register()?;
        Ok(p)
    }

    /// Install a callback invoked on the reader thread for every event
    /// this participant receives (subject to `suppress_self` on the
    /// emitting side).
    pub fn register_callback<F>(&self, callback: F)
    where
        F: Fn(&C::Value) + Send + 'static,
    {
        self.callbacks.lock().unwrap().push(Box::new(callback));
    }

    pub fn is_registered(&self) -> bool {
        self.state.lock().unwrap().is_some()
    }

    pub fn slot_id(&self) -> Option<u32> {
        self.state.lock().unwrap().as_ref().map(|s| s.slot_id)
    }

    /// Join (register) this channel, allocating a SlotId and starting the
    /// reader thread. Retries on `SlotCollision` up to
    /// `config.max_register_retries` times.
    pub fn register(&self) -> BusResult<()> {
        let mut attempts = 0usize;
        loop {
            match self.try_register() {
                Ok(()) => return Ok(()),
                Err(BusError::SlotCollision(slot)) if attempts < self.config.max_register_retries => {
                    attempts += 1;
                    warn!(
                        "slot {slot} collided on register, retrying ({attempts}/{})",
                        self.config.max_register_retries
                    );
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn try_register(&self) -> BusResult<()> {
        let guard = self.lock.lock()?;

        let mut slots = self.state.lock().unwrap();
        if slots.is_some() {
            return Ok(());
        }

        let mut ids = roster::read_slot_ids(&self.roster_shm);
        if ids.len() as u32 >= self.config.max_listeners {
            return Err(BusError::CapacityExhausted);
        }
        let slot_id = roster::allocate_slot_id(&ids);

        let publish_name = self.names.publish_signal(slot_id);
        let read_name = self.names.read_complete_signal(slot_id);

        let own_publish = match WaitObject::acquire(&publish_name, WaitKind::AutoReset)? {
            Some(wo) => Arc::new(wo),
            None => return Err(BusError::SlotCollision(slot_id)),
        };
        let own_read_complete = match WaitObject::acquire(&read_name, WaitKind::ManualReset)? {
            Some(wo) => wo,
            None => return Err(BusError::SlotCollision(slot_id)),
        };

        // So the first emit after Join does not block waiting on a read
        // that never happened.
        own_read_complete.set()?;

        let reader = ReaderHandle::spawn::<C>(
            self.names.clone(),
            slot_id,
            Arc::clone(&self.payload_shm),
            Arc::clone(&own_publish),
            Arc::clone(&self.callbacks),
        );

        let pos = ids.binary_search(&slot_id).unwrap_err();
        ids.insert(pos, slot_id);
        roster::write_slot_ids(&self.roster_shm, &ids);

        *slots = Some(RegisteredState {
            slot_id,
            own_publish,
            own_read_complete,
            reader: Some(reader),
        });
        drop(slots);
        drop(guard);

        info!("registered on slot {slot_id}");
        Ok(())
    }

    /// Unregister, stopping the reader and releasing this participant's
    /// own wait objects. A no-op if not currently registered.
    pub fn unregister(&self) {
        let guard = match self.lock.lock() {
            Ok(g) => g,
            Err(_) => return,
        };

        let mut slots = self.state.lock().unwrap();
        let Some(mut registered) = slots.take() else {
            return;
        };
        drop(slots);

        let mut ids = roster::read_slot_ids(&self.roster_shm);
        if let Ok(pos) = ids.binary_search(&registered.slot_id) {
            ids.remove(pos);
            roster::write_slot_ids(&self.roster_shm, &ids);
        }

        if let Some(reader) = registered.reader.take() {
            reader.stop();
        }

        info!("unregistered slot {}", registered.slot_id);
        // registered.own_publish and registered.own_read_complete drop
        // here, clearing their shared ownership marker.
        drop(guard);
    }

    /// Broadcast `message` to every currently-registered participant.
    /// `suppress_self` skips waking this participant's own reader if it
    /// is registered.
    pub fn emit(&self, message: &C::Value, suppress_self: bool) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let own_slot = self.slot_id();
        publisher::emit::<C>(
            &self.names,
            &self.lock,
            &self.roster_shm,
            &self.payload_shm,
            own_slot,
            suppress_self,
            message,
            self.config.read_timeout,
        );
    }
}

impl<C: Codec> Drop for Participant<C> {
    fn drop(&mut self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.unregister();
    }
}

