// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Host-global named mutex with scoped acquisition.
// Port of original_source/GlobalMutex.h + GlobalMutex.cpp, built on the
// kept IpcMutex primitive rather than reimplementing the platform mutex.

use std::io;

use crate::IpcMutex;

/// The Registration Lock: a host-global named mutex serializing all roster
/// changes and emits for one channel.
pub struct RegistrationLock {
    mtx: IpcMutex,
}

impl RegistrationLock {
    pub fn open(os_name: &str) -> io::Result<Self> {
        let mtx = IpcMutex::open(os_name)?;
        Ok(Self { mtx })
    }

    /// Acquire the lock, returning a guard that releases it on drop —
    /// including on every early-return and panic-unwind exit path.
    pub fn lock(&self) -> io::Result<RegistrationLockGuard<'_>> {
        self.mtx.lock()?;
        Ok(RegistrationLockGuard { mtx: &self.mtx })
    }
}

pub struct RegistrationLockGuard<'a> {
    mtx: &'a IpcMutex,
}

impl Drop for RegistrationLockGuard<'_> {
    fn drop(&mut self) {
        let _ = self.mtx.unlock();
    }
}
