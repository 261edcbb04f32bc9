// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The single cross-process mutex serializing all access to the shared segments and the
//! durable file. An OS advisory file lock rather than an in-process primitive: the kernel
//! releases it when the holder dies, so a crashed peer cannot wedge the other peers out.

use fs2::FileExt;
use lexstore_common::model::StoreError;
use std::fs::{File, OpenOptions};
use std::path::Path;

pub struct ProcessLock {
    file: File,
}

impl ProcessLock {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(StoreError::LockUnavailable)?;
        Ok(Self { file })
    }

    /// Block until exclusive ownership is acquired. No timeout; see the concurrency notes in
    /// the crate docs. The guard owns a duplicated handle to the same open file description,
    /// so it does not tie up a borrow of the lock (or its owner) while held.
    pub fn lock(&self) -> Result<ProcessLockGuard, StoreError> {
        let file = self.file.try_clone().map_err(StoreError::LockUnavailable)?;
        file.lock_exclusive().map_err(StoreError::LockUnavailable)?;
        Ok(ProcessLockGuard { file })
    }
}

/// Held for the duration of every metadata/log read-modify-write. Unlocks on drop, on every
/// exit path.
pub struct ProcessLockGuard {
    file: File,
}

impl Drop for ProcessLockGuard {
    fn drop(&mut self) {
        // Unlock on a held flock does not fail in practice; if it somehow does, the OS still
        // releases the lock when the last handle to the description closes.
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
