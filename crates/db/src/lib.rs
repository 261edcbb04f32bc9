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

//! The shared multi-process commit log: several independent OS processes read and write the
//! same project concurrently without a database server. Peers exchange commit records through
//! a memory-mapped circular buffer and serialize all access with a cross-process lock; one peer
//! holds "master" and is alone allowed to write the durable project file.
//!
//! Everything in this crate runs while holding the [`process_lock::ProcessLockGuard`] for the
//! project; there is no other synchronization primitive guarding the shared segments.

pub mod codec;
pub mod config;
pub mod liveness;
pub mod log;
pub mod metadata;
pub mod process_lock;
pub mod records;
pub mod segment;
pub mod session;

#[cfg(test)]
mod session_tests;
#[cfg(test)]
pub(crate) mod testing;

pub use config::{CommitLogConfig, METADATA_SEGMENT_SIZE};
pub use metadata::{CommitLogMetadata, CommitLogPeer};
pub use records::CommitLogRecord;
pub use session::{CommitLogSession, SessionCollaborators};
