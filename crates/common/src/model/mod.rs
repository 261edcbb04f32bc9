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

pub use crate::model::applier::DurableFileApplier;
pub use crate::model::changes::{Blob, ChangeSet, ForeignChanges, ObjectId, PeerId};
pub use crate::model::reconcile::{Reconciler, ReconcilerFactory};
pub use crate::model::surrogate::{ObjectSurrogateFactory, SurrogateInfo, SurrogateRegistry};
use thiserror::Error;

mod applier;
mod changes;
mod reconcile;
mod surrogate;

/// The result code from a commit attempt against the shared commit log.
#[derive(Debug, Eq, PartialEq)]
pub enum CommitResult {
    /// The change set was appended to the log (and, for the master, applied to the durable file).
    Success,
    /// Foreign changes collided with locally pending edits; nothing was appended. The caller
    /// should re-derive its pending edits on top of the absorbed foreign state and retry.
    ConflictRetry,
}

/// Errors surfaced by the shared commit log protocol. Stale peers and edit conflicts are *not*
/// errors (the former is reaped silently, the latter is `CommitResult::ConflictRetry`); these are
/// the conditions under which a peer cannot, or must not, proceed.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A non-master peer's record does not fit in the commit log segment. Fatal for the caller:
    /// without a log entry there is no way to make the change durable.
    #[error("Commit log segment exhausted; record of {record_len} bytes cannot be appended")]
    LogExhausted { record_len: usize },

    /// No master exists and the durable file is known to lag the log, so no peer can safely take
    /// over. The last master exited incorrectly; manual intervention required.
    #[error(
        "No master and durable file out of sync with log (file generation {file_generation}, log generation {current_generation})"
    )]
    MasterFileInconsistency {
        current_generation: u64,
        file_generation: u64,
    },

    /// A commit record that should still be present in the log has vanished (e.g. reclaimed
    /// prematurely). The log can no longer be trusted.
    #[error("Missing commit record: log ends at generation {newest}, metadata says {expected}")]
    MissingCommitRecord { expected: u64, newest: u64 },

    /// A metadata or commit record failed to decode.
    #[error("Corrupt shared segment content: {0}")]
    Corrupt(String),

    /// The shared segments could not be created or attached.
    #[error("Cannot create or attach shared segment: {0}")]
    SegmentUnavailable(std::io::Error),

    /// The cross-process lock (or the durable-file master lock) could not be acquired.
    #[error("Cannot acquire cross-process lock: {0}")]
    LockUnavailable(std::io::Error),

    /// A surrogate blob could not be decoded far enough to identify its object.
    #[error("Undecodable object surrogate: {0}")]
    BadSurrogate(String),

    /// The durable file applier failed; the master cannot make the log durable.
    #[error("Durable file apply failed: {0}")]
    ApplyFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
