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

use std::path::PathBuf;

/// Size of the metadata segment: one small page holding the single length-prefixed
/// `CommitLogMetadata` record.
pub const METADATA_SEGMENT_SIZE: usize = 4096;

/// Default capacity of the commit log segment.
pub const DEFAULT_LOG_SEGMENT_SIZE: usize = 1 << 20;

#[derive(Clone, Debug)]
pub struct CommitLogConfig {
    /// Capacity in bytes of the circular commit log segment. Records that cannot fit are
    /// refused (see the log-exhaustion rules in `session`).
    pub log_segment_size: usize,
    /// Directory for segment backing files. When `None`, `/dev/shm` is used if present,
    /// falling back to the system temp directory.
    pub shared_dir: Option<PathBuf>,
    /// The schema version this process's object model code speaks.
    pub model_version: u32,
    /// The schema version the project file had when this process opened it. While these two
    /// differ the project is mid-migration and the master must not touch the durable file.
    pub startup_version: u32,
}

impl Default for CommitLogConfig {
    fn default() -> Self {
        Self {
            log_segment_size: DEFAULT_LOG_SEGMENT_SIZE,
            shared_dir: None,
            model_version: 1,
            startup_version: 1,
        }
    }
}
