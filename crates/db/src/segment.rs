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

//! Lifecycle of the two shared memory-mapped regions backing a project: the small metadata
//! segment and the circular commit log segment. Segments are file-backed maps in a
//! shared-memory-like directory so unrelated processes can attach by name; the names are
//! derived deterministically from the project path.

use crate::config::{CommitLogConfig, METADATA_SEGMENT_SIZE};
use lexstore_common::model::StoreError;
use md5::Digest;
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One file-backed shared mapping.
pub struct SharedSegment {
    map: MmapMut,
    path: PathBuf,
    /// Whether this process created the backing file (as opposed to attaching to one left by
    /// another peer). Informational; staleness is decided by peer liveness, not by this flag.
    created: bool,
}

impl SharedSegment {
    fn open_or_create(path: &Path, size: usize) -> Result<Self, StoreError> {
        let created = !path.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(StoreError::SegmentUnavailable)?;
        // A leftover file of the wrong size (e.g. the operator changed the configured log
        // capacity between runs) is resized; liveness-gated metadata reset handles the content.
        file.set_len(size as u64).map_err(StoreError::SegmentUnavailable)?;
        let map = unsafe { MmapMut::map_mut(&file) }.map_err(StoreError::SegmentUnavailable)?;
        debug!(?path, size, created, "mapped shared segment");
        Ok(Self {
            map,
            path: path.to_path_buf(),
            created,
        })
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.map
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.map
    }

    pub fn created(&self) -> bool {
        self.created
    }
}

/// Owns both segments for one project plus the path of the cross-process lock file. Created
/// once per process per project; dropped (and, for the last peer, unlinked) on final detach.
pub struct SharedSegments {
    pub metadata: SharedSegment,
    pub log: SharedSegment,
    lock_path: PathBuf,
}

impl SharedSegments {
    pub fn open_or_create(
        project_path: &Path,
        config: &CommitLogConfig,
    ) -> Result<Self, StoreError> {
        let dir = shared_dir(config);
        let tag = project_tag(project_path);
        let metadata =
            SharedSegment::open_or_create(&dir.join(format!("{tag}.meta")), METADATA_SEGMENT_SIZE)?;
        let log =
            SharedSegment::open_or_create(&dir.join(format!("{tag}.log")), config.log_segment_size)?;
        Ok(Self {
            metadata,
            log,
            lock_path: dir.join(format!("{tag}.lock")),
        })
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Delete the backing files. Called only by the last peer to detach; failure is not fatal
    /// (a later first peer will reset stale content anyway).
    pub fn remove_backing_files(&self) {
        for path in [&self.metadata.path, &self.log.path, &self.lock_path] {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(?path, "could not unlink segment backing file: {e}");
            }
        }
    }
}

/// Where segment backing files live: operator override, else `/dev/shm` when the platform has
/// it, else the system temp directory.
fn shared_dir(config: &CommitLogConfig) -> PathBuf {
    if let Some(dir) = &config.shared_dir {
        return dir.clone();
    }
    let shm = PathBuf::from("/dev/shm");
    if shm.is_dir() { shm } else { std::env::temp_dir() }
}

/// Deterministic per-project resource tag: the file stem for legibility plus a digest of the
/// canonical path so same-named projects in different directories get distinct segments.
fn project_tag(project_path: &Path) -> String {
    let canonical = project_path
        .canonicalize()
        .unwrap_or_else(|_| project_path.to_path_buf());
    let digest = format!("{:x}", md5::Md5::digest(canonical.as_os_str().as_encoded_bytes()));
    let stem = project_path
        .file_stem()
        .map(|s| s.to_string_lossy().replace(['/', '\\', ' '], "_"))
        .unwrap_or_else(|| "project".into());
    format!("lexstore-{stem}-{}", &digest[..8])
}
