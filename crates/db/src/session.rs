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

//! One process's membership in a project's shared commit log: join, commit, drain, shutdown.
//!
//! Every operation here is one hold of the cross-process lock: read metadata, reap dead peers,
//! elect a master if none, absorb not-yet-seen foreign records through the reconciler, then
//! (for a real commit) append the caller's own record and, when this peer is master, apply the
//! merged result to the durable project file.

use crate::config::CommitLogConfig;
use crate::liveness;
use crate::log;
use crate::metadata::{CommitLogMetadata, CommitLogPeer};
use crate::process_lock::ProcessLock;
use crate::records::CommitLogRecord;
use crate::segment::SharedSegments;
use fs2::FileExt;
use lexstore_common::model::{
    Blob, ChangeSet, CommitResult, DurableFileApplier, ForeignChanges, ObjectId,
    ObjectSurrogateFactory, PeerId, ReconcilerFactory, StoreError,
};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// The external components a session drives: the reconciler seam into the live object cache,
/// the durable file writer, and the surrogate peek used to identify opaque blobs.
pub struct SessionCollaborators {
    pub reconciler_factory: Box<dyn ReconcilerFactory>,
    pub applier: Box<dyn DurableFileApplier>,
    pub surrogates: Arc<dyn ObjectSurrogateFactory>,
}

pub struct CommitLogSession {
    peer_id: PeerId,
    project_path: PathBuf,
    config: CommitLogConfig,
    segments: SharedSegments,
    lock: ProcessLock,
    collaborators: SessionCollaborators,
    /// Exclusive advisory lock on the durable file, held for as long as this peer is master.
    master_lock: Option<File>,
    shut_down: bool,
}

impl CommitLogSession {
    /// Join the shared commit log for `project_path`: attach (or create) the segments,
    /// register this process as a peer, and take master if no live master exists.
    pub fn open(
        project_path: &Path,
        config: CommitLogConfig,
        collaborators: SessionCollaborators,
    ) -> Result<Self, StoreError> {
        let segments = SharedSegments::open_or_create(project_path, &config)?;
        let lock = ProcessLock::open(segments.lock_path())?;
        let mut session = Self {
            peer_id: Uuid::new_v4(),
            project_path: project_path.to_path_buf(),
            config,
            segments,
            lock,
            collaborators,
            master_lock: None,
            shut_down: false,
        };
        session.join()?;
        Ok(session)
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// A point-in-time copy of the shared metadata, read under the lock.
    pub fn metadata_snapshot(&self) -> Result<CommitLogMetadata, StoreError> {
        let _guard = self.lock.lock()?;
        self.read_metadata()
    }

    fn join(&mut self) -> Result<(), StoreError> {
        let _guard = self.lock.lock()?;
        let mut md = match CommitLogMetadata::read_from(&self.segments.metadata)? {
            None => {
                info!(peer = %self.peer_id, project = ?self.project_path, "first peer; initializing commit log");
                CommitLogMetadata::default()
            }
            Some(mut md) => {
                liveness::reap_dead_peers(&mut md, &self.peer_id);
                if md.peers.is_empty() {
                    // Leftovers from a run where every peer crashed. Nothing in the log can
                    // matter: the durable file is the only surviving truth.
                    warn!(project = ?self.project_path, "no live peers; discarding stale commit log state");
                    CommitLogMetadata::default()
                } else {
                    md
                }
            }
        };
        // A joining peer has loaded (or will load) the durable file, which reflects
        // `file_generation`; the records after that are absorbed on its first commit/drain.
        md.peers.insert(
            self.peer_id,
            CommitLogPeer {
                process_id: std::process::id(),
                generation: md.file_generation,
            },
        );
        self.ensure_master(&mut md)?;
        md.write_to(&mut self.segments.metadata)?;
        info!(peer = %self.peer_id, peers = md.peers.len(), master = ?md.master, "joined commit log");
        Ok(())
    }

    /// Commit this peer's pending change set. Returns `ConflictRetry` when foreign changes
    /// collide with it (nothing appended, current generation unchanged).
    pub fn commit(&mut self, changes: &ChangeSet) -> Result<CommitResult, StoreError> {
        let _guard = self.lock.lock()?;
        let mut md = self.read_metadata()?;
        liveness::reap_dead_peers(&mut md, &self.peer_id);
        self.ensure_master(&mut md)?;

        let foreign = match self.absorb_foreign(&mut md)? {
            Absorbed::Changes(foreign) => foreign,
            Absorbed::Conflict(foreign) => {
                // The caller's commit is abandoned, but the absorbed foreign work is real: a
                // master must still push it to the durable file or the file would lag the log
                // with no path to catch up.
                if self.should_apply(&md) && !foreign.is_empty() {
                    self.apply_to_durable_file(&foreign, &ChangeSet::default())?;
                    md.file_generation = md.current_generation;
                }
                md.write_to(&mut self.segments.metadata)?;
                return Ok(CommitResult::ConflictRetry);
            }
        };

        let mut new_generation = md.current_generation;
        if !changes.is_empty() {
            new_generation += 1;
            let record = CommitLogRecord {
                source: self.peer_id,
                write_generation: new_generation,
                goners: changes.goners.clone(),
                newbies: changes.newbies.clone(),
                dirtballs: changes.dirtballs.clone(),
            };
            match log::append(&mut self.segments.log, &mut md, &record) {
                Ok(()) => {}
                Err(StoreError::LogExhausted { record_len }) => {
                    if md.master == Some(self.peer_id) {
                        // The master can still make the change durable directly; the record
                        // is dropped and the generation advances without a log entry.
                        warn!(
                            record_len,
                            "commit log exhausted; master dropping log record"
                        );
                    } else {
                        // The foreign records were already reconciled into the live cache;
                        // the absorbed-generation bookkeeping (and any reclamation the scan
                        // did) must survive this error or a retry would re-process them.
                        md.write_to(&mut self.segments.metadata)?;
                        return Err(StoreError::LogExhausted { record_len });
                    }
                }
                Err(e) => return Err(e),
            }
        }

        let applying = self.should_apply(&md) && (!foreign.is_empty() || !changes.is_empty());
        if applying {
            self.apply_to_durable_file(&foreign, changes)?;
        }

        md.current_generation = new_generation;
        if applying {
            md.file_generation = md.current_generation;
        }
        self.own_peer(&mut md)?.generation = new_generation;
        md.write_to(&mut self.segments.metadata)?;
        Ok(CommitResult::Success)
    }

    /// Absorb foreign changes without committing anything of our own. Used by the periodic
    /// background drain; also keeps the durable file current when this peer is master.
    pub fn drain_foreign(&mut self) -> Result<CommitResult, StoreError> {
        self.commit(&ChangeSet::default())
    }

    /// Leave the commit log cleanly: drain (and, as master, apply) pending foreign changes,
    /// deregister, release master, and delete the segments if this was the last peer out.
    pub fn shutdown(&mut self) -> Result<(), StoreError> {
        if self.shut_down {
            return Ok(());
        }
        {
            let _guard = self.lock.lock()?;
            let mut md = self.read_metadata()?;
            liveness::reap_dead_peers(&mut md, &self.peer_id);

            // On conflict the cache is going away anyway; the foreign state supersedes
            // whatever was locally pending, and as master we must still make it durable.
            let foreign = match self.absorb_foreign(&mut md)? {
                Absorbed::Changes(foreign) | Absorbed::Conflict(foreign) => foreign,
            };
            if self.should_apply(&md) && !foreign.is_empty() {
                self.apply_to_durable_file(&foreign, &ChangeSet::default())?;
                md.file_generation = md.current_generation;
            }

            md.peers.shift_remove(&self.peer_id);
            if md.master == Some(self.peer_id) {
                md.master = None;
            }
            let last_one_out = md.peers.is_empty();
            md.write_to(&mut self.segments.metadata)?;
            self.master_lock = None;
            if last_one_out {
                info!(project = ?self.project_path, "last peer detached; removing shared segments");
                self.segments.remove_backing_files();
            }
        }
        self.shut_down = true;
        info!(peer = %self.peer_id, "left commit log");
        Ok(())
    }

    /// Reap-then-elect: when no master remains, the durable file must be known consistent
    /// with the log before anyone may take over.
    fn ensure_master(&mut self, md: &mut CommitLogMetadata) -> Result<(), StoreError> {
        if md.master.is_some() {
            return Ok(());
        }
        if md.file_generation != md.current_generation {
            // The last master exited without applying everything it had accepted. No peer can
            // reconstruct the difference safely.
            return Err(StoreError::MasterFileInconsistency {
                current_generation: md.current_generation,
                file_generation: md.file_generation,
            });
        }
        if self.master_lock.is_none() {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.project_path)
                .map_err(StoreError::LockUnavailable)?;
            file.try_lock_exclusive()
                .map_err(StoreError::LockUnavailable)?;
            self.master_lock = Some(file);
        }
        md.master = Some(self.peer_id);
        info!(peer = %self.peer_id, "elected master");
        Ok(())
    }

    /// Read, order, and reconcile everything other peers have committed since this peer last
    /// looked. On conflict the metadata already carries the absorbed-generation bookkeeping;
    /// the caller persists it and reports `ConflictRetry`.
    fn absorb_foreign(&self, md: &mut CommitLogMetadata) -> Result<Absorbed, StoreError> {
        let unseen = log::read_unseen(&self.segments.log, md, &self.peer_id)?;
        let Some(newest) = unseen.last().map(|r| r.write_generation) else {
            // Nothing unseen. Note a master that dropped a record on log exhaustion leaves a
            // generation with no log entry; an empty scan is not evidence of a gap.
            return Ok(Absorbed::Changes(ForeignChanges::default()));
        };
        if newest < md.current_generation {
            // A record some peer committed is no longer in the log and we never saw it.
            return Err(StoreError::MissingCommitRecord {
                expected: md.current_generation,
                newest,
            });
        }
        let foreign = log::fold_foreign(&unseen, self.collaborators.surrogates.as_ref())?;
        let mut reconciler = self
            .collaborators
            .reconciler_factory
            .create_reconciler(foreign.clone());
        if !reconciler.ok_to_reconcile() {
            reconciler.report_conflict();
            drop(reconciler);
            self.own_peer(md)?.generation = md.current_generation;
            return Ok(Absorbed::Conflict(foreign));
        }
        reconciler.reconcile()?;
        drop(reconciler);
        self.own_peer(md)?.generation = md.current_generation;
        Ok(Absorbed::Changes(foreign))
    }

    /// Whether this peer may touch the durable file: it must hold master *per the metadata
    /// just read under the current lock hold* (never a cached belief), and the schema must not
    /// be mid-migration.
    fn should_apply(&self, md: &CommitLogMetadata) -> bool {
        md.master == Some(self.peer_id) && self.config.startup_version == self.config.model_version
    }

    fn apply_to_durable_file(
        &mut self,
        foreign: &ForeignChanges,
        local: &ChangeSet,
    ) -> Result<(), StoreError> {
        let newbies: Vec<Blob> = foreign
            .newbies
            .values()
            .cloned()
            .chain(local.newbies.iter().cloned())
            .collect();
        let dirtballs: Vec<Blob> = foreign
            .dirtballs
            .values()
            .cloned()
            .chain(local.dirtballs.iter().cloned())
            .collect();
        let goners: Vec<ObjectId> = foreign
            .goners
            .iter()
            .copied()
            .chain(local.goners.iter().copied())
            .collect();
        self.collaborators
            .applier
            .apply(&newbies, &dirtballs, &goners, &local.custom_field_defs)
    }

    fn read_metadata(&self) -> Result<CommitLogMetadata, StoreError> {
        match CommitLogMetadata::read_from(&self.segments.metadata)? {
            Some(md) => Ok(md),
            None => Err(StoreError::Corrupt(
                "metadata record missing after join".into(),
            )),
        }
    }

    fn own_peer<'a>(
        &self,
        md: &'a mut CommitLogMetadata,
    ) -> Result<&'a mut CommitLogPeer, StoreError> {
        md.peers
            .get_mut(&self.peer_id)
            .ok_or_else(|| StoreError::Corrupt("own peer record missing from metadata".into()))
    }
}

enum Absorbed {
    Changes(ForeignChanges),
    Conflict(ForeignChanges),
}

impl Drop for CommitLogSession {
    fn drop(&mut self) {
        if !self.shut_down {
            if let Err(e) = self.shutdown() {
                error!(peer = %self.peer_id, "commit log shutdown failed: {e}");
            }
        }
    }
}
