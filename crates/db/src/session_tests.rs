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

//! Multi-peer scenario tests. Each `CommitLogSession` here is an independent simulated peer;
//! they genuinely share the segments and locks through the filesystem, they just happen to
//! live in one test process (so their recorded process ids are all alive; dead peers are
//! injected by writing metadata directly).

use crate::config::CommitLogConfig;
use crate::log;
use crate::metadata::{CommitLogMetadata, CommitLogPeer};
use crate::records::CommitLogRecord;
use crate::segment::SharedSegments;
use crate::session::{CommitLogSession, SessionCollaborators};
use crate::testing::{TestSurrogateFactory, blob};
use lexstore_common::model::{
    Blob, ChangeSet, CommitResult, DurableFileApplier, ForeignChanges, ObjectId, Reconciler,
    ReconcilerFactory, StoreError,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Default)]
struct PeerState {
    /// Object ids this peer's user has locally pending (drives conflict detection).
    pending: Mutex<HashSet<ObjectId>>,
    /// Every foreign change set successfully merged into this peer's "cache".
    absorbed: Mutex<Vec<ForeignChanges>>,
    conflicts: AtomicUsize,
    /// This peer's view of the durable file, written only when it acts as master.
    durable: Mutex<HashMap<ObjectId, Blob>>,
    applies: AtomicUsize,
}

struct TestReconcilerFactory(Arc<PeerState>);

impl ReconcilerFactory for TestReconcilerFactory {
    fn create_reconciler(&self, foreign: ForeignChanges) -> Box<dyn Reconciler + '_> {
        Box::new(TestReconciler {
            state: self.0.clone(),
            foreign,
        })
    }
}

struct TestReconciler {
    state: Arc<PeerState>,
    foreign: ForeignChanges,
}

impl Reconciler for TestReconciler {
    fn ok_to_reconcile(&self) -> bool {
        let pending = self.state.pending.lock().unwrap();
        !self.foreign.touched_ids().any(|id| pending.contains(id))
    }

    fn reconcile(&mut self) -> Result<(), StoreError> {
        self.state
            .absorbed
            .lock()
            .unwrap()
            .push(self.foreign.clone());
        Ok(())
    }

    fn report_conflict(&self) {
        self.state.conflicts.fetch_add(1, Ordering::SeqCst);
    }
}

struct TestApplier(Arc<PeerState>);

impl DurableFileApplier for TestApplier {
    fn apply(
        &mut self,
        newbies: &[Blob],
        dirtballs: &[Blob],
        goners: &[ObjectId],
        _custom_field_defs: &[Blob],
    ) -> Result<(), StoreError> {
        let mut durable = self.0.durable.lock().unwrap();
        for b in newbies.iter().chain(dirtballs.iter()) {
            let mut id = [0u8; 16];
            id.copy_from_slice(&b[..16]);
            durable.insert(Uuid::from_bytes(id), b.clone());
        }
        for id in goners {
            durable.remove(id);
        }
        self.0.applies.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct TestPeer {
    session: CommitLogSession,
    state: Arc<PeerState>,
}

impl TestPeer {
    fn join(project: &Path, config: &CommitLogConfig) -> Result<Self, StoreError> {
        let state = Arc::new(PeerState::default());
        let session = CommitLogSession::open(
            project,
            config.clone(),
            SessionCollaborators {
                reconciler_factory: Box::new(TestReconcilerFactory(state.clone())),
                applier: Box::new(TestApplier(state.clone())),
                surrogates: Arc::new(TestSurrogateFactory),
            },
        )?;
        Ok(Self { session, state })
    }

    fn absorbed_ids(&self) -> HashSet<ObjectId> {
        let absorbed = self.state.absorbed.lock().unwrap();
        absorbed
            .iter()
            .flat_map(|f| f.touched_ids().copied().collect::<Vec<_>>())
            .collect()
    }
}

struct Project {
    _dir: tempfile::TempDir,
    path: PathBuf,
    config: CommitLogConfig,
}

fn test_project(log_segment_size: usize) -> Project {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kalaba.lexs");
    let config = CommitLogConfig {
        log_segment_size,
        shared_dir: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    Project {
        _dir: dir,
        path,
        config,
    }
}

fn new_object_change(payload: &[u8]) -> (ObjectId, ChangeSet) {
    let id = Uuid::new_v4();
    (
        id,
        ChangeSet {
            newbies: vec![blob(id, payload)],
            ..Default::default()
        },
    )
}

#[test]
fn scenario_a_join_commit_absorb_apply() {
    let project = test_project(1 << 16);
    let mut a = TestPeer::join(&project.path, &project.config).unwrap();
    let md = a.session.metadata_snapshot().unwrap();
    assert_eq!(md.current_generation, 0);
    assert_eq!(md.file_generation, 0);
    assert_eq!(md.master, Some(a.session.peer_id()));
    assert_eq!(md.peers.len(), 1);

    let mut b = TestPeer::join(&project.path, &project.config).unwrap();
    let md = a.session.metadata_snapshot().unwrap();
    assert_eq!(md.peers.len(), 2);
    assert_eq!(md.master, Some(a.session.peer_id()));

    let (id, changes) = new_object_change(b"cupboard");
    assert_eq!(b.session.commit(&changes).unwrap(), CommitResult::Success);
    let md = b.session.metadata_snapshot().unwrap();
    assert_eq!(md.current_generation, 1);
    // B is not master; the durable file still lags.
    assert_eq!(md.file_generation, 0);

    // A's next commit absorbs B's record; disjoint edits, no conflict; A is master so the
    // durable file catches up.
    assert_eq!(a.session.drain_foreign().unwrap(), CommitResult::Success);
    assert!(a.absorbed_ids().contains(&id));
    assert_eq!(a.state.conflicts.load(Ordering::SeqCst), 0);
    assert!(a.state.durable.lock().unwrap().contains_key(&id));
    let md = a.session.metadata_snapshot().unwrap();
    assert_eq!(md.current_generation, 1);
    assert_eq!(md.file_generation, 1);

    b.session.shutdown().unwrap();
    a.session.shutdown().unwrap();
}

#[test]
fn scenario_b_conflicting_edit_rejected() {
    let project = test_project(1 << 16);
    let mut a = TestPeer::join(&project.path, &project.config).unwrap();
    let mut b = TestPeer::join(&project.path, &project.config).unwrap();

    // Both sides touch the same object; A commits first.
    let contested = Uuid::new_v4();
    let changes_a = ChangeSet {
        dirtballs: vec![blob(contested, b"a's edit")],
        ..Default::default()
    };
    assert_eq!(a.session.commit(&changes_a).unwrap(), CommitResult::Success);

    b.state.pending.lock().unwrap().insert(contested);
    let changes_b = ChangeSet {
        dirtballs: vec![blob(contested, b"b's edit")],
        ..Default::default()
    };
    assert_eq!(
        b.session.commit(&changes_b).unwrap(),
        CommitResult::ConflictRetry
    );
    assert_eq!(b.state.conflicts.load(Ordering::SeqCst), 1);
    // Nothing merged on the conflicted attempt.
    assert!(b.state.absorbed.lock().unwrap().is_empty());

    let md = b.session.metadata_snapshot().unwrap();
    // No record appended, generation unchanged; but B's own bookkeeping advanced so the
    // absorbed generation is not re-processed.
    assert_eq!(md.current_generation, 1);
    assert_eq!(md.peers[&b.session.peer_id()].generation, 1);

    // Once the user resolves the collision the retry goes through.
    b.state.pending.lock().unwrap().clear();
    assert_eq!(b.session.commit(&changes_b).unwrap(), CommitResult::Success);
    let md = b.session.metadata_snapshot().unwrap();
    assert_eq!(md.current_generation, 2);

    b.session.shutdown().unwrap();
    a.session.shutdown().unwrap();
}

#[test]
fn scenario_c_master_drains_and_applies_on_shutdown() {
    let project = test_project(1 << 16);
    let mut a = TestPeer::join(&project.path, &project.config).unwrap();
    let mut b = TestPeer::join(&project.path, &project.config).unwrap();

    let (id, changes) = new_object_change(b"pending for master");
    assert_eq!(b.session.commit(&changes).unwrap(), CommitResult::Success);

    // A exits cleanly with B's commit still unseen; the shutdown path drains and applies
    // it before releasing master.
    a.session.shutdown().unwrap();
    assert!(a.state.durable.lock().unwrap().contains_key(&id));

    let md = b.session.metadata_snapshot().unwrap();
    assert_eq!(md.master, None);
    assert_eq!(md.file_generation, md.current_generation);
    assert_eq!(md.peers.len(), 1);

    // B can now take over as master on its next commit.
    assert_eq!(b.session.drain_foreign().unwrap(), CommitResult::Success);
    let md = b.session.metadata_snapshot().unwrap();
    assert_eq!(md.master, Some(b.session.peer_id()));

    b.session.shutdown().unwrap();
}

#[test]
fn scenario_d_log_exhaustion_master_vs_peer() {
    // Deliberately tiny log segment.
    let project = test_project(128);
    let mut a = TestPeer::join(&project.path, &project.config).unwrap();
    let mut b = TestPeer::join(&project.path, &project.config).unwrap();

    // A is master: an oversized record is silently dropped, but the commit succeeds, the
    // generation advances, and the durable file still gets the change.
    let (id, changes) = new_object_change(&[0x55u8; 200]);
    assert_eq!(a.session.commit(&changes).unwrap(), CommitResult::Success);
    assert!(a.state.durable.lock().unwrap().contains_key(&id));
    let md = a.session.metadata_snapshot().unwrap();
    assert_eq!(md.current_generation, 1);
    assert_eq!(md.file_generation, 1);
    assert_eq!(md.log_length, 0);

    // B is not master: the same overflow is fatal.
    let (_, changes) = new_object_change(&[0x66u8; 200]);
    let err = b.session.commit(&changes).unwrap_err();
    assert!(matches!(err, StoreError::LogExhausted { .. }));

    b.session.shutdown().unwrap();
    a.session.shutdown().unwrap();
}

#[test]
fn exhausted_peer_keeps_absorbed_bookkeeping() {
    // A failed append is fatal for a non-master, but the foreign records absorbed earlier in
    // the same commit were already reconciled into the live cache; the generation bookkeeping
    // has to stick so a retry does not re-process them.
    let project = test_project(128);
    let mut a = TestPeer::join(&project.path, &project.config).unwrap();
    let mut b = TestPeer::join(&project.path, &project.config).unwrap();

    let (id, changes) = new_object_change(b"tiny");
    assert_eq!(a.session.commit(&changes).unwrap(), CommitResult::Success);

    let (_, changes) = new_object_change(&[0x77u8; 200]);
    let err = b.session.commit(&changes).unwrap_err();
    assert!(matches!(err, StoreError::LogExhausted { .. }));
    // A's record was merged on the way to the failure...
    assert!(b.absorbed_ids().contains(&id));
    assert_eq!(b.state.absorbed.lock().unwrap().len(), 1);
    // ...and that fact survived the error.
    let md = b.session.metadata_snapshot().unwrap();
    assert_eq!(md.peers[&b.session.peer_id()].generation, 1);

    assert_eq!(b.session.drain_foreign().unwrap(), CommitResult::Success);
    assert_eq!(b.state.absorbed.lock().unwrap().len(), 1);

    b.session.shutdown().unwrap();
    a.session.shutdown().unwrap();
}

#[test]
fn sustained_master_overflow_probe() {
    // The behavior preserved from the original design: a master under sustained oversized
    // writes keeps succeeding without log entries, and a peer that never saw those
    // generations simply skips over them. The data reaches the durable file only.
    let project = test_project(128);
    let mut a = TestPeer::join(&project.path, &project.config).unwrap();
    let mut b = TestPeer::join(&project.path, &project.config).unwrap();

    for round in 0..5u8 {
        let (_, changes) = new_object_change(&vec![round; 200]);
        assert_eq!(a.session.commit(&changes).unwrap(), CommitResult::Success);
    }
    let md = a.session.metadata_snapshot().unwrap();
    assert_eq!(md.current_generation, 5);
    assert_eq!(md.file_generation, 5);
    assert_eq!(md.log_length, 0);

    // B sees nothing (the records never existed) but keeps operating; its bookkeeping
    // jumps to the current generation.
    assert_eq!(b.session.drain_foreign().unwrap(), CommitResult::Success);
    assert!(b.absorbed_ids().is_empty());
    let md = b.session.metadata_snapshot().unwrap();
    assert_eq!(md.peers[&b.session.peer_id()].generation, 5);

    // And small commits still flow through the log afterwards.
    let (id, changes) = new_object_change(b"small");
    assert_eq!(b.session.commit(&changes).unwrap(), CommitResult::Success);
    assert_eq!(a.session.drain_foreign().unwrap(), CommitResult::Success);
    assert!(a.absorbed_ids().contains(&id));

    b.session.shutdown().unwrap();
    a.session.shutdown().unwrap();
}

#[test]
fn dead_peer_reaped_and_dead_master_failed_over() {
    let project = test_project(1 << 16);

    // Forge a membership left behind by a crashed run: one peer with a live pid (vouching
    // that the state is not stale) and a dead master.
    let live_ghost = Uuid::new_v4();
    let dead_master = Uuid::new_v4();
    {
        let mut segments = SharedSegments::open_or_create(&project.path, &project.config).unwrap();
        let mut md = CommitLogMetadata::default();
        md.peers.insert(
            live_ghost,
            CommitLogPeer {
                process_id: std::process::id(),
                generation: 0,
            },
        );
        md.peers.insert(
            dead_master,
            CommitLogPeer {
                process_id: 0x3fff_fff0,
                generation: 0,
            },
        );
        md.master = Some(dead_master);
        md.write_to(&mut segments.metadata).unwrap();
    }

    let a = TestPeer::join(&project.path, &project.config).unwrap();
    let md = a.session.metadata_snapshot().unwrap();
    // Exactly the dead peer removed; master failed over to the joiner.
    assert!(!md.peers.contains_key(&dead_master));
    assert!(md.peers.contains_key(&live_ghost));
    assert!(md.peers.contains_key(&a.session.peer_id()));
    assert_eq!(md.master, Some(a.session.peer_id()));

    // At most one master, and it is a registered peer.
    assert!(md.peers.contains_key(&md.master.unwrap()));
}

#[test]
fn stale_segments_from_fully_crashed_run_are_reset() {
    let project = test_project(1 << 16);
    let dead = Uuid::new_v4();
    {
        let mut segments = SharedSegments::open_or_create(&project.path, &project.config).unwrap();
        let mut md = CommitLogMetadata::default();
        md.peers.insert(
            dead,
            CommitLogPeer {
                process_id: 0x3fff_fff0,
                generation: 17,
            },
        );
        md.master = Some(dead);
        md.current_generation = 17;
        md.file_generation = 12;
        md.log_offset = 999;
        md.log_length = 555;
        md.write_to(&mut segments.metadata).unwrap();
    }

    // No live peer remains, so the leftover state (including the dangerous
    // file/current divergence) is discarded rather than trusted.
    let a = TestPeer::join(&project.path, &project.config).unwrap();
    let md = a.session.metadata_snapshot().unwrap();
    assert_eq!(md.current_generation, 0);
    assert_eq!(md.file_generation, 0);
    assert_eq!(md.log_length, 0);
    assert_eq!(md.master, Some(a.session.peer_id()));
    assert_eq!(md.peers.len(), 1);
}

#[test]
fn no_master_with_lagging_file_is_fatal() {
    let project = test_project(1 << 16);
    let live_ghost = Uuid::new_v4();
    {
        let mut segments = SharedSegments::open_or_create(&project.path, &project.config).unwrap();
        let mut md = CommitLogMetadata::default();
        // A live peer has the state pinned, but the master is gone and the file lags.
        md.peers.insert(
            live_ghost,
            CommitLogPeer {
                process_id: std::process::id(),
                generation: 3,
            },
        );
        md.current_generation = 3;
        md.file_generation = 2;
        md.write_to(&mut segments.metadata).unwrap();
    }

    match TestPeer::join(&project.path, &project.config) {
        Err(StoreError::MasterFileInconsistency {
            current_generation: 3,
            file_generation: 2,
        }) => {}
        Err(e) => panic!("wrong error: {e}"),
        Ok(_) => panic!("join must refuse an unreconstructible durable file"),
    }
}

#[test]
fn vanished_commit_record_is_fatal() {
    // The metadata promises generations up to 3, but the log only holds generation 1 and this
    // peer never saw 2 or 3: the log can no longer be trusted.
    let project = test_project(1 << 16);
    let live_ghost = Uuid::new_v4();
    {
        let mut segments = SharedSegments::open_or_create(&project.path, &project.config).unwrap();
        let mut md = CommitLogMetadata::default();
        let record = CommitLogRecord {
            source: live_ghost,
            write_generation: 1,
            goners: vec![],
            newbies: vec![blob(Uuid::new_v4(), b"survivor")],
            dirtballs: vec![],
        };
        log::append(&mut segments.log, &mut md, &record).unwrap();
        md.peers.insert(
            live_ghost,
            CommitLogPeer {
                process_id: std::process::id(),
                generation: 0,
            },
        );
        // A live master, so joining does not trip the no-master consistency check.
        md.master = Some(live_ghost);
        md.current_generation = 3;
        md.write_to(&mut segments.metadata).unwrap();
    }

    let mut a = TestPeer::join(&project.path, &project.config).unwrap();
    match a.session.drain_foreign() {
        Err(StoreError::MissingCommitRecord {
            expected: 3,
            newest: 1,
        }) => {}
        Err(e) => panic!("wrong error: {e}"),
        Ok(r) => panic!("drain must fail, got {r:?}"),
    }
}

#[test]
fn lagging_peer_receives_every_record() {
    // GC safety from the session's vantage point: a peer that never drains must still be
    // able to absorb every commit it missed, however long it waits.
    let project = test_project(1 << 16);
    let mut a = TestPeer::join(&project.path, &project.config).unwrap();
    let mut b = TestPeer::join(&project.path, &project.config).unwrap();
    let mut c = TestPeer::join(&project.path, &project.config).unwrap();

    let mut committed = HashSet::new();
    for i in 0..10u8 {
        let (id, changes) = new_object_change(&[i; 24]);
        assert_eq!(a.session.commit(&changes).unwrap(), CommitResult::Success);
        committed.insert(id);
        // B keeps up; C idles.
        assert_eq!(b.session.drain_foreign().unwrap(), CommitResult::Success);
    }
    assert_eq!(b.absorbed_ids(), committed);

    assert_eq!(c.session.drain_foreign().unwrap(), CommitResult::Success);
    assert_eq!(c.absorbed_ids(), committed);

    c.session.shutdown().unwrap();
    b.session.shutdown().unwrap();
    a.session.shutdown().unwrap();
}

#[test]
fn randomized_multi_peer_simulation() {
    // Monotonic single-step generations, the master invariant at every step, and full
    // convergence: every peer ends up having absorbed every object the others committed.
    let project = test_project(1 << 18);
    let mut peers = vec![
        TestPeer::join(&project.path, &project.config).unwrap(),
        TestPeer::join(&project.path, &project.config).unwrap(),
        TestPeer::join(&project.path, &project.config).unwrap(),
    ];
    let mut rng = StdRng::seed_from_u64(0xc0ffee);
    let mut committed_by: Vec<HashSet<ObjectId>> = vec![HashSet::new(); peers.len()];
    let mut expected_generation = 0u64;

    for _ in 0..200 {
        let k = rng.random_range(0..peers.len());
        if rng.random_bool(0.6) {
            let (id, changes) = new_object_change(&[0u8; 20]);
            assert_eq!(
                peers[k].session.commit(&changes).unwrap(),
                CommitResult::Success
            );
            committed_by[k].insert(id);
            expected_generation += 1;
        } else {
            assert_eq!(
                peers[k].session.drain_foreign().unwrap(),
                CommitResult::Success
            );
        }
        let md = peers[k].session.metadata_snapshot().unwrap();
        assert_eq!(md.current_generation, expected_generation);
        assert!(md.file_generation <= md.current_generation);
        let master = md.master.expect("a live master must exist");
        assert!(md.peers.contains_key(&master));
        assert!(md.log_length as usize <= project.config.log_segment_size);
    }

    // Final drains: everyone has everything everyone else committed.
    for peer in &mut peers {
        assert_eq!(peer.session.drain_foreign().unwrap(), CommitResult::Success);
    }
    for (k, peer) in peers.iter().enumerate() {
        let expected: HashSet<ObjectId> = committed_by
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != k)
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect();
        assert_eq!(peer.absorbed_ids(), expected);
    }

    for peer in &mut peers {
        peer.session.shutdown().unwrap();
    }

    // Last peer out removed the backing files; a fresh join starts from scratch.
    let fresh = TestPeer::join(&project.path, &project.config).unwrap();
    let md = fresh.session.metadata_snapshot().unwrap();
    assert_eq!(md.current_generation, 0);
    assert_eq!(md.peers.len(), 1);
}
