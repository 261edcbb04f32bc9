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

//! Detects peers that exited without clean shutdown by probing their recorded process ids
//! against the live process table, and reclaims their membership. Runs at startup, at every
//! commit, and at shutdown; idempotent.

use crate::metadata::CommitLogMetadata;
use lexstore_common::model::PeerId;
use tracing::warn;

/// Whether a process with this id currently exists. Signal 0 probes without delivering:
/// success or EPERM mean the process is there, ESRCH means it is gone.
pub fn process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Remove every peer (other than the caller) whose recorded process no longer exists. Clears
/// master if the master was among the dead. Returns whether the metadata changed, so the
/// caller knows to persist it.
pub fn reap_dead_peers(metadata: &mut CommitLogMetadata, self_id: &PeerId) -> bool {
    let dead: Vec<PeerId> = metadata
        .peers
        .iter()
        .filter(|(id, peer)| *id != self_id && !process_alive(peer.process_id))
        .map(|(id, _)| *id)
        .collect();
    for id in &dead {
        let peer = metadata.peers.shift_remove(id);
        warn!(peer = %id, pid = peer.map(|p| p.process_id), "reaped dead peer");
        if metadata.master == Some(*id) {
            warn!(peer = %id, "dead peer was master; master cleared");
            metadata.master = None;
        }
    }
    !dead.is_empty()
}
