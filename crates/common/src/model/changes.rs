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

use indexmap::{IndexMap, IndexSet};
use uuid::Uuid;

/// Identifies one object in the store. Stable across processes and restarts; assigned when the
/// object is created and carried inside its serialized surrogate.
pub type ObjectId = Uuid;

/// Identifies one peer process participating in the shared commit log. Generated fresh at
/// process startup, never persisted across restarts.
pub type PeerId = Uuid;

/// One serialized object surrogate. Opaque to the commit log; only the surrogate factory knows
/// how to look inside.
pub type Blob = Vec<u8>;

/// One peer's atomic set of pending local changes, as handed to `commit`: freshly created
/// objects ("newbies"), modified objects ("dirtballs"), and deleted object ids ("goners").
/// Custom field definitions ride along untouched for the durable file applier.
#[derive(Debug, Default, Clone)]
pub struct ChangeSet {
    pub newbies: Vec<Blob>,
    pub dirtballs: Vec<Blob>,
    pub goners: Vec<ObjectId>,
    pub custom_field_defs: Vec<Blob>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.newbies.is_empty() && self.dirtballs.is_empty() && self.goners.is_empty()
    }
}

/// The net effect of a run of foreign commit records, folded into three disjoint working sets
/// keyed by object id. Handed to the reconciler to merge into the live object cache and to
/// detect collisions with locally pending edits.
///
/// Insertion order is preserved so the reconciler sees objects in the order the log first
/// mentioned them.
#[derive(Debug, Default, Clone)]
pub struct ForeignChanges {
    /// Objects other peers created that this peer has never seen. Maps to the newest blob.
    pub newbies: IndexMap<ObjectId, Blob>,
    /// Objects that existed before this run of records and were updated (or deleted and then
    /// re-added — a resurrection is a modification, not a birth). Maps to the newest blob.
    pub dirtballs: IndexMap<ObjectId, Blob>,
    /// Objects deleted by other peers.
    pub goners: IndexSet<ObjectId>,
}

impl ForeignChanges {
    pub fn is_empty(&self) -> bool {
        self.newbies.is_empty() && self.dirtballs.is_empty() && self.goners.is_empty()
    }

    /// All object ids this change set touches, in working-set order.
    pub fn touched_ids(&self) -> impl Iterator<Item = &ObjectId> {
        self.newbies
            .keys()
            .chain(self.dirtballs.keys())
            .chain(self.goners.iter())
    }
}
