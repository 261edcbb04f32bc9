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

//! Append, scan, and reclamation over the circular commit log segment, and the pure folding of
//! a run of foreign records into the three change-sets reconciliation consumes.
//!
//! Layout discipline: records are contiguous, never straddling the physical end of the
//! segment. When a record would, the remaining tail bytes become a deliberate gap accounted by
//! `metadata.padding` (and counted in `log_length`), and the record is written at physical
//! offset 0 instead. The live region is `log_length` bytes starting at `log_offset`, wrapping
//! at most once.

use crate::codec::Reader;
use crate::metadata::CommitLogMetadata;
use crate::records::CommitLogRecord;
use crate::segment::SharedSegment;
use lexstore_common::model::{
    ForeignChanges, ObjectSurrogateFactory, PeerId, StoreError,
};
use tracing::{debug, trace};

/// Append `record` after the current end of the live region. Refuses with `LogExhausted` when
/// the record (plus any wrap gap it would force) does not fit in the remaining capacity;
/// nothing is written or accounted in that case.
pub fn append(
    log: &mut SharedSegment,
    metadata: &mut CommitLogMetadata,
    record: &CommitLogRecord,
) -> Result<(), StoreError> {
    let capacity = log.len();
    let framed = record.encode_framed();
    let len = framed.len();
    if metadata.log_length as usize + len > capacity {
        return Err(StoreError::LogExhausted { record_len: len });
    }
    let mut write_off = (metadata.log_offset as usize + metadata.log_length as usize) % capacity;
    if write_off + len > capacity {
        // Would straddle the physical end; leave a gap there and wrap to 0.
        let gap = capacity - write_off;
        if metadata.log_length as usize + gap + len > capacity {
            return Err(StoreError::LogExhausted { record_len: len });
        }
        metadata.padding = gap as u32;
        metadata.log_length += gap as u32;
        write_off = 0;
    }
    log.bytes_mut()[write_off..write_off + len].copy_from_slice(&framed);
    metadata.log_length += len as u32;
    trace!(
        generation = record.write_generation,
        offset = write_off,
        len,
        "appended commit record"
    );
    Ok(())
}

/// Scan the live region in generation order, returning the records the caller has not yet
/// incorporated (newer than its own generation and authored by someone else). While scanning,
/// opportunistically reclaim the prefix of records that every peer has seen *and* the durable
/// file already reflects, by advancing `log_offset`/`log_length` past them.
pub fn read_unseen(
    log: &SharedSegment,
    metadata: &mut CommitLogMetadata,
    self_id: &PeerId,
) -> Result<Vec<CommitLogRecord>, StoreError> {
    let capacity = log.len();
    let self_generation = metadata
        .peers
        .get(self_id)
        .map(|p| p.generation)
        .unwrap_or(metadata.current_generation);
    let reclaim_floor = metadata
        .min_peer_generation(self_id)
        .min(metadata.file_generation);

    let mut unseen = Vec::new();
    let mut pos = metadata.log_offset as usize;
    let mut remaining = metadata.log_length as usize;
    let mut reclaiming = true;
    while remaining > 0 {
        // The gap sits at the physical end of the segment; skip it, and fold it out entirely
        // once reclamation has consumed everything before it.
        if metadata.padding > 0 && pos == capacity - metadata.padding as usize {
            let gap = metadata.padding as usize;
            remaining -= gap;
            pos = 0;
            if reclaiming {
                metadata.log_offset = 0;
                metadata.log_length -= gap as u32;
                metadata.padding = 0;
            }
            continue;
        }
        let mut r = Reader::new(&log.bytes()[pos..capacity]);
        let payload = r
            .read_bytes()
            .map_err(|e| StoreError::Corrupt(format!("commit record at {pos}: {e}")))?;
        let record = CommitLogRecord::decode(payload)
            .map_err(|e| StoreError::Corrupt(format!("commit record at {pos}: {e}")))?;
        let total = r.position();
        let write_generation = record.write_generation;
        // Inclusion and reclamation are independent: the caller still gets a record the scan
        // reclaims, which is why the floor counts the caller at current generation.
        if write_generation > self_generation && record.source != *self_id {
            unseen.push(record);
        }
        if reclaiming && write_generation <= reclaim_floor {
            metadata.log_offset = ((pos + total) % capacity) as u32;
            metadata.log_length -= total as u32;
            debug!(generation = write_generation, "reclaimed commit record");
        } else {
            reclaiming = false;
        }
        remaining -= total;
        pos = (pos + total) % capacity;
    }
    Ok(unseen)
}

/// Fold a run of unseen foreign records, in order, into the three working sets handed to the
/// reconciler. Precedence:
/// - a deletion cancels a pending "new" outright (the object never existed for other peers);
/// - a deletion of a "modified" object moves it to deleted;
/// - re-addition (or update) of a previously deleted id is a resurrection, classified
///   "modified" rather than "new";
/// - a later update of a "new" or "modified" object is absorbed last-value-wins without
///   changing its classification.
pub fn fold_foreign(
    records: &[CommitLogRecord],
    surrogates: &dyn ObjectSurrogateFactory,
) -> Result<ForeignChanges, StoreError> {
    let mut folded = ForeignChanges::default();
    for record in records {
        for id in &record.goners {
            if folded.newbies.shift_remove(id).is_some() {
                continue;
            }
            folded.dirtballs.shift_remove(id);
            folded.goners.insert(*id);
        }
        for blob in &record.dirtballs {
            let id = surrogates.create(blob)?.id;
            if let Some(existing) = folded.newbies.get_mut(&id) {
                *existing = blob.clone();
            } else {
                folded.goners.shift_remove(&id);
                folded.dirtballs.insert(id, blob.clone());
            }
        }
        for blob in &record.newbies {
            let id = surrogates.create(blob)?.id;
            if folded.goners.shift_remove(&id) || folded.dirtballs.contains_key(&id) {
                folded.dirtballs.insert(id, blob.clone());
            } else {
                folded.newbies.insert(id, blob.clone());
            }
        }
    }
    Ok(folded)
}
