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

//! The single length-prefixed record at the head of the metadata segment: peer membership,
//! master, generation counters, and the circular-buffer bookkeeping for the commit log
//! segment. Pure data movement; the protocol logic lives in `session` and `log`.

use crate::codec::{self, Reader, append_bytes, append_uuid, append_varint};
use crate::segment::SharedSegment;
use indexmap::IndexMap;
use lexstore_common::DATA_LAYOUT_VERSION;
use lexstore_common::model::{PeerId, StoreError};

/// One live, registered peer process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitLogPeer {
    /// OS process id, used by the liveness tracker to detect unclean exits.
    pub process_id: u32,
    /// The newest log generation this peer has incorporated into its live object cache.
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommitLogMetadata {
    /// Exactly the live, registered peers, keyed by their transient peer id.
    pub peers: IndexMap<PeerId, CommitLogPeer>,
    /// The peer currently authorized to write the durable file, if any. Always present in
    /// `peers` when set.
    pub master: Option<PeerId>,
    /// Incremented by exactly 1 per accepted commit; never decremented.
    pub current_generation: u64,
    /// The generation up to which the durable file reflects the log. Never exceeds
    /// `current_generation`.
    pub file_generation: u64,
    /// Physical offset of the oldest unreclaimed byte in the log segment.
    pub log_offset: u32,
    /// Live bytes in the log, counting the wrap padding gap.
    pub log_length: u32,
    /// Bytes deliberately skipped at the physical end of the segment so a record would not
    /// straddle it. Zero when the live region does not wrap.
    pub padding: u32,
}

impl CommitLogMetadata {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.peers.len() * 32);
        out.push(DATA_LAYOUT_VERSION);
        append_varint(&mut out, self.peers.len() as u64);
        for (id, peer) in &self.peers {
            append_uuid(&mut out, id);
            append_varint(&mut out, u64::from(peer.process_id));
            append_varint(&mut out, peer.generation);
        }
        match &self.master {
            Some(id) => {
                out.push(1);
                append_uuid(&mut out, id);
            }
            None => out.push(0),
        }
        append_varint(&mut out, self.current_generation);
        append_varint(&mut out, self.file_generation);
        append_varint(&mut out, u64::from(self.log_offset));
        append_varint(&mut out, u64::from(self.log_length));
        append_varint(&mut out, u64::from(self.padding));
        out
    }

    pub fn decode(payload: &[u8]) -> Result<Self, codec::DecodeError> {
        let mut r = Reader::new(payload);
        let version = r.read_u8()?;
        if version != DATA_LAYOUT_VERSION {
            return Err(codec::DecodeError::BadVersion(version));
        }
        let n_peers = r.read_varint()? as usize;
        let mut peers = IndexMap::with_capacity(n_peers);
        for _ in 0..n_peers {
            let id = r.read_uuid()?;
            let process_id = u32::try_from(r.read_varint()?)
                .map_err(|_| codec::DecodeError::OutOfRange("process_id"))?;
            let generation = r.read_varint()?;
            peers.insert(
                id,
                CommitLogPeer {
                    process_id,
                    generation,
                },
            );
        }
        let master = match r.read_u8()? {
            0 => None,
            _ => Some(r.read_uuid()?),
        };
        let current_generation = r.read_varint()?;
        let file_generation = r.read_varint()?;
        let log_offset = u32::try_from(r.read_varint()?)
            .map_err(|_| codec::DecodeError::OutOfRange("log_offset"))?;
        let log_length = u32::try_from(r.read_varint()?)
            .map_err(|_| codec::DecodeError::OutOfRange("log_length"))?;
        let padding = u32::try_from(r.read_varint()?)
            .map_err(|_| codec::DecodeError::OutOfRange("padding"))?;
        Ok(Self {
            peers,
            master,
            current_generation,
            file_generation,
            log_offset,
            log_length,
            padding,
        })
    }

    /// Read the metadata record at offset 0 of the segment. `None` means the segment holds no
    /// record yet (zero length prefix, e.g. a freshly created mapping); a record that is
    /// present but undecodable is `StoreError::Corrupt`.
    pub fn read_from(segment: &SharedSegment) -> Result<Option<Self>, StoreError> {
        let mut r = Reader::new(segment.bytes());
        let len = r
            .read_varint()
            .map_err(|e| StoreError::Corrupt(e.to_string()))? as usize;
        if len == 0 {
            return Ok(None);
        }
        let start = r.position();
        let Some(payload) = segment.bytes().get(start..start + len) else {
            return Err(StoreError::Corrupt(format!(
                "metadata length prefix {len} exceeds segment"
            )));
        };
        Self::decode(payload)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    /// Write this record, length-prefixed, at offset 0 of the segment.
    pub fn write_to(&self, segment: &mut SharedSegment) -> Result<(), StoreError> {
        let payload = self.encode();
        let mut framed = Vec::with_capacity(payload.len() + codec::MAX_VARINT_LEN);
        append_bytes(&mut framed, &payload);
        if framed.len() > segment.len() {
            // Only reachable with an absurd number of registered peers.
            return Err(StoreError::Corrupt(format!(
                "metadata record of {} bytes exceeds {}-byte segment",
                framed.len(),
                segment.len()
            )));
        }
        segment.bytes_mut()[..framed.len()].copy_from_slice(&framed);
        Ok(())
    }

    /// The oldest generation any peer still needs, with the caller (who is about to be fully
    /// caught up) counted at `current_generation`. GC may not pass this point.
    pub fn min_peer_generation(&self, self_id: &PeerId) -> u64 {
        self.peers
            .iter()
            .map(|(id, peer)| {
                if id == self_id {
                    self.current_generation
                } else {
                    peer.generation
                }
            })
            .min()
            .unwrap_or(self.current_generation)
    }
}
