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

//! One peer's atomic change set as it travels through the commit log segment: deletions first,
//! then added and updated surrogate blobs, all opaque to this layer.

use crate::codec::{self, Reader, append_bytes, append_uuid, append_varint};
use lexstore_common::DATA_LAYOUT_VERSION;
use lexstore_common::model::{Blob, ObjectId, PeerId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitLogRecord {
    /// The peer that authored this commit.
    pub source: PeerId,
    /// The generation assigned to this record; strictly increasing in log order.
    pub write_generation: u64,
    /// Object ids deleted by this commit.
    pub goners: Vec<ObjectId>,
    /// Serialized surrogates of objects created by this commit.
    pub newbies: Vec<Blob>,
    /// Serialized surrogates of objects updated by this commit.
    pub dirtballs: Vec<Blob>,
}

impl CommitLogRecord {
    fn encode(&self) -> Vec<u8> {
        let blob_bytes: usize = self
            .newbies
            .iter()
            .chain(self.dirtballs.iter())
            .map(Vec::len)
            .sum();
        let mut out = Vec::with_capacity(64 + self.goners.len() * 16 + blob_bytes);
        out.push(DATA_LAYOUT_VERSION);
        append_uuid(&mut out, &self.source);
        append_varint(&mut out, self.write_generation);
        append_varint(&mut out, self.goners.len() as u64);
        for id in &self.goners {
            append_uuid(&mut out, id);
        }
        append_varint(&mut out, self.newbies.len() as u64);
        for blob in &self.newbies {
            append_bytes(&mut out, blob);
        }
        append_varint(&mut out, self.dirtballs.len() as u64);
        for blob in &self.dirtballs {
            append_bytes(&mut out, blob);
        }
        out
    }

    /// The record as it is laid down in the log segment: varint length prefix, then payload.
    pub fn encode_framed(&self) -> Vec<u8> {
        let payload = self.encode();
        let mut framed = Vec::with_capacity(payload.len() + codec::MAX_VARINT_LEN);
        append_bytes(&mut framed, &payload);
        framed
    }

    pub fn decode(payload: &[u8]) -> Result<Self, codec::DecodeError> {
        let mut r = Reader::new(payload);
        let version = r.read_u8()?;
        if version != DATA_LAYOUT_VERSION {
            return Err(codec::DecodeError::BadVersion(version));
        }
        let source = r.read_uuid()?;
        let write_generation = r.read_varint()?;
        let n_goners = r.read_varint()? as usize;
        let mut goners = Vec::with_capacity(n_goners);
        for _ in 0..n_goners {
            goners.push(r.read_uuid()?);
        }
        let n_newbies = r.read_varint()? as usize;
        let mut newbies = Vec::with_capacity(n_newbies);
        for _ in 0..n_newbies {
            newbies.push(r.read_bytes()?.to_vec());
        }
        let n_dirtballs = r.read_varint()? as usize;
        let mut dirtballs = Vec::with_capacity(n_dirtballs);
        for _ in 0..n_dirtballs {
            dirtballs.push(r.read_bytes()?.to_vec());
        }
        Ok(Self {
            source,
            write_generation,
            goners,
            newbies,
            dirtballs,
        })
    }
}
