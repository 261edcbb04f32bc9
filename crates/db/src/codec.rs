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

//! Explicit binary schema for everything that lives in the shared segments: base-128 varints,
//! raw 16-byte ids, length-prefixed byte strings, fixed field order. This layout is a contract
//! between peer processes of potentially different builds, so it is hand-written and versioned
//! rather than delegated to a serialization library.

use thiserror::Error;
use uuid::Uuid;

/// Longest possible LEB128 encoding of a u64.
pub const MAX_VARINT_LEN: usize = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Unexpected end of input at offset {0}")]
    UnexpectedEof(usize),
    #[error("Varint overflows u64 at offset {0}")]
    VarintOverflow(usize),
    #[error("Unsupported layout version {0}")]
    BadVersion(u8),
    #[error("Value out of range for field `{0}`")]
    OutOfRange(&'static str),
}

/// Append a u64 as an unsigned LEB128 varint.
pub fn append_varint(out: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Append a 128-bit id as 16 raw bytes.
pub fn append_uuid(out: &mut Vec<u8>, id: &Uuid) {
    out.extend_from_slice(id.as_bytes());
}

/// Append a length-prefixed byte string.
pub fn append_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    append_varint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

/// Sequential reader over an encoded buffer. Tracks its offset so decode errors can say where.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_varint(&mut self) -> Result<u64, DecodeError> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            let Some(&byte) = self.buf.get(self.pos) else {
                return Err(DecodeError::UnexpectedEof(self.pos));
            };
            self.pos += 1;
            if shift >= 63 && byte > 1 {
                return Err(DecodeError::VarintOverflow(self.pos - 1));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift >= 64 {
                return Err(DecodeError::VarintOverflow(self.pos - 1));
            }
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let Some(&byte) = self.buf.get(self.pos) else {
            return Err(DecodeError::UnexpectedEof(self.pos));
        };
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_uuid(&mut self) -> Result<Uuid, DecodeError> {
        let end = self.pos + 16;
        let Some(slice) = self.buf.get(self.pos..end) else {
            return Err(DecodeError::UnexpectedEof(self.pos));
        };
        self.pos = end;
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(slice);
        Ok(Uuid::from_bytes(bytes))
    }

    pub fn read_bytes(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.read_varint()? as usize;
        let end = self.pos.checked_add(len).ok_or(DecodeError::OutOfRange("length"))?;
        let Some(slice) = self.buf.get(self.pos..end) else {
            return Err(DecodeError::UnexpectedEof(self.pos));
        };
        self.pos = end;
        Ok(slice)
    }
}
