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

//! Test doubles shared by the log and session suites. The surrogate format here is the
//! simplest thing the factory seam allows: 16 id bytes followed by arbitrary payload.

use lexstore_common::model::{
    Blob, ObjectId, ObjectSurrogateFactory, StoreError, SurrogateInfo,
};
use uuid::Uuid;

pub struct TestSurrogateFactory;

impl ObjectSurrogateFactory for TestSurrogateFactory {
    fn create(&self, blob: &[u8]) -> Result<SurrogateInfo, StoreError> {
        let Some(id_bytes) = blob.get(..16) else {
            return Err(StoreError::BadSurrogate("blob shorter than id".into()));
        };
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(id_bytes);
        Ok(SurrogateInfo {
            id: Uuid::from_bytes(bytes),
            class_name: "LexEntry".into(),
        })
    }
}

/// A surrogate blob for `id` with the given payload tail.
pub fn blob(id: ObjectId, payload: &[u8]) -> Blob {
    let mut out = Vec::with_capacity(16 + payload.len());
    out.extend_from_slice(id.as_bytes());
    out.extend_from_slice(payload);
    out
}
