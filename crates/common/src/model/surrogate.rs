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

use crate::model::{ObjectId, StoreError};
use std::collections::HashMap;

/// What the commit log needs to know about a serialized surrogate without interpreting its
/// internal structure: which object it is, and what class of object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurrogateInfo {
    pub id: ObjectId,
    pub class_name: String,
}

/// Decodes an opaque surrogate blob far enough to identify it. The blob format belongs to the
/// object-file layer; the commit log only ever peeks through this seam.
pub trait ObjectSurrogateFactory: Send + Sync {
    fn create(&self, blob: &[u8]) -> Result<SurrogateInfo, StoreError>;
}

/// Constructor for one class of in-memory surrogate, taking the serialized blob.
pub type SurrogateCtor<S> = fn(&[u8]) -> Result<S, StoreError>;

/// A closed registry of surrogate constructors keyed by class name, built once at startup from
/// a static table. Class names not in the table are a schema mismatch, not a lookup to retry.
pub struct SurrogateRegistry<S> {
    ctors: HashMap<&'static str, SurrogateCtor<S>>,
}

impl<S> SurrogateRegistry<S> {
    pub fn from_table(table: &[(&'static str, SurrogateCtor<S>)]) -> Self {
        Self {
            ctors: table.iter().copied().collect(),
        }
    }

    pub fn construct(&self, class_name: &str, blob: &[u8]) -> Result<S, StoreError> {
        let Some(ctor) = self.ctors.get(class_name) else {
            return Err(StoreError::BadSurrogate(format!(
                "no registered surrogate class: {class_name}"
            )));
        };
        ctor(blob)
    }

    pub fn knows(&self, class_name: &str) -> bool {
        self.ctors.contains_key(class_name)
    }
}
