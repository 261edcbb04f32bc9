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

use crate::model::{Blob, ObjectId, StoreError};

/// The single component allowed to mutate the durable project file. Invoked exclusively by the
/// peer currently holding master, while holding the cross-process lock.
pub trait DurableFileApplier: Send {
    fn apply(
        &mut self,
        newbies: &[Blob],
        dirtballs: &[Blob],
        goners: &[ObjectId],
        custom_field_defs: &[Blob],
    ) -> Result<(), StoreError>;
}
