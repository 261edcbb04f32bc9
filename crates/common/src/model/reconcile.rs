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

use crate::model::{ForeignChanges, StoreError};

/// Merges one batch of foreign changes into the caller's live object cache, or reports that the
/// caller's pending local edits collide with them.
///
/// A reconciler is created per commit attempt, consumes one `ForeignChanges`, and is then
/// discarded. `ok_to_reconcile` must be side-effect free; `reconcile` is called at most once,
/// and only when `ok_to_reconcile` returned true. When it returned false the session invokes
/// `report_conflict` instead (the hook the application uses to tell the user why their save
/// bounced) and no merge happens on this attempt.
pub trait Reconciler {
    fn ok_to_reconcile(&self) -> bool;
    fn reconcile(&mut self) -> Result<(), StoreError>;
    fn report_conflict(&self);
}

/// Owned by the application layer, which knows what the user has locally pending.
pub trait ReconcilerFactory: Send {
    fn create_reconciler(&self, foreign: ForeignChanges) -> Box<dyn Reconciler + '_>;
}
