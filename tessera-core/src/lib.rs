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

use slotmap::new_key_type;

pub mod attr;
pub mod buffer;
pub mod chunk;
pub mod count;
pub mod error;
pub mod mark;
pub mod undo;

new_key_type! {
    /// Handle for an immutable backing allocation
    pub struct AllocId;
}

new_key_type! {
    /// Handle for a chunk (a view into an allocation)
    pub struct ChunkId;
}

new_key_type! {
    /// Handle for a mark
    pub struct MarkId;
}

pub use attr::AttrSet;
pub use buffer::Document;
pub use chunk::Ref;
pub use count::{Counts, LineCounter};
pub use error::{CoreError, Result};
pub use mark::{GroupId, GroupObserver};
pub use undo::UndoOutcome;
