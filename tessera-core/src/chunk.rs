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

//! Backing storage for the piece table: allocations, chunks and refs.
//!
//! An [`Allocation`] is an immutable byte region with a monotonically
//! advancing `used` watermark; once a byte is written its address is stable
//! for the lifetime of the document. A [`Chunk`] is a view over a contiguous
//! `[start, end)` range of one allocation; the ordered chunk list is the
//! current document content. A [`Ref`] names a position as a chunk plus an
//! offset inside that chunk's allocation coordinates.

use crate::attr::AttrSet;
use crate::{AllocId, ChunkId};

/// Default capacity for a fresh allocation.
pub(crate) const DEFAULT_ALLOC: usize = 4096;

/// An immutable backing byte region.
///
/// Never reallocated and never shifted; insertions append at the `used`
/// watermark and everything below the watermark is frozen.
#[derive(Debug)]
pub(crate) struct Allocation {
    bytes: Box<[u8]>,
    used: usize,
}

impl Allocation {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![0; capacity].into_boxed_slice(),
            used: 0,
        }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.bytes.len() - self.used
    }

    pub(crate) fn used(&self) -> usize {
        self.used
    }

    /// Append bytes at the watermark, returning the offset they start at.
    /// Panics if there is not enough room; callers size their writes first.
    pub(crate) fn append(&mut self, bytes: &[u8]) -> usize {
        assert!(bytes.len() <= self.remaining(), "allocation overrun");
        let at = self.used;
        self.bytes[at..at + bytes.len()].copy_from_slice(bytes);
        self.used += bytes.len();
        at
    }

    pub(crate) fn slice(&self, start: usize, end: usize) -> &[u8] {
        &self.bytes[start..end]
    }
}

/// A view over `[start, end)` of one allocation, threaded into the ordered
/// chunk list. The allocation binding never changes; only `start` and `end`
/// move, and only through undo-log records.
#[derive(Debug)]
pub(crate) struct Chunk {
    pub(crate) alloc: AllocId,
    pub(crate) start: usize,
    pub(crate) end: usize,
    pub(crate) attrs: AttrSet,
    /// List links. A detached chunk keeps the values it had at detach time
    /// so the undo log can splice it back into its old slot.
    pub(crate) prev: Option<ChunkId>,
    pub(crate) next: Option<ChunkId>,
    /// Whether this chunk is currently in the active list.
    pub(crate) linked: bool,
}

impl Chunk {
    pub(crate) fn new(alloc: AllocId, start: usize, end: usize) -> Self {
        Self {
            alloc,
            start,
            end,
            attrs: AttrSet::new(),
            prev: None,
            next: None,
            linked: false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether `offset` is a valid position inside this chunk. Both edges
    /// are valid positions: `start` is before the first byte, `end` after
    /// the last.
    pub(crate) fn contains(&self, offset: usize) -> bool {
        offset >= self.start && offset <= self.end
    }
}

/// A position in the document: a chunk and an offset in that chunk's
/// allocation coordinates, with `offset` in `[chunk.start, chunk.end]`.
///
/// `Ref::END` (no chunk) is the distinguished end-of-document position.
/// Two refs can denote the same logical position across a chunk boundary
/// (the end of one chunk equals the start of its successor); use
/// [`crate::Document::same_ref`] for logical equality. The derived
/// `PartialEq` compares representations, not positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ref {
    pub chunk: Option<ChunkId>,
    pub offset: usize,
}

impl Ref {
    /// The end-of-document position.
    pub const END: Ref = Ref {
        chunk: None,
        offset: 0,
    };

    pub fn at(chunk: ChunkId, offset: usize) -> Self {
        Self {
            chunk: Some(chunk),
            offset,
        }
    }

    pub fn is_end(&self) -> bool {
        self.chunk.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn test_allocation_watermark() {
        let mut alloc = Allocation::new(16);
        assert_eq!(alloc.remaining(), 16);
        let at = alloc.append(b"hello");
        assert_eq!(at, 0);
        assert_eq!(alloc.append(b"world"), 5);
        assert_eq!(alloc.remaining(), 6);
        assert_eq!(alloc.slice(0, 10), b"helloworld");
    }

    #[test]
    #[should_panic(expected = "allocation overrun")]
    fn test_allocation_overrun_panics() {
        let mut alloc = Allocation::new(4);
        alloc.append(b"toolong");
    }

    #[test]
    fn test_chunk_contains_both_edges() {
        let mut allocs: SlotMap<crate::AllocId, ()> = SlotMap::with_key();
        let id = allocs.insert(());
        let chunk = Chunk::new(id, 3, 8);
        assert!(chunk.contains(3));
        assert!(chunk.contains(8));
        assert!(!chunk.contains(2));
        assert!(!chunk.contains(9));
        assert_eq!(chunk.len(), 5);
    }
}
