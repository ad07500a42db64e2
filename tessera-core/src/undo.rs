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

//! Undo/redo log of chunk deltas.
//!
//! Every chunk edit is one small record: which chunk, which edge, and the
//! signed delta that was applied to that edge. Records are threaded LIFO on
//! two stacks that behave as a single cursor: undo pops a record, applies
//! the inverse delta and pushes the record onto the redo stack; redo is
//! symmetric. The `first` flag on a record delimits user-visible
//! transactions: one `insert`/`delete` call produces one transaction.
//!
//! A record whose inverse leaves its chunk empty detaches the chunk from the
//! active list; the chunk keeps its neighbour pointers so the record that
//! re-grows it can splice it back into its old slot. Relinking happens
//! before the edge is adjusted, so the active list never carries an empty
//! chunk.

use tracing::trace;

use crate::buffer::Document;
use crate::chunk::Ref;
use crate::error::Result;
use crate::mark::ChangeCtx;
use crate::{ChunkId, MarkId};

/// One chunk-edge delta. `at_start` picks the edge; `len` is the signed
/// amount the edge moved during the forward operation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UndoRecord {
    pub(crate) chunk: ChunkId,
    pub(crate) at_start: bool,
    pub(crate) len: isize,
    /// First record of a user-visible transaction.
    pub(crate) first: bool,
}

/// The two record stacks, behaving as one undo cursor.
#[derive(Debug, Default)]
pub(crate) struct UndoLog {
    undo_stack: Vec<UndoRecord>,
    redo_stack: Vec<UndoRecord>,
    /// Armed at transaction start; the next pushed record takes it.
    pending_first: bool,
}

impl UndoLog {
    /// Arm the `first` flag for the next record.
    pub(crate) fn begin_transaction(&mut self) {
        self.pending_first = true;
    }

    /// Drop the redo stack (a fresh edit invalidates it), returning the
    /// chunks its records referenced so the document can collect orphans.
    pub(crate) fn clear_redo(&mut self) -> Vec<ChunkId> {
        self.redo_stack.drain(..).map(|r| r.chunk).collect()
    }

    /// Record a chunk-edge delta that was just applied.
    pub(crate) fn push(&mut self, chunk: ChunkId, at_start: bool, len: isize) {
        let first = std::mem::take(&mut self.pending_first);
        self.undo_stack.push(UndoRecord {
            chunk,
            at_start,
            len,
            first,
        });
    }

    pub(crate) fn pop_undo(&mut self) -> Option<UndoRecord> {
        self.undo_stack.pop()
    }

    pub(crate) fn push_redo(&mut self, rec: UndoRecord) {
        self.redo_stack.push(rec);
    }

    pub(crate) fn pop_redo(&mut self) -> Option<UndoRecord> {
        self.redo_stack.pop()
    }

    /// Push a replayed record back onto the undo stack, keeping its flags.
    pub(crate) fn push_replayed(&mut self, rec: UndoRecord) {
        self.undo_stack.push(rec);
    }

    /// Whether the record on top of the redo stack starts a new transaction.
    pub(crate) fn redo_transaction_done(&self) -> bool {
        self.redo_stack.last().map(|r| r.first).unwrap_or(true)
    }

    /// Whether any live record references `chunk`.
    pub(crate) fn references(&self, chunk: ChunkId) -> bool {
        self.undo_stack
            .iter()
            .chain(self.redo_stack.iter())
            .any(|r| r.chunk == chunk)
    }

    pub(crate) fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    /// Number of transactions on the undo stack.
    pub(crate) fn undo_transactions(&self) -> usize {
        self.undo_stack.iter().filter(|r| r.first).count()
    }

    pub(crate) fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }
}

/// Outcome of one undo/redo step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoOutcome {
    /// No records remain on that side of the cursor.
    Exhausted,
    /// One record was reversed; more remain in the same transaction.
    Partial(Ref, Ref),
    /// The transaction's last record was reversed.
    Complete(Ref, Ref),
}

impl Document {
    /// Reverse one record of the topmost transaction on the undo stack.
    ///
    /// Returns `Partial` while records of the transaction remain and
    /// `Complete` once the record carrying the `first` flag has been
    /// reversed; callers loop until `Complete`. Mark fixup and group
    /// notification run against the same `(start, end)` contract as live
    /// edits, once per record.
    pub fn undo(&mut self, point: MarkId) -> Result<UndoOutcome> {
        self.ensure_editable()?;
        self.expect_point(point)?;
        let Some(rec) = self.log.pop_undo() else {
            return Ok(UndoOutcome::Exhausted);
        };
        trace!(?rec, "undo");
        let (start, end, ctx) = self.apply_delta(rec.chunk, rec.at_start, -rec.len);
        self.fixup_replay(start, &ctx);
        self.check_consistent();
        self.log.push_redo(rec);
        self.notify_change(point, start, end);
        Ok(if rec.first {
            UndoOutcome::Complete(start, end)
        } else {
            UndoOutcome::Partial(start, end)
        })
    }

    /// Re-apply one record from the redo stack; symmetric with [`undo`].
    ///
    /// [`undo`]: Document::undo
    pub fn redo(&mut self, point: MarkId) -> Result<UndoOutcome> {
        self.ensure_editable()?;
        self.expect_point(point)?;
        let Some(rec) = self.log.pop_redo() else {
            return Ok(UndoOutcome::Exhausted);
        };
        trace!(?rec, "redo");
        let (start, end, ctx) = self.apply_delta(rec.chunk, rec.at_start, rec.len);
        self.fixup_replay(start, &ctx);
        self.check_consistent();
        let done = self.log.redo_transaction_done();
        self.log.push_replayed(rec);
        self.notify_change(point, start, end);
        Ok(if done {
            UndoOutcome::Complete(start, end)
        } else {
            UndoOutcome::Partial(start, end)
        })
    }

    /// Number of records on the undo stack.
    pub fn undo_depth(&self) -> usize {
        self.log.undo_depth()
    }

    /// Number of records on the redo stack.
    pub fn redo_depth(&self) -> usize {
        self.log.redo_depth()
    }

    /// Number of transactions on the undo stack.
    pub fn undo_transactions(&self) -> usize {
        self.log.undo_transactions()
    }

    /// Apply a signed delta to one chunk edge, relinking a detached chunk
    /// first when the delta grows it and detaching it when it becomes empty.
    /// Returns the changed range (collapsed when content was removed) and
    /// the fixup context.
    fn apply_delta(
        &mut self,
        chunk: ChunkId,
        at_start: bool,
        delta: isize,
    ) -> (Ref, Ref, ChangeCtx) {
        let mut ctx = ChangeCtx::default();
        let grows = if at_start { delta < 0 } else { delta > 0 };
        if grows && !self.chunks[chunk].linked {
            // Relink before adjusting the edge so the active list never
            // holds an empty chunk.
            self.relink_chunk(chunk);
        }
        let (old_start, old_end) = {
            let c = &self.chunks[chunk];
            (c.start, c.end)
        };
        let (start, end) = if at_start {
            let new_start = offset_by(old_start, delta);
            assert!(
                new_start <= old_end,
                "undo record would invert chunk bounds"
            );
            self.chunks[chunk].start = new_start;
            if grows {
                (Ref::at(chunk, new_start), Ref::at(chunk, old_start))
            } else {
                let r = Ref::at(chunk, new_start);
                (r, r)
            }
        } else {
            let new_end = offset_by(old_end, delta);
            assert!(
                new_end >= old_start,
                "undo record would invert chunk bounds"
            );
            self.chunks[chunk].end = new_end;
            if grows {
                (Ref::at(chunk, old_end), Ref::at(chunk, new_end))
            } else {
                let r = Ref::at(chunk, new_end);
                (r, r)
            }
        };
        if self.chunks[chunk].len() == 0 {
            if self.chunks[chunk].linked {
                self.detach_chunk(chunk);
            }
            ctx.detached.push(chunk);
            let collapse = self.boundary_ref(chunk);
            return (collapse, collapse, ctx);
        }
        ctx.resized.push(chunk);
        (start, end, ctx)
    }

    /// Where a detached chunk's position collapsed to: its preserved
    /// successor's start, else its preserved predecessor's end, else the
    /// empty-document end.
    fn boundary_ref(&self, chunk: ChunkId) -> Ref {
        let c = &self.chunks[chunk];
        if let Some(n) = c.next {
            if self.chunks[n].linked {
                return Ref::at(n, self.chunks[n].start);
            }
        }
        if let Some(p) = c.prev {
            if self.chunks[p].linked {
                return Ref::at(p, self.chunks[p].end);
            }
        }
        Ref::END
    }
}

fn offset_by(base: usize, delta: isize) -> usize {
    let shifted = base as isize + delta;
    assert!(shifted >= 0, "undo record would move an edge before its allocation");
    shifted as usize
}
