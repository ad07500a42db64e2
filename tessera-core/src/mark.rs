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

//! Marks: persistent positions in a document.
//!
//! All marks of a document form one doubly-linked list in document order.
//! Marks can additionally belong to a group, and each group keeps its own
//! list containing the group's marks plus every point. A point is a mark
//! that is a member of every group simultaneously; edits are always made at
//! a point so the change locus can be expressed in a group-aware way.
//!
//! Every mark carries a sequence number assigned to lie strictly between its
//! neighbours'; when a gap is exhausted the whole list is renumbered in one
//! bulk pass. Sequence numbers make `ordered` an O(1) comparison.
//!
//! When the buffer reports a change `(start_ref, end_ref)`, the mark system
//! walks marks before the edit point backwards applying the prior-fixup rule
//! and marks at/after it forwards applying the posterior-fixup rule, each
//! until the rules run off the affected region. Group owners then observe
//! the change through their [`GroupObserver`].

use smallvec::SmallVec;
use tracing::debug;

use crate::attr::AttrSet;
use crate::buffer::Document;
use crate::chunk::Ref;
use crate::error::{CoreError, Result};
use crate::{ChunkId, MarkId};

/// Gap left between consecutive sequence numbers so inserts can bisect.
const SEQ_GAP: u64 = 1 << 16;

/// Identifier of a mark group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub(crate) usize);

/// Per-group list links carried by a point.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct GroupLink {
    pub(crate) prev: Option<MarkId>,
    pub(crate) next: Option<MarkId>,
}

/// Group membership of a mark.
#[derive(Debug)]
pub(crate) enum Membership {
    /// In the document list only.
    Ungrouped,
    /// In one group's list.
    Grouped {
        group: GroupId,
        prev: Option<MarkId>,
        next: Option<MarkId>,
    },
    /// A point: in every group's list, with one link pair per group.
    Point { links: SmallVec<[GroupLink; 4]> },
}

/// A persistent position in the document.
#[derive(Debug)]
pub(crate) struct Mark {
    /// Strictly monotone along the document-order list.
    pub(crate) seq: u64,
    pub(crate) chunk: Option<ChunkId>,
    pub(crate) offset: usize,
    /// Document-order list links.
    pub(crate) prev: Option<MarkId>,
    pub(crate) next: Option<MarkId>,
    pub(crate) membership: Membership,
    pub(crate) attrs: AttrSet,
    /// Rendering sub-position within an element. Opaque to the core and
    /// preserved verbatim through every relocation, including chunk splits.
    pub(crate) rpos: u32,
    /// User data cookie, interpreted only by the owning group.
    pub(crate) udata: Option<u64>,
}

impl Mark {
    fn new(seq: u64, at: Ref, membership: Membership) -> Self {
        Self {
            seq,
            chunk: at.chunk,
            offset: at.offset,
            prev: None,
            next: None,
            membership,
            attrs: AttrSet::new(),
            rpos: 0,
            udata: None,
        }
    }

    pub(crate) fn at(&self) -> Ref {
        Ref {
            chunk: self.chunk,
            offset: self.offset,
        }
    }
}

/// A secondary ordering of marks with an optional change observer.
pub(crate) struct Group {
    pub(crate) head: Option<MarkId>,
    pub(crate) tail: Option<MarkId>,
    pub(crate) observer: Option<Box<dyn GroupObserver>>,
}

/// Callbacks delivered to a group owner after the mark system has finished
/// fixing marks up, so every mark position the observer reads is current.
///
/// Observers may read the document and may touch mark attributes, but must
/// not edit the buffer: `insert`, `delete`, `undo` and `redo` fail with
/// [`CoreError::Reentrancy`] for the duration of a callback.
pub trait GroupObserver {
    /// A change `(start, end)` was made at `point`. Emitted by every
    /// mutating operation, including each undo/redo step.
    fn on_change(&mut self, doc: &mut Document, group: GroupId, point: MarkId, start: Ref, end: Ref);

    /// `mark` is about to be freed and is still fully queryable.
    fn on_mark_closed(&mut self, _doc: &mut Document, _group: GroupId, _mark: MarkId) {}
}

/// What an edit did to the chunk list, for mark fixup.
#[derive(Default)]
pub(crate) struct ChangeCtx {
    /// Chunks removed from the active list by this change.
    pub(crate) detached: SmallVec<[ChunkId; 4]>,
    /// `(head, tail, at)` chunk splits performed by this change.
    pub(crate) splits: SmallVec<[(ChunkId, ChunkId, usize); 2]>,
    /// Chunks whose `start` or `end` moved.
    pub(crate) resized: SmallVec<[ChunkId; 4]>,
    /// The insertion point in head-side representation, if this was an
    /// insertion.
    pub(crate) locus: Option<(ChunkId, usize)>,
}

impl ChangeCtx {
    pub(crate) fn affects(&self, chunk: ChunkId) -> bool {
        self.detached.contains(&chunk)
            || self.resized.contains(&chunk)
            || self.splits.iter().any(|&(h, t, _)| h == chunk || t == chunk)
            || self.locus.map(|(c, _)| c == chunk).unwrap_or(false)
    }
}

enum Fix {
    Continue,
    Stop,
}

impl Document {
    /// Register a new mark group. Existing points are spliced into the new
    /// group's list in document order.
    pub fn add_group(&mut self, observer: Option<Box<dyn GroupObserver>>) -> GroupId {
        let gid = GroupId(self.groups.len());
        self.groups.push(Group {
            head: None,
            tail: None,
            observer,
        });
        // Points are members of every group, including this one.
        let mut cur = self.mark_head;
        let mut last: Option<MarkId> = None;
        while let Some(m) = cur {
            if self.is_point(m) {
                if let Membership::Point { links } = &mut self.marks[m].membership {
                    while links.len() <= gid.0 {
                        links.push(GroupLink::default());
                    }
                }
                self.group_link_after(gid, m, last);
                last = Some(m);
            }
            cur = self.marks[m].next;
        }
        gid
    }

    /// Create a mark at end-of-document.
    pub fn new_mark(&mut self, group: Option<GroupId>) -> Result<MarkId> {
        self.mark_at_ref(self.end_ref(), group, true)
    }

    /// Create a mark at a byte offset. `after` picks which side of any
    /// existing marks at the same position the new mark lands on.
    pub fn mark_at(&mut self, offset: usize, group: Option<GroupId>, after: bool) -> Result<MarkId> {
        let at = self.ref_at(offset)?;
        self.mark_at_ref(at, group, after)
    }

    /// Create a mark at a position reference.
    pub fn mark_at_ref(&mut self, at: Ref, group: Option<GroupId>, after: bool) -> Result<MarkId> {
        self.check_ref(at)?;
        if let Some(g) = group {
            if g.0 >= self.groups.len() {
                return Err(CoreError::InvalidArgument("no such group"));
            }
        }
        let membership = match group {
            Some(g) => Membership::Grouped {
                group: g,
                prev: None,
                next: None,
            },
            None => Membership::Ungrouped,
        };
        let m = self.insert_mark(at, after, membership)?;
        Ok(m)
    }

    /// Create a point: a mark belonging to every group, required for editing.
    pub fn new_point(&mut self) -> Result<MarkId> {
        let links = self
            .groups
            .iter()
            .map(|_| GroupLink::default())
            .collect::<SmallVec<[GroupLink; 4]>>();
        self.insert_mark(self.end_ref(), true, Membership::Point { links })
    }

    /// Duplicate a mark: the new mark is co-located with `mark`, placed
    /// immediately after it in document order.
    pub fn dup_mark(&mut self, mark: MarkId, group: Option<GroupId>) -> Result<MarkId> {
        let src = self.marks.get(mark).ok_or(CoreError::InvalidArgument("no such mark"))?;
        let at = src.at();
        if let Some(g) = group {
            if g.0 >= self.groups.len() {
                return Err(CoreError::InvalidArgument("no such group"));
            }
        }
        let membership = match group {
            Some(g) => Membership::Grouped {
                group: g,
                prev: None,
                next: None,
            },
            None => Membership::Ungrouped,
        };
        let new = self.marks.insert(Mark::new(0, at, membership));
        self.link_mark_after(new, Some(mark));
        self.group_splice_near(new);
        Ok(new)
    }

    /// Free a mark. Group owners see `on_mark_closed` while the mark is
    /// still intact.
    pub fn free_mark(&mut self, mark: MarkId) -> Result<()> {
        if !self.marks.contains_key(mark) {
            return Err(CoreError::InvalidArgument("no such mark"));
        }
        for g in self.groups_of(mark) {
            self.notify_mark_closed(g, mark);
        }
        self.unlink_mark_everywhere(mark);
        self.marks.remove(mark);
        Ok(())
    }

    /// Move a mark to a new byte offset, keeping its group membership,
    /// attributes, `rpos` and user data.
    pub fn move_mark_to(&mut self, mark: MarkId, offset: usize) -> Result<()> {
        let at = self.ref_at(offset)?;
        if !self.marks.contains_key(mark) {
            return Err(CoreError::InvalidArgument("no such mark"));
        }
        self.unlink_mark_everywhere(mark);
        self.marks[mark].chunk = at.chunk;
        self.marks[mark].offset = at.offset;
        self.place_mark(mark, at, true)?;
        Ok(())
    }

    /// Next mark in a group's list. Points are members of every group.
    pub fn next_in_group(&self, group: GroupId, mark: MarkId) -> Option<MarkId> {
        self.group_links(group, mark).and_then(|l| l.next)
    }

    /// Previous mark in a group's list.
    pub fn prev_in_group(&self, group: GroupId, mark: MarkId) -> Option<MarkId> {
        self.group_links(group, mark).and_then(|l| l.prev)
    }

    /// Marks of a group in document order, points included.
    pub fn group_members(&self, group: GroupId) -> Vec<MarkId> {
        let mut out = Vec::new();
        let mut cur = self.groups.get(group.0).and_then(|g| g.head);
        while let Some(m) = cur {
            out.push(m);
            cur = self.next_in_group(group, m);
        }
        out
    }

    /// Whether `a` is at or before `b` in document order.
    pub fn ordered(&self, a: MarkId, b: MarkId) -> bool {
        self.marks[a].seq <= self.marks[b].seq
    }

    /// Whether two marks denote the same logical position, even when their
    /// refs straddle a chunk boundary.
    pub fn same_marks(&self, a: MarkId, b: MarkId) -> bool {
        self.same_ref(self.marks[a].at(), self.marks[b].at())
    }

    /// The position a mark currently denotes.
    pub fn mark_ref(&self, mark: MarkId) -> Ref {
        self.marks[mark].at()
    }

    /// The byte offset a mark currently denotes.
    pub fn mark_offset(&self, mark: MarkId) -> Result<usize> {
        self.offset_of_ref(self.marks[mark].at())
    }

    pub fn is_point(&self, mark: MarkId) -> bool {
        matches!(self.marks[mark].membership, Membership::Point { .. })
    }

    pub fn mark_attrs(&self, mark: MarkId) -> &AttrSet {
        &self.marks[mark].attrs
    }

    pub fn mark_attrs_mut(&mut self, mark: MarkId) -> &mut AttrSet {
        &mut self.marks[mark].attrs
    }

    pub fn set_mark_udata(&mut self, mark: MarkId, udata: Option<u64>) {
        self.marks[mark].udata = udata;
    }

    pub fn mark_udata(&self, mark: MarkId) -> Option<u64> {
        self.marks[mark].udata
    }

    pub fn set_mark_rpos(&mut self, mark: MarkId, rpos: u32) {
        self.marks[mark].rpos = rpos;
    }

    pub fn mark_rpos(&self, mark: MarkId) -> u32 {
        self.marks[mark].rpos
    }

    // === internals ===

    fn end_ref(&self) -> Ref {
        Ref::END
    }

    /// Groups a mark belongs to.
    fn groups_of(&self, mark: MarkId) -> Vec<GroupId> {
        match &self.marks[mark].membership {
            Membership::Ungrouped => Vec::new(),
            Membership::Grouped { group, .. } => vec![*group],
            Membership::Point { .. } => (0..self.groups.len()).map(GroupId).collect(),
        }
    }

    fn insert_mark(&mut self, at: Ref, after: bool, membership: Membership) -> Result<MarkId> {
        let m = self.marks.insert(Mark::new(0, at, membership));
        if let Err(e) = self.place_mark(m, at, after) {
            self.marks.remove(m);
            return Err(e);
        }
        Ok(m)
    }

    /// Link `m` into the document list at position `at`, then into its
    /// group lists, and assign it a sequence number.
    fn place_mark(&mut self, m: MarkId, at: Ref, after: bool) -> Result<()> {
        let target = self.offset_of_ref(at)?;
        // Find the document-list neighbour to link after.
        let mut link_after: Option<MarkId> = None;
        let mut cur = self.mark_head;
        while let Some(c) = cur {
            if c != m {
                let coff = self.offset_of_ref(self.marks[c].at())?;
                let goes_before = if after { coff > target } else { coff >= target };
                if goes_before {
                    break;
                }
                link_after = Some(c);
            }
            cur = self.marks[c].next;
        }
        self.link_mark_after(m, link_after);
        self.group_splice_near(m);
        Ok(())
    }

    /// Link a mark into the document list after `after` (None = at head)
    /// and give it a sequence number between its new neighbours.
    pub(crate) fn link_mark_after(&mut self, m: MarkId, after: Option<MarkId>) {
        let next = match after {
            Some(a) => self.marks[a].next,
            None => self.mark_head,
        };
        self.marks[m].prev = after;
        self.marks[m].next = next;
        match after {
            Some(a) => self.marks[a].next = Some(m),
            None => self.mark_head = Some(m),
        }
        match next {
            Some(n) => self.marks[n].prev = Some(m),
            None => self.mark_tail = Some(m),
        }
        let seq = match self.seq_between(after, next) {
            Some(s) => s,
            None => {
                self.renumber_marks();
                self.seq_between(self.marks[m].prev, self.marks[m].next)
                    .expect("renumbered list has room")
            }
        };
        self.marks[m].seq = seq;
    }

    /// Splice `m` into the group lists it belongs to, adjacent to the
    /// nearest group member found by walking the document list.
    fn group_splice_near(&mut self, m: MarkId) {
        for g in self.groups_of(m) {
            // Nearest preceding member of this group in document order.
            let mut cur = self.marks[m].prev;
            let mut link_after = None;
            while let Some(c) = cur {
                if self.in_group(c, g) {
                    link_after = Some(c);
                    break;
                }
                cur = self.marks[c].prev;
            }
            self.group_link_after(g, m, link_after);
        }
    }

    fn in_group(&self, mark: MarkId, group: GroupId) -> bool {
        match &self.marks[mark].membership {
            Membership::Ungrouped => false,
            Membership::Grouped { group: g, .. } => *g == group,
            Membership::Point { .. } => true,
        }
    }

    pub(crate) fn group_links(&self, group: GroupId, mark: MarkId) -> Option<GroupLink> {
        match &self.marks[mark].membership {
            Membership::Ungrouped => None,
            Membership::Grouped { group: g, prev, next } => {
                (*g == group).then_some(GroupLink {
                    prev: *prev,
                    next: *next,
                })
            }
            Membership::Point { links } => links.get(group.0).copied(),
        }
    }

    fn set_group_links(&mut self, group: GroupId, mark: MarkId, link: GroupLink) {
        match &mut self.marks[mark].membership {
            Membership::Ungrouped => {}
            Membership::Grouped { group: g, prev, next } => {
                if *g == group {
                    *prev = link.prev;
                    *next = link.next;
                }
            }
            Membership::Point { links } => {
                while links.len() <= group.0 {
                    links.push(GroupLink::default());
                }
                links[group.0] = link;
            }
        }
    }

    fn group_link_after(&mut self, group: GroupId, m: MarkId, after: Option<MarkId>) {
        let next = match after {
            Some(a) => self.group_links(group, a).and_then(|l| l.next),
            None => self.groups[group.0].head,
        };
        self.set_group_links(group, m, GroupLink { prev: after, next });
        match after {
            Some(a) => {
                let mut l = self.group_links(group, a).unwrap_or_default();
                l.next = Some(m);
                self.set_group_links(group, a, l);
            }
            None => self.groups[group.0].head = Some(m),
        }
        match next {
            Some(n) => {
                let mut l = self.group_links(group, n).unwrap_or_default();
                l.prev = Some(m);
                self.set_group_links(group, n, l);
            }
            None => self.groups[group.0].tail = Some(m),
        }
    }

    fn group_unlink(&mut self, group: GroupId, m: MarkId) {
        let Some(l) = self.group_links(group, m) else {
            return;
        };
        match l.prev {
            Some(p) => {
                let mut pl = self.group_links(group, p).unwrap_or_default();
                pl.next = l.next;
                self.set_group_links(group, p, pl);
            }
            None => self.groups[group.0].head = l.next,
        }
        match l.next {
            Some(n) => {
                let mut nl = self.group_links(group, n).unwrap_or_default();
                nl.prev = l.prev;
                self.set_group_links(group, n, nl);
            }
            None => self.groups[group.0].tail = l.prev,
        }
        self.set_group_links(group, m, GroupLink::default());
    }

    fn unlink_mark_everywhere(&mut self, m: MarkId) {
        for g in self.groups_of(m) {
            self.group_unlink(g, m);
        }
        let (prev, next) = (self.marks[m].prev, self.marks[m].next);
        match prev {
            Some(p) => self.marks[p].next = next,
            None => self.mark_head = next,
        }
        match next {
            Some(n) => self.marks[n].prev = prev,
            None => self.mark_tail = prev,
        }
        self.marks[m].prev = None;
        self.marks[m].next = None;
    }

    /// A sequence number strictly between two neighbours, or None when the
    /// gap is exhausted.
    fn seq_between(&self, prev: Option<MarkId>, next: Option<MarkId>) -> Option<u64> {
        let lo = prev.map(|p| self.marks[p].seq);
        let hi = next.map(|n| self.marks[n].seq);
        match (lo, hi) {
            (None, None) => Some(SEQ_GAP),
            (Some(lo), None) => lo.checked_add(SEQ_GAP),
            (None, Some(hi)) => (hi >= 2).then_some(hi / 2),
            (Some(lo), Some(hi)) => {
                let mid = lo + (hi - lo) / 2;
                (mid > lo).then_some(mid)
            }
        }
    }

    /// Reassign sequence numbers along the whole document list.
    fn renumber_marks(&mut self) {
        debug!("mark sequence space exhausted, renumbering");
        let mut seq = SEQ_GAP;
        let mut cur = self.mark_head;
        while let Some(m) = cur {
            self.marks[m].seq = seq;
            seq += SEQ_GAP;
            cur = self.marks[m].next;
        }
        self.next_seq = seq;
    }

    // === change fixup ===

    /// Fix marks up after a live edit made at `point`.
    pub(crate) fn fixup_live(&mut self, point: MarkId, start: Ref, end: Ref, ctx: &ChangeCtx) {
        // Marks strictly before the edit point, in reverse order.
        let mut cur = self.marks[point].prev;
        while let Some(m) = cur {
            let prev = self.marks[m].prev;
            match self.prior_fixup(m, start, end, ctx) {
                Fix::Continue => cur = prev,
                Fix::Stop => break,
            }
        }
        // The point and everything after it, in forward order.
        let mut cur = Some(point);
        while let Some(m) = cur {
            let next = self.marks[m].next;
            match self.posterior_fixup(m, start, end, ctx) {
                Fix::Continue => cur = next,
                Fix::Stop => break,
            }
        }
    }

    /// Fix marks up after one undo/redo record was applied. There is no
    /// reliable pivot near the change, so every mark bound to the affected
    /// chunk is examined.
    pub(crate) fn fixup_replay(&mut self, collapse: Ref, ctx: &ChangeCtx) {
        let mut cur = self.mark_head;
        while let Some(m) = cur {
            let next = self.marks[m].next;
            if let Some(c) = self.marks[m].chunk {
                if ctx.affects(c) {
                    let offset = self.marks[m].offset;
                    let chunk = &self.chunks[c];
                    if !chunk.linked {
                        // A rejoined neighbour may have absorbed the offset.
                        let dest = self.absorb(c, offset).unwrap_or(collapse);
                        self.set_mark_ref(m, dest);
                    } else if offset < chunk.start {
                        let dest = self
                            .absorb(c, offset)
                            .unwrap_or(Ref::at(c, self.chunks[c].start));
                        self.set_mark_ref(m, dest);
                    } else if offset > chunk.end {
                        // Prefer the successor's start: that representation
                        // keeps the mark after the removed range if the
                        // removal is replayed back in.
                        let dest = self.absorb(c, offset).unwrap_or_else(|| {
                            match self.chunks[c].next.filter(|&n| self.chunks[n].linked) {
                                Some(n) => Ref::at(n, self.chunks[n].start),
                                None => Ref::at(c, self.chunks[c].end),
                            }
                        });
                        self.set_mark_ref(m, dest);
                    }
                }
            }
            cur = next;
        }
    }

    fn prior_fixup(&mut self, m: MarkId, start: Ref, end: Ref, ctx: &ChangeCtx) -> Fix {
        let at = self.marks[m].at();
        if let Some(c) = at.chunk {
            if ctx.affects(c) {
                let chunk = &self.chunks[c];
                if !chunk.linked {
                    self.set_mark_ref(m, start);
                } else if self.same_ref(at, end) && !self.same_ref(start, end) {
                    // Dragged into the inserted range: pin to the front.
                    self.set_mark_ref(m, start);
                } else if at.offset < chunk.start {
                    let dest = Ref::at(c, self.chunks[c].start);
                    self.set_mark_ref(m, dest);
                } else if at.offset > chunk.end {
                    let dest = Ref::at(c, self.chunks[c].end);
                    self.set_mark_ref(m, dest);
                }
                return Fix::Continue;
            }
        }
        // Unaffected chunk: a mark can still have been dragged to the end of
        // the inserted range through a boundary representation.
        if self.same_ref(at, end) && !self.same_ref(start, end) {
            self.set_mark_ref(m, start);
            return Fix::Continue;
        }
        if self.same_ref(at, start) {
            return Fix::Continue;
        }
        Fix::Stop
    }

    fn posterior_fixup(&mut self, m: MarkId, start: Ref, end: Ref, ctx: &ChangeCtx) -> Fix {
        let at = self.marks[m].at();
        // A mark sitting exactly on the insertion point advances past the
        // inserted text.
        if let (Some((lc, loff)), Some(c)) = (ctx.locus, at.chunk) {
            if lc == c && loff == at.offset {
                self.set_mark_ref(m, end);
                return Fix::Continue;
            }
        }
        if let Some(c) = at.chunk {
            if ctx.affects(c) {
                let chunk = &self.chunks[c];
                if !chunk.linked {
                    let dest = self.absorb(c, at.offset).unwrap_or(end);
                    self.set_mark_ref(m, dest);
                } else if at.offset > chunk.end {
                    // The chunk was split: adopt the sibling covering the
                    // offset, else clamp to the shortened end.
                    let dest = self
                        .sibling_containing(c, at.offset)
                        .map(|s| Ref::at(s, at.offset))
                        .unwrap_or(Ref::at(c, self.chunks[c].end));
                    self.set_mark_ref(m, dest);
                } else if at.offset < chunk.start {
                    let dest = Ref::at(c, self.chunks[c].start);
                    self.set_mark_ref(m, dest);
                }
                return Fix::Continue;
            }
        }
        if self.same_ref(at, start) || self.same_ref(at, end) {
            return Fix::Continue;
        }
        Fix::Stop
    }

    fn set_mark_ref(&mut self, m: MarkId, to: Ref) {
        self.marks[m].chunk = to.chunk;
        self.marks[m].offset = to.offset;
    }

    /// Whether a linked neighbour of `chunk` covers `offset` in the same
    /// allocation, i.e. a rejoin or split has absorbed the position.
    pub(crate) fn absorb(&self, chunk: ChunkId, offset: usize) -> Option<Ref> {
        let c = &self.chunks[chunk];
        for n in [c.prev, c.next].into_iter().flatten() {
            if let Some(nc) = self.chunks.get(n) {
                if nc.linked && nc.alloc == c.alloc && nc.contains(offset) {
                    return Some(Ref::at(n, offset));
                }
            }
        }
        None
    }

    /// Scan forward from `chunk` for the split sibling whose range covers
    /// `offset`.
    pub(crate) fn sibling_containing(&self, chunk: ChunkId, offset: usize) -> Option<ChunkId> {
        let alloc = self.chunks[chunk].alloc;
        let mut cur = self.chunks[chunk].next;
        while let Some(n) = cur {
            let nc = &self.chunks[n];
            if nc.alloc == alloc && nc.contains(offset) {
                return Some(n);
            }
            cur = nc.next;
        }
        None
    }

    // === notifications ===

    /// Deliver `on_change` to every group owner. Buffer edits are rejected
    /// for the duration of each callback.
    pub(crate) fn notify_change(&mut self, point: MarkId, start: Ref, end: Ref) {
        for gi in 0..self.groups.len() {
            if let Some(mut obs) = self.groups[gi].observer.take() {
                self.notifying = true;
                obs.on_change(self, GroupId(gi), point, start, end);
                self.notifying = false;
                self.groups[gi].observer = Some(obs);
            }
        }
    }

    fn notify_mark_closed(&mut self, group: GroupId, mark: MarkId) {
        if let Some(mut obs) = self.groups[group.0].observer.take() {
            self.notifying = true;
            obs.on_mark_closed(self, group, mark);
            self.notifying = false;
            self.groups[group.0].observer = Some(obs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::undo::UndoOutcome;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Log {
        changes: Vec<(usize, usize)>,
        closed: Vec<MarkId>,
    }

    struct Recorder(Rc<RefCell<Log>>);

    impl GroupObserver for Recorder {
        fn on_change(
            &mut self,
            doc: &mut Document,
            _group: GroupId,
            _point: MarkId,
            start: Ref,
            end: Ref,
        ) {
            let s = doc.offset_of_ref(start).unwrap();
            let e = doc.offset_of_ref(end).unwrap();
            self.0.borrow_mut().changes.push((s, e));
        }

        fn on_mark_closed(&mut self, _doc: &mut Document, _group: GroupId, mark: MarkId) {
            self.0.borrow_mut().closed.push(mark);
        }
    }

    #[test]
    fn test_marks_shift_on_insert() {
        let mut doc = Document::from_bytes(b"0123456789ab");
        let a = doc.mark_at(3, None, true).unwrap();
        let b = doc.mark_at(7, None, true).unwrap();
        let c = doc.mark_at(7, None, true).unwrap(); // lands after b

        let point = doc.new_point().unwrap();
        doc.move_mark_to(point, 5).unwrap();
        doc.insert(point, "WXYZ").unwrap();

        assert_eq!(doc.text(), "01234WXYZ56789ab");
        assert_eq!(doc.mark_offset(a).unwrap(), 3);
        assert_eq!(doc.mark_offset(b).unwrap(), 11);
        assert_eq!(doc.mark_offset(c).unwrap(), 11);
        // b stays strictly before c in the list.
        assert!(doc.ordered(b, c));
        assert!(doc.same_marks(b, c));
        assert!(!doc.same_marks(a, b));
    }

    #[test]
    fn test_marks_collapse_on_delete() {
        let mut doc = Document::from_bytes(b"0123456789");
        let m3 = doc.mark_at(3, None, true).unwrap();
        let m5 = doc.mark_at(5, None, true).unwrap();
        let m7 = doc.mark_at(7, None, true).unwrap();

        let point = doc.new_point().unwrap();
        doc.move_mark_to(point, 2).unwrap();
        doc.delete(point, 6).unwrap();

        assert_eq!(doc.text(), "0189");
        for m in [m3, m5, m7] {
            assert_eq!(doc.mark_offset(m).unwrap(), 2);
        }
        assert!(doc.ordered(m3, m5));
        assert!(doc.ordered(m5, m7));
    }

    #[test]
    fn test_mark_tie_break() {
        let mut doc = Document::from_bytes(b"abcdef");
        let first = doc.mark_at(3, None, true).unwrap();
        let before = doc.mark_at(3, None, false).unwrap();
        let after = doc.mark_at(3, None, true).unwrap();
        assert!(doc.ordered(before, first));
        assert!(doc.ordered(first, after));
        assert!(doc.same_marks(before, after));
    }

    #[test]
    fn test_points_belong_to_every_group() {
        let mut doc = Document::from_bytes(b"abcdef");
        let g1 = doc.add_group(None);
        let point = doc.new_point().unwrap();
        // A group registered after the point exists still picks it up.
        let g2 = doc.add_group(None);

        let m1 = doc.mark_at(2, Some(g1), true).unwrap();
        let m2 = doc.mark_at(4, Some(g2), true).unwrap();

        assert_eq!(doc.group_members(g1), vec![m1, point]);
        assert_eq!(doc.group_members(g2), vec![m2, point]);
        assert_eq!(doc.next_in_group(g1, m1), Some(point));
        assert_eq!(doc.prev_in_group(g2, point), Some(m2));
        assert_eq!(doc.next_in_group(g2, point), None);
        assert!(doc.is_point(point));
        assert!(!doc.is_point(m1));
    }

    #[test]
    fn test_group_required_to_exist() {
        let mut doc = Document::from_bytes(b"abc");
        assert_eq!(
            doc.mark_at(1, Some(GroupId(5)), true),
            Err(CoreError::InvalidArgument("no such group"))
        );
    }

    #[test]
    fn test_observer_sees_changes_and_closed_marks() {
        let log = Rc::new(RefCell::new(Log::default()));
        let mut doc = Document::new();
        let g = doc.add_group(Some(Box::new(Recorder(log.clone()))));

        let point = doc.new_point().unwrap();
        doc.insert(point, "hello\n").unwrap();
        assert_eq!(log.borrow().changes, vec![(0, 6)]);

        doc.move_mark_to(point, 1).unwrap();
        doc.delete(point, 2).unwrap();
        assert_eq!(log.borrow().changes.last(), Some(&(1, 1)));

        let m = doc.mark_at(2, Some(g), true).unwrap();
        doc.free_mark(m).unwrap();
        assert_eq!(log.borrow().closed, vec![m]);
    }

    #[test]
    fn test_undo_steps_report_ranges_to_observers() {
        let log = Rc::new(RefCell::new(Log::default()));
        let mut doc = Document::from_bytes(b"0123456789");
        doc.add_group(Some(Box::new(Recorder(log.clone()))));

        let point = doc.new_point().unwrap();
        doc.move_mark_to(point, 4).unwrap();
        doc.insert(point, "xy").unwrap();
        let edits = log.borrow().changes.len();

        while !matches!(doc.undo(point).unwrap(), UndoOutcome::Complete(..)) {}
        // Each undo record notifies once, same contract as live edits.
        assert!(log.borrow().changes.len() > edits);
    }

    #[test]
    fn test_undo_redo_restores_mark_positions() {
        let mut doc = Document::from_bytes(b"0123456789ab");
        let a = doc.mark_at(3, None, true).unwrap();
        let b = doc.mark_at(7, None, true).unwrap();
        let point = doc.new_point().unwrap();
        doc.move_mark_to(point, 5).unwrap();
        doc.insert(point, "WXYZ").unwrap();
        assert_eq!(doc.mark_offset(point).unwrap(), 9);
        assert_eq!(doc.mark_offset(b).unwrap(), 11);

        while !matches!(doc.undo(point).unwrap(), UndoOutcome::Complete(..)) {}
        assert_eq!(doc.text(), "0123456789ab");
        assert_eq!(doc.mark_offset(a).unwrap(), 3);
        assert_eq!(doc.mark_offset(b).unwrap(), 7);
        assert_eq!(doc.mark_offset(point).unwrap(), 5);

        while !matches!(doc.redo(point).unwrap(), UndoOutcome::Complete(..)) {}
        assert_eq!(doc.text(), "01234WXYZ56789ab");
        assert_eq!(doc.mark_offset(a).unwrap(), 3);
        assert_eq!(doc.mark_offset(b).unwrap(), 11);
        assert_eq!(doc.mark_offset(point).unwrap(), 9);
    }

    #[test]
    fn test_sequence_renumbering_keeps_order() {
        let mut doc = Document::from_bytes(b"abcdef");
        let anchor = doc.mark_at(3, None, true).unwrap();
        // Bisecting the same gap repeatedly exhausts it and forces a bulk
        // renumber somewhere along the way.
        for _ in 0..40 {
            doc.dup_mark(anchor, None).unwrap();
        }
        let mut cur = doc.mark_head;
        let mut prev_seq = None;
        while let Some(m) = cur {
            let seq = doc.marks[m].seq;
            if let Some(p) = prev_seq {
                assert!(seq > p, "sequence numbers must stay strictly monotone");
            }
            prev_seq = Some(seq);
            cur = doc.marks[m].next;
        }
    }

    #[test]
    fn test_move_and_dup() {
        let mut doc = Document::from_bytes(b"abcdef");
        let m = doc.mark_at(1, None, true).unwrap();
        doc.move_mark_to(m, 4).unwrap();
        assert_eq!(doc.mark_offset(m).unwrap(), 4);

        let d = doc.dup_mark(m, None).unwrap();
        assert!(doc.same_marks(m, d));
        assert!(doc.ordered(m, d));
        assert_eq!(doc.mark_offset(d).unwrap(), 4);
    }

    #[test]
    fn test_udata_and_rpos_ride_along() {
        let mut doc = Document::from_bytes(b"0123456789");
        let m = doc.mark_at(6, None, true).unwrap();
        doc.set_mark_udata(m, Some(42));
        doc.set_mark_rpos(m, 7);
        doc.mark_attrs_mut(m).set("face", "bold").unwrap();

        // A split right at the mark relocates it; everything rides along.
        let point = doc.new_point().unwrap();
        doc.move_mark_to(point, 4).unwrap();
        doc.insert(point, "xy").unwrap();

        assert_eq!(doc.mark_offset(m).unwrap(), 8);
        assert_eq!(doc.mark_udata(m), Some(42));
        assert_eq!(doc.mark_rpos(m), 7);
        assert_eq!(doc.mark_attrs(m).find("face"), Some("bold"));
    }

    #[test]
    fn test_free_mark_twice_fails() {
        let mut doc = Document::from_bytes(b"abc");
        let m = doc.mark_at(1, None, true).unwrap();
        doc.free_mark(m).unwrap();
        assert_eq!(
            doc.free_mark(m),
            Err(CoreError::InvalidArgument("no such mark"))
        );
    }
}
