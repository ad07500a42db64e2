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

//! The document: a piece table over immutable allocations.
//!
//! Content lives in append-only [`Allocation`]s; the ordered chunk list maps
//! views of those allocations to the current document text. Edits never move
//! bytes that are already written: an insertion appends to an allocation and
//! splices chunks, a deletion trims or detaches chunks. Every chunk edit is
//! recorded in the undo log, and after all chunk mutations of an operation
//! the mark system is handed the changed `(start, end)` range so marks and
//! group owners stay coherent.
//!
//! [`Allocation`]: crate::chunk::Allocation

use slotmap::SlotMap;
use tracing::{debug, trace};

use crate::chunk::{Allocation, Chunk, Ref, DEFAULT_ALLOC};
use crate::error::{CoreError, Result};
use crate::mark::{ChangeCtx, Group, Mark};
use crate::undo::UndoLog;
use crate::{AllocId, ChunkId, MarkId};

/// A document: piece-table text storage plus the mark lists anchored to it.
pub struct Document {
    pub(crate) allocs: SlotMap<AllocId, Allocation>,
    pub(crate) chunks: SlotMap<ChunkId, Chunk>,
    /// Active chunk list bounds.
    pub(crate) head: Option<ChunkId>,
    pub(crate) tail: Option<ChunkId>,
    /// The allocation currently accepting appends.
    pub(crate) latest: Option<AllocId>,
    pub(crate) marks: SlotMap<MarkId, Mark>,
    pub(crate) mark_head: Option<MarkId>,
    pub(crate) mark_tail: Option<MarkId>,
    pub(crate) groups: Vec<Group>,
    pub(crate) log: UndoLog,
    /// Set while group observers run; edits are rejected during that window.
    pub(crate) notifying: bool,
    pub(crate) next_seq: u64,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create an empty document.
    pub fn new() -> Self {
        Self {
            allocs: SlotMap::with_key(),
            chunks: SlotMap::with_key(),
            head: None,
            tail: None,
            latest: None,
            marks: SlotMap::with_key(),
            mark_head: None,
            mark_tail: None,
            groups: Vec::new(),
            log: UndoLog::default(),
            notifying: false,
            next_seq: 0,
        }
    }

    /// Create a document from raw bytes: one allocation of the input's size
    /// and a single chunk spanning it. Invalid UTF-8 is preserved
    /// byte-for-byte.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut doc = Self::new();
        if !data.is_empty() {
            let mut alloc = Allocation::new(data.len());
            alloc.append(data);
            let aid = doc.allocs.insert(alloc);
            doc.latest = Some(aid);
            let cid = doc.chunks.insert(Chunk::new(aid, 0, data.len()));
            doc.link_chunk_after(cid, None);
        }
        doc
    }

    /// Serialize the document by concatenating every active chunk's bytes
    /// in list order.
    pub fn content_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len_bytes());
        let mut cur = self.head;
        while let Some(cid) = cur {
            let c = &self.chunks[cid];
            out.extend_from_slice(self.allocs[c.alloc].slice(c.start, c.end));
            cur = c.next;
        }
        out
    }

    /// The document text, with invalid bytes shown as replacement characters.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.content_bytes()).into_owned()
    }

    /// Total content length in bytes.
    pub fn len_bytes(&self) -> usize {
        let mut len = 0;
        let mut cur = self.head;
        while let Some(cid) = cur {
            let c = &self.chunks[cid];
            len += c.len();
            cur = c.next;
        }
        len
    }

    // === editing ===

    /// Insert `text` at `point`, returning the bounds of the inserted range.
    /// The inserted bytes inherit the attributes of the byte immediately
    /// preceding the point, or none at document start.
    pub fn insert(&mut self, point: MarkId, text: &str) -> Result<(Ref, Ref)> {
        self.ensure_editable()?;
        let at = self.point_ref(point)?;
        if text.is_empty() {
            return Ok((at, at));
        }
        self.begin_edit();
        let (start, end, ctx) = self.insert_at(at, text.as_bytes());
        self.fixup_live(point, start, end, &ctx);
        self.check_consistent();
        self.notify_change(point, start, end);
        Ok((start, end))
    }

    /// Delete up to `n` bytes at `point`, stopping at end-of-document.
    /// Returns the post-deletion position.
    pub fn delete(&mut self, point: MarkId, n: usize) -> Result<Ref> {
        self.ensure_editable()?;
        let at = self.point_ref(point)?;
        if n == 0 {
            return Ok(at);
        }
        self.begin_edit();
        let (start, end, ctx) = self.delete_at(at, n);
        self.fixup_live(point, start, end, &ctx);
        self.check_consistent();
        self.notify_change(point, start, end);
        Ok(end)
    }

    /// Reject edits while group observers run.
    pub(crate) fn ensure_editable(&self) -> Result<()> {
        if self.notifying {
            return Err(CoreError::Reentrancy);
        }
        Ok(())
    }

    /// Check that `point` names a live point.
    pub(crate) fn expect_point(&self, point: MarkId) -> Result<()> {
        if !self.marks.contains_key(point) {
            return Err(CoreError::InvalidArgument("no such mark"));
        }
        if !self.is_point(point) {
            return Err(CoreError::InvalidArgument("editing requires a point"));
        }
        Ok(())
    }

    /// Resolve the editing point, insisting on an actual point.
    fn point_ref(&self, point: MarkId) -> Result<Ref> {
        self.expect_point(point)?;
        Ok(self.mark_ref(point))
    }

    /// Start a user-visible transaction: clear the redo stack (collecting
    /// chunks that no record references any more) and arm the `first` flag.
    fn begin_edit(&mut self) {
        let cleared = self.log.clear_redo();
        for cid in cleared {
            let orphaned = self
                .chunks
                .get(cid)
                .map(|c| !c.linked)
                .unwrap_or(false)
                && !self.log.references(cid);
            if orphaned {
                trace!(?cid, "dropping chunk orphaned by cleared redo records");
                self.chunks.remove(cid);
            }
        }
        self.log.begin_transaction();
    }

    fn insert_at(&mut self, at: Ref, bytes: &[u8]) -> (Ref, Ref, ChangeCtx) {
        let mut ctx = ChangeCtx::default();
        let mut consumed = 0;
        let mut start: Option<Ref> = None;
        let mut end = at;

        // Resolve the anchor chunk the new bytes go after, splitting if the
        // point is in the middle of a chunk.
        let mut anchor: Option<ChunkId> = match at.chunk {
            None => self.tail,
            Some(c) => {
                let (cstart, cend, cprev) = {
                    let chunk = &self.chunks[c];
                    (chunk.start, chunk.end, chunk.prev)
                };
                if at.offset == cstart {
                    cprev
                } else if at.offset == cend {
                    Some(c)
                } else {
                    self.split_chunk(c, at.offset, &mut ctx);
                    Some(c)
                }
            }
        };
        if let Some(a) = anchor {
            ctx.locus = Some((a, self.chunks[a].end));
        }

        // Fast path: the point sits at the end of a chunk whose bytes are
        // the current tail of the latest allocation, so the chunk itself can
        // grow into the allocation's free space.
        if let Some(a) = anchor {
            let (calloc, cend) = {
                let c = &self.chunks[a];
                (c.alloc, c.end)
            };
            let at_alloc_tail =
                Some(calloc) == self.latest && cend == self.allocs[calloc].used();
            if at_alloc_tail {
                let take = utf8_clip(bytes, self.allocs[calloc].remaining());
                if take > 0 {
                    self.allocs[calloc].append(&bytes[..take]);
                    self.log.push(a, false, take as isize);
                    self.chunks[a].end = cend + take;
                    ctx.resized.push(a);
                    start = Some(Ref::at(a, cend));
                    end = Ref::at(a, cend + take);
                    consumed = take;
                }
            }
        }

        // General path: copy the remaining bytes into allocations with free
        // space, one new chunk per contiguous stretch.
        while consumed < bytes.len() {
            let rest = &bytes[consumed..];
            let room = self
                .latest
                .map(|a| self.allocs[a].remaining())
                .unwrap_or(0);
            let take = utf8_clip(rest, room);
            if take == 0 {
                let size = DEFAULT_ALLOC.max(rest.len());
                debug!(size, "adding allocation");
                self.latest = Some(self.allocs.insert(Allocation::new(size)));
                continue;
            }
            let aid = self.latest.expect("an allocation was just ensured");
            let off = self.allocs[aid].append(&rest[..take]);
            let attrs = self.inherited_attrs(anchor, off);
            let cid = self.chunks.insert(Chunk::new(aid, off, off));
            self.chunks[cid].attrs = attrs;
            self.link_chunk_after(cid, anchor);
            self.log.push(cid, false, take as isize);
            self.chunks[cid].end = off + take;
            ctx.resized.push(cid);
            if start.is_none() {
                start = Some(Ref::at(cid, off));
            }
            end = Ref::at(cid, off + take);
            anchor = Some(cid);
            consumed += take;
        }

        let start = start.unwrap_or(at);
        (start, end, ctx)
    }

    /// Attributes for bytes inserted after `anchor`: the effective values on
    /// the byte immediately preceding the insertion, re-keyed at `new_start`.
    fn inherited_attrs(&self, anchor: Option<ChunkId>, new_start: usize) -> crate::AttrSet {
        match anchor {
            Some(a) => {
                let c = &self.chunks[a];
                if c.len() > 0 {
                    c.attrs.collect((c.end - 1) as u64, new_start as u64)
                } else {
                    crate::AttrSet::new()
                }
            }
            None => crate::AttrSet::new(),
        }
    }

    fn delete_at(&mut self, at: Ref, n: usize) -> (Ref, Ref, ChangeCtx) {
        let mut ctx = ChangeCtx::default();
        let mut cur = self.normalize(at);
        let mut remaining = n;
        while remaining > 0 {
            let Some(cid) = cur.chunk else {
                break;
            };
            let (cstart, cend) = {
                let c = &self.chunks[cid];
                (c.start, c.end)
            };
            let off = cur.offset;
            if off == cstart && remaining >= cend - cstart {
                // Whole chunk: detach it, preserving its list slot for undo.
                let len = cend - cstart;
                self.log.push(cid, false, -(len as isize));
                self.chunks[cid].end = cstart;
                let next = self.chunks[cid].next;
                self.detach_chunk(cid);
                ctx.detached.push(cid);
                remaining -= len;
                cur = self.chunk_start_ref(next);
            } else if off == cstart {
                // Prefix: advance the start.
                let cut = remaining;
                self.log.push(cid, true, cut as isize);
                self.chunks[cid].start = cstart + cut;
                let ns = self.chunks[cid].start;
                self.chunks[cid].attrs.rebase(ns as u64);
                ctx.resized.push(cid);
                remaining = 0;
                cur = Ref::at(cid, ns);
            } else if off + remaining >= cend {
                // Suffix: retract the end.
                let len = cend - off;
                self.log.push(cid, false, -(len as isize));
                self.chunks[cid].end = off;
                self.chunks[cid].attrs.trim(off as u64);
                ctx.resized.push(cid);
                remaining -= len;
                let next = self.chunks[cid].next;
                cur = if remaining > 0 {
                    self.chunk_start_ref(next)
                } else {
                    Ref::at(cid, off)
                };
            } else {
                // Interior: split first, then the suffix case applies.
                let tail = self.split_chunk(cid, off + remaining, &mut ctx);
                let len = remaining;
                self.log.push(cid, false, -(len as isize));
                self.chunks[cid].end = off;
                self.chunks[cid].attrs.trim(off as u64);
                ctx.resized.push(cid);
                remaining = 0;
                cur = Ref::at(tail, self.chunks[tail].start);
            }
        }
        (cur, cur, ctx)
    }

    fn chunk_start_ref(&self, chunk: Option<ChunkId>) -> Ref {
        match chunk {
            Some(c) => Ref::at(c, self.chunks[c].start),
            None => Ref::END,
        }
    }

    /// Split `chunk` at absolute offset `at`, producing a tail sibling that
    /// covers `[at, end)`. Both the tail's growth and the head's truncation
    /// are recorded, so undo reverses the truncation before emptying the
    /// tail.
    pub(crate) fn split_chunk(&mut self, chunk: ChunkId, at: usize, ctx: &mut ChangeCtx) -> ChunkId {
        let (alloc, end) = {
            let c = &self.chunks[chunk];
            debug_assert!(at > c.start && at < c.end, "split point must be interior");
            (c.alloc, c.end)
        };
        let len = end - at;
        let tail_attrs = self.chunks[chunk].attrs.split_off(at as u64);
        let tid = self.chunks.insert(Chunk::new(alloc, at, at));
        self.chunks[tid].attrs = tail_attrs;
        self.link_chunk_after(tid, Some(chunk));
        self.log.push(tid, false, len as isize);
        self.chunks[tid].end = at + len;
        self.log.push(chunk, false, -(len as isize));
        self.chunks[chunk].end = at;
        ctx.splits.push((chunk, tid, at));
        tid
    }

    // === chunk list surgery ===

    /// Link `c` into the active list after `after` (None = at the head).
    pub(crate) fn link_chunk_after(&mut self, c: ChunkId, after: Option<ChunkId>) {
        let next = match after {
            Some(a) => self.chunks[a].next,
            None => self.head,
        };
        self.chunks[c].prev = after;
        self.chunks[c].next = next;
        self.chunks[c].linked = true;
        match after {
            Some(a) => self.chunks[a].next = Some(c),
            None => self.head = Some(c),
        }
        match next {
            Some(n) => self.chunks[n].prev = Some(c),
            None => self.tail = Some(c),
        }
    }

    /// Unlink `c` from the active list, keeping its own `prev`/`next` so the
    /// undo log can splice it back into its old slot.
    pub(crate) fn detach_chunk(&mut self, c: ChunkId) {
        let (prev, next) = (self.chunks[c].prev, self.chunks[c].next);
        match prev {
            Some(p) => self.chunks[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.chunks[n].prev = prev,
            None => self.tail = prev,
        }
        self.chunks[c].linked = false;
    }

    /// Splice a detached chunk back into the slot preserved at detach time.
    pub(crate) fn relink_chunk(&mut self, c: ChunkId) {
        debug_assert!(!self.chunks[c].linked, "chunk is already linked");
        let (prev, next) = (self.chunks[c].prev, self.chunks[c].next);
        match prev {
            Some(p) => self.chunks[p].next = Some(c),
            None => self.head = Some(c),
        }
        match next {
            Some(n) => self.chunks[n].prev = Some(c),
            None => self.tail = Some(c),
        }
        self.chunks[c].linked = true;
    }

    // === positions ===

    /// Validate that a ref denotes a reachable position.
    pub fn check_ref(&self, at: Ref) -> Result<()> {
        match at.chunk {
            None => Ok(()),
            Some(c) => {
                let chunk = self
                    .chunks
                    .get(c)
                    .ok_or(CoreError::OutOfBounds)?;
                if !chunk.linked || !chunk.contains(at.offset) {
                    return Err(CoreError::OutOfBounds);
                }
                Ok(())
            }
        }
    }

    /// The canonical representation of a position: inside a chunk, at the
    /// start of the following chunk when on a boundary, or `Ref::END`.
    pub(crate) fn normalize(&self, at: Ref) -> Ref {
        let Some(c) = at.chunk else {
            return Ref::END;
        };
        let chunk = &self.chunks[c];
        if at.offset < chunk.end {
            return at;
        }
        match chunk.next {
            Some(n) => Ref::at(n, self.chunks[n].start),
            None => Ref::END,
        }
    }

    /// Whether two refs denote the same logical position, even across a
    /// chunk boundary.
    pub fn same_ref(&self, a: Ref, b: Ref) -> bool {
        self.normalize(a) == self.normalize(b)
    }

    /// The position at a byte offset. `len_bytes()` maps to `Ref::END`.
    pub fn ref_at(&self, offset: usize) -> Result<Ref> {
        let mut pos = 0;
        let mut cur = self.head;
        while let Some(cid) = cur {
            let c = &self.chunks[cid];
            if offset < pos + c.len() {
                return Ok(Ref::at(cid, c.start + (offset - pos)));
            }
            pos += c.len();
            cur = c.next;
        }
        if offset == pos {
            Ok(Ref::END)
        } else {
            Err(CoreError::OutOfBounds)
        }
    }

    /// The byte offset of a position.
    pub fn offset_of_ref(&self, at: Ref) -> Result<usize> {
        self.check_ref(at)?;
        match at.chunk {
            None => Ok(self.len_bytes()),
            Some(target) => {
                let mut pos = 0;
                let mut cur = self.head;
                while let Some(cid) = cur {
                    let c = &self.chunks[cid];
                    if cid == target {
                        return Ok(pos + (at.offset - c.start));
                    }
                    pos += c.len();
                    cur = c.next;
                }
                Err(CoreError::OutOfBounds)
            }
        }
    }

    // === traversal ===

    /// Decode one code point at `at`, crossing chunk boundaries. Invalid
    /// bytes yield the replacement character and advance one byte.
    pub fn next_char(&self, at: Ref) -> Option<(char, Ref)> {
        self.next_char_width(at).map(|(ch, _, next)| (ch, next))
    }

    /// `next_char` plus the byte width that was consumed.
    pub(crate) fn next_char_width(&self, at: Ref) -> Option<(char, usize, Ref)> {
        let at = self.normalize(at);
        at.chunk?;
        let mut buf = [0u8; 4];
        let got = self.peek_bytes(at, &mut buf);
        match decode_first_char(&buf[..got]) {
            Some((ch, width)) => Some((ch, width, self.advance_bytes(at, width))),
            None => Some((
                char::REPLACEMENT_CHARACTER,
                1,
                self.advance_bytes(at, 1),
            )),
        }
    }

    /// Decode the code point ending at `at`, crossing chunk boundaries.
    /// Invalid bytes yield the replacement character and retreat one byte.
    pub fn prev_char(&self, at: Ref) -> Option<(char, Ref)> {
        let mut tail = [0u8; 4];
        let got = self.peek_bytes_back(at, &mut tail);
        if got == 0 {
            return None;
        }
        for width in 1..=got {
            if let Some((ch, w)) = decode_first_char(&tail[4 - width..]) {
                if w == width {
                    return Some((ch, self.retreat_bytes(at, width)));
                }
            }
        }
        Some((char::REPLACEMENT_CHARACTER, self.retreat_bytes(at, 1)))
    }

    /// Advance `at` past the longest common prefix of the document content
    /// and `s`, returning the number of matched bytes and the new position.
    pub fn str_cmp(&self, at: Ref, s: &str) -> (usize, Ref) {
        let mut pos = self.normalize(at);
        let mut matched = 0;
        for &b in s.as_bytes() {
            let Some(cid) = pos.chunk else {
                break;
            };
            let c = &self.chunks[cid];
            if self.allocs[c.alloc].slice(pos.offset, pos.offset + 1)[0] != b {
                break;
            }
            matched += 1;
            pos = self.advance_bytes(pos, 1);
        }
        (matched, pos)
    }

    /// Copy up to `buf.len()` bytes starting at `at` (normalized), crossing
    /// chunks. Returns how many were available.
    fn peek_bytes(&self, at: Ref, buf: &mut [u8]) -> usize {
        let mut got = 0;
        let mut pos = self.normalize(at);
        while got < buf.len() {
            let Some(cid) = pos.chunk else {
                break;
            };
            let c = &self.chunks[cid];
            let take = (c.end - pos.offset).min(buf.len() - got);
            buf[got..got + take]
                .copy_from_slice(self.allocs[c.alloc].slice(pos.offset, pos.offset + take));
            got += take;
            pos = self.normalize(Ref::at(cid, pos.offset + take));
        }
        got
    }

    /// Copy up to 4 bytes ending at `at` into the tail of `buf`, crossing
    /// chunks backwards. Returns how many were available.
    fn peek_bytes_back(&self, at: Ref, buf: &mut [u8; 4]) -> usize {
        let mut got = 0;
        let mut pos = at;
        while got < 4 {
            let (cid, offset) = match pos.chunk {
                Some(c) if pos.offset > self.chunks[c].start => (c, pos.offset),
                Some(c) => match self.chunks[c].prev {
                    Some(p) => (p, self.chunks[p].end),
                    None => break,
                },
                None => match self.tail {
                    Some(t) => (t, self.chunks[t].end),
                    None => break,
                },
            };
            let c = &self.chunks[cid];
            let take = (offset - c.start).min(4 - got);
            if take == 0 {
                break;
            }
            // Bytes nearest `at` already occupy the tail of the buffer; new
            // bytes slot in just before them.
            let src = self.allocs[c.alloc].slice(offset - take, offset);
            buf[4 - got - take..4 - got].copy_from_slice(src);
            got += take;
            pos = Ref::at(cid, offset - take);
        }
        got
    }

    /// The position `n` bytes forward of `at`. Saturates at end-of-document.
    fn advance_bytes(&self, at: Ref, n: usize) -> Ref {
        let mut pos = self.normalize(at);
        let mut left = n;
        while left > 0 {
            let Some(cid) = pos.chunk else {
                break;
            };
            let c = &self.chunks[cid];
            let step = (c.end - pos.offset).min(left);
            left -= step;
            pos = self.normalize(Ref::at(cid, pos.offset + step));
        }
        pos
    }

    /// The position `n` bytes backward of `at`. Saturates at the start.
    fn retreat_bytes(&self, at: Ref, n: usize) -> Ref {
        let mut left = n;
        let mut pos = at;
        loop {
            let (cid, offset) = match pos.chunk {
                Some(c) => (c, pos.offset),
                None => match self.tail {
                    Some(t) => (t, self.chunks[t].end),
                    None => return Ref::END,
                },
            };
            let c = &self.chunks[cid];
            let step = (offset - c.start).min(left);
            left -= step;
            pos = Ref::at(cid, offset - step);
            if left == 0 {
                return pos;
            }
            match c.prev {
                Some(p) => pos = Ref::at(p, self.chunks[p].end),
                None => return pos,
            }
        }
    }

    // === per-position text attributes ===

    /// Set a markup attribute in effect from `at` onward within its chunk.
    /// Stored on the chunk under a `"<offset> <name>"` key.
    pub fn set_attr_at(&mut self, at: Ref, name: &str, value: &str) -> Result<()> {
        if name.is_empty() {
            return Err(CoreError::InvalidArgument("attribute name is empty"));
        }
        self.check_ref(at)?;
        let pos = self.normalize(at);
        let Some(cid) = pos.chunk else {
            return Err(CoreError::OutOfBounds);
        };
        let min = self.chunks[cid].start as u64;
        let key = format!("{} {}", pos.offset, name);
        self.chunks[cid].attrs.set_with_prefix(&key, value, min)
    }

    /// The markup attribute value in effect at `at`, if any.
    pub fn attr_at(&self, at: Ref, name: &str) -> Option<String> {
        let pos = self.normalize(at);
        let cid = pos.chunk?;
        let effective = self.chunks[cid].attrs.collect(pos.offset as u64, 0);
        effective.find(&format!("0 {name}")).map(str::to_owned)
    }

    // === invariants ===

    /// Active-list invariants; violations are bugs, not caller errors.
    pub(crate) fn check_consistent(&self) {
        if cfg!(debug_assertions) {
            let mut cur = self.head;
            let mut prev = None;
            while let Some(cid) = cur {
                let c = &self.chunks[cid];
                assert!(c.linked, "unlinked chunk in active list");
                assert!(c.start < c.end, "empty chunk in active list");
                assert_eq!(c.prev, prev, "chunk list backlink mismatch");
                prev = cur;
                cur = c.next;
            }
            assert_eq!(self.tail, prev, "chunk list tail mismatch");
        }
    }
}

/// The longest prefix of `bytes` that fits in `room` without splitting a
/// multi-byte code point. `bytes` is valid UTF-8.
fn utf8_clip(bytes: &[u8], room: usize) -> usize {
    if bytes.len() <= room {
        return bytes.len();
    }
    let mut n = room;
    while n > 0 && bytes[n] & 0xc0 == 0x80 {
        n -= 1;
    }
    n
}

/// Decode the first code point of `bytes`, returning it and its width.
/// None when the bytes do not start with a complete, valid sequence.
fn decode_first_char(bytes: &[u8]) -> Option<(char, usize)> {
    let valid = match std::str::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) if e.valid_up_to() > 0 => {
            std::str::from_utf8(&bytes[..e.valid_up_to()]).expect("validated prefix")
        }
        Err(_) => return None,
    };
    let ch = valid.chars().next()?;
    Some((ch, ch.len_utf8()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::undo::UndoOutcome;

    fn point_at(doc: &mut Document, offset: usize) -> MarkId {
        let point = doc.new_point().unwrap();
        doc.move_mark_to(point, offset).unwrap();
        point
    }

    #[test]
    fn test_insert_into_empty_document() {
        let mut doc = Document::new();
        let point = doc.new_point().unwrap();

        let (start, end) = doc.insert(point, "Hello").unwrap();
        assert_eq!(doc.offset_of_ref(start).unwrap(), 0);
        assert_eq!(doc.offset_of_ref(end).unwrap(), 5);
        assert_eq!(doc.text(), "Hello");

        // The point rides along to the end of the insertion.
        assert_eq!(doc.mark_offset(point).unwrap(), 5);

        doc.insert(point, "Worldαβγ").unwrap();
        assert_eq!(doc.text(), "HelloWorldαβγ");
        assert_eq!(doc.len_bytes(), 16);
        assert_eq!(doc.undo_transactions(), 2);
    }

    #[test]
    fn test_append_reuses_allocation_tail() {
        let mut doc = Document::new();
        let point = doc.new_point().unwrap();
        doc.insert(point, "Hello").unwrap();
        doc.insert(point, "World").unwrap();
        // Appending at the watermark extends the chunk instead of adding one.
        assert_eq!(doc.chunks.len(), 1);
        assert_eq!(doc.text(), "HelloWorld");
    }

    #[test]
    fn test_edit_sequence() {
        let mut doc = Document::new();
        let point = doc.new_point().unwrap();
        doc.insert(point, "Hello").unwrap();
        doc.insert(point, "Worldαβγ").unwrap();

        doc.move_mark_to(point, 3).unwrap();
        doc.delete(point, 3).unwrap();
        assert_eq!(doc.text(), "Helorldαβγ");

        doc.insert(point, "p me to the").unwrap();
        assert_eq!(doc.text(), "Help me to theorldαβγ");

        doc.move_mark_to(point, 1).unwrap();
        doc.delete(point, 3).unwrap();
        assert_eq!(doc.text(), "H me to theorldαβγ");
        assert_eq!(doc.undo_transactions(), 5);
    }

    #[test]
    fn test_undo_until_empty_then_redo() {
        let mut doc = Document::new();
        let point = doc.new_point().unwrap();
        doc.insert(point, "Hello").unwrap();
        doc.insert(point, "Worldαβγ").unwrap();
        doc.move_mark_to(point, 3).unwrap();
        doc.delete(point, 3).unwrap();
        doc.insert(point, "p me to the").unwrap();
        doc.move_mark_to(point, 1).unwrap();
        doc.delete(point, 3).unwrap();
        let final_text = doc.text();

        loop {
            match doc.undo(point).unwrap() {
                UndoOutcome::Exhausted => break,
                UndoOutcome::Partial(s, e) | UndoOutcome::Complete(s, e) => {
                    // Every reported range must be a reachable position.
                    doc.check_ref(s).unwrap();
                    doc.check_ref(e).unwrap();
                }
            }
        }
        assert_eq!(doc.text(), "");
        assert_eq!(doc.len_bytes(), 0);
        assert_eq!(doc.undo_depth(), 0);

        loop {
            match doc.redo(point).unwrap() {
                UndoOutcome::Exhausted => break,
                _ => {}
            }
        }
        assert_eq!(doc.text(), final_text);
    }

    #[test]
    fn test_undo_redo_is_identity_for_one_transaction() {
        let mut doc = Document::from_bytes(b"abcdefghij");
        let point = point_at(&mut doc, 4);
        doc.insert(point, "1234").unwrap();
        let after = doc.text();

        while !matches!(doc.undo(point).unwrap(), UndoOutcome::Complete(..)) {}
        assert_eq!(doc.text(), "abcdefghij");

        while !matches!(doc.redo(point).unwrap(), UndoOutcome::Complete(..)) {}
        assert_eq!(doc.text(), after);
        assert_eq!(doc.redo_depth(), 0);
    }

    #[test]
    fn test_fresh_edit_clears_redo() {
        let mut doc = Document::new();
        let point = doc.new_point().unwrap();
        doc.insert(point, "one").unwrap();
        while !matches!(doc.undo(point).unwrap(), UndoOutcome::Complete(..)) {}
        assert!(doc.redo_depth() > 0);

        doc.insert(point, "two").unwrap();
        assert_eq!(doc.redo_depth(), 0);
        assert_eq!(doc.redo(point).unwrap(), UndoOutcome::Exhausted);
    }

    #[test]
    fn test_delete_stops_at_end_of_document() {
        let mut doc = Document::from_bytes(b"hello");
        let point = point_at(&mut doc, 2);
        let end = doc.delete(point, 1000).unwrap();
        assert!(end.is_end());
        assert_eq!(doc.text(), "he");
    }

    #[test]
    fn test_delete_across_chunks() {
        let mut doc = Document::from_bytes(b"aaaa");
        let point = point_at(&mut doc, 2);
        doc.insert(point, "bbbb").unwrap();
        doc.insert(point, "cccc").unwrap();
        assert_eq!(doc.text(), "aabbbbccccaa");

        // Spans the tail of one insertion, a whole chunk, and a prefix.
        doc.move_mark_to(point, 3).unwrap();
        doc.delete(point, 8).unwrap();
        assert_eq!(doc.text(), "aaba");
    }

    #[test]
    fn test_insert_requires_point() {
        let mut doc = Document::from_bytes(b"hello");
        let mark = doc.mark_at(2, None, true).unwrap();
        assert_eq!(
            doc.insert(mark, "x"),
            Err(CoreError::InvalidArgument("editing requires a point"))
        );
        assert_eq!(
            doc.delete(mark, 1),
            Err(CoreError::InvalidArgument("editing requires a point"))
        );
    }

    #[test]
    fn test_edits_rejected_during_notification() {
        struct Reenter;
        impl crate::GroupObserver for Reenter {
            fn on_change(
                &mut self,
                doc: &mut Document,
                _group: crate::GroupId,
                point: MarkId,
                _start: Ref,
                _end: Ref,
            ) {
                assert_eq!(doc.insert(point, "x"), Err(CoreError::Reentrancy));
                assert_eq!(doc.delete(point, 1), Err(CoreError::Reentrancy));
                assert_eq!(doc.undo(point), Err(CoreError::Reentrancy));
            }
        }
        let mut doc = Document::new();
        doc.add_group(Some(Box::new(Reenter)));
        let point = doc.new_point().unwrap();
        doc.insert(point, "hello").unwrap();
        assert_eq!(doc.text(), "hello");
    }

    #[test]
    fn test_from_bytes_roundtrip_preserves_invalid_utf8() {
        let data: &[u8] = b"ok\xff\xfe\xfdok";
        let doc = Document::from_bytes(data);
        assert_eq!(doc.content_bytes(), data);
        assert_eq!(doc.len_bytes(), 7);
    }

    #[test]
    fn test_traversal_crosses_chunks() {
        let mut doc = Document::from_bytes(b"hello");
        let point = doc.new_point().unwrap();
        // The backing allocation is exactly full, so this lands in a second
        // chunk.
        doc.insert(point, "αβ").unwrap();
        assert_eq!(doc.chunks.len(), 2);

        let r = doc.ref_at(4).unwrap();
        let (ch, r) = doc.next_char(r).unwrap();
        assert_eq!(ch, 'o');
        let (ch, r) = doc.next_char(r).unwrap();
        assert_eq!(ch, 'α');
        let (ch, r) = doc.next_char(r).unwrap();
        assert_eq!(ch, 'β');
        assert!(doc.next_char(r).is_none());

        let (ch, r) = doc.prev_char(Ref::END).unwrap();
        assert_eq!(ch, 'β');
        let (ch, r) = doc.prev_char(r).unwrap();
        assert_eq!(ch, 'α');
        let (ch, _) = doc.prev_char(r).unwrap();
        assert_eq!(ch, 'o');
    }

    #[test]
    fn test_invalid_bytes_read_as_replacement() {
        let doc = Document::from_bytes(b"a\xffb");
        let r = doc.ref_at(0).unwrap();
        let (ch, r) = doc.next_char(r).unwrap();
        assert_eq!(ch, 'a');
        let (ch, r) = doc.next_char(r).unwrap();
        assert_eq!(ch, char::REPLACEMENT_CHARACTER);
        let (ch, _) = doc.next_char(r).unwrap();
        assert_eq!(ch, 'b');

        // Backwards too, one byte at a time.
        let r = doc.ref_at(2).unwrap();
        let (ch, _) = doc.prev_char(r).unwrap();
        assert_eq!(ch, char::REPLACEMENT_CHARACTER);
    }

    #[test]
    fn test_str_cmp_advances_past_common_prefix() {
        let doc = Document::from_bytes(b"hello world");
        let r = doc.ref_at(0).unwrap();
        let (matched, at) = doc.str_cmp(r, "hello!");
        assert_eq!(matched, 5);
        assert_eq!(doc.offset_of_ref(at).unwrap(), 5);

        let (matched, at) = doc.str_cmp(r, "hello world and more");
        assert_eq!(matched, 11);
        assert!(at.is_end());
    }

    #[test]
    fn test_same_ref_across_boundary() {
        let mut doc = Document::from_bytes(b"hello");
        let point = doc.new_point().unwrap();
        doc.insert(point, "world").unwrap();

        let first = doc.head.unwrap();
        let second = doc.chunks[first].next.unwrap();
        let head_side = Ref::at(first, doc.chunks[first].end);
        let tail_side = Ref::at(second, doc.chunks[second].start);
        assert_ne!(head_side, tail_side);
        assert!(doc.same_ref(head_side, tail_side));
    }

    #[test]
    fn test_position_arithmetic() {
        let doc = Document::from_bytes(b"0123456789");
        for off in 0..=10 {
            let r = doc.ref_at(off).unwrap();
            assert_eq!(doc.offset_of_ref(r).unwrap(), off);
        }
        assert!(doc.ref_at(10).unwrap().is_end());
        assert_eq!(doc.ref_at(11), Err(CoreError::OutOfBounds));
    }

    #[test]
    fn test_markup_attributes_survive_splits() {
        let mut doc = Document::from_bytes(b"0123456789");
        let r2 = doc.ref_at(2).unwrap();
        doc.set_attr_at(r2, "Bold", "on").unwrap();
        assert_eq!(doc.attr_at(doc.ref_at(5).unwrap(), "Bold").as_deref(), Some("on"));
        assert_eq!(doc.attr_at(doc.ref_at(1).unwrap(), "Bold"), None);

        // Splitting the chunk carries the effective value to the tail, and
        // inserted bytes inherit from the byte before the insertion point.
        let point = point_at(&mut doc, 6);
        doc.insert(point, "xy").unwrap();
        assert_eq!(doc.text(), "012345xy6789");
        assert_eq!(doc.attr_at(doc.ref_at(6).unwrap(), "Bold").as_deref(), Some("on"));
        assert_eq!(doc.attr_at(doc.ref_at(9).unwrap(), "Bold").as_deref(), Some("on"));
        assert_eq!(doc.attr_at(doc.ref_at(1).unwrap(), "Bold"), None);
    }

    #[test]
    fn test_empty_insert_and_delete_are_noops() {
        let mut doc = Document::from_bytes(b"abc");
        let point = point_at(&mut doc, 1);
        doc.insert(point, "").unwrap();
        doc.delete(point, 0).unwrap();
        assert_eq!(doc.text(), "abc");
        assert_eq!(doc.undo_transactions(), 0);
    }

    #[test]
    fn test_large_inserts_span_allocations() {
        let mut doc = Document::new();
        let point = doc.new_point().unwrap();
        let big = "α".repeat(5000); // 10000 bytes, larger than the default allocation
        doc.insert(point, &big).unwrap();
        doc.insert(point, &big).unwrap();
        assert!(doc.allocs.len() >= 2);
        assert_eq!(doc.len_bytes(), 20_000);

        while !matches!(doc.undo(point).unwrap(), UndoOutcome::Complete(..)) {}
        assert_eq!(doc.len_bytes(), 10_000);
        while !matches!(doc.redo(point).unwrap(), UndoOutcome::Complete(..)) {}
        assert_eq!(doc.len_bytes(), 20_000);
        assert_eq!(doc.text(), format!("{big}{big}"));
    }
}
