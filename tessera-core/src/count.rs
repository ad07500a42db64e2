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

//! Line/word/char counting over a mark group.
//!
//! The counter owns a mark group whose marks are scattered through the
//! document roughly every [`SEGMENT_LINES`] lines. Each mark caches the
//! line/word/char counts of the content from itself up to the next group
//! mark as `lines`/`words`/`chars` attributes. An edit clears the cache on
//! the mark owning the changed segment (cheap); the next count recomputes
//! just that segment. The segment before the first mark and the tail past
//! the last mark are always computed directly and never cached.
//!
//! A word is a maximal run of printable non-whitespace code points; a line
//! is terminated by `\n`.

use tracing::trace;

use crate::buffer::Document;
use crate::chunk::Ref;
use crate::error::{CoreError, Result};
use crate::mark::{GroupId, GroupObserver};
use crate::MarkId;

/// Target segment length in lines.
const SEGMENT_LINES: usize = 50;

/// Two adjacent segments both under this many lines are merged.
const MERGE_LINES: usize = 10;

const ATTR_LINES: &str = "lines";
const ATTR_WORDS: &str = "words";
const ATTR_CHARS: &str = "chars";

/// Line, word and char totals for a stretch of the document.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counts {
    pub lines: usize,
    pub words: usize,
    pub chars: usize,
}

impl Counts {
    pub fn add(self, other: Counts) -> Counts {
        Counts {
            lines: self.lines + other.lines,
            words: self.words + other.words,
            chars: self.chars + other.chars,
        }
    }
}

/// The counting subsystem: a mark group plus cached per-segment totals.
pub struct LineCounter {
    group: GroupId,
}

impl LineCounter {
    /// Attach a counter to a document. The counter registers its own mark
    /// group and invalidation observer.
    pub fn attach(doc: &mut Document) -> Self {
        Self {
            group: doc.add_group(Some(Box::new(CounterObserver))),
        }
    }

    /// The counter's mark group.
    pub fn group(&self) -> GroupId {
        self.group
    }

    /// Counts for the whole document.
    pub fn total(&self, doc: &mut Document) -> Counts {
        let len = doc.len_bytes();
        self.count(doc, 0, len)
            .expect("whole-document range is valid")
    }

    /// Counts for the byte range `[from, to)`, summing cached segments and
    /// recomputing any segment whose cache was invalidated.
    pub fn count(&self, doc: &mut Document, from: usize, to: usize) -> Result<Counts> {
        let len = doc.len_bytes();
        if from > to || to > len {
            return Err(CoreError::OutOfBounds);
        }
        let mut total = Counts::default();
        let marks = self.segment_marks(doc);
        let mut i = marks.partition_point(|&(_, off)| off < from);

        // Leading partial segment, computed directly. Anchors are planted
        // only when no mark precedes the range, so existing caches stay
        // whole.
        let lead_end = marks.get(i).map(|&(_, off)| off.min(to)).unwrap_or(to);
        if from < lead_end {
            total = total.add(self.scan(doc, from, lead_end, None, i == 0, false));
        }

        let mut prev: Option<(MarkId, Counts)> = None;
        while i < marks.len() {
            let (m, off) = marks[i];
            if off >= to {
                break;
            }
            let last = i + 1 == marks.len();
            let seg_end = marks.get(i + 1).map(|&(_, o)| o).unwrap_or(len);
            if last || seg_end > to {
                // The tail segment is always computed directly; planting is
                // only worthwhile when it runs to the end of the document.
                total = total.add(self.scan(doc, off, to, Some(m), last && to == len, false));
                return Ok(total);
            }
            let seg = if off == seg_end {
                Counts::default()
            } else {
                match cached(doc, m) {
                    Some(c) => c,
                    None => self.scan(doc, off, seg_end, Some(m), true, true),
                }
            };
            if let Some((pm, pc)) = prev {
                if pc.lines < MERGE_LINES && seg.lines < MERGE_LINES {
                    // Two sparse neighbours: drop the interior mark.
                    let merged = pc.add(seg);
                    store(doc, pm, merged);
                    doc.free_mark(m)?;
                    total = total.add(seg);
                    prev = Some((pm, merged));
                    i += 1;
                    continue;
                }
            }
            total = total.add(seg);
            prev = Some((m, seg));
            i += 1;
        }
        Ok(total)
    }

    /// The counter's own marks (points excluded) with their offsets, in
    /// document order.
    fn segment_marks(&self, doc: &Document) -> Vec<(MarkId, usize)> {
        doc.group_members(self.group)
            .into_iter()
            .filter(|&m| !doc.is_point(m))
            .map(|m| {
                let off = doc
                    .mark_offset(m)
                    .expect("counter marks stay anchored");
                (m, off)
            })
            .collect()
    }

    /// Count `[from, to)` directly. With `plant`, drop a fresh anchor mark
    /// after every [`SEGMENT_LINES`] lines and bank the finished span's
    /// counts on the previous anchor. With `cache_final`, also bank the
    /// final span (used when `to` lands on an existing mark).
    fn scan(
        &self,
        doc: &mut Document,
        from: usize,
        to: usize,
        anchor: Option<MarkId>,
        plant: bool,
        cache_final: bool,
    ) -> Counts {
        let mut anchor = anchor;
        let mut total = Counts::default();
        let mut sub = Counts::default();
        let mut in_word = false;
        let mut r = doc.ref_at(from).expect("scan range is valid");
        let mut off = from;
        while off < to {
            let Some((ch, width, next)) = doc.next_char_width(r) else {
                break;
            };
            total.chars += 1;
            sub.chars += 1;
            if is_word_char(ch) {
                if !in_word {
                    total.words += 1;
                    sub.words += 1;
                }
                in_word = true;
            } else {
                in_word = false;
            }
            off += width;
            r = next;
            if ch == '\n' {
                total.lines += 1;
                sub.lines += 1;
                if plant && sub.lines >= SEGMENT_LINES && off < to {
                    if let Some(a) = anchor {
                        store(doc, a, sub);
                    }
                    let planted = doc
                        .mark_at(off, Some(self.group), false)
                        .expect("anchor position is valid");
                    anchor = Some(planted);
                    sub = Counts::default();
                }
            }
        }
        if cache_final {
            if let Some(a) = anchor {
                store(doc, a, sub);
            }
        }
        total
    }
}

/// Printable non-whitespace: the characters words are made of.
fn is_word_char(ch: char) -> bool {
    !ch.is_whitespace() && !ch.is_control()
}

fn cached(doc: &Document, mark: MarkId) -> Option<Counts> {
    let attrs = doc.mark_attrs(mark);
    Some(Counts {
        lines: attrs.find(ATTR_LINES)?.parse().ok()?,
        words: attrs.find(ATTR_WORDS)?.parse().ok()?,
        chars: attrs.find(ATTR_CHARS)?.parse().ok()?,
    })
}

fn store(doc: &mut Document, mark: MarkId, counts: Counts) {
    let attrs = doc.mark_attrs_mut(mark);
    attrs
        .set(ATTR_LINES, &counts.lines.to_string())
        .expect("count cache entry fits");
    attrs
        .set(ATTR_WORDS, &counts.words.to_string())
        .expect("count cache entry fits");
    attrs
        .set(ATTR_CHARS, &counts.chars.to_string())
        .expect("count cache entry fits");
}

fn clear_cache(doc: &mut Document, mark: MarkId) {
    let attrs = doc.mark_attrs_mut(mark);
    attrs.del(ATTR_LINES);
    attrs.del(ATTR_WORDS);
    attrs.del(ATTR_CHARS);
}

/// Invalidate the cache on the mark owning a changed segment.
struct CounterObserver;

impl GroupObserver for CounterObserver {
    fn on_change(&mut self, doc: &mut Document, group: GroupId, _point: MarkId, start: Ref, _end: Ref) {
        let Ok(start_off) = doc.offset_of_ref(start) else {
            return;
        };
        // The owning mark is the last one at or before the change; marks
        // collapsed exactly onto the change position are cleared as well.
        let mut before: Option<MarkId> = None;
        let mut cleared = 0usize;
        for m in doc.group_members(group) {
            if doc.is_point(m) {
                continue;
            }
            let Ok(off) = doc.mark_offset(m) else {
                continue;
            };
            if off < start_off {
                before = Some(m);
            } else if off == start_off {
                clear_cache(doc, m);
                cleared += 1;
            } else {
                break;
            }
        }
        if let Some(m) = before {
            clear_cache(doc, m);
            cleared += 1;
        }
        if cleared > 0 {
            trace!(cleared, "invalidated line-count caches");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reference implementation: count straight off the serialized text.
    fn direct(doc: &Document) -> Counts {
        let text = doc.text();
        let mut counts = Counts::default();
        let mut in_word = false;
        for ch in text.chars() {
            counts.chars += 1;
            if ch == '\n' {
                counts.lines += 1;
            }
            if is_word_char(ch) {
                if !in_word {
                    counts.words += 1;
                }
                in_word = true;
            } else {
                in_word = false;
            }
        }
        counts
    }

    #[test]
    fn test_small_document_counts() {
        let mut doc = Document::from_bytes(b"hello world\nfoo bar\n");
        let counter = LineCounter::attach(&mut doc);
        let counts = counter.total(&mut doc);
        assert_eq!(counts.lines, 2);
        assert_eq!(counts.words, 4);
        assert_eq!(counts.chars, 20);
        assert_eq!(counts, direct(&doc));
    }

    #[test]
    fn test_anchors_planted_every_fifty_lines() {
        let text = "x\n".repeat(500);
        let mut doc = Document::from_bytes(text.as_bytes());
        let counter = LineCounter::attach(&mut doc);
        let counts = counter.total(&mut doc);
        assert_eq!(counts.lines, 500);
        assert_eq!(counts.words, 500);
        // 500 lines at one anchor per 50 lines, none at the very end.
        let members = doc.group_members(counter.group()).len();
        assert_eq!(members, 9);
        // Cached segments make the second count agree with the first.
        assert_eq!(counter.total(&mut doc), counts);
    }

    #[test]
    fn test_ten_thousand_lines_and_edit() {
        let text = "\n".repeat(10_000);
        let mut doc = Document::from_bytes(text.as_bytes());
        let counter = LineCounter::attach(&mut doc);
        assert_eq!(counter.total(&mut doc).lines, 10_000);

        // Delete bytes [200..400); the cached segment containing the edit is
        // invalidated and recomputed on demand.
        let point = doc.new_point().unwrap();
        doc.move_mark_to(point, 200).unwrap();
        doc.delete(point, 200).unwrap();

        let counts = counter.total(&mut doc);
        assert_eq!(counts.lines, 9_800);
        assert_eq!(counts, direct(&doc));
    }

    #[test]
    fn test_edit_clears_owning_segment_cache_only() {
        let text = "word\n".repeat(200);
        let mut doc = Document::from_bytes(text.as_bytes());
        let counter = LineCounter::attach(&mut doc);
        counter.total(&mut doc);

        let marks = doc.group_members(counter.group());
        let m0 = marks[0];
        let m1 = marks[1];
        assert!(doc.mark_attrs(m0).find("lines").is_some());
        assert!(doc.mark_attrs(m1).find("lines").is_some());

        // Edit inside the first cached segment (between m0 and m1).
        let m0_off = doc.mark_offset(m0).unwrap();
        let point = doc.new_point().unwrap();
        doc.move_mark_to(point, m0_off + 7).unwrap();
        doc.insert(point, "more").unwrap();

        assert!(doc.mark_attrs(m0).find("lines").is_none());
        assert!(doc.mark_attrs(m1).find("lines").is_some());

        let counts = counter.total(&mut doc);
        assert_eq!(counts, direct(&doc));
    }

    #[test]
    fn test_sparse_neighbour_segments_merge() {
        let text = "\n".repeat(200);
        let mut doc = Document::from_bytes(text.as_bytes());
        let counter = LineCounter::attach(&mut doc);
        counter.total(&mut doc);
        assert_eq!(doc.group_members(counter.group()).len(), 3);

        // Cut [55..145): the segments owned by the anchors at 50 and at the
        // collapsed 100 shrink to 5 lines each and get merged.
        let point = doc.new_point().unwrap();
        doc.move_mark_to(point, 55).unwrap();
        doc.delete(point, 90).unwrap();

        let counts = counter.total(&mut doc);
        assert_eq!(counts.lines, 110);
        assert_eq!(counts, direct(&doc));
        // The group list now also carries the editing point; two counter
        // marks remain.
        let anchors = doc
            .group_members(counter.group())
            .into_iter()
            .filter(|&m| !doc.is_point(m))
            .count();
        assert_eq!(anchors, 2);
    }

    #[test]
    fn test_range_counts() {
        let mut doc = Document::from_bytes(b"one two\nthree\nfour five six\n");
        let counter = LineCounter::attach(&mut doc);
        let all = counter.total(&mut doc);
        assert_eq!(all.lines, 3);
        assert_eq!(all.words, 6);

        let first_line = counter.count(&mut doc, 0, 8).unwrap();
        assert_eq!(first_line.lines, 1);
        assert_eq!(first_line.words, 2);

        assert_eq!(
            counter.count(&mut doc, 0, 999),
            Err(CoreError::OutOfBounds)
        );
    }

    #[test]
    fn test_counts_include_invalid_bytes_as_replacement() {
        let mut doc = Document::from_bytes(b"ab\xff\xfecd\n");
        let counter = LineCounter::attach(&mut doc);
        let counts = counter.total(&mut doc);
        // Each invalid byte reads as one replacement character.
        assert_eq!(counts.chars, 7);
        assert_eq!(counts.lines, 1);
        assert_eq!(counts.words, 1);
    }
}
