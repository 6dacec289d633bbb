//! Edge Logs
//!
//! An edge is a read dependency from a source (a signal or a computation's
//! output) to the computation that read it. Each edge is stored twice:
//!
//! - in the source's [`EdgeLog`], as the reader plus the slot the edge
//!   occupies in the reader's [`SourceList`];
//! - in the reader's [`SourceList`], as the log plus the slot the edge
//!   occupies in that log.
//!
//! Because each half knows where the other half lives, either endpoint can
//! delete its side in O(1). Logs never shift live entries on removal; the
//! vacated slot goes on a free list and is reused by the next insertion. The
//! first reader of a log and the first source of a node are kept inline,
//! which covers the very common single-edge case without allocating.

use smallvec::SmallVec;

use super::arena::{LogId, NodeId};

/// Position of one half of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// The inline first entry.
    First,
    /// An index into the growable entry list.
    At(u32),
}

/// The readers of one source.
#[derive(Debug, Default)]
pub struct EdgeLog {
    first: Option<(NodeId, Slot)>,
    readers: Vec<Option<(NodeId, Slot)>>,
    free: Vec<u32>,
}

impl EdgeLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `reader`, whose half of the edge lives at `reader_slot`.
    ///
    /// Returns the slot this half was stored at.
    pub fn insert(&mut self, reader: NodeId, reader_slot: Slot) -> Slot {
        if self.first.is_none() {
            self.first = Some((reader, reader_slot));
            return Slot::First;
        }
        match self.free.pop() {
            Some(index) => {
                self.readers[index as usize] = Some((reader, reader_slot));
                Slot::At(index)
            }
            None => {
                self.readers.push(Some((reader, reader_slot)));
                Slot::At(self.readers.len() as u32 - 1)
            }
        }
    }

    /// Drop the half stored at `slot`.
    pub fn remove(&mut self, slot: Slot) {
        match slot {
            Slot::First => self.first = None,
            Slot::At(index) => {
                let index = index as usize;
                if index >= self.readers.len() {
                    return;
                }
                self.readers[index] = None;
                if index + 1 == self.readers.len() {
                    self.readers.pop();
                } else {
                    self.free.push(index as u32);
                }
            }
        }
    }

    /// Squeeze vacated slots out of the entry list.
    ///
    /// `relocate` is called for every live entry that moved, with the reader,
    /// the reader-side slot, and the entry's new slot in this log, so the
    /// reader's back-reference can be patched. The free list is empty
    /// afterwards.
    pub fn compact(&mut self, mut relocate: impl FnMut(NodeId, Slot, Slot)) {
        if self.free.is_empty() {
            return;
        }
        let mut live = 0usize;
        for index in 0..self.readers.len() {
            if let Some((reader, reader_slot)) = self.readers[index] {
                if live != index {
                    self.readers[live] = Some((reader, reader_slot));
                    self.readers[index] = None;
                    relocate(reader, reader_slot, Slot::At(live as u32));
                }
                live += 1;
            }
        }
        self.readers.truncate(live);
        self.free.clear();
    }

    /// Update the reader-side slot of the entry stored at `slot`.
    pub fn set_reader_slot(&mut self, slot: Slot, reader_slot: Slot) {
        let entry = match slot {
            Slot::First => self.first.as_mut(),
            Slot::At(index) => self
                .readers
                .get_mut(index as usize)
                .and_then(|entry| entry.as_mut()),
        };
        if let Some((_, stored)) = entry {
            *stored = reader_slot;
        }
    }

    /// Iterate over the current readers.
    pub fn readers(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.first
            .iter()
            .chain(self.readers.iter().flatten())
            .map(|(reader, _)| *reader)
    }

    /// Number of live edges in this log.
    pub fn reader_count(&self) -> usize {
        self.readers().count()
    }

    /// Number of vacated slots awaiting reuse.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }
}

/// The sources a computation read during its last evaluation.
///
/// Entries are only ever appended during an evaluation and cleared wholesale
/// before the next one, so reader-side slots are never reused individually.
#[derive(Debug, Default)]
pub struct SourceList {
    first: Option<(LogId, Slot)>,
    rest: SmallVec<[(LogId, Slot); 4]>,
}

impl SourceList {
    /// The slot the next appended source will occupy.
    pub fn next_slot(&self) -> Slot {
        if self.first.is_none() {
            Slot::First
        } else {
            Slot::At(self.rest.len() as u32)
        }
    }

    /// Append a source whose half of the edge lives at `log_slot`.
    pub fn push(&mut self, log: LogId, log_slot: Slot) {
        if self.first.is_none() {
            self.first = Some((log, log_slot));
        } else {
            self.rest.push((log, log_slot));
        }
    }

    /// Point the entry at `slot` to a new position in its log.
    pub fn set_log_slot(&mut self, slot: Slot, log_slot: Slot) {
        let entry = match slot {
            Slot::First => self.first.as_mut(),
            Slot::At(index) => self.rest.get_mut(index as usize),
        };
        if let Some((_, stored)) = entry {
            *stored = log_slot;
        }
    }

    /// Remove and return every source.
    pub fn take_all(&mut self) -> impl Iterator<Item = (LogId, Slot)> {
        let first = self.first.take();
        let rest = std::mem::take(&mut self.rest);
        first.into_iter().chain(rest)
    }

    /// Number of recorded sources.
    pub fn len(&self) -> usize {
        usize::from(self.first.is_some()) + self.rest.len()
    }

    /// Whether no sources are recorded.
    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::arena::{Arena, ArenaKey};

    fn node(index: u32) -> NodeId {
        NodeId::from_parts(index, 0)
    }

    #[test]
    fn first_reader_is_inline() {
        let mut log = EdgeLog::new();
        assert_eq!(log.insert(node(1), Slot::First), Slot::First);
        assert_eq!(log.insert(node(2), Slot::First), Slot::At(0));
        assert_eq!(log.reader_count(), 2);
    }

    #[test]
    fn removal_reuses_vacated_slots() {
        let mut log = EdgeLog::new();
        log.insert(node(0), Slot::First);
        let a = log.insert(node(1), Slot::First);
        let _b = log.insert(node(2), Slot::First);
        let _c = log.insert(node(3), Slot::First);

        log.remove(a);
        assert_eq!(log.free_count(), 1);
        assert_eq!(log.reader_count(), 3);

        // The freed slot is handed out before the list grows.
        assert_eq!(log.insert(node(4), Slot::First), a);
        assert_eq!(log.free_count(), 0);
    }

    #[test]
    fn removing_the_tail_shrinks_instead_of_freeing() {
        let mut log = EdgeLog::new();
        log.insert(node(0), Slot::First);
        log.insert(node(1), Slot::First);
        let tail = log.insert(node(2), Slot::First);

        log.remove(tail);
        assert_eq!(log.free_count(), 0);
        assert_eq!(log.insert(node(3), Slot::First), tail);
    }

    #[test]
    fn compaction_reports_moves() {
        let mut log = EdgeLog::new();
        log.insert(node(0), Slot::First);
        let a = log.insert(node(1), Slot::At(0));
        log.insert(node(2), Slot::At(1));
        log.insert(node(3), Slot::At(2));
        log.remove(a);

        let mut moves = Vec::new();
        log.compact(|reader, reader_slot, slot| moves.push((reader, reader_slot, slot)));

        assert_eq!(
            moves,
            vec![
                (node(2), Slot::At(1), Slot::At(0)),
                (node(3), Slot::At(2), Slot::At(1)),
            ]
        );
        assert_eq!(log.free_count(), 0);
        let readers: Vec<_> = log.readers().collect();
        assert_eq!(readers, vec![node(0), node(2), node(3)]);
    }

    #[test]
    fn source_list_slots_follow_insertion_order() {
        let mut logs: Arena<LogId, ()> = Arena::new();
        let (a, b, c) = (logs.insert(()), logs.insert(()), logs.insert(()));

        let mut sources = SourceList::default();
        assert_eq!(sources.next_slot(), Slot::First);
        sources.push(a, Slot::First);
        assert_eq!(sources.next_slot(), Slot::At(0));
        sources.push(b, Slot::At(3));
        sources.push(c, Slot::First);
        assert_eq!(sources.len(), 3);

        sources.set_log_slot(Slot::At(0), Slot::At(1));
        let drained: Vec<_> = sources.take_all().collect();
        assert_eq!(drained, vec![(a, Slot::First), (b, Slot::At(1)), (c, Slot::First)]);
        assert!(sources.is_empty());
    }
}
