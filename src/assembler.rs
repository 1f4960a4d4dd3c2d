//! Streaming assembly of nested intervals.
//!
//! [`IntervalAssembler`] turns a stream of flat records, sorted by start,
//! into a stream of completed gene > transcript > exon style trees.
//!
//! # Algorithm
//!
//! 1. Every record becomes a node in an arena, looked up by id.
//! 2. A parent link resolves immediately when the parent is live. Otherwise
//!    the child waits in a deferred table keyed by the missing parent id and
//!    is adopted when that parent arrives.
//! 3. Root candidates sit in a min-heap keyed by their *reach*: the largest
//!    (zero-length normalized) stop found anywhere in their subtree.
//! 4. The cursor is the start of the latest record. Once it moves strictly
//!    past a root's reach, no record sorted later can attach to that tree,
//!    so it is emitted and its nodes are released.
//!
//! Heap entries are never updated in place. When a root grows or gets
//! adopted, a new entry is pushed and the old one is discarded lazily when
//! it reaches the top.
//!
//! # Memory Complexity
//!
//! O(k) where k = number of intervals still under the sweep line plus the
//! children waiting for a parent. [`IntervalAssembler::new`] also remembers
//! every id added in the run so a reused id is rejected even after its tree
//! was emitted; [`IntervalAssembler::streaming`] drops that history to keep
//! whole-file streams bounded.

use crate::interval::{Interval, Span};
use crate::parser::ParsedRecord;
use log::{debug, trace, warn};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use thiserror::Error;

/// Structural errors. Any of these leaves the current run unusable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("interval id must not be empty")]
    EmptyId,

    #[error("duplicate interval id '{0}'")]
    DuplicateId(String),

    #[error("invalid span for '{id}': start ({start}) > stop ({stop})")]
    InvalidSpan { id: String, start: u64, stop: u64 },

    #[error("linking '{child}' under '{parent}' would create a cycle")]
    CyclicParent { child: String, parent: String },

    #[error("no completed interval is available")]
    NotComplete,

    #[error("assembler is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, AssemblyError>;

/// (reach, insertion sequence, arena slot)
type HeapEntry = Reverse<(u64, u64, usize)>;

struct Node<D> {
    id: String,
    span: Span,
    data: D,
    /// Insertion sequence; tells a reused slot apart from its previous tenant.
    seq: u64,
    reach: u64,
    children: Vec<usize>,
    /// Attached parents.
    parents: Vec<usize>,
    /// Parent ids declared but not seen yet.
    awaiting: Vec<String>,
}

/// Counters for one assembly run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AssemblyStats {
    /// Records added
    pub added: usize,
    /// Trees emitted
    pub emitted_roots: usize,
    /// Intervals emitted as orphan roots because a parent never arrived
    pub dangling: usize,
    /// Records whose start was behind the cursor
    pub out_of_order: usize,
    /// Peak number of live intervals
    pub max_open: usize,
}

impl std::fmt::Display for AssemblyStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Added: {}, Trees: {}, Dangling: {}, Out of order: {}, Max open: {}",
            self.added, self.emitted_roots, self.dangling, self.out_of_order, self.max_open
        )
    }
}

/// Incremental builder of nested interval trees from a sorted record stream.
pub struct IntervalAssembler<D> {
    nodes: Vec<Option<Node<D>>>,
    free_slots: Vec<usize>,
    open_by_id: FxHashMap<String, usize>,
    deferred_children: FxHashMap<String, Vec<usize>>,
    pending_by_stop: BinaryHeap<HeapEntry>,
    cursor: u64,
    next_seq: u64,
    closed: bool,
    /// Every id added this run; None when only live ids are checked.
    seen_ids: Option<FxHashSet<String>>,
    stats: AssemblyStats,
}

impl<D> Default for IntervalAssembler<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> IntervalAssembler<D> {
    /// Create an assembler that rejects any id already added in this run.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free_slots: Vec::new(),
            open_by_id: FxHashMap::default(),
            deferred_children: FxHashMap::default(),
            pending_by_stop: BinaryHeap::new(),
            cursor: 0,
            next_seq: 0,
            closed: false,
            seen_ids: Some(FxHashSet::default()),
            stats: AssemblyStats::default(),
        }
    }

    /// Create an assembler for unbounded streams.
    ///
    /// Duplicate ids are only detected while the first copy is still live,
    /// so memory stays proportional to the open trees.
    pub fn streaming() -> Self {
        Self {
            seen_ids: None,
            ..Self::new()
        }
    }

    /// Add one record.
    ///
    /// Each parent id is either live (the record is attached right away) or
    /// unknown (the record waits until a record with that id arrives).
    pub fn add(
        &mut self,
        id: impl Into<String>,
        span: Span,
        parent_ids: &[&str],
        data: D,
    ) -> Result<()> {
        let id = id.into();
        if self.closed {
            return Err(AssemblyError::Closed);
        }
        if id.is_empty() {
            return Err(AssemblyError::EmptyId);
        }
        if span.start > span.stop {
            return Err(AssemblyError::InvalidSpan {
                id,
                start: span.start,
                stop: span.stop,
            });
        }
        if self.open_by_id.contains_key(&id)
            || self.seen_ids.as_ref().is_some_and(|seen| seen.contains(&id))
        {
            return Err(AssemblyError::DuplicateId(id));
        }
        self.check_acyclic(&id, parent_ids)?;

        if span.start < self.cursor {
            self.stats.out_of_order += 1;
            debug!(
                "'{}' starts at {} behind cursor {}",
                id, span.start, self.cursor
            );
        } else {
            self.cursor = span.start;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let slot = self.alloc(Node {
            id: id.clone(),
            span,
            data,
            seq,
            reach: span.sweep_stop(),
            children: Vec::new(),
            parents: Vec::new(),
            awaiting: Vec::new(),
        });

        // Adopt children that arrived ahead of this record. The node has no
        // parents yet, so only its own reach changes.
        if let Some(waiting) = self.deferred_children.remove(&id) {
            for child in waiting {
                let child_reach = match self.nodes[child].as_mut() {
                    Some(c) => {
                        c.awaiting.retain(|p| p != &id);
                        c.reach
                    }
                    None => continue,
                };
                self.link(slot, child);
                if let Some(node) = self.nodes[slot].as_mut() {
                    node.reach = node.reach.max(child_reach);
                }
                trace!("adopted deferred child into '{}'", id);
            }
        }

        for (i, &pid) in parent_ids.iter().enumerate() {
            if parent_ids[..i].contains(&pid) {
                continue;
            }
            if let Some(&parent) = self.open_by_id.get(pid) {
                self.attach(parent, slot);
                trace!("attached '{}' under '{}'", id, pid);
            } else {
                self.deferred_children
                    .entry(pid.to_string())
                    .or_default()
                    .push(slot);
                if let Some(node) = self.nodes[slot].as_mut() {
                    node.awaiting.push(pid.to_string());
                }
                trace!("'{}' waits for parent '{}'", id, pid);
            }
        }

        if let Some(seen) = self.seen_ids.as_mut() {
            seen.insert(id.clone());
        }
        self.open_by_id.insert(id, slot);
        if self.nodes[slot].as_ref().is_some_and(|n| n.parents.is_empty()) {
            self.schedule(slot);
        }

        self.stats.added += 1;
        self.stats.max_open = self.stats.max_open.max(self.open_by_id.len());
        self.settle();
        Ok(())
    }

    /// Add a parsed record.
    pub fn add_record(&mut self, record: ParsedRecord<D>) -> Result<()> {
        let parents: Vec<&str> = record.parent_ids.iter().map(String::as_str).collect();
        self.add(record.id, record.span, &parents, record.data)
    }

    /// True when at least one tree is complete and can be popped.
    #[inline]
    pub fn has_complete(&self) -> bool {
        match self.pending_by_stop.peek() {
            Some(Reverse((reach, _, _))) => self.closed || *reach < self.cursor,
            None => false,
        }
    }

    /// Declare the end of input. Every pending tree becomes complete.
    pub fn close(&mut self) {
        self.closed = true;
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Clear all state for reuse, keeping allocations.
    pub fn reset(&mut self) {
        self.nodes.clear();
        self.free_slots.clear();
        self.open_by_id.clear();
        self.deferred_children.clear();
        self.pending_by_stop.clear();
        self.cursor = 0;
        self.next_seq = 0;
        self.closed = false;
        if let Some(seen) = self.seen_ids.as_mut() {
            seen.clear();
        }
        self.stats = AssemblyStats::default();
    }

    /// Start coordinate of the most recently consumed record.
    #[inline]
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Number of live intervals (attached, pending or waiting for a parent).
    #[inline]
    pub fn open_len(&self) -> usize {
        self.open_by_id.len()
    }

    /// Number of distinct parent ids that children are still waiting for.
    #[inline]
    pub fn deferred_len(&self) -> usize {
        self.deferred_children.len()
    }

    /// Number of intervals emitted as orphan roots so far.
    #[inline]
    pub fn dangling_count(&self) -> usize {
        self.stats.dangling
    }

    pub fn stats(&self) -> &AssemblyStats {
        &self.stats
    }

    fn alloc(&mut self, node: Node<D>) -> usize {
        match self.free_slots.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    /// Reject links that would make a node its own ancestor.
    ///
    /// The new node's future children are the records waiting for its id, so
    /// a cycle exists when one of those is an ancestor-or-self of a live
    /// parent.
    fn check_acyclic(&self, id: &str, parent_ids: &[&str]) -> Result<()> {
        if let Some(&pid) = parent_ids.iter().find(|&&pid| pid == id) {
            return Err(AssemblyError::CyclicParent {
                child: id.to_string(),
                parent: pid.to_string(),
            });
        }
        let Some(waiting) = self.deferred_children.get(id) else {
            return Ok(());
        };

        for &pid in parent_ids {
            let Some(&parent) = self.open_by_id.get(pid) else {
                continue;
            };
            let mut seen: FxHashSet<usize> = FxHashSet::default();
            let mut stack = vec![parent];
            while let Some(slot) = stack.pop() {
                if !seen.insert(slot) {
                    continue;
                }
                if waiting.contains(&slot) {
                    return Err(AssemblyError::CyclicParent {
                        child: id.to_string(),
                        parent: pid.to_string(),
                    });
                }
                if let Some(node) = self.nodes[slot].as_ref() {
                    stack.extend(node.parents.iter().copied());
                }
            }
        }
        Ok(())
    }

    fn link(&mut self, parent: usize, child: usize) {
        if let Some(p) = self.nodes[parent].as_mut() {
            p.children.push(child);
        }
        if let Some(c) = self.nodes[child].as_mut() {
            c.parents.push(parent);
        }
    }

    /// Link and push the child's reach up through every ancestor.
    fn attach(&mut self, parent: usize, child: usize) {
        self.link(parent, child);
        let reach = match self.nodes[child].as_ref() {
            Some(c) => c.reach,
            None => return,
        };

        let mut stack = vec![parent];
        while let Some(slot) = stack.pop() {
            let Some(node) = self.nodes[slot].as_mut() else {
                continue;
            };
            if reach <= node.reach {
                continue;
            }
            node.reach = reach;
            if node.parents.is_empty() {
                self.pending_by_stop.push(Reverse((reach, node.seq, slot)));
            } else {
                stack.extend(node.parents.iter().copied());
            }
        }
    }

    fn schedule(&mut self, slot: usize) {
        if let Some(node) = self.nodes[slot].as_ref() {
            self.pending_by_stop
                .push(Reverse((node.reach, node.seq, slot)));
        }
    }

    /// An entry is live when it still describes a current root.
    fn is_live(&self, entry: &HeapEntry) -> bool {
        let Reverse((reach, seq, slot)) = *entry;
        matches!(
            self.nodes.get(slot),
            Some(Some(n)) if n.seq == seq && n.reach == reach && n.parents.is_empty()
        )
    }

    /// Drop stale entries from the top of the heap.
    fn settle(&mut self) {
        while let Some(entry) = self.pending_by_stop.peek() {
            if self.is_live(entry) {
                break;
            }
            self.pending_by_stop.pop();
        }
    }

    fn forget_deferred(&mut self, parent_id: &str, slot: usize) {
        if let Some(waiting) = self.deferred_children.get_mut(parent_id) {
            waiting.retain(|&s| s != slot);
            if waiting.is_empty() {
                self.deferred_children.remove(parent_id);
            }
        }
    }

    /// Free a root and every descendant no other live parent still holds.
    fn release(&mut self, root: usize) {
        let mut stack = vec![root];
        while let Some(slot) = stack.pop() {
            let Some(node) = self.nodes[slot].take() else {
                continue;
            };
            self.free_slots.push(slot);
            if self.open_by_id.get(&node.id) == Some(&slot) {
                self.open_by_id.remove(&node.id);
            }
            for pid in &node.awaiting {
                self.forget_deferred(pid, slot);
            }
            for child in node.children {
                if let Some(c) = self.nodes[child].as_mut() {
                    c.parents.retain(|&p| p != slot);
                    if c.parents.is_empty() {
                        stack.push(child);
                    }
                }
            }
        }
    }
}

impl<D: Clone> IntervalAssembler<D> {
    /// Pop the completed tree with the smallest reach.
    ///
    /// A root that is still waiting for a parent is emitted as an orphan and
    /// counted in [`dangling_count`](Self::dangling_count).
    pub fn pop_complete(&mut self) -> Result<Interval<D>> {
        if !self.has_complete() {
            return Err(AssemblyError::NotComplete);
        }
        let Some(Reverse((_, _, slot))) = self.pending_by_stop.pop() else {
            return Err(AssemblyError::NotComplete);
        };

        let awaiting = self.nodes[slot]
            .as_mut()
            .map(|n| std::mem::take(&mut n.awaiting))
            .unwrap_or_default();
        if !awaiting.is_empty() {
            for pid in &awaiting {
                self.forget_deferred(pid, slot);
            }
            self.stats.dangling += 1;
            if let Some(node) = self.nodes[slot].as_ref() {
                warn!(
                    "'{}' references missing parent(s) {}; emitting as orphan root",
                    node.id,
                    awaiting.join(",")
                );
            }
        }

        let tree = self.snapshot(slot).ok_or(AssemblyError::NotComplete)?;
        self.release(slot);
        self.stats.emitted_roots += 1;
        self.settle();
        Ok(tree)
    }

    /// Close and drain every remaining tree.
    pub fn finish(&mut self) -> Vec<Interval<D>> {
        self.close();
        let mut out = Vec::new();
        while let Ok(tree) = self.pop_complete() {
            out.push(tree);
        }
        out
    }

    /// Copy a live subtree out of the arena.
    ///
    /// Post-order with an explicit stack: each node's children are built
    /// before the node itself. Children sort by span, ties keep attach order.
    fn snapshot(&self, root: usize) -> Option<Interval<D>> {
        self.nodes.get(root)?.as_ref()?;

        let mut stack = vec![(root, false)];
        let mut built: Vec<Interval<D>> = Vec::new();
        while let Some((slot, expanded)) = stack.pop() {
            let Some(node) = self.nodes[slot].as_ref() else {
                continue;
            };
            let live: Vec<usize> = node
                .children
                .iter()
                .copied()
                .filter(|&c| self.nodes[c].is_some())
                .collect();

            if !expanded {
                stack.push((slot, true));
                stack.extend(live.iter().rev().map(|&c| (c, false)));
                continue;
            }

            let mut children = built.split_off(built.len() - live.len());
            children.sort_by(|a, b| a.span.cmp(&b.span));
            built.push(Interval {
                id: node.id.clone(),
                span: node.span,
                data: node.data.clone(),
                children,
            });
        }
        built.pop()
    }
}

/// Iterator adapter yielding trees as soon as they complete.
///
/// Created by [`assemble`]. Stops after the first structural error.
pub struct Nested<D, I> {
    assembler: IntervalAssembler<D>,
    records: I,
    failed: bool,
}

/// Assemble a sorted stream of records into nested trees, lazily.
pub fn assemble<D, I>(records: I) -> Nested<D, I::IntoIter>
where
    D: Clone,
    I: IntoIterator<Item = ParsedRecord<D>>,
{
    Nested {
        assembler: IntervalAssembler::new(),
        records: records.into_iter(),
        failed: false,
    }
}

impl<D, I> Nested<D, I> {
    pub fn stats(&self) -> &AssemblyStats {
        self.assembler.stats()
    }
}

impl<D, I> Iterator for Nested<D, I>
where
    D: Clone,
    I: Iterator<Item = ParsedRecord<D>>,
{
    type Item = Result<Interval<D>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if self.assembler.has_complete() {
                return Some(self.assembler.pop_complete());
            }
            if self.assembler.is_closed() {
                return None;
            }
            match self.records.next() {
                Some(record) => {
                    if let Err(e) = self.assembler.add_record(record) {
                        self.failed = true;
                        return Some(Err(e));
                    }
                }
                None => self.assembler.close(),
            }
        }
    }
}
