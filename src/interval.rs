//! Core interval types for nested annotation trees.

use crate::parser::ParsedRecord;
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A half-open span `[start, stop)` on a single contig.
/// Uses 0-based, half-open coordinates (BED convention).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: u64,
    pub stop: u64,
}

impl Span {
    /// Create a new span. Callers are responsible for `start <= stop`.
    #[inline]
    pub fn new(start: u64, stop: u64) -> Self {
        Self { start, stop }
    }

    /// Returns the length of the span.
    #[inline]
    pub fn len(&self) -> u64 {
        self.stop.saturating_sub(self.start)
    }

    /// Returns true if the span has zero length.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start >= self.stop
    }

    /// Stop coordinate used for sweep ordering.
    ///
    /// Zero-length spans are treated as 1bp (`start + 1`) so that they still
    /// occupy a position on the sweep line. The original bounds are untouched.
    #[inline]
    pub fn sweep_stop(&self) -> u64 {
        if self.start == self.stop {
            self.start.saturating_add(1)
        } else {
            self.stop
        }
    }

    /// Check whether this span belongs in the result of a region query.
    ///
    /// Non-empty spans use half-open overlap. A zero-length span at `p`
    /// matches when `start <= p < stop`, and a zero-length query at `p`
    /// matches only zero-length spans at exactly `p`.
    #[inline]
    pub fn intersects_region(&self, start: u64, stop: u64) -> bool {
        if self.is_empty() {
            let p = self.start;
            if start == stop {
                p == start
            } else {
                start <= p && p < stop
            }
        } else if start == stop {
            false
        } else {
            self.start < stop && start < self.stop
        }
    }

    /// Check if this span overlaps with another (half-open).
    #[inline]
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.stop && other.start < self.stop
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.start, self.stop)
    }
}

impl Ord for Span {
    fn cmp(&self, other: &Self) -> Ordering {
        self.start
            .cmp(&other.start)
            .then(self.sweep_stop().cmp(&other.sweep_stop()))
            .then(self.stop.cmp(&other.stop))
    }
}

impl PartialOrd for Span {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One annotation feature and the features nested under it.
#[derive(Debug, Clone, PartialEq)]
pub struct Interval<D> {
    pub id: String,
    pub span: Span,
    pub data: D,
    pub children: Vec<Interval<D>>,
}

impl<D> Interval<D> {
    /// Create a leaf interval.
    pub fn new(id: impl Into<String>, span: Span, data: D) -> Self {
        Self {
            id: id.into(),
            span,
            data,
            children: Vec::new(),
        }
    }

    #[inline]
    pub fn start(&self) -> u64 {
        self.span.start
    }

    #[inline]
    pub fn stop(&self) -> u64 {
        self.span.stop
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Number of intervals in this tree, including the root.
    pub fn tree_len(&self) -> usize {
        1 + self.children.iter().map(|c| c.tree_len()).sum::<usize>()
    }

    /// Depth of the tree (a leaf has depth 1).
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(|c| c.depth()).max().unwrap_or(0)
    }

    /// Find a node by id anywhere in this tree.
    pub fn find(&self, id: &str) -> Option<&Interval<D>> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    /// Pre-order walk yielding `(depth, node, parent)`.
    pub fn walk(&self) -> Vec<(usize, &Interval<D>, Option<&Interval<D>>)> {
        let mut out = Vec::with_capacity(self.tree_len());
        let mut stack = vec![(0usize, self, None)];
        while let Some((depth, node, parent)) = stack.pop() {
            out.push((depth, node, parent));
            for child in node.children.iter().rev() {
                stack.push((depth + 1, child, Some(node)));
            }
        }
        out
    }

    /// True if any node of this tree intersects `[start, stop)` under the
    /// [`Span::intersects_region`] rule. Children may reach past their root.
    pub fn intersects_region(&self, start: u64, stop: u64) -> bool {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.span.intersects_region(start, stop) {
                return true;
            }
            stack.extend(node.children.iter());
        }
        false
    }
}

impl<D: Clone> Interval<D> {
    /// Flatten this tree back into parser-style records.
    ///
    /// Records come out in ascending start order with parents ahead of
    /// children at equal starts, which is the order the assembler expects.
    /// A node reachable from several parents yields one record listing all
    /// of them.
    pub fn flatten(&self) -> Vec<ParsedRecord<D>> {
        let mut records: Vec<ParsedRecord<D>> = Vec::new();
        let mut seen: FxHashMap<&str, usize> = FxHashMap::default();

        for (_, node, parent) in self.walk() {
            let parent_id = parent.map(|p| p.id.clone());
            if let Some(&idx) = seen.get(node.id.as_str()) {
                if let Some(pid) = parent_id {
                    if !records[idx].parent_ids.contains(&pid) {
                        records[idx].parent_ids.push(pid);
                    }
                }
                continue;
            }
            seen.insert(node.id.as_str(), records.len());
            records.push(ParsedRecord {
                id: node.id.clone(),
                span: node.span,
                parent_ids: parent_id.into_iter().collect(),
                data: node.data.clone(),
            });
        }

        records.sort_by_key(|r| r.span.start);
        records
    }
}

impl<D> fmt::Display for Interval<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.id, self.span)
    }
}

/// A region query `contig:start-stop` (0-based, half-open).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenomicRegion {
    pub contig: String,
    pub start: u64,
    pub stop: u64,
}

impl GenomicRegion {
    pub fn new(contig: impl Into<String>, start: u64, stop: u64) -> Self {
        Self {
            contig: contig.into(),
            start,
            stop,
        }
    }
}

impl FromStr for GenomicRegion {
    type Err = String;

    /// Parses `chr1:100-200`, `chr1:100` (zero-length) or `chr1` (whole contig).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let Some((contig, range)) = s.rsplit_once(':') else {
            if s.is_empty() {
                return Err("empty region".to_string());
            }
            return Ok(Self::new(s, 0, u64::MAX));
        };
        if contig.is_empty() {
            return Err(format!("missing contig in region '{}'", s));
        }
        let range = range.replace(',', "");
        let parse = |v: &str| {
            v.parse::<u64>()
                .map_err(|_| format!("invalid coordinate '{}' in region '{}'", v, s))
        };
        let (start, stop) = match range.split_once('-') {
            Some((a, b)) => (parse(a)?, parse(b)?),
            None => {
                let p = parse(&range)?;
                (p, p)
            }
        };
        if start > stop {
            return Err(format!("start ({}) > stop ({}) in region '{}'", start, stop, s));
        }
        Ok(Self::new(contig, start, stop))
    }
}

impl fmt::Display for GenomicRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.contig, self.start, self.stop)
    }
}

/// Strand orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Strand {
    Plus,
    Minus,
    #[default]
    Unknown,
}

impl Strand {
    pub fn from_char(c: char) -> Self {
        match c {
            '+' => Strand::Plus,
            '-' => Strand::Minus,
            _ => Strand::Unknown,
        }
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strand::Plus => write!(f, "+"),
            Strand::Minus => write!(f, "-"),
            Strand::Unknown => write!(f, "."),
        }
    }
}
