//! Top-level region index.
//!
//! Features on a contig are merged into maximal chains of overlapping spans,
//! the same sweep a streaming merge performs. Each chain is one [`Region`]:
//! the pre-computed top-level boundaries a query expands to.
//!
//! Overlap alone does not keep a tree together: a child may lie outside its
//! parent's span. When a feature names a parent (or is named by an earlier
//! child) that lives in an earlier region, every region from that one up to
//! the current one collapses into a single region. Fetching whole regions
//! then hands the assembler every line of a tree.
//!
//! Sort validation happens while building, with the same rules a streaming
//! command applies:
//! 1. All records for a contig are contiguous (no interleaving)
//! 2. Within a contig, start positions are non-decreasing

use super::IndexError;
use crate::interval::Span;
use log::{debug, trace};
use rustc_hash::{FxHashMap, FxHashSet};

/// One top-level region.
///
/// `first..last` locates the region's lines in the backing source: byte
/// offsets for files, line numbers for in-memory readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: u64,
    /// Largest zero-length normalized stop in the region.
    pub stop: u64,
    pub first: usize,
    pub last: usize,
    /// Number of features merged into this region.
    pub features: usize,
}

/// Per-contig sorted, disjoint top-level regions.
#[derive(Debug, Clone, Default)]
pub struct RegionIndex {
    regions_by_contig: FxHashMap<String, Vec<Region>>,
    /// Contig order as first seen in the source.
    order: Vec<String>,
}

impl RegionIndex {
    /// Check if a contig exists.
    #[inline]
    pub fn has_contig(&self, contig: &str) -> bool {
        self.regions_by_contig.contains_key(contig)
    }

    /// Get all contig names in source order.
    pub fn contigs(&self) -> impl Iterator<Item = &String> {
        self.order.iter()
    }

    /// All regions of a contig.
    pub fn regions(&self, contig: &str) -> &[Region] {
        self.regions_by_contig
            .get(contig)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Regions overlapping `[start, stop)`. A zero-length query at `p` is
    /// widened to `[p, p + 1)`.
    pub fn find_overlapping(&self, contig: &str, start: u64, stop: u64) -> &[Region] {
        let regions = self.regions(contig);
        let end = if stop > start {
            stop
        } else {
            start.saturating_add(1)
        };

        // Regions are disjoint and sorted, so stops are sorted too.
        let lo = regions.partition_point(|r| r.stop <= start);
        let hi = lo + regions[lo..].partition_point(|r| r.start < end);
        &regions[lo..hi]
    }

    /// Total number of regions across contigs.
    pub fn len(&self) -> usize {
        self.regions_by_contig.values().map(|v| v.len()).sum()
    }

    /// Check if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.regions_by_contig.is_empty()
    }
}

/// Id and declared parents of one feature, as far as indexing cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureLinks {
    pub id: String,
    pub parents: Vec<String>,
}

/// Builds a [`RegionIndex`] from features in file order.
#[derive(Debug, Default)]
pub struct RegionIndexBuilder {
    index: RegionIndex,
    contig: Option<String>,
    current: Option<Region>,
    prev_start: u64,
    seen_contigs: FxHashSet<String>,
    record_count: usize,
    /// Region holding each id seen on the current contig.
    region_of: FxHashMap<String, usize>,
    /// Parent ids named before they appeared, with the earliest naming region.
    awaited: FxHashMap<String, usize>,
    merges: usize,
}

impl RegionIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one feature located at `first..last` in the source.
    pub fn push(
        &mut self,
        contig: &str,
        span: Span,
        first: usize,
        last: usize,
    ) -> Result<(), IndexError> {
        self.record_count += 1;

        if self.contig.as_deref() != Some(contig) {
            if self.seen_contigs.contains(contig) {
                return Err(IndexError::Unsorted(format!(
                    "contig '{}' at record {} was seen earlier (contigs must be contiguous)",
                    contig, self.record_count
                )));
            }
            self.flush();
            if let Some(prev) = self.contig.take() {
                self.seen_contigs.insert(prev);
            }
            self.contig = Some(contig.to_string());
            self.region_of.clear();
            self.awaited.clear();
            self.index.order.push(contig.to_string());
            self.index
                .regions_by_contig
                .entry(contig.to_string())
                .or_default();
            self.prev_start = 0;
        } else if span.start < self.prev_start {
            return Err(IndexError::Unsorted(format!(
                "position {} at record {} comes after {} on {}",
                span.start, self.record_count, self.prev_start, contig
            )));
        }
        self.prev_start = span.start;

        match self.current.as_mut() {
            Some(region) if span.start < region.stop => {
                region.stop = region.stop.max(span.sweep_stop());
                region.last = last;
                region.features += 1;
            }
            _ => {
                self.flush();
                self.current = Some(Region {
                    start: span.start,
                    stop: span.sweep_stop(),
                    first,
                    last,
                    features: 1,
                });
            }
        }
        Ok(())
    }

    /// Add one feature and keep it in the same region as its relatives.
    pub fn push_linked(
        &mut self,
        contig: &str,
        span: Span,
        first: usize,
        last: usize,
        links: Option<&FeatureLinks>,
    ) -> Result<(), IndexError> {
        self.push(contig, span, first, last)?;
        if let Some(links) = links {
            self.link(links);
        }
        Ok(())
    }

    fn link(&mut self, links: &FeatureLinks) {
        let current = self.closed_len();
        let mut target = self.awaited.remove(&links.id).unwrap_or(current);
        for parent in &links.parents {
            match self.region_of.get(parent) {
                Some(&region) => target = target.min(region),
                None => {
                    let earliest = self.awaited.entry(parent.clone()).or_insert(current);
                    *earliest = (*earliest).min(current);
                }
            }
        }
        self.region_of.insert(links.id.clone(), current);
        if target < current {
            self.collapse(target);
        }
    }

    /// Regions already closed on the current contig; the open region comes next.
    fn closed_len(&self) -> usize {
        self.contig
            .as_ref()
            .and_then(|c| self.index.regions_by_contig.get(c))
            .map_or(0, Vec::len)
    }

    /// Fold closed regions `target..` into the open region.
    fn collapse(&mut self, target: usize) {
        let (Some(contig), Some(current)) = (self.contig.as_ref(), self.current.as_mut()) else {
            return;
        };
        let Some(regions) = self.index.regions_by_contig.get_mut(contig) else {
            return;
        };
        for region in regions.drain(target..) {
            current.start = current.start.min(region.start);
            current.stop = current.stop.max(region.stop);
            current.first = current.first.min(region.first);
            current.features += region.features;
        }
        for region in self
            .region_of
            .values_mut()
            .chain(self.awaited.values_mut())
        {
            if *region > target {
                *region = target;
            }
        }
        self.merges += 1;
        trace!(
            "linked features merged regions from {} on {} into {}-{}",
            target,
            contig,
            current.start,
            current.stop
        );
    }

    fn flush(&mut self) {
        if let (Some(region), Some(contig)) = (self.current.take(), self.contig.as_ref()) {
            if let Some(regions) = self.index.regions_by_contig.get_mut(contig) {
                regions.push(region);
            }
        }
    }

    /// Number of features pushed so far.
    pub fn record_count(&self) -> usize {
        self.record_count
    }

    pub fn finish(mut self) -> RegionIndex {
        self.flush();
        debug!(
            "indexed {} features into {} regions on {} contigs ({} link merges)",
            self.record_count,
            self.index.len(),
            self.index.order.len(),
            self.merges
        );
        self.index
    }
}
