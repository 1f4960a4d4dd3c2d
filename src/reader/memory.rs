//! In-memory range reader.

use super::{scan_feature, scan_links, IndexError, RangeReader, RegionIndex, RegionIndexBuilder};
use crate::parser::{should_skip_line, trim_line_end};
use log::warn;
use rustc_hash::FxHashMap;
use std::io;

/// Range reader over annotation lines held in memory.
///
/// Lines must be sorted by contig, then start. Lines whose coordinates can't
/// be read are dropped at construction and counted in
/// [`skipped_lines`](Self::skipped_lines).
#[derive(Debug, Clone, Default)]
pub struct MemoryRangeReader {
    lines_by_contig: FxHashMap<String, Vec<Vec<u8>>>,
    index: RegionIndex,
    skipped_lines: usize,
    fetch_count: usize,
}

impl MemoryRangeReader {
    /// Build from annotation text.
    pub fn from_text(text: &str) -> Result<Self, IndexError> {
        Self::from_lines(text.lines())
    }

    /// Build from individual lines.
    pub fn from_lines<I, L>(lines: I) -> Result<Self, IndexError>
    where
        I: IntoIterator<Item = L>,
        L: AsRef<[u8]>,
    {
        let mut builder = RegionIndexBuilder::new();
        let mut lines_by_contig: FxHashMap<String, Vec<Vec<u8>>> = FxHashMap::default();
        let mut skipped_lines = 0;

        for (line_num, line) in lines.into_iter().enumerate() {
            let line = trim_line_end(line.as_ref());
            if should_skip_line(line) {
                continue;
            }
            let Some((contig, span)) = scan_feature(line) else {
                skipped_lines += 1;
                warn!("skipping unreadable line {}", line_num + 1);
                continue;
            };
            let stored = lines_by_contig.entry(contig.to_string()).or_default();
            let idx = stored.len();
            stored.push(line.to_vec());
            builder.push_linked(contig, span, idx, idx + 1, scan_links(line).as_ref())?;
        }

        Ok(Self {
            lines_by_contig,
            index: builder.finish(),
            skipped_lines,
            fetch_count: 0,
        })
    }

    pub fn index(&self) -> &RegionIndex {
        &self.index
    }

    /// Number of `fetch_lines` calls served.
    pub fn fetch_count(&self) -> usize {
        self.fetch_count
    }

    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }
}

impl RangeReader for MemoryRangeReader {
    fn has_contig(&self, contig: &str) -> bool {
        self.index.has_contig(contig)
    }

    fn fetch_lines(&mut self, contig: &str, start: u64, stop: u64) -> io::Result<Vec<Vec<u8>>> {
        self.fetch_count += 1;
        let Some(lines) = self.lines_by_contig.get(contig) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for region in self.index.find_overlapping(contig, start, stop) {
            out.extend(lines[region.first..region.last].iter().cloned());
        }
        Ok(out)
    }
}
