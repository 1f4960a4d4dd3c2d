//! Random-access sources of raw annotation lines.
//!
//! A [`RangeReader`] hands the store every raw line it needs to rebuild the
//! trees overlapping a region. Readers here return whole top-level regions
//! (chains of overlapping or parent-linked features), so a gene is never cut
//! in half by a query boundary.
//!
//! - [`IndexedFileReader`]: memory-mapped sorted GTF/GFF file
//! - [`MemoryRangeReader`]: in-memory lines, for small inputs and tests

pub mod file;
pub mod index;
pub mod memory;

pub use file::IndexedFileReader;
pub use index::{FeatureLinks, Region, RegionIndex, RegionIndexBuilder};
pub use memory::MemoryRangeReader;

use crate::interval::Span;
use crate::parser::{gff_span, split_tabs, GtfParser, RecordParser};
use std::io;
use thiserror::Error;

/// Errors raised while building a region index.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("File not sorted: {0}")]
    Unsorted(String),
}

/// Source of raw annotation lines for a coordinate range.
pub trait RangeReader {
    /// True if the source knows this contig.
    fn has_contig(&self, contig: &str) -> bool;

    /// Return lines covering at least `[start, stop)` on `contig`, in
    /// ascending start order. Extra context is allowed.
    fn fetch_lines(&mut self, contig: &str, start: u64, stop: u64) -> io::Result<Vec<Vec<u8>>>;
}

impl<R: RangeReader + ?Sized> RangeReader for Box<R> {
    fn has_contig(&self, contig: &str) -> bool {
        (**self).has_contig(contig)
    }

    fn fetch_lines(&mut self, contig: &str, start: u64, stop: u64) -> io::Result<Vec<Vec<u8>>> {
        (**self).fetch_lines(contig, start, stop)
    }
}

/// Pull the contig and span out of a GTF/GFF data line without a full parse.
#[inline]
pub(crate) fn scan_feature(line: &[u8]) -> Option<(&str, Span)> {
    let (fields, found) = split_tabs::<6>(line);
    if found < 5 {
        return None;
    }
    let contig = std::str::from_utf8(fields[0]).ok()?;
    if contig.is_empty() {
        return None;
    }
    let span = gff_span(fields[3], fields[4]).ok()?;
    Some((contig, span))
}

/// Id and parents of a data line, or `None` if the line has no usable id.
pub(crate) fn scan_links(line: &[u8]) -> Option<FeatureLinks> {
    let record = GtfParser.parse(line).ok()?;
    Some(FeatureLinks {
        id: record.id,
        parents: record.parent_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_links() {
        let line = b"chr1\tsrc\texon\t101\t200\t.\t+\t.\tID=e1;Parent=t1,t2";
        let links = scan_links(line).unwrap();
        assert_eq!(links.id, "e1");
        assert_eq!(links.parents, vec!["t1".to_string(), "t2".to_string()]);
        assert_eq!(scan_links(b"chr1\tsrc\tgene\t101\t200\t.\t+\t.\tNote=x"), None);
    }

    #[test]
    fn test_scan_feature() {
        let line = b"chr1\tsrc\tgene\t101\t200\t.\t+\t.\tgene_id \"g1\";";
        assert_eq!(scan_feature(line), Some(("chr1", Span::new(100, 200))));
        assert_eq!(scan_feature(b"chr1\tsrc\tgene\t101"), None);
        assert_eq!(scan_feature(b"chr1\tsrc\tgene\tabc\t200"), None);
        assert_eq!(scan_feature(b"\tsrc\tgene\t101\t200"), None);
    }
}
