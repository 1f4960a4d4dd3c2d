//! Memory-mapped range reader over a sorted GTF/GFF file.
//!
//! Opening the file scans it once with memchr to build a [`RegionIndex`]
//! of byte ranges. Queries then binary-search the index and slice lines
//! straight out of the map, so only the touched regions are read.

use super::{scan_feature, scan_links, IndexError, RangeReader, RegionIndex, RegionIndexBuilder};
use crate::parser::{should_skip_line, trim_line_end};
use log::{debug, warn};
use memchr::{memchr, memchr_iter};
use memmap2::Mmap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Indexed, memory-mapped annotation file.
///
/// Cloning is cheap: the map and the index are shared, fetch counters are
/// per clone. This is how parallel queries get one reader per worker.
#[derive(Debug, Clone)]
pub struct IndexedFileReader {
    path: PathBuf,
    /// None for an empty file.
    mmap: Option<Arc<Mmap>>,
    index: Arc<RegionIndex>,
    skipped_lines: usize,
    fetch_count: usize,
}

impl IndexedFileReader {
    /// Map and index a sorted GTF/GFF file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, IndexError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let file_size = file.metadata()?.len();

        if file_size == 0 {
            return Ok(Self {
                path,
                mmap: None,
                index: Arc::new(RegionIndex::default()),
                skipped_lines: 0,
                fetch_count: 0,
            });
        }

        let mmap = unsafe { Mmap::map(&file)? };
        let (index, skipped_lines) = Self::build_index(&mmap)?;
        debug!(
            "indexed {} ({} bytes, {} regions, {} skipped lines)",
            path.display(),
            file_size,
            index.len(),
            skipped_lines
        );

        Ok(Self {
            path,
            mmap: Some(Arc::new(mmap)),
            index: Arc::new(index),
            skipped_lines,
            fetch_count: 0,
        })
    }

    fn build_index(data: &[u8]) -> Result<(RegionIndex, usize), IndexError> {
        let mut builder = RegionIndexBuilder::new();
        let mut skipped_lines = 0;
        let mut line_num = 0;
        let mut pos = 0;

        while pos < data.len() {
            let end = memchr(b'\n', &data[pos..]).map_or(data.len(), |i| pos + i);
            let line = trim_line_end(&data[pos..end]);
            line_num += 1;

            if !should_skip_line(line) {
                match scan_feature(line) {
                    Some((contig, span)) => builder.push_linked(
                        contig,
                        span,
                        pos,
                        pos + line.len(),
                        scan_links(line).as_ref(),
                    )?,
                    None => {
                        skipped_lines += 1;
                        warn!("skipping unreadable line {}", line_num);
                    }
                }
            }
            pos = end + 1;
        }

        Ok((builder.finish(), skipped_lines))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn index(&self) -> &RegionIndex {
        &self.index
    }

    /// Lines dropped while indexing because their coordinates were unreadable.
    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }

    /// Number of `fetch_lines` calls served by this handle.
    pub fn fetch_count(&self) -> usize {
        self.fetch_count
    }
}

impl RangeReader for IndexedFileReader {
    fn has_contig(&self, contig: &str) -> bool {
        self.index.has_contig(contig)
    }

    fn fetch_lines(&mut self, contig: &str, start: u64, stop: u64) -> io::Result<Vec<Vec<u8>>> {
        self.fetch_count += 1;
        let Some(mmap) = self.mmap.as_ref() else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        for region in self.index.find_overlapping(contig, start, stop) {
            let block = mmap.get(region.first..region.last).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "region {}..{} is outside {}",
                        region.first,
                        region.last,
                        self.path.display()
                    ),
                )
            })?;

            let mut begin = 0;
            for newline in memchr_iter(b'\n', block).chain(std::iter::once(block.len())) {
                let line = trim_line_end(&block[begin..newline]);
                if !should_skip_line(line) {
                    out.push(line.to_vec());
                }
                begin = newline + 1;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_open_and_fetch() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "##gff-version 3").unwrap();
        writeln!(file, "chr1\ts\tgene\t101\t500\t.\t+\t.\tID=g1").unwrap();
        writeln!(file, "chr1\ts\tmRNA\t101\t500\t.\t+\t.\tID=t1;Parent=g1").unwrap();
        writeln!(file, "# interleaved comment").unwrap();
        writeln!(file, "chr1\ts\texon\t101\t200\t.\t+\t.\tParent=t1").unwrap();
        writeln!(file, "chr1\ts\tgene\t2001\t3000\t.\t+\t.\tID=g2").unwrap();
        write!(file, "chr2\ts\tgene\t1\t10\t.\t+\t.\tID=g3").unwrap();
        file.flush().unwrap();

        let mut reader = IndexedFileReader::open(file.path()).unwrap();
        assert_eq!(reader.index().regions("chr1").len(), 2);
        assert!(reader.has_contig("chr2"));

        let lines = reader.fetch_lines("chr1", 150, 151).unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|l| !l.starts_with(b"#")));

        // Last line without trailing newline
        let lines = reader.fetch_lines("chr2", 0, 5).unwrap();
        assert_eq!(lines, vec![b"chr2\ts\tgene\t1\t10\t.\t+\t.\tID=g3".to_vec()]);
        assert_eq!(reader.fetch_count(), 2);
    }

    #[test]
    fn test_empty_file() {
        let file = NamedTempFile::new().unwrap();
        let mut reader = IndexedFileReader::open(file.path()).unwrap();
        assert!(reader.index().is_empty());
        assert!(!reader.has_contig("chr1"));
        assert!(reader.fetch_lines("chr1", 0, 10).unwrap().is_empty());
    }

    #[test]
    fn test_clone_shares_index() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "chr1\ts\tgene\t101\t500\t.\t+\t.\tID=g1").unwrap();
        file.flush().unwrap();

        let mut a = IndexedFileReader::open(file.path()).unwrap();
        let mut b = a.clone();
        a.fetch_lines("chr1", 100, 200).unwrap();
        b.fetch_lines("chr1", 100, 200).unwrap();
        b.fetch_lines("chr1", 100, 200).unwrap();
        assert_eq!(a.fetch_count(), 1);
        assert_eq!(b.fetch_count(), 2);
        assert!(Arc::ptr_eq(&a.index, &b.index));
    }
}
