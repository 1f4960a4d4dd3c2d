//! Tab-separated output of annotation trees.
//!
//! Uses itoa for integer formatting and ryu for float formatting
//! to avoid allocation in the hot path.

use crate::interval::Interval;
use crate::parser::FeatureData;
use crate::reader::Region;
use std::io::{self, BufWriter, Write};

/// Buffer size for TreeWriter (1MB default).
const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Column names written by [`TreeWriter::write_header`].
pub const TREE_COLUMNS: [&str; 9] = [
    "contig", "start", "stop", "depth", "id", "kind", "strand", "score", "parent",
];

/// Writer for assembled trees, one feature per line in pre-order.
///
/// Coordinates are 0-based half-open. The id column is indented by two
/// spaces per nesting level so the hierarchy reads at a glance.
pub struct TreeWriter<W: Write> {
    writer: BufWriter<W>,
    itoa_buf: itoa::Buffer,
    ryu_buf: ryu::Buffer,
}

impl<W: Write> TreeWriter<W> {
    pub fn new(output: W) -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE, output)
    }

    pub fn with_capacity(capacity: usize, output: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(capacity, output),
            itoa_buf: itoa::Buffer::new(),
            ryu_buf: ryu::Buffer::new(),
        }
    }

    pub fn write_header(&mut self) -> io::Result<()> {
        self.writer.write_all(b"#")?;
        self.writer.write_all(TREE_COLUMNS.join("\t").as_bytes())?;
        self.writer.write_all(b"\n")
    }

    /// Write every node of a tree.
    pub fn write_tree(&mut self, tree: &Interval<FeatureData>) -> io::Result<()> {
        for (depth, node, parent) in tree.walk() {
            self.write_node(depth, node, parent.map(|p| p.id.as_str()))?;
        }
        Ok(())
    }

    /// Write a list of trees.
    pub fn write_trees<'a, I>(&mut self, trees: I) -> io::Result<usize>
    where
        I: IntoIterator<Item = &'a Interval<FeatureData>>,
    {
        let mut written = 0;
        for tree in trees {
            self.write_tree(tree)?;
            written += 1;
        }
        Ok(written)
    }

    fn write_node(
        &mut self,
        depth: usize,
        node: &Interval<FeatureData>,
        parent: Option<&str>,
    ) -> io::Result<()> {
        let data = &node.data;
        self.writer.write_all(data.contig.as_bytes())?;
        self.writer.write_all(b"\t")?;
        self.write_int(node.span.start)?;
        self.writer.write_all(b"\t")?;
        self.write_int(node.span.stop)?;
        self.writer.write_all(b"\t")?;
        self.write_int(depth)?;
        self.writer.write_all(b"\t")?;
        for _ in 0..depth {
            self.writer.write_all(b"  ")?;
        }
        self.writer.write_all(node.id.as_bytes())?;
        self.writer.write_all(b"\t")?;
        self.writer.write_all(data.kind.as_str().as_bytes())?;
        self.writer.write_all(b"\t")?;
        write!(self.writer, "{}", data.strand)?;
        self.writer.write_all(b"\t")?;
        match data.score {
            Some(score) => self.write_float(score)?,
            None => self.writer.write_all(b".")?,
        }
        self.writer.write_all(b"\t")?;
        self.writer.write_all(parent.unwrap_or(".").as_bytes())?;
        self.writer.write_all(b"\n")
    }

    /// Write one top-level region: contig, start, stop, feature count.
    pub fn write_region(&mut self, contig: &str, region: &Region) -> io::Result<()> {
        self.writer.write_all(contig.as_bytes())?;
        self.writer.write_all(b"\t")?;
        self.write_int(region.start)?;
        self.writer.write_all(b"\t")?;
        self.write_int(region.stop)?;
        self.writer.write_all(b"\t")?;
        self.write_int(region.features)?;
        self.writer.write_all(b"\n")
    }

    #[inline]
    fn write_int<I: itoa::Integer>(&mut self, n: I) -> io::Result<()> {
        self.writer.write_all(self.itoa_buf.format(n).as_bytes())
    }

    #[inline]
    fn write_float(&mut self, f: f64) -> io::Result<()> {
        self.writer.write_all(self.ryu_buf.format(f).as_bytes())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
