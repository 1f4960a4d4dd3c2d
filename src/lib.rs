// Clippy allows for the whole crate
#![allow(clippy::type_complexity)]

//! GRIT annotations: nested interval assembly for genomic annotation files.
//!
//! Annotation files describe hierarchies (gene → transcript → exon) as flat,
//! coordinate-sorted records linked by parent ids. This crate rebuilds those
//! hierarchies in a single streaming pass and answers region queries against
//! large files without loading them.
//!
//! # Features
//!
//! - **Streaming assembly**: A sweep over sorted records emits each tree as
//!   soon as no later record can belong to it
//! - **Indexed queries**: Memory-mapped files with a top-level region index,
//!   re-assembly on demand and an LRU result cache
//! - **Parallel processing**: Uses Rayon to run batches of queries with one
//!   store per worker
//!
//! # Example
//!
//! ```rust,no_run
//! use grit_annotations::{GtfParser, IndexedAnnotationStore, IndexedFileReader};
//!
//! let reader = IndexedFileReader::open("genes.gtf").unwrap();
//! let mut store = IndexedAnnotationStore::new(reader, GtfParser);
//!
//! for gene in store.query("chr1", 11_000, 12_000).unwrap().iter() {
//!     println!("{} has {} transcripts", gene.id, gene.children.len());
//! }
//! ```

pub mod assembler;
pub mod cache;
pub mod config;
pub mod interval;
pub mod output;
pub mod parallel;
pub mod parser;
pub mod reader;
pub mod store;

// Re-export commonly used types
pub use assembler::{assemble, AssemblyError, AssemblyStats, IntervalAssembler};
pub use config::{ParsePolicy, StoreConfig};
pub use interval::{GenomicRegion, Interval, Span, Strand};
pub use parser::{FeatureData, FeatureKind, GtfParser, ParseError, ParsedRecord, RecordParser};
pub use reader::{IndexedFileReader, MemoryRangeReader, RangeReader};
pub use store::{IndexedAnnotationStore, StoreError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::assembler::{assemble, IntervalAssembler};
    pub use crate::config::{ParsePolicy, StoreConfig};
    pub use crate::interval::{GenomicRegion, Interval, Span};
    pub use crate::parallel::query_regions_parallel;
    pub use crate::parser::{GtfParser, ParsedRecord, RecordParser};
    pub use crate::reader::{IndexedFileReader, MemoryRangeReader, RangeReader};
    pub use crate::store::IndexedAnnotationStore;
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_basic_workflow() {
        use crate::prelude::*;

        let records = vec![
            ParsedRecord::new("g1", 100, 500, ()),
            ParsedRecord::new("t1", 100, 400, ()).with_parent("g1"),
            ParsedRecord::new("e1", 100, 200, ()).with_parent("t1"),
            ParsedRecord::new("g2", 600, 700, ()),
        ];
        let trees: Vec<Interval<()>> = assemble(records).collect::<Result<_, _>>().unwrap();

        assert_eq!(trees.len(), 2);
        assert_eq!(trees[0].tree_len(), 3);
        assert_eq!(trees[0].depth(), 3);
        assert!(trees[1].is_leaf());
    }

    #[test]
    fn test_store_workflow() {
        use crate::prelude::*;

        let text = "chr1\ts\tgene\t101\t500\t.\t+\t.\tID=g1\n\
                    chr1\ts\texon\t101\t200\t.\t+\t.\tID=e1;Parent=g1\n";
        let reader = MemoryRangeReader::from_text(text).unwrap();
        let mut store = IndexedAnnotationStore::new(reader, GtfParser);

        let trees = store.query("chr1", 150, 151).unwrap();
        assert_eq!(trees.len(), 1);
        assert_eq!(trees[0].children[0].id, "e1");
    }
}
