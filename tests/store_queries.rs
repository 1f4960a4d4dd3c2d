//! Integration tests for indexed region queries.
//!
//! Runs the store against in-memory and memory-mapped GTF/GFF sources:
//! cache behavior, boundary queries, source failures and parse recovery.

use grit_annotations::prelude::*;
use grit_annotations::reader::IndexError;
use grit_annotations::{FeatureData, FeatureKind, StoreError};
use std::io::{self, Write};
use tempfile::NamedTempFile;

const GFF: &str = "\
##gff-version 3
chr1\tsrc\tgene\t101\t500\t.\t+\t.\tID=gene1;Name=ABC1
chr1\tsrc\tmRNA\t101\t500\t.\t+\t.\tID=tx1;Parent=gene1
chr1\tsrc\texon\t101\t200\t.\t+\t.\tID=exon1;Parent=tx1
chr1\tsrc\tinsertion\t151\t150\t.\t+\t.\tID=ins1
chr1\tsrc\texon\t301\t500\t.\t+\t.\tID=exon2;Parent=tx1
chr1\tsrc\tinsertion\t451\t450\t.\t+\t.\tID=ins2
chr1\tsrc\tgene\t2001\t3000\t.\t-\t.\tID=gene2
chr1\tsrc\tmRNA\t2001\t3000\t.\t-\t.\tID=tx2;Parent=gene2
chr1\tsrc\tgene\t5001\t6000\t.\t+\t.\tID=gene3
chr1\tsrc\tgene\t8001\t9000\t.\t+\t.\tID=gene4
chr2\tsrc\tgene\t1\t1000\t.\t+\t.\tID=gene5
";

fn memory_store() -> IndexedAnnotationStore<MemoryRangeReader, GtfParser> {
    IndexedAnnotationStore::new(MemoryRangeReader::from_text(GFF).unwrap(), GtfParser)
}

fn root_ids(trees: &[Interval<FeatureData>]) -> Vec<&str> {
    trees.iter().map(|t| t.id.as_str()).collect()
}

// =============================================================================
// Query semantics
// =============================================================================

#[test]
fn test_query_returns_full_hierarchy() {
    let mut store = memory_store();
    let trees = store.query("chr1", 320, 330).unwrap();

    assert_eq!(root_ids(&trees), vec!["gene1"]);
    let gene = &trees[0];
    assert_eq!(gene.data.attribute("Name"), Some("ABC1"));
    assert_eq!(gene.children.len(), 1);

    let tx = &gene.children[0];
    assert_eq!(tx.data.kind, FeatureKind::Transcript);
    let exons: Vec<_> = tx.children.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(exons, vec!["exon1", "exon2"]);
}

#[test]
fn test_query_result_excludes_trees_outside_region() {
    let mut store = memory_store();
    assert_eq!(root_ids(&store.query("chr1", 2500, 5500).unwrap()), vec!["gene2", "gene3"]);
    assert!(store.query("chr1", 3000, 5000).unwrap().is_empty());
    assert_eq!(root_ids(&store.query("chr2", 0, 1).unwrap()), vec!["gene5"]);
}

#[test]
fn test_zero_length_query_matches_only_zero_length_features() {
    let mut store = memory_store();

    let trees = store.query("chr1", 150, 150).unwrap();
    assert_eq!(root_ids(&trees), vec!["ins1"]);
    assert!(trees[0].span.is_empty());

    assert!(store.query("chr1", 151, 151).unwrap().is_empty());
    assert!(store.query("chr1", 300, 300).unwrap().is_empty());

    // A regular query covering the insertion returns both roots.
    let trees = store.query("chr1", 140, 160).unwrap();
    assert_eq!(root_ids(&trees), vec!["gene1", "ins1"]);
}

#[test]
fn test_query_is_idempotent() {
    let mut store = memory_store();
    let first = store.query("chr1", 0, 10_000).unwrap();
    let fetches = store.reader().fetch_count();

    let second = store.query("chr1", 0, 10_000).unwrap();
    assert_eq!(first, second);
    assert_eq!(store.reader().fetch_count(), fetches);
    assert_eq!(store.stats().cache_hits, 1);

    // Recomputing after invalidation produces the same trees.
    store.invalidate(Some("chr1"));
    let third = store.query("chr1", 0, 10_000).unwrap();
    assert_eq!(*first, *third);
    assert_eq!(store.reader().fetch_count(), fetches + 1);
}

// =============================================================================
// Cache
// =============================================================================

#[test]
fn test_lru_eviction_refetches_oldest_region() {
    let reader = MemoryRangeReader::from_text(GFF).unwrap();
    let config = StoreConfig::new().with_cache_size(3);
    let mut store = IndexedAnnotationStore::with_config(reader, GtfParser, config);

    store.query("chr1", 100, 200).unwrap();
    store.query("chr1", 2000, 2100).unwrap();
    store.query("chr1", 5000, 5100).unwrap();
    assert_eq!(store.cache_len(), 3);
    assert_eq!(store.reader().fetch_count(), 3);

    // Fourth distinct key evicts the least recently used one.
    store.query("chr1", 8000, 8100).unwrap();
    assert_eq!(store.cache_len(), 3);
    assert_eq!(store.reader().fetch_count(), 4);

    store.query("chr1", 100, 200).unwrap();
    assert_eq!(store.reader().fetch_count(), 5);

    // Most recent keys are still cached.
    store.query("chr1", 8000, 8100).unwrap();
    assert_eq!(store.reader().fetch_count(), 5);
}

#[test]
fn test_cache_disabled() {
    let reader = MemoryRangeReader::from_text(GFF).unwrap();
    let config = StoreConfig::new().with_cache_size(0);
    let mut store = IndexedAnnotationStore::with_config(reader, GtfParser, config);

    store.query("chr1", 100, 200).unwrap();
    store.query("chr1", 100, 200).unwrap();
    assert_eq!(store.reader().fetch_count(), 2);
    assert_eq!(store.cache_len(), 0);
}

#[test]
fn test_invalidate_single_contig() {
    let mut store = memory_store();
    store.query("chr1", 100, 200).unwrap();
    store.query("chr2", 100, 200).unwrap();

    assert_eq!(store.invalidate(Some("chr1")), 1);
    store.query("chr2", 100, 200).unwrap();
    assert_eq!(store.reader().fetch_count(), 2);
    store.query("chr1", 100, 200).unwrap();
    assert_eq!(store.reader().fetch_count(), 3);
}

// =============================================================================
// Failures
// =============================================================================

/// Reader that fails until switched on.
struct FlakyReader {
    inner: MemoryRangeReader,
    available: bool,
}

impl RangeReader for FlakyReader {
    fn has_contig(&self, contig: &str) -> bool {
        self.inner.has_contig(contig)
    }

    fn fetch_lines(&mut self, contig: &str, start: u64, stop: u64) -> io::Result<Vec<Vec<u8>>> {
        if !self.available {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "index offline"));
        }
        self.inner.fetch_lines(contig, start, stop)
    }
}

#[test]
fn test_source_failure_does_not_poison_cache() {
    let reader = FlakyReader {
        inner: MemoryRangeReader::from_text(GFF).unwrap(),
        available: false,
    };
    let mut store = IndexedAnnotationStore::new(reader, GtfParser);

    assert!(matches!(
        store.query("chr1", 100, 200),
        Err(StoreError::SourceUnavailable { .. })
    ));
    assert_eq!(store.cache_len(), 0);

    // Once the source is back the same query succeeds.
    store.reader_mut().available = true;
    assert_eq!(
        root_ids(&store.query("chr1", 100, 200).unwrap()),
        vec!["gene1", "ins1"]
    );
    assert_eq!(store.cache_len(), 1);
}

#[test]
fn test_unknown_contig() {
    let mut store = memory_store();
    let err = store.query("chrUn", 0, 100).unwrap_err();
    assert!(matches!(err, StoreError::UnknownContig(_)));
    assert_eq!(err.to_string(), "unknown contig 'chrUn'");
}

#[test]
fn test_malformed_lines_skipped_and_counted() {
    // Coordinates readable (so the line is indexed) but too few columns or
    // no usable id.
    let text = "\
chr1\tsrc\tgene\t101\t500\t.\t+\t.\tgene_id \"g1\";
chr1\tsrc\texon\t120\t130
chr1\tsrc\texon\t130\t140\t.\t+\t.\ttranscript_id \"t1\";
chr1\tsrc\texon\t301\t400\t.\t+\t.\tgene_id \"g1\"; transcript_id \"t1\"; exon_id \"e1\";
";
    let mut store = IndexedAnnotationStore::new(MemoryRangeReader::from_text(text).unwrap(), GtfParser);
    let trees = store.query("chr1", 0, 1000).unwrap();

    assert_eq!(store.skipped_count(), 2);
    // e1 names a transcript that never appears, so it comes back as an
    // orphan root next to the gene.
    assert_eq!(root_ids(&trees), vec!["g1", "t1:e1"]);
    assert_eq!(store.dangling_count(), 1);
}

#[test]
fn test_strict_policy_surfaces_parse_error() {
    let text = "chr1\tsrc\tgene\t101\t500\t.\t+\t.\n";
    let config = StoreConfig::new().with_parse_policy(ParsePolicy::Fail);
    let mut store = IndexedAnnotationStore::with_config(
        MemoryRangeReader::from_text(text).unwrap(),
        GtfParser,
        config,
    );
    assert!(matches!(
        store.query("chr1", 0, 1000),
        Err(StoreError::Parse { .. })
    ));
}

// =============================================================================
// Shared ids and far-away children
// =============================================================================

#[test]
fn test_gtf_exon_shared_by_two_transcripts() {
    // Ensembl repeats one exon_id under every transcript that uses the exon.
    let text = "\
chr1\tsrc\tgene\t101\t900\t.\t+\t.\tgene_id \"G1\";
chr1\tsrc\ttranscript\t101\t900\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T1\";
chr1\tsrc\texon\t101\t300\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T1\"; exon_id \"ENSE1\";
chr1\tsrc\ttranscript\t101\t700\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T2\";
chr1\tsrc\texon\t101\t300\t.\t+\t.\tgene_id \"G1\"; transcript_id \"T2\"; exon_id \"ENSE1\";
";
    let mut store = IndexedAnnotationStore::new(MemoryRangeReader::from_text(text).unwrap(), GtfParser);
    let trees = store.query("chr1", 150, 160).unwrap();

    assert_eq!(root_ids(&trees), vec!["G1"]);
    let gene = &trees[0];
    assert_eq!(gene.tree_len(), 5);
    for tx in ["T1", "T2"] {
        let transcript = gene.find(tx).unwrap();
        assert_eq!(transcript.children.len(), 1);
        assert_eq!(transcript.children[0].data.attribute("exon_id"), Some("ENSE1"));
    }
    assert_eq!(store.dangling_count(), 0);
}

#[test]
fn test_gff3_cds_split_over_lines() {
    let text = "\
chr1\tsrc\tgene\t101\t900\t.\t+\t.\tID=g1
chr1\tsrc\tmRNA\t101\t900\t.\t+\t.\tID=m1;Parent=g1
chr1\tsrc\tCDS\t201\t300\t.\t+\t0\tID=cds1;Parent=m1
chr1\tsrc\tCDS\t501\t650\t.\t+\t2\tID=cds1;Parent=m1
";
    let mut store = IndexedAnnotationStore::new(MemoryRangeReader::from_text(text).unwrap(), GtfParser);
    let trees = store.query("chr1", 0, 1000).unwrap();

    assert_eq!(root_ids(&trees), vec!["g1"]);
    let mrna = &trees[0].children[0];
    let segments: Vec<_> = mrna.children.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(segments, vec!["cds1:200", "cds1:500"]);
    assert!(mrna
        .children
        .iter()
        .all(|c| c.data.kind == FeatureKind::Cds && c.data.attribute("ID") == Some("cds1")));
}

#[test]
fn test_child_outside_parent_span_stays_with_parent() {
    let text = "\
chr1\tsrc\tgene\t101\t500\t.\t+\t.\tID=g1
chr1\tsrc\tgene\t551\t560\t.\t+\t.\tID=x1
chr1\tsrc\texon\t601\t700\t.\t+\t.\tID=e1;Parent=g1
";
    let mut store = IndexedAnnotationStore::new(MemoryRangeReader::from_text(text).unwrap(), GtfParser);
    assert_eq!(store.reader().index().regions("chr1").len(), 1);

    for (start, stop) in [(150, 160), (650, 660)] {
        let trees = store.query("chr1", start, stop).unwrap();
        assert_eq!(root_ids(&trees), vec!["g1"], "chr1:{}-{}", start, stop);
        assert_eq!(trees[0].children.len(), 1);
        assert_eq!(trees[0].children[0].id, "e1");
    }
    let trees = store.query("chr1", 0, 1000).unwrap();
    assert_eq!(root_ids(&trees), vec!["g1", "x1"]);
    assert_eq!(trees[0].tree_len(), 2);

    assert_eq!(root_ids(&store.query("chr1", 520, 580).unwrap()), vec!["x1"]);
    assert!(store.query("chr1", 570, 590).unwrap().is_empty());
    assert_eq!(store.dangling_count(), 0);
}

// =============================================================================
// Memory-mapped files
// =============================================================================

fn write_gff(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_file_reader_end_to_end() {
    let file = write_gff(GFF);
    let reader = IndexedFileReader::open(file.path()).unwrap();
    assert_eq!(reader.index().regions("chr1").len(), 4);

    let mut file_store = IndexedAnnotationStore::new(reader, GtfParser);
    let mut memory_store = memory_store();

    for (start, stop) in [(0, 10_000), (150, 150), (2500, 2600), (9000, 9500)] {
        let from_file = file_store.query("chr1", start, stop).unwrap();
        let from_memory = memory_store.query("chr1", start, stop).unwrap();
        assert_eq!(from_file, from_memory, "chr1:{}-{}", start, stop);
    }
}

#[test]
fn test_file_reader_rejects_unsorted_input() {
    let file = write_gff(
        "chr1\tsrc\tgene\t101\t500\t.\t+\t.\tID=a\n\
         chr2\tsrc\tgene\t101\t500\t.\t+\t.\tID=b\n\
         chr1\tsrc\tgene\t901\t950\t.\t+\t.\tID=c\n",
    );
    assert!(matches!(
        IndexedFileReader::open(file.path()),
        Err(IndexError::Unsorted(_))
    ));
}

#[test]
fn test_parallel_queries_over_file() {
    let file = write_gff(GFF);
    let reader = IndexedFileReader::open(file.path()).unwrap();
    let regions: Vec<GenomicRegion> = (0..16)
        .map(|i| {
            if i % 2 == 0 {
                GenomicRegion::new("chr1", 2000, 2100)
            } else {
                "chr2:10-20".parse().unwrap()
            }
        })
        .collect();

    let results = query_regions_parallel(
        || IndexedAnnotationStore::new(reader.clone(), GtfParser),
        &regions,
    );
    for (i, result) in results.iter().enumerate() {
        let expected = if i % 2 == 0 { "gene2" } else { "gene5" };
        assert_eq!(root_ids(result.as_ref().unwrap()), vec![expected]);
    }
}
