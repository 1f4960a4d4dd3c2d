//! Parallel batch queries using Rayon.
//!
//! A store is single-threaded, so parallelism comes from running one store
//! per worker. Readers like [`IndexedFileReader`](crate::reader::IndexedFileReader)
//! are cheap to clone, which makes `make_store` cheap too.

use crate::interval::GenomicRegion;
use crate::parser::RecordParser;
use crate::reader::RangeReader;
use crate::store::{IndexedAnnotationStore, QueryResult, Result};
use rayon::prelude::*;

/// Minimum number of regions before enabling parallelization.
/// Below this threshold a single store answers every region.
pub const PARALLEL_THRESHOLD: usize = 8;

/// Query every region, returning one result per region in input order.
///
/// `make_store` is called once per rayon worker (and once for the
/// sequential path). Each worker keeps its own cache.
pub fn query_regions_parallel<R, P, F>(
    make_store: F,
    regions: &[GenomicRegion],
) -> Vec<Result<QueryResult<P::Data>>>
where
    R: RangeReader,
    P: RecordParser,
    P::Data: Clone + Send + Sync,
    F: Fn() -> IndexedAnnotationStore<R, P> + Sync + Send,
{
    if regions.len() < PARALLEL_THRESHOLD {
        let mut store = make_store();
        return regions
            .iter()
            .map(|r| store.query(&r.contig, r.start, r.stop))
            .collect();
    }

    regions
        .par_iter()
        .map_init(&make_store, |store, r| store.query(&r.contig, r.start, r.stop))
        .collect()
}
