//! Indexed lookup of nested annotation trees.
//!
//! [`IndexedAnnotationStore`] answers "which gene trees overlap this region"
//! against a large sorted annotation source without loading it:
//!
//! 1. Check the LRU cache for the exact `(contig, start, stop)` query
//! 2. Fetch the raw lines of every top-level region the query touches
//! 3. Parse them, skipping (and counting) lines the parser rejects
//! 4. Re-assemble the trees with the store's assembler, reset per query
//! 5. Keep the trees that intersect the query, cache and return them
//!
//! A store is single-threaded. Run one store per thread for concurrency
//! (see [`crate::parallel`]).

use crate::assembler::{AssemblyError, IntervalAssembler};
use crate::cache::{RegionCache, RegionKey};
use crate::config::{ParsePolicy, StoreConfig};
use crate::interval::Interval;
use crate::parser::{ParseError, RecordParser};
use crate::reader::RangeReader;
use log::debug;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Errors for a single query. None of them touch the cache.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("unknown contig '{0}'")]
    UnknownContig(String),

    #[error("invalid region {contig}:{start}-{stop}: start > stop")]
    InvalidRegion {
        contig: String,
        start: u64,
        stop: u64,
    },

    #[error("annotation source unavailable for {contig}:{start}-{stop}: {source}")]
    SourceUnavailable {
        contig: String,
        start: u64,
        stop: u64,
        #[source]
        source: io::Error,
    },

    #[error("assembly failed: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("parse error at line {line} of {contig} fetch: {source}")]
    Parse {
        contig: String,
        line: usize,
        #[source]
        source: ParseError,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Trees returned by a query. Shared with the cache, cheap to clone.
pub type QueryResult<D> = Arc<Vec<Interval<D>>>;

/// Counters accumulated over the store's lifetime.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StoreStats {
    /// Queries received
    pub queries: usize,
    /// Queries answered from the cache
    pub cache_hits: usize,
    /// Range reader fetches
    pub fetches: usize,
    /// Records fed to the assembler
    pub records: usize,
    /// Lines the parser rejected
    pub skipped_lines: usize,
    /// Orphan roots emitted because a parent never arrived
    pub dangling: usize,
}

impl std::fmt::Display for StoreStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Queries: {}, Cache hits: {}, Fetches: {}, Records: {}, Skipped: {}, Dangling: {}",
            self.queries,
            self.cache_hits,
            self.fetches,
            self.records,
            self.skipped_lines,
            self.dangling
        )
    }
}

/// Region queries over a range reader, with re-assembly and an LRU cache.
pub struct IndexedAnnotationStore<R, P: RecordParser> {
    reader: R,
    parser: P,
    config: StoreConfig,
    cache: RegionCache<QueryResult<P::Data>>,
    assembler: IntervalAssembler<P::Data>,
    stats: StoreStats,
}

impl<R, P> IndexedAnnotationStore<R, P>
where
    R: RangeReader,
    P: RecordParser,
    P::Data: Clone,
{
    /// Create a store with the default configuration (128 cached queries).
    pub fn new(reader: R, parser: P) -> Self {
        Self::with_config(reader, parser, StoreConfig::default())
    }

    pub fn with_config(reader: R, parser: P, config: StoreConfig) -> Self {
        Self {
            reader,
            parser,
            cache: RegionCache::new(config.cache_size),
            config,
            assembler: IntervalAssembler::new(),
            stats: StoreStats::default(),
        }
    }

    /// Return the annotation trees intersecting `[start, stop)` on `contig`.
    ///
    /// An empty result is not an error. A zero-length query returns only
    /// zero-length features at exactly that coordinate.
    pub fn query(&mut self, contig: &str, start: u64, stop: u64) -> Result<QueryResult<P::Data>> {
        self.stats.queries += 1;

        if !self.reader.has_contig(contig) {
            return Err(StoreError::UnknownContig(contig.to_string()));
        }
        if start > stop {
            return Err(StoreError::InvalidRegion {
                contig: contig.to_string(),
                start,
                stop,
            });
        }

        let key = RegionKey::new(contig, start, stop);
        if let Some(hit) = self.cache.get(&key) {
            self.stats.cache_hits += 1;
            debug!("cache hit for {}:{}-{}", contig, start, stop);
            return Ok(Arc::clone(hit));
        }

        debug!("cache miss for {}:{}-{}", contig, start, stop);
        let trees = Arc::new(self.assemble_region(contig, start, stop)?);
        self.cache.put(key, Arc::clone(&trees));
        Ok(trees)
    }

    fn assemble_region(
        &mut self,
        contig: &str,
        start: u64,
        stop: u64,
    ) -> Result<Vec<Interval<P::Data>>> {
        let lines = self
            .reader
            .fetch_lines(contig, start, stop)
            .map_err(|source| StoreError::SourceUnavailable {
                contig: contig.to_string(),
                start,
                stop,
                source,
            })?;
        self.stats.fetches += 1;

        let mut records = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            match self.parser.parse(line) {
                Ok(record) => records.push(record),
                Err(ParseError::Comment) => {}
                Err(e) => match self.config.parse_policy {
                    ParsePolicy::Skip => {
                        self.stats.skipped_lines += 1;
                        debug!("skipping line {} of {} fetch: {}", i + 1, contig, e);
                    }
                    ParsePolicy::Fail => {
                        return Err(StoreError::Parse {
                            contig: contig.to_string(),
                            line: i + 1,
                            source: e,
                        });
                    }
                },
            }
        }

        // Stable: parents listed ahead of children at equal starts stay ahead.
        records.sort_by_key(|r| r.span.start);
        self.stats.records += records.len();

        // The fetch is bounded, so every record goes in before anything is
        // drained: a parent stays live for a child past an unrelated feature.
        self.assembler.reset();
        for record in records {
            self.assembler.add_record(record)?;
        }
        let mut trees: Vec<_> = self
            .assembler
            .finish()
            .into_iter()
            .filter(|t| t.intersects_region(start, stop))
            .collect();
        self.stats.dangling += self.assembler.dangling_count();

        trees.sort_by(|a, b| a.span.cmp(&b.span));
        Ok(trees)
    }

    /// Drop cached results for one contig, or all contigs when None.
    ///
    /// Returns the number of cached queries removed.
    pub fn invalidate(&mut self, contig: Option<&str>) -> usize {
        let removed = self.cache.invalidate(contig);
        debug!(
            "invalidated {} cached queries for {}",
            removed,
            contig.unwrap_or("all contigs")
        );
        removed
    }

    /// Lines skipped because the parser rejected them.
    pub fn skipped_count(&self) -> usize {
        self.stats.skipped_lines
    }

    /// Orphan roots emitted because a declared parent never arrived.
    pub fn dangling_count(&self) -> usize {
        self.stats.dangling
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    /// Mutable access to the reader. Cached results are not invalidated.
    pub fn reader_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn parser(&self) -> &P {
        &self.parser
    }
}
